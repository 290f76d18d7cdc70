//! Storage backends for Educore.
//!
//! In-memory implementations are always available; the PostgreSQL/pgvector
//! implementations sit behind the `postgres` feature.

pub mod in_memory;
pub mod noop;
pub mod vector;

#[cfg(feature = "postgres")]
pub mod postgres;

pub use in_memory::{InMemoryCache, InMemoryGraphStore};
pub use noop::NoopCache;
pub use vector::{InMemoryVectorIndex, cosine_similarity};

#[cfg(feature = "postgres")]
pub use postgres::{PgCache, PgGraphStore, PgVectorRetriever};
