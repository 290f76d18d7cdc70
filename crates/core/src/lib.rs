//! # Educore Core
//!
//! Domain types, collaborator traits, and error definitions for the Educore
//! query engine. This crate performs **no I/O**: it defines the model that
//! every other crate implements against.
//!
//! ## Design Philosophy
//!
//! Every external collaborator (embedding model, language model, similarity
//! index, cache, graph datastore, learner-signal services) is a trait here.
//! Implementations live in their respective crates. This enables:
//! - Swapping implementations via configuration
//! - Easy testing with mock/stub implementations
//! - Clean dependency graph (all crates depend inward on core)

pub mod cache;
pub mod error;
pub mod event;
pub mod graph;
pub mod personalization;
pub mod provider;
pub mod query;
pub mod retrieval;

// Re-export key types at crate root for ergonomics
pub use cache::CacheStore;
pub use error::{CacheError, Error, GraphError, ProviderError, Result};
pub use event::{DomainEvent, EventBus};
pub use graph::{
    EdgeInput, GraphContextSource, GraphEvent, GraphNeighborhood, GraphStore, GraphVersion,
    KnowledgeContext, KnowledgeGraphEdge, KnowledgeGraphNode, NodeInput,
};
pub use personalization::{
    AssessmentProvider, DevLabProvider, LearningProgressProvider, Recommendations,
    SkillGapProvider, UserContext,
};
pub use provider::{AnswerSynthesizer, CompletionRequest, EmbeddingProvider};
pub use query::{QueryMetadata, QueryRequest, QueryResponse, cache_key, normalize_query};
pub use retrieval::{RetrievalMode, RetrievalQuery, RetrievedChunk, VectorRetriever};
