//! The Educore query engine.
//!
//! - [`QueryPipeline`]: cache → embed + graph context → retrieve → prompt →
//!   synthesize (retried) → cache write
//! - [`ContextAggregator`]: parallel, failure-tolerant learner-signal
//!   aggregation and personalized answers
//! - [`KnowledgeGraphManager`]: graph mutation ingestion and per-tenant
//!   sync tracking
//!
//! Every collaborator is injected at construction; nothing here resolves
//! its own dependencies.

pub mod aggregator;
pub mod graph_manager;
pub mod prompt;
pub mod query;

#[cfg(test)]
mod test_helpers;

pub use aggregator::{ContextAggregator, PersonalizedResponse};
pub use graph_manager::KnowledgeGraphManager;
pub use prompt::build_prompt;
pub use query::{PipelineSettings, PipelineTimeouts, QueryPipeline, QueryService};
