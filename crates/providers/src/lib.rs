//! Provider implementations for Educore.
//!
//! - [`OpenAiCompatProvider`] implements both `EmbeddingProvider` and
//!   `AnswerSynthesizer` against any OpenAI-compatible endpoint.
//! - [`HttpSignalClient`] implements the four learner-signal traits.
//! - [`retry`] holds the injectable retry policy used around synthesis.

pub mod openai_compat;
pub mod retry;
pub mod signals;

pub use openai_compat::OpenAiCompatProvider;
pub use retry::{ExponentialBackoff, NoRetry, RetryPolicy, run_with_retry};
pub use signals::HttpSignalClient;
