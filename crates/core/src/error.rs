//! Error types for the Educore domain.
//!
//! Uses `thiserror` for ergonomic error definitions.
//! Each bounded context has its own error enum; the top-level [`Error`]
//! wraps them with `#[from]` conversions.

use thiserror::Error;

/// Message shown to end users for any failure other than bad input.
pub const PUBLIC_PROCESSING_ERROR: &str = "Failed to process query";

/// The top-level error type for all Educore operations.
#[derive(Debug, Error)]
pub enum Error {
    // --- Input validation (never retried) ---
    #[error("Validation error: {0}")]
    Validation(String),

    // --- External providers (embedding, retrieval, synthesis, signals) ---
    #[error("Provider error: {0}")]
    Provider(#[from] ProviderError),

    // --- Knowledge graph ---
    #[error("Graph error: {0}")]
    Graph(#[from] GraphError),

    // --- Response cache ---
    #[error("Cache error: {0}")]
    Cache(#[from] CacheError),

    // --- Configuration errors ---
    #[error("Configuration error: {message}")]
    Config { message: String },

    // --- Serialization ---
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    // --- Generic ---
    #[error("Internal error: {0}")]
    Internal(String),
}

impl Error {
    /// Build a validation error.
    pub fn validation(message: impl Into<String>) -> Self {
        Self::Validation(message.into())
    }

    /// Whether this error was caused by the caller's input.
    pub fn is_validation(&self) -> bool {
        matches!(self, Self::Validation(_))
    }

    /// The message an end user is allowed to see.
    ///
    /// Validation errors are returned verbatim; everything else collapses to
    /// a generic processing error so provider details never leak.
    pub fn public_message(&self) -> String {
        match self {
            Self::Validation(message) => message.clone(),
            _ => PUBLIC_PROCESSING_ERROR.to_string(),
        }
    }
}

/// Result type alias using our Error.
pub type Result<T> = std::result::Result<T, Error>;

// --- Bounded context errors ---

#[derive(Debug, Clone, Error)]
pub enum ProviderError {
    #[error("API request failed: {message} (status: {status_code})")]
    ApiError { status_code: u16, message: String },

    #[error("Rate limited by provider, retry after {retry_after_secs}s")]
    RateLimited { retry_after_secs: u64 },

    #[error("Authentication failed: {0}")]
    AuthenticationFailed(String),

    #[error("Provider not configured: {0}")]
    NotConfigured(String),

    #[error("Request timed out: {0}")]
    Timeout(String),

    #[error("Provider unavailable: {0}")]
    Unavailable(String),

    #[error("Network error: {0}")]
    Network(String),

    #[error("Invalid provider response: {0}")]
    InvalidResponse(String),
}

impl ProviderError {
    /// Whether a retry has a reasonable chance of succeeding.
    pub fn is_retryable(&self) -> bool {
        match self {
            Self::RateLimited { .. } | Self::Timeout(_) | Self::Network(_) | Self::Unavailable(_) => {
                true
            }
            Self::ApiError { status_code, .. } => *status_code >= 500,
            Self::AuthenticationFailed(_) | Self::NotConfigured(_) | Self::InvalidResponse(_) => {
                false
            }
        }
    }
}

#[derive(Debug, Clone, Error)]
pub enum GraphError {
    /// A node or edge upsert failed part-way through a batch.
    ///
    /// `applied` lists the keys written before the failure.
    #[error("GRAPH_UPDATE_FAILED: tenant {tenant_id}: {reason} ({} records applied)", .applied.len())]
    UpdateFailed {
        tenant_id: String,
        applied: Vec<String>,
        reason: String,
    },

    #[error("Graph storage error: {0}")]
    Storage(String),

    #[error("Graph query failed: {0}")]
    QueryFailed(String),

    #[error("Invalid graph event: {0}")]
    InvalidEvent(String),
}

#[derive(Debug, Clone, Error)]
pub enum CacheError {
    #[error("Cache backend unavailable: {0}")]
    Unavailable(String),

    #[error("Cache backend error: {0}")]
    Backend(String),

    #[error("Cached value could not be decoded: {0}")]
    Codec(String),
}
