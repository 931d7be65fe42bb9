//! Provider error type and retryability classification.

use thiserror::Error;

/// Errors from LLM provider calls.
#[derive(Error, Debug)]
#[non_exhaustive]
pub enum ProviderError {
    /// Authentication was rejected (HTTP 401/403).
    #[error("authentication failed: {0}")]
    AuthFailed(String),

    /// The requested model does not exist at this endpoint.
    #[error("model not found: {0}")]
    ModelNotFound(String),

    /// The provider is throttling requests (HTTP 429).
    #[error("rate limited: retry after {retry_after_ms}ms")]
    RateLimited {
        /// Suggested wait before retrying.
        retry_after_ms: u64,
    },

    /// The request timed out.
    #[error("request timed out")]
    Timeout,

    /// A transport-level HTTP error.
    #[error("http error: {0}")]
    Http(#[from] reqwest::Error),

    /// The provider returned a non-success status.
    #[error("HTTP {status}: {body}")]
    ServerError {
        /// HTTP status code.
        status: u16,
        /// Response body (truncated).
        body: String,
    },

    /// The response body could not be interpreted.
    #[error("invalid response: {0}")]
    InvalidResponse(String),

    /// JSON decoding failed.
    #[error("json error: {0}")]
    Json(#[from] serde_json::Error),

    /// Every model in the fallback chain failed.
    #[error("all models exhausted: {}", attempts.join("; "))]
    AllModelsExhausted {
        /// Per-model failure summaries, in attempt order.
        attempts: Vec<String>,
    },
}

/// Whether an error is transient: the call may succeed on a different
/// model or after a cooldown. Permanent errors (auth, bad request) are
/// not worth failing over for.
pub fn is_transient(err: &ProviderError) -> bool {
    match err {
        ProviderError::RateLimited { .. }
        | ProviderError::Timeout
        | ProviderError::Http(_) => true,
        ProviderError::ServerError { status, .. } => *status >= 500,
        ProviderError::ModelNotFound(_) => true,
        ProviderError::AuthFailed(_)
        | ProviderError::InvalidResponse(_)
        | ProviderError::Json(_)
        | ProviderError::AllModelsExhausted { .. } => false,
    }
}

/// Convenience alias.
pub type Result<T> = std::result::Result<T, ProviderError>;
