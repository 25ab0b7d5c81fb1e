// Error types for the orchestration kernel

use thiserror::Error;
use uuid::Uuid;

/// Result type for orchestration operations
pub type Result<T> = std::result::Result<T, OrchestrationError>;

/// Orchestration errors
///
/// Every variant maps to a stable error code and a single user-visible
/// sentence; raw provider payloads never cross this boundary.
#[derive(Debug, Clone, Error)]
pub enum OrchestrationError {
    /// Input failed validation (length bounds, empty prompt).
    #[error("Invalid input: {0}")]
    InvalidInput(String),

    /// The caller exceeded its hourly quota.
    #[error("Rate limit exceeded, retry after {retry_after_secs}s")]
    RateLimited {
        /// Seconds until the oldest window entry expires.
        retry_after_secs: u64,
    },

    /// No provider is available anywhere at the start of processing.
    #[error("No AI providers are configured or available")]
    NoProviders,

    /// Every subtask failed non-recoverably.
    #[error("Orchestration failed: {0}")]
    OrchestrationFailed(String),

    /// The request was cancelled externally.
    #[error("Request cancelled")]
    Cancelled,

    /// An internal invariant was violated.
    #[error("Internal integrity error: {0}")]
    Integrity(String),

    /// The referenced request does not exist.
    #[error("Unknown request: {0}")]
    UnknownRequest(Uuid),
}

impl OrchestrationError {
    /// Stable machine-readable code for this failure.
    #[must_use]
    pub fn code(&self) -> &'static str {
        match self {
            Self::InvalidInput(_) => "invalid_input",
            Self::RateLimited { .. } => "rate_limited",
            Self::NoProviders => "no_providers",
            Self::OrchestrationFailed(_) => "orchestration_failed",
            Self::Cancelled => "cancelled",
            Self::Integrity(_) => "integrity",
            Self::UnknownRequest(_) => "unknown_request",
        }
    }

    /// One human-readable sentence, safe to show to end users.
    #[must_use]
    pub fn user_message(&self) -> String {
        match self {
            Self::InvalidInput(reason) => format!("The request was rejected: {reason}."),
            Self::RateLimited { retry_after_secs } => {
                format!("Too many requests; try again in {retry_after_secs} seconds.")
            }
            Self::NoProviders => {
                "No AI providers are currently available to serve this request.".to_string()
            }
            Self::OrchestrationFailed(_) => {
                "The request could not be completed by any available model.".to_string()
            }
            Self::Cancelled => "The request was cancelled.".to_string(),
            Self::Integrity(_) => "An internal error interrupted this request.".to_string(),
            Self::UnknownRequest(_) => "The requested item does not exist.".to_string(),
        }
    }
}
