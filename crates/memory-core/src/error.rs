//! Error taxonomy
//!
//! One classified error type is used by every backend and by the facade.
//! Single-record operations that represent a validated business outcome
//! (duplicate store, not-found delete) return `Ok((false, reason))` instead
//! of an `Err` — see the propagation policy this mirrors.

/// Classified error kind for the memory engine
#[non_exhaustive]
#[derive(Debug, thiserror::Error)]
pub enum MemoryError {
    /// Bad input: empty content, tag too long, malformed hash, non-finite embedding.
    /// Not retried; surfaced to the caller as-is.
    #[error("validation error: {0}")]
    Validation(String),

    /// Transient local failure (lock contention, disk pressure).
    #[error("storage error: {0}")]
    Storage(String),

    /// Cloud HTTP failure that is worth retrying (network error, 429, 5xx).
    #[error("network error: {0}")]
    Network(String),

    /// Cloud hard limit (payload too large, quota exceeded, capacity). Never retried.
    #[error("limit error: {0}")]
    Limit(String),

    /// Embedding provider unavailable or timed out.
    #[error("embedding error: {0}")]
    Embedding(String),

    /// Inconsistent schema (wrong distance metric, missing tables).
    #[error("migration error: {0}")]
    Migration(String),

    /// Unparseable time expression; echoes the bad token.
    #[error("time expression error: unrecognized token '{0}'")]
    TimeExpression(String),
}

impl From<rusqlite::Error> for MemoryError {
    fn from(e: rusqlite::Error) -> Self {
        MemoryError::Storage(e.to_string())
    }
}

impl From<std::io::Error> for MemoryError {
    fn from(e: std::io::Error) -> Self {
        MemoryError::Storage(e.to_string())
    }
}

impl From<reqwest::Error> for MemoryError {
    fn from(e: reqwest::Error) -> Self {
        if e.is_timeout() || e.is_connect() {
            MemoryError::Network(e.to_string())
        } else if let Some(status) = e.status() {
            if status.as_u16() == 429 || status.is_server_error() {
                MemoryError::Network(format!("{status}: {e}"))
            } else if status.as_u16() == 413 || status.as_u16() == 507 {
                MemoryError::Limit(format!("{status}: {e}"))
            } else {
                MemoryError::Validation(format!("{status}: {e}"))
            }
        } else {
            MemoryError::Network(e.to_string())
        }
    }
}

/// Result alias used throughout the crate
pub type Result<T> = std::result::Result<T, MemoryError>;

/// Whether an error is worth retrying by the sync worker / cloud client.
///
/// Mirrors §7: retry on Storage/Network, never on Validation/Limit/Migration.
pub fn is_retryable(err: &MemoryError) -> bool {
    matches!(err, MemoryError::Storage(_) | MemoryError::Network(_))
}
