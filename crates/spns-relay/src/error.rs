//! Errors surfaced by the registries and the notification pipeline.
//!
//! Unknown identities, groups, and tokens are never errors: lookups return
//! empty results and removals are no-ops.

use crate::storage::StoreError;

/// Relay core errors.
#[derive(Debug, thiserror::Error)]
pub enum RelayError {
    /// Malformed request (bad target shape, empty identity/token/group).
    #[error("Validation error: {0}")]
    Validation(String),

    /// The backing store rejected a write; the in-memory change was rolled
    /// back and the caller may retry.
    #[error("Storage unavailable: {0}")]
    StorageUnavailable(String),

    /// A bounded dispatch queue is full (non-blocking enqueue only).
    #[error("Dispatch queue is full")]
    QueueFull,

    /// The push sink side of the dispatch queue has shut down.
    #[error("Dispatch queue is closed")]
    QueueClosed,
}

impl From<StoreError> for RelayError {
    fn from(e: StoreError) -> Self {
        Self::StorageUnavailable(e.to_string())
    }
}

/// Reject empty identifiers with a [`RelayError::Validation`] naming the field.
pub(crate) fn require_non_empty(field: &str, value: &str) -> Result<(), RelayError> {
    if value.is_empty() {
        return Err(RelayError::Validation(format!("{field} is required")));
    }
    Ok(())
}
