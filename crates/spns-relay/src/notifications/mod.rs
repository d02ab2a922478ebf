//! Notification pipeline.
//!
//! - [`NotificationService`] resolves notify requests and fills the dispatch
//!   queue
//! - [`PushWorker`] drains the queue into a [`PushSink`] and feeds outcomes
//!   back into the device registry
//! - [`LogSink`] and, with the `push-notifications` feature, `FcmSink` are
//!   the available sinks

#[cfg(feature = "push-notifications")]
pub mod fcm;
pub mod service;
pub mod sink;
pub mod worker;

#[cfg(feature = "push-notifications")]
pub use fcm::{FcmClient, FcmSink};
pub use service::NotificationService;
pub use sink::{DeliveryOutcome, LogSink, PushSink};
pub use worker::{PushWorker, WorkerStats};

/// Errors raised by push providers.
#[derive(Debug, thiserror::Error)]
pub enum NotificationError {
    /// Failed to read or parse provider credentials.
    #[error("Push credentials error: {0}")]
    Credentials(String),

    /// HTTP request to the provider failed.
    #[error("Push request error: {0}")]
    Request(String),

    /// The provider returned a non-success status code.
    #[error("Push API error (status {status}): {body}")]
    ApiError {
        /// HTTP status code returned by the provider.
        status: u16,
        /// Response body.
        body: String,
    },
}
