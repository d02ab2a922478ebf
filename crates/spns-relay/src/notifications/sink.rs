//! Push sink abstraction.

use async_trait::async_trait;
use tracing::info;

use crate::dispatch::NotificationJob;
use crate::registry::token_prefix;

/// What happened to one push attempt.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DeliveryOutcome {
    Delivered,
    /// The provider rejected the token for good; it should be unregistered.
    InvalidToken,
    /// Delivery failed after the sink's own retries.
    Failed(String),
}

/// Outbound delivery of a single job.
#[async_trait]
pub trait PushSink: Send + Sync {
    /// Short name for logs.
    fn name(&self) -> &'static str;

    async fn send(&self, job: &NotificationJob) -> DeliveryOutcome;
}

/// Sink that only logs. Used when no push provider is configured.
#[derive(Debug, Default, Clone, Copy)]
pub struct LogSink;

#[async_trait]
impl PushSink for LogSink {
    fn name(&self) -> &'static str {
        "log"
    }

    async fn send(&self, job: &NotificationJob) -> DeliveryOutcome {
        info!(
            job_id = %job.id,
            token_prefix = %token_prefix(&job.destination.token),
            platform = %job.destination.platform,
            payload_len = job.payload.len(),
            "Push notification (log sink)"
        );
        DeliveryOutcome::Delivered
    }
}
