//! The `notify` operation: validate, resolve, enqueue.

use std::sync::Arc;

use tracing::{debug, info, instrument};

use crate::dispatch::{DispatchQueue, NotificationJob};
use crate::error::RelayError;
use crate::router::{NotificationRouter, NotifyRequest};

/// Orchestrates the router and the dispatch queue.
#[derive(Clone)]
pub struct NotificationService {
    router: NotificationRouter,
    queue: DispatchQueue,
}

impl NotificationService {
    pub const fn new(router: NotificationRouter, queue: DispatchQueue) -> Self {
        Self { router, queue }
    }

    /// Resolve `request` and enqueue one job per destination token.
    ///
    /// Returns the number of jobs enqueued; zero when the target has no
    /// devices. A malformed request fails before anything is enqueued. Each
    /// job is enqueued whole, but a failure part way through leaves the
    /// earlier jobs queued.
    #[instrument(skip(self, request), fields(payload_len = request.payload.len()))]
    pub async fn notify(&self, request: &NotifyRequest) -> Result<usize, RelayError> {
        let destinations = self.router.resolve(request).await?;
        if destinations.is_empty() {
            debug!("No recipients");
            return Ok(0);
        }

        let payload: Arc<[u8]> = Arc::from(request.payload.as_bytes());
        let mut enqueued = 0;
        for destination in destinations {
            self.queue
                .enqueue(NotificationJob::new(destination, Arc::clone(&payload)))
                .await?;
            enqueued += 1;
        }

        info!(enqueued, "Notification enqueued");
        Ok(enqueued)
    }

    pub const fn router(&self) -> &NotificationRouter {
        &self.router
    }

    pub const fn queue(&self) -> &DispatchQueue {
        &self.queue
    }
}
