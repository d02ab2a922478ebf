//! Push worker: drains the dispatch queue into a sink.

use std::sync::Arc;

use tokio::sync::Semaphore;
use tokio::task::JoinSet;
use tracing::{info, warn};

use crate::dispatch::{DispatchReceiver, NotificationJob};
use crate::registry::{DeviceRegistry, token_prefix};

use super::sink::{DeliveryOutcome, PushSink};

/// Totals reported when the worker stops.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct WorkerStats {
    pub delivered: u64,
    pub invalid_tokens: u64,
    pub failed: u64,
}

impl WorkerStats {
    fn record(&mut self, outcome: &DeliveryOutcome) {
        match outcome {
            DeliveryOutcome::Delivered => self.delivered += 1,
            DeliveryOutcome::InvalidToken => self.invalid_tokens += 1,
            DeliveryOutcome::Failed(_) => self.failed += 1,
        }
    }
}

/// Hands every queued job to the sink exactly once, with at most
/// `concurrency` sends in flight.
pub struct PushWorker {
    receiver: DispatchReceiver,
    sink: Arc<dyn PushSink>,
    devices: Arc<DeviceRegistry>,
    concurrency: usize,
}

impl PushWorker {
    pub fn new(
        receiver: DispatchReceiver,
        sink: Arc<dyn PushSink>,
        devices: Arc<DeviceRegistry>,
        concurrency: usize,
    ) -> Self {
        Self {
            receiver,
            sink,
            devices,
            concurrency: concurrency.max(1),
        }
    }

    /// Run until every producer is gone and the queue is drained.
    pub async fn run(mut self) -> WorkerStats {
        let permits = Arc::new(Semaphore::new(self.concurrency));
        let mut in_flight = JoinSet::new();
        let mut stats = WorkerStats::default();

        info!(
            sink = self.sink.name(),
            concurrency = self.concurrency,
            "Push worker started"
        );

        while let Some(job) = self.receiver.dequeue().await {
            let Ok(permit) = Arc::clone(&permits).acquire_owned().await else {
                break;
            };
            while let Some(done) = in_flight.try_join_next() {
                collect(&mut stats, done);
            }

            let sink = Arc::clone(&self.sink);
            let devices = Arc::clone(&self.devices);
            in_flight.spawn(async move {
                let outcome = deliver(sink.as_ref(), &devices, &job).await;
                drop(permit);
                outcome
            });
        }

        while let Some(done) = in_flight.join_next().await {
            collect(&mut stats, done);
        }

        info!(
            delivered = stats.delivered,
            invalid_tokens = stats.invalid_tokens,
            failed = stats.failed,
            "Push worker stopped"
        );
        stats
    }
}

fn collect(stats: &mut WorkerStats, done: Result<DeliveryOutcome, tokio::task::JoinError>) {
    match done {
        Ok(outcome) => stats.record(&outcome),
        Err(e) => warn!(error = %e, "Push task aborted"),
    }
}

/// Send one job and report the outcome to the registry.
async fn deliver(
    sink: &dyn PushSink,
    devices: &DeviceRegistry,
    job: &NotificationJob,
) -> DeliveryOutcome {
    let outcome = sink.send(job).await;
    let token = job.destination.token.as_str();

    match &outcome {
        DeliveryOutcome::Delivered => devices.record_push_success(token).await,
        DeliveryOutcome::InvalidToken => match devices.unregister(token).await {
            Ok(Some(identity)) => info!(
                token_prefix = %token_prefix(token),
                identity = %identity,
                "Provider rejected token, unregistered"
            ),
            Ok(None) => {}
            Err(e) => warn!(
                token_prefix = %token_prefix(token),
                error = %e,
                "Failed to unregister rejected token"
            ),
        },
        DeliveryOutcome::Failed(reason) => {
            warn!(
                job_id = %job.id,
                token_prefix = %token_prefix(token),
                reason = %reason,
                "Push delivery failed"
            );
            if let Err(e) = devices.record_push_failure(token).await {
                warn!(
                    token_prefix = %token_prefix(token),
                    error = %e,
                    "Failed to drop failing token"
                );
            }
        }
    }
    outcome
}
