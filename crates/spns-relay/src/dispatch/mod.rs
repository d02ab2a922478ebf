//! Dispatch queue between notification resolution and push delivery.
//!
//! A FIFO channel of [`NotificationJob`]s. With a capacity the queue is
//! bounded and [`DispatchQueue::enqueue`] waits for room; without one it
//! never blocks.

use std::sync::Arc;

use spns_core::db::unix_timestamp;
use tokio::sync::mpsc;
use uuid::Uuid;

use crate::error::RelayError;
use crate::registry::DeviceToken;

/// One push to one device. Immutable once created.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NotificationJob {
    pub id: Uuid,
    pub destination: DeviceToken,
    /// Shared between all jobs of one notify call.
    pub payload: Arc<[u8]>,
    /// Unix timestamp (seconds).
    pub enqueued_at: i64,
}

impl NotificationJob {
    pub fn new(destination: DeviceToken, payload: Arc<[u8]>) -> Self {
        Self {
            id: Uuid::new_v4(),
            destination,
            payload,
            enqueued_at: unix_timestamp(),
        }
    }
}

#[derive(Clone)]
enum JobSender {
    Bounded(mpsc::Sender<NotificationJob>),
    Unbounded(mpsc::UnboundedSender<NotificationJob>),
}

enum JobReceiver {
    Bounded(mpsc::Receiver<NotificationJob>),
    Unbounded(mpsc::UnboundedReceiver<NotificationJob>),
}

/// Producer half, cloned into the notification service.
#[derive(Clone)]
pub struct DispatchQueue {
    tx: JobSender,
}

/// Consumer half, handed to the push worker.
pub struct DispatchReceiver {
    rx: JobReceiver,
}

/// Create a dispatch queue. `None` or `Some(0)` means unbounded.
pub fn dispatch_queue(capacity: Option<usize>) -> (DispatchQueue, DispatchReceiver) {
    match capacity.filter(|c| *c > 0) {
        Some(capacity) => {
            let (tx, rx) = mpsc::channel(capacity);
            (
                DispatchQueue {
                    tx: JobSender::Bounded(tx),
                },
                DispatchReceiver {
                    rx: JobReceiver::Bounded(rx),
                },
            )
        }
        None => {
            let (tx, rx) = mpsc::unbounded_channel();
            (
                DispatchQueue {
                    tx: JobSender::Unbounded(tx),
                },
                DispatchReceiver {
                    rx: JobReceiver::Unbounded(rx),
                },
            )
        }
    }
}

impl DispatchQueue {
    /// Append `job`, waiting for room when the queue is bounded and full.
    pub async fn enqueue(&self, job: NotificationJob) -> Result<(), RelayError> {
        match &self.tx {
            JobSender::Bounded(tx) => tx.send(job).await.map_err(|_| RelayError::QueueClosed),
            JobSender::Unbounded(tx) => tx.send(job).map_err(|_| RelayError::QueueClosed),
        }
    }

    /// Append `job` without waiting; a full bounded queue yields
    /// [`RelayError::QueueFull`].
    pub fn try_enqueue(&self, job: NotificationJob) -> Result<(), RelayError> {
        match &self.tx {
            JobSender::Bounded(tx) => tx.try_send(job).map_err(|e| match e {
                mpsc::error::TrySendError::Full(_) => RelayError::QueueFull,
                mpsc::error::TrySendError::Closed(_) => RelayError::QueueClosed,
            }),
            JobSender::Unbounded(tx) => tx.send(job).map_err(|_| RelayError::QueueClosed),
        }
    }

    /// Configured capacity, `None` when unbounded.
    pub fn capacity(&self) -> Option<usize> {
        match &self.tx {
            JobSender::Bounded(tx) => Some(tx.max_capacity()),
            JobSender::Unbounded(_) => None,
        }
    }

    /// True once the receiver has been dropped or closed.
    pub fn is_closed(&self) -> bool {
        match &self.tx {
            JobSender::Bounded(tx) => tx.is_closed(),
            JobSender::Unbounded(tx) => tx.is_closed(),
        }
    }
}

impl DispatchReceiver {
    /// Wait for the next job. `None` once every producer is gone and the
    /// queue is drained.
    pub async fn dequeue(&mut self) -> Option<NotificationJob> {
        match &mut self.rx {
            JobReceiver::Bounded(rx) => rx.recv().await,
            JobReceiver::Unbounded(rx) => rx.recv().await,
        }
    }

    /// Next job if one is ready.
    pub fn try_dequeue(&mut self) -> Option<NotificationJob> {
        match &mut self.rx {
            JobReceiver::Bounded(rx) => rx.try_recv().ok(),
            JobReceiver::Unbounded(rx) => rx.try_recv().ok(),
        }
    }

    /// Stop accepting jobs. Already queued jobs can still be dequeued.
    pub fn close(&mut self) {
        match &mut self.rx {
            JobReceiver::Bounded(rx) => rx.close(),
            JobReceiver::Unbounded(rx) => rx.close(),
        }
    }
}
