//! Public facade over the queue.

use std::sync::Arc;
use std::time::Duration;

use tokio::runtime::Handle;
use tokio::sync::{broadcast, watch};
use vaultup_protocol::{DestinationId, QueueEvent, QueueProgress, UploadId, UploadItemSnapshot};

use crate::error::CommandError;
use crate::preprocess::Preprocessor;
use crate::queue::{NewUpload, QueueShared};
use crate::retry::RetryPolicy;
use crate::settings::UploaderSettings;
use crate::transport::{KeyMaterialProvider, Transport};
use crate::worker::WorkerContext;

/// Current transfer rate across all active items.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Throughput {
    pub bytes_per_second: f64,
    /// `None` while idle or before enough samples exist.
    pub eta: Option<Duration>,
}

/// Upload queue bound to one destination storage instance.
///
/// Commands take effect synchronously; transfers run on the tokio runtime
/// the service was built on. Dropping the service cancels every in-flight
/// transfer.
pub struct UploadService {
    shared: Arc<QueueShared>,
    destination: DestinationId,
    settings: UploaderSettings,
}

impl UploadService {
    pub fn builder(
        destination: DestinationId,
        transport: Arc<dyn Transport>,
        keys: Arc<dyn KeyMaterialProvider>,
    ) -> UploadServiceBuilder {
        UploadServiceBuilder {
            destination,
            transport,
            keys,
            settings: UploaderSettings::default(),
            retry: RetryPolicy::default(),
            preprocessor: None,
            runtime: None,
        }
    }

    pub fn destination(&self) -> &DestinationId {
        &self.destination
    }

    pub fn settings(&self) -> UploaderSettings {
        self.settings
    }

    /// Adds files to the back of the queue and returns their ids in order.
    pub fn enqueue(&self, uploads: Vec<NewUpload>) -> Vec<UploadId> {
        self.shared.enqueue(uploads)
    }

    /// Cancels a queued or active item. Finished items are left as they are.
    pub fn cancel(&self, id: UploadId) -> Result<(), CommandError> {
        self.shared.cancel(id)
    }

    /// Requeues an item that failed with a retriable error.
    pub fn retry(&self, id: UploadId) -> Result<(), CommandError> {
        self.shared.retry(id)
    }

    /// Drops an item from the queue, cancelling it first if needed.
    pub fn remove(&self, id: UploadId) -> Result<(), CommandError> {
        self.shared.remove(id)
    }

    /// Cancels every unfinished item. Returns how many were cancelled.
    pub fn cancel_all(&self) -> usize {
        self.shared.cancel_all()
    }

    /// Requeues every retriable failure.
    pub fn retry_failed(&self) -> Vec<UploadId> {
        self.shared.retry_failed()
    }

    /// Removes completed and cancelled items. Failures stay for inspection.
    pub fn clear_finished(&self) -> usize {
        self.shared.clear_finished()
    }

    /// All items in enqueue order.
    pub fn snapshot(&self) -> Vec<UploadItemSnapshot> {
        self.shared.snapshot()
    }

    pub fn get(&self, id: UploadId) -> Option<UploadItemSnapshot> {
        self.shared.get(id)
    }

    pub fn progress(&self) -> QueueProgress {
        self.shared.progress()
    }

    /// Stream of every queue change, in order.
    ///
    /// The channel buffers a few thousand events. A receiver that falls
    /// further behind gets `RecvError::Lagged`; resync from
    /// [`snapshot`](Self::snapshot) or [`watch_progress`](Self::watch_progress).
    pub fn subscribe(&self) -> broadcast::Receiver<QueueEvent> {
        self.shared.subscribe()
    }

    /// Latest aggregate progress; intermediate values may be skipped.
    pub fn watch_progress(&self) -> watch::Receiver<QueueProgress> {
        self.shared.watch_progress()
    }

    pub fn throughput(&self) -> Throughput {
        let speed = self.shared.speed();
        if !self.shared.has_active() {
            speed.reset();
            return Throughput {
                bytes_per_second: 0.0,
                eta: None,
            };
        }
        let progress = self.shared.progress();
        let remaining = progress
            .total_bytes
            .saturating_sub(progress.transferred_bytes);
        Throughput {
            bytes_per_second: speed.bytes_per_second(),
            eta: speed.eta(remaining),
        }
    }
}

pub struct UploadServiceBuilder {
    destination: DestinationId,
    transport: Arc<dyn Transport>,
    keys: Arc<dyn KeyMaterialProvider>,
    settings: UploaderSettings,
    retry: RetryPolicy,
    preprocessor: Option<Preprocessor>,
    runtime: Option<Handle>,
}

impl UploadServiceBuilder {
    pub fn settings(mut self, settings: UploaderSettings) -> Self {
        self.settings = settings;
        self
    }

    pub fn retry_policy(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    pub fn preprocessor(mut self, preprocessor: Preprocessor) -> Self {
        self.preprocessor = Some(preprocessor);
        self
    }

    /// Runtime to spawn transfers on. Defaults to the current one.
    pub fn runtime(mut self, handle: Handle) -> Self {
        self.runtime = Some(handle);
        self
    }

    /// # Panics
    ///
    /// Without [`runtime`](Self::runtime), panics when called outside a
    /// tokio runtime.
    pub fn build(self) -> UploadService {
        let settings = self.settings.normalized();
        let ctx = WorkerContext {
            transport: self.transport,
            keys: self.keys,
            preprocessor: self.preprocessor,
            destination: self.destination.clone(),
            chunk_size: settings.chunk_size,
            retry: self.retry,
        };
        let runtime = self.runtime.unwrap_or_else(Handle::current);
        tracing::debug!(
            destination = %self.destination,
            chunk_size = settings.chunk_size,
            concurrency = settings.concurrency,
            "upload service created"
        );
        UploadService {
            shared: QueueShared::new(ctx, settings.concurrency, runtime),
            destination: self.destination,
            settings,
        }
    }
}
