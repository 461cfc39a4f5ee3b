//! Queue state, scheduling, and lease bookkeeping.
//!
//! All mutations happen under one lock. Each mutation emits exactly one
//! [`QueueEvent`] per touched item and republishes the aggregate progress,
//! so observers never see a state the lock did not produce.

use std::collections::BTreeMap;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use chrono::{DateTime, Utc};
use tokio::runtime::Handle;
use tokio::sync::{broadcast, watch};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};
use vaultup_protocol::{
    FileId, QueueChange, QueueEvent, QueueProgress, UploadError, UploadId, UploadItemSnapshot,
    UploadStatus,
};
use vaultup_transfer::{FileSource, SpeedCalculator};

use crate::aggregate::{ItemFigures, aggregate};
use crate::error::CommandError;
use crate::worker::{Lease, Reporter, TransferWorker, WorkerContext, WorkerReport};

/// Capacity of the change-event channel. Every progress report is one
/// event, so small chunks fill it fast; slow subscribers see `Lagged`.
pub(crate) const EVENT_CAPACITY: usize = 4096;

/// A file submitted to [`enqueue`](crate::UploadService::enqueue).
#[derive(Debug, Clone)]
pub struct NewUpload {
    pub source: Arc<dyn FileSource>,
    pub size_bytes: u64,
    pub mime_type: String,
}

impl NewUpload {
    /// An empty mime type is recorded as `application/octet-stream`.
    pub fn new(source: Arc<dyn FileSource>, size_bytes: u64, mime_type: impl Into<String>) -> Self {
        let mime_type = mime_type.into();
        Self {
            source,
            size_bytes,
            mime_type: if mime_type.trim().is_empty() {
                "application/octet-stream".into()
            } else {
                mime_type
            },
        }
    }

    /// An in-memory file.
    pub fn memory(
        name: impl Into<String>,
        bytes: impl Into<Vec<u8>>,
        mime_type: impl Into<String>,
    ) -> Self {
        let source = vaultup_transfer::MemorySource::new(name, bytes);
        let size = source.len();
        Self::new(Arc::new(source), size, mime_type)
    }

    /// A file on disk; its size is read now.
    pub fn local(
        path: impl AsRef<std::path::Path>,
        mime_type: impl Into<String>,
    ) -> Result<Self, vaultup_transfer::TransferError> {
        let file = vaultup_transfer::LocalFile::new(path);
        let size = file.size()?;
        Ok(Self::new(Arc::new(file), size, mime_type))
    }
}

struct ActiveLease {
    generation: u64,
    cancel: CancellationToken,
}

struct UploadItem {
    id: UploadId,
    name: String,
    source: Arc<dyn FileSource>,
    size_bytes: u64,
    mime_type: String,
    status: UploadStatus,
    bytes_transferred: u64,
    attempt: u32,
    last_error: Option<UploadError>,
    preprocessed: bool,
    enqueued_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
    lease: Option<ActiveLease>,
}

impl UploadItem {
    fn snapshot(&self) -> UploadItemSnapshot {
        UploadItemSnapshot {
            id: self.id,
            name: self.name.clone(),
            size_bytes: self.size_bytes,
            mime_type: self.mime_type.clone(),
            status: self.status.clone(),
            bytes_transferred: self.bytes_transferred,
            attempt: self.attempt,
            last_error: self.last_error.clone(),
            enqueued_at: self.enqueued_at,
            updated_at: self.updated_at,
        }
    }

    fn figures(&self) -> ItemFigures<'_> {
        ItemFigures {
            status: &self.status,
            size_bytes: self.size_bytes,
            bytes_transferred: self.bytes_transferred,
        }
    }

    fn touch(&mut self) {
        self.updated_at = Utc::now();
    }

    /// Revokes the current lease, if any. Later reports from its worker are
    /// dropped.
    fn revoke_lease(&mut self) {
        if let Some(lease) = self.lease.take() {
            lease.cancel.cancel();
        }
    }
}

#[derive(Default)]
struct QueueState {
    // Ordered by id, which is enqueue order.
    items: BTreeMap<UploadId, UploadItem>,
    next_id: u64,
    next_generation: u64,
    seq: u64,
}

impl QueueState {
    fn active_count(&self) -> usize {
        self.items
            .values()
            .filter(|i| i.status.is_active())
            .count()
    }

    fn progress(&self) -> QueueProgress {
        aggregate(self.items.values().map(UploadItem::figures))
    }
}

pub(crate) struct QueueShared {
    state: Mutex<QueueState>,
    ctx: Arc<WorkerContext>,
    concurrency: usize,
    runtime: Handle,
    events: broadcast::Sender<QueueEvent>,
    progress: watch::Sender<QueueProgress>,
    speed: SpeedCalculator,
}

impl QueueShared {
    pub(crate) fn new(ctx: WorkerContext, concurrency: usize, runtime: Handle) -> Arc<Self> {
        let (events, _) = broadcast::channel(EVENT_CAPACITY);
        let (progress, _) = watch::channel(QueueProgress::default());
        Arc::new(Self {
            state: Mutex::new(QueueState::default()),
            ctx: Arc::new(ctx),
            concurrency: concurrency.max(1),
            runtime,
            events,
            progress,
            speed: SpeedCalculator::default(),
        })
    }

    fn lock(&self) -> MutexGuard<'_, QueueState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    // -----------------------------------------------------------------------
    // Commands
    // -----------------------------------------------------------------------

    pub(crate) fn enqueue(self: &Arc<Self>, uploads: Vec<NewUpload>) -> Vec<UploadId> {
        let mut state = self.lock();
        let mut ids = Vec::with_capacity(uploads.len());

        for upload in uploads {
            state.next_id += 1;
            let id = UploadId::new(state.next_id);
            let now = Utc::now();
            let item = UploadItem {
                id,
                name: upload.source.name().to_string(),
                source: upload.source,
                size_bytes: upload.size_bytes,
                mime_type: upload.mime_type,
                status: UploadStatus::Queued,
                bytes_transferred: 0,
                attempt: 0,
                last_error: None,
                preprocessed: false,
                enqueued_at: now,
                updated_at: now,
                lease: None,
            };
            info!(
                id = %id,
                name = %item.name,
                size_bytes = item.size_bytes,
                mime_type = %item.mime_type,
                "upload enqueued"
            );
            let snapshot = item.snapshot();
            state.items.insert(id, item);
            self.emit(&mut state, QueueChange::Enqueued { item: snapshot });
            ids.push(id);
        }

        self.schedule(&mut state);
        ids
    }

    pub(crate) fn cancel(self: &Arc<Self>, id: UploadId) -> Result<(), CommandError> {
        let mut state = self.lock();
        let item = state
            .items
            .get_mut(&id)
            .ok_or_else(|| unknown_item("cancel", id))?;
        if item.status.is_finished() {
            warn!(id = %id, status = item.status.label(), "cancel ignored for finished upload");
            return Ok(());
        }
        self.cancel_item(&mut state, id);
        self.schedule(&mut state);
        Ok(())
    }

    pub(crate) fn cancel_all(self: &Arc<Self>) -> usize {
        let mut state = self.lock();
        let ids: Vec<UploadId> = state
            .items
            .values()
            .filter(|i| !i.status.is_finished())
            .map(|i| i.id)
            .collect();
        for id in &ids {
            self.cancel_item(&mut state, *id);
        }
        ids.len()
    }

    pub(crate) fn retry(self: &Arc<Self>, id: UploadId) -> Result<(), CommandError> {
        let mut state = self.lock();
        let item = state
            .items
            .get_mut(&id)
            .ok_or_else(|| unknown_item("retry", id))?;
        if !item.status.is_retriable_failure() {
            warn!(id = %id, status = item.status.label(), "retry rejected");
            return Err(CommandError::Usage {
                id,
                command: "retry",
                status: item.status.label(),
            });
        }
        self.requeue(&mut state, id);
        self.schedule(&mut state);
        Ok(())
    }

    pub(crate) fn retry_failed(self: &Arc<Self>) -> Vec<UploadId> {
        let mut state = self.lock();
        let ids: Vec<UploadId> = state
            .items
            .values()
            .filter(|i| i.status.is_retriable_failure())
            .map(|i| i.id)
            .collect();
        for id in &ids {
            self.requeue(&mut state, *id);
        }
        self.schedule(&mut state);
        ids
    }

    pub(crate) fn remove(self: &Arc<Self>, id: UploadId) -> Result<(), CommandError> {
        let mut state = self.lock();
        if !self.remove_item(&mut state, id) {
            return Err(unknown_item("remove", id));
        }
        self.schedule(&mut state);
        Ok(())
    }

    pub(crate) fn clear_finished(self: &Arc<Self>) -> usize {
        let mut state = self.lock();
        let ids: Vec<UploadId> = state
            .items
            .values()
            .filter(|i| {
                matches!(
                    i.status,
                    UploadStatus::Completed { .. } | UploadStatus::Cancelled
                )
            })
            .map(|i| i.id)
            .collect();
        for id in &ids {
            self.remove_item(&mut state, *id);
        }
        if !ids.is_empty() {
            info!(count = ids.len(), "finished uploads cleared");
        }
        ids.len()
    }

    // -----------------------------------------------------------------------
    // Reads
    // -----------------------------------------------------------------------

    pub(crate) fn snapshot(&self) -> Vec<UploadItemSnapshot> {
        self.lock().items.values().map(UploadItem::snapshot).collect()
    }

    pub(crate) fn get(&self, id: UploadId) -> Option<UploadItemSnapshot> {
        self.lock().items.get(&id).map(UploadItem::snapshot)
    }

    pub(crate) fn progress(&self) -> QueueProgress {
        *self.progress.borrow()
    }

    /// A receiver that falls more than [`EVENT_CAPACITY`] events behind gets
    /// `RecvError::Lagged` and should resync from [`snapshot`](Self::snapshot).
    pub(crate) fn subscribe(&self) -> broadcast::Receiver<QueueEvent> {
        self.events.subscribe()
    }

    pub(crate) fn watch_progress(&self) -> watch::Receiver<QueueProgress> {
        self.progress.subscribe()
    }

    pub(crate) fn speed(&self) -> &SpeedCalculator {
        &self.speed
    }

    pub(crate) fn has_active(&self) -> bool {
        self.lock().active_count() > 0
    }

    // -----------------------------------------------------------------------
    // Internals (caller holds the lock)
    // -----------------------------------------------------------------------

    fn cancel_item(&self, state: &mut QueueState, id: UploadId) {
        let Some(item) = state.items.get_mut(&id) else {
            return;
        };
        item.revoke_lease();
        item.status = UploadStatus::Cancelled;
        item.touch();
        info!(id = %id, bytes_transferred = item.bytes_transferred, "upload cancelled");
        let snapshot = item.snapshot();
        self.emit(state, QueueChange::Updated { item: snapshot });
    }

    /// Drops the item and its lease. Returns `false` for an unknown id.
    fn remove_item(&self, state: &mut QueueState, id: UploadId) -> bool {
        let Some(mut item) = state.items.remove(&id) else {
            return false;
        };
        item.revoke_lease();
        info!(id = %id, status = item.status.label(), "upload removed");
        self.emit(state, QueueChange::Removed { id });
        true
    }

    fn requeue(&self, state: &mut QueueState, id: UploadId) {
        let Some(item) = state.items.get_mut(&id) else {
            return;
        };
        item.status = UploadStatus::Queued;
        item.bytes_transferred = 0;
        item.attempt += 1;
        item.touch();
        info!(id = %id, attempt = item.attempt, "upload requeued");
        let snapshot = item.snapshot();
        self.emit(state, QueueChange::Updated { item: snapshot });
    }

    /// Grants leases to the earliest queued items while a slot is free.
    fn schedule(self: &Arc<Self>, state: &mut QueueState) {
        let mut active = state.active_count();
        while active < self.concurrency {
            let Some(id) = state
                .items
                .values()
                .find(|i| i.status == UploadStatus::Queued)
                .map(|i| i.id)
            else {
                break;
            };

            state.next_generation += 1;
            let generation = state.next_generation;
            let Some(item) = state.items.get_mut(&id) else {
                break;
            };
            let cancel = CancellationToken::new();
            item.status = UploadStatus::Uploading;
            item.lease = Some(ActiveLease {
                generation,
                cancel: cancel.clone(),
            });
            item.touch();

            let lease = Lease {
                id,
                file_id: FileId {
                    item: id,
                    attempt: item.attempt,
                },
                source: Arc::clone(&item.source),
                size_bytes: item.size_bytes,
                mime_type: item.mime_type.clone(),
                preprocessed: item.preprocessed,
                cancel,
            };
            info!(id = %id, file_id = %lease.file_id, active = active + 1, "upload started");
            let snapshot = item.snapshot();
            self.emit(state, QueueChange::Updated { item: snapshot });
            self.spawn_worker(lease, generation);
            active += 1;
        }
    }

    fn spawn_worker(self: &Arc<Self>, lease: Lease, generation: u64) {
        let id = lease.id;
        let shared = Arc::downgrade(self);
        let report: Reporter = Arc::new(move |r| {
            if let Some(shared) = shared.upgrade() {
                shared.apply_report(id, generation, r);
            }
        });
        let worker = TransferWorker::new(Arc::clone(&self.ctx), lease, report);
        self.runtime.spawn(worker.run());
    }

    /// Applies a worker report if its lease is still the current one.
    fn apply_report(self: &Arc<Self>, id: UploadId, generation: u64, report: WorkerReport) {
        let mut state = self.lock();
        let Some(item) = state.items.get_mut(&id) else {
            debug!(id = %id, "report for removed upload dropped");
            return;
        };
        if item.lease.as_ref().map(|l| l.generation) != Some(generation) {
            debug!(id = %id, generation, "stale worker report dropped");
            return;
        }

        let mut released = false;
        match report {
            WorkerReport::Prepared { source, size_bytes } => {
                item.source = source;
                item.size_bytes = size_bytes;
                item.preprocessed = true;
            }
            WorkerReport::Progress { bytes_transferred } => {
                let bytes = bytes_transferred.min(item.size_bytes);
                if bytes > item.bytes_transferred {
                    self.speed.add_sample(bytes - item.bytes_transferred);
                    item.bytes_transferred = bytes;
                }
                item.status = UploadStatus::Uploading;
            }
            WorkerReport::Retrying { chunk_attempt } => {
                item.status = UploadStatus::Retrying { chunk_attempt };
            }
            WorkerReport::Completed { content_id } => {
                item.status = UploadStatus::Completed { content_id };
                item.bytes_transferred = item.size_bytes;
                item.last_error = None;
                item.lease = None;
                released = true;
            }
            WorkerReport::Failed { error } => {
                item.last_error = Some(error.clone());
                item.status = UploadStatus::failed(error);
                item.lease = None;
                released = true;
            }
            WorkerReport::Cancelled => {
                item.status = UploadStatus::Cancelled;
                item.lease = None;
                released = true;
            }
        }
        item.touch();

        let snapshot = item.snapshot();
        self.emit(&mut state, QueueChange::Updated { item: snapshot });
        if released {
            self.schedule(&mut state);
        }
    }

    fn emit(&self, state: &mut QueueState, change: QueueChange) {
        state.seq += 1;
        let progress = state.progress();
        self.progress.send_replace(progress);
        // No subscribers is fine.
        let _ = self.events.send(QueueEvent {
            seq: state.seq,
            change,
            progress,
        });
    }
}

fn unknown_item(command: &'static str, id: UploadId) -> CommandError {
    warn!(id = %id, command, "command for unknown upload ignored");
    CommandError::UnknownItem(id)
}

impl Drop for QueueShared {
    fn drop(&mut self) {
        let state = self.state.get_mut().unwrap_or_else(PoisonError::into_inner);
        for item in state.items.values_mut() {
            item.revoke_lease();
        }
    }
}
