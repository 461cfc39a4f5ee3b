//! Transfer worker: drives one leased item through preprocessing, key
//! derivation, and the ordered encrypt-and-send loop.
//!
//! The worker never touches queue state. Everything it learns goes back
//! through its [`Reporter`] callback, and the queue decides whether the
//! report still applies (the lease may have been revoked by `cancel`/`remove`).

use std::sync::Arc;

use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};
use vaultup_protocol::{ContentId, DestinationId, FileId, UploadError, UploadId};
use vaultup_transfer::{ChunkRange, ChunkReader, FileSource, KeyMaterial, encrypt_chunk};

use crate::preprocess::Preprocessor;
use crate::retry::RetryPolicy;
use crate::transport::{BoxFuture, KeyMaterialProvider, Transport, TransportError};

/// Collaborators and tunables shared by every worker of a queue.
pub(crate) struct WorkerContext {
    pub transport: Arc<dyn Transport>,
    pub keys: Arc<dyn KeyMaterialProvider>,
    pub preprocessor: Option<Preprocessor>,
    pub destination: DestinationId,
    pub chunk_size: usize,
    pub retry: RetryPolicy,
}

/// What a worker tells the queue about its lease.
#[derive(Debug)]
pub(crate) enum WorkerReport {
    /// The preprocessing hook replaced the source bytes.
    Prepared {
        source: Arc<dyn FileSource>,
        size_bytes: u64,
    },
    /// A contiguous prefix of `bytes_transferred` bytes is acknowledged.
    Progress { bytes_transferred: u64 },
    /// A call failed transiently; the worker is backing off.
    Retrying { chunk_attempt: u32 },
    Completed { content_id: ContentId },
    Failed { error: UploadError },
    Cancelled,
}

/// Narrow callback through which a worker reports to the queue.
pub(crate) type Reporter = Arc<dyn Fn(WorkerReport) + Send + Sync>;

/// Exclusive right to drive one item for one attempt.
pub(crate) struct Lease {
    pub id: UploadId,
    pub file_id: FileId,
    pub source: Arc<dyn FileSource>,
    pub size_bytes: u64,
    pub mime_type: String,
    /// The hook already ran in an earlier attempt.
    pub preprocessed: bool,
    pub cancel: CancellationToken,
}

enum WorkerExit {
    Failed(UploadError),
    Cancelled,
}

struct SealedChunk {
    range: ChunkRange,
    payload: Vec<u8>,
}

pub(crate) struct TransferWorker {
    ctx: Arc<WorkerContext>,
    lease: Lease,
    report: Reporter,
}

impl TransferWorker {
    pub(crate) fn new(ctx: Arc<WorkerContext>, lease: Lease, report: Reporter) -> Self {
        Self { ctx, lease, report }
    }

    /// Runs the lease to its outcome and reports it.
    pub(crate) async fn run(self) {
        let id = self.lease.id;
        let outcome = match self.drive().await {
            Ok(content_id) => {
                info!(id = %id, content_id = %content_id, "upload completed");
                WorkerReport::Completed { content_id }
            }
            Err(WorkerExit::Cancelled) => {
                info!(id = %id, "upload cancelled");
                WorkerReport::Cancelled
            }
            Err(WorkerExit::Failed(error)) => {
                error!(id = %id, retriable = error.is_retriable(), error = %error, "upload failed");
                WorkerReport::Failed { error }
            }
        };
        (self.report)(outcome);
    }

    async fn drive(&self) -> Result<ContentId, WorkerExit> {
        let (source, size_bytes) = self.prepare().await?;
        let key = self.derive_key().await?;

        let mut reader = ChunkReader::new(source, size_bytes, self.ctx.chunk_size);
        debug!(
            id = %self.lease.id,
            file_id = %self.lease.file_id,
            size_bytes,
            chunks = reader.total_chunks(),
            "transfer started"
        );

        // Chunk N+1 is not read until chunk N is acknowledged.
        loop {
            self.check_cancelled()?;
            let (next_reader, sealed) = read_and_seal(reader, key.clone()).await?;
            reader = next_reader;
            let Some(chunk) = sealed else {
                break;
            };

            self.check_cancelled()?;
            let offset = chunk.range.offset;
            self.with_retry("send_chunk", offset, || {
                self.ctx.transport.send_chunk(
                    self.lease.file_id,
                    offset,
                    &chunk.payload,
                    &self.lease.cancel,
                )
            })
            .await?;

            debug!(
                id = %self.lease.id,
                chunk = chunk.range.index,
                offset,
                len = chunk.range.len,
                "chunk acknowledged"
            );
            (self.report)(WorkerReport::Progress {
                bytes_transferred: chunk.range.end(),
            });
        }

        self.check_cancelled()?;
        self.with_retry("finalize", size_bytes, || {
            self.ctx
                .transport
                .finalize(self.lease.file_id, &self.lease.cancel)
        })
        .await
    }

    /// Runs the preprocessing hook once per item, if the mime type is allowed.
    async fn prepare(&self) -> Result<(Arc<dyn FileSource>, u64), WorkerExit> {
        let lease = &self.lease;
        let source = Arc::clone(&lease.source);
        let Some(preprocessor) = self
            .ctx
            .preprocessor
            .as_ref()
            .filter(|p| !lease.preprocessed && p.applies_to(&lease.mime_type))
        else {
            return Ok((source, lease.size_bytes));
        };

        let result = tokio::select! {
            biased;
            _ = lease.cancel.cancelled() => return Err(WorkerExit::Cancelled),
            r = preprocessor.hook().preprocess(source, &lease.mime_type) => r,
        };
        let prepared = result.map_err(|e| {
            WorkerExit::Failed(UploadError::Preprocessing {
                message: e.to_string(),
            })
        })?;

        debug!(
            id = %lease.id,
            mime_type = %lease.mime_type,
            from = lease.size_bytes,
            to = prepared.size_bytes,
            "preprocessed"
        );
        (self.report)(WorkerReport::Prepared {
            source: Arc::clone(&prepared.source),
            size_bytes: prepared.size_bytes,
        });
        Ok((prepared.source, prepared.size_bytes))
    }

    async fn derive_key(&self) -> Result<KeyMaterial, WorkerExit> {
        let result = tokio::select! {
            biased;
            _ = self.lease.cancel.cancelled() => return Err(WorkerExit::Cancelled),
            r = self.ctx.keys.derive_key(&self.ctx.destination) => r,
        };
        let key = result.map_err(|e| {
            WorkerExit::Failed(UploadError::Encryption {
                message: e.to_string(),
            })
        })?;
        key.validate().map_err(|e| {
            WorkerExit::Failed(UploadError::Encryption {
                message: e.to_string(),
            })
        })?;
        Ok(key)
    }

    /// Calls `op` until it succeeds, retrying transient failures in place
    /// with backoff. Every wait is abandoned as soon as the lease is cancelled.
    async fn with_retry<'f, T, F>(
        &self,
        call: &'static str,
        offset: u64,
        mut op: F,
    ) -> Result<T, WorkerExit>
    where
        F: FnMut() -> BoxFuture<'f, Result<T, TransportError>>,
    {
        let cancel = &self.lease.cancel;
        let mut retries = 0u32;
        loop {
            let result = tokio::select! {
                biased;
                _ = cancel.cancelled() => return Err(WorkerExit::Cancelled),
                r = op() => r,
            };
            let err = match result {
                Ok(value) => return Ok(value),
                Err(TransportError::Cancelled) => return Err(WorkerExit::Cancelled),
                Err(e) => e,
            };

            let verdict = err.classify();
            if !verdict.retriable {
                warn!(id = %self.lease.id, call, offset, error = %err, "fatal transport failure");
                return Err(WorkerExit::Failed(verdict.into_error()));
            }
            if retries >= self.ctx.retry.max_chunk_retries {
                warn!(
                    id = %self.lease.id,
                    call,
                    offset,
                    retries,
                    error = %err,
                    "chunk retries exhausted"
                );
                return Err(WorkerExit::Failed(verdict.into_error()));
            }

            retries += 1;
            let delay = self.ctx.retry.delay_for_attempt(retries);
            warn!(
                id = %self.lease.id,
                call,
                offset,
                retry = retries,
                delay_ms = delay.as_millis() as u64,
                error = %err,
                "transient transport failure, retrying"
            );
            (self.report)(WorkerReport::Retrying {
                chunk_attempt: retries,
            });

            tokio::select! {
                biased;
                _ = cancel.cancelled() => return Err(WorkerExit::Cancelled),
                _ = tokio::time::sleep(delay) => {}
            }
        }
    }

    fn check_cancelled(&self) -> Result<(), WorkerExit> {
        if self.lease.cancel.is_cancelled() {
            Err(WorkerExit::Cancelled)
        } else {
            Ok(())
        }
    }
}

/// Reads and encrypts the next chunk off the async executor.
async fn read_and_seal(
    mut reader: ChunkReader,
    key: KeyMaterial,
) -> Result<(ChunkReader, Option<SealedChunk>), WorkerExit> {
    let (reader, sealed) = tokio::task::spawn_blocking(move || {
        let sealed = seal_next(&mut reader, &key);
        (reader, sealed)
    })
    .await
    .map_err(|e| {
        WorkerExit::Failed(UploadError::Source {
            message: format!("chunk task failed: {e}"),
        })
    })?;
    let sealed = sealed.map_err(WorkerExit::Failed)?;
    Ok((reader, sealed))
}

fn seal_next(
    reader: &mut ChunkReader,
    key: &KeyMaterial,
) -> Result<Option<SealedChunk>, UploadError> {
    let Some(chunk) = reader.next_chunk().map_err(|e| UploadError::Source {
        message: e.to_string(),
    })?
    else {
        return Ok(None);
    };
    let payload = encrypt_chunk(&chunk.data, key).map_err(|e| UploadError::Encryption {
        message: e.to_string(),
    })?;
    Ok(Some(SealedChunk {
        range: chunk.range,
        payload,
    }))
}
