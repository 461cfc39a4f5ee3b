//! Fault injection for exercising the retry path end to end.

use std::sync::atomic::{AtomicU64, Ordering};

use tokio_util::sync::CancellationToken;
use vaultup_protocol::{ContentId, FileId};
use vaultup_upload_queue::{Ack, BoxFuture, Transport, TransportError};

/// Rejects every `every`-th chunk call with a transient capacity error.
pub struct FlakyTransport<T> {
    inner: T,
    every: u64,
    calls: AtomicU64,
}

impl<T: Transport> FlakyTransport<T> {
    pub fn new(inner: T, every: u64) -> Self {
        Self {
            inner,
            every: every.max(1),
            calls: AtomicU64::new(0),
        }
    }
}

impl<T: Transport> Transport for FlakyTransport<T> {
    fn send_chunk<'a>(
        &'a self,
        file_id: FileId,
        offset: u64,
        payload: &'a [u8],
        cancel: &'a CancellationToken,
    ) -> BoxFuture<'a, Result<Ack, TransportError>> {
        let n = self.calls.fetch_add(1, Ordering::Relaxed) + 1;
        if n % self.every == 0 {
            tracing::debug!(file_id = %file_id, offset, "injecting transient rejection");
            return Box::pin(async {
                Err(TransportError::Rejected(
                    "Reject code: 2\nError code: IC0201\nReject message: simulated queue full"
                        .into(),
                ))
            });
        }
        self.inner.send_chunk(file_id, offset, payload, cancel)
    }

    fn finalize<'a>(
        &'a self,
        file_id: FileId,
        cancel: &'a CancellationToken,
    ) -> BoxFuture<'a, Result<ContentId, TransportError>> {
        self.inner.finalize(file_id, cancel)
    }
}
