//! Scriptable collaborators for unit tests.

use std::collections::{HashMap, VecDeque};
use std::sync::Arc;
use std::sync::Mutex;
use std::sync::atomic::{AtomicUsize, Ordering};

use tokio::sync::{Notify, Semaphore};
use tokio_util::sync::CancellationToken;
use vaultup_protocol::{ContentId, DestinationId, FileId, UploadId};
use vaultup_transfer::KeyMaterial;

use crate::transport::{
    Ack, BoxFuture, KeyError, KeyMaterialProvider, StaticKeyProvider, Transport, TransportError,
};

pub(crate) fn test_key() -> KeyMaterial {
    KeyMaterial::derive(b"test-secret", "dest-1")
}

pub(crate) fn test_keys() -> Arc<dyn KeyMaterialProvider> {
    Arc::new(StaticKeyProvider::new(test_key()))
}

pub(crate) fn transient() -> TransportError {
    TransportError::Rejected("Reject code: 2\nReject text: subnet busy".into())
}

pub(crate) fn fatal() -> TransportError {
    TransportError::Rejected("Reject code: 4\nReject text: caller is not authorized".into())
}

pub(crate) struct FailingKeys;

impl KeyMaterialProvider for FailingKeys {
    fn derive_key<'a>(
        &'a self,
        destination: &'a DestinationId,
    ) -> BoxFuture<'a, Result<KeyMaterial, KeyError>> {
        Box::pin(async move { Err(KeyError::InvalidDestination(destination.to_string())) })
    }
}

#[derive(Debug, Clone)]
pub(crate) struct SentChunk {
    pub file_id: FileId,
    pub offset: u64,
    pub payload: Vec<u8>,
    pub accepted: bool,
}

/// Records every call. Failures are popped from a script, per item first,
/// then global. A gated transport holds each `send_chunk` until a permit is
/// released or the call is cancelled.
#[derive(Default)]
pub(crate) struct MockTransport {
    chunk_script: Mutex<VecDeque<TransportError>>,
    item_scripts: Mutex<HashMap<UploadId, VecDeque<TransportError>>>,
    finalize_script: Mutex<VecDeque<TransportError>>,
    calls: Mutex<Vec<SentChunk>>,
    finalized: Mutex<Vec<FileId>>,
    gate: Option<Semaphore>,
    entered: AtomicUsize,
    entered_notify: Notify,
}

impl MockTransport {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    pub(crate) fn gated() -> Self {
        Self {
            gate: Some(Semaphore::new(0)),
            ..Self::default()
        }
    }

    pub(crate) fn release(&self, permits: usize) {
        if let Some(gate) = &self.gate {
            gate.add_permits(permits);
        }
    }

    pub(crate) fn script_chunks(&self, errors: impl IntoIterator<Item = TransportError>) {
        self.chunk_script.lock().unwrap().extend(errors);
    }

    pub(crate) fn script_item(
        &self,
        id: UploadId,
        errors: impl IntoIterator<Item = TransportError>,
    ) {
        self.item_scripts
            .lock()
            .unwrap()
            .entry(id)
            .or_default()
            .extend(errors);
    }

    pub(crate) fn script_finalize(&self, errors: impl IntoIterator<Item = TransportError>) {
        self.finalize_script.lock().unwrap().extend(errors);
    }

    pub(crate) fn calls(&self) -> Vec<SentChunk> {
        self.calls.lock().unwrap().clone()
    }

    pub(crate) fn accepted(&self) -> Vec<SentChunk> {
        self.calls().into_iter().filter(|c| c.accepted).collect()
    }

    pub(crate) fn finalize_calls(&self) -> usize {
        self.finalized.lock().unwrap().len()
    }

    /// Number of `send_chunk` calls that have started, gated or not.
    pub(crate) fn entered(&self) -> usize {
        self.entered.load(Ordering::SeqCst)
    }

    pub(crate) async fn wait_for_pending(&self, n: usize) {
        loop {
            let notified = self.entered_notify.notified();
            if self.entered() >= n {
                return;
            }
            notified.await;
        }
    }

    fn next_failure(&self, item: UploadId) -> Option<TransportError> {
        if let Some(script) = self.item_scripts.lock().unwrap().get_mut(&item)
            && let Some(err) = script.pop_front()
        {
            return Some(err);
        }
        self.chunk_script.lock().unwrap().pop_front()
    }
}

impl Transport for MockTransport {
    fn send_chunk<'a>(
        &'a self,
        file_id: FileId,
        offset: u64,
        payload: &'a [u8],
        cancel: &'a CancellationToken,
    ) -> BoxFuture<'a, Result<Ack, TransportError>> {
        Box::pin(async move {
            self.entered.fetch_add(1, Ordering::SeqCst);
            self.entered_notify.notify_waiters();
            if let Some(gate) = &self.gate {
                tokio::select! {
                    _ = cancel.cancelled() => return Err(TransportError::Cancelled),
                    permit = gate.acquire() => permit.expect("gate closed").forget(),
                }
            }
            let failure = self.next_failure(file_id.item);
            self.calls.lock().unwrap().push(SentChunk {
                file_id,
                offset,
                payload: payload.to_vec(),
                accepted: failure.is_none(),
            });
            match failure {
                Some(err) => Err(err),
                None => Ok(Ack),
            }
        })
    }

    fn finalize<'a>(
        &'a self,
        file_id: FileId,
        _cancel: &'a CancellationToken,
    ) -> BoxFuture<'a, Result<ContentId, TransportError>> {
        Box::pin(async move {
            self.finalized.lock().unwrap().push(file_id);
            match self.finalize_script.lock().unwrap().pop_front() {
                Some(err) => Err(err),
                None => Ok(ContentId::new(format!("content-{file_id}"))),
            }
        })
    }
}
