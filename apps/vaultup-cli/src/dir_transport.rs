//! Directory-backed transport.
//!
//! Layout under the output root:
//!
//! ```text
//! <root>/<file id>/00000000000000000000.chunk   ciphertext, named by plaintext offset
//! <root>/<file id>/manifest.json                 written on finalize
//! ```
//!
//! Failures are reported in the backend's rejection text format so they go
//! through the same classifier as a remote backend.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::{Mutex, PoisonError};

use serde::Serialize;
use sha2::{Digest, Sha256};
use tokio_util::sync::CancellationToken;
use vaultup_protocol::{ContentId, FileId};
use vaultup_transfer::{NONCE_LEN, TAG_LEN};
use vaultup_upload_queue::{Ack, BoxFuture, Transport, TransportError};

#[derive(Default)]
struct Stream {
    next_offset: u64,
    chunks: u64,
    ciphertext_bytes: u64,
    hasher: Sha256,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct Manifest<'a> {
    file_id: String,
    content_id: &'a str,
    chunks: u64,
    plaintext_bytes: u64,
    ciphertext_bytes: u64,
}

pub struct DirTransport {
    root: PathBuf,
    streams: Mutex<HashMap<FileId, Stream>>,
}

impl DirTransport {
    pub fn new(root: impl Into<PathBuf>) -> std::io::Result<Self> {
        let root = root.into();
        std::fs::create_dir_all(&root)?;
        Ok(Self {
            root,
            streams: Mutex::new(HashMap::new()),
        })
    }

    pub fn file_dir(&self, file_id: FileId) -> PathBuf {
        self.root.join(file_id.to_string())
    }

    fn streams(&self) -> std::sync::MutexGuard<'_, HashMap<FileId, Stream>> {
        self.streams.lock().unwrap_or_else(PoisonError::into_inner)
    }

    async fn store_chunk(
        &self,
        file_id: FileId,
        offset: u64,
        payload: &[u8],
    ) -> Result<Ack, TransportError> {
        let plaintext_len = payload
            .len()
            .checked_sub(NONCE_LEN + TAG_LEN)
            .ok_or_else(|| rejection(4, "payload shorter than the chunk envelope"))?
            as u64;

        let expected = self
            .streams()
            .get(&file_id)
            .map_or(0, |s| s.next_offset);
        if offset != expected {
            return Err(rejection(
                5,
                &format!("out-of-order chunk for {file_id}: offset {offset}, expected {expected}"),
            ));
        }

        let dir = self.file_dir(file_id);
        tokio::fs::create_dir_all(&dir).await.map_err(io_rejection)?;
        tokio::fs::write(chunk_path(&dir, offset), payload)
            .await
            .map_err(io_rejection)?;

        let mut streams = self.streams();
        let stream = streams.entry(file_id).or_default();
        stream.next_offset = offset + plaintext_len;
        stream.chunks += 1;
        stream.ciphertext_bytes += payload.len() as u64;
        stream.hasher.update(payload);
        tracing::debug!(file_id = %file_id, offset, len = payload.len(), "chunk stored");
        Ok(Ack)
    }

    async fn commit(&self, file_id: FileId) -> Result<ContentId, TransportError> {
        let stream = self.streams().remove(&file_id).unwrap_or_default();
        let content_id = hex::encode(stream.hasher.finalize());

        let dir = self.file_dir(file_id);
        tokio::fs::create_dir_all(&dir).await.map_err(io_rejection)?;
        let manifest = Manifest {
            file_id: file_id.to_string(),
            content_id: &content_id,
            chunks: stream.chunks,
            plaintext_bytes: stream.next_offset,
            ciphertext_bytes: stream.ciphertext_bytes,
        };
        let json = serde_json::to_vec_pretty(&manifest)
            .map_err(|e| rejection(5, &format!("manifest encoding failed: {e}")))?;
        tokio::fs::write(dir.join("manifest.json"), json)
            .await
            .map_err(io_rejection)?;

        tracing::debug!(file_id = %file_id, content_id = %content_id, chunks = stream.chunks, "stream committed");
        Ok(ContentId::new(content_id))
    }
}

impl Transport for DirTransport {
    fn send_chunk<'a>(
        &'a self,
        file_id: FileId,
        offset: u64,
        payload: &'a [u8],
        cancel: &'a CancellationToken,
    ) -> BoxFuture<'a, Result<Ack, TransportError>> {
        Box::pin(async move {
            if cancel.is_cancelled() {
                return Err(TransportError::Cancelled);
            }
            self.store_chunk(file_id, offset, payload).await
        })
    }

    fn finalize<'a>(
        &'a self,
        file_id: FileId,
        cancel: &'a CancellationToken,
    ) -> BoxFuture<'a, Result<ContentId, TransportError>> {
        Box::pin(async move {
            if cancel.is_cancelled() {
                return Err(TransportError::Cancelled);
            }
            self.commit(file_id).await
        })
    }
}

fn chunk_path(dir: &Path, offset: u64) -> PathBuf {
    dir.join(format!("{offset:020}.chunk"))
}

fn rejection(code: u8, message: &str) -> TransportError {
    TransportError::Rejected(format!("Reject code: {code}\nReject message: {message}"))
}

/// Local I/O failures are reported as transient.
fn io_rejection(e: std::io::Error) -> TransportError {
    rejection(2, &format!("storage I/O error: {e}"))
}
