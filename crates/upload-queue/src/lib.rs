//! Upload queue and transfer orchestrator.
//!
//! Accepts files, splits each into fixed-size chunks, encrypts every chunk
//! for the destination, and streams them in order through a [`Transport`].
//! At most `concurrency` files transfer at once; the rest wait in FIFO order.
//!
//! - Transient rejections are retried in place with backoff
//!   ([`RetryPolicy`]); permanent ones fail the item.
//! - Failed items that are retriable can be requeued by the user.
//! - Every change is published as a [`QueueEvent`](vaultup_protocol::QueueEvent)
//!   carrying the recomputed [`QueueProgress`](vaultup_protocol::QueueProgress).
//!
//! ```no_run
//! # use std::sync::Arc;
//! # use vaultup_upload_queue::*;
//! # async fn demo(transport: Arc<dyn Transport>, keys: Arc<dyn KeyMaterialProvider>) {
//! let service = UploadService::builder(
//!     vaultup_protocol::DestinationId::new("backup-1"),
//!     transport,
//!     keys,
//! )
//! .settings(UploaderSettings::default())
//! .build();
//!
//! let ids = service.enqueue(vec![NewUpload::memory("notes.txt", b"hello".to_vec(), "text/plain")]);
//! let mut progress = service.watch_progress();
//! while progress.changed().await.is_ok() {
//!     if progress.borrow().completed_files == ids.len() {
//!         break;
//!     }
//! }
//! # }
//! ```

mod aggregate;
mod error;
mod preprocess;
mod queue;
mod retry;
mod service;
mod settings;
mod transport;
mod worker;

#[cfg(test)]
mod test_support;

pub use error::{CommandError, SettingsError};
pub use preprocess::{IMAGE_MIME_TYPES, PreprocessError, PreprocessHook, Preprocessed, Preprocessor};
pub use queue::NewUpload;
pub use retry::{DEFAULT_CHUNK_RETRIES, RetryPolicy};
pub use service::{Throughput, UploadService, UploadServiceBuilder};
pub use settings::{CHUNK_SIZE_ENV, CONCURRENCY_ENV, UploaderSettings, settings_path};
pub use transport::{
    Ack, BoxFuture, KeyError, KeyMaterialProvider, StaticKeyProvider, Transport, TransportError,
};

/// Default number of files transferred at once.
pub const DEFAULT_CONCURRENCY: usize = 3;
