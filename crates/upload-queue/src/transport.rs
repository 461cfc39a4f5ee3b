//! Collaborator contracts consumed by the orchestrator.
//!
//! The application implements [`Transport`] on top of its RPC agent and
//! [`KeyMaterialProvider`] on top of its key custody. Using traits keeps the
//! queue decoupled from both and testable with mocks.

use std::future::Future;
use std::pin::Pin;

use tokio_util::sync::CancellationToken;
use vaultup_protocol::{ContentId, DestinationId, FileId, RejectDetails};
use vaultup_reject::Classification;
use vaultup_transfer::KeyMaterial;

/// Boxed future returned by the collaborator traits.
pub type BoxFuture<'a, T> = Pin<Box<dyn Future<Output = T> + Send + 'a>>;

/// Acknowledgement of one stored chunk.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Ack;

/// Failure of a single transport call.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum TransportError {
    /// The backend rejected the call; the payload is its rejection text.
    #[error("call rejected: {0}")]
    Rejected(String),

    /// The transport's own per-call timeout expired.
    #[error("call timed out")]
    Timeout,

    /// The call was aborted through its cancellation token.
    #[error("cancelled")]
    Cancelled,
}

impl TransportError {
    /// Retriable/fatal verdict for a failed call.
    ///
    /// Rejections go through the rejection classifier; a timeout is
    /// retriable. `Cancelled` is not a failure and must be handled before.
    pub fn classify(&self) -> Classification {
        match self {
            Self::Rejected(text) => vaultup_reject::classify(text),
            Self::Timeout => Classification {
                details: RejectDetails::raw("call timed out"),
                retriable: true,
            },
            Self::Cancelled => Classification {
                details: RejectDetails::raw("cancelled"),
                retriable: false,
            },
        }
    }
}

/// Chunk transport to the destination storage instance.
///
/// Implementations should observe `cancel` and return
/// [`TransportError::Cancelled`] promptly; the worker additionally drops the
/// in-flight future when the token fires.
pub trait Transport: Send + Sync {
    /// Stores one encrypted chunk at `offset` of the file streamed as `file_id`.
    fn send_chunk<'a>(
        &'a self,
        file_id: FileId,
        offset: u64,
        payload: &'a [u8],
        cancel: &'a CancellationToken,
    ) -> BoxFuture<'a, Result<Ack, TransportError>>;

    /// Commits the chunk stream of `file_id` and returns its content identifier.
    fn finalize<'a>(
        &'a self,
        file_id: FileId,
        cancel: &'a CancellationToken,
    ) -> BoxFuture<'a, Result<ContentId, TransportError>>;
}

/// Errors produced by a [`KeyMaterialProvider`].
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum KeyError {
    #[error("invalid destination identity: {0}")]
    InvalidDestination(String),

    #[error("key derivation failed: {0}")]
    Derivation(String),
}

/// Supplies the encryption key for a destination storage instance.
pub trait KeyMaterialProvider: Send + Sync {
    fn derive_key<'a>(
        &'a self,
        destination: &'a DestinationId,
    ) -> BoxFuture<'a, Result<KeyMaterial, KeyError>>;
}

/// Key provider holding one fixed key, for single-destination setups and tests.
#[derive(Debug, Clone)]
pub struct StaticKeyProvider {
    key: KeyMaterial,
}

impl StaticKeyProvider {
    pub fn new(key: KeyMaterial) -> Self {
        Self { key }
    }
}

impl KeyMaterialProvider for StaticKeyProvider {
    fn derive_key<'a>(
        &'a self,
        _destination: &'a DestinationId,
    ) -> BoxFuture<'a, Result<KeyMaterial, KeyError>> {
        Box::pin(async move { Ok(self.key.clone()) })
    }
}
