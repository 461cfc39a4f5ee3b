//! Data model shared by the vaultup upload crates.
//!
//! Identifiers, item status, queue snapshots, progress figures and the
//! structured form of a backend rejection. Everything here is plain data
//! (serde-serializable) so UI layers can render it without depending on
//! the orchestrator itself.

pub mod error;
pub mod reject;
pub mod types;

pub use error::UploadError;
pub use reject::{RejectCode, RejectDetails};
pub use types::{
    ContentId, DestinationId, FileId, QueueChange, QueueEvent, QueueProgress, UploadId,
    UploadItemSnapshot, UploadStatus,
};
