use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::UploadError;

/// Opaque identifier of an upload item.
///
/// Assigned monotonically at enqueue time and never reused.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct UploadId(u64);

impl UploadId {
    pub fn new(raw: u64) -> Self {
        Self(raw)
    }

    pub fn get(self) -> u64 {
        self.0
    }
}

impl fmt::Display for UploadId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "upload-{}", self.0)
    }
}

/// Identifier under which one transfer attempt streams its chunks.
///
/// A user-initiated retry gets a fresh `attempt`, so the backend never mixes
/// chunks from two attempts of the same item.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FileId {
    pub item: UploadId,
    pub attempt: u32,
}

impl fmt::Display for FileId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}", self.item, self.attempt)
    }
}

/// Identifier returned by the backend for a fully stored file.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ContentId(String);

impl ContentId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ContentId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Logical address of the storage instance files are uploaded to.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct DestinationId(String);

impl DestinationId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for DestinationId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Lifecycle state of an upload item.
///
/// ```text
/// Queued -> Uploading <-> Retrying -> Completed | Failed | Cancelled
/// Failed { retriable: true } --retry--> Queued
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "state", rename_all = "snake_case")]
pub enum UploadStatus {
    Queued,
    Uploading,
    /// A chunk failed transiently and the worker is backing off before
    /// re-sending it. Still holds a concurrency slot.
    Retrying { chunk_attempt: u32 },
    Completed { content_id: ContentId },
    Failed { error: UploadError, retriable: bool },
    Cancelled,
}

impl UploadStatus {
    /// Builds a `Failed` status whose `retriable` flag follows the error.
    pub fn failed(error: UploadError) -> Self {
        let retriable = error.is_retriable();
        Self::Failed { error, retriable }
    }

    /// `Uploading` or `Retrying`: a worker currently holds the item.
    pub fn is_active(&self) -> bool {
        matches!(self, Self::Uploading | Self::Retrying { .. })
    }

    /// `Completed`, `Failed` or `Cancelled`: no worker will touch the item.
    pub fn is_finished(&self) -> bool {
        matches!(
            self,
            Self::Completed { .. } | Self::Failed { .. } | Self::Cancelled
        )
    }

    pub fn is_retriable_failure(&self) -> bool {
        matches!(self, Self::Failed { retriable: true, .. })
    }

    /// Short lowercase label, for logs and compact UIs.
    pub fn label(&self) -> &'static str {
        match self {
            Self::Queued => "queued",
            Self::Uploading => "uploading",
            Self::Retrying { .. } => "retrying",
            Self::Completed { .. } => "completed",
            Self::Failed { .. } => "failed",
            Self::Cancelled => "cancelled",
        }
    }
}

/// Point-in-time copy of one upload item.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UploadItemSnapshot {
    pub id: UploadId,
    pub name: String,
    pub size_bytes: u64,
    pub mime_type: String,
    pub status: UploadStatus,
    pub bytes_transferred: u64,
    pub attempt: u32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_error: Option<UploadError>,
    pub enqueued_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl UploadItemSnapshot {
    /// Returns the item progress as a percentage (0-100).
    pub fn percentage(&self) -> f64 {
        if matches!(self.status, UploadStatus::Completed { .. }) {
            return 100.0;
        }
        if self.size_bytes == 0 {
            return 0.0;
        }
        self.bytes_transferred.min(self.size_bytes) as f64 / self.size_bytes as f64 * 100.0
    }
}

/// Queue-wide progress, derived from item state.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct QueueProgress {
    /// Items currently in the queue, whatever their status.
    pub total_files: usize,
    pub completed_files: usize,
    /// Percentage in `[0, 100]` over non-cancelled items.
    pub overall_progress: f64,
    pub transferred_bytes: u64,
    pub total_bytes: u64,
}

impl Default for QueueProgress {
    fn default() -> Self {
        Self {
            total_files: 0,
            completed_files: 0,
            overall_progress: 100.0,
            transferred_bytes: 0,
            total_bytes: 0,
        }
    }
}

/// What changed in the queue.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum QueueChange {
    Enqueued { item: UploadItemSnapshot },
    Updated { item: UploadItemSnapshot },
    Removed { id: UploadId },
}

impl QueueChange {
    pub fn id(&self) -> UploadId {
        match self {
            Self::Enqueued { item } | Self::Updated { item } => item.id,
            Self::Removed { id } => *id,
        }
    }
}

/// Change notification emitted on every queue mutation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct QueueEvent {
    /// Strictly increasing per queue.
    pub seq: u64,
    pub change: QueueChange,
    /// Aggregate progress after the change was applied.
    pub progress: QueueProgress,
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::reject::RejectDetails;

    fn snapshot(status: UploadStatus, size: u64, transferred: u64) -> UploadItemSnapshot {
        let now = Utc::now();
        UploadItemSnapshot {
            id: UploadId::new(1),
            name: "photo.png".into(),
            size_bytes: size,
            mime_type: "image/png".into(),
            status,
            bytes_transferred: transferred,
            attempt: 0,
            last_error: None,
            enqueued_at: now,
            updated_at: now,
        }
    }

    #[test]
    fn ids_display() {
        let id = UploadId::new(7);
        assert_eq!(id.to_string(), "upload-7");
        let file = FileId { item: id, attempt: 2 };
        assert_eq!(file.to_string(), "upload-7.2");
    }

    #[test]
    fn failed_status_follows_error_retriability() {
        let transient = UploadStatus::failed(UploadError::TransportRetriable {
            details: RejectDetails::raw("busy"),
        });
        assert!(transient.is_retriable_failure());

        let fatal = UploadStatus::failed(UploadError::TransportFatal {
            details: RejectDetails::raw("denied"),
        });
        assert!(!fatal.is_retriable_failure());
        assert!(fatal.is_finished());
    }

    #[test]
    fn active_and_finished_are_disjoint() {
        let all = [
            UploadStatus::Queued,
            UploadStatus::Uploading,
            UploadStatus::Retrying { chunk_attempt: 1 },
            UploadStatus::Completed {
                content_id: ContentId::new("c"),
            },
            UploadStatus::Cancelled,
        ];
        for status in &all {
            assert!(!(status.is_active() && status.is_finished()), "{status:?}");
        }
        assert!(!UploadStatus::Queued.is_active());
        assert!(!UploadStatus::Queued.is_finished());
    }

    #[test]
    fn status_serialization_is_tagged() {
        let json = serde_json::to_string(&UploadStatus::Retrying { chunk_attempt: 2 }).unwrap();
        assert_eq!(json, r#"{"state":"retrying","chunk_attempt":2}"#);
        assert_eq!(
            serde_json::to_string(&UploadStatus::Queued).unwrap(),
            r#"{"state":"queued"}"#
        );
    }

    #[test]
    fn snapshot_percentage() {
        assert!((snapshot(UploadStatus::Uploading, 1000, 400).percentage() - 40.0).abs() < 1e-9);
        // Clamped even if a counter overshoots.
        assert!(
            (snapshot(UploadStatus::Uploading, 1000, 5000).percentage() - 100.0).abs() < 1e-9
        );
        let done = snapshot(
            UploadStatus::Completed {
                content_id: ContentId::new("c"),
            },
            1000,
            0,
        );
        assert!((done.percentage() - 100.0).abs() < 1e-9);
        assert!(snapshot(UploadStatus::Queued, 0, 0).percentage().abs() < 1e-9);
    }

    #[test]
    fn empty_progress_is_complete() {
        let p = QueueProgress::default();
        assert_eq!(p.total_files, 0);
        assert!((p.overall_progress - 100.0).abs() < f64::EPSILON);
    }

    #[test]
    fn change_id() {
        let item = snapshot(UploadStatus::Queued, 10, 0);
        assert_eq!(
            QueueChange::Updated { item }.id(),
            UploadId::new(1)
        );
        assert_eq!(
            QueueChange::Removed {
                id: UploadId::new(9)
            }
            .id(),
            UploadId::new(9)
        );
    }
}
