//! Queue-wide progress, recomputed from item state on every change.

use vaultup_protocol::{QueueProgress, UploadStatus};

/// The parts of an item the aggregate depends on.
#[derive(Debug, Clone, Copy)]
pub(crate) struct ItemFigures<'a> {
    pub status: &'a UploadStatus,
    pub size_bytes: u64,
    pub bytes_transferred: u64,
}

/// Folds item figures into a [`QueueProgress`].
///
/// Cancelled items count toward `total_files` but not toward the byte totals.
/// A completed item counts its full size once. When there are no bytes to
/// weigh by, the completed-file ratio is used instead.
pub(crate) fn aggregate<'a>(items: impl IntoIterator<Item = ItemFigures<'a>>) -> QueueProgress {
    let mut total_files = 0usize;
    let mut completed_files = 0usize;
    let mut counted_files = 0usize;
    let mut transferred_bytes = 0u64;
    let mut total_bytes = 0u64;

    for item in items {
        total_files += 1;
        match item.status {
            UploadStatus::Cancelled => continue,
            UploadStatus::Completed { .. } => {
                completed_files += 1;
                transferred_bytes = transferred_bytes.saturating_add(item.size_bytes);
            }
            _ => {
                transferred_bytes = transferred_bytes
                    .saturating_add(item.bytes_transferred.min(item.size_bytes));
            }
        }
        counted_files += 1;
        total_bytes = total_bytes.saturating_add(item.size_bytes);
    }

    let overall_progress = if total_bytes > 0 {
        transferred_bytes as f64 / total_bytes as f64 * 100.0
    } else if counted_files > 0 {
        completed_files as f64 / counted_files as f64 * 100.0
    } else {
        100.0
    };

    QueueProgress {
        total_files,
        completed_files,
        overall_progress: overall_progress.clamp(0.0, 100.0),
        transferred_bytes,
        total_bytes,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use vaultup_protocol::{ContentId, RejectDetails, UploadError};

    fn fig(status: &UploadStatus, size: u64, done: u64) -> ItemFigures<'_> {
        ItemFigures {
            status,
            size_bytes: size,
            bytes_transferred: done,
        }
    }

    #[test]
    fn empty_queue_is_complete() {
        let p = aggregate(std::iter::empty());
        assert_eq!(p, QueueProgress::default());
        assert_eq!(p.overall_progress, 100.0);
    }

    #[test]
    fn weighs_by_bytes() {
        let uploading = UploadStatus::Uploading;
        let queued = UploadStatus::Queued;
        let done = UploadStatus::Completed {
            content_id: ContentId::new("c"),
        };
        let p = aggregate([
            fig(&done, 100, 100),
            fig(&uploading, 200, 50),
            fig(&queued, 100, 0),
        ]);
        assert_eq!(p.total_files, 3);
        assert_eq!(p.completed_files, 1);
        assert_eq!(p.transferred_bytes, 150);
        assert_eq!(p.total_bytes, 400);
        assert!((p.overall_progress - 37.5).abs() < 1e-9);
    }

    #[test]
    fn cancelled_items_leave_the_byte_totals() {
        let cancelled = UploadStatus::Cancelled;
        let uploading = UploadStatus::Uploading;
        let p = aggregate([fig(&cancelled, 1000, 400), fig(&uploading, 100, 50)]);
        assert_eq!(p.total_files, 2);
        assert_eq!(p.total_bytes, 100);
        assert_eq!(p.transferred_bytes, 50);
        assert!((p.overall_progress - 50.0).abs() < 1e-9);
    }

    #[test]
    fn overshoot_is_clamped() {
        let uploading = UploadStatus::Uploading;
        let p = aggregate([fig(&uploading, 10, 50)]);
        assert_eq!(p.transferred_bytes, 10);
        assert_eq!(p.overall_progress, 100.0);
    }

    #[test]
    fn failed_items_keep_partial_bytes() {
        let failed = UploadStatus::failed(UploadError::TransportRetriable {
            details: RejectDetails::raw("busy"),
        });
        let p = aggregate([fig(&failed, 100, 30)]);
        assert_eq!(p.transferred_bytes, 30);
        assert!((p.overall_progress - 30.0).abs() < 1e-9);
    }

    #[test]
    fn zero_byte_items_use_file_ratio() {
        let done = UploadStatus::Completed {
            content_id: ContentId::new("c"),
        };
        let queued = UploadStatus::Queued;
        let p = aggregate([fig(&done, 0, 0), fig(&queued, 0, 0)]);
        assert_eq!(p.total_bytes, 0);
        assert!((p.overall_progress - 50.0).abs() < 1e-9);
    }

    #[test]
    fn only_cancelled_items_report_complete() {
        let cancelled = UploadStatus::Cancelled;
        let p = aggregate([fig(&cancelled, 10, 5)]);
        assert_eq!(p.total_files, 1);
        assert_eq!(p.overall_progress, 100.0);
    }
}
