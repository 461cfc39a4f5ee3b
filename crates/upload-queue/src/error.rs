use vaultup_protocol::UploadId;

/// Rejected queue command. The queue is left unchanged.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum CommandError {
    #[error("no upload with id {0}")]
    UnknownItem(UploadId),

    /// The command is not valid for the item's current status.
    #[error("cannot {command} {id} while it is {status}")]
    Usage {
        id: UploadId,
        command: &'static str,
        status: &'static str,
    },
}

/// Errors from loading or saving [`UploaderSettings`](crate::UploaderSettings).
#[derive(Debug, thiserror::Error)]
pub enum SettingsError {
    #[error("settings I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("invalid settings file: {0}")]
    Json(#[from] serde_json::Error),
}
