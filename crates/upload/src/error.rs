//! Upload error types.

use chunkdrop_transfer::{ChannelError, ErrorKind, ValidationError};

/// Errors that end a whole upload task.
///
/// Per-file failures are not errors at this level; they are recorded in
/// the batch report and the batch carries on.
#[derive(Debug, thiserror::Error)]
pub enum UploadError {
    #[error("invalid input: {0}")]
    Validation(#[from] ValidationError),

    #[error("connection failed: {0}")]
    Connect(ChannelError),

    #[error("cancelled")]
    Cancelled,
}

impl UploadError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            UploadError::Validation(_) => ErrorKind::Validation,
            UploadError::Connect(_) => ErrorKind::Connect,
            UploadError::Cancelled => ErrorKind::Cancelled,
        }
    }

    /// Title and message for the user-facing error report.
    pub fn user_message(&self) -> (&'static str, String) {
        match self {
            UploadError::Validation(ValidationError::DisallowedType(name)) => {
                ("File Type Not Allowed", format!("{name} is not an allowed file type."))
            }
            UploadError::Validation(ValidationError::Directory(name)) => (
                "Folders Not Supported",
                format!("{name} is a folder. Only files can be uploaded."),
            ),
            UploadError::Validation(e) => ("Invalid Input", e.to_string()),
            UploadError::Connect(e) => (e.title(), e.to_string()),
            UploadError::Cancelled => ("Upload Cancelled", "The upload was cancelled.".into()),
        }
    }
}
