use std::fmt;
use std::future::Future;
use std::path::{Path, PathBuf};

use serde::Serialize;
use tokio::sync::OnceCell;
use uuid::Uuid;

use crate::ValidationError;
use crate::validation::validate_local_file;

/// A local file queued for upload.
///
/// Size and path are captured once when the task is built; the mime type is
/// sniffed lazily on first use and cached.
#[derive(Debug, Clone)]
pub struct LocalFile {
    path: PathBuf,
    size_bytes: u64,
    mime_type: OnceCell<String>,
}

impl LocalFile {
    /// Builds a `LocalFile` from already-known metadata.
    pub fn new(path: impl Into<PathBuf>, size_bytes: u64) -> Self {
        Self {
            path: path.into(),
            size_bytes,
            mime_type: OnceCell::new(),
        }
    }

    /// Stats `path` and rejects anything that is not a regular file.
    pub fn from_path(path: impl AsRef<Path>) -> Result<Self, ValidationError> {
        let path = path.as_ref();
        let size = validate_local_file(path)?;
        Ok(Self::new(path, size))
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn size_bytes(&self) -> u64 {
        self.size_bytes
    }

    /// Final path component, used as the default remote name.
    pub fn file_name(&self) -> String {
        self.path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default()
    }

    /// Returns the cached mime type, awaiting `sniff` on first access only.
    pub async fn mime_type<F>(&self, sniff: F) -> &str
    where
        F: Future<Output = String>,
    {
        self.mime_type.get_or_init(|| sniff).await
    }
}

/// One user-triggered request to move a batch of local files to a remote target.
#[derive(Debug, Clone)]
pub struct UploadTask {
    id: Uuid,
    files: Vec<LocalFile>,
    destination_prefix: String,
}

impl UploadTask {
    /// Creates a task; fails if `files` is empty.
    pub fn new(
        files: Vec<LocalFile>,
        destination_prefix: impl Into<String>,
    ) -> Result<Self, ValidationError> {
        if files.is_empty() {
            return Err(ValidationError::EmptyTask);
        }
        Ok(Self {
            id: Uuid::new_v4(),
            files,
            destination_prefix: destination_prefix.into(),
        })
    }

    /// A task without files, used only to open and close a session when
    /// checking connection settings.
    pub fn connection_check(destination_prefix: impl Into<String>) -> Self {
        Self {
            id: Uuid::new_v4(),
            files: Vec::new(),
            destination_prefix: destination_prefix.into(),
        }
    }

    /// Stats every path and builds a task, rejecting directories up front.
    pub fn from_paths<P: AsRef<Path>>(
        paths: &[P],
        destination_prefix: impl Into<String>,
    ) -> Result<Self, ValidationError> {
        let files = paths
            .iter()
            .map(LocalFile::from_path)
            .collect::<Result<Vec<_>, _>>()?;
        Self::new(files, destination_prefix)
    }

    pub fn id(&self) -> Uuid {
        self.id
    }

    pub fn files(&self) -> &[LocalFile] {
        &self.files
    }

    pub fn destination_prefix(&self) -> &str {
        &self.destination_prefix
    }

    /// Sum of all file sizes.
    pub fn total_bytes(&self) -> u64 {
        self.files.iter().map(LocalFile::size_bytes).sum()
    }
}

/// Error classification surfaced to callers and the notifier.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    Connect,
    Transfer,
    Validation,
    Protocol,
    Cancelled,
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            ErrorKind::Connect => "connect error",
            ErrorKind::Transfer => "transfer error",
            ErrorKind::Validation => "validation error",
            ErrorKind::Protocol => "protocol error",
            ErrorKind::Cancelled => "cancelled",
        };
        f.write_str(s)
    }
}

/// Outcome of uploading one file of a batch.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum TransferResult {
    Success {
        local_path: String,
        remote_path: String,
        url: String,
        sha256: String,
    },
    Failure {
        local_path: String,
        kind: ErrorKind,
        message: String,
    },
}

impl TransferResult {
    pub fn is_success(&self) -> bool {
        matches!(self, TransferResult::Success { .. })
    }

    /// Public URL of a successful upload.
    pub fn url(&self) -> Option<&str> {
        match self {
            TransferResult::Success { url, .. } => Some(url),
            TransferResult::Failure { .. } => None,
        }
    }

    /// Failure classification, `None` on success.
    pub fn error_kind(&self) -> Option<ErrorKind> {
        match self {
            TransferResult::Success { .. } => None,
            TransferResult::Failure { kind, .. } => Some(*kind),
        }
    }

    pub fn local_path(&self) -> &str {
        match self {
            TransferResult::Success { local_path, .. }
            | TransferResult::Failure { local_path, .. } => local_path,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::cell::Cell;
    use tempfile::TempDir;

    #[test]
    fn empty_task_rejected() {
        let result = UploadTask::new(Vec::new(), "");
        assert!(matches!(result, Err(ValidationError::EmptyTask)));
    }

    #[test]
    fn connection_check_has_no_files() {
        let task = UploadTask::connection_check("uploads");
        assert!(task.files().is_empty());
        assert_eq!(task.total_bytes(), 0);
    }

    #[test]
    fn from_paths_captures_sizes() {
        let dir = TempDir::new().unwrap();
        let a = dir.path().join("a.txt");
        let b = dir.path().join("b.bin");
        std::fs::write(&a, b"hello").unwrap();
        std::fs::write(&b, b"").unwrap();

        let task = UploadTask::from_paths(&[&a, &b], "uploads").unwrap();
        assert_eq!(task.files().len(), 2);
        assert_eq!(task.files()[0].size_bytes(), 5);
        assert_eq!(task.files()[1].size_bytes(), 0);
        assert_eq!(task.total_bytes(), 5);
        assert_eq!(task.destination_prefix(), "uploads");
    }

    #[test]
    fn from_paths_rejects_directory() {
        let dir = TempDir::new().unwrap();
        let sub = dir.path().join("folder");
        std::fs::create_dir(&sub).unwrap();

        let result = UploadTask::from_paths(&[&sub], "");
        assert!(matches!(result, Err(ValidationError::Directory(_))));
    }

    #[test]
    fn tasks_get_distinct_ids() {
        let a = UploadTask::new(vec![LocalFile::new("a", 1)], "").unwrap();
        let b = UploadTask::new(vec![LocalFile::new("a", 1)], "").unwrap();
        assert_ne!(a.id(), b.id());
    }

    #[tokio::test]
    async fn mime_type_sniffed_once() {
        let file = LocalFile::new("/tmp/photo.jpg", 10);
        let calls = Cell::new(0);
        let sniff = async {
            calls.set(calls.get() + 1);
            "image/jpeg".to_string()
        };
        assert_eq!(file.mime_type(sniff).await, "image/jpeg");
        assert_eq!(
            file.mime_type(async { "other/type".to_string() }).await,
            "image/jpeg"
        );
        assert_eq!(calls.get(), 1);
    }

    #[test]
    fn file_name_is_basename() {
        let file = LocalFile::new("/some/dir/photo.jpg", 10);
        assert_eq!(file.file_name(), "photo.jpg");
    }

    #[test]
    fn transfer_result_accessors() {
        let ok = TransferResult::Success {
            local_path: "/a".into(),
            remote_path: "a".into(),
            url: "https://x/a".into(),
            sha256: String::new(),
        };
        let err = TransferResult::Failure {
            local_path: "/b".into(),
            kind: ErrorKind::Transfer,
            message: "boom".into(),
        };
        assert!(ok.is_success());
        assert_eq!(ok.url(), Some("https://x/a"));
        assert_eq!(err.error_kind(), Some(ErrorKind::Transfer));
        assert_eq!(err.local_path(), "/b");
    }

    #[test]
    fn transfer_result_serializes_tagged() {
        let err = TransferResult::Failure {
            local_path: "/b".into(),
            kind: ErrorKind::Protocol,
            message: "bad".into(),
        };
        let json = serde_json::to_value(&err).unwrap();
        assert_eq!(json["status"], "failure");
        assert_eq!(json["kind"], "protocol");
    }
}
