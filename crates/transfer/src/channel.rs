//! Transfer channel contract.
//!
//! A [`TransferChannel`] knows how to reach one kind of remote (HTTP form
//! endpoint, S3 bucket, SFTP server). Opening it yields a session that is
//! owned exclusively by one upload task; the session starts one upload per
//! file, receives that file's parts in byte order, and either finalizes or
//! aborts it. Using traits keeps the orchestrator decoupled from transports
//! and testable with mocks.

use std::fmt;

use async_trait::async_trait;

use crate::chunked::Part;
use crate::plan::{PartLimits, PartPlan};
use crate::types::{ErrorKind, UploadTask};

/// Why a session could not be established.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectCause {
    /// Socket failure or unreachable endpoint.
    Network,
    Timeout,
    /// DNS lookup failed or the remote container does not exist.
    NotFound,
    /// Authentication or authorization rejected.
    Credentials,
}

impl fmt::Display for ConnectCause {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            ConnectCause::Network => "network",
            ConnectCause::Timeout => "timeout",
            ConnectCause::NotFound => "not found",
            ConnectCause::Credentials => "credentials",
        };
        f.write_str(s)
    }
}

/// Errors produced by transfer channels and name probers.
#[derive(Debug, thiserror::Error)]
pub enum ChannelError {
    #[error("{message}")]
    Connect { cause: ConnectCause, message: String },

    #[error("transfer failed: {message}")]
    Transfer { retryable: bool, message: String },

    #[error("permission denied: {0}")]
    Permission(String),

    #[error("unexpected response: {0}")]
    Protocol(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl ChannelError {
    pub fn connect(cause: ConnectCause, message: impl Into<String>) -> Self {
        ChannelError::Connect {
            cause,
            message: message.into(),
        }
    }

    /// A transient failure worth retrying.
    pub fn transient(message: impl Into<String>) -> Self {
        ChannelError::Transfer {
            retryable: true,
            message: message.into(),
        }
    }

    /// A mid-transfer failure that retrying cannot fix.
    pub fn terminal(message: impl Into<String>) -> Self {
        ChannelError::Transfer {
            retryable: false,
            message: message.into(),
        }
    }

    /// Maps onto the user-facing error taxonomy.
    pub fn kind(&self) -> ErrorKind {
        match self {
            ChannelError::Connect { .. } => ErrorKind::Connect,
            ChannelError::Transfer { .. } | ChannelError::Permission(_) | ChannelError::Io(_) => {
                ErrorKind::Transfer
            }
            ChannelError::Protocol(_) => ErrorKind::Protocol,
        }
    }

    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            ChannelError::Transfer {
                retryable: true,
                ..
            }
        )
    }

    /// Short title for an error dialog.
    pub fn title(&self) -> &'static str {
        match self {
            ChannelError::Connect {
                cause: ConnectCause::Credentials,
                ..
            } => "Authentication Failed",
            ChannelError::Connect { .. } => "Connection Failed",
            ChannelError::Permission(_) => "Access Denied",
            ChannelError::Protocol(_) => "Unexpected Server Response",
            ChannelError::Transfer { .. } | ChannelError::Io(_) => "Upload Failed",
        }
    }
}

/// Everything a session needs to know to start uploading one file.
#[derive(Debug, Clone)]
pub struct RemoteFile {
    /// Collision-free remote path, relative to the channel's root.
    pub remote_path: String,
    pub size_bytes: u64,
    pub mime_type: String,
    pub plan: PartPlan,
}

impl RemoteFile {
    /// Final component of the remote path.
    pub fn file_name(&self) -> &str {
        self.remote_path
            .rsplit('/')
            .next()
            .unwrap_or(&self.remote_path)
    }
}

/// Acknowledgement of one part.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PartAck {
    pub index: u64,
    pub bytes: u64,
    /// Transport-assigned part identifier (S3 ETag), if any.
    pub etag: Option<String>,
}

/// Where a finished file ended up.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FinalizeResult {
    pub remote_path: String,
    /// URL reported by the server, when the transport learns one.
    pub url: Option<String>,
}

/// Checks whether a remote path is already taken.
///
/// Used only for collision avoidance, never for content comparison.
#[async_trait]
pub trait NameProber: Send + Sync {
    async fn exists(&self, remote_path: &str) -> Result<bool, ChannelError>;
}

/// One transport a batch can be uploaded through.
#[async_trait]
pub trait TransferChannel: Send + Sync {
    type Session: ChannelSession;

    /// Transport name for logs.
    fn name(&self) -> &'static str;

    /// Part ceiling and floor this transport imposes.
    fn part_limits(&self) -> PartLimits;

    /// Establishes a session. Never retried internally.
    async fn open(&self, task: &UploadTask) -> Result<Self::Session, ChannelError>;
}

/// An open session, owned by exactly one upload task.
///
/// Sessions double as name probers for their own remote.
#[async_trait]
pub trait ChannelSession: NameProber + Send + Sync {
    type Upload: Send;

    /// Starts uploading one file (e.g. initiates an S3 multipart upload).
    async fn start_file(&mut self, file: &RemoteFile) -> Result<Self::Upload, ChannelError>;

    /// Sends one part. This is the only call that moves file bytes.
    async fn send_part(
        &mut self,
        upload: &mut Self::Upload,
        part: &Part,
    ) -> Result<PartAck, ChannelError>;

    /// Completes the file on the remote side.
    ///
    /// On failure the caller still owns `upload` and must abort it.
    async fn finalize(
        &mut self,
        upload: &mut Self::Upload,
        remote_name: &str,
    ) -> Result<FinalizeResult, ChannelError>;

    /// Best-effort cleanup of a half-finished upload.
    async fn abort(&mut self, upload: Self::Upload);

    /// Tears the session down.
    async fn close(self);
}
