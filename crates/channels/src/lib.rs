//! Transfer channels for chunked uploads.
//!
//! Each module implements [`TransferChannel`] for one kind of remote:
//!
//! - [`http`]: multipart form POST to an upload endpoint, streamed part by part.
//! - [`s3`]: S3 multipart upload; one request per part.
//! - [`sftp`]: SFTP over SSH; parts are appended to a remote file.
//!
//! [`AnyChannel`] wraps the three so a binary can pick one from config.

pub mod credentials;
pub mod http;
pub mod s3;
pub mod sftp;

use async_trait::async_trait;
use chunkdrop_transfer::{
    ChannelError, ChannelSession, FinalizeResult, NameProber, Part, PartAck, PartLimits,
    RemoteFile, TransferChannel, UploadTask,
};
use serde::{Deserialize, Serialize};

pub use credentials::{
    ApiKeyCredentials, CredentialChain, CredentialError, CredentialProvider, EnvCredentials,
    S3Credentials, SshCredentials, StaticCredentials,
};
pub use http::{HttpChannel, HttpConfig};
pub use s3::{S3Channel, S3Config};
pub use sftp::{SftpChannel, SftpConfig};

/// Transport selection as written in the config file.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "lowercase")]
pub enum TransportConfig {
    Http(HttpConfig),
    S3(S3Config),
    Sftp(SftpConfig),
}

impl TransportConfig {
    pub fn kind(&self) -> &'static str {
        match self {
            TransportConfig::Http(_) => "http",
            TransportConfig::S3(_) => "s3",
            TransportConfig::Sftp(_) => "sftp",
        }
    }

    /// Builds the configured channel, filling credentials from `creds`
    /// where the config leaves them out.
    pub fn build(&self, creds: &dyn CredentialProvider) -> Result<AnyChannel, BuildError> {
        let channel = match self {
            TransportConfig::Http(cfg) => {
                let key = match cfg.api_key.clone() {
                    Some(api_key) => Some(ApiKeyCredentials { api_key }),
                    None => creds.api_key().ok(),
                };
                AnyChannel::Http(HttpChannel::new(cfg.clone(), key)?)
            }
            TransportConfig::S3(cfg) => {
                let s3 = cfg.credentials().map_or_else(|| creds.s3(), Ok)?;
                AnyChannel::S3(S3Channel::new(cfg.clone(), s3)?)
            }
            TransportConfig::Sftp(cfg) => {
                let ssh = cfg.credentials().map_or_else(|| creds.ssh(), Ok)?;
                AnyChannel::Sftp(SftpChannel::new(cfg.clone(), ssh))
            }
        };
        Ok(channel)
    }
}

/// Errors raised while constructing a channel from config.
#[derive(Debug, thiserror::Error)]
pub enum BuildError {
    #[error(transparent)]
    Credentials(#[from] CredentialError),

    #[error("invalid {transport} configuration: {reason}")]
    Config {
        transport: &'static str,
        reason: String,
    },
}

/// One of the built-in channels.
pub enum AnyChannel {
    Http(HttpChannel),
    S3(S3Channel),
    Sftp(SftpChannel),
}

/// Session of an [`AnyChannel`].
pub enum AnySession {
    Http(http::HttpSession),
    S3(s3::S3Session),
    Sftp(sftp::SftpSession),
}

/// Per-file upload handle of an [`AnySession`].
pub enum AnyUpload {
    Http(http::HttpUpload),
    S3(s3::S3Upload),
    Sftp(sftp::SftpUpload),
}

fn mismatched() -> ChannelError {
    ChannelError::Protocol("upload handle does not belong to this session".into())
}

#[async_trait]
impl TransferChannel for AnyChannel {
    type Session = AnySession;

    fn name(&self) -> &'static str {
        match self {
            AnyChannel::Http(c) => c.name(),
            AnyChannel::S3(c) => c.name(),
            AnyChannel::Sftp(c) => c.name(),
        }
    }

    fn part_limits(&self) -> PartLimits {
        match self {
            AnyChannel::Http(c) => c.part_limits(),
            AnyChannel::S3(c) => c.part_limits(),
            AnyChannel::Sftp(c) => c.part_limits(),
        }
    }

    async fn open(&self, task: &UploadTask) -> Result<AnySession, ChannelError> {
        Ok(match self {
            AnyChannel::Http(c) => AnySession::Http(c.open(task).await?),
            AnyChannel::S3(c) => AnySession::S3(c.open(task).await?),
            AnyChannel::Sftp(c) => AnySession::Sftp(c.open(task).await?),
        })
    }
}

#[async_trait]
impl NameProber for AnySession {
    async fn exists(&self, remote_path: &str) -> Result<bool, ChannelError> {
        match self {
            AnySession::Http(s) => s.exists(remote_path).await,
            AnySession::S3(s) => s.exists(remote_path).await,
            AnySession::Sftp(s) => s.exists(remote_path).await,
        }
    }
}

#[async_trait]
impl ChannelSession for AnySession {
    type Upload = AnyUpload;

    async fn start_file(&mut self, file: &RemoteFile) -> Result<AnyUpload, ChannelError> {
        Ok(match self {
            AnySession::Http(s) => AnyUpload::Http(s.start_file(file).await?),
            AnySession::S3(s) => AnyUpload::S3(s.start_file(file).await?),
            AnySession::Sftp(s) => AnyUpload::Sftp(s.start_file(file).await?),
        })
    }

    async fn send_part(
        &mut self,
        upload: &mut AnyUpload,
        part: &Part,
    ) -> Result<PartAck, ChannelError> {
        match (self, upload) {
            (AnySession::Http(s), AnyUpload::Http(u)) => s.send_part(u, part).await,
            (AnySession::S3(s), AnyUpload::S3(u)) => s.send_part(u, part).await,
            (AnySession::Sftp(s), AnyUpload::Sftp(u)) => s.send_part(u, part).await,
            _ => Err(mismatched()),
        }
    }

    async fn finalize(
        &mut self,
        upload: &mut AnyUpload,
        remote_name: &str,
    ) -> Result<FinalizeResult, ChannelError> {
        match (self, upload) {
            (AnySession::Http(s), AnyUpload::Http(u)) => s.finalize(u, remote_name).await,
            (AnySession::S3(s), AnyUpload::S3(u)) => s.finalize(u, remote_name).await,
            (AnySession::Sftp(s), AnyUpload::Sftp(u)) => s.finalize(u, remote_name).await,
            _ => Err(mismatched()),
        }
    }

    async fn abort(&mut self, upload: AnyUpload) {
        match (self, upload) {
            (AnySession::Http(s), AnyUpload::Http(u)) => s.abort(u).await,
            (AnySession::S3(s), AnyUpload::S3(u)) => s.abort(u).await,
            (AnySession::Sftp(s), AnyUpload::Sftp(u)) => s.abort(u).await,
            _ => tracing::warn!("abort called with a handle from another session"),
        }
    }

    async fn close(self) {
        match self {
            AnySession::Http(s) => s.close().await,
            AnySession::S3(s) => s.close().await,
            AnySession::Sftp(s) => s.close().await,
        }
    }
}
