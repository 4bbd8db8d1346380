//! SFTP over SSH.
//!
//! Parts are appended in order to a freshly created remote file. There is
//! no part-level protocol, so a failed write cannot be retried; `abort`
//! removes the partial file.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chunkdrop_transfer::{
    ChannelError, ChannelSession, ConnectCause, FinalizeResult, NameProber, Part, PartAck,
    PartLimits, RemoteFile, TransferChannel, UploadTask, join_remote,
};
use russh::client;
use russh_sftp::client::SftpSession as RawSftp;
use russh_sftp::client::fs::File as RemoteHandle;
use serde::{Deserialize, Serialize};
use tokio::io::AsyncWriteExt;
use tracing::{debug, info, warn};

use crate::credentials::SshCredentials;

/// Configuration of an SFTP server.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SftpConfig {
    #[serde(default)]
    pub server: Option<String>,
    #[serde(default = "default_port")]
    pub port: u16,
    #[serde(default)]
    pub username: Option<String>,
    #[serde(default)]
    pub password: Option<String>,
    /// Directory uploads are placed in; the login directory when unset.
    #[serde(default)]
    pub remote_path: Option<String>,
    #[serde(default = "default_connect_timeout_secs")]
    pub connect_timeout_secs: u64,
}

fn default_port() -> u16 {
    22
}

fn default_connect_timeout_secs() -> u64 {
    30
}

impl SftpConfig {
    /// Credentials given inline, if server and username are present.
    pub fn credentials(&self) -> Option<SshCredentials> {
        Some(SshCredentials {
            server: self.server.clone()?,
            port: self.port,
            username: self.username.clone()?,
            password: self.password.clone().unwrap_or_default(),
        })
    }
}

/// Uploads to one SFTP server.
pub struct SftpChannel {
    config: SftpConfig,
    creds: SshCredentials,
}

impl SftpChannel {
    pub fn new(config: SftpConfig, creds: SshCredentials) -> Self {
        Self { config, creds }
    }
}

struct SshHandler;

#[async_trait]
impl client::Handler for SshHandler {
    type Error = russh::Error;

    async fn check_server_key(
        &mut self,
        _server_public_key: &russh_keys::key::PublicKey,
    ) -> Result<bool, Self::Error> {
        warn!("Host key verification not implemented, accepting key");
        Ok(true)
    }
}

fn sftp_error(e: russh_sftp::client::error::Error) -> ChannelError {
    ChannelError::terminal(e.to_string())
}

/// Maps a failure to reach the SSH server.
///
/// Only a failed lookup means the server does not exist; a refused or
/// dropped connection points at the network or the port.
fn map_ssh_connect_error(e: russh::Error) -> ChannelError {
    use std::io::ErrorKind as Io;

    debug!(error = %e, "SSH connect failed");
    match e {
        russh::Error::IO(io) => match io.kind() {
            Io::ConnectionRefused
            | Io::ConnectionReset
            | Io::ConnectionAborted
            | Io::NetworkUnreachable
            | Io::HostUnreachable => ChannelError::connect(
                ConnectCause::Network,
                "Check the server is set correctly and check your network connection.",
            ),
            Io::TimedOut => ChannelError::connect(ConnectCause::Timeout, "Connection timed out."),
            _ => ChannelError::connect(ConnectCause::NotFound, "Server not found."),
        },
        russh::Error::ConnectionTimeout => {
            ChannelError::connect(ConnectCause::Timeout, "Connection timed out.")
        }
        other => ChannelError::connect(
            ConnectCause::Network,
            format!("SSH handshake failed: {other}"),
        ),
    }
}

fn channel_setup_error(e: impl std::fmt::Display) -> ChannelError {
    ChannelError::connect(ConnectCause::Network, format!("SFTP setup failed: {e}"))
}

#[async_trait]
impl TransferChannel for SftpChannel {
    type Session = SftpSession;

    fn name(&self) -> &'static str {
        "sftp"
    }

    fn part_limits(&self) -> PartLimits {
        PartLimits::STREAM
    }

    async fn open(&self, _task: &UploadTask) -> Result<SftpSession, ChannelError> {
        let timeout = Duration::from_secs(self.config.connect_timeout_secs);
        let addr = (self.creds.server.as_str(), self.creds.port);
        info!(server = %self.creds.server, port = self.creds.port, "connecting via SSH");

        let ssh_config = Arc::new(client::Config {
            inactivity_timeout: Some(timeout),
            keepalive_interval: Some(Duration::from_secs(30)),
            keepalive_max: 3,
            ..Default::default()
        });

        let mut handle = tokio::time::timeout(timeout, client::connect(ssh_config, addr, SshHandler))
            .await
            .map_err(|_| ChannelError::connect(ConnectCause::Timeout, "Connection timed out."))?
            .map_err(map_ssh_connect_error)?;

        let authenticated = handle
            .authenticate_password(&self.creds.username, &self.creds.password)
            .await
            .map_err(channel_setup_error)?;
        if !authenticated {
            return Err(ChannelError::connect(
                ConnectCause::Credentials,
                "Username or password incorrect.",
            ));
        }

        let channel = handle
            .channel_open_session()
            .await
            .map_err(channel_setup_error)?;
        channel
            .request_subsystem(true, "sftp")
            .await
            .map_err(channel_setup_error)?;
        let sftp = RawSftp::new(channel.into_stream())
            .await
            .map_err(channel_setup_error)?;

        let root = match &self.config.remote_path {
            Some(dir) if !dir.is_empty() => dir.trim_end_matches('/').to_string(),
            _ => sftp.canonicalize(".").await.map_err(channel_setup_error)?,
        };
        debug!(root = %root, "SFTP session ready");

        Ok(SftpSession { handle, sftp, root })
    }
}

/// Open SSH connection with an SFTP subsystem.
pub struct SftpSession {
    handle: client::Handle<SshHandler>,
    sftp: RawSftp,
    root: String,
}

impl SftpSession {
    fn full_path(&self, remote_path: &str) -> String {
        join_remote(&self.root, remote_path)
    }

    /// Creates every missing parent directory of `remote_path`.
    async fn ensure_parents(&self, remote_path: &str) {
        let mut dir = self.root.clone();
        let Some((parents, _)) = remote_path.rsplit_once('/') else {
            return;
        };
        for component in parents.split('/').filter(|c| !c.is_empty()) {
            dir = join_remote(&dir, component);
            // Fails harmlessly when the directory already exists.
            let _ = self.sftp.create_dir(dir.clone()).await;
        }
    }
}

/// Remote file being written.
pub struct SftpUpload {
    file: RemoteHandle,
    path: String,
}

#[async_trait]
impl NameProber for SftpSession {
    async fn exists(&self, remote_path: &str) -> Result<bool, ChannelError> {
        self.sftp
            .try_exists(self.full_path(remote_path))
            .await
            .map_err(sftp_error)
    }
}

#[async_trait]
impl ChannelSession for SftpSession {
    type Upload = SftpUpload;

    async fn start_file(&mut self, file: &RemoteFile) -> Result<SftpUpload, ChannelError> {
        self.ensure_parents(&file.remote_path).await;

        let path = self.full_path(&file.remote_path);
        let handle = self.sftp.create(path.clone()).await.map_err(|e| match e {
            russh_sftp::client::error::Error::Status(status) => {
                ChannelError::Permission(format!("{}: {}", path, status.error_message))
            }
            other => sftp_error(other),
        })?;

        Ok(SftpUpload { file: handle, path })
    }

    async fn send_part(
        &mut self,
        upload: &mut SftpUpload,
        part: &Part,
    ) -> Result<PartAck, ChannelError> {
        upload
            .file
            .write_all(&part.data)
            .await
            .map_err(|e| ChannelError::terminal(e.to_string()))?;

        Ok(PartAck {
            index: part.index(),
            bytes: part.len() as u64,
            etag: None,
        })
    }

    async fn finalize(
        &mut self,
        upload: &mut SftpUpload,
        remote_name: &str,
    ) -> Result<FinalizeResult, ChannelError> {
        upload
            .file
            .shutdown()
            .await
            .map_err(|e| ChannelError::terminal(e.to_string()))?;

        debug!(path = %upload.path, "remote file closed");
        Ok(FinalizeResult {
            remote_path: remote_name.to_string(),
            url: None,
        })
    }

    async fn abort(&mut self, upload: SftpUpload) {
        let SftpUpload { file, path } = upload;
        drop(file);
        if let Err(e) = self.sftp.remove_file(path.clone()).await {
            warn!(path = %path, error = %e, "failed to remove partial file");
        }
    }

    async fn close(self) {
        if let Err(e) = self.sftp.close().await {
            debug!(error = %e, "SFTP close failed");
        }
        let _ = self
            .handle
            .disconnect(russh::Disconnect::ByApplication, "", "English")
            .await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config(json: &str) -> SftpConfig {
        serde_json::from_str(json).unwrap()
    }

    #[test]
    fn defaults() {
        let cfg = config("{}");
        assert_eq!(cfg.port, 22);
        assert_eq!(cfg.connect_timeout_secs, 30);
        assert!(cfg.credentials().is_none());
    }

    #[test]
    fn inline_credentials_allow_empty_password() {
        let cfg = config(r#"{"server":"files.example.com","port":2222,"username":"me"}"#);
        let creds = cfg.credentials().unwrap();
        assert_eq!(creds.port, 2222);
        assert_eq!(creds.password, "");
    }

    #[tokio::test]
    async fn unreachable_server_is_connect_error() {
        let cfg = SftpConfig {
            connect_timeout_secs: 2,
            ..config("{}")
        };
        let creds = SshCredentials {
            server: "127.0.0.1".into(),
            port: 9,
            username: "me".into(),
            password: "pw".into(),
        };
        let channel = SftpChannel::new(cfg, creds);
        let task = UploadTask::new(vec![chunkdrop_transfer::LocalFile::new("a", 1)], "").unwrap();
        let err = match channel.open(&task).await {
            Err(e) => e,
            Ok(_) => panic!("port 9 should refuse connections"),
        };
        assert_eq!(err.kind(), chunkdrop_transfer::ErrorKind::Connect);
        assert!(matches!(
            err,
            ChannelError::Connect {
                cause: ConnectCause::Network,
                ..
            }
        ));
    }

    fn cause(e: russh::Error) -> ConnectCause {
        match map_ssh_connect_error(e) {
            ChannelError::Connect { cause, .. } => cause,
            other => panic!("expected connect error, got {other:?}"),
        }
    }

    #[test]
    fn connect_errors_keep_their_cause() {
        let io = |kind: std::io::ErrorKind| russh::Error::IO(std::io::Error::from(kind));
        assert_eq!(cause(io(std::io::ErrorKind::ConnectionRefused)), ConnectCause::Network);
        assert_eq!(cause(io(std::io::ErrorKind::ConnectionReset)), ConnectCause::Network);
        assert_eq!(cause(io(std::io::ErrorKind::TimedOut)), ConnectCause::Timeout);
        assert_eq!(
            cause(russh::Error::IO(std::io::Error::other(
                "failed to lookup address information"
            ))),
            ConnectCause::NotFound
        );
        assert_eq!(cause(russh::Error::ConnectionTimeout), ConnectCause::Timeout);
        assert_eq!(cause(russh::Error::Disconnect), ConnectCause::Network);
    }
}
