//! Credential material per transport.
//!
//! Channels treat credentials as opaque configuration handed over at
//! construction. Providers look them up from explicit config or from the
//! process environment, using the same variable names the desktop upload
//! actions read.

use std::fmt;

use serde::Deserialize;

/// Errors produced while looking up credentials.
#[derive(Debug, thiserror::Error)]
pub enum CredentialError {
    #[error("missing credential: {0}")]
    Missing(&'static str),

    #[error("invalid credential {field}: {reason}")]
    Invalid { field: &'static str, reason: String },
}

/// Login for SSH-family transports.
#[derive(Clone, Deserialize)]
pub struct SshCredentials {
    pub server: String,
    #[serde(default = "default_ssh_port")]
    pub port: u16,
    pub username: String,
    pub password: String,
}

fn default_ssh_port() -> u16 {
    22
}

impl fmt::Debug for SshCredentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SshCredentials")
            .field("server", &self.server)
            .field("port", &self.port)
            .field("username", &self.username)
            .field("password", &"<redacted>")
            .finish()
    }
}

/// Keys for S3-style object stores.
#[derive(Clone, Deserialize)]
pub struct S3Credentials {
    pub access_key: String,
    pub secret_key: String,
    pub bucket_name: String,
}

impl fmt::Debug for S3Credentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("S3Credentials")
            .field("access_key", &self.access_key)
            .field("secret_key", &"<redacted>")
            .field("bucket_name", &self.bucket_name)
            .finish()
    }
}

/// Bearer token for simple HTTP upload endpoints.
#[derive(Clone, Deserialize)]
pub struct ApiKeyCredentials {
    pub api_key: String,
}

impl fmt::Debug for ApiKeyCredentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ApiKeyCredentials")
            .field("api_key", &"<redacted>")
            .finish()
    }
}

/// Supplies credential material for a task. Read-only; may be shared.
pub trait CredentialProvider: Send + Sync {
    fn ssh(&self) -> Result<SshCredentials, CredentialError>;
    fn s3(&self) -> Result<S3Credentials, CredentialError>;
    fn api_key(&self) -> Result<ApiKeyCredentials, CredentialError>;
}

/// Credentials given explicitly, e.g. from a config file.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct StaticCredentials {
    #[serde(default)]
    pub ssh: Option<SshCredentials>,
    #[serde(default)]
    pub s3: Option<S3Credentials>,
    #[serde(default)]
    pub http: Option<ApiKeyCredentials>,
}

impl CredentialProvider for StaticCredentials {
    fn ssh(&self) -> Result<SshCredentials, CredentialError> {
        self.ssh.clone().ok_or(CredentialError::Missing("ssh"))
    }

    fn s3(&self) -> Result<S3Credentials, CredentialError> {
        self.s3.clone().ok_or(CredentialError::Missing("s3"))
    }

    fn api_key(&self) -> Result<ApiKeyCredentials, CredentialError> {
        self.http.clone().ok_or(CredentialError::Missing("api_key"))
    }
}

type Lookup = Box<dyn Fn(&str) -> Option<String> + Send + Sync>;

/// Credentials read from environment variables.
///
/// Variables: `server`, `port`, `username`, `password`, `access_key_id`,
/// `access_secret`, `bucket_name`, `api_key`.
pub struct EnvCredentials {
    lookup: Lookup,
}

impl Default for EnvCredentials {
    fn default() -> Self {
        Self::new()
    }
}

impl EnvCredentials {
    /// Reads from the process environment.
    pub fn new() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Reads through a custom lookup function.
    pub fn from_lookup<F>(lookup: F) -> Self
    where
        F: Fn(&str) -> Option<String> + Send + Sync + 'static,
    {
        Self {
            lookup: Box::new(lookup),
        }
    }

    fn require(&self, key: &'static str) -> Result<String, CredentialError> {
        (self.lookup)(key)
            .filter(|v| !v.is_empty())
            .ok_or(CredentialError::Missing(key))
    }
}

impl CredentialProvider for EnvCredentials {
    fn ssh(&self) -> Result<SshCredentials, CredentialError> {
        let port = match (self.lookup)("port").filter(|p| !p.is_empty()) {
            Some(p) => p.parse().map_err(|e: std::num::ParseIntError| CredentialError::Invalid {
                field: "port",
                reason: e.to_string(),
            })?,
            None => default_ssh_port(),
        };
        Ok(SshCredentials {
            server: self.require("server")?,
            port,
            username: self.require("username")?,
            password: (self.lookup)("password").unwrap_or_default(),
        })
    }

    fn s3(&self) -> Result<S3Credentials, CredentialError> {
        Ok(S3Credentials {
            access_key: self.require("access_key_id")?,
            secret_key: self.require("access_secret")?,
            bucket_name: self.require("bucket_name")?.to_lowercase(),
        })
    }

    fn api_key(&self) -> Result<ApiKeyCredentials, CredentialError> {
        Ok(ApiKeyCredentials {
            api_key: self.require("api_key")?,
        })
    }
}

/// Tries `primary` first and falls back to `fallback` for missing entries.
pub struct CredentialChain<P, F> {
    primary: P,
    fallback: F,
}

impl<P, F> CredentialChain<P, F> {
    pub fn new(primary: P, fallback: F) -> Self {
        Self { primary, fallback }
    }
}

impl<P, F> CredentialProvider for CredentialChain<P, F>
where
    P: CredentialProvider,
    F: CredentialProvider,
{
    fn ssh(&self) -> Result<SshCredentials, CredentialError> {
        match self.primary.ssh() {
            Err(CredentialError::Missing(_)) => self.fallback.ssh(),
            other => other,
        }
    }

    fn s3(&self) -> Result<S3Credentials, CredentialError> {
        match self.primary.s3() {
            Err(CredentialError::Missing(_)) => self.fallback.s3(),
            other => other,
        }
    }

    fn api_key(&self) -> Result<ApiKeyCredentials, CredentialError> {
        match self.primary.api_key() {
            Err(CredentialError::Missing(_)) => self.fallback.api_key(),
            other => other,
        }
    }
}
