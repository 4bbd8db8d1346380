//! CLI configuration management.
//!
//! Reads/writes TOML at `~/.config/chunkdrop/config.toml` unless a path is
//! given on the command line.

use std::path::{Path, PathBuf};

use anyhow::Context;
use chunkdrop_channels::TransportConfig;
use chunkdrop_upload::{RetryPolicy, UploadOptions};
use serde::{Deserialize, Serialize};

/// On-disk config format.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct CliConfig {
    /// Prepended to remote paths to form public URLs.
    pub public_url_base: Option<String>,
    pub destination_prefix: String,
    pub allowed_extensions: Vec<String>,
    pub retry: RetryPolicy,
    pub transport: Option<TransportConfig>,
}

impl CliConfig {
    /// Loads configuration from `path`, writing defaults there if the file
    /// does not exist yet.
    pub fn load(path: &Path) -> anyhow::Result<Self> {
        if !path.exists() {
            let config = CliConfig::default();
            config.save(path)?;
            tracing::info!(path = %path.display(), "wrote default configuration");
            return Ok(config);
        }

        let content = std::fs::read_to_string(path)
            .with_context(|| format!("failed to read {}", path.display()))?;
        toml::from_str(&content).with_context(|| format!("failed to parse {}", path.display()))
    }

    /// Saves configuration to `path`.
    pub fn save(&self, path: &Path) -> anyhow::Result<()> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }

        let content = toml::to_string_pretty(self)?;
        std::fs::write(path, content)?;
        set_permissions_0600(path);

        tracing::debug!(path = %path.display(), "configuration saved");
        Ok(())
    }

    /// The configured transport, or an error pointing at the config file.
    pub fn transport(&self, path: &Path) -> anyhow::Result<&TransportConfig> {
        self.transport.as_ref().with_context(|| {
            format!(
                "no [transport] configured; add one to {} (kind = \"s3\", \"sftp\" or \"http\")",
                path.display()
            )
        })
    }

    pub fn upload_options(&self) -> UploadOptions {
        UploadOptions {
            public_url_base: self.public_url_base.clone().filter(|b| !b.is_empty()),
            allowed_extensions: self.allowed_extensions.clone(),
            retry: self.retry,
        }
    }
}

fn set_permissions_0600(path: &Path) {
    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        let _ = std::fs::set_permissions(path, std::fs::Permissions::from_mode(0o600));
    }
    #[cfg(not(unix))]
    {
        let _ = path;
    }
}

/// Default location of the config file.
pub fn default_config_path() -> PathBuf {
    config_base_dir().join("chunkdrop").join("config.toml")
}

fn config_base_dir() -> PathBuf {
    #[cfg(target_os = "windows")]
    {
        let appdata =
            std::env::var("APPDATA").unwrap_or_else(|_| "C:\\Users\\Default\\AppData".into());
        PathBuf::from(appdata)
    }

    #[cfg(not(target_os = "windows"))]
    {
        match std::env::var("XDG_CONFIG_HOME") {
            Ok(dir) if !dir.is_empty() => PathBuf::from(dir),
            _ => {
                let home = std::env::var("HOME").unwrap_or_else(|_| "/tmp".into());
                PathBuf::from(home).join(".config")
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn missing_file_writes_defaults() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("nested").join("config.toml");

        let config = CliConfig::load(&path).unwrap();

        assert!(path.exists());
        assert!(config.transport.is_none());
        assert_eq!(config.retry, RetryPolicy::default());

        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            let mode = std::fs::metadata(&path).unwrap().permissions().mode();
            assert_eq!(mode & 0o777, 0o600);
        }
    }

    #[test]
    fn parses_s3_transport() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("config.toml");
        std::fs::write(
            &path,
            r#"
public_url_base = "https://cdn.example.com/"
destination_prefix = "uploads"
allowed_extensions = ["jpg", "png"]

[retry]
max_retries = 2

[transport]
kind = "s3"
endpoint = "s3.eu-central-003.backblazeb2.com"
bucket_name = "Photos"
"#,
        )
        .unwrap();

        let config = CliConfig::load(&path).unwrap();

        assert_eq!(config.destination_prefix, "uploads");
        assert_eq!(config.retry.max_retries, 2);
        assert_eq!(config.retry.backoff_ms, 500);
        let TransportConfig::S3(s3) = config.transport(&path).unwrap() else {
            panic!("expected s3 transport");
        };
        assert_eq!(s3.region, "us-east-1");
        assert!(!s3.create_bucket_if_missing);
        assert!(!s3.public_read);
        assert_eq!(
            config.upload_options().public_url_base.as_deref(),
            Some("https://cdn.example.com/")
        );
    }

    #[test]
    fn saved_transport_reloads() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("config.toml");
        std::fs::write(
            &path,
            "[transport]\nkind = \"sftp\"\nserver = \"files.example.com\"\nusername = \"me\"\n",
        )
        .unwrap();

        let config = CliConfig::load(&path).unwrap();
        config.save(&path).unwrap();
        let reloaded = CliConfig::load(&path).unwrap();

        let Some(TransportConfig::Sftp(sftp)) = reloaded.transport else {
            panic!("expected sftp transport");
        };
        assert_eq!(sftp.server.as_deref(), Some("files.example.com"));
        assert_eq!(sftp.port, 22);
    }

    #[test]
    fn missing_transport_names_the_file() {
        let config = CliConfig::default();
        let err = config.transport(Path::new("/etc/chunkdrop.toml")).unwrap_err();
        assert!(err.to_string().contains("/etc/chunkdrop.toml"));
    }

    #[test]
    fn empty_url_base_is_ignored() {
        let config = CliConfig {
            public_url_base: Some(String::new()),
            ..Default::default()
        };
        assert!(config.upload_options().public_url_base.is_none());
    }
}
