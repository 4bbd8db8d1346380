//! Mime type detection for uploaded files.

use std::ffi::OsStr;
use std::path::Path;

use async_trait::async_trait;
use tokio::process::Command;
use tracing::debug;

const FALLBACK_MIME: &str = "application/octet-stream";

/// Determines the mime type of a local file.
#[async_trait]
pub trait MimeSniffer: Send + Sync {
    async fn sniff(&self, path: &Path) -> String;
}

/// Maps well-known extensions to mime types.
#[derive(Debug, Clone, Copy, Default)]
pub struct ExtensionSniffer;

impl ExtensionSniffer {
    pub fn lookup(path: &Path) -> Option<&'static str> {
        let ext = path
            .extension()
            .and_then(|e| e.to_str())
            .map(|e| e.to_lowercase());

        let mime = match ext.as_deref()? {
            "png" => "image/png",
            "jpg" | "jpeg" => "image/jpeg",
            "gif" => "image/gif",
            "webp" => "image/webp",
            "bmp" => "image/bmp",
            "tif" | "tiff" => "image/tiff",
            "ico" => "image/x-icon",
            "svg" => "image/svg+xml",
            "pdf" => "application/pdf",
            "zip" => "application/zip",
            "gz" => "application/gzip",
            "json" => "application/json",
            "txt" | "log" => "text/plain",
            "html" | "htm" => "text/html",
            "css" => "text/css",
            "js" => "text/javascript",
            "mp3" => "audio/mpeg",
            "mp4" | "m4v" => "video/mp4",
            "mov" => "video/quicktime",
            _ => return None,
        };
        Some(mime)
    }
}

#[async_trait]
impl MimeSniffer for ExtensionSniffer {
    async fn sniff(&self, path: &Path) -> String {
        Self::lookup(path).unwrap_or(FALLBACK_MIME).to_string()
    }
}

/// Runs an external program and returns its standard output.
#[async_trait]
pub trait ProcessRunner: Send + Sync {
    async fn run(&self, program: &str, args: &[&OsStr]) -> std::io::Result<String>;
}

/// Runs programs with [`tokio::process::Command`].
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemRunner;

#[async_trait]
impl ProcessRunner for SystemRunner {
    async fn run(&self, program: &str, args: &[&OsStr]) -> std::io::Result<String> {
        let output = Command::new(program).args(args).output().await?;
        if !output.status.success() {
            return Err(std::io::Error::other(format!(
                "{program} exited with {}",
                output.status
            )));
        }
        Ok(String::from_utf8_lossy(&output.stdout).into_owned())
    }
}

/// Asks `file -b --mime-type`, falling back to the extension table.
#[derive(Debug, Clone, Default)]
pub struct FileCommandSniffer<R = SystemRunner> {
    runner: R,
}

impl FileCommandSniffer {
    pub fn new() -> Self {
        Self {
            runner: SystemRunner,
        }
    }
}

impl<R: ProcessRunner> FileCommandSniffer<R> {
    pub fn with_runner(runner: R) -> Self {
        Self { runner }
    }
}

#[async_trait]
impl<R: ProcessRunner> MimeSniffer for FileCommandSniffer<R> {
    async fn sniff(&self, path: &Path) -> String {
        let args = [OsStr::new("-b"), OsStr::new("--mime-type"), path.as_os_str()];
        match self.runner.run("file", &args).await {
            Ok(out) if out.trim().contains('/') => out.trim().to_string(),
            Ok(out) => {
                debug!(path = %path.display(), output = %out.trim(), "unusable file output");
                ExtensionSniffer.sniff(path).await
            }
            Err(e) => {
                debug!(path = %path.display(), error = %e, "file command failed");
                ExtensionSniffer.sniff(path).await
            }
        }
    }
}
