//! Data types for upload batches.

use percent_encoding::{AsciiSet, NON_ALPHANUMERIC, utf8_percent_encode};
use serde::Serialize;
use uuid::Uuid;

use chunkdrop_transfer::TransferResult;

use crate::retry::RetryPolicy;

/// Per-task options the orchestrator is built with.
#[derive(Debug, Clone, Default)]
pub struct UploadOptions {
    /// Prepended to remote paths to form public URLs.
    pub public_url_base: Option<String>,
    /// Allowed file extensions, case-insensitive. Empty allows everything.
    pub allowed_extensions: Vec<String>,
    pub retry: RetryPolicy,
}

/// Characters left as-is in a URL path segment.
const PATH_SEGMENT: &AsciiSet = &NON_ALPHANUMERIC
    .remove(b'-')
    .remove(b'.')
    .remove(b'_')
    .remove(b'~');

/// Builds the public URL of `remote_path` under `base`.
///
/// Each path segment is percent-encoded; `base` is used verbatim.
pub fn public_url(base: &str, remote_path: &str) -> String {
    let encoded = remote_path
        .split('/')
        .map(|segment| utf8_percent_encode(segment, PATH_SEGMENT).to_string())
        .collect::<Vec<_>>()
        .join("/");
    if base.ends_with('/') {
        format!("{base}{encoded}")
    } else {
        format!("{base}/{encoded}")
    }
}

/// Where an orchestrator is in its lifecycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BatchState {
    Pending,
    Opening,
    Uploading { file_index: usize },
    Finalizing,
    Done(BatchOutcome),
}

/// Final outcome of a batch.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum BatchOutcome {
    Succeeded,
    PartiallyFailed,
    Failed,
    Cancelled,
}

/// Everything a caller needs after a batch finished.
#[derive(Debug, Clone, Serialize)]
pub struct BatchReport {
    pub task_id: Uuid,
    pub outcome: BatchOutcome,
    /// One entry per input file, in input order.
    pub results: Vec<TransferResult>,
    /// Set only for a single-file batch that succeeded.
    pub primary_url: Option<String>,
    /// URLs of every successful file, in input order.
    pub urls: Vec<String>,
    pub summary: String,
    pub fully_succeeded: bool,
}

impl BatchReport {
    /// Builds the report for `results`.
    ///
    /// `public_links` selects the clipboard-style summary wording used when
    /// the URLs are meant to be shared.
    pub fn new(
        task_id: Uuid,
        results: Vec<TransferResult>,
        cancelled: bool,
        public_links: bool,
    ) -> Self {
        let total = results.len();
        let urls: Vec<String> = results
            .iter()
            .filter_map(|r| r.url().map(str::to_string))
            .collect();
        let succeeded = urls.len();
        let failed = total - succeeded;

        let outcome = if cancelled {
            BatchOutcome::Cancelled
        } else if failed == 0 {
            BatchOutcome::Succeeded
        } else if succeeded == 0 {
            BatchOutcome::Failed
        } else {
            BatchOutcome::PartiallyFailed
        };

        let summary = match outcome {
            BatchOutcome::Succeeded if public_links && total == 1 => {
                "URL is now on clipboard".to_string()
            }
            BatchOutcome::Succeeded if public_links => "URLs are now on clipboard".to_string(),
            BatchOutcome::Succeeded => "Upload Complete".to_string(),
            BatchOutcome::PartiallyFailed => format!("{succeeded} succeeded, {failed} failed"),
            BatchOutcome::Failed if total == 1 => "Upload Failed".to_string(),
            BatchOutcome::Failed => format!("All {total} uploads failed"),
            BatchOutcome::Cancelled => {
                format!("Upload cancelled ({succeeded} of {total} completed)")
            }
        };

        let primary_url = if total == 1 && outcome == BatchOutcome::Succeeded {
            urls.first().cloned()
        } else {
            None
        };

        Self {
            task_id,
            outcome,
            results,
            primary_url,
            urls,
            summary,
            fully_succeeded: outcome == BatchOutcome::Succeeded,
        }
    }

    /// Text for the clipboard: the primary URL, or one URL per line.
    pub fn clipboard_text(&self) -> Option<String> {
        if let Some(url) = &self.primary_url {
            return Some(url.clone());
        }
        if self.urls.is_empty() {
            None
        } else {
            Some(self.urls.join("\n"))
        }
    }
}
