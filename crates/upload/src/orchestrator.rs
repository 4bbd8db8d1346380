//! Upload orchestrator.
//!
//! Drives one [`UploadTask`] through a [`TransferChannel`]: opens a session,
//! uploads files one after another part by part, folds progress into one
//! batch percentage and collects a result per file. A connect failure ends
//! the task; a failure on one file aborts only that file.

use std::path::Path;
use std::sync::Arc;

use chunkdrop_transfer::{
    ChannelError, ChannelSession, ErrorKind, FileDigest, LocalFile, NameProber, Part, PartAck,
    PartReader, ProgressAggregator, ProgressUpdate, RemoteFile, TransferChannel, TransferResult,
    UploadTask, ValidationError, join_remote, resolve_remote_name, validate_extension,
    validate_remote_name,
};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::error::UploadError;
use crate::mime::{ExtensionSniffer, MimeSniffer};
use crate::notifier::Notifier;
use crate::types::{BatchOutcome, BatchReport, BatchState, UploadOptions, public_url};

/// Why a single file did not make it.
enum FileFailure {
    Cancelled,
    Failed(ChannelError),
}

impl From<ChannelError> for FileFailure {
    fn from(e: ChannelError) -> Self {
        FileFailure::Failed(e)
    }
}

impl From<std::io::Error> for FileFailure {
    fn from(e: std::io::Error) -> Self {
        FileFailure::Failed(ChannelError::Io(e))
    }
}

/// A file that was uploaded and finalized.
struct FileDone {
    result: TransferResult,
    /// The URL came from the server rather than from the remote path.
    server_url: bool,
}

/// Uploads batches of files through one channel.
pub struct UploadOrchestrator<C: TransferChannel> {
    channel: C,
    notifier: Arc<dyn Notifier>,
    prober: Option<Arc<dyn NameProber>>,
    sniffer: Box<dyn MimeSniffer>,
    options: UploadOptions,
    cancel: CancellationToken,
    state: BatchState,
}

impl<C: TransferChannel> UploadOrchestrator<C> {
    /// Creates an orchestrator bound to `channel`.
    pub fn new(channel: C, notifier: Arc<dyn Notifier>, options: UploadOptions) -> Self {
        Self {
            channel,
            notifier,
            prober: None,
            sniffer: Box::new(ExtensionSniffer),
            options,
            cancel: CancellationToken::new(),
            state: BatchState::Pending,
        }
    }

    /// Probes names through `prober` instead of the channel session.
    pub fn with_prober(mut self, prober: Arc<dyn NameProber>) -> Self {
        self.prober = Some(prober);
        self
    }

    pub fn with_sniffer(mut self, sniffer: Box<dyn MimeSniffer>) -> Self {
        self.sniffer = sniffer;
        self
    }

    /// Uses an externally owned cancellation token.
    pub fn with_cancel_token(mut self, cancel: CancellationToken) -> Self {
        self.cancel = cancel;
        self
    }

    /// Returns a cancellation token for this orchestrator.
    ///
    /// Cancellation is observed between parts; the file in flight is
    /// aborted and the remaining files are reported as cancelled.
    pub fn cancel_token(&self) -> CancellationToken {
        self.cancel.clone()
    }

    pub fn state(&self) -> BatchState {
        self.state
    }

    pub fn channel(&self) -> &C {
        &self.channel
    }

    fn transition(&mut self, next: BatchState) {
        debug!(from = ?self.state, to = ?next, "batch state");
        self.state = next;
    }

    /// Reports a task-ending error once and returns it.
    fn fail(&mut self, err: UploadError) -> UploadError {
        let (title, message) = err.user_message();
        error!(kind = %err.kind(), "{message}");
        self.notifier.error(title, &message);
        let outcome = match err {
            UploadError::Cancelled => BatchOutcome::Cancelled,
            _ => BatchOutcome::Failed,
        };
        self.transition(BatchState::Done(outcome));
        err
    }

    /// Opens and closes a session to check connection settings.
    pub async fn test_connection(&mut self, destination_prefix: &str) -> Result<(), UploadError> {
        let task = UploadTask::connection_check(destination_prefix);
        self.transition(BatchState::Opening);
        self.notifier.begin("Testing connection...");
        self.notifier.set_determinate(false);

        match self.channel.open(&task).await {
            Ok(session) => {
                session.close().await;
                info!(channel = self.channel.name(), "connection test succeeded");
                self.notifier.finish("Connection Successful");
                self.transition(BatchState::Done(BatchOutcome::Succeeded));
                Ok(())
            }
            Err(e) => Err(self.fail(UploadError::Connect(e))),
        }
    }

    /// Builds a task from local paths and uploads it.
    ///
    /// Input rejected while building the task is reported through the
    /// notifier like any other validation failure.
    pub async fn run_paths<P: AsRef<Path>>(
        &mut self,
        paths: &[P],
        destination_prefix: impl Into<String>,
    ) -> Result<BatchReport, UploadError> {
        match UploadTask::from_paths(paths, destination_prefix) {
            Ok(task) => self.run(&task).await,
            Err(e) => Err(self.fail(e.into())),
        }
    }

    /// Uploads every file of `task` and reports the outcome.
    ///
    /// Returns `Err` only for failures that end the task before any file
    /// is attempted: invalid input, a failed connection, or cancellation
    /// while connecting. Everything else is in the report.
    pub async fn run(&mut self, task: &UploadTask) -> Result<BatchReport, UploadError> {
        let total = task.files().len();
        info!(
            task = %task.id(),
            files = total,
            bytes = task.total_bytes(),
            channel = self.channel.name(),
            "starting upload batch"
        );

        if let Err(e) = self.validate(task).await {
            return Err(self.fail(e.into()));
        }

        self.transition(BatchState::Opening);
        self.notifier.begin("Connecting...");
        self.notifier.set_determinate(false);

        let opened = tokio::select! {
            biased;
            _ = self.cancel.cancelled() => None,
            result = self.channel.open(task) => Some(result),
        };
        let mut session = match opened {
            None => return Err(self.fail(UploadError::Cancelled)),
            Some(Err(e)) => return Err(self.fail(UploadError::Connect(e))),
            Some(Ok(session)) => session,
        };

        let mut progress = ProgressAggregator::new(total);
        let mut results = Vec::with_capacity(total);
        let mut public_links = self.options.public_url_base.is_some();
        let mut cancelled = false;

        for (index, file) in task.files().iter().enumerate() {
            if cancelled || self.cancel.is_cancelled() {
                cancelled = true;
                results.push(cancelled_result(file));
                continue;
            }

            self.transition(BatchState::Uploading { file_index: index });
            let name = file.file_name();
            self.notifier.begin(&format!("Uploading {name}..."));

            match self
                .upload_file(&mut session, task, index, file, &mut progress)
                .await
            {
                Ok(done) => {
                    public_links |= done.server_url;
                    results.push(done.result);
                }
                Err(FileFailure::Cancelled) => {
                    info!(file = %name, "upload cancelled");
                    cancelled = true;
                    results.push(cancelled_result(file));
                }
                Err(FileFailure::Failed(e)) => {
                    warn!(file = %name, kind = %e.kind(), error = %e, "file upload failed");
                    self.notifier.error(e.title(), &format!("{name}: {e}"));
                    results.push(TransferResult::Failure {
                        local_path: file.path().display().to_string(),
                        kind: e.kind(),
                        message: e.to_string(),
                    });
                }
            }
        }

        self.transition(BatchState::Finalizing);
        session.close().await;

        let report = BatchReport::new(task.id(), results, cancelled, public_links);
        if report.outcome == BatchOutcome::Cancelled {
            self.notifier.error("Upload Cancelled", &report.summary);
        } else {
            self.notifier.finish(&report.summary);
        }
        info!(task = %task.id(), outcome = ?report.outcome, "{}", report.summary);

        self.transition(BatchState::Done(report.outcome));
        Ok(report)
    }

    /// Checks every file before anything touches the network.
    ///
    /// A path that cannot be stat'ed is left to fail on its own when read.
    async fn validate(&self, task: &UploadTask) -> Result<(), ValidationError> {
        if task.files().is_empty() {
            return Err(ValidationError::EmptyTask);
        }
        for file in task.files() {
            let is_dir = tokio::fs::metadata(file.path())
                .await
                .is_ok_and(|m| m.is_dir());
            if is_dir {
                return Err(ValidationError::Directory(file.path().display().to_string()));
            }
            validate_extension(file.path(), &self.options.allowed_extensions)?;
            validate_remote_name(&join_remote(task.destination_prefix(), &file.file_name()))?;
        }
        Ok(())
    }

    async fn upload_file(
        &self,
        session: &mut C::Session,
        task: &UploadTask,
        index: usize,
        file: &LocalFile,
        progress: &mut ProgressAggregator,
    ) -> Result<FileDone, FileFailure> {
        let requested = join_remote(task.destination_prefix(), &file.file_name());
        let remote_path = match &self.prober {
            Some(prober) => resolve_remote_name(prober.as_ref(), &requested).await?,
            None => resolve_remote_name(&*session, &requested).await?,
        };

        let plan = self.channel.part_limits().plan(file.size_bytes());
        let remote = RemoteFile {
            remote_path: remote_path.clone(),
            size_bytes: file.size_bytes(),
            mime_type: file
                .mime_type(self.sniffer.sniff(file.path()))
                .await
                .to_string(),
            plan,
        };
        debug!(
            file = %file.path().display(),
            remote = %remote_path,
            part_size = plan.part_size_bytes,
            parts = plan.num_parts,
            "planned upload"
        );

        // Opened before the remote side so a missing file needs no abort.
        let mut reader = PartReader::open(file.path(), plan).await?;
        let mut upload = session.start_file(&remote).await?;

        let sha256 = match self
            .send_parts(session, &mut upload, &mut reader, index, file.size_bytes(), progress)
            .await
        {
            Ok(sha256) => sha256,
            Err(failure) => {
                session.abort(upload).await;
                return Err(failure);
            }
        };

        let finalized = match session.finalize(&mut upload, &remote_path).await {
            Ok(finalized) => finalized,
            Err(e) => {
                session.abort(upload).await;
                return Err(e.into());
            }
        };

        let server_url = finalized.url.is_some();
        let url = match (finalized.url, &self.options.public_url_base) {
            (Some(url), _) => url,
            (None, Some(base)) => public_url(base, &finalized.remote_path),
            (None, None) => finalized.remote_path.clone(),
        };
        info!(file = %file.file_name(), remote = %finalized.remote_path, %url, "file uploaded");

        Ok(FileDone {
            result: TransferResult::Success {
                local_path: file.path().display().to_string(),
                remote_path: finalized.remote_path,
                url,
                sha256,
            },
            server_url,
        })
    }

    /// Sends every part of one file and returns the file's SHA-256.
    async fn send_parts(
        &self,
        session: &mut C::Session,
        upload: &mut <C::Session as ChannelSession>::Upload,
        reader: &mut PartReader,
        index: usize,
        size_bytes: u64,
        progress: &mut ProgressAggregator,
    ) -> Result<String, FileFailure> {
        let mut digest = FileDigest::new();
        let mut sent = 0u64;

        loop {
            if self.cancel.is_cancelled() {
                return Err(FileFailure::Cancelled);
            }
            let Some(part) = reader.next_part().await? else {
                break;
            };

            let ack = self.send_with_retry(session, upload, &part).await?;
            debug!(file = index, part = ack.index, bytes = ack.bytes, "part sent");

            digest.update(&part.data);
            sent += part.len() as u64;
            for update in progress.on_file_percent(index, file_percent(sent, size_bytes)) {
                self.apply(update);
            }
        }

        Ok(digest.finish())
    }

    async fn send_with_retry(
        &self,
        session: &mut C::Session,
        upload: &mut <C::Session as ChannelSession>::Upload,
        part: &Part,
    ) -> Result<PartAck, FileFailure> {
        let retry = self.options.retry;
        let mut attempt = 0;
        loop {
            match session.send_part(upload, part).await {
                Ok(ack) => return Ok(ack),
                Err(e) if retry.should_retry(attempt, &e) => {
                    let delay = retry.delay(attempt);
                    warn!(part = part.index(), attempt = attempt + 1, ?delay, error = %e, "retrying part");
                    tokio::select! {
                        _ = self.cancel.cancelled() => return Err(FileFailure::Cancelled),
                        _ = tokio::time::sleep(delay) => {}
                    }
                    attempt += 1;
                }
                Err(e) => return Err(e.into()),
            }
        }
    }

    fn apply(&self, update: ProgressUpdate) {
        match update {
            ProgressUpdate::Percent(p) => self.notifier.percent(p),
            ProgressUpdate::SetDeterminate(d) => self.notifier.set_determinate(d),
        }
    }
}

fn cancelled_result(file: &LocalFile) -> TransferResult {
    TransferResult::Failure {
        local_path: file.path().display().to_string(),
        kind: ErrorKind::Cancelled,
        message: "cancelled".into(),
    }
}

/// Percentage of a file sent so far. Empty files are complete after
/// their single empty part.
fn file_percent(sent: u64, size: u64) -> u8 {
    if size == 0 || sent >= size {
        return 100;
    }
    (u128::from(sent) * 100 / u128::from(size)) as u8
}
