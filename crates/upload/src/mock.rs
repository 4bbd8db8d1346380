//! Test doubles for driving the orchestrator without a network.
//!
//! Enabled for this crate's tests and, through the `test-util` feature,
//! for other crates' tests.

use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex, MutexGuard};

use async_trait::async_trait;
use chunkdrop_transfer::{
    ChannelError, ChannelSession, ConnectCause, FinalizeResult, NameProber, Part, PartAck,
    PartLimits, RemoteFile, TransferChannel, UploadTask,
};
use tokio_util::sync::CancellationToken;

use crate::notifier::{Notifier, UploadEvent};

fn lock<T>(m: &Mutex<T>) -> MutexGuard<'_, T> {
    m.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

/// Failure a scripted part send produces.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MockFailure {
    Transient,
    Terminal,
    Permission,
}

impl MockFailure {
    fn to_error(self, file: usize, part: u64) -> ChannelError {
        let message = format!("scripted failure for file {file} part {part}");
        match self {
            MockFailure::Transient => ChannelError::transient(message),
            MockFailure::Terminal => ChannelError::terminal(message),
            MockFailure::Permission => ChannelError::Permission(message),
        }
    }
}

/// A part the mock received.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SentPart {
    /// Ordinal of the file within the session (order of `start_file` calls).
    pub file: usize,
    pub index: u64,
    pub len: usize,
}

#[derive(Default)]
struct Script {
    connect_error: Option<(ConnectCause, String)>,
    /// Remaining failures per (file, part).
    part_failures: HashMap<(usize, u64), (MockFailure, u32)>,
    start_failures: HashSet<usize>,
    finalize_failures: HashSet<usize>,
    existing: HashSet<String>,
    server_url_base: Option<String>,
    cancel_after: Option<(usize, u64, CancellationToken)>,
}

#[derive(Default)]
struct Log {
    opens: u32,
    closes: u32,
    started: Vec<String>,
    send_calls: u32,
    parts: Vec<SentPart>,
    aborted: Vec<usize>,
    finalized: Vec<String>,
    contents: HashMap<String, Vec<u8>>,
    probes: Vec<String>,
}

struct MockState {
    limits: PartLimits,
    script: Mutex<Script>,
    log: Mutex<Log>,
}

/// Scriptable in-memory [`TransferChannel`].
///
/// Clones share state, so a test can keep one clone to inspect what the
/// orchestrator did with the other.
#[derive(Clone)]
pub struct MockChannel {
    state: Arc<MockState>,
}

impl Default for MockChannel {
    fn default() -> Self {
        Self::new()
    }
}

impl MockChannel {
    /// A channel with 4-byte parts and a 10 000 part ceiling.
    pub fn new() -> Self {
        Self::with_limits(PartLimits {
            max_parts: 10_000,
            min_part_size: 4,
        })
    }

    pub fn with_limits(limits: PartLimits) -> Self {
        Self {
            state: Arc::new(MockState {
                limits,
                script: Mutex::new(Script::default()),
                log: Mutex::new(Log::default()),
            }),
        }
    }

    /// Makes `open` fail.
    pub fn fail_connect(self, cause: ConnectCause, message: &str) -> Self {
        lock(&self.state.script).connect_error = Some((cause, message.to_string()));
        self
    }

    /// Makes `send_part` fail `times` times for part `part` of file `file`.
    pub fn fail_part(self, file: usize, part: u64, failure: MockFailure, times: u32) -> Self {
        lock(&self.state.script)
            .part_failures
            .insert((file, part), (failure, times));
        self
    }

    /// Makes `start_file` fail for file `file`.
    pub fn fail_start(self, file: usize) -> Self {
        lock(&self.state.script).start_failures.insert(file);
        self
    }

    /// Makes `finalize` fail with a protocol error for file `file`.
    pub fn fail_finalize(self, file: usize) -> Self {
        lock(&self.state.script).finalize_failures.insert(file);
        self
    }

    /// Remote paths that already exist.
    pub fn with_existing(self, paths: &[&str]) -> Self {
        lock(&self.state.script)
            .existing
            .extend(paths.iter().map(|p| p.to_string()));
        self
    }

    /// Has `finalize` report `base` + remote path as a server-assigned URL.
    pub fn with_server_urls(self, base: &str) -> Self {
        lock(&self.state.script).server_url_base = Some(base.to_string());
        self
    }

    /// Cancels `token` right after part `part` of file `file` was accepted.
    pub fn cancel_after_part(self, file: usize, part: u64, token: CancellationToken) -> Self {
        lock(&self.state.script).cancel_after = Some((file, part, token));
        self
    }

    pub fn open_count(&self) -> u32 {
        lock(&self.state.log).opens
    }

    pub fn close_count(&self) -> u32 {
        lock(&self.state.log).closes
    }

    /// Remote paths passed to `start_file`, in order.
    pub fn started(&self) -> Vec<String> {
        lock(&self.state.log).started.clone()
    }

    /// Number of `send_part` calls, including failed ones.
    pub fn send_part_calls(&self) -> u32 {
        lock(&self.state.log).send_calls
    }

    /// Parts that were accepted, in order.
    pub fn sent_parts(&self) -> Vec<SentPart> {
        lock(&self.state.log).parts.clone()
    }

    /// File ordinals `abort` was called for, in order.
    pub fn aborted(&self) -> Vec<usize> {
        lock(&self.state.log).aborted.clone()
    }

    /// Remote names passed to successful `finalize` calls.
    pub fn finalized(&self) -> Vec<String> {
        lock(&self.state.log).finalized.clone()
    }

    /// Bytes stored under `remote_path` by a successful finalize.
    pub fn content(&self, remote_path: &str) -> Option<Vec<u8>> {
        lock(&self.state.log).contents.get(remote_path).cloned()
    }

    /// Paths probed through the session.
    pub fn probes(&self) -> Vec<String> {
        lock(&self.state.log).probes.clone()
    }
}

#[async_trait]
impl TransferChannel for MockChannel {
    type Session = MockSession;

    fn name(&self) -> &'static str {
        "mock"
    }

    fn part_limits(&self) -> PartLimits {
        self.state.limits
    }

    async fn open(&self, _task: &UploadTask) -> Result<MockSession, ChannelError> {
        if let Some((cause, message)) = lock(&self.state.script).connect_error.clone() {
            return Err(ChannelError::connect(cause, message));
        }
        lock(&self.state.log).opens += 1;
        Ok(MockSession {
            state: Arc::clone(&self.state),
            next_file: 0,
        })
    }
}

/// Session of a [`MockChannel`].
pub struct MockSession {
    state: Arc<MockState>,
    next_file: usize,
}

/// Per-file handle of a [`MockSession`].
pub struct MockUpload {
    file: usize,
    remote_path: String,
    data: Vec<u8>,
}

#[async_trait]
impl NameProber for MockSession {
    async fn exists(&self, remote_path: &str) -> Result<bool, ChannelError> {
        lock(&self.state.log).probes.push(remote_path.to_string());
        Ok(lock(&self.state.script).existing.contains(remote_path))
    }
}

#[async_trait]
impl ChannelSession for MockSession {
    type Upload = MockUpload;

    async fn start_file(&mut self, file: &RemoteFile) -> Result<MockUpload, ChannelError> {
        let ordinal = self.next_file;
        self.next_file += 1;
        lock(&self.state.log).started.push(file.remote_path.clone());

        if lock(&self.state.script).start_failures.contains(&ordinal) {
            return Err(ChannelError::Permission(format!(
                "cannot create {}",
                file.remote_path
            )));
        }
        Ok(MockUpload {
            file: ordinal,
            remote_path: file.remote_path.clone(),
            data: Vec::new(),
        })
    }

    async fn send_part(
        &mut self,
        upload: &mut MockUpload,
        part: &Part,
    ) -> Result<PartAck, ChannelError> {
        lock(&self.state.log).send_calls += 1;

        let failure = {
            let mut script = lock(&self.state.script);
            match script.part_failures.get_mut(&(upload.file, part.index())) {
                Some((failure, remaining)) if *remaining > 0 => {
                    *remaining -= 1;
                    Some(*failure)
                }
                _ => None,
            }
        };
        if let Some(failure) = failure {
            return Err(failure.to_error(upload.file, part.index()));
        }

        upload.data.extend_from_slice(&part.data);
        lock(&self.state.log).parts.push(SentPart {
            file: upload.file,
            index: part.index(),
            len: part.len(),
        });

        let script = lock(&self.state.script);
        if let Some((file, index, token)) = &script.cancel_after {
            if *file == upload.file && *index == part.index() {
                token.cancel();
            }
        }

        Ok(PartAck {
            index: part.index(),
            bytes: part.len() as u64,
            etag: Some(format!("etag-{}-{}", upload.file, part.index())),
        })
    }

    async fn finalize(
        &mut self,
        upload: &mut MockUpload,
        remote_name: &str,
    ) -> Result<FinalizeResult, ChannelError> {
        let url = {
            let script = lock(&self.state.script);
            if script.finalize_failures.contains(&upload.file) {
                return Err(ChannelError::Protocol("malformed completion response".into()));
            }
            script
                .server_url_base
                .as_ref()
                .map(|base| format!("{base}{remote_name}"))
        };

        let mut log = lock(&self.state.log);
        log.finalized.push(remote_name.to_string());
        log.contents
            .insert(upload.remote_path.clone(), std::mem::take(&mut upload.data));
        Ok(FinalizeResult {
            remote_path: remote_name.to_string(),
            url,
        })
    }

    async fn abort(&mut self, upload: MockUpload) {
        lock(&self.state.log).aborted.push(upload.file);
    }

    async fn close(self) {
        lock(&self.state.log).closes += 1;
    }
}

/// [`NameProber`] backed by a fixed set of taken paths.
#[derive(Default)]
pub struct MockProber {
    existing: HashSet<String>,
    probes: Mutex<Vec<String>>,
}

impl MockProber {
    pub fn new(existing: &[&str]) -> Self {
        Self {
            existing: existing.iter().map(|s| s.to_string()).collect(),
            probes: Mutex::new(Vec::new()),
        }
    }

    pub fn probes(&self) -> Vec<String> {
        lock(&self.probes).clone()
    }
}

#[async_trait]
impl NameProber for MockProber {
    async fn exists(&self, remote_path: &str) -> Result<bool, ChannelError> {
        lock(&self.probes).push(remote_path.to_string());
        Ok(self.existing.contains(remote_path))
    }
}

/// Notifier that records every call in order.
#[derive(Default)]
pub struct RecordingNotifier {
    events: Mutex<Vec<UploadEvent>>,
}

impl RecordingNotifier {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn events(&self) -> Vec<UploadEvent> {
        lock(&self.events).clone()
    }

    /// Every `percent` value, in order.
    pub fn percents(&self) -> Vec<u8> {
        self.events()
            .into_iter()
            .filter_map(|e| match e {
                UploadEvent::Percent { percent } => Some(percent),
                _ => None,
            })
            .collect()
    }

    /// Every `set_determinate` value, in order.
    pub fn mode_changes(&self) -> Vec<bool> {
        self.events()
            .into_iter()
            .filter_map(|e| match e {
                UploadEvent::SetDeterminate { determinate } => Some(determinate),
                _ => None,
            })
            .collect()
    }

    /// `(title, message)` of every `error` call, in order.
    pub fn errors(&self) -> Vec<(String, String)> {
        self.events()
            .into_iter()
            .filter_map(|e| match e {
                UploadEvent::Error { title, message } => Some((title, message)),
                _ => None,
            })
            .collect()
    }

    /// Messages of every `finish` call, in order.
    pub fn finishes(&self) -> Vec<String> {
        self.events()
            .into_iter()
            .filter_map(|e| match e {
                UploadEvent::Finish { message } => Some(message),
                _ => None,
            })
            .collect()
    }

    fn push(&self, event: UploadEvent) {
        lock(&self.events).push(event);
    }
}

impl Notifier for RecordingNotifier {
    fn begin(&self, message: &str) {
        self.push(UploadEvent::Begin {
            message: message.to_string(),
        });
    }

    fn percent(&self, percent: u8) {
        self.push(UploadEvent::Percent { percent });
    }

    fn set_determinate(&self, determinate: bool) {
        self.push(UploadEvent::SetDeterminate { determinate });
    }

    fn finish(&self, message: &str) {
        self.push(UploadEvent::Finish {
            message: message.to_string(),
        });
    }

    fn error(&self, title: &str, message: &str) {
        self.push(UploadEvent::Error {
            title: title.to_string(),
            message: message.to_string(),
        });
    }
}
