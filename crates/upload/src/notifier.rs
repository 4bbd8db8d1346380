//! Progress and status reporting.
//!
//! The orchestrator reports to a [`Notifier`] and never waits on it. A UI
//! can consume [`UploadEvent`]s from a [`ChannelNotifier`] on its own
//! thread; headless runs use [`LogNotifier`].

use serde::Serialize;
use tokio::sync::mpsc;
use tracing::{error, info};

/// Receives status updates for one upload task. Fire-and-forget.
pub trait Notifier: Send + Sync {
    fn begin(&self, message: &str);
    fn percent(&self, percent: u8);
    fn set_determinate(&self, determinate: bool);
    fn finish(&self, message: &str);
    fn error(&self, title: &str, message: &str);
}

/// A notifier call captured as a value.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum UploadEvent {
    Begin { message: String },
    Percent { percent: u8 },
    SetDeterminate { determinate: bool },
    Finish { message: String },
    Error { title: String, message: String },
}

/// Forwards every call into an unbounded channel.
///
/// Sends never block; events are dropped once the receiver is gone.
#[derive(Debug, Clone)]
pub struct ChannelNotifier {
    tx: mpsc::UnboundedSender<UploadEvent>,
}

impl ChannelNotifier {
    /// Creates a notifier and the receiver its events arrive on.
    pub fn new() -> (Self, mpsc::UnboundedReceiver<UploadEvent>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Self { tx }, rx)
    }

    fn emit(&self, event: UploadEvent) {
        let _ = self.tx.send(event);
    }
}

impl Notifier for ChannelNotifier {
    fn begin(&self, message: &str) {
        self.emit(UploadEvent::Begin {
            message: message.to_string(),
        });
    }

    fn percent(&self, percent: u8) {
        self.emit(UploadEvent::Percent { percent });
    }

    fn set_determinate(&self, determinate: bool) {
        self.emit(UploadEvent::SetDeterminate { determinate });
    }

    fn finish(&self, message: &str) {
        self.emit(UploadEvent::Finish {
            message: message.to_string(),
        });
    }

    fn error(&self, title: &str, message: &str) {
        self.emit(UploadEvent::Error {
            title: title.to_string(),
            message: message.to_string(),
        });
    }
}

/// Writes notifier calls to the log.
#[derive(Debug, Clone, Copy, Default)]
pub struct LogNotifier;

impl Notifier for LogNotifier {
    fn begin(&self, message: &str) {
        info!("{message}");
    }

    fn percent(&self, percent: u8) {
        info!(percent, "progress");
    }

    fn set_determinate(&self, _determinate: bool) {}

    fn finish(&self, message: &str) {
        info!("{message}");
    }

    fn error(&self, title: &str, message: &str) {
        error!(title, "{message}");
    }
}
