//! Upload orchestration.
//!
//! [`UploadOrchestrator`] takes an [`UploadTask`](chunkdrop_transfer::UploadTask)
//! and a [`TransferChannel`](chunkdrop_transfer::TransferChannel), uploads the
//! files one after another and reports progress through a [`Notifier`].

pub mod error;
pub mod mime;
pub mod notifier;
pub mod orchestrator;
pub mod retry;
pub mod types;

#[cfg(any(test, feature = "test-util"))]
pub mod mock;

pub use error::UploadError;
pub use mime::{ExtensionSniffer, FileCommandSniffer, MimeSniffer};
pub use notifier::{ChannelNotifier, LogNotifier, Notifier, UploadEvent};
pub use orchestrator::UploadOrchestrator;
pub use retry::RetryPolicy;
pub use types::{BatchOutcome, BatchReport, BatchState, UploadOptions, public_url};
