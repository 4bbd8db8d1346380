//! Chunked upload building blocks.
//!
//! This crate holds everything about a chunked upload that does not touch
//! the network: how a file is split into parts, how parts are read from
//! disk, how per-file progress folds into one batch percentage, how a
//! collision-free remote name is chosen, and the [`TransferChannel`]
//! contract that each transport implements.

mod channel;
mod chunked;
mod naming;
mod plan;
mod progress;
mod types;
mod validation;

pub use channel::{
    ChannelError, ChannelSession, ConnectCause, FinalizeResult, NameProber, PartAck, RemoteFile,
    TransferChannel,
};
pub use chunked::{FileDigest, Part, PartReader};
pub use naming::{join_remote, resolve_remote_name, suffixed_candidate};
pub use plan::{PartLimits, PartPlan, PartRange, plan};
pub use progress::{ProgressAggregator, ProgressMode, ProgressUpdate};
pub use types::{ErrorKind, LocalFile, TransferResult, UploadTask};
pub use validation::{validate_extension, validate_local_file, validate_remote_name};

/// S3 rejects non-final parts smaller than 5 MiB.
pub const S3_MIN_PART_SIZE: u64 = 5 * 1024 * 1024;

/// S3 multipart uploads accept at most 10 000 parts.
pub const S3_MAX_PARTS: u64 = 10_000;

/// Part size used by stream transports, which have no part ceiling.
///
/// Bounds how much of a file is held in memory per `send_part` call.
pub const STREAM_PART_SIZE: u64 = 4 * 1024 * 1024;

/// Errors raised while inspecting local input before any network call.
#[derive(Debug, thiserror::Error)]
pub enum ValidationError {
    #[error("I/O error on {path}: {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("no files to upload")]
    EmptyTask,

    #[error("uploading folders is not supported: {0}")]
    Directory(String),

    #[error("file type not allowed: {0}")]
    DisallowedType(String),

    #[error("invalid remote name: {0}")]
    InvalidName(String),
}
