use std::path::Path;

use sha2::{Digest, Sha256};
use tokio::io::AsyncReadExt;

use crate::plan::{PartPlan, PartRange};

// ---------------------------------------------------------------------------
// Checksum
// ---------------------------------------------------------------------------

/// Whole-file SHA-256 accumulated one part at a time.
#[derive(Default)]
pub struct FileDigest {
    hasher: Sha256,
}

impl FileDigest {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn update(&mut self, data: &[u8]) {
        self.hasher.update(data);
    }

    /// Consumes the digest and returns the hex-encoded hash.
    pub fn finish(self) -> String {
        hex::encode(self.hasher.finalize())
    }
}

// ---------------------------------------------------------------------------
// PartReader
// ---------------------------------------------------------------------------

/// One part of a file, read into memory just before it is sent.
#[derive(Debug, Clone)]
pub struct Part {
    pub range: PartRange,
    pub data: Vec<u8>,
}

impl Part {
    pub fn index(&self) -> u64 {
        self.range.index
    }

    pub fn len(&self) -> usize {
        self.data.len()
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }
}

/// Reads a file part by part following a [`PartPlan`].
///
/// Only one part is held in memory at a time.
pub struct PartReader {
    file: tokio::fs::File,
    plan: PartPlan,
    next_index: u64,
}

impl PartReader {
    /// Opens `path` for reading according to `plan`.
    pub async fn open(path: &Path, plan: PartPlan) -> std::io::Result<Self> {
        let file = tokio::fs::File::open(path).await?;
        Ok(Self {
            file,
            plan,
            next_index: 0,
        })
    }

    /// Reads the next part. Returns `None` once every planned part was read.
    ///
    /// A file that shrank since it was planned yields `UnexpectedEof`.
    pub async fn next_part(&mut self) -> std::io::Result<Option<Part>> {
        let Some(range) = self.plan.part(self.next_index) else {
            return Ok(None);
        };

        let mut data = vec![0u8; range.len as usize];
        self.file.read_exact(&mut data).await?;
        self.next_index += 1;

        Ok(Some(Part { range, data }))
    }

    pub fn plan(&self) -> &PartPlan {
        &self.plan
    }
}
