use std::path::PathBuf;
use thiserror::Error;

/// Integrity failures detected while reading a table.
///
/// These travel inside `anyhow::Error`; callers that need to tell corruption
/// from I/O trouble use `err.downcast_ref::<SSTableError>()`.
#[derive(Debug, Error)]
pub enum SSTableError {
    #[error("crc mismatch for record at data offset {offset} in {path}")]
    ChecksumMismatch { path: PathBuf, offset: u64 },

    #[error("merkle root mismatch in {path}: chunks {leaves:?} differ")]
    MerkleMismatch { path: PathBuf, leaves: Vec<usize> },

    #[error("malformed sstable {path}: {reason}")]
    Malformed { path: PathBuf, reason: String },
}

impl SSTableError {
    /// `true` for on-disk corruption (as opposed to a structurally broken file).
    #[must_use]
    pub fn is_corruption(&self) -> bool {
        matches!(
            self,
            SSTableError::ChecksumMismatch { .. } | SSTableError::MerkleMismatch { .. }
        )
    }
}
