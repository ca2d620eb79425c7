//! Log engine errors.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum WalError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Stored checksum does not match the payload.
    #[error("checksum mismatch in frame at offset {offset} (stored {expected:#010x}, computed {actual:#010x})")]
    ChecksumMismatch {
        offset: u64,
        expected: u32,
        actual: u32,
    },

    #[error("bad frame at offset {offset}: {reason}")]
    InvalidFrame { offset: u64, reason: String },

    #[error("payload of {size} bytes exceeds the {max} byte frame limit")]
    FrameTooLarge { size: usize, max: usize },

    /// The engine was closed; no further writes or rotations.
    #[error("WAL is closed")]
    Closed,

    #[error("zstd: {0}")]
    Compression(std::io::Error),

    #[error("registering WAL metrics: {0}")]
    Metrics(#[from] prometheus::Error),
}

impl WalError {
    /// Whether the frame bytes themselves are bad, as opposed to the
    /// filesystem or engine state. Recovery skips past these.
    pub fn is_corruption(&self) -> bool {
        matches!(
            self,
            WalError::ChecksumMismatch { .. }
                | WalError::InvalidFrame { .. }
                | WalError::FrameTooLarge { .. }
        )
    }
}
