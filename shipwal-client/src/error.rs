//! Client WAL error types.

use shipwal_log::{SegmentId, WalError};
use thiserror::Error;

/// Errors returned by the client WAL.
#[derive(Debug, Error)]
pub enum ClientWalError {
    #[error("{context}: {source}")]
    Io {
        context: &'static str,
        #[source]
        source: std::io::Error,
    },

    #[error("segment not found")]
    NotFound(SegmentId),

    /// Failure surfaced unchanged from the log engine.
    #[error(transparent)]
    Engine(#[from] WalError),
}

impl ClientWalError {
    pub(crate) fn io(context: &'static str) -> impl FnOnce(std::io::Error) -> Self {
        move |source| ClientWalError::Io { context, source }
    }
}

/// Errors decoding a stored payload.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum CodecError {
    #[error("payload is empty")]
    Empty,

    #[error("unknown record type: {0}")]
    UnknownRecordType(u8),

    #[error("truncated payload while reading {0}")]
    Truncated(&'static str),

    #[error("varint overflows 64 bits")]
    VarintOverflow,

    #[error("invalid UTF-8 in {0}")]
    InvalidUtf8(&'static str),
}
