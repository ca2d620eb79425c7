//! # shipwal-log
//!
//! Segmented append-only log used as the durable engine underneath the
//! shipwal client WAL.
//!
//! This crate provides:
//! - Per-record CRC32C checksums and optional zstd compression
//! - Decimal-named segment files with synchronous rotation
//! - Configurable fsync policies
//! - Torn-tail repair on open and replay of stored payloads

pub mod error;
pub mod metrics;
pub mod record;
pub mod recovery;
pub mod segment;
pub mod wal;

pub use error::WalError;
pub use metrics::WalMetrics;
pub use record::{RecordFrame, RecordHeader};
pub use segment::{Segment, SegmentId, SegmentScanner};
pub use wal::{FsyncPolicy, Wal, WalOptions, WalReader};

/// Default segment size (128 MiB).
pub const DEFAULT_SEGMENT_SIZE: u64 = 128 * 1024 * 1024;

/// Frame header size in bytes.
pub const RECORD_HEADER_SIZE: usize = 16;
