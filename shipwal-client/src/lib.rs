//! # shipwal-client
//!
//! Write-ahead log used by the shipping client to buffer batches of log
//! lines until the remote sink has acknowledged them.
//!
//! This crate provides:
//! - The record model and its two-payload encoding (series, then entries)
//! - A recycling pool for records, entry vectors and byte buffers
//! - The WAL contract with a disabled and a durable variant
//! - Segment rotation and targeted segment deletion

pub mod config;
pub mod error;
pub mod pool;
pub mod record;
pub mod wal;

pub use config::WalConfig;
pub use error::{ClientWalError, CodecError};
pub use pool::{PoolStats, RecordPool};
pub use record::{
    EntriesVersion, Entry, Label, Record, RecordType, RefEntries, Series, CURRENT_ENTRIES_VERSION,
};
pub use shipwal_log::SegmentId;
pub use wal::{ClientWal, DurableWal, LogEngine};
