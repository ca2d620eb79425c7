//! shipwal - log-shipping agent
//!
//! Reads log lines from stdin, groups them into batches and persists every
//! batch to the client-side write-ahead log before it is handed off.

mod config;

use chrono::Utc;
use config::Config;
use prometheus::Registry;
use shipwal_client::{ClientWal, Entry, Label, RecordPool, Series};
use shipwal_log::{SegmentScanner, WalError};
use std::io::BufRead;
use std::path::Path;
use std::sync::Arc;
use tracing_subscriber::EnvFilter;

/// Reference of the single stdin stream inside every batch.
const STREAM_REF: u64 = 1;

fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .with_writer(std::io::stderr)
        .init();

    let config = match Config::load() {
        Ok(c) => c,
        Err(e) => {
            tracing::error!("Failed to load config: {}", e);
            return Err(e.into());
        }
    };

    tracing::info!("Starting shipwal agent");
    tracing::info!("  Client: {}", config.client.name);
    tracing::info!("  Tenant: {}", config.client.tenant_id);
    tracing::info!("  Batch size: {}", config.client.batch_size);

    let registry = Registry::new();
    let pool = Arc::new(RecordPool::new());
    let wal = ClientWal::open(
        &config.wal,
        &config.client.name,
        &config.client.tenant_id,
        Arc::clone(&pool),
        Some(&registry),
    )?;

    if wal.is_enabled() {
        tracing::info!("  WAL directory: {}", wal.dir().display());
        if let Some(pending) = undelivered_segments(wal.dir())? {
            tracing::info!("  Undelivered segments from a previous run: {}", pending);
        }
    } else {
        tracing::info!("  WAL: disabled");
    }

    let series = Series {
        ref_id: STREAM_REF,
        labels: config
            .client
            .labels
            .iter()
            .map(|(name, value)| Label::new(name.as_str(), value.as_str()))
            .collect(),
    };

    let mut shipper = BatchWriter {
        wal: &wal,
        pool: &pool,
        tenant_id: &config.client.tenant_id,
        series,
        written: 0,
    };

    let stdin = std::io::stdin();
    let mut batch = shipper.pool.get_entries();
    for line in stdin.lock().lines() {
        batch.push(Entry::new(Utc::now(), line?));
        if batch.len() >= config.client.batch_size {
            shipper.write(batch)?;
            batch = shipper.pool.get_entries();
        }
    }
    if batch.is_empty() {
        pool.put_entries(batch);
    } else {
        shipper.write(batch)?;
    }
    let written = shipper.written;

    wal.sync()?;
    wal.close()?;

    tracing::info!(entries = written, "stdin closed, WAL flushed");
    Ok(())
}

/// Turns line batches into records and logs them.
struct BatchWriter<'a> {
    wal: &'a ClientWal,
    pool: &'a RecordPool,
    tenant_id: &'a str,
    series: Series,
    /// Entries written so far, carried as the stream counter.
    written: i64,
}

impl BatchWriter<'_> {
    fn write(&mut self, entries: Vec<Entry>) -> Result<(), Box<dyn std::error::Error>> {
        self.written += entries.len() as i64;

        let mut record = self.pool.get_record();
        record.set_user_id(self.tenant_id);
        record.add_series(self.series.clone());
        record.add_entries(STREAM_REF, self.written, entries);

        let result = self.wal.log(&record);
        self.pool.put_record(record);
        result?;

        tracing::debug!(total = self.written, "batch logged");
        Ok(())
    }
}

/// Summarizes the segments already on disk, e.g. `3 (4..=9)`.
fn undelivered_segments(dir: &Path) -> Result<Option<String>, WalError> {
    let segments = SegmentScanner::list_segments(dir)?;
    Ok(match (segments.first(), segments.last()) {
        (Some(first), Some(last)) => Some(format!("{} ({}..={})", segments.len(), first, last)),
        _ => None,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_undelivered_segments_summary() {
        let dir = tempfile::TempDir::new().unwrap();
        assert_eq!(undelivered_segments(dir.path()).unwrap(), None);

        for name in ["00000004", "00000009", "00000006", "last_segment"] {
            std::fs::write(dir.path().join(name), b"").unwrap();
        }
        assert_eq!(
            undelivered_segments(dir.path()).unwrap().as_deref(),
            Some("3 (4..=9)")
        );
    }
}
