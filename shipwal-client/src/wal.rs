//! The client WAL.
//!
//! `ClientWal` is chosen once from configuration: `Disabled` turns every
//! operation into a successful no-op, `Durable` encodes records into a log
//! engine living at `<dir>/<client-name>/<tenant-id>`.

use crate::config::WalConfig;
use crate::error::ClientWalError;
use crate::pool::RecordPool;
use crate::record::{Record, CURRENT_ENTRIES_VERSION};
use prometheus::Registry;
use shipwal_log::{SegmentId, Wal, WalError, WalOptions, DEFAULT_SEGMENT_SIZE};
use std::path::Path;
use std::sync::Arc;

/// Append-only log engine underneath the durable WAL.
pub trait LogEngine: Send + Sync {
    /// Appends one payload.
    fn log(&self, payload: &[u8]) -> Result<(), WalError>;

    /// Flushes buffered state to stable storage.
    fn sync(&self) -> Result<(), WalError>;

    /// Flushes and releases the engine; later writes fail.
    fn close(&self) -> Result<(), WalError>;

    /// Directory holding the segment files.
    fn dir(&self) -> &Path;

    /// Starts a new segment and returns its number once it is durable.
    fn next_segment_sync(&self) -> Result<SegmentId, WalError>;
}

impl LogEngine for Wal {
    fn log(&self, payload: &[u8]) -> Result<(), WalError> {
        Wal::log(self, payload)
    }

    fn sync(&self) -> Result<(), WalError> {
        Wal::sync(self)
    }

    fn close(&self) -> Result<(), WalError> {
        Wal::close(self)
    }

    fn dir(&self) -> &Path {
        Wal::dir(self)
    }

    fn next_segment_sync(&self) -> Result<SegmentId, WalError> {
        Wal::next_segment_sync(self)
    }
}

/// WAL of one client and tenant.
pub enum ClientWal<E: LogEngine = Wal> {
    /// WAL turned off in configuration.
    Disabled,
    Durable(DurableWal<E>),
}

impl ClientWal<Wal> {
    /// Opens the WAL for `client_name`/`tenant_id`, or returns `Disabled`
    /// without touching the filesystem when the WAL is turned off.
    pub fn open(
        config: &WalConfig,
        client_name: &str,
        tenant_id: &str,
        pool: Arc<RecordPool>,
        registry: Option<&Registry>,
    ) -> Result<Self, ClientWalError> {
        if !config.enabled {
            return Ok(ClientWal::Disabled);
        }

        let dir = config.wal_dir(client_name, tenant_id);
        let options = WalOptions::new(dir).with_segment_size(DEFAULT_SEGMENT_SIZE);
        let engine = Wal::open(registry, options)?;
        Ok(ClientWal::Durable(DurableWal::new(engine, pool)))
    }
}

impl<E: LogEngine> ClientWal<E> {
    /// Writes a record. Empty records are ignored.
    pub fn log(&self, record: &Record) -> Result<(), ClientWalError> {
        match self {
            ClientWal::Disabled => Ok(()),
            ClientWal::Durable(wal) => wal.log(record),
        }
    }

    /// Flushes the log to disk. Mainly used by tests.
    pub fn sync(&self) -> Result<(), ClientWalError> {
        match self {
            ClientWal::Disabled => Ok(()),
            ClientWal::Durable(wal) => wal.sync(),
        }
    }

    /// Storage directory; empty when disabled.
    pub fn dir(&self) -> &Path {
        match self {
            ClientWal::Disabled => Path::new(""),
            ClientWal::Durable(wal) => wal.dir(),
        }
    }

    /// Closes the engine, keeping the data on disk.
    pub fn close(&self) -> Result<(), ClientWalError> {
        match self {
            ClientWal::Disabled => Ok(()),
            ClientWal::Durable(wal) => wal.close(),
        }
    }

    /// Closes the engine and removes the whole WAL directory.
    pub fn delete(self) -> Result<(), ClientWalError> {
        match self {
            ClientWal::Disabled => Ok(()),
            ClientWal::Durable(wal) => wal.delete(),
        }
    }

    /// Removes the segment file whose name parses to `segment`.
    pub fn delete_segment(&self, segment: SegmentId) -> Result<(), ClientWalError> {
        match self {
            ClientWal::Disabled => Ok(()),
            ClientWal::Durable(wal) => wal.delete_segment(segment),
        }
    }

    /// Rotates to a new segment and returns its number.
    pub fn next_segment(&self) -> Result<SegmentId, ClientWalError> {
        match self {
            ClientWal::Disabled => Ok(0),
            ClientWal::Durable(wal) => wal.next_segment(),
        }
    }

    /// Whether records reach disk.
    pub fn is_enabled(&self) -> bool {
        matches!(self, ClientWal::Durable(_))
    }
}

/// WAL backed by a log engine.
pub struct DurableWal<E: LogEngine = Wal> {
    engine: E,
    pool: Arc<RecordPool>,
}

impl<E: LogEngine> DurableWal<E> {
    pub fn new(engine: E, pool: Arc<RecordPool>) -> Self {
        Self { engine, pool }
    }

    pub fn engine(&self) -> &E {
        &self.engine
    }

    pub fn pool(&self) -> &Arc<RecordPool> {
        &self.pool
    }

    /// Encodes the record's series and entries as two separate appends.
    ///
    /// The appends are not atomic: if the entries append fails, the series
    /// payload has already been written.
    pub fn log(&self, record: &Record) -> Result<(), ClientWalError> {
        if record.is_empty() {
            return Ok(());
        }

        let mut buf = self.pool.get_bytes();
        let result = self.write_record(record, &mut buf);
        self.pool.put_bytes(buf);
        result
    }

    fn write_record(&self, record: &Record, buf: &mut Vec<u8>) -> Result<(), ClientWalError> {
        // Series first: entries are resolved on replay by the refs series introduce.
        if !record.series().is_empty() {
            record.encode_series(buf);
            self.engine.log(buf)?;
            buf.clear();
        }
        if !record.ref_entries().is_empty() {
            record.encode_entries(CURRENT_ENTRIES_VERSION, buf);
            self.engine.log(buf)?;
        }
        Ok(())
    }

    pub fn sync(&self) -> Result<(), ClientWalError> {
        Ok(self.engine.sync()?)
    }

    pub fn dir(&self) -> &Path {
        self.engine.dir()
    }

    /// Closes the engine, keeping the data on disk.
    pub fn close(&self) -> Result<(), ClientWalError> {
        Ok(self.engine.close()?)
    }

    /// Closes the engine and removes the WAL directory. A close failure is
    /// logged and does not prevent the removal; a directory that is already
    /// gone counts as removed.
    pub fn delete(self) -> Result<(), ClientWalError> {
        if let Err(e) = self.engine.close() {
            tracing::warn!(dir = %self.dir().display(), error = %e, "failed to close WAL");
        }
        match std::fs::remove_dir_all(self.dir()) {
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            result => result.map_err(ClientWalError::io("failed removing wal dir")),
        }
    }

    pub fn delete_segment(&self, segment: SegmentId) -> Result<(), ClientWalError> {
        let dir = self.dir();
        let entries = std::fs::read_dir(dir).map_err(ClientWalError::io("error reading wal dir"))?;

        let mut segment_name = None;
        for entry in entries {
            let entry = entry.map_err(ClientWalError::io("error reading wal dir"))?;
            let name = entry.file_name();
            let Some(parsed) = name.to_str().and_then(|s| s.parse::<SegmentId>().ok()) else {
                continue;
            };
            if parsed == segment {
                segment_name = Some(name);
                break;
            }
        }

        let Some(name) = segment_name else {
            return Err(ClientWalError::NotFound(segment));
        };
        std::fs::remove_file(dir.join(&name))
            .map_err(ClientWalError::io("failed deleting segment"))?;

        tracing::debug!("Deleted WAL segment {} in {}", segment, dir.display());
        Ok(())
    }

    pub fn next_segment(&self) -> Result<SegmentId, ClientWalError> {
        Ok(self.engine.next_segment_sync()?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::record::{Entry, Label, RecordType, Series};
    use chrono::{TimeZone, Utc};
    use parking_lot::Mutex;
    use std::path::PathBuf;
    use std::sync::atomic::{AtomicU64, Ordering};
    use tempfile::TempDir;

    /// Engine that records appends instead of writing them.
    struct RecordingEngine {
        dir: PathBuf,
        appends: Mutex<Vec<Vec<u8>>>,
        fail_append_at: Option<usize>,
        fail_close: bool,
        next_segment: AtomicU64,
    }

    impl RecordingEngine {
        fn new(dir: &Path) -> Self {
            Self {
                dir: dir.to_path_buf(),
                appends: Mutex::new(Vec::new()),
                fail_append_at: None,
                fail_close: false,
                next_segment: AtomicU64::new(0),
            }
        }

        fn append_types(&self) -> Vec<u8> {
            self.appends.lock().iter().map(|p| p[0]).collect()
        }
    }

    impl LogEngine for RecordingEngine {
        fn log(&self, payload: &[u8]) -> Result<(), WalError> {
            let mut appends = self.appends.lock();
            if self.fail_append_at == Some(appends.len()) {
                return Err(WalError::Closed);
            }
            appends.push(payload.to_vec());
            Ok(())
        }

        fn sync(&self) -> Result<(), WalError> {
            Ok(())
        }

        fn close(&self) -> Result<(), WalError> {
            if self.fail_close {
                return Err(WalError::Io(std::io::Error::new(
                    std::io::ErrorKind::Other,
                    "disk gone",
                )));
            }
            Ok(())
        }

        fn dir(&self) -> &Path {
            &self.dir
        }

        fn next_segment_sync(&self) -> Result<SegmentId, WalError> {
            Ok(self.next_segment.fetch_add(1, Ordering::SeqCst))
        }
    }

    fn durable(engine: RecordingEngine) -> ClientWal<RecordingEngine> {
        ClientWal::Durable(DurableWal::new(engine, Arc::new(RecordPool::new())))
    }

    fn engine_of(wal: &ClientWal<RecordingEngine>) -> &RecordingEngine {
        match wal {
            ClientWal::Durable(wal) => wal.engine(),
            ClientWal::Disabled => unreachable!(),
        }
    }

    fn series(ref_id: u64) -> Series {
        Series {
            ref_id,
            labels: vec![Label::new("job", "varlogs")],
        }
    }

    fn entries(n: usize) -> Vec<Entry> {
        (0..n)
            .map(|i| Entry::new(Utc.timestamp_opt(1_700_000_000 + i as i64, 0).unwrap(), format!("line {}", i)))
            .collect()
    }

    #[test]
    fn test_empty_record_never_appends() {
        let dir = TempDir::new().unwrap();
        let wal = durable(RecordingEngine::new(dir.path()));

        wal.log(&Record::new("tenant")).unwrap();
        wal.log(&Record::default()).unwrap();
        assert!(engine_of(&wal).appends.lock().is_empty());
    }

    #[test]
    fn test_series_then_entries() {
        let dir = TempDir::new().unwrap();
        let wal = durable(RecordingEngine::new(dir.path()));

        let mut record = Record::new("t1");
        record.add_entries(1, 1, entries(1));
        record.add_series(series(1));
        wal.log(&record).unwrap();

        assert_eq!(
            engine_of(&wal).append_types(),
            vec![RecordType::Series as u8, RecordType::EntriesV2 as u8]
        );
    }

    #[test]
    fn test_single_part_records_append_once() {
        let dir = TempDir::new().unwrap();
        let wal = durable(RecordingEngine::new(dir.path()));

        let mut only_series = Record::new("t1");
        only_series.add_series(series(1));
        wal.log(&only_series).unwrap();

        let mut only_entries = Record::new("t1");
        only_entries.add_entries(1, 2, entries(3));
        wal.log(&only_entries).unwrap();

        assert_eq!(
            engine_of(&wal).append_types(),
            vec![RecordType::Series as u8, RecordType::EntriesV2 as u8]
        );
        let appends = engine_of(&wal).appends.lock();
        let (_, decoded) = Record::decode(&appends[1]).unwrap();
        assert_eq!(decoded.entry_count(), 3);
    }

    #[test]
    fn test_log_leaves_record_untouched() {
        let dir = TempDir::new().unwrap();
        let wal = durable(RecordingEngine::new(dir.path()));

        let mut record = Record::new("t1");
        record.add_series(series(4));
        record.add_entries(4, 1, entries(2));
        wal.log(&record).unwrap();

        assert_eq!(record.series(), &[series(4)]);
        assert_eq!(record.ref_entries()[0].entries, entries(2));
    }

    #[test]
    fn test_entries_failure_leaves_series_written() {
        let dir = TempDir::new().unwrap();
        let mut engine = RecordingEngine::new(dir.path());
        engine.fail_append_at = Some(1);
        let wal = durable(engine);

        let mut record = Record::new("t1");
        record.add_series(series(1));
        record.add_entries(1, 1, entries(1));

        assert!(matches!(
            wal.log(&record),
            Err(ClientWalError::Engine(WalError::Closed))
        ));
        assert_eq!(engine_of(&wal).append_types(), vec![RecordType::Series as u8]);
    }

    #[test]
    fn test_log_returns_buffer_to_pool() {
        let dir = TempDir::new().unwrap();
        let pool = Arc::new(RecordPool::new());
        let wal = DurableWal::new(RecordingEngine::new(dir.path()), Arc::clone(&pool));

        let mut record = Record::new("t1");
        record.add_series(series(1));
        wal.log(&record).unwrap();
        wal.log(&record).unwrap();
        assert_eq!(pool.stats().bytes, 1);
    }

    #[test]
    fn test_disabled_wal() {
        let dir = TempDir::new().unwrap();
        let root = dir.path().join("wal");
        let config = WalConfig {
            enabled: false,
            dir: root.clone(),
        };
        let wal = ClientWal::open(&config, "agent", "t1", Arc::new(RecordPool::new()), None).unwrap();

        let mut record = Record::new("t1");
        record.add_series(series(1));
        record.add_entries(1, 1, entries(1));

        assert!(!wal.is_enabled());
        wal.log(&record).unwrap();
        wal.sync().unwrap();
        assert_eq!(wal.dir(), Path::new(""));
        assert_eq!(wal.next_segment().unwrap(), 0);
        wal.delete_segment(3).unwrap();
        wal.delete().unwrap();
        assert!(!root.exists());
    }

    #[test]
    fn test_delete_segment_removes_only_match() {
        let dir = TempDir::new().unwrap();
        for name in ["0", "3", "7", "notes"] {
            std::fs::write(dir.path().join(name), b"").unwrap();
        }
        let wal = durable(RecordingEngine::new(dir.path()));

        wal.delete_segment(3).unwrap();

        let mut left: Vec<_> = std::fs::read_dir(dir.path())
            .unwrap()
            .map(|e| e.unwrap().file_name().into_string().unwrap())
            .collect();
        left.sort();
        assert_eq!(left, vec!["0", "7", "notes"]);
    }

    #[test]
    fn test_delete_segment_not_found() {
        let dir = TempDir::new().unwrap();
        for name in ["0", "3", "7"] {
            std::fs::write(dir.path().join(name), b"").unwrap();
        }
        let wal = durable(RecordingEngine::new(dir.path()));

        let err = wal.delete_segment(5).unwrap_err();
        assert!(matches!(err, ClientWalError::NotFound(5)));
        assert_eq!(err.to_string(), "segment not found");
        assert_eq!(std::fs::read_dir(dir.path()).unwrap().count(), 3);
    }

    #[test]
    fn test_delete_segment_matches_padded_names() {
        let dir = TempDir::new().unwrap();
        std::fs::write(dir.path().join("00000012"), b"").unwrap();
        let wal = durable(RecordingEngine::new(dir.path()));

        wal.delete_segment(12).unwrap();
        assert!(!dir.path().join("00000012").exists());
    }

    #[test]
    fn test_delete_segment_missing_dir() {
        let dir = TempDir::new().unwrap();
        let wal = durable(RecordingEngine::new(&dir.path().join("gone")));

        let err = wal.delete_segment(0).unwrap_err();
        assert!(matches!(err, ClientWalError::Io { .. }));
        assert!(err.to_string().starts_with("error reading wal dir: "));
    }

    #[test]
    fn test_delete_survives_close_failure() {
        let dir = TempDir::new().unwrap();
        let wal_dir = dir.path().join("agent").join("t1");
        std::fs::create_dir_all(&wal_dir).unwrap();
        std::fs::write(wal_dir.join("00000000"), b"data").unwrap();

        let mut engine = RecordingEngine::new(&wal_dir);
        engine.fail_close = true;
        durable(engine).delete().unwrap();

        assert!(!wal_dir.exists());
    }

    #[test]
    fn test_delete_of_missing_dir_succeeds() {
        let dir = TempDir::new().unwrap();
        let wal = durable(RecordingEngine::new(&dir.path().join("never-created")));
        wal.delete().unwrap();
    }

    #[test]
    fn test_delete_reports_removal_failure() {
        let dir = TempDir::new().unwrap();
        // A regular file where the directory should be cannot be removed as one.
        let not_a_dir = dir.path().join("t1");
        std::fs::write(&not_a_dir, b"x").unwrap();
        let wal = durable(RecordingEngine::new(&not_a_dir));

        let err = wal.delete().unwrap_err();
        assert!(matches!(err, ClientWalError::Io { .. }));
        assert!(err.to_string().starts_with("failed removing wal dir: "));
        assert!(not_a_dir.exists());
    }

    #[test]
    fn test_next_segment_delegates() {
        let dir = TempDir::new().unwrap();
        let wal = durable(RecordingEngine::new(dir.path()));
        assert_eq!(wal.next_segment().unwrap(), 0);
        assert_eq!(wal.next_segment().unwrap(), 1);
    }
}
