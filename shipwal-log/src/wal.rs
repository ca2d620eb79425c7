//! Log engine.

use crate::error::WalError;
use crate::metrics::WalMetrics;
use crate::record::RecordFrame;
use crate::recovery::RecoveryScanner;
use crate::segment::{
    read_high_water, sync_dir, write_high_water, Segment, SegmentId, SegmentScanner,
};
use crate::DEFAULT_SEGMENT_SIZE;
use bytes::Bytes;
use parking_lot::Mutex;
use prometheus::Registry;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};

/// Fsync policy for appends.
///
/// Segments are always fsynced when they are rotated away from, on `sync`,
/// and on `close`, regardless of the policy.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum FsyncPolicy {
    /// Fsync after every append (safest, slowest).
    EveryWrite,
    /// Fsync after N appends.
    EveryN(u32),
    /// Only fsync on rotation, `sync` and `close`.
    #[default]
    Never,
}

/// Engine options.
#[derive(Debug, Clone)]
pub struct WalOptions {
    /// Directory holding the segment files.
    pub dir: PathBuf,
    /// Maximum segment size before rotation.
    pub segment_size: u64,
    /// Compress payloads with zstd.
    pub compress: bool,
    /// Fsync policy.
    pub fsync_policy: FsyncPolicy,
}

impl WalOptions {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self {
            dir: dir.into(),
            segment_size: DEFAULT_SEGMENT_SIZE,
            compress: false,
            fsync_policy: FsyncPolicy::default(),
        }
    }

    pub fn with_segment_size(mut self, size: u64) -> Self {
        self.segment_size = size;
        self
    }

    pub fn with_compression(mut self, compress: bool) -> Self {
        self.compress = compress;
        self
    }

    pub fn with_fsync_policy(mut self, policy: FsyncPolicy) -> Self {
        self.fsync_policy = policy;
        self
    }
}

/// Writer-side state, guarded by a single lock.
struct WriterState {
    /// Segment currently appended to. Created lazily.
    current: Option<Segment>,
    /// Highest segment ID ever created in this directory, deleted ones included.
    last_id: Option<SegmentId>,
    /// Appends since last fsync (for EveryN policy).
    writes_since_sync: u32,
}

/// Segmented append-only log.
///
/// A freshly opened log never appends to segments left by a previous
/// process: the first append or rotation creates the segment after the
/// highest one ever created (or segment 0 in a new directory). The highest
/// number is persisted, so numbers are not reused after segments are deleted.
///
/// Metrics registered on open are unregistered on `close` or drop.
pub struct Wal {
    options: WalOptions,
    writer: Mutex<WriterState>,
    closed: AtomicBool,
    metrics: WalMetrics,
    registry: Option<Registry>,
}

impl Wal {
    /// Opens or creates a log in the configured directory.
    ///
    /// When a registry is given, the engine metrics are registered with it.
    pub fn open(registry: Option<&Registry>, options: WalOptions) -> Result<Self, WalError> {
        std::fs::create_dir_all(&options.dir)?;

        let metrics = WalMetrics::new(&options.dir.to_string_lossy())?;
        if let Some(registry) = registry {
            metrics.register(registry)?;
        }

        let latest_on_disk = SegmentScanner::latest_segment(&options.dir)?;
        let last_id = latest_on_disk.max(read_high_water(&options.dir)?);
        if let Some(id) = latest_on_disk {
            let truncated = RecoveryScanner::new(&options.dir, options.segment_size)
                .repair_segment(id)?;
            if truncated > 0 {
                metrics.truncations_total.inc();
            }
            tracing::info!(
                "WAL opened at {}: last segment {}, {} bytes repaired",
                options.dir.display(),
                id,
                truncated
            );
        }

        let registry = registry.cloned();

        Ok(Self {
            options,
            writer: Mutex::new(WriterState {
                current: None,
                last_id,
                writes_since_sync: 0,
            }),
            closed: AtomicBool::new(false),
            metrics,
            registry,
        })
    }

    /// Returns the directory holding the segments.
    pub fn dir(&self) -> &Path {
        &self.options.dir
    }

    /// Returns the engine metrics.
    pub fn metrics(&self) -> &WalMetrics {
        &self.metrics
    }

    /// Returns the segment currently appended to, if one has been created.
    pub fn current_segment(&self) -> Option<SegmentId> {
        self.writer.lock().current.as_ref().map(Segment::id)
    }

    /// Lists the segment IDs present on disk.
    pub fn segments(&self) -> Result<Vec<SegmentId>, WalError> {
        SegmentScanner::list_segments(&self.options.dir)
    }

    /// Appends one payload as a single frame.
    pub fn log(&self, payload: &[u8]) -> Result<(), WalError> {
        if self.closed.load(Ordering::Acquire) {
            return Err(WalError::Closed);
        }

        let result = self.append(payload);
        if result.is_err() {
            self.metrics.writes_failed_total.inc();
        }
        result
    }

    fn append(&self, payload: &[u8]) -> Result<(), WalError> {
        let frame = RecordFrame::from_payload(payload, self.options.compress)?;
        let frame_size = frame.disk_size();

        let mut state = self.writer.lock();
        // Re-checked under the lock: a concurrent close releases `current`.
        if self.closed.load(Ordering::Acquire) {
            return Err(WalError::Closed);
        }
        let needs_rotation = state
            .current
            .as_ref()
            .map_or(true, |segment| !segment.can_fit(frame_size));
        if needs_rotation {
            self.rotate(&mut state)?;
        }

        let Some(segment) = state.current.as_mut() else {
            return Err(WalError::Closed);
        };
        segment.append(&frame)?;

        self.metrics.records_written_total.inc();
        self.metrics.bytes_written_total.inc_by(frame_size as f64);

        state.writes_since_sync += 1;
        let due = match self.options.fsync_policy {
            FsyncPolicy::EveryWrite => true,
            FsyncPolicy::EveryN(n) => state.writes_since_sync >= n,
            FsyncPolicy::Never => false,
        };
        if due {
            self.sync_locked(&mut state)?;
        }

        Ok(())
    }

    /// Finishes the current segment and starts the next one.
    fn rotate(&self, state: &mut WriterState) -> Result<SegmentId, WalError> {
        self.sync_locked(state)?;

        let next_id = state.last_id.map_or(0, |id| id + 1);
        let segment = Segment::create(&self.options.dir, next_id, self.options.segment_size)?;
        write_high_water(&self.options.dir, next_id)?;
        sync_dir(&self.options.dir)?;

        state.current = Some(segment);
        state.last_id = Some(next_id);
        self.metrics.segment_creations_total.inc();
        self.metrics.current_segment.set(next_id as f64);

        tracing::debug!("Rotated to segment {}", next_id);
        Ok(next_id)
    }

    fn sync_locked(&self, state: &mut WriterState) -> Result<(), WalError> {
        if let Some(segment) = state.current.as_mut() {
            let timer = self.metrics.fsync_duration.start_timer();
            if segment.sync()? {
                timer.observe_duration();
            } else {
                timer.stop_and_discard();
            }
        }
        state.writes_since_sync = 0;
        Ok(())
    }

    /// Forces a sync of the current segment to disk.
    pub fn sync(&self) -> Result<(), WalError> {
        let mut state = self.writer.lock();
        self.sync_locked(&mut state)
    }

    /// Rotates to a new segment and returns its ID once the previous segment
    /// and the new directory entry are durable.
    pub fn next_segment_sync(&self) -> Result<SegmentId, WalError> {
        let mut state = self.writer.lock();
        if self.closed.load(Ordering::Acquire) {
            return Err(WalError::Closed);
        }
        self.rotate(&mut state)
    }

    /// Syncs and releases the current segment and unregisters the metrics.
    /// Closing twice is an error.
    pub fn close(&self) -> Result<(), WalError> {
        if self.closed.swap(true, Ordering::AcqRel) {
            return Err(WalError::Closed);
        }
        self.unregister_metrics();
        let mut state = self.writer.lock();
        self.sync_locked(&mut state)?;
        state.current = None;
        Ok(())
    }

    fn unregister_metrics(&self) {
        if let Some(registry) = &self.registry {
            if let Err(e) = self.metrics.unregister(registry) {
                tracing::warn!("Failed to unregister WAL metrics: {}", e);
            }
        }
    }
}

impl Drop for Wal {
    fn drop(&mut self) {
        if !self.closed.load(Ordering::Acquire) {
            self.unregister_metrics();
        }
    }
}

/// Sequential reader over the payloads stored in a log directory.
pub struct WalReader {
    dir: PathBuf,
    segment_size: u64,
}

impl WalReader {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self {
            dir: dir.into(),
            segment_size: DEFAULT_SEGMENT_SIZE,
        }
    }

    /// Reads the payloads of one segment, in append order.
    pub fn read_segment(&self, id: SegmentId) -> Result<Vec<Bytes>, WalError> {
        let mut segment = Segment::open(&self.dir, id, self.segment_size)?;
        segment
            .read_all()?
            .into_iter()
            .map(|(_, frame)| frame.into_payload())
            .collect()
    }

    /// Reads every payload in segment order.
    pub fn replay(&self) -> Result<Vec<(SegmentId, Bytes)>, WalError> {
        let mut payloads = Vec::new();
        for id in SegmentScanner::list_segments(&self.dir)? {
            for payload in self.read_segment(id)? {
                payloads.push((id, payload));
            }
        }
        Ok(payloads)
    }
}
