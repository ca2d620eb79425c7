//! Recovery utilities.
//!
//! Handles recovery from:
//! - Partial writes (incomplete frames at the end of a segment)
//! - Corrupted frames

use crate::error::WalError;
use crate::record::{RecordFrame, FRAME_MAGIC};
use crate::segment::{Segment, SegmentId, SegmentScanner};
use crate::RECORD_HEADER_SIZE;
use bytes::{Buf, BytesMut};
use std::io::Read;
use std::path::{Path, PathBuf};

/// Result of a recovery scan.
#[derive(Debug, Default)]
pub struct RecoveryResult {
    /// Number of valid frames found.
    pub valid_records: u64,
    /// Number of corrupted frames skipped.
    pub invalid_records: u64,
    /// Bytes past the last valid frame.
    pub bytes_truncated: u64,
    /// Segments that needed repair.
    pub segments_recovered: Vec<SegmentId>,
    /// Segments that could not be scanned.
    pub segments_with_errors: Vec<(SegmentId, String)>,
}

/// Per-segment scan outcome.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
struct SegmentScan {
    valid: u64,
    invalid: u64,
    truncated: u64,
}

/// Recovery scanner.
pub struct RecoveryScanner {
    dir: PathBuf,
    segment_size: u64,
}

impl RecoveryScanner {
    pub fn new(dir: impl AsRef<Path>, segment_size: u64) -> Self {
        Self {
            dir: dir.as_ref().to_path_buf(),
            segment_size,
        }
    }

    /// Scans every segment and optionally repairs them.
    pub fn scan(&self, repair: bool) -> Result<RecoveryResult, WalError> {
        let mut result = RecoveryResult::default();

        for seg_id in SegmentScanner::list_segments(&self.dir)? {
            match self.scan_segment(seg_id, repair) {
                Ok(scan) => {
                    result.valid_records += scan.valid;
                    result.invalid_records += scan.invalid;
                    result.bytes_truncated += scan.truncated;
                    if scan.invalid > 0 || scan.truncated > 0 {
                        result.segments_recovered.push(seg_id);
                    }
                }
                Err(e) => result.segments_with_errors.push((seg_id, e.to_string())),
            }
        }

        Ok(result)
    }

    /// Truncates a torn tail off one segment, returning the bytes removed.
    pub fn repair_segment(&self, seg_id: SegmentId) -> Result<u64, WalError> {
        Ok(self.scan_segment(seg_id, true)?.truncated)
    }

    fn scan_segment(&self, seg_id: SegmentId, repair: bool) -> Result<SegmentScan, WalError> {
        let mut segment = Segment::open(&self.dir, seg_id, self.segment_size)?;
        let file_size = segment.size();

        let mut contents = Vec::with_capacity(file_size as usize);
        std::fs::File::open(segment.path())?.read_to_end(&mut contents)?;
        let mut buf = BytesMut::from(&contents[..]);

        let mut scan = SegmentScan::default();
        let mut offset = 0u64;
        let mut last_valid_offset = 0u64;

        while buf.len() >= RECORD_HEADER_SIZE {
            match RecordFrame::decode(&mut buf, offset) {
                Ok(Some(frame)) => {
                    scan.valid += 1;
                    offset += frame.disk_size() as u64;
                    last_valid_offset = offset;
                }
                // Incomplete frame or zero padding at the end.
                Ok(None) => break,
                Err(e) if e.is_corruption() => {
                    scan.invalid += 1;
                    // Resynchronize on the next frame magic, if any.
                    match buf[1..].windows(FRAME_MAGIC.len()).position(|w| w == FRAME_MAGIC) {
                        Some(pos) => {
                            buf.advance(pos + 1);
                            offset += (pos + 1) as u64;
                        }
                        None => break,
                    }
                }
                Err(e) => return Err(e),
            }
        }

        scan.truncated = file_size - last_valid_offset;

        if repair && scan.truncated > 0 {
            segment.truncate_at(last_valid_offset)?;
            tracing::warn!(
                "Truncated segment {} at offset {} (removed {} bytes)",
                seg_id,
                last_valid_offset,
                scan.truncated
            );
        }

        Ok(scan)
    }
}

/// Verifies log integrity without modifying anything.
pub fn verify_wal(dir: impl AsRef<Path>, segment_size: u64) -> Result<RecoveryResult, WalError> {
    RecoveryScanner::new(dir, segment_size).scan(false)
}

/// Repairs a log by truncating partial writes.
pub fn repair_wal(dir: impl AsRef<Path>, segment_size: u64) -> Result<RecoveryResult, WalError> {
    RecoveryScanner::new(dir, segment_size).scan(true)
}
