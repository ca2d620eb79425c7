//! Segment files.
//!
//! The log is split into bounded segments:
//! - Rotation: a new segment when the current one cannot fit a frame, or on request
//! - Cleanup: delivered segments are deleted by the caller
//! - Recovery: segments are scanned and repaired independently

use crate::error::WalError;
use crate::record::RecordFrame;
use crate::RECORD_HEADER_SIZE;
use bytes::BytesMut;
use std::fs::{File, OpenOptions};
use std::io::{Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};

/// Segment number. New segments get the number after the highest ever
/// created in the directory, even if that segment has since been deleted.
pub type SegmentId = u64;

/// File recording the highest segment number ever created in a directory.
pub const HIGH_WATER_FILE: &str = "last_segment";

/// Segment file name: the decimal segment number, zero-padded to 8 digits.
pub fn segment_filename(id: SegmentId) -> String {
    format!("{:08}", id)
}

/// Parses a segment ID from a file name. Any base-10 name is accepted.
pub fn parse_segment_filename(name: &str) -> Option<SegmentId> {
    if name.is_empty() || !name.bytes().all(|b| b.is_ascii_digit()) {
        return None;
    }
    name.parse().ok()
}

/// Fsyncs a directory so that created or removed entries are durable.
pub fn sync_dir(dir: &Path) -> Result<(), WalError> {
    #[cfg(unix)]
    File::open(dir)?.sync_all()?;
    #[cfg(not(unix))]
    let _ = dir;
    Ok(())
}

/// Reads the persisted highest segment number, if any.
///
/// An unreadable mark is ignored with a warning; the segments on disk still
/// bound the next number from below.
pub fn read_high_water(dir: &Path) -> Result<Option<SegmentId>, WalError> {
    let contents = match std::fs::read_to_string(dir.join(HIGH_WATER_FILE)) {
        Ok(contents) => contents,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
        Err(e) => return Err(e.into()),
    };
    match contents.trim().parse() {
        Ok(id) => Ok(Some(id)),
        Err(_) => {
            tracing::warn!(
                "Ignoring malformed {} in {}",
                HIGH_WATER_FILE,
                dir.display()
            );
            Ok(None)
        }
    }
}

/// Durably replaces the highest segment number via write-then-rename.
/// The caller fsyncs the directory afterwards.
pub fn write_high_water(dir: &Path, id: SegmentId) -> Result<(), WalError> {
    let tmp = dir.join(format!("{}.tmp", HIGH_WATER_FILE));
    {
        let mut file = File::create(&tmp)?;
        file.write_all(id.to_string().as_bytes())?;
        file.sync_all()?;
    }
    std::fs::rename(&tmp, dir.join(HIGH_WATER_FILE))?;
    Ok(())
}

/// A single segment file.
pub struct Segment {
    id: SegmentId,
    path: PathBuf,
    file: File,
    size: u64,
    max_size: u64,
    sync_pending: bool,
}

impl Segment {
    /// Creates the file for segment `id`; fails if it already exists.
    pub fn create(dir: &Path, id: SegmentId, max_size: u64) -> Result<Self, WalError> {
        let path = dir.join(segment_filename(id));
        let file = OpenOptions::new()
            .create_new(true)
            .read(true)
            .write(true)
            .open(&path)?;

        Ok(Self {
            id,
            path,
            file,
            size: 0,
            max_size,
            sync_pending: false,
        })
    }

    pub fn open(dir: &Path, id: SegmentId, max_size: u64) -> Result<Self, WalError> {
        let path = dir.join(segment_filename(id));
        let file = OpenOptions::new().read(true).write(true).open(&path)?;
        let size = file.metadata()?.len();

        Ok(Self {
            id,
            path,
            file,
            size,
            max_size,
            sync_pending: false,
        })
    }

    pub fn id(&self) -> SegmentId {
        self.id
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn size(&self) -> u64 {
        self.size
    }

    /// Returns whether the segment can fit a frame of the given size.
    ///
    /// An empty segment accepts any frame so oversized frames still land somewhere.
    pub fn can_fit(&self, frame_size: usize) -> bool {
        self.size == 0 || self.size + frame_size as u64 <= self.max_size
    }

    /// Appends a frame to the segment, returning its offset.
    pub fn append(&mut self, frame: &RecordFrame) -> Result<u64, WalError> {
        let encoded = frame.encode()?;
        let offset = self.size;

        self.file.seek(SeekFrom::End(0))?;
        self.file.write_all(&encoded)?;
        self.size += encoded.len() as u64;
        self.sync_pending = true;

        Ok(offset)
    }

    /// Syncs the segment to disk. Returns whether an fsync was issued.
    pub fn sync(&mut self) -> Result<bool, WalError> {
        if !self.sync_pending {
            return Ok(false);
        }
        self.file.sync_data()?;
        self.sync_pending = false;
        Ok(true)
    }

    /// Decodes every complete frame, paired with its byte offset.
    ///
    /// Stops quietly at a torn tail; a corrupt frame is an error.
    pub fn read_all(&mut self) -> Result<Vec<(u64, RecordFrame)>, WalError> {
        let mut contents = Vec::with_capacity(self.size as usize);
        self.file.seek(SeekFrom::Start(0))?;
        (&self.file).read_to_end(&mut contents)?;

        let mut buf = BytesMut::from(&contents[..]);
        let mut frames = Vec::new();
        let mut offset = 0u64;
        while buf.len() >= RECORD_HEADER_SIZE {
            let Some(frame) = RecordFrame::decode(&mut buf, offset)? else {
                break;
            };
            let size = frame.disk_size() as u64;
            frames.push((offset, frame));
            offset += size;
        }
        Ok(frames)
    }

    /// Cuts the file back to `offset` and makes the new length durable.
    pub fn truncate_at(&mut self, offset: u64) -> Result<(), WalError> {
        self.file.set_len(offset)?;
        self.size = offset;
        self.file.seek(SeekFrom::End(0))?;
        self.file.sync_all()?;
        self.sync_pending = false;
        Ok(())
    }
}

/// Discovers segments in a log directory.
pub struct SegmentScanner;

impl SegmentScanner {
    /// Numbers of the segment files in `dir`, lowest first. Subdirectories and
    /// non-numeric names are ignored.
    pub fn list_segments(dir: &Path) -> Result<Vec<SegmentId>, WalError> {
        let mut segments = Vec::new();

        for entry in std::fs::read_dir(dir)? {
            let entry = entry?;
            if !entry.file_type()?.is_file() {
                continue;
            }
            let name = entry.file_name();
            if let Some(id) = parse_segment_filename(&name.to_string_lossy()) {
                segments.push(id);
            }
        }

        segments.sort_unstable();
        Ok(segments)
    }

    pub fn latest_segment(dir: &Path) -> Result<Option<SegmentId>, WalError> {
        Ok(Self::list_segments(dir)?.pop())
    }
}
