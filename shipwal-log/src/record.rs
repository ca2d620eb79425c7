//! Record framing.
//!
//! Every payload handed to the log is stored as one frame:
//!
//! ```text
//! +----------+----------+----------+----------+----------+
//! | magic    | flags    | reserved | length   | crc32c   |
//! | 4 bytes  | 1 byte   | 3 bytes  | 4 bytes  | 4 bytes  |
//! +----------+----------+----------+----------+----------+
//! | payload (length bytes, possibly zstd-compressed)      |
//! +-------------------------------------------------------+
//! ```
//!
//! The checksum covers the payload exactly as stored on disk.

use crate::error::WalError;
use crate::RECORD_HEADER_SIZE;
use bytes::{Buf, BufMut, Bytes, BytesMut};

/// Magic bytes for log frames: "SWAL"
pub const FRAME_MAGIC: [u8; 4] = *b"SWAL";

/// Maximum stored payload size (16 MiB).
pub const MAX_RECORD_SIZE: usize = 16 * 1024 * 1024;

/// Payload is zstd-compressed.
pub const FLAG_COMPRESSED: u8 = 0x01;

/// zstd level used for compressed frames. Favors speed over ratio.
const COMPRESSION_LEVEL: i32 = 1;

/// A parsed frame header.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RecordHeader {
    pub flags: u8,
    pub payload_len: u32,
    pub crc32c: u32,
}

impl RecordHeader {
    /// Returns whether the stored payload is compressed.
    pub fn is_compressed(&self) -> bool {
        self.flags & FLAG_COMPRESSED != 0
    }
}

/// A complete frame (header + stored payload).
#[derive(Debug, Clone)]
pub struct RecordFrame {
    pub header: RecordHeader,
    pub payload: Bytes,
}

impl RecordFrame {
    /// Builds a frame around an already-stored payload.
    pub fn new(flags: u8, payload: Bytes) -> Self {
        let crc = crc32c::crc32c(&payload);
        Self {
            header: RecordHeader {
                flags,
                payload_len: payload.len() as u32,
                crc32c: crc,
            },
            payload,
        }
    }

    /// Builds a frame from a caller payload, compressing it when asked.
    pub fn from_payload(payload: &[u8], compress: bool) -> Result<Self, WalError> {
        if compress {
            let compressed = zstd::bulk::compress(payload, COMPRESSION_LEVEL)
                .map_err(WalError::Compression)?;
            Ok(Self::new(FLAG_COMPRESSED, Bytes::from(compressed)))
        } else {
            Ok(Self::new(0, Bytes::copy_from_slice(payload)))
        }
    }

    /// Returns the caller payload, decompressing if needed.
    pub fn into_payload(self) -> Result<Bytes, WalError> {
        if self.header.is_compressed() {
            let raw = zstd::stream::decode_all(&self.payload[..]).map_err(WalError::Compression)?;
            Ok(Bytes::from(raw))
        } else {
            Ok(self.payload)
        }
    }

    /// Encodes the frame into bytes.
    pub fn encode(&self) -> Result<BytesMut, WalError> {
        if self.payload.len() > MAX_RECORD_SIZE {
            return Err(WalError::FrameTooLarge {
                size: self.payload.len(),
                max: MAX_RECORD_SIZE,
            });
        }

        let mut buf = BytesMut::with_capacity(self.disk_size());
        buf.put_slice(&FRAME_MAGIC);
        buf.put_u8(self.header.flags);
        buf.put_slice(&[0u8; 3]);
        buf.put_u32(self.header.payload_len);
        buf.put_u32(self.header.crc32c);
        buf.put_slice(&self.payload);

        Ok(buf)
    }

    /// Decodes a frame from the front of `buf`.
    ///
    /// Returns `Ok(None)` when more bytes are needed or when the remaining
    /// bytes are zero padding.
    pub fn decode(buf: &mut BytesMut, offset: u64) -> Result<Option<Self>, WalError> {
        if buf.len() < RECORD_HEADER_SIZE {
            return Ok(None);
        }

        let magic = [buf[0], buf[1], buf[2], buf[3]];
        if magic != FRAME_MAGIC {
            if magic == [0, 0, 0, 0] {
                return Ok(None);
            }
            return Err(WalError::InvalidFrame {
                offset,
                reason: format!("invalid magic: {:?}", magic),
            });
        }

        let flags = buf[4];
        if flags & !FLAG_COMPRESSED != 0 {
            return Err(WalError::InvalidFrame {
                offset,
                reason: format!("unknown flags: {:#x}", flags),
            });
        }
        let payload_len = u32::from_be_bytes([buf[8], buf[9], buf[10], buf[11]]) as usize;
        let crc_expected = u32::from_be_bytes([buf[12], buf[13], buf[14], buf[15]]);

        if payload_len > MAX_RECORD_SIZE {
            return Err(WalError::FrameTooLarge {
                size: payload_len,
                max: MAX_RECORD_SIZE,
            });
        }

        if buf.len() < RECORD_HEADER_SIZE + payload_len {
            return Ok(None);
        }

        // Validate before consuming so a scanner can resynchronize byte by byte.
        let crc_actual = crc32c::crc32c(&buf[RECORD_HEADER_SIZE..RECORD_HEADER_SIZE + payload_len]);
        if crc_actual != crc_expected {
            return Err(WalError::ChecksumMismatch {
                offset,
                expected: crc_expected,
                actual: crc_actual,
            });
        }

        buf.advance(RECORD_HEADER_SIZE);
        let payload = buf.split_to(payload_len).freeze();

        Ok(Some(Self {
            header: RecordHeader {
                flags,
                payload_len: payload_len as u32,
                crc32c: crc_expected,
            },
            payload,
        }))
    }

    /// Returns the total size of this frame on disk.
    pub fn disk_size(&self) -> usize {
        RECORD_HEADER_SIZE + self.payload.len()
    }
}
