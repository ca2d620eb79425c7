//! Record model and payload encoding.
//!
//! A record is written as up to two payloads, each one engine append:
//!
//! ```text
//! series:  type=1 | uvarint-str user_id | { be64 ref | uvarint n_labels | { uvarint-str name | uvarint-str value }* }*
//! entries: type=2|3 | uvarint-str user_id | be64 first_ts | { be64 ref | [v2: be64 counter] | uvarint n | { varint ts-first | uvarint-str line }* }*
//! ```
//!
//! Timestamps are Unix nanoseconds. Entry timestamps are stored as deltas
//! from the first entry of the first non-empty group.

use crate::error::CodecError;
use bytes::{Buf, BufMut};
use chrono::{DateTime, TimeZone, Utc};
use std::collections::HashMap;

/// Type byte leading every payload.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum RecordType {
    Series = 1,
    EntriesV1 = 2,
    EntriesV2 = 3,
}

impl TryFrom<u8> for RecordType {
    type Error = CodecError;

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        match value {
            1 => Ok(RecordType::Series),
            2 => Ok(RecordType::EntriesV1),
            3 => Ok(RecordType::EntriesV2),
            other => Err(CodecError::UnknownRecordType(other)),
        }
    }
}

/// Layout of the entries payload.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EntriesVersion {
    /// Entries without stream counters.
    V1,
    /// Entries with the highest stream counter per group.
    V2,
}

impl EntriesVersion {
    pub fn record_type(self) -> RecordType {
        match self {
            EntriesVersion::V1 => RecordType::EntriesV1,
            EntriesVersion::V2 => RecordType::EntriesV2,
        }
    }
}

/// Entries format written by the client.
pub const CURRENT_ENTRIES_VERSION: EntriesVersion = EntriesVersion::V2;

/// One label of a stream.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Label {
    pub name: String,
    pub value: String,
}

impl Label {
    pub fn new(name: impl Into<String>, value: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            value: value.into(),
        }
    }
}

/// Stream identity plus the reference id its entries are logged under.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Series {
    pub ref_id: u64,
    pub labels: Vec<Label>,
}

/// One timestamped log line.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Entry {
    pub timestamp: DateTime<Utc>,
    pub line: String,
}

impl Entry {
    pub fn new(timestamp: DateTime<Utc>, line: impl Into<String>) -> Self {
        Self {
            timestamp,
            line: line.into(),
        }
    }
}

/// Entries of one stream, keyed by the series reference id.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RefEntries {
    pub ref_id: u64,
    /// Highest entry counter seen for the stream.
    pub counter: i64,
    pub entries: Vec<Entry>,
}

/// A batch of series and entries for one tenant.
#[derive(Debug, Default)]
pub struct Record {
    pub(crate) user_id: String,
    pub(crate) series: Vec<Series>,
    pub(crate) ref_entries: Vec<RefEntries>,
    /// ref id -> index into `ref_entries`.
    entry_index: HashMap<u64, usize>,
}

impl Record {
    pub fn new(user_id: impl Into<String>) -> Self {
        Self {
            user_id: user_id.into(),
            ..Self::default()
        }
    }

    pub fn user_id(&self) -> &str {
        &self.user_id
    }

    /// Replaces the tenant id, reusing the existing allocation.
    pub fn set_user_id(&mut self, user_id: &str) {
        self.user_id.clear();
        self.user_id.push_str(user_id);
    }

    pub fn series(&self) -> &[Series] {
        &self.series
    }

    pub fn ref_entries(&self) -> &[RefEntries] {
        &self.ref_entries
    }

    pub fn add_series(&mut self, series: Series) {
        self.series.push(series);
    }

    /// Adds entries for a stream. Entries for a ref already present are
    /// appended to its group and the group counter is replaced.
    pub fn add_entries(&mut self, ref_id: u64, counter: i64, entries: Vec<Entry>) {
        if let Some(&idx) = self.entry_index.get(&ref_id) {
            let group = &mut self.ref_entries[idx];
            group.entries.extend(entries);
            group.counter = counter;
            return;
        }
        self.entry_index.insert(ref_id, self.ref_entries.len());
        self.ref_entries.push(RefEntries {
            ref_id,
            counter,
            entries,
        });
    }

    /// Returns whether the record has neither series nor entry groups.
    pub fn is_empty(&self) -> bool {
        self.series.is_empty() && self.ref_entries.is_empty()
    }

    /// Total number of entries across all groups.
    pub fn entry_count(&self) -> usize {
        self.ref_entries.iter().map(|g| g.entries.len()).sum()
    }

    /// Clears all contents, keeping allocated capacity.
    pub fn reset(&mut self) {
        self.user_id.clear();
        self.series.clear();
        self.ref_entries.clear();
        self.entry_index.clear();
    }

    /// Moves the entry vectors out of every group and resets the record.
    pub(crate) fn take_entry_buffers(&mut self) -> Vec<Vec<Entry>> {
        let buffers = self.ref_entries.drain(..).map(|g| g.entries).collect();
        self.reset();
        buffers
    }

    /// Appends the series payload to `buf`.
    pub fn encode_series(&self, buf: &mut Vec<u8>) {
        buf.put_u8(RecordType::Series as u8);
        put_uvarint_str(buf, &self.user_id);
        for series in &self.series {
            buf.put_u64(series.ref_id);
            put_uvarint(buf, series.labels.len() as u64);
            for label in &series.labels {
                put_uvarint_str(buf, &label.name);
                put_uvarint_str(buf, &label.value);
            }
        }
    }

    /// Appends the entries payload to `buf`. Groups without entries are skipped.
    pub fn encode_entries(&self, version: EntriesVersion, buf: &mut Vec<u8>) {
        buf.put_u8(version.record_type() as u8);
        put_uvarint_str(buf, &self.user_id);

        let first = self
            .ref_entries
            .iter()
            .find_map(|g| g.entries.first())
            .map_or(0, |e| unix_nanos(&e.timestamp));
        buf.put_i64(first);

        for group in self.ref_entries.iter().filter(|g| !g.entries.is_empty()) {
            buf.put_u64(group.ref_id);
            if version == EntriesVersion::V2 {
                buf.put_i64(group.counter);
            }
            put_uvarint(buf, group.entries.len() as u64);
            for entry in &group.entries {
                put_varint(buf, unix_nanos(&entry.timestamp).wrapping_sub(first));
                put_uvarint_str(buf, &entry.line);
            }
        }
    }

    /// Decodes one payload produced by `encode_series` or `encode_entries`.
    pub fn decode(payload: &[u8]) -> Result<(RecordType, Record), CodecError> {
        if payload.is_empty() {
            return Err(CodecError::Empty);
        }

        let mut dec = Decoder { buf: payload };
        let record_type = RecordType::try_from(dec.byte("record type")?)?;
        let mut record = Record::new(dec.uvarint_str("user id")?);

        match record_type {
            RecordType::Series => {
                while dec.has_remaining() {
                    let ref_id = dec.be64("series ref")?;
                    let count = dec.uvarint("label count")?;
                    let mut labels = Vec::with_capacity(dec.bounded(count));
                    for _ in 0..count {
                        let name = dec.uvarint_str("label name")?;
                        let value = dec.uvarint_str("label value")?;
                        labels.push(Label { name, value });
                    }
                    record.add_series(Series { ref_id, labels });
                }
            }
            RecordType::EntriesV1 | RecordType::EntriesV2 => {
                let first = dec.be64("first timestamp")? as i64;
                while dec.has_remaining() {
                    let ref_id = dec.be64("entries ref")?;
                    let counter = if record_type == RecordType::EntriesV2 {
                        dec.be64("entries counter")? as i64
                    } else {
                        0
                    };
                    let count = dec.uvarint("entry count")?;
                    let mut entries = Vec::with_capacity(dec.bounded(count));
                    for _ in 0..count {
                        let delta = dec.varint("entry timestamp")?;
                        let line = dec.uvarint_str("entry line")?;
                        let timestamp = Utc.timestamp_nanos(first.wrapping_add(delta));
                        entries.push(Entry { timestamp, line });
                    }
                    record.add_entries(ref_id, counter, entries);
                }
            }
        }

        Ok((record_type, record))
    }
}

/// Unix nanoseconds, clamped to the i64 range (years 1677 to 2262).
fn unix_nanos(ts: &DateTime<Utc>) -> i64 {
    ts.timestamp_nanos_opt()
        .unwrap_or(if ts.timestamp() < 0 { i64::MIN } else { i64::MAX })
}

fn put_uvarint(buf: &mut Vec<u8>, mut value: u64) {
    while value >= 0x80 {
        buf.put_u8((value as u8 & 0x7F) | 0x80);
        value >>= 7;
    }
    buf.put_u8(value as u8);
}

/// Zigzag-encoded signed varint.
fn put_varint(buf: &mut Vec<u8>, value: i64) {
    put_uvarint(buf, ((value << 1) ^ (value >> 63)) as u64);
}

fn put_uvarint_str(buf: &mut Vec<u8>, s: &str) {
    put_uvarint(buf, s.len() as u64);
    buf.put_slice(s.as_bytes());
}

struct Decoder<'a> {
    buf: &'a [u8],
}

impl Decoder<'_> {
    fn has_remaining(&self) -> bool {
        self.buf.has_remaining()
    }

    /// Caps a decoded element count by the bytes left, for preallocation.
    fn bounded(&self, count: u64) -> usize {
        usize::try_from(count).map_or(self.buf.remaining(), |n| n.min(self.buf.remaining()))
    }

    fn byte(&mut self, what: &'static str) -> Result<u8, CodecError> {
        if self.buf.remaining() < 1 {
            return Err(CodecError::Truncated(what));
        }
        Ok(self.buf.get_u8())
    }

    fn be64(&mut self, what: &'static str) -> Result<u64, CodecError> {
        if self.buf.remaining() < 8 {
            return Err(CodecError::Truncated(what));
        }
        Ok(self.buf.get_u64())
    }

    fn uvarint(&mut self, what: &'static str) -> Result<u64, CodecError> {
        let mut value = 0u64;
        let mut shift = 0u32;
        loop {
            let byte = self.byte(what)?;
            if shift == 63 && byte > 1 {
                return Err(CodecError::VarintOverflow);
            }
            value |= u64::from(byte & 0x7F) << shift;
            if byte & 0x80 == 0 {
                return Ok(value);
            }
            shift += 7;
        }
    }

    fn varint(&mut self, what: &'static str) -> Result<i64, CodecError> {
        let raw = self.uvarint(what)?;
        Ok(((raw >> 1) as i64) ^ -((raw & 1) as i64))
    }

    fn uvarint_str(&mut self, what: &'static str) -> Result<String, CodecError> {
        let len = usize::try_from(self.uvarint(what)?).map_err(|_| CodecError::Truncated(what))?;
        if self.buf.remaining() < len {
            return Err(CodecError::Truncated(what));
        }
        let (head, tail) = self.buf.split_at(len);
        self.buf = tail;
        String::from_utf8(head.to_vec()).map_err(|_| CodecError::InvalidUtf8(what))
    }
}
