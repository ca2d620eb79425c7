//! Recycling pool for the write path.
//!
//! `ClientWal::log` and the code assembling records borrow their scratch
//! containers from here, so a warmed-up client writes without allocating.
//! `Vec::clear` keeps the allocated capacity, which is what makes reuse pay.
//!
//! Each free list is unbounded and lock-protected; which released instance
//! a `get_*` call receives is unspecified.

use crate::record::{Entry, Record};
use parking_lot::Mutex;

/// Initial capacity of freshly allocated entry vectors.
pub const ENTRIES_CAPACITY: usize = 512;

/// Initial capacity of freshly allocated byte buffers (1 KiB).
pub const BYTES_CAPACITY: usize = 1 << 10;

struct FreeList<T> {
    items: Mutex<Vec<T>>,
    alloc: fn() -> T,
}

impl<T> FreeList<T> {
    fn new(alloc: fn() -> T) -> Self {
        Self {
            items: Mutex::new(Vec::new()),
            alloc,
        }
    }

    fn get(&self) -> T {
        let reused = self.items.lock().pop();
        reused.unwrap_or_else(self.alloc)
    }

    fn put(&self, item: T) {
        self.items.lock().push(item);
    }

    fn len(&self) -> usize {
        self.items.lock().len()
    }
}

/// Number of idle instances per free list.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PoolStats {
    pub records: usize,
    pub entries: usize,
    pub bytes: usize,
}

/// Pool of records, entry vectors and byte buffers.
///
/// Construct one per process (or per test) and share it behind an `Arc`.
pub struct RecordPool {
    records: FreeList<Record>,
    entries: FreeList<Vec<Entry>>,
    bytes: FreeList<Vec<u8>>,
}

impl Default for RecordPool {
    fn default() -> Self {
        Self::new()
    }
}

impl RecordPool {
    pub fn new() -> Self {
        Self {
            records: FreeList::new(Record::default),
            entries: FreeList::new(|| Vec::with_capacity(ENTRIES_CAPACITY)),
            bytes: FreeList::new(|| Vec::with_capacity(BYTES_CAPACITY)),
        }
    }

    /// Returns an empty record.
    pub fn get_record(&self) -> Record {
        let mut record = self.records.get();
        record.reset();
        record
    }

    /// Returns a record to the pool. Its entry vectors go back to the
    /// entries free list.
    pub fn put_record(&self, mut record: Record) {
        for entries in record.take_entry_buffers() {
            self.put_entries(entries);
        }
        self.records.put(record);
    }

    /// Returns an empty entry vector.
    pub fn get_entries(&self) -> Vec<Entry> {
        let mut entries = self.entries.get();
        entries.clear();
        entries
    }

    pub fn put_entries(&self, mut entries: Vec<Entry>) {
        entries.clear();
        self.entries.put(entries);
    }

    /// Returns an empty byte buffer.
    pub fn get_bytes(&self) -> Vec<u8> {
        let mut buf = self.bytes.get();
        buf.clear();
        buf
    }

    pub fn put_bytes(&self, mut buf: Vec<u8>) {
        buf.clear();
        self.bytes.put(buf);
    }

    pub fn stats(&self) -> PoolStats {
        PoolStats {
            records: self.records.len(),
            entries: self.entries.len(),
            bytes: self.bytes.len(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::record::{Label, Series};
    use chrono::Utc;
    use std::collections::HashSet;
    use std::sync::Arc;

    #[test]
    fn test_fresh_buffers() {
        let pool = RecordPool::new();
        let bytes = pool.get_bytes();
        let entries = pool.get_entries();
        assert!(bytes.is_empty());
        assert_eq!(bytes.capacity(), BYTES_CAPACITY);
        assert!(entries.is_empty());
        assert_eq!(entries.capacity(), ENTRIES_CAPACITY);
        assert_eq!(pool.stats(), PoolStats::default());
    }

    #[test]
    fn test_bytes_round_trip_reuses_allocation() {
        let pool = RecordPool::new();
        let mut buf = pool.get_bytes();
        buf.extend_from_slice(&[7u8; 4000]);
        let ptr = buf.as_ptr();
        let capacity = buf.capacity();

        pool.put_bytes(buf);
        assert_eq!(pool.stats().bytes, 1);

        let buf = pool.get_bytes();
        assert!(buf.is_empty());
        assert_eq!(buf.capacity(), capacity);
        assert_eq!(buf.as_ptr(), ptr);
        assert_eq!(pool.stats().bytes, 0);
    }

    #[test]
    fn test_entries_round_trip_reuses_allocation() {
        let pool = RecordPool::new();
        let mut entries = pool.get_entries();
        entries.push(Entry::new(Utc::now(), "line"));
        let ptr = entries.as_ptr();

        pool.put_entries(entries);
        let entries = pool.get_entries();
        assert!(entries.is_empty());
        assert_eq!(entries.capacity(), ENTRIES_CAPACITY);
        assert_eq!(entries.as_ptr(), ptr);
    }

    #[test]
    fn test_record_round_trip() {
        let pool = RecordPool::new();
        let mut record = pool.get_record();
        record.set_user_id("tenant");
        record.add_series(Series {
            ref_id: 1,
            labels: vec![Label::new("job", "a")],
        });
        let mut entries = pool.get_entries();
        entries.push(Entry::new(Utc::now(), "x"));
        record.add_entries(1, 1, entries);
        let mut entries = pool.get_entries();
        entries.push(Entry::new(Utc::now(), "y"));
        record.add_entries(2, 1, entries);

        pool.put_record(record);
        assert_eq!(
            pool.stats(),
            PoolStats {
                records: 1,
                entries: 2,
                bytes: 0,
            }
        );

        let record = pool.get_record();
        assert!(record.is_empty());
        assert_eq!(record.user_id(), "");
        assert!(record.series.capacity() >= 1);
        assert!(record.ref_entries.capacity() >= 2);
    }

    #[test]
    fn test_concurrent_get_put() {
        let pool = Arc::new(RecordPool::new());
        let outstanding = Arc::new(Mutex::new(HashSet::new()));

        std::thread::scope(|s| {
            for worker in 0..8u8 {
                let pool = Arc::clone(&pool);
                let outstanding = Arc::clone(&outstanding);
                s.spawn(move || {
                    for round in 0..500usize {
                        let mut buf = pool.get_bytes();
                        assert!(buf.is_empty());
                        assert!(outstanding.lock().insert(buf.as_ptr() as usize));

                        buf.resize(16 + round % 64, worker);
                        std::thread::yield_now();
                        assert!(buf.iter().all(|&b| b == worker));

                        assert!(outstanding.lock().remove(&(buf.as_ptr() as usize)));
                        pool.put_bytes(buf);
                    }
                });
            }
        });

        assert!(outstanding.lock().is_empty());
        let idle = pool.stats().bytes;
        assert!((1..=8).contains(&idle), "idle buffers: {}", idle);
    }
}
