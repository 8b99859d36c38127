//! In-memory write buffer.
//!
//! The memtable wraps the [`SkipList`] with the engine's key encoding
//! and a running byte counter. Every mutation that lands here has
//! already been appended to the write-ahead log identified by
//! [`Memtable::log_number`]; that log is the memtable's durable twin
//! and is deleted only after a successful flush makes the level-0 file
//! visible.
//!
//! ## Lifecycle
//!
//! `Mutable → Immutable → flushed (dropped)`. The orchestrator swaps a
//! full mutable memtable into the immutable slot atomically with the
//! creation of its successor; the background task flushes the immutable
//! one into a level-0 SSTable.
//!
//! ## Reads
//!
//! [`Memtable::get`] seeks the skiplist with a snapshot-bounded
//! [`LookupKey`]: versions newer than the snapshot sort before the
//! lookup key and are skipped naturally by the seek.

#[cfg(test)]
mod tests;

use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};

use crate::iter::KvIter;
use crate::keys::{
    LookupKey, ValueType, encoded_entry_len, internal_key, user_key_of, value_type_of,
};
use crate::skiplist::SkipList;

/// Result of a memtable point lookup.
#[derive(Debug, PartialEq, Eq)]
pub enum MemGet {
    /// The key's newest visible version is a live value.
    Found(Vec<u8>),
    /// The key's newest visible version is a tombstone.
    Deleted,
    /// The memtable holds no version of the key at or below the snapshot.
    NotFound,
}

/// Ordered in-memory buffer of recent mutations.
pub struct Memtable {
    table: SkipList,
    /// Sum of the encoded sizes of every inserted entry.
    usage: AtomicUsize,
    /// File number of the WAL backing this memtable.
    log_number: u64,
}

impl Memtable {
    /// Creates an empty memtable bound to WAL file `log_number`.
    pub fn new(log_number: u64) -> Self {
        Self {
            table: SkipList::new(),
            usage: AtomicUsize::new(0),
            log_number,
        }
    }

    /// Inserts one mutation.
    ///
    /// The caller has already made the mutation durable in the WAL;
    /// ordering across concurrent readers is provided by the skiplist.
    pub fn add(&self, seq: u64, vtype: ValueType, user_key: &[u8], value: &[u8]) {
        let key = internal_key(user_key, seq, vtype);
        self.table.insert(key, value.to_vec());
        self.usage
            .fetch_add(encoded_entry_len(user_key, value), Ordering::Relaxed);
    }

    /// Looks up the newest version of a key at the lookup key's snapshot.
    pub fn get(&self, lookup: &LookupKey) -> MemGet {
        let Some(pos) = self.table.seek(lookup.internal_key()) else {
            return MemGet::NotFound;
        };
        let (found_key, value) = self.table.entry(pos);
        if user_key_of(&found_key) != lookup.user_key() {
            return MemGet::NotFound;
        }
        match value_type_of(&found_key) {
            ValueType::Value => MemGet::Found(value),
            ValueType::Deletion => MemGet::Deleted,
        }
    }

    /// Approximate bytes of encoded entries held by this memtable.
    pub fn approximate_memory_usage(&self) -> usize {
        self.usage.load(Ordering::Relaxed)
    }

    /// File number of the WAL that backs this memtable.
    pub fn log_number(&self) -> u64 {
        self.log_number
    }

    /// True when no entry has ever been inserted.
    pub fn is_empty(&self) -> bool {
        self.table.is_empty()
    }

    /// Number of stored entries (every version counts).
    pub fn len(&self) -> usize {
        self.table.len()
    }

    /// The underlying ordered index, for iterator construction.
    pub(crate) fn table(&self) -> &SkipList {
        &self.table
    }
}

// ------------------------------------------------------------------------------------------------
// MemtableIter
// ------------------------------------------------------------------------------------------------

/// Sorted cursor over a memtable.
///
/// Holds a skiplist position across calls; each step re-reads the list
/// under its reader lock and caches the entry, so concurrent inserts
/// never invalidate the cursor.
pub struct MemtableIter {
    mem: Arc<Memtable>,
    pos: Option<u32>,
    key: Vec<u8>,
    value: Vec<u8>,
}

impl MemtableIter {
    /// Creates a cursor sharing ownership of `mem`, so it stays usable
    /// after the orchestrator drops its own handle.
    pub fn new(mem: Arc<Memtable>) -> Self {
        Self {
            mem,
            pos: None,
            key: Vec::new(),
            value: Vec::new(),
        }
    }

    fn load(&mut self) {
        if let Some(pos) = self.pos {
            let (key, value) = self.mem.table().entry(pos);
            self.key = key;
            self.value = value;
        }
    }
}

impl KvIter for MemtableIter {
    fn valid(&self) -> bool {
        self.pos.is_some()
    }

    fn seek_to_first(&mut self) {
        self.pos = self.mem.table().first();
        self.load();
    }

    fn seek(&mut self, target: &[u8]) {
        self.pos = self.mem.table().seek(target);
        self.load();
    }

    fn next(&mut self) {
        self.pos = self.pos.and_then(|pos| self.mem.table().next_after(pos));
        self.load();
    }

    fn key(&self) -> &[u8] {
        debug_assert!(self.pos.is_some());
        &self.key
    }

    fn value(&self) -> &[u8] {
        debug_assert!(self.pos.is_some());
        &self.value
    }
}
