//! The merging, de-duplicating iterator tower.
//!
//! Every ordered data source in the engine — memtable, single table,
//! level concatenation — speaks one small capability set, [`KvIter`].
//! The tower composes them:
//!
//! ```text
//! DedupIter                 one live version per user key
//!   └─ MergeIter            k-way merge by internal-key order
//!        ├─ MemtableIter    mutable memtable
//!        ├─ MemtableIter    immutable memtable
//!        ├─ TableIter…      level-0 files (parallel, may overlap)
//!        └─ LevelIter…      one per level ≥ 1 (sorted, disjoint)
//! ```
//!
//! The same tower serves scans (over memtables plus every level) and
//! compaction (over the selected input files): both need a single
//! sorted stream in which the newest version of each user key arrives
//! first.

#[cfg(test)]
mod tests;

use std::sync::Arc;

use crate::keys::{ValueType, internal_key_cmp, user_key_of, value_type_of};
use crate::sstable::{Table, TableIter};
use crate::version::FileMetaData;

// ------------------------------------------------------------------------------------------------
// KvIter — the shared iterator capability set
// ------------------------------------------------------------------------------------------------

/// Cursor over a sorted stream of internal-key / value entries.
///
/// `key` and `value` may only be called while `valid` returns true.
pub trait KvIter {
    /// True when positioned on an entry.
    fn valid(&self) -> bool;
    /// Positions on the smallest entry.
    fn seek_to_first(&mut self);
    /// Positions on the first entry whose internal key is ≥ `target`.
    fn seek(&mut self, target: &[u8]);
    /// Advances to the next entry.
    fn next(&mut self);
    /// Internal key of the current entry.
    fn key(&self) -> &[u8];
    /// Value of the current entry.
    fn value(&self) -> &[u8];
}

/// Boxed iterator used at the scan and compaction entry points.
pub type BoxedIter = Box<dyn KvIter + Send>;

// ------------------------------------------------------------------------------------------------
// LevelIter — concatenation of one level's disjoint files
// ------------------------------------------------------------------------------------------------

/// Presents an ordered list of non-overlapping tables as one stream.
///
/// Seeks binary-search the file metadata to find the single candidate
/// file, then delegate to that table's cursor.
pub struct LevelIter {
    files: Vec<(FileMetaData, Arc<Table>)>,
    current: usize,
    iter: Option<TableIter>,
}

impl LevelIter {
    /// Builds a level cursor; `files` must be sorted by smallest key
    /// with pairwise-disjoint ranges.
    pub fn new(files: Vec<(FileMetaData, Arc<Table>)>) -> Self {
        Self {
            files,
            current: 0,
            iter: None,
        }
    }

    fn open_file(&mut self, index: usize) {
        self.current = index;
        self.iter = self
            .files
            .get(index)
            .map(|(_, table)| TableIter::new(Arc::clone(table)));
    }

    /// Advances across files until the cursor is valid or exhausted.
    fn skip_exhausted_files(&mut self) {
        while !self.iter.as_ref().is_some_and(TableIter::valid) {
            if self.current + 1 >= self.files.len() {
                self.iter = None;
                return;
            }
            self.open_file(self.current + 1);
            if let Some(iter) = self.iter.as_mut() {
                iter.seek_to_first();
            }
        }
    }
}

impl KvIter for LevelIter {
    fn valid(&self) -> bool {
        self.iter.as_ref().is_some_and(TableIter::valid)
    }

    fn seek_to_first(&mut self) {
        if self.files.is_empty() {
            self.iter = None;
            return;
        }
        self.open_file(0);
        if let Some(iter) = self.iter.as_mut() {
            iter.seek_to_first();
        }
        self.skip_exhausted_files();
    }

    fn seek(&mut self, target: &[u8]) {
        // First file whose largest key admits the target.
        let index = self
            .files
            .partition_point(|(meta, _)| internal_key_cmp(&meta.largest, target).is_lt());
        if index >= self.files.len() {
            self.iter = None;
            return;
        }
        self.open_file(index);
        if let Some(iter) = self.iter.as_mut() {
            iter.seek(target);
        }
        self.skip_exhausted_files();
    }

    fn next(&mut self) {
        if let Some(iter) = self.iter.as_mut() {
            iter.next();
        }
        self.skip_exhausted_files();
    }

    fn key(&self) -> &[u8] {
        self.iter.as_ref().expect("key() on invalid iterator").key()
    }

    fn value(&self) -> &[u8] {
        self.iter
            .as_ref()
            .expect("value() on invalid iterator")
            .value()
    }
}

// ------------------------------------------------------------------------------------------------
// MergeIter — k-way merge
// ------------------------------------------------------------------------------------------------

/// Merges child cursors into one stream sorted by internal-key order.
///
/// Each step linearly scans the children for the smallest current key;
/// with the handful of children a scan or compaction produces, the
/// scan beats heap bookkeeping.
pub struct MergeIter {
    children: Vec<BoxedIter>,
    current: Option<usize>,
}

impl MergeIter {
    /// Builds a merge cursor over `children`; position is undefined
    /// until the first seek.
    pub fn new(children: Vec<BoxedIter>) -> Self {
        Self {
            children,
            current: None,
        }
    }

    fn find_smallest(&mut self) {
        let mut smallest: Option<usize> = None;
        for (idx, child) in self.children.iter().enumerate() {
            if !child.valid() {
                continue;
            }
            smallest = match smallest {
                None => Some(idx),
                Some(best) => {
                    if internal_key_cmp(child.key(), self.children[best].key()).is_lt() {
                        Some(idx)
                    } else {
                        Some(best)
                    }
                }
            };
        }
        self.current = smallest;
    }
}

impl KvIter for MergeIter {
    fn valid(&self) -> bool {
        self.current.is_some()
    }

    fn seek_to_first(&mut self) {
        for child in &mut self.children {
            child.seek_to_first();
        }
        self.find_smallest();
    }

    fn seek(&mut self, target: &[u8]) {
        for child in &mut self.children {
            child.seek(target);
        }
        self.find_smallest();
    }

    fn next(&mut self) {
        if let Some(current) = self.current {
            self.children[current].next();
            self.find_smallest();
        }
    }

    fn key(&self) -> &[u8] {
        self.children[self.current.expect("key() on invalid iterator")].key()
    }

    fn value(&self) -> &[u8] {
        self.children[self.current.expect("value() on invalid iterator")].value()
    }
}

// ------------------------------------------------------------------------------------------------
// DedupIter — one live version per user key
// ------------------------------------------------------------------------------------------------

/// Filters a merged stream down to visible entries.
///
/// For each maximal run of entries sharing a user key, only the first —
/// the newest version — survives; when that first entry is a tombstone
/// the whole run is suppressed. The output therefore contains each live
/// user key exactly once and no deleted keys.
pub struct DedupIter<I: KvIter> {
    inner: I,
    /// User key of the run currently being consumed or suppressed.
    handled: Option<Vec<u8>>,
}

impl<I: KvIter> DedupIter<I> {
    /// Wraps a sorted (merge) cursor.
    pub fn new(inner: I) -> Self {
        Self {
            inner,
            handled: None,
        }
    }

    /// Advances `inner` until it rests on the newest live version of a
    /// not-yet-handled user key, or exhausts.
    fn settle(&mut self) {
        while self.inner.valid() {
            let user_key = user_key_of(self.inner.key());
            if self.handled.as_deref() == Some(user_key) {
                // Older version of a key already emitted or suppressed.
                self.inner.next();
                continue;
            }
            self.handled = Some(user_key.to_vec());
            if value_type_of(self.inner.key()) == ValueType::Deletion {
                // Tombstone heads the run: suppress it and everything
                // older under the same user key.
                self.inner.next();
                continue;
            }
            return;
        }
    }
}

impl<I: KvIter> KvIter for DedupIter<I> {
    fn valid(&self) -> bool {
        self.inner.valid()
    }

    fn seek_to_first(&mut self) {
        self.inner.seek_to_first();
        self.handled = None;
        self.settle();
    }

    fn seek(&mut self, target: &[u8]) {
        self.inner.seek(target);
        self.handled = None;
        self.settle();
    }

    fn next(&mut self) {
        if self.inner.valid() {
            self.inner.next();
            self.settle();
        }
    }

    fn key(&self) -> &[u8] {
        self.inner.key()
    }

    fn value(&self) -> &[u8] {
        self.inner.value()
    }
}
