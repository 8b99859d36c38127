//! Whole-table cursor.
//!
//! [`TableIter`] walks the index block and, for each index entry, the
//! data block it points at — a classic two-level iterator. It owns an
//! `Arc` to its table, so a live iterator keeps the mapped file open
//! even after the table cache drops its handle.

use std::sync::Arc;

use crate::iter::KvIter;

use super::block::BlockIter;
use super::{BlockHandle, Table};

/// Sorted cursor over every entry of one table.
pub struct TableIter {
    table: Arc<Table>,
    index_iter: BlockIter,
    data_iter: Option<BlockIter>,
}

impl TableIter {
    /// Creates a cursor over `table`; position is undefined until the
    /// first seek.
    pub fn new(table: Arc<Table>) -> Self {
        let index_iter = table.index_block().iter();
        Self {
            table,
            index_iter,
            data_iter: None,
        }
    }

    /// Loads the data block the index cursor currently points at.
    ///
    /// A block that fails to decode invalidates the cursor; the table
    /// was damaged after it was written and sealed.
    fn load_data_block(&mut self) {
        self.data_iter = None;
        if !self.index_iter.valid() {
            return;
        }
        let Ok(handle) = BlockHandle::decode(self.index_iter.value()) else {
            return;
        };
        if let Ok(block) = self.table.read_block(handle) {
            self.data_iter = Some(block.iter());
        }
    }

    /// Steps forward through data blocks until the cursor is valid or
    /// the index is exhausted.
    fn skip_empty_blocks(&mut self) {
        while !self.data_iter.as_ref().is_some_and(BlockIter::valid) {
            if !self.index_iter.valid() {
                self.data_iter = None;
                return;
            }
            self.index_iter.next();
            self.load_data_block();
            if let Some(data) = self.data_iter.as_mut() {
                data.seek_to_first();
            }
        }
    }
}

impl KvIter for TableIter {
    fn valid(&self) -> bool {
        self.data_iter.as_ref().is_some_and(BlockIter::valid)
    }

    fn seek_to_first(&mut self) {
        self.index_iter.seek_to_first();
        self.load_data_block();
        if let Some(data) = self.data_iter.as_mut() {
            data.seek_to_first();
        }
        self.skip_empty_blocks();
    }

    fn seek(&mut self, target: &[u8]) {
        self.index_iter.seek(target);
        self.load_data_block();
        if let Some(data) = self.data_iter.as_mut() {
            data.seek(target);
        }
        self.skip_empty_blocks();
    }

    fn next(&mut self) {
        if let Some(data) = self.data_iter.as_mut() {
            data.next();
        }
        self.skip_empty_blocks();
    }

    fn key(&self) -> &[u8] {
        self.data_iter
            .as_ref()
            .expect("key() on invalid iterator")
            .key()
    }

    fn value(&self) -> &[u8] {
        self.data_iter
            .as_ref()
            .expect("value() on invalid iterator")
            .value()
    }
}
