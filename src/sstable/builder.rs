//! Table builder — streams sorted entries into the SSTable layout.
//!
//! The builder cuts a data block whenever the in-progress block reaches
//! the configured size, recording one index entry per finished block.
//! Index keys are *shortened separators*: the shortest user key that
//! still sorts at or above everything in the closed block and below
//! everything that follows, which keeps the index block small without
//! changing seek results.
//!
//! `finish` flushes the tail block, writes the index block and footer,
//! and syncs the file before closing it.

use std::fs::{File, OpenOptions};
use std::io::{BufWriter, Write};
use std::path::Path;

use tracing::trace;

use crate::keys::{MAX_SEQUENCE, ValueType, internal_key, internal_key_cmp, user_key_of};

use super::block::BlockBuilder;
use super::{BlockHandle, Footer, TableError};

/// Streams strictly increasing internal keys into a new table file.
pub struct TableBuilder {
    writer: BufWriter<File>,
    /// Bytes written (and block-flushed) so far.
    offset: u64,
    data_block: BlockBuilder,
    index_block: BlockBuilder,
    block_size: usize,
    /// Handle of the last flushed data block, awaiting its index entry.
    ///
    /// The entry is deferred until the next key arrives so the
    /// separator can be shortened against it.
    pending_index: Option<BlockHandle>,
    last_key: Vec<u8>,
    num_entries: u64,
}

impl TableBuilder {
    /// Creates a builder writing to a fresh file at `path`.
    pub fn new<P: AsRef<Path>>(
        path: P,
        block_size: usize,
        restart_interval: usize,
    ) -> Result<Self, TableError> {
        let file = OpenOptions::new()
            .create(true)
            .write(true)
            .truncate(true)
            .open(path)?;
        Ok(Self {
            writer: BufWriter::new(file),
            offset: 0,
            data_block: BlockBuilder::new(restart_interval),
            // Index entries are rare and always sought exactly; store
            // every key whole.
            index_block: BlockBuilder::new(1),
            block_size,
            pending_index: None,
            last_key: Vec::new(),
            num_entries: 0,
        })
    }

    /// Appends one entry; keys must be strictly increasing under
    /// internal-key order.
    pub fn add(&mut self, key: &[u8], value: &[u8]) -> Result<(), TableError> {
        if self.num_entries > 0 && !internal_key_cmp(&self.last_key, key).is_lt() {
            return Err(TableError::OutOfOrder);
        }

        if let Some(handle) = self.pending_index.take() {
            let separator = shortest_separator(&self.last_key, key);
            self.index_block.add(&separator, &handle.encode());
        }

        self.data_block.add(key, value);
        self.last_key.clear();
        self.last_key.extend_from_slice(key);
        self.num_entries += 1;

        if self.data_block.current_size_estimate() >= self.block_size {
            self.flush_data_block()?;
        }
        Ok(())
    }

    /// Flushes remaining state, writes index and footer, syncs, and
    /// returns the final file size.
    pub fn finish(mut self) -> Result<u64, TableError> {
        self.flush_data_block()?;

        if let Some(handle) = self.pending_index.take() {
            // No successor key exists to shorten against; the last key
            // itself is a valid separator.
            let last = std::mem::take(&mut self.last_key);
            self.index_block.add(&last, &handle.encode());
        }

        let index_contents = self.index_block.finish();
        let index_handle = BlockHandle {
            offset: self.offset,
            size: index_contents.len() as u64,
        };
        self.writer.write_all(&index_contents)?;
        self.offset += index_contents.len() as u64;

        let footer = Footer {
            meta_index: BlockHandle { offset: 0, size: 0 },
            index: index_handle,
        };
        self.writer.write_all(&footer.encode())?;
        self.offset += super::FOOTER_SIZE as u64;

        self.writer.flush()?;
        self.writer.get_ref().sync_all()?;

        trace!(
            entries = self.num_entries,
            bytes = self.offset,
            "table build finished"
        );
        Ok(self.offset)
    }

    /// Bytes flushed to the file so far; compaction rotates output
    /// files on this figure.
    pub fn file_size(&self) -> u64 {
        self.offset
    }

    /// Number of entries added so far.
    pub fn num_entries(&self) -> u64 {
        self.num_entries
    }

    fn flush_data_block(&mut self) -> Result<(), TableError> {
        if self.data_block.is_empty() {
            return Ok(());
        }
        let contents = self.data_block.finish();
        let handle = BlockHandle {
            offset: self.offset,
            size: contents.len() as u64,
        };
        self.writer.write_all(&contents)?;
        self.offset += contents.len() as u64;
        self.data_block.reset();
        self.pending_index = Some(handle);
        Ok(())
    }
}

/// Shortest internal key `s` with `a ≤ s < b` (by internal-key order).
///
/// When the user keys allow it, the separator is a one-byte-incremented
/// prefix of `a`'s user key tagged with the maximal sequence, so it
/// sorts at or above every version of that user key. When no shortening
/// is possible, `a` itself is returned.
fn shortest_separator(a: &[u8], b: &[u8]) -> Vec<u8> {
    let a_user = user_key_of(a);
    let b_user = user_key_of(b);

    let common = a_user
        .iter()
        .zip(b_user.iter())
        .take_while(|(x, y)| x == y)
        .count();

    if common < a_user.len() && common < b_user.len() {
        let diff = a_user[common];
        if diff < 0xFF && diff + 1 < b_user[common] {
            let mut short = a_user[..=common].to_vec();
            short[common] += 1;
            let separator = internal_key(&short, MAX_SEQUENCE, ValueType::Value);
            debug_assert!(internal_key_cmp(a, &separator).is_le());
            debug_assert!(internal_key_cmp(&separator, b).is_lt());
            return separator;
        }
    }
    a.to_vec()
}
