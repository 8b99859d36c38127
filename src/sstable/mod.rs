//! Sorted String Table (SSTable) reading and writing.
//!
//! An SSTable is an immutable, sorted, on-disk file of internal-key /
//! value entries. Once written it is never modified; newer versions of
//! a key live in newer files and win by sequence number during merges.
//!
//! # On-disk layout
//!
//! ```text
//! [data block]*
//! [index block]
//! [footer (32 B)]
//! ```
//!
//! - **Data blocks** — prefix-compressed entry runs with a restart
//!   trailer (see [`block`]). A block is cut when it reaches the
//!   configured block size.
//! - **Index block** — same block layout; one entry per data block
//!   whose key is a separator ≥ every key in the block and < every key
//!   in the next, and whose value is the block's
//!   `offset(8, LE) ‖ size(8, LE)` handle.
//! - **Footer** — `meta_index_offset(8) ‖ meta_index_size(8) ‖
//!   index_offset(8) ‖ index_size(8)`, all little-endian. The meta
//!   index is reserved; both of its fields are written as zero.
//!
//! # Concurrency model
//!
//! Tables are immutable, so reads are lock-free: the reader memory-maps
//! the file and every open block holds its own copy of the bytes it
//! needs. Handles are shared as `Arc<Table>`; iterators keep their
//! table alive independently of the [table cache](crate::table_cache).

pub mod block;
pub mod builder;
pub mod iterator;

#[cfg(test)]
mod tests;

pub use block::{Block, BlockBuilder, BlockIter};
pub use builder::TableBuilder;
pub use iterator::TableIter;

use std::fs::File;
use std::io;
use std::path::Path;

use memmap2::Mmap;
use thiserror::Error;

use crate::encoding::{EncodingError, get_fixed64, put_fixed64};
use crate::keys::{ValueType, user_key_of, value_type_of};

/// Encoded footer size in bytes.
pub const FOOTER_SIZE: usize = 32;

// ------------------------------------------------------------------------------------------------
// Error Types
// ------------------------------------------------------------------------------------------------

/// Errors returned by SSTable operations.
#[derive(Debug, Error)]
pub enum TableError {
    /// Underlying I/O error.
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    /// Primitive decoding failure.
    #[error("encoding error: {0}")]
    Encoding(#[from] EncodingError),

    /// The file is structurally damaged.
    #[error("table corruption: {0}")]
    Corruption(String),

    /// Keys were handed to the builder out of order.
    #[error("keys added to table builder out of order")]
    OutOfOrder,
}

// ------------------------------------------------------------------------------------------------
// BlockHandle
// ------------------------------------------------------------------------------------------------

/// Position of a block inside the table file.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BlockHandle {
    /// Byte offset of the block's first entry.
    pub offset: u64,
    /// Byte length of the block, trailer included.
    pub size: u64,
}

impl BlockHandle {
    /// Serialises as `offset(8, LE) ‖ size(8, LE)`.
    pub fn encode(&self) -> Vec<u8> {
        let mut buf = Vec::with_capacity(16);
        put_fixed64(&mut buf, self.offset);
        put_fixed64(&mut buf, self.size);
        buf
    }

    /// Decodes a 16-byte handle.
    pub fn decode(buf: &[u8]) -> Result<Self, TableError> {
        let offset = get_fixed64(buf)?;
        let size = get_fixed64(&buf[8..])?;
        Ok(Self { offset, size })
    }
}

// ------------------------------------------------------------------------------------------------
// Footer
// ------------------------------------------------------------------------------------------------

/// Fixed-size table footer; the meta-index handle is reserved space.
#[derive(Debug, Clone, Copy)]
pub(crate) struct Footer {
    pub(crate) meta_index: BlockHandle,
    pub(crate) index: BlockHandle,
}

impl Footer {
    pub(crate) fn encode(&self) -> Vec<u8> {
        let mut buf = Vec::with_capacity(FOOTER_SIZE);
        put_fixed64(&mut buf, self.meta_index.offset);
        put_fixed64(&mut buf, self.meta_index.size);
        put_fixed64(&mut buf, self.index.offset);
        put_fixed64(&mut buf, self.index.size);
        buf
    }

    pub(crate) fn decode(buf: &[u8]) -> Result<Self, TableError> {
        if buf.len() < FOOTER_SIZE {
            return Err(TableError::Corruption("footer truncated".into()));
        }
        Ok(Self {
            meta_index: BlockHandle::decode(&buf[0..16])?,
            index: BlockHandle::decode(&buf[16..32])?,
        })
    }
}

// ------------------------------------------------------------------------------------------------
// Point lookup result
// ------------------------------------------------------------------------------------------------

/// Result of a single-key probe against one table.
#[derive(Debug, PartialEq, Eq)]
pub enum TableGet {
    /// The newest version at or below the probe's snapshot is a value.
    Found(Vec<u8>),
    /// The newest version at or below the probe's snapshot is a tombstone.
    Deleted,
    /// The table holds no version of the key at or below the snapshot.
    NotFound,
}

// ------------------------------------------------------------------------------------------------
// Table — immutable reader
// ------------------------------------------------------------------------------------------------

/// A memory-mapped, immutable SSTable.
///
/// The footer and index block are decoded eagerly at `open`; data
/// blocks are materialised on demand.
pub struct Table {
    mmap: Mmap,
    index: Block,
}

impl Table {
    /// Opens and validates the table at `path`.
    ///
    /// # Safety of the mmap
    ///
    /// The map is read-only and the file is immutable by construction
    /// (tables are finished and synced before registration, and deleted
    /// only after eviction). All block boundaries are bounds-checked
    /// before slicing.
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self, TableError> {
        let file = File::open(&path)?;
        let mmap = unsafe { Mmap::map(&file)? };

        if mmap.len() < FOOTER_SIZE {
            return Err(TableError::Corruption(format!(
                "table file too small ({} bytes)",
                mmap.len()
            )));
        }

        let footer = Footer::decode(&mmap[mmap.len() - FOOTER_SIZE..])?;
        let index_bytes = read_block_bytes(&mmap, footer.index)?;
        let index = Block::new(index_bytes)?;

        Ok(Self { mmap, index })
    }

    /// Probes for the newest version of the lookup key's user key.
    pub fn get(&self, ikey: &[u8]) -> Result<TableGet, TableError> {
        let mut index_iter = self.index.iter();
        index_iter.seek(ikey);
        if !index_iter.valid() {
            // Past the last block: no key in this table is ≥ the target.
            return Ok(TableGet::NotFound);
        }

        let handle = BlockHandle::decode(index_iter.value())?;
        let block = self.read_block(handle)?;
        let mut iter = block.iter();
        iter.seek(ikey);

        if iter.valid() && user_key_of(iter.key()) == user_key_of(ikey) {
            match value_type_of(iter.key()) {
                ValueType::Value => Ok(TableGet::Found(iter.value().to_vec())),
                ValueType::Deletion => Ok(TableGet::Deleted),
            }
        } else {
            Ok(TableGet::NotFound)
        }
    }

    /// The decoded index block.
    pub(crate) fn index_block(&self) -> &Block {
        &self.index
    }

    /// Materialises the data block described by `handle`.
    pub(crate) fn read_block(&self, handle: BlockHandle) -> Result<Block, TableError> {
        Block::new(read_block_bytes(&self.mmap, handle)?)
    }
}

fn read_block_bytes(mmap: &Mmap, handle: BlockHandle) -> Result<Vec<u8>, TableError> {
    let start = usize::try_from(handle.offset)
        .map_err(|_| TableError::Corruption("block offset overflow".into()))?;
    let len = usize::try_from(handle.size)
        .map_err(|_| TableError::Corruption("block size overflow".into()))?;
    mmap.get(start..start + len)
        .map(<[u8]>::to_vec)
        .ok_or_else(|| {
            TableError::Corruption(format!(
                "block [{start}, {}) outside file of {} bytes",
                start + len,
                mmap.len()
            ))
        })
}
