//! Per-level file catalogue.
//!
//! A [`Version`] records which SSTables exist at each level, the
//! monotonic file-number allocator, and the sequence-number clock.
//!
//! ## Level invariants
//!
//! - **Level 0** files arrive straight from memtable flushes: their
//!   key ranges may overlap and the list is unordered. Point lookups
//!   probe candidates newest-first (descending file number).
//! - **Levels 1…6** hold files sorted by smallest key with pairwise
//!   disjoint ranges, so a binary search names the one candidate file
//!   for any user key.
//!
//! ## Manifest encoding
//!
//! `encode`/`decode` serialise the catalogue for the `MANIFEST` file:
//!
//! ```text
//! next_file_number(8, LE) ‖ last_sequence(8, LE) ‖
//!   for each level 0..7:
//!     file_count(4, LE) ‖
//!     for each file: file_size(8) ‖ file_number(8) ‖
//!                    varint-prefixed smallest ‖ varint-prefixed largest
//! ```


use thiserror::Error;
use tracing::trace;

use crate::encoding::{
    EncodingError, get_fixed32, get_fixed64, get_length_prefixed, put_fixed32, put_fixed64,
    put_length_prefixed,
};
use crate::keys::{LookupKey, internal_key_cmp, user_key_cmp, user_key_of};
use crate::sstable::{TableError, TableGet};
use crate::table_cache::TableCache;

/// Number of levels in the tree.
pub const NUM_LEVELS: usize = 7;

/// Level-0 file count that makes compaction urgent (score 1.0).
pub const L0_COMPACTION_TRIGGER: usize = 4;

/// Level-0 file count at which writers start throttling.
pub const L0_SLOWDOWN_WRITES_TRIGGER: usize = 8;

/// Level-0 file count regarded as a hard backlog.
pub const L0_STOP_WRITES_TRIGGER: usize = 12;

/// Byte budget for level `L ≥ 1`: `10 MiB · 10^(L−1)`.
pub fn max_bytes_for_level(level: usize) -> f64 {
    let mut result = 10.0 * 1024.0 * 1024.0;
    let mut level = level;
    while level > 1 {
        result *= 10.0;
        level -= 1;
    }
    result
}

// ------------------------------------------------------------------------------------------------
// Error Types
// ------------------------------------------------------------------------------------------------

/// Errors returned by catalogue operations.
#[derive(Debug, Error)]
pub enum VersionError {
    /// Primitive decoding failure while reading a manifest.
    #[error("encoding error: {0}")]
    Encoding(#[from] EncodingError),

    /// Error from a probed table.
    #[error("table error: {0}")]
    Table(#[from] TableError),

    /// The manifest payload is structurally damaged.
    #[error("manifest corruption: {0}")]
    Corruption(String),
}

// ------------------------------------------------------------------------------------------------
// FileMetaData
// ------------------------------------------------------------------------------------------------

/// Catalogue entry for one SSTable.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FileMetaData {
    /// Globally unique file number (names the file on disk).
    pub number: u64,
    /// File size in bytes.
    pub file_size: u64,
    /// Smallest internal key stored in the file.
    pub smallest: Vec<u8>,
    /// Largest internal key stored in the file.
    pub largest: Vec<u8>,
}

impl FileMetaData {
    fn encode_to(&self, buf: &mut Vec<u8>) {
        put_fixed64(buf, self.file_size);
        put_fixed64(buf, self.number);
        put_length_prefixed(buf, &self.smallest);
        put_length_prefixed(buf, &self.largest);
    }

    fn decode_from(buf: &[u8]) -> Result<(Self, usize), VersionError> {
        let file_size = get_fixed64(buf)?;
        let number = get_fixed64(&buf[8..])?;
        let (smallest, n1) = get_length_prefixed(&buf[16..])?;
        let (largest, n2) = get_length_prefixed(&buf[16 + n1..])?;
        Ok((
            Self {
                number,
                file_size,
                smallest: smallest.to_vec(),
                largest: largest.to_vec(),
            },
            16 + n1 + n2,
        ))
    }
}

// ------------------------------------------------------------------------------------------------
// Version
// ------------------------------------------------------------------------------------------------

/// The catalogue: per-level file lists plus the shared counters.
#[derive(Debug, Clone)]
pub struct Version {
    /// Next file number to hand out (WAL and table files share it).
    pub(crate) next_file_number: u64,
    /// Sequence number of the most recent externally visible mutation.
    pub(crate) last_sequence: u64,
    /// Files per level.
    pub(crate) files: [Vec<FileMetaData>; NUM_LEVELS],
    /// Largest key compacted at each level; empty means "never".
    pub(crate) compact_pointer: [Vec<u8>; NUM_LEVELS],
}

impl Default for Version {
    fn default() -> Self {
        Self::new()
    }
}

impl Version {
    /// Creates an empty catalogue.
    pub fn new() -> Self {
        Self {
            next_file_number: 1,
            last_sequence: 0,
            files: Default::default(),
            compact_pointer: Default::default(),
        }
    }

    /// Hands out the next globally unique file number.
    pub fn allocate_file_number(&mut self) -> u64 {
        let number = self.next_file_number;
        self.next_file_number += 1;
        number
    }

    /// Sequence number of the most recent visible mutation.
    pub fn last_sequence(&self) -> u64 {
        self.last_sequence
    }

    /// Advances the sequence clock; never moves it backwards.
    pub fn set_last_sequence(&mut self, seq: u64) {
        debug_assert!(seq >= self.last_sequence);
        self.last_sequence = seq;
    }

    /// Files registered at `level`.
    pub fn files(&self, level: usize) -> &[FileMetaData] {
        &self.files[level]
    }

    /// Number of files at `level`.
    pub fn num_level_files(&self, level: usize) -> usize {
        self.files[level].len()
    }

    /// Registers a file.
    ///
    /// Level 0 appends (overlap is legal there); deeper levels insert
    /// sorted by smallest key.
    pub fn add_file(&mut self, level: usize, meta: FileMetaData) {
        trace!(level, number = meta.number, size = meta.file_size, "file added");
        if level == 0 {
            self.files[0].push(meta);
        } else {
            let at = self.files[level]
                .partition_point(|f| internal_key_cmp(&f.smallest, &meta.smallest).is_lt());
            self.files[level].insert(at, meta);
        }
    }

    /// Unregisters the file `number` from `level`, returning its
    /// metadata. On-disk deletion and cache eviction are the caller's
    /// business — keeping them out of the catalogue breaks the
    /// version → cache → file ownership cycle.
    pub fn remove_file(&mut self, level: usize, number: u64) -> Option<FileMetaData> {
        let at = self.files[level].iter().position(|f| f.number == number)?;
        trace!(level, number, "file removed");
        Some(self.files[level].remove(at))
    }

    /// Every file number referenced by any level.
    pub fn live_file_numbers(&self) -> Vec<u64> {
        self.files
            .iter()
            .flat_map(|level| level.iter().map(|f| f.number))
            .collect()
    }

    /// Sum of file sizes at `level`.
    pub fn total_file_size(&self, level: usize) -> u64 {
        self.files[level].iter().map(|f| f.file_size).sum()
    }

    // --------------------------------------------------------------------------------------------
    // Point lookup
    // --------------------------------------------------------------------------------------------

    /// Levelwise point lookup.
    ///
    /// Level 0 probes every file whose range covers the user key,
    /// newest file first. Deeper levels probe the single candidate
    /// found by binary search. `Found` and `Deleted` are both
    /// definitive; `NotFound` falls through to the next level.
    pub fn get(&self, cache: &TableCache, lookup: &LookupKey) -> Result<TableGet, VersionError> {
        let user_key = lookup.user_key();

        for level in 0..NUM_LEVELS {
            let files = &self.files[level];
            if files.is_empty() {
                continue;
            }

            let mut candidates: Vec<&FileMetaData> = Vec::new();
            if level == 0 {
                for meta in files {
                    if user_key_cmp(user_key_of(&meta.smallest), user_key).is_le()
                        && user_key_cmp(user_key_of(&meta.largest), user_key).is_ge()
                    {
                        candidates.push(meta);
                    }
                }
                // Newer flushes carry higher file numbers; probe them first.
                candidates.sort_by(|a, b| b.number.cmp(&a.number));
            } else {
                let index = find_file(files, user_key);
                if index < files.len()
                    && user_key_cmp(user_key_of(&files[index].smallest), user_key).is_le()
                {
                    candidates.push(&files[index]);
                }
            }

            for meta in candidates {
                let table = cache.get_table(meta.number)?;
                match table.get(lookup.internal_key())? {
                    TableGet::NotFound => {}
                    definitive => return Ok(definitive),
                }
            }
        }

        Ok(TableGet::NotFound)
    }

    // --------------------------------------------------------------------------------------------
    // Manifest encoding
    // --------------------------------------------------------------------------------------------

    /// Serialises the catalogue for the manifest.
    pub fn encode(&self) -> Vec<u8> {
        let mut buf = Vec::new();
        put_fixed64(&mut buf, self.next_file_number);
        put_fixed64(&mut buf, self.last_sequence);
        for level in &self.files {
            put_fixed32(&mut buf, level.len() as u32);
            for meta in level {
                meta.encode_to(&mut buf);
            }
        }
        buf
    }

    /// Reconstructs a catalogue from manifest bytes.
    pub fn decode(data: &[u8]) -> Result<Self, VersionError> {
        let mut version = Self::new();
        version.next_file_number = get_fixed64(data)?;
        version.last_sequence = get_fixed64(&data[8..])?;

        let mut offset = 16usize;
        for level in 0..NUM_LEVELS {
            let count = get_fixed32(&data[offset.min(data.len())..])? as usize;
            offset += 4;
            for _ in 0..count {
                if offset > data.len() {
                    return Err(VersionError::Corruption(format!(
                        "file list truncated at level {level}"
                    )));
                }
                let (meta, consumed) = FileMetaData::decode_from(&data[offset..])?;
                offset += consumed;
                version.files[level].push(meta);
            }
        }
        Ok(version)
    }
}

/// Index of the first file in `files` whose largest user key is ≥
/// `user_key`; `files.len()` when none is.
///
/// `files` must be sorted by smallest key with disjoint ranges.
pub(crate) fn find_file(files: &[FileMetaData], user_key: &[u8]) -> usize {
    files.partition_point(|f| user_key_cmp(user_key_of(&f.largest), user_key).is_lt())
}
