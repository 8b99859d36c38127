//! Prefix-compressed block building and decoding.
//!
//! A block is a run of entries followed by a restart trailer:
//!
//! ```text
//! entry:   varint32(shared) ‖ varint32(non_shared) ‖ varint32(value_len)
//!          ‖ key_delta[non_shared] ‖ value[value_len]
//! trailer: restart_offset[0..n] (u32 LE each) ‖ n (u32 LE)
//! ```
//!
//! `shared` counts the leading key bytes reused from the previous
//! entry. Every `restart_interval` entries the compression resets:
//! `shared = 0` and the full key is stored, and the entry's offset is
//! recorded in the restart array. Seeks binary-search the restart
//! array (where keys are complete) and then decode forward.

use std::sync::Arc;

use crate::encoding::{get_fixed32, get_varint32, put_fixed32, put_varint32};
use crate::keys::internal_key_cmp;

use super::TableError;

// ------------------------------------------------------------------------------------------------
// BlockBuilder
// ------------------------------------------------------------------------------------------------

/// Accumulates sorted entries into the serialized block layout.
///
/// Shared by data blocks and the index block; only the restart
/// interval differs.
pub struct BlockBuilder {
    restart_interval: usize,
    buffer: Vec<u8>,
    restarts: Vec<u32>,
    /// Entries appended since the last restart point.
    counter: usize,
    last_key: Vec<u8>,
}

impl BlockBuilder {
    /// Creates an empty builder with the given restart interval.
    pub fn new(restart_interval: usize) -> Self {
        Self {
            restart_interval: restart_interval.max(1),
            buffer: Vec::new(),
            restarts: vec![0],
            counter: 0,
            last_key: Vec::new(),
        }
    }

    /// Appends an entry; keys must arrive in strictly increasing order.
    pub fn add(&mut self, key: &[u8], value: &[u8]) {
        debug_assert!(
            self.buffer.is_empty() || internal_key_cmp(&self.last_key, key).is_lt(),
            "block entries must be strictly increasing"
        );

        let shared = if self.counter == self.restart_interval {
            self.restarts.push(self.buffer.len() as u32);
            self.counter = 0;
            0
        } else {
            common_prefix_len(&self.last_key, key)
        };
        let non_shared = key.len() - shared;

        put_varint32(&mut self.buffer, shared as u32);
        put_varint32(&mut self.buffer, non_shared as u32);
        put_varint32(&mut self.buffer, value.len() as u32);
        self.buffer.extend_from_slice(&key[shared..]);
        self.buffer.extend_from_slice(value);

        self.last_key.clear();
        self.last_key.extend_from_slice(key);
        self.counter += 1;
    }

    /// Appends the restart trailer and returns the finished block bytes.
    pub fn finish(&mut self) -> Vec<u8> {
        for &restart in &self.restarts {
            put_fixed32(&mut self.buffer, restart);
        }
        put_fixed32(&mut self.buffer, self.restarts.len() as u32);
        std::mem::take(&mut self.buffer)
    }

    /// Bytes the finished block would occupy right now.
    pub fn current_size_estimate(&self) -> usize {
        self.buffer.len() + self.restarts.len() * 4 + 4
    }

    /// True when no entry has been added since the last reset.
    pub fn is_empty(&self) -> bool {
        self.buffer.is_empty()
    }

    /// Clears all state for the next block.
    pub fn reset(&mut self) {
        self.buffer.clear();
        self.restarts.clear();
        self.restarts.push(0);
        self.counter = 0;
        self.last_key.clear();
    }
}

fn common_prefix_len(a: &[u8], b: &[u8]) -> usize {
    a.iter().zip(b.iter()).take_while(|(x, y)| x == y).count()
}

// ------------------------------------------------------------------------------------------------
// Block
// ------------------------------------------------------------------------------------------------

struct BlockInner {
    data: Vec<u8>,
    /// Offset of the restart array inside `data`.
    restarts_offset: usize,
    n_restarts: usize,
}

/// A decoded, immutable block. Cheap to clone — the payload is shared.
#[derive(Clone)]
pub struct Block {
    inner: Arc<BlockInner>,
}

impl Block {
    /// Parses the restart trailer of raw block bytes.
    pub fn new(data: Vec<u8>) -> Result<Self, TableError> {
        if data.len() < 4 {
            return Err(TableError::Corruption("block shorter than trailer".into()));
        }
        let n_restarts = get_fixed32(&data[data.len() - 4..])? as usize;
        let trailer_len = n_restarts
            .checked_mul(4)
            .and_then(|n| n.checked_add(4))
            .ok_or_else(|| TableError::Corruption("restart count overflow".into()))?;
        if trailer_len > data.len() {
            return Err(TableError::Corruption(format!(
                "restart array ({n_restarts} entries) overruns block of {} bytes",
                data.len()
            )));
        }
        let restarts_offset = data.len() - trailer_len;
        Ok(Self {
            inner: Arc::new(BlockInner {
                data,
                restarts_offset,
                n_restarts,
            }),
        })
    }

    fn restart_point(&self, index: usize) -> usize {
        let at = self.inner.restarts_offset + index * 4;
        get_fixed32(&self.inner.data[at..]).unwrap_or(0) as usize
    }

    /// Creates a cursor positioned before the first entry.
    pub fn iter(&self) -> BlockIter {
        BlockIter {
            block: self.clone(),
            next_offset: 0,
            key: Vec::new(),
            value_start: 0,
            value_end: 0,
            valid: false,
        }
    }
}

// ------------------------------------------------------------------------------------------------
// BlockIter
// ------------------------------------------------------------------------------------------------

/// Cursor over one block's entries.
///
/// Reconstructs prefix-compressed keys into an internal buffer; values
/// are served as slices of the shared block payload. Structural damage
/// in the entry stream makes the cursor permanently invalid.
pub struct BlockIter {
    block: Block,
    /// Offset of the next entry to decode.
    next_offset: usize,
    /// Fully reconstructed key of the current entry.
    key: Vec<u8>,
    value_start: usize,
    value_end: usize,
    valid: bool,
}

impl BlockIter {
    /// True when positioned on an entry.
    pub fn valid(&self) -> bool {
        self.valid
    }

    /// Positions on the first entry.
    pub fn seek_to_first(&mut self) {
        self.next_offset = 0;
        self.key.clear();
        self.valid = false;
        self.parse_next();
    }

    /// Positions on the first entry whose key is ≥ `target`.
    pub fn seek(&mut self, target: &[u8]) {
        // Binary-search the restart array for the last restart whose key
        // is < target; keys at restarts are stored uncompressed.
        let inner = &self.block.inner;
        let mut left = 0usize;
        let mut right = inner.n_restarts.saturating_sub(1);
        while left < right {
            let mid = (left + right + 1) / 2;
            match self.restart_key(mid) {
                Some(key) if internal_key_cmp(&key, target).is_lt() => left = mid,
                _ => right = mid - 1,
            }
        }

        self.next_offset = self.block.restart_point(left);
        self.key.clear();
        self.valid = false;
        loop {
            if !self.parse_next() {
                return;
            }
            if internal_key_cmp(&self.key, target).is_ge() {
                return;
            }
        }
    }

    /// Advances to the next entry.
    pub fn next(&mut self) {
        if self.valid {
            self.parse_next();
        }
    }

    /// Key of the current entry.
    pub fn key(&self) -> &[u8] {
        debug_assert!(self.valid);
        &self.key
    }

    /// Value of the current entry.
    pub fn value(&self) -> &[u8] {
        debug_assert!(self.valid);
        &self.block.inner.data[self.value_start..self.value_end]
    }

    /// Decodes the full key stored at restart point `index`.
    fn restart_key(&self, index: usize) -> Option<Vec<u8>> {
        let inner = &self.block.inner;
        let offset = self.block.restart_point(index);
        let entries = &inner.data[..inner.restarts_offset];
        let (shared, n1) = get_varint32(entries.get(offset..)?).ok()?;
        if shared != 0 {
            return None; // restart entries always store the whole key
        }
        let (non_shared, n2) = get_varint32(entries.get(offset + n1..)?).ok()?;
        let (_, n3) = get_varint32(entries.get(offset + n1 + n2..)?).ok()?;
        let delta_start = offset + n1 + n2 + n3;
        entries
            .get(delta_start..delta_start + non_shared as usize)
            .map(<[u8]>::to_vec)
    }

    /// Decodes the entry at `next_offset`; returns `false` at the end
    /// of the block or on structural damage.
    fn parse_next(&mut self) -> bool {
        let inner = &self.block.inner;
        let entries_end = inner.restarts_offset;
        if self.next_offset >= entries_end {
            self.valid = false;
            return false;
        }

        let decoded = (|| {
            let mut at = self.next_offset;
            let (shared, n) = get_varint32(inner.data.get(at..entries_end)?).ok()?;
            at += n;
            let (non_shared, n) = get_varint32(inner.data.get(at..entries_end)?).ok()?;
            at += n;
            let (value_len, n) = get_varint32(inner.data.get(at..entries_end)?).ok()?;
            at += n;
            let shared = shared as usize;
            let non_shared = non_shared as usize;
            let value_len = value_len as usize;
            if shared > self.key.len() || at + non_shared + value_len > entries_end {
                return None;
            }
            Some((shared, non_shared, value_len, at))
        })();

        let Some((shared, non_shared, value_len, delta_start)) = decoded else {
            self.valid = false;
            return false;
        };

        self.key.truncate(shared);
        self.key
            .extend_from_slice(&inner.data[delta_start..delta_start + non_shared]);
        self.value_start = delta_start + non_shared;
        self.value_end = self.value_start + value_len;
        self.next_offset = self.value_end;
        self.valid = true;
        true
    }
}
