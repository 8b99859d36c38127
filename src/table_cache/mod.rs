//! Bounded cache of open SSTable handles.
//!
//! Every table open in the engine goes through this cache, keyed by
//! file number. Entries are `Arc<Table>` handles: eviction — whether by
//! capacity pressure or an explicit [`TableCache::evict`] after file
//! deletion — merely drops the cache's reference. Readers and iterators
//! that cloned the handle keep the mapped file alive until they finish,
//! so a compaction can never close a table out from under a scan.

#[cfg(test)]
mod tests;

use std::num::NonZeroUsize;
use std::path::PathBuf;
use std::sync::{Arc, Mutex};

use lru::LruCache;
use tracing::trace;

use crate::db::filename::table_file;
use crate::sstable::{Table, TableError};

/// LRU of shared table handles, keyed by file number.
pub struct TableCache {
    dir: PathBuf,
    cache: Mutex<LruCache<u64, Arc<Table>>>,
}

impl TableCache {
    /// Creates a cache over tables in `dir` holding at most `capacity`
    /// handles.
    pub fn new(dir: PathBuf, capacity: usize) -> Self {
        let capacity = NonZeroUsize::new(capacity).unwrap_or(NonZeroUsize::MIN);
        Self {
            dir,
            cache: Mutex::new(LruCache::new(capacity)),
        }
    }

    /// Returns a shared handle for table `file_number`, opening the
    /// file on a miss.
    pub fn get_table(&self, file_number: u64) -> Result<Arc<Table>, TableError> {
        let mut cache = self.cache.lock().unwrap_or_else(|e| e.into_inner());
        if let Some(table) = cache.get(&file_number) {
            return Ok(Arc::clone(table));
        }

        let path = table_file(&self.dir, file_number);
        let table = Arc::new(Table::open(&path)?);
        trace!(file_number, path = %path.display(), "table opened into cache");
        cache.put(file_number, Arc::clone(&table));
        Ok(table)
    }

    /// Drops the cached handle for `file_number`, if present.
    ///
    /// Purely a hint: outstanding `Arc` clones stay valid.
    pub fn evict(&self, file_number: u64) {
        let mut cache = self.cache.lock().unwrap_or_else(|e| e.into_inner());
        cache.pop(&file_number);
    }

    /// Number of handles currently cached.
    pub fn len(&self) -> usize {
        let cache = self.cache.lock().unwrap_or_else(|e| e.into_inner());
        cache.len()
    }

    /// True when no handle is cached.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
