//! The database orchestrator.
//!
//! [`Db`] ties the subsystems together: the write path (WAL append +
//! memtable insert under a single writer lock), the read path
//! (memtables, then the version's levels), ordered scans through the
//! iterator tower, recovery at open, and the background flush /
//! compaction loop.
//!
//! ## Locking
//!
//! - `write` — the writer mutex. Held across sequence allocation, WAL
//!   append, and memtable insert; also across memtable rotation.
//! - `state` — the published state (`mem`, `imm`, version, active WAL
//!   number) behind an `RwLock`. Readers capture clones and release
//!   before touching disk; the background task captures under the
//!   lock, does its I/O unlocked, and re-locks to publish results.
//! - `compaction_gate` — serialises whole flush/compaction operations
//!   so the background loop and a manual [`Db::compact`] never race.
//!
//! ## Durability
//!
//! Every mutation is in the WAL before it is acknowledged (`sync`
//! decides whether that means the OS or the platter). The manifest is
//! rewritten atomically at open, after every flush, after every
//! compaction, and at close — so a crash at any point recovers to the
//! last acknowledged state by manifest + WAL replay.

pub(crate) mod filename;

mod bgwork;

#[cfg(test)]
mod tests;

use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, RwLock};
use std::thread::JoinHandle;
use std::time::Duration;

use crossbeam::channel::{Sender, unbounded};
use thiserror::Error;
use tracing::{info, warn};

use crate::iter::{BoxedIter, DedupIter, KvIter, LevelIter, MergeIter};
use crate::keys::{LookupKey, ValueType, internal_key, user_key_of};
use crate::memtable::{MemGet, Memtable, MemtableIter};
use crate::sstable::{TableError, TableGet, TableIter};
use crate::table_cache::TableCache;
use crate::version::{
    L0_SLOWDOWN_WRITES_TRIGGER, L0_STOP_WRITES_TRIGGER, Version, VersionError,
};
use crate::wal::{LogReader, LogWriter, WalError};

// ------------------------------------------------------------------------------------------------
// Error Types
// ------------------------------------------------------------------------------------------------

/// Errors surfaced by the public API.
#[derive(Debug, Error)]
pub enum DbError {
    /// Underlying filesystem failure.
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    /// Write-ahead log failure.
    #[error("WAL error: {0}")]
    Wal(#[from] WalError),

    /// SSTable failure.
    #[error("table error: {0}")]
    Table(#[from] TableError),

    /// Catalogue / manifest failure.
    #[error("version error: {0}")]
    Version(#[from] VersionError),

    /// A persisted structure failed to decode.
    #[error("corruption: {0}")]
    Corruption(String),

    /// The background task failed persistently; mutations are refused.
    #[error("database poisoned by background failure: {0}")]
    Poisoned(String),

    /// The handle was closed.
    #[error("database is closed")]
    Closed,
}

// ------------------------------------------------------------------------------------------------
// Configuration
// ------------------------------------------------------------------------------------------------

/// Tunables for a [`Db`] instance. All fields affect performance only,
/// except `sync`, which trades write latency for durability.
#[derive(Debug, Clone)]
pub struct DbConfig {
    /// Force every WAL append to stable storage before acknowledging.
    pub sync: bool,

    /// Memtable size that triggers rotation to the immutable slot.
    pub mem_table_size: usize,

    /// Target size of one SSTable data block.
    pub block_size: usize,

    /// Compaction rotates to a new output file past this size.
    pub max_file_size: u64,

    /// Capacity of the open-table LRU cache.
    pub max_open_files: usize,

    /// Background tick interval for compaction scoring.
    pub compaction_interval: Duration,

    /// Entries between restart points in a data block.
    pub block_restart_interval: usize,
}

impl Default for DbConfig {
    fn default() -> Self {
        let max_file_size: u64 = 128 * 1024 * 1024;
        Self {
            sync: false,
            mem_table_size: 64 * 1024 * 1024,
            block_size: 4 * 1024,
            max_file_size,
            max_open_files: (2 * 1024 * 1024 * 1024 / max_file_size) as usize,
            compaction_interval: Duration::from_millis(1000),
            block_restart_interval: 16,
        }
    }
}

// ------------------------------------------------------------------------------------------------
// Shared state
// ------------------------------------------------------------------------------------------------

/// State published to readers and the background task.
pub(crate) struct DbState {
    pub(crate) mem: Arc<Memtable>,
    pub(crate) imm: Option<Arc<Memtable>>,
    pub(crate) version: Version,
    /// File number of the WAL backing `mem`.
    pub(crate) wal_number: u64,
}

/// State owned by the writer lock.
struct WriteState {
    wal: LogWriter,
    mem: Arc<Memtable>,
}

/// Background wake-up reasons, processed in FIFO order.
pub(crate) enum Signal {
    /// An immutable memtable is waiting to be flushed.
    ImmReady,
    /// Somebody wants a maintenance pass soon.
    Wake,
    /// Shut the loop down.
    Close,
}

pub(crate) struct DbInner {
    pub(crate) dir: PathBuf,
    pub(crate) config: DbConfig,
    pub(crate) cache: Arc<TableCache>,
    pub(crate) state: RwLock<DbState>,
    write: Mutex<WriteState>,
    /// Serialises whole flush / compaction operations.
    pub(crate) compaction_gate: Mutex<()>,
    pub(crate) tx: Sender<Signal>,
    pub(crate) poison: Mutex<Option<String>>,
    closed: AtomicBool,
}

impl DbInner {
    pub(crate) fn poison_reason(&self) -> Option<String> {
        self.poison
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .clone()
    }
}

// ------------------------------------------------------------------------------------------------
// Db
// ------------------------------------------------------------------------------------------------

/// An open database handle.
///
/// All methods take `&self`; the handle is internally synchronised and
/// can be shared across threads in an `Arc`.
pub struct Db {
    inner: Arc<DbInner>,
    background: Mutex<Option<JoinHandle<()>>>,
}

impl Db {
    /// Opens (creating if missing) the database under `dir`.
    ///
    /// Recovery replays the manifest and every surviving WAL: records
    /// are re-appended to a fresh log while they repopulate the
    /// memtable, the manifest is rewritten to point at that log, and
    /// only then are stale logs and orphaned tables collected.
    pub fn open<P: AsRef<Path>>(dir: P, config: DbConfig) -> Result<Self, DbError> {
        let dir = dir.as_ref().to_path_buf();
        fs::create_dir_all(&dir)?;

        let cache = Arc::new(TableCache::new(dir.clone(), config.max_open_files));

        // 1. Manifest → version + the WAL numbers worth replaying.
        let manifest_path = filename::manifest_file(&dir);
        let (mut version, min_log_number) = if manifest_path.exists() {
            let data = fs::read(&manifest_path)?;
            if data.len() < 8 {
                return Err(DbError::Corruption("manifest shorter than header".into()));
            }
            let wal_number = crate::encoding::get_fixed64(&data)
                .map_err(|e| DbError::Corruption(format!("manifest header: {e}")))?;
            (Version::decode(&data[8..])?, wal_number)
        } else {
            // First open, or a crash before the first manifest landed:
            // replay whatever logs exist.
            (Version::new(), 0)
        };

        let mut log_numbers: Vec<u64> = list_files(&dir, filename::WAL_SUFFIX)?
            .into_iter()
            .filter(|&n| n >= min_log_number)
            .collect();
        log_numbers.sort_unstable();

        // 2. Fresh memtable + fresh WAL; replay re-appends as it goes.
        let wal_number = version.allocate_file_number();
        let mem = Arc::new(Memtable::new(wal_number));
        let mut wal = LogWriter::create(filename::wal_file(&dir, wal_number), config.sync)?;

        let mut max_seq = version.last_sequence();
        for log_number in &log_numbers {
            let mut replayed = 0usize;
            let mut reader = LogReader::open(filename::wal_file(&dir, *log_number))?;
            while let Some(record) = reader.read_next_record()? {
                let entry = crate::keys::decode_entry(&record)
                    .map_err(|e| DbError::Corruption(format!("bad WAL entry: {e}")))?;
                wal.add_record(&record)?;
                mem.add(entry.seq, entry.vtype, entry.user_key, entry.value);
                max_seq = max_seq.max(entry.seq);
                replayed += 1;
            }
            info!(log_number, replayed, "WAL replayed");
        }
        version.set_last_sequence(max_seq);
        wal.sync()?;

        // 3. Persist the manifest before removing anything.
        bgwork::save_manifest(&dir, wal_number, &version)?;

        // 4. Collect stale logs and orphaned tables.
        for stale in list_files(&dir, filename::WAL_SUFFIX)? {
            if stale != wal_number {
                remove_quietly(&filename::wal_file(&dir, stale));
            }
        }
        let live = version.live_file_numbers();
        for table in list_files(&dir, filename::TABLE_SUFFIX)? {
            if !live.contains(&table) {
                info!(number = table, "collecting orphaned table");
                remove_quietly(&filename::table_file(&dir, table));
            }
        }

        // 5. Spawn the background task.
        let (tx, rx) = unbounded();
        let inner = Arc::new(DbInner {
            dir: dir.clone(),
            config,
            cache,
            state: RwLock::new(DbState {
                mem: Arc::clone(&mem),
                imm: None,
                version,
                wal_number,
            }),
            write: Mutex::new(WriteState { wal, mem }),
            compaction_gate: Mutex::new(()),
            tx,
            poison: Mutex::new(None),
            closed: AtomicBool::new(false),
        });

        let background = {
            let inner = Arc::clone(&inner);
            std::thread::Builder::new()
                .name("stratadb-bg".into())
                .spawn(move || bgwork::run(&inner, &rx))?
        };

        info!(dir = %dir.display(), "database opened");
        Ok(Self {
            inner,
            background: Mutex::new(Some(background)),
        })
    }

    /// Inserts or overwrites a key.
    pub fn put(&self, key: &[u8], value: &[u8]) -> Result<(), DbError> {
        self.write_internal(key, value, ValueType::Value)
    }

    /// Deletes a key by writing a tombstone.
    pub fn delete(&self, key: &[u8]) -> Result<(), DbError> {
        self.write_internal(key, b"", ValueType::Deletion)
    }

    fn write_internal(&self, key: &[u8], value: &[u8], vtype: ValueType) -> Result<(), DbError> {
        self.check_usable()?;

        let mut write = self.inner.write.lock().unwrap_or_else(|e| e.into_inner());
        self.make_room_for_write(&mut write)?;

        // Sequence allocation publishes through the state lock so that
        // concurrent readers snapshot a consistent clock.
        let seq = {
            let mut state = self.inner.state.write().unwrap_or_else(|e| e.into_inner());
            let seq = state.version.last_sequence() + 1;
            state.version.set_last_sequence(seq);
            seq
        };

        let record = crate::keys::encode_entry(seq, vtype, key, value);
        write.wal.add_record(&record)?;
        write.mem.add(seq, vtype, key, value);
        Ok(())
    }

    /// Looks up a key; `Ok(None)` covers both "never written" and
    /// "deleted".
    pub fn get(&self, key: &[u8]) -> Result<Option<Vec<u8>>, DbError> {
        if self.inner.closed.load(Ordering::Acquire) {
            return Err(DbError::Closed);
        }

        // Capture the read view, then probe without holding the lock.
        let (mem, imm, version, snapshot) = {
            let state = self.inner.state.read().unwrap_or_else(|e| e.into_inner());
            (
                Arc::clone(&state.mem),
                state.imm.clone(),
                state.version.clone(),
                state.version.last_sequence(),
            )
        };

        let lookup = LookupKey::new(key, snapshot);

        match mem.get(&lookup) {
            MemGet::Found(value) => return Ok(Some(value)),
            MemGet::Deleted => return Ok(None),
            MemGet::NotFound => {}
        }
        if let Some(imm) = imm {
            match imm.get(&lookup) {
                MemGet::Found(value) => return Ok(Some(value)),
                MemGet::Deleted => return Ok(None),
                MemGet::NotFound => {}
            }
        }

        match version.get(&self.inner.cache, &lookup)? {
            TableGet::Found(value) => Ok(Some(value)),
            TableGet::Deleted | TableGet::NotFound => Ok(None),
        }
    }

    /// Ordered scan of all live keys starting at `start_key`.
    pub fn scan(&self, start_key: &[u8]) -> Result<ScanIter, DbError> {
        if self.inner.closed.load(Ordering::Acquire) {
            return Err(DbError::Closed);
        }

        let (mem, imm, version, snapshot) = {
            let state = self.inner.state.read().unwrap_or_else(|e| e.into_inner());
            (
                Arc::clone(&state.mem),
                state.imm.clone(),
                state.version.clone(),
                state.version.last_sequence(),
            )
        };

        let mut children: Vec<BoxedIter> = Vec::new();
        children.push(Box::new(MemtableIter::new(mem)));
        if let Some(imm) = &imm {
            children.push(Box::new(MemtableIter::new(Arc::clone(imm))));
        }

        // Level 0: one parallel stream per (possibly overlapping) file.
        for meta in version.files(0) {
            let table = self.inner.cache.get_table(meta.number)?;
            children.push(Box::new(TableIter::new(table)));
        }
        // Deeper levels: one concatenated stream each.
        for level in 1..crate::version::NUM_LEVELS {
            let files = version.files(level);
            if files.is_empty() {
                continue;
            }
            let mut resolved = Vec::with_capacity(files.len());
            for meta in files {
                resolved.push((meta.clone(), self.inner.cache.get_table(meta.number)?));
            }
            children.push(Box::new(LevelIter::new(resolved)));
        }

        let mut tower = DedupIter::new(MergeIter::new(children));
        tower.seek(&internal_key(start_key, snapshot, ValueType::Value));
        Ok(ScanIter { tower })
    }

    /// Snapshot of storage statistics.
    pub fn stats(&self) -> DbStats {
        let state = self.inner.state.read().unwrap_or_else(|e| e.into_inner());
        let mut level_files = [0usize; crate::version::NUM_LEVELS];
        let mut total_table_bytes = 0u64;
        for (level, slot) in level_files.iter_mut().enumerate() {
            *slot = state.version.num_level_files(level);
            total_table_bytes += state.version.total_file_size(level);
        }
        DbStats {
            level_files,
            total_table_bytes,
            memtable_bytes: state.mem.approximate_memory_usage(),
            immutable_pending: state.imm.is_some(),
        }
    }

    /// Runs one synchronous maintenance round: pushes buffered writes
    /// out to level 0, then compacts the highest-scoring level.
    pub fn compact(&self) -> Result<(), DbError> {
        self.check_usable()?;

        // Rotate the mutable memtable so buffered writes take part in
        // the compaction; drain any immutable predecessor first.
        {
            let mut write = self.inner.write.lock().unwrap_or_else(|e| e.into_inner());
            bgwork::flush_immutable(&self.inner)?;
            if write.mem.approximate_memory_usage() > 0 {
                self.rotate_memtable(&mut write)?;
            }
        }

        bgwork::flush_immutable(&self.inner)?;
        bgwork::run_compaction(&self.inner, true)?;
        Ok(())
    }

    /// Shuts the database down: stops the background task (flushing
    /// any pending immutable memtable), persists the manifest, and
    /// syncs the WAL. Idempotent.
    pub fn close(&self) -> Result<(), DbError> {
        if self.inner.closed.swap(true, Ordering::AcqRel) {
            return Ok(());
        }

        let _ = self.inner.tx.send(Signal::Close);
        if let Some(handle) = self
            .background
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .take()
        {
            let _ = handle.join();
        }

        {
            let state = self.inner.state.read().unwrap_or_else(|e| e.into_inner());
            bgwork::save_manifest(&self.inner.dir, state.wal_number, &state.version)?;
        }
        {
            let mut write = self.inner.write.lock().unwrap_or_else(|e| e.into_inner());
            write.wal.sync()?;
        }
        info!(dir = %self.inner.dir.display(), "database closed");
        Ok(())
    }

    fn check_usable(&self) -> Result<(), DbError> {
        if self.inner.closed.load(Ordering::Acquire) {
            return Err(DbError::Closed);
        }
        if let Some(reason) = self.inner.poison_reason() {
            return Err(DbError::Poisoned(reason));
        }
        Ok(())
    }

    /// Write-path flow control.
    ///
    /// Loops until the mutable memtable has room: throttles while
    /// level 0 is backlogged, backs off while a previous memtable is
    /// still flushing, and otherwise rotates the memtable and its WAL.
    fn make_room_for_write(&self, write: &mut WriteState) -> Result<(), DbError> {
        loop {
            let (l0_files, imm_exists) = {
                let state = self.inner.state.read().unwrap_or_else(|e| e.into_inner());
                (state.version.num_level_files(0), state.imm.is_some())
            };

            if l0_files >= L0_SLOWDOWN_WRITES_TRIGGER {
                if l0_files >= L0_STOP_WRITES_TRIGGER {
                    warn!(l0_files, "level-0 backlog at stop threshold");
                }
                if let Some(reason) = self.inner.poison_reason() {
                    return Err(DbError::Poisoned(reason));
                }
                let _ = self.inner.tx.send(Signal::Wake);
                std::thread::sleep(Duration::from_secs(1));
            } else if write.mem.approximate_memory_usage() < self.inner.config.mem_table_size {
                return Ok(());
            } else if imm_exists {
                // Previous memtable still flushing; brief back-off, but
                // never wait on a flusher that has died.
                if let Some(reason) = self.inner.poison_reason() {
                    return Err(DbError::Poisoned(reason));
                }
                std::thread::sleep(Duration::from_millis(1));
            } else {
                self.rotate_memtable(write)?;
                let _ = self.inner.tx.send(Signal::ImmReady);
            }
        }
    }

    /// Swaps the mutable memtable into the immutable slot and installs
    /// a fresh memtable with a fresh WAL.
    ///
    /// The caller holds the writer lock; the immutable slot must be
    /// empty.
    fn rotate_memtable(&self, write: &mut WriteState) -> Result<(), DbError> {
        let mut state = self.inner.state.write().unwrap_or_else(|e| e.into_inner());
        debug_assert!(state.imm.is_none());

        let new_number = state.version.allocate_file_number();
        let new_wal = LogWriter::create(
            filename::wal_file(&self.inner.dir, new_number),
            self.inner.config.sync,
        )?;
        let new_mem = Arc::new(Memtable::new(new_number));

        state.imm = Some(Arc::clone(&state.mem));
        state.mem = Arc::clone(&new_mem);
        state.wal_number = new_number;
        drop(state);

        write.wal = new_wal;
        write.mem = new_mem;
        Ok(())
    }
}

impl Drop for Db {
    fn drop(&mut self) {
        let _ = self.close();
    }
}

/// Point-in-time storage statistics returned by [`Db::stats`].
#[derive(Debug, Clone)]
pub struct DbStats {
    /// Number of table files at each level.
    pub level_files: [usize; crate::version::NUM_LEVELS],
    /// Sum of all table file sizes in bytes.
    pub total_table_bytes: u64,
    /// Approximate bytes buffered in the mutable memtable.
    pub memtable_bytes: usize,
    /// True while an immutable memtable awaits flushing.
    pub immutable_pending: bool,
}

// ------------------------------------------------------------------------------------------------
// ScanIter
// ------------------------------------------------------------------------------------------------

/// Ordered stream of live `(user_key, value)` pairs.
///
/// The underlying tower holds its own table and memtable handles, so
/// the iterator survives concurrent flushes and compactions.
pub struct ScanIter {
    tower: DedupIter<MergeIter>,
}

impl Iterator for ScanIter {
    type Item = (Vec<u8>, Vec<u8>);

    fn next(&mut self) -> Option<Self::Item> {
        if !self.tower.valid() {
            return None;
        }
        let key = user_key_of(self.tower.key()).to_vec();
        let value = self.tower.value().to_vec();
        self.tower.next();
        Some((key, value))
    }
}

// ------------------------------------------------------------------------------------------------
// Directory helpers
// ------------------------------------------------------------------------------------------------

/// File numbers of every `NNNNNN.<suffix>` entry in `dir`.
fn list_files(dir: &Path, suffix: &str) -> Result<Vec<u64>, DbError> {
    let mut numbers = Vec::new();
    for entry in fs::read_dir(dir)? {
        let entry = entry?;
        if let Some(name) = entry.file_name().to_str()
            && let Some(number) = filename::parse_file_number(name, suffix)
        {
            numbers.push(number);
        }
    }
    Ok(numbers)
}

fn remove_quietly(path: &Path) {
    if let Err(e) = fs::remove_file(path)
        && e.kind() != io::ErrorKind::NotFound
    {
        warn!(path = %path.display(), error = %e, "failed to remove file");
    }
}
