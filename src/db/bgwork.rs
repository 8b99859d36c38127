//! Background maintenance loop.
//!
//! One long-lived task drains two triggers in FIFO order: "an
//! immutable memtable exists" (signalled on rotation) and a periodic
//! tick. Flushing always takes precedence over compaction planning.
//!
//! ```text
//! Idle ──imm ready──► FlushImmutable ──► Idle
//! Idle ──tick──────► Compact(level)  ──► Idle
//! ```
//!
//! Each operation captures its inputs under the state lock, performs
//! all I/O unlocked, then re-locks to publish: new files become
//! visible, the manifest is rewritten, and only afterwards are
//! obsolete files unlinked. A crash between any two steps leaves
//! either the old manifest (inputs intact, outputs orphaned) or the
//! new one (outputs live, inputs orphaned) — never a state that loses
//! acknowledged data.
//!
//! Failures are retried on later ticks; persistent failure poisons the
//! database and stops the loop.

use std::fs;
use std::path::Path;
use std::sync::Arc;

use crossbeam::channel::{Receiver, RecvTimeoutError};
use tracing::{debug, error, info};

use crate::compaction::{self, Compaction};
use crate::iter::{BoxedIter, DedupIter, KvIter, LevelIter, MergeIter};
use crate::memtable::{Memtable, MemtableIter};
use crate::sstable::{TableBuilder, TableIter};
use crate::version::{FileMetaData, Version};

use super::filename;
use super::{DbError, DbInner, Signal};

/// Consecutive failures tolerated before the database is poisoned.
const MAX_BACKGROUND_FAILURES: u32 = 3;

/// The background loop body; returns when closed or poisoned.
pub(crate) fn run(inner: &Arc<DbInner>, rx: &Receiver<Signal>) {
    let mut failures = 0u32;
    loop {
        match rx.recv_timeout(inner.config.compaction_interval) {
            Ok(Signal::Close) => break,
            Ok(Signal::ImmReady | Signal::Wake) | Err(RecvTimeoutError::Timeout) => {}
            Err(RecvTimeoutError::Disconnected) => break,
        }

        match background_pass(inner) {
            Ok(()) => failures = 0,
            Err(e) => {
                failures += 1;
                error!(error = %e, failures, "background pass failed");
                if failures >= MAX_BACKGROUND_FAILURES {
                    *inner.poison.lock().unwrap_or_else(|p| p.into_inner()) =
                        Some(e.to_string());
                    error!("database poisoned; background loop exiting");
                    return;
                }
            }
        }
    }

    // Drain the immutable slot on shutdown so close() loses nothing.
    if let Err(e) = flush_immutable(inner) {
        error!(error = %e, "final flush on shutdown failed");
    }
}

/// One unit of background work: flush if something is frozen,
/// otherwise ask the planner for a compaction.
fn background_pass(inner: &Arc<DbInner>) -> Result<(), DbError> {
    if flush_immutable(inner)? {
        return Ok(());
    }
    run_compaction(inner, false)
}

// ------------------------------------------------------------------------------------------------
// Memtable flush
// ------------------------------------------------------------------------------------------------

/// Flushes the immutable memtable (if any) into a level-0 table.
///
/// Returns `true` when a flush happened.
pub(crate) fn flush_immutable(inner: &Arc<DbInner>) -> Result<bool, DbError> {
    let _gate = inner
        .compaction_gate
        .lock()
        .unwrap_or_else(|e| e.into_inner());

    let Some(imm) = ({
        let state = inner.state.read().unwrap_or_else(|e| e.into_inner());
        state.imm.clone()
    }) else {
        return Ok(false);
    };

    let number = {
        let mut state = inner.state.write().unwrap_or_else(|e| e.into_inner());
        state.version.allocate_file_number()
    };

    let meta = build_table_from_memtable(inner, &imm, number)?;
    let entries = imm.len();
    let wal_to_delete = imm.log_number();

    // Publish: the level-0 file becomes visible and the immutable slot
    // clears in one critical section.
    let (version_snapshot, wal_number) = {
        let mut state = inner.state.write().unwrap_or_else(|e| e.into_inner());
        if let Some(meta) = &meta {
            state.version.add_file(0, meta.clone());
        }
        state.imm = None;
        (state.version.clone(), state.wal_number)
    };
    save_manifest(&inner.dir, wal_number, &version_snapshot)?;

    // The flushed data is durable in the table; its WAL is done.
    super::remove_quietly(&filename::wal_file(&inner.dir, wal_to_delete));

    info!(
        number = meta.as_ref().map(|m| m.number),
        entries,
        "immutable memtable flushed to level 0"
    );
    Ok(true)
}

/// Writes every entry of `mem` into table file `number`.
///
/// Returns `None` for an empty memtable (nothing to register).
fn build_table_from_memtable(
    inner: &Arc<DbInner>,
    mem: &Arc<Memtable>,
    number: u64,
) -> Result<Option<FileMetaData>, DbError> {
    let path = filename::table_file(&inner.dir, number);
    let mut builder = TableBuilder::new(
        &path,
        inner.config.block_size,
        inner.config.block_restart_interval,
    )?;

    let mut iter = MemtableIter::new(Arc::clone(mem));
    iter.seek_to_first();
    let mut smallest: Option<Vec<u8>> = None;
    let mut largest: Vec<u8> = Vec::new();
    while iter.valid() {
        if smallest.is_none() {
            smallest = Some(iter.key().to_vec());
        }
        largest.clear();
        largest.extend_from_slice(iter.key());
        builder.add(iter.key(), iter.value())?;
        iter.next();
    }

    let Some(smallest) = smallest else {
        drop(builder);
        super::remove_quietly(&path);
        return Ok(None);
    };

    let file_size = builder.finish()?;
    Ok(Some(FileMetaData {
        number,
        file_size,
        smallest,
        largest,
    }))
}

// ------------------------------------------------------------------------------------------------
// Compaction execution
// ------------------------------------------------------------------------------------------------

/// Plans and executes one compaction.
///
/// With `maintenance` set the highest-scoring level is compacted even
/// when no score exceeds 1.0 (manual [`Db::compact`](super::Db)).
pub(crate) fn run_compaction(inner: &Arc<DbInner>, maintenance: bool) -> Result<(), DbError> {
    let _gate = inner
        .compaction_gate
        .lock()
        .unwrap_or_else(|e| e.into_inner());

    let compaction = {
        let mut state = inner.state.write().unwrap_or_else(|e| e.into_inner());
        if maintenance {
            compaction::pick_maintenance_compaction(&mut state.version)
        } else {
            compaction::pick_compaction(&mut state.version)
        }
    };
    let Some(compaction) = compaction else {
        return Ok(());
    };

    if compaction.is_trivial_move() {
        return trivial_move(inner, &compaction);
    }
    merge_compaction(inner, &compaction)
}

/// Re-registers a lone input file one level down without rewriting it.
fn trivial_move(inner: &Arc<DbInner>, compaction: &Compaction) -> Result<(), DbError> {
    let meta = compaction.inputs[0][0].clone();
    let (version_snapshot, wal_number) = {
        let mut state = inner.state.write().unwrap_or_else(|e| e.into_inner());
        state.version.remove_file(compaction.level, meta.number);
        state.version.add_file(compaction.level + 1, meta.clone());
        (state.version.clone(), state.wal_number)
    };
    save_manifest(&inner.dir, wal_number, &version_snapshot)?;
    info!(
        number = meta.number,
        from = compaction.level,
        to = compaction.level + 1,
        "trivial move"
    );
    Ok(())
}

/// Merges the inputs into fresh files at `level + 1`.
fn merge_compaction(inner: &Arc<DbInner>, compaction: &Compaction) -> Result<(), DbError> {
    let level = compaction.level;
    debug!(
        level,
        inputs_low = compaction.inputs[0].len(),
        inputs_high = compaction.inputs[1].len(),
        "merge compaction starting"
    );

    // Level-0 inputs overlap, so each file is its own merge stream; a
    // deeper input list is already one sorted concatenation.
    let mut children: Vec<BoxedIter> = Vec::new();
    if level == 0 {
        for meta in &compaction.inputs[0] {
            let table = inner.cache.get_table(meta.number)?;
            children.push(Box::new(TableIter::new(table)));
        }
    } else {
        children.push(Box::new(LevelIter::new(resolve_tables(
            inner,
            &compaction.inputs[0],
        )?)));
    }
    if !compaction.inputs[1].is_empty() {
        children.push(Box::new(LevelIter::new(resolve_tables(
            inner,
            &compaction.inputs[1],
        )?)));
    }

    let mut iter = DedupIter::new(MergeIter::new(children));
    iter.seek_to_first();

    // Emit output files, rotating past the size limit.
    let mut outputs: Vec<FileMetaData> = Vec::new();
    while iter.valid() {
        let number = {
            let mut state = inner.state.write().unwrap_or_else(|e| e.into_inner());
            state.version.allocate_file_number()
        };
        let path = filename::table_file(&inner.dir, number);
        let mut builder = TableBuilder::new(
            &path,
            inner.config.block_size,
            inner.config.block_restart_interval,
        )?;

        let smallest = iter.key().to_vec();
        let mut largest = smallest.clone();
        while iter.valid() {
            largest.clear();
            largest.extend_from_slice(iter.key());
            builder.add(iter.key(), iter.value())?;
            iter.next();
            if builder.file_size() > inner.config.max_file_size {
                break;
            }
        }

        let file_size = builder.finish()?;
        outputs.push(FileMetaData {
            number,
            file_size,
            smallest,
            largest,
        });
    }

    // Publish: drop the inputs, register the outputs, persist.
    let (version_snapshot, wal_number) = {
        let mut state = inner.state.write().unwrap_or_else(|e| e.into_inner());
        for meta in &compaction.inputs[0] {
            state.version.remove_file(level, meta.number);
        }
        for meta in &compaction.inputs[1] {
            state.version.remove_file(level + 1, meta.number);
        }
        for meta in &outputs {
            state.version.add_file(level + 1, meta.clone());
        }
        (state.version.clone(), state.wal_number)
    };
    save_manifest(&inner.dir, wal_number, &version_snapshot)?;

    // Only now are the inputs unreferenced; unlink them.
    for meta in compaction.inputs.iter().flatten() {
        inner.cache.evict(meta.number);
        super::remove_quietly(&filename::table_file(&inner.dir, meta.number));
    }

    info!(
        level,
        inputs = compaction.inputs[0].len() + compaction.inputs[1].len(),
        outputs = outputs.len(),
        output_bytes = outputs.iter().map(|m| m.file_size).sum::<u64>(),
        "merge compaction finished"
    );
    Ok(())
}

fn resolve_tables(
    inner: &Arc<DbInner>,
    metas: &[FileMetaData],
) -> Result<Vec<(FileMetaData, Arc<crate::sstable::Table>)>, DbError> {
    let mut resolved = Vec::with_capacity(metas.len());
    for meta in metas {
        resolved.push((meta.clone(), inner.cache.get_table(meta.number)?));
    }
    Ok(resolved)
}

// ------------------------------------------------------------------------------------------------
// Manifest persistence
// ------------------------------------------------------------------------------------------------

/// Atomically rewrites `MANIFEST`: the active WAL number followed by
/// the encoded version, written to a temp file and renamed into place.
/// The directory is fsynced afterwards so the rename itself is durable.
pub(crate) fn save_manifest(dir: &Path, wal_number: u64, version: &Version) -> Result<(), DbError> {
    let mut payload = Vec::new();
    crate::encoding::put_fixed64(&mut payload, wal_number);
    payload.extend_from_slice(&version.encode());

    let final_path = filename::manifest_file(dir);
    let tmp_path = final_path.with_extension("tmp");
    fs::write(&tmp_path, &payload)?;
    let file = fs::File::open(&tmp_path)?;
    file.sync_all()?;
    fs::rename(&tmp_path, &final_path)?;
    fsync_dir(dir)?;
    debug!(bytes = payload.len(), "manifest saved");
    Ok(())
}

/// Fsyncs a directory so renames and unlinks inside it survive a crash.
fn fsync_dir(dir: &Path) -> Result<(), DbError> {
    let handle = fs::File::open(dir)?;
    handle.sync_all()?;
    Ok(())
}
