//! # StrataDB
//!
//! An embeddable, persistent, *ordered* key-value storage engine built on
//! a **leveled Log-Structured Merge tree (LSM-tree)**. Designed for fast
//! writes, ordered range scans, and crash-safe operation.
//!
//! ## Architecture
//!
//! ```text
//! ┌────────────────────────────────────────────────────────────┐
//! │                           Db                               │
//! │  ┌────────────┐   ┌────────────┐   ┌───────────────────┐   │
//! │  │  Mutable   │   │ Immutable  │   │  Version          │   │
//! │  │  memtable  │   │ memtable   │   │  level 0 … 6      │   │
//! │  │  + WAL     │   │ + WAL      │   │  (SSTables)       │   │
//! │  └─────┬──────┘   └─────┬──────┘   └─────────┬─────────┘   │
//! │        │  rotate        │  flush             │             │
//! │        └────────►       └─────────►          │             │
//! │                                              │             │
//! │  ┌───────────────────────────────────────────┘             │
//! │  │  Background loop: flush to L0, score levels, compact    │
//! │  └─────────────────────────────────────────────────────────┤
//! │  ┌──────────────────────────────────────────────────────┐  │
//! │  │       MANIFEST  (wal number ‖ version encoding)      │  │
//! │  └──────────────────────────────────────────────────────┘  │
//! └────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Modules
//!
//! | Module | Purpose |
//! |--------|---------|
//! | [`db`] | Orchestrator — open, recover, read, write, scan, background loop |
//! | [`memtable`] | In-memory write buffer over a concurrent skiplist |
//! | [`skiplist`] | Ordered in-memory index; single writer, many readers |
//! | [`wal`] | 32 KiB block-framed write-ahead log with record fragmentation |
//! | [`sstable`] | Immutable sorted tables with prefix-compressed blocks |
//! | [`table_cache`] | Bounded LRU over open SSTable handles |
//! | [`version`] | Per-level file catalogue and manifest encoding |
//! | [`compaction`] | Level scoring, input selection, trivial-move detection |
//! | [`iter`] | Level / merge / dedup iterator tower |
//! | [`keys`] | Internal key, lookup key, and entry encodings |
//! | [`encoding`] | Fixed little-endian and varint primitives |
//!
//! ## Key Features
//!
//! - **Write-ahead logging** — every mutation hits the WAL before the
//!   memtable, so an unclean shutdown never loses acknowledged writes.
//! - **Sequence-number versioning** — each mutation carries a 56-bit
//!   sequence number; the newest version of a key always wins.
//! - **Leveled compaction** — level 0 accepts overlapping flush output;
//!   deeper levels hold sorted, disjoint files merged in the background.
//! - **Ordered scans** — a merging, de-duplicating iterator tower unifies
//!   the memtables and every level into one sorted stream.
//! - **Tombstone deletes** — point deletes are markers that shadow older
//!   versions until compaction collapses them.
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use stratadb::{Db, DbConfig};
//!
//! let db = Db::open("/tmp/my_db", DbConfig::default()).unwrap();
//!
//! // Write
//! db.put(b"hello", b"world").unwrap();
//!
//! // Read
//! assert_eq!(db.get(b"hello").unwrap(), Some(b"world".to_vec()));
//!
//! // Delete
//! db.delete(b"hello").unwrap();
//! assert_eq!(db.get(b"hello").unwrap(), None);
//!
//! // Ordered scan
//! db.put(b"a", b"1").unwrap();
//! db.put(b"b", b"2").unwrap();
//! let pairs: Vec<_> = db.scan(b"a").unwrap().collect();
//!
//! // Graceful shutdown
//! db.close().unwrap();
//! ```

pub mod compaction;
pub mod db;
pub mod encoding;
pub mod iter;
pub mod keys;
pub mod memtable;
pub mod skiplist;
pub mod sstable;
pub mod table_cache;
pub mod version;
pub mod wal;

pub use db::{Db, DbConfig, DbError, DbStats, ScanIter};
