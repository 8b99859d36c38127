use std::sync::Arc;

use crate::iter::{BoxedIter, DedupIter, KvIter, MergeIter};
use crate::keys::{ValueType, internal_key, user_key_of};
use crate::memtable::{Memtable, MemtableIter};

fn tower(mems: Vec<Arc<Memtable>>) -> DedupIter<MergeIter> {
    let children: Vec<BoxedIter> = mems
        .into_iter()
        .map(|mem| Box::new(MemtableIter::new(mem)) as BoxedIter)
        .collect();
    DedupIter::new(MergeIter::new(children))
}

fn drain_users(iter: &mut DedupIter<MergeIter>) -> Vec<(Vec<u8>, Vec<u8>)> {
    let mut out = Vec::new();
    while iter.valid() {
        out.push((user_key_of(iter.key()).to_vec(), iter.value().to_vec()));
        iter.next();
    }
    out
}

#[test]
fn keeps_only_the_newest_version() {
    let mem = Arc::new(Memtable::new(1));
    mem.add(1, ValueType::Value, b"k", b"v1");
    mem.add(2, ValueType::Value, b"k", b"v2");
    mem.add(3, ValueType::Value, b"k", b"v3");

    let mut iter = tower(vec![mem]);
    iter.seek_to_first();
    let entries = drain_users(&mut iter);
    assert_eq!(entries, vec![(b"k".to_vec(), b"v3".to_vec())]);
}

#[test]
fn tombstone_suppresses_the_whole_run() {
    let mem = Arc::new(Memtable::new(1));
    mem.add(1, ValueType::Value, b"dead", b"v1");
    mem.add(2, ValueType::Value, b"dead", b"v2");
    mem.add(3, ValueType::Deletion, b"dead", b"");
    mem.add(4, ValueType::Value, b"live", b"v");

    let mut iter = tower(vec![mem]);
    iter.seek_to_first();
    let entries = drain_users(&mut iter);
    assert_eq!(entries, vec![(b"live".to_vec(), b"v".to_vec())]);
}

#[test]
fn value_written_after_tombstone_survives() {
    let mem = Arc::new(Memtable::new(1));
    mem.add(1, ValueType::Value, b"k", b"old");
    mem.add(2, ValueType::Deletion, b"k", b"");
    mem.add(3, ValueType::Value, b"k", b"reborn");

    let mut iter = tower(vec![mem]);
    iter.seek_to_first();
    let entries = drain_users(&mut iter);
    assert_eq!(entries, vec![(b"k".to_vec(), b"reborn".to_vec())]);
}

#[test]
fn dedup_across_sources_prefers_higher_sequence() {
    let older = Arc::new(Memtable::new(1));
    older.add(10, ValueType::Value, b"a", b"stale-a");
    older.add(11, ValueType::Value, b"b", b"stale-b");
    let newer = Arc::new(Memtable::new(2));
    newer.add(20, ValueType::Value, b"a", b"fresh-a");
    newer.add(21, ValueType::Deletion, b"b", b"");

    let mut iter = tower(vec![older, newer]);
    iter.seek_to_first();
    let entries = drain_users(&mut iter);
    assert_eq!(entries, vec![(b"a".to_vec(), b"fresh-a".to_vec())]);
}

#[test]
fn each_live_key_appears_exactly_once() {
    let mem_a = Arc::new(Memtable::new(1));
    let mem_b = Arc::new(Memtable::new(2));
    for i in 0..100u64 {
        let key = format!("key{:03}", i % 25); // 4 versions per key
        let target = if i % 2 == 0 { &mem_a } else { &mem_b };
        target.add(i + 1, ValueType::Value, key.as_bytes(), format!("v{i}").as_bytes());
    }

    let mut iter = tower(vec![mem_a, mem_b]);
    iter.seek_to_first();
    let entries = drain_users(&mut iter);
    assert_eq!(entries.len(), 25);
    let mut seen = std::collections::HashSet::new();
    for (key, _) in &entries {
        assert!(seen.insert(key.clone()), "duplicate key {key:?}");
    }
}

#[test]
fn seek_lands_mid_run_and_respects_the_snapshot() {
    let mem = Arc::new(Memtable::new(1));
    mem.add(10, ValueType::Value, b"k", b"v10");
    mem.add(20, ValueType::Value, b"k", b"v20");
    mem.add(30, ValueType::Value, b"k", b"v30");

    // A seek bounded at sequence 20 must surface v20, not v30.
    let mut iter = tower(vec![mem]);
    iter.seek(&internal_key(b"k", 20, ValueType::Value));
    assert!(iter.valid());
    assert_eq!(iter.value(), b"v20");
    iter.next();
    assert!(!iter.valid());
}

#[test]
fn seek_skips_deleted_start_key() {
    let mem = Arc::new(Memtable::new(1));
    mem.add(1, ValueType::Value, b"a", b"va");
    mem.add(2, ValueType::Deletion, b"a", b"");
    mem.add(3, ValueType::Value, b"b", b"vb");

    let mut iter = tower(vec![mem]);
    iter.seek(&internal_key(b"a", 100, ValueType::Value));
    assert!(iter.valid());
    assert_eq!(user_key_of(iter.key()), b"b");
    assert_eq!(iter.value(), b"vb");
}
