use std::sync::Arc;

use tempfile::TempDir;

use crate::keys::{ValueType, internal_key};
use crate::sstable::{TableBuilder, TableGet};
use crate::table_cache::TableCache;

fn write_table(dir: &std::path::Path, number: u64, user_key: &[u8], value: &[u8]) {
    let path = crate::db::filename::table_file(dir, number);
    let mut builder = TableBuilder::new(&path, 1024, 16).unwrap();
    builder
        .add(&internal_key(user_key, 1, ValueType::Value), value)
        .unwrap();
    builder.finish().unwrap();
}

fn probe(cache: &TableCache, number: u64, user_key: &[u8]) -> TableGet {
    let table = cache.get_table(number).unwrap();
    table
        .get(&internal_key(user_key, 100, ValueType::Value))
        .unwrap()
}

#[test]
fn hit_after_miss_reuses_the_handle() {
    let tmp = TempDir::new().unwrap();
    write_table(tmp.path(), 1, b"k", b"v");

    let cache = TableCache::new(tmp.path().to_path_buf(), 4);
    assert!(cache.is_empty());

    let first = cache.get_table(1).unwrap();
    assert_eq!(cache.len(), 1);
    let second = cache.get_table(1).unwrap();
    assert!(Arc::ptr_eq(&first, &second), "hit must return the same handle");
}

#[test]
fn capacity_evicts_least_recently_used() {
    let tmp = TempDir::new().unwrap();
    for number in 1..=3 {
        write_table(tmp.path(), number, format!("k{number}").as_bytes(), b"v");
    }

    let cache = TableCache::new(tmp.path().to_path_buf(), 2);
    cache.get_table(1).unwrap();
    cache.get_table(2).unwrap();
    cache.get_table(3).unwrap(); // evicts table 1
    assert_eq!(cache.len(), 2);

    // Table 1 still opens correctly after re-miss.
    assert_eq!(probe(&cache, 1, b"k1"), TableGet::Found(b"v".to_vec()));
}

#[test]
fn evict_is_a_hint_not_a_close() {
    let tmp = TempDir::new().unwrap();
    write_table(tmp.path(), 7, b"key", b"value");

    let cache = TableCache::new(tmp.path().to_path_buf(), 4);
    let table = cache.get_table(7).unwrap();
    cache.evict(7);
    assert!(cache.is_empty());

    // The retained handle keeps working after eviction, even when the
    // file is gone from disk.
    std::fs::remove_file(crate::db::filename::table_file(tmp.path(), 7)).unwrap();
    let result = table
        .get(&internal_key(b"key", 100, ValueType::Value))
        .unwrap();
    assert_eq!(result, TableGet::Found(b"value".to_vec()));
}

#[test]
fn missing_file_is_an_error() {
    let tmp = TempDir::new().unwrap();
    let cache = TableCache::new(tmp.path().to_path_buf(), 4);
    assert!(cache.get_table(404).is_err());
}

#[test]
fn distinct_files_get_distinct_handles() {
    let tmp = TempDir::new().unwrap();
    write_table(tmp.path(), 1, b"a", b"1");
    write_table(tmp.path(), 2, b"b", b"2");

    let cache = TableCache::new(tmp.path().to_path_buf(), 4);
    assert_eq!(probe(&cache, 1, b"a"), TableGet::Found(b"1".to_vec()));
    assert_eq!(probe(&cache, 2, b"b"), TableGet::Found(b"2".to_vec()));
    assert_eq!(probe(&cache, 1, b"b"), TableGet::NotFound);
}
