use crate::keys::{ValueType, internal_key, internal_key_cmp};
use crate::skiplist::SkipList;

fn collect(list: &SkipList) -> Vec<(Vec<u8>, Vec<u8>)> {
    let mut out = Vec::new();
    let mut pos = list.first();
    while let Some(p) = pos {
        out.push(list.entry(p));
        pos = list.next_after(p);
    }
    out
}

#[test]
fn empty_list() {
    let list = SkipList::new();
    assert!(list.is_empty());
    assert_eq!(list.first(), None);
    assert_eq!(list.seek(&internal_key(b"x", 1, ValueType::Value)), None);
}

#[test]
fn single_insert_and_seek() {
    let list = SkipList::new();
    let key = internal_key(b"hello", 1, ValueType::Value);
    list.insert(key.clone(), b"world".to_vec());

    assert_eq!(list.len(), 1);
    let pos = list.seek(&key).unwrap();
    let (found_key, found_value) = list.entry(pos);
    assert_eq!(found_key, key);
    assert_eq!(found_value, b"world");
}

#[test]
fn iteration_is_sorted() {
    let list = SkipList::new();
    // Insert in scrambled order.
    for i in [5u32, 1, 9, 3, 7, 2, 8, 0, 6, 4] {
        let key = internal_key(format!("key{i:03}").as_bytes(), u64::from(i) + 1, ValueType::Value);
        list.insert(key, format!("val{i:03}").into_bytes());
    }

    let entries = collect(&list);
    assert_eq!(entries.len(), 10);
    for window in entries.windows(2) {
        assert!(internal_key_cmp(&window[0].0, &window[1].0).is_lt());
    }
}

#[test]
fn duplicate_user_keys_order_newest_first() {
    let list = SkipList::new();
    list.insert(internal_key(b"k", 1, ValueType::Value), b"old".to_vec());
    list.insert(internal_key(b"k", 3, ValueType::Value), b"new".to_vec());
    list.insert(internal_key(b"k", 2, ValueType::Value), b"mid".to_vec());

    let entries = collect(&list);
    let values: Vec<&[u8]> = entries.iter().map(|(_, v)| v.as_slice()).collect();
    assert_eq!(values, [b"new".as_slice(), b"mid", b"old"]);
}

#[test]
fn seek_lands_on_first_greater_or_equal() {
    let list = SkipList::new();
    for i in (0u32..100).step_by(2) {
        let key = internal_key(format!("key{i:03}").as_bytes(), 1, ValueType::Value);
        list.insert(key, vec![]);
    }

    // Seeking an absent odd key lands on the next even one.
    let target = internal_key(b"key051", 1, ValueType::Value);
    let pos = list.seek(&target).unwrap();
    let (key, _) = list.entry(pos);
    assert_eq!(crate::keys::user_key_of(&key), b"key052");

    // Seeking past the end finds nothing.
    let target = internal_key(b"key999", 1, ValueType::Value);
    assert_eq!(list.seek(&target), None);
}

#[test]
fn large_population_stays_sorted() {
    let list = SkipList::new();
    for i in 0u32..2000 {
        // Bit-reversed order exercises towers at many heights.
        let scrambled = i.reverse_bits() >> 21;
        let key = internal_key(
            format!("key{scrambled:05}").as_bytes(),
            u64::from(i) + 1,
            ValueType::Value,
        );
        list.insert(key, vec![]);
    }

    let entries = collect(&list);
    assert_eq!(entries.len(), 2000);
    for window in entries.windows(2) {
        assert!(internal_key_cmp(&window[0].0, &window[1].0).is_lt());
    }
}
