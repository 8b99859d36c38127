use crate::compaction::{key_range, overlapping_inputs, pick_compaction, pick_maintenance_compaction};
use crate::keys::{ValueType, internal_key};
use crate::version::{FileMetaData, L0_COMPACTION_TRIGGER, Version};

fn meta(number: u64, size: u64, smallest: &str, largest: &str) -> FileMetaData {
    FileMetaData {
        number,
        file_size: size,
        smallest: internal_key(smallest.as_bytes(), number * 10, ValueType::Value),
        largest: internal_key(largest.as_bytes(), number * 10 + 1, ValueType::Value),
    }
}

#[test]
fn quiet_tree_picks_nothing() {
    let mut version = Version::new();
    version.add_file(0, meta(1, 100, "a", "m"));
    // One level-0 file scores 0.25 — far below urgency.
    assert!(pick_compaction(&mut version).is_none());
}

#[test]
fn level0_file_count_drives_the_score() {
    let mut version = Version::new();
    for i in 0..L0_COMPACTION_TRIGGER as u64 + 1 {
        let low = format!("k{i}0");
        let high = format!("k{i}9");
        version.add_file(0, meta(i + 1, 100, &low, &high));
    }

    let compaction = pick_compaction(&mut version).expect("L0 over trigger");
    assert_eq!(compaction.level, 0);
    assert!(!compaction.inputs[0].is_empty());
}

#[test]
fn oversized_level_beats_level0() {
    let mut version = Version::new();
    version.add_file(0, meta(1, 100, "a", "b"));
    // 30 MiB at level 1 scores 3.0 against its 10 MiB budget.
    version.add_file(1, meta(2, 30 * 1024 * 1024, "c", "f"));

    let compaction = pick_compaction(&mut version).expect("level 1 oversized");
    assert_eq!(compaction.level, 1);
    assert_eq!(compaction.inputs[0][0].number, 2);
}

#[test]
fn level0_inputs_absorb_transitive_overlap() {
    let mut version = Version::new();
    // a—d overlaps c—g, which overlaps f—j: all three must be chosen
    // even though a—d and f—j are themselves disjoint.
    version.add_file(0, meta(1, 100, "a", "d"));
    version.add_file(0, meta(2, 100, "c", "g"));
    version.add_file(0, meta(3, 100, "f", "j"));
    version.add_file(0, meta(4, 100, "x", "z")); // unrelated
    version.add_file(0, meta(5, 100, "w", "y")); // push count over trigger

    let compaction = pick_compaction(&mut version).expect("L0 at trigger");
    assert_eq!(compaction.level, 0);
    let mut numbers: Vec<u64> = compaction.inputs[0].iter().map(|f| f.number).collect();
    numbers.sort_unstable();
    assert_eq!(numbers, [1, 2, 3]);
}

#[test]
fn next_level_inputs_cover_the_union_range() {
    let mut version = Version::new();
    for i in 0..5u64 {
        version.add_file(0, meta(i + 1, 100, "c", "h"));
    }
    version.add_file(1, meta(10, 100, "a", "b")); // before the range
    version.add_file(1, meta(11, 100, "b2", "d")); // overlaps
    version.add_file(1, meta(12, 100, "e", "i")); // overlaps
    version.add_file(1, meta(13, 100, "k", "z")); // after the range

    let compaction = pick_compaction(&mut version).expect("L0 over trigger");
    let numbers: Vec<u64> = compaction.inputs[1].iter().map(|f| f.number).collect();
    assert_eq!(numbers, [11, 12]);
}

#[test]
fn trivial_move_detection() {
    let mut version = Version::new();
    // A single oversized level-1 file with no level-2 overlap.
    version.add_file(1, meta(1, 20 * 1024 * 1024, "a", "c"));
    version.add_file(2, meta(2, 100, "x", "z"));

    let compaction = pick_compaction(&mut version).expect("level 1 oversized");
    assert_eq!(compaction.level, 1);
    assert!(compaction.is_trivial_move());

    // The same shape with level-2 overlap is a real merge.
    let mut version = Version::new();
    version.add_file(1, meta(1, 20 * 1024 * 1024, "a", "c"));
    version.add_file(2, meta(2, 100, "b", "d"));
    let compaction = pick_compaction(&mut version).expect("level 1 oversized");
    assert!(!compaction.is_trivial_move());
}

#[test]
fn compact_pointer_rotates_through_the_level() {
    let mut version = Version::new();
    version.add_file(1, meta(1, 20 * 1024 * 1024, "a", "c"));
    version.add_file(1, meta(2, 20 * 1024 * 1024, "f", "h"));
    version.add_file(1, meta(3, 20 * 1024 * 1024, "k", "m"));

    let first = pick_maintenance_compaction(&mut version).unwrap();
    assert_eq!(first.inputs[0][0].number, 1);

    // Remove the compacted file as execution would, then pick again:
    // the pointer moves the cursor to the next file.
    version.remove_file(1, 1);
    let second = pick_maintenance_compaction(&mut version).unwrap();
    assert_eq!(second.inputs[0][0].number, 2);

    version.remove_file(1, 2);
    let third = pick_maintenance_compaction(&mut version).unwrap();
    assert_eq!(third.inputs[0][0].number, 3);

    // Cursor past the end wraps back to the first file.
    let fourth = pick_maintenance_compaction(&mut version).unwrap();
    assert_eq!(fourth.inputs[0][0].number, 3);
}

#[test]
fn maintenance_pick_works_below_urgency() {
    let mut version = Version::new();
    version.add_file(0, meta(1, 100, "a", "m"));

    assert!(pick_compaction(&mut version).is_none());
    let compaction = pick_maintenance_compaction(&mut version).expect("maintenance always picks");
    assert_eq!(compaction.level, 0);
}

#[test]
fn key_range_covers_all_inputs() {
    let files = vec![meta(1, 1, "d", "f"), meta(2, 1, "a", "c"), meta(3, 1, "e", "k")];
    let (smallest, largest) = key_range(&files);
    assert_eq!(crate::keys::user_key_of(&smallest), b"a");
    assert_eq!(crate::keys::user_key_of(&largest), b"k");
}

#[test]
fn overlapping_inputs_respects_boundaries() {
    let mut version = Version::new();
    version.add_file(1, meta(1, 1, "a", "c"));
    version.add_file(1, meta(2, 1, "e", "g"));
    version.add_file(1, meta(3, 1, "i", "k"));

    let begin = internal_key(b"c", 100, ValueType::Value);
    let end = internal_key(b"e", 100, ValueType::Value);
    let picked = overlapping_inputs(&version, 1, &begin, &end);
    let numbers: Vec<u64> = picked.iter().map(|f| f.number).collect();
    // Touching the boundary counts as overlap on both sides.
    assert_eq!(numbers, [1, 2]);
}
