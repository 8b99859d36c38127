//! Compaction planning.
//!
//! The planner decides *what* to merge; execution (reading inputs,
//! writing outputs, republishing the catalogue) belongs to the
//! orchestrator's background loop.
//!
//! ## Picking a compaction
//!
//! 1. **Score the levels.** Level 0 scores by file count against
//!    [`L0_COMPACTION_TRIGGER`](crate::version::L0_COMPACTION_TRIGGER);
//!    deeper levels score by total byte size against the level's
//!    budget. The highest score wins; below 1.0 the routine planner
//!    declines (the maintenance variant proceeds anyway).
//! 2. **Seed the inputs.** The first file past the level's compact
//!    pointer — the rotating cursor that spreads compaction work across
//!    the key space — wrapping to the first file.
//! 3. **Expand level 0.** Overlapping level-0 files pull each other in
//!    iteratively, because each added file may widen the range.
//! 4. **Pull in the next level.** Every `level + 1` file overlapping
//!    the union range of the chosen inputs.
//! 5. **Advance the compact pointer** to the largest chosen key.
//!
//! A compaction with exactly one input file and no `level + 1` overlap
//! is a **trivial move**: the file is re-registered one level down
//! without being read.

#[cfg(test)]
mod tests;

use tracing::debug;

use crate::keys::{internal_key_cmp, user_key_cmp, user_key_of};
use crate::version::{
    FileMetaData, L0_COMPACTION_TRIGGER, NUM_LEVELS, Version, max_bytes_for_level,
};

/// A planned compaction: `inputs[0]` from `level`, `inputs[1]` from
/// `level + 1`.
#[derive(Debug)]
pub struct Compaction {
    /// Source level.
    pub level: usize,
    /// Input files: `[0]` at `level`, `[1]` at `level + 1`.
    pub inputs: [Vec<FileMetaData>; 2],
}

impl Compaction {
    /// True when the single input can be promoted without rewriting.
    pub fn is_trivial_move(&self) -> bool {
        self.inputs[0].len() == 1 && self.inputs[1].is_empty()
    }
}

/// Picks the most urgent compaction, or `None` when every level scores
/// below 1.0.
pub fn pick_compaction(version: &mut Version) -> Option<Compaction> {
    let (level, score) = pick_level(version)?;
    if score <= 1.0 {
        return None;
    }
    debug!(level, score, "compaction picked by score");
    Some(pick_at_level(version, level))
}

/// Maintenance variant: compacts the highest-scoring non-empty level
/// even when nothing is urgent.
pub fn pick_maintenance_compaction(version: &mut Version) -> Option<Compaction> {
    let (level, score) = pick_level(version)?;
    debug!(level, score, "maintenance compaction picked");
    Some(pick_at_level(version, level))
}

/// Highest-scoring level that has at least one file.
fn pick_level(version: &Version) -> Option<(usize, f64)> {
    let mut best: Option<(usize, f64)> = None;
    for level in 0..NUM_LEVELS - 1 {
        if version.num_level_files(level) == 0 {
            continue;
        }
        let score = if level == 0 {
            version.num_level_files(0) as f64 / L0_COMPACTION_TRIGGER as f64
        } else {
            version.total_file_size(level) as f64 / max_bytes_for_level(level)
        };
        if best.is_none_or(|(_, best_score)| score > best_score) {
            best = Some((level, score));
        }
    }
    best
}

/// Builds the full input set for a compaction at `level`.
fn pick_at_level(version: &mut Version, level: usize) -> Compaction {
    let mut compaction = Compaction {
        level,
        inputs: [Vec::new(), Vec::new()],
    };

    // Seed: first file past the compact pointer, wrapping around.
    let pointer = &version.compact_pointer[level];
    let seed = version
        .files(level)
        .iter()
        .find(|f| pointer.is_empty() || internal_key_cmp(&f.largest, pointer).is_gt())
        .or_else(|| version.files(level).first())
        .cloned()
        .expect("pick_at_level called on an empty level");
    compaction.inputs[0].push(seed);

    // Level-0 files overlap each other; the union range must absorb
    // every overlapping neighbour, iterating because each absorbed file
    // can widen the range further.
    if level == 0 {
        let (smallest, largest) = key_range(&compaction.inputs[0]);
        compaction.inputs[0] = overlapping_inputs(version, 0, &smallest, &largest);
    }

    let (smallest, largest) = key_range(&compaction.inputs[0]);
    if level + 1 < NUM_LEVELS {
        compaction.inputs[1] = overlapping_inputs(version, level + 1, &smallest, &largest);
    }

    version.compact_pointer[level] = largest;
    compaction
}

/// Minimal internal-key range covering every file in `files`.
pub(crate) fn key_range(files: &[FileMetaData]) -> (Vec<u8>, Vec<u8>) {
    debug_assert!(!files.is_empty());
    let mut smallest = files[0].smallest.clone();
    let mut largest = files[0].largest.clone();
    for meta in &files[1..] {
        if internal_key_cmp(&meta.smallest, &smallest).is_lt() {
            smallest = meta.smallest.clone();
        }
        if internal_key_cmp(&meta.largest, &largest).is_gt() {
            largest = meta.largest.clone();
        }
    }
    (smallest, largest)
}

/// Every file at `level` whose user-key range touches `[begin, end]`.
///
/// At level 0 an overlapping file may itself extend the range, so the
/// search restarts from the top whenever the bounds grow.
pub(crate) fn overlapping_inputs(
    version: &Version,
    level: usize,
    begin: &[u8],
    end: &[u8],
) -> Vec<FileMetaData> {
    let mut user_begin = user_key_of(begin).to_vec();
    let mut user_end = user_key_of(end).to_vec();
    let mut outputs: Vec<FileMetaData> = Vec::new();

    let files = version.files(level);
    let mut i = 0;
    while i < files.len() {
        let meta = &files[i];
        i += 1;
        let file_start = user_key_of(&meta.smallest);
        let file_limit = user_key_of(&meta.largest);

        if user_key_cmp(file_limit, &user_begin).is_lt()
            || user_key_cmp(file_start, &user_end).is_gt()
        {
            continue;
        }

        outputs.push(meta.clone());
        if level == 0 {
            if user_key_cmp(file_start, &user_begin).is_lt() {
                user_begin = file_start.to_vec();
                outputs.clear();
                i = 0;
            } else if user_key_cmp(file_limit, &user_end).is_gt() {
                user_end = file_limit.to_vec();
                outputs.clear();
                i = 0;
            }
        }
    }
    outputs
}
