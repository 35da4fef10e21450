//! Tiered compaction.
//!
//! When a level exceeds its run budget (`capacity(L) = 2^(L+1)`), the
//! overflowing runs are merged with every overlapping run one level down and
//! rewritten there as budget-sized runs. On key collisions the newest
//! version wins: runs from a shallower level beat deeper ones, and within a
//! level a larger serial beats a smaller one. Tombstones are dropped once
//! the merge targets the bottom of the tree, where no older version can
//! remain shadowed.

use itertools::Itertools as _;

use crate::config::{capacity, Key, KEY_MAX, KEY_MIN, KEY_SIZE, LSM_MAX_LAYER, MEM_LIMIT, TOMBSTONE};
use crate::error::Result;
use crate::sstable::{RunEntry, Summary, TableBuilder, TableStream};
use crate::store::LsmStore;

/// Compacts upward from level 0 until every level is within budget.
pub(crate) fn compact(store: &mut LsmStore) -> Result<()> {
    let mut layer = 0;
    while layer + 1 < LSM_MAX_LAYER && store.disk_cache[layer].len() > capacity(layer) {
        merge_level(store, layer)?;
        layer += 1;
    }
    Ok(())
}

/// Merges the selected runs of `layer` into `layer + 1`.
fn merge_level(store: &mut LsmStore, layer: usize) -> Result<()> {
    // Level 0 runs may overlap, so the whole level participates; deeper
    // levels only push out the runs beyond their budget (the oldest, at the
    // back of the cache).
    let start = if layer == 0 { 0 } else { capacity(layer) };
    let mut selected = store.disk_cache[layer].take_from(start);

    let mut span_lo = KEY_MAX;
    let mut span_hi = KEY_MIN;
    let mut max_timestamp = 0;
    for summary in &selected {
        span_lo = span_lo.min(summary.min_key);
        span_hi = span_hi.max(summary.max_key);
        max_timestamp = max_timestamp.max(summary.timestamp);
    }

    let overlapping = store.disk_cache[layer + 1].take_overlapping(span_lo, span_hi);
    for summary in &overlapping {
        max_timestamp = max_timestamp.max(summary.timestamp);
    }
    selected.extend(overlapping);

    tracing::info!(
        source_level = layer,
        target_level = layer + 1,
        runs = selected.len(),
        "starting tiered compaction"
    );

    // Once the target is the deepest populated level, a tombstone has no
    // older version left to shadow. Any same-level run holding the key
    // overlaps the merge span and is part of this merge.
    let target_is_bottom = store.depth <= layer + 1;

    let mut runs: Vec<Vec<RunEntry>> = Vec::with_capacity(selected.len());
    for summary in &selected {
        let stream = TableStream::open(
            &store.sst_path(summary.layer, summary.serial),
            summary.layer,
            summary.serial,
        )?;
        runs.push(stream.collect::<Result<Vec<_>>>()?);
    }

    store.merge_table.clear();
    let merged = runs.into_iter().kmerge_by(|a, b| {
        if a.key != b.key {
            a.key < b.key
        } else if a.layer != b.layer {
            a.layer < b.layer
        } else {
            a.serial > b.serial
        }
    });

    let mut prev: Option<Key> = None;
    for entry in merged {
        // Ties were ordered newest-first, so later duplicates are stale.
        if prev == Some(entry.key) {
            continue;
        }
        prev = Some(entry.key);
        if target_is_bottom && entry.value == TOMBSTONE {
            continue;
        }
        if store.merge_table.mem_size() + KEY_SIZE + entry.value.len() >= MEM_LIMIT {
            emit_run(store, layer, max_timestamp)?;
        }
        store.merge_table.insert(entry.key, entry.value);
    }
    if !store.merge_table.is_empty() {
        emit_run(store, layer, max_timestamp)?;
    }

    // The merged runs are dead; leaving a file behind would resurrect stale
    // versions at the next open.
    for summary in &selected {
        std::fs::remove_file(store.sst_path(summary.layer, summary.serial))?;
    }

    tracing::info!(
        source_level = layer,
        target_level = layer + 1,
        merged_runs = selected.len(),
        "completed tiered compaction"
    );
    Ok(())
}

/// Writes the merge buffer as one run at `source_layer + 1` and clears it.
fn emit_run(store: &mut LsmStore, source_layer: usize, timestamp: u64) -> Result<()> {
    let target = source_layer + 1;
    let table = TableBuilder::from_memtable(&store.merge_table);

    let dir = store.level_dir(target as u32);
    if !dir.exists() {
        std::fs::create_dir_all(&dir)?;
        store.depth = target;
    }
    let serial = store.available_serial[target];
    table.write_to(&store.sst_path(target as u32, serial), timestamp)?;

    tracing::debug!(
        level = target,
        serial,
        timestamp,
        pairs = table.pair_count,
        "wrote compacted run"
    );

    store.disk_cache[target].insert(Summary::from_table(&table, target as u32, serial, timestamp));
    store.available_serial[target] += 1;
    store.merge_table.clear();
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn count_runs(store: &LsmStore, layer: u32) -> usize {
        let dir = store.level_dir(layer);
        if !dir.exists() {
            return 0;
        }
        std::fs::read_dir(dir).expect("read_dir").count()
    }

    #[test]
    fn test_level_zero_overflow_moves_runs_down() {
        let dir = TempDir::new().expect("tempdir");
        let mut store = LsmStore::open(dir.path()).expect("open");

        // Each filler batch overflows the 16 KiB memtable and flushes; the
        // third flush overflows capacity(0) = 2 and triggers a merge.
        for key in 1..=64u64 {
            store.put(key, vec![b'c'; 1024]).expect("put");
        }
        crate::store::flush::flush(&mut store).expect("flush");
        compact(&mut store).expect("compact");

        assert!(count_runs(&store, 0) <= capacity(0));
        assert!(count_runs(&store, 1) > 0, "runs must land in level 1");
        assert_eq!(store.depth, 1);

        // Every key still reads back after the merge.
        for key in 1..=64u64 {
            assert_eq!(store.get(key).expect("get"), Some(vec![b'c'; 1024]));
        }
    }

    #[test]
    fn test_merge_keeps_newest_version() {
        let dir = TempDir::new().expect("tempdir");
        let mut store = LsmStore::open(dir.path()).expect("open");

        // Three generations of the same key, each pushed into its own
        // level-0 run, then merged into one.
        for (round, tag) in [(0u8, b"old"), (1, b"mid"), (2, b"new")] {
            store.put(500, tag.to_vec()).expect("put");
            for key in 1..=20u64 {
                store
                    .put(1000 + u64::from(round) * 100 + key, vec![b'f'; 1024])
                    .expect("filler");
            }
        }
        crate::store::flush::flush(&mut store).expect("flush");
        compact(&mut store).expect("compact");

        assert_eq!(store.get(500).expect("get"), Some(b"new".to_vec()));
    }

    #[test]
    fn test_tombstones_dropped_at_bottom() {
        let dir = TempDir::new().expect("tempdir");
        let mut store = LsmStore::open(dir.path()).expect("open");

        // Three level-0 runs' worth of data, all of it deleted again.
        for key in 1..=45u64 {
            store.put(key, vec![b'd'; 1024]).expect("put");
        }
        for key in 1..=45u64 {
            store.del(key).expect("del");
        }
        crate::store::flush::flush(&mut store).expect("flush");
        compact(&mut store).expect("compact");

        // The merge targeted the bottom with every newest version a
        // tombstone, so nothing survives anywhere in the tree.
        for level in 0..LSM_MAX_LAYER {
            for summary in store.disk_cache[level].iter() {
                for key in 1..=45u64 {
                    assert_eq!(summary.offset_of(key), None, "key {key} at level {level}");
                }
            }
        }
        for key in 1..=45u64 {
            assert_eq!(store.get(key).expect("get"), None);
        }
    }
}
