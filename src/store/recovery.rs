//! Rebuilding store state at open.
//!
//! Level membership is recovered from the directory tree itself: each
//! `data/level-<L>/` directory is walked for `sst_<serial>.sst` files and a
//! summary is loaded from every run's header region. The WAL is replayed
//! afterwards, so replay-induced flushes land on top of the recovered state.

use crate::error::Result;
use crate::sstable::Summary;
use crate::store::LsmStore;
use crate::config::LSM_MAX_LAYER;

pub(crate) fn recover(store: &mut LsmStore) -> Result<()> {
    load_levels(store)?;
    replay_wal(store)?;
    tracing::info!(
        depth = store.depth,
        timestamp = store.cur_timestamp,
        "recovery complete"
    );
    Ok(())
}

fn load_levels(store: &mut LsmStore) -> Result<()> {
    let mut max_timestamp = None;
    for layer in 0..LSM_MAX_LAYER {
        let dir = store.level_dir(layer as u32);
        if !dir.exists() {
            break;
        }
        store.depth = layer;

        let mut serials = Vec::new();
        for entry in std::fs::read_dir(&dir)? {
            let entry = entry?;
            if entry.file_type()?.is_dir() {
                continue;
            }
            if let Some(serial) = parse_serial(&entry.file_name().to_string_lossy()) {
                serials.push(serial);
            }
        }

        // Ascending load order: front-inserts leave the newest run at the
        // front of the cache, restoring the level's recency order.
        serials.sort_unstable();
        for &serial in &serials {
            let summary = Summary::load(&store.sst_path(layer as u32, serial), layer as u32, serial)?;
            max_timestamp = Some(max_timestamp.map_or(summary.timestamp, |m: u64| m.max(summary.timestamp)));
            store.disk_cache[layer].insert(summary);
        }
        if let Some(&max_serial) = serials.last() {
            store.available_serial[layer] = max_serial + 1;
        }
        tracing::debug!(layer, runs = serials.len(), "loaded level summaries");
    }

    // Resume past every existing run so no two runs share a timestamp.
    if let Some(max) = max_timestamp {
        store.cur_timestamp = max + 1;
    }
    Ok(())
}

/// Extracts the serial from an `sst_<serial>.sst` file name.
fn parse_serial(name: &str) -> Option<u64> {
    name.strip_prefix("sst_")?.strip_suffix(".sst")?.parse().ok()
}

/// Re-applies intact WAL records as ordinary puts.
///
/// Records are read out before the log is cleared: each re-applied put
/// appends to the fresh log, so pending writes keep a durable copy the whole
/// way through.
fn replay_wal(store: &mut LsmStore) -> Result<()> {
    if !store.wal.exists() {
        return Ok(());
    }
    let records = store.wal.replay()?.collect::<Result<Vec<_>>>()?;
    store.wal.clear()?;
    let count = records.len();
    for (key, value) in records {
        store.write(key, value)?;
    }
    if count > 0 {
        tracing::info!(records = count, "replayed write-ahead log");
    }
    Ok(())
}
