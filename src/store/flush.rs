//! Flushing the memtable into a level-0 run.

use crate::error::Result;
use crate::sstable::{Summary, TableBuilder};
use crate::store::LsmStore;

/// Persists the current memtable as a new level-0 SSTable and clears it.
///
/// The file is fully written and synced before its summary becomes visible
/// in the level cache, so a failed write leaves no partially installed run.
pub(crate) fn flush(store: &mut LsmStore) -> Result<()> {
    if store.mem_table.is_empty() {
        return Ok(());
    }

    let serial = store.available_serial[0];
    let timestamp = store.cur_timestamp;
    let table = TableBuilder::from_memtable(&store.mem_table);

    let dir = store.level_dir(0);
    if !dir.exists() {
        std::fs::create_dir_all(&dir)?;
    }
    table.write_to(&store.sst_path(0, serial), timestamp)?;

    tracing::info!(
        serial,
        timestamp,
        pairs = table.pair_count,
        bytes = table.len_of_values,
        "flushed memtable to level 0"
    );

    store.disk_cache[0].insert(Summary::from_table(&table, 0, serial, timestamp));
    store.available_serial[0] += 1;
    store.cur_timestamp += 1;
    store.mem_table.clear();
    Ok(())
}
