//! LSM-tree coordinator.
//!
//! Owns the memtable, the per-level summary caches, the WAL, and the data
//! directory, and wires them into the public `put`/`get`/`del` surface:
//!
//! ```text
//!   put ──► WAL append ──► memtable insert
//!              │                │ memtable at budget
//!              │                ▼
//!              │          flush ──► level-0 run ──► tiered compaction
//!              │
//!   get ──► memtable ──► level caches (range + bloom + directory)
//!                              │ hit
//!                              ▼
//!                        one value read from the run file
//! ```
//!
//! The engine is single-threaded and cooperative: every operation runs to
//! completion on the calling thread, and a flush or compaction stalls the
//! `put`/`del` that triggered it. There is no internal synchronization;
//! embedders wrap the store in their own if they share it across threads. A
//! lock file keeps a second store (or process) from opening the same
//! directory.
//!
//! Directory layout:
//!
//! ```text
//! <dir>/data/level-<L>/sst_<serial>.sst
//! <dir>/log/wal.log
//! ```

pub mod compaction;
pub mod flush;
pub mod recovery;

use std::path::PathBuf;

use crate::cache::LevelCache;
use crate::config::{Key, Value, KEY_MAX, KEY_MIN, KEY_SIZE, LSM_MAX_LAYER, MEM_LIMIT, TOMBSTONE};
use crate::errinput;
use crate::error::Result;
use crate::flock::FileLock;
use crate::skiplist::SkipList;
use crate::sstable::read_value_at;
use crate::wal::Wal;

const LOCK_FILE: &str = "cinderdb.lock";

pub struct LsmStore {
    mem_table: SkipList,
    /// Reused buffer for compaction output.
    merge_table: SkipList,
    disk_cache: Vec<LevelCache>,
    /// Next free run serial per level.
    available_serial: [u64; LSM_MAX_LAYER],
    /// Monotonic counter ordering all runs.
    cur_timestamp: u64,
    /// Deepest level holding any run.
    depth: usize,
    data_dir: PathBuf,
    wal: Wal,
    _lock: FileLock,
    closed: bool,
}

impl LsmStore {
    /// Opens (or creates) a store rooted at `dir`, recovering level state
    /// from the directory tree and replaying any pending WAL records.
    pub fn open(dir: impl Into<PathBuf>) -> Result<Self> {
        let data_dir = dir.into();
        std::fs::create_dir_all(data_dir.join("data"))?;
        std::fs::create_dir_all(data_dir.join("log"))?;
        let lock = FileLock::lock(data_dir.join(LOCK_FILE))?;
        let wal = Wal::new(data_dir.join("log").join("wal.log"));

        let mut store = Self {
            mem_table: SkipList::new(),
            merge_table: SkipList::new(),
            disk_cache: (0..LSM_MAX_LAYER).map(|_| LevelCache::new()).collect(),
            available_serial: [0; LSM_MAX_LAYER],
            cur_timestamp: 0,
            depth: 0,
            data_dir,
            wal,
            _lock: lock,
            closed: false,
        };
        recovery::recover(&mut store)?;
        Ok(store)
    }

    /// Inserts or updates a key. Returns true for a fresh insert, false for
    /// an overwrite; either is success.
    pub fn put(&mut self, key: Key, value: Value) -> Result<bool> {
        check_key(key)?;
        if value == TOMBSTONE {
            return errinput!("value {:?} is reserved", String::from_utf8_lossy(TOMBSTONE));
        }
        self.write(key, value)
    }

    /// Looks up a key. Tombstoned keys read as absent.
    pub fn get(&self, key: Key) -> Result<Option<Value>> {
        if key == KEY_MIN || key == KEY_MAX {
            return Ok(None);
        }
        match self.get_raw(key)? {
            Some(value) if value == TOMBSTONE => Ok(None),
            other => Ok(other),
        }
    }

    /// Deletes a key by writing a tombstone. Returns true iff the key
    /// logically existed (live or already tombstoned) before the call.
    pub fn del(&mut self, key: Key) -> Result<bool> {
        check_key(key)?;
        match self.get_raw(key)? {
            None => Ok(false),
            Some(value) if value == TOMBSTONE => Ok(true),
            Some(_) => {
                self.mem_table.remove(key);
                self.write(key, TOMBSTONE.to_vec())?;
                Ok(true)
            }
        }
    }

    /// Flushes pending state and shuts the store down.
    pub fn close(mut self) -> Result<()> {
        self.shutdown()?;
        self.closed = true;
        Ok(())
    }

    /// Admits one write: WAL first, then the memtable. A write that would
    /// reach the memtable budget flushes and compacts before being admitted
    /// against the empty table.
    fn write(&mut self, key: Key, value: Value) -> Result<bool> {
        if self.mem_table.mem_size() + KEY_SIZE + value.len() < MEM_LIMIT {
            self.wal.append(key, &value)?;
            Ok(self.mem_table.insert(key, value))
        } else {
            flush::flush(self)?;
            compaction::compact(self)?;
            self.wal.clear()?;
            self.wal.append(key, &value)?;
            Ok(self.mem_table.insert(key, value))
        }
    }

    /// Lookup that surfaces tombstone values to the caller.
    fn get_raw(&self, key: Key) -> Result<Option<Value>> {
        if let Some(value) = self.mem_table.search(key) {
            return Ok(Some(value.to_vec()));
        }
        for level in 0..=self.depth {
            if let Some((layer, serial, offset)) = self.disk_cache[level].search(key) {
                let path = self.sst_path(layer, serial);
                return read_value_at(&path, offset).map(Some);
            }
        }
        Ok(None)
    }

    fn shutdown(&mut self) -> Result<()> {
        if self.mem_table.is_empty() {
            return Ok(());
        }
        flush::flush(self)?;
        compaction::compact(self)?;
        self.wal.clear()?;
        Ok(())
    }

    pub(crate) fn level_dir(&self, layer: u32) -> PathBuf {
        self.data_dir.join("data").join(format!("level-{layer}"))
    }

    pub(crate) fn sst_path(&self, layer: u32, serial: u64) -> PathBuf {
        self.level_dir(layer).join(format!("sst_{serial}.sst"))
    }
}

impl Drop for LsmStore {
    fn drop(&mut self) {
        if !self.closed {
            if let Err(e) = self.shutdown() {
                tracing::error!(error = %e, "shutdown during drop failed");
            }
        }
    }
}

fn check_key(key: Key) -> Result<()> {
    if key == KEY_MIN || key == KEY_MAX {
        return errinput!("key {key} is reserved");
    }
    Ok(())
}
