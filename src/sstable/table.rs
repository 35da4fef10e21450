//! Building and writing a sorted run from a memtable snapshot.

use std::fs::File;
use std::io::{BufWriter, Write};
use std::path::Path;

use byteorder::{LittleEndian, WriteBytesExt};

use crate::bloom::BloomFilter;
use crate::config::{Key, Value, KEY_MAX, KEY_MIN};
use crate::error::Result;
use crate::skiplist::SkipList;

/// One-pass construction of a run: pairs in key order, the per-value offsets
/// into the packed value region, and the bloom filter over all keys.
pub struct TableBuilder {
    pub min_key: Key,
    pub max_key: Key,
    pub pair_count: u64,
    pub len_of_values: u64,
    pub bloom: BloomFilter,
    pub entries: Vec<(Key, Value)>,
    pub offsets: Vec<u64>,
}

impl TableBuilder {
    /// Snapshots a populated memtable. The list must be non-empty.
    pub fn from_memtable(list: &SkipList) -> Self {
        assert!(!list.is_empty(), "cannot build a table from an empty memtable");

        let mut bloom = BloomFilter::new();
        let mut entries = Vec::with_capacity(list.len());
        let mut offsets = Vec::with_capacity(list.len());
        let mut offset = 0u64;
        for (key, value) in list.iter() {
            offsets.push(offset);
            offset += value.len() as u64;
            bloom.insert(key);
            entries.push((key, value.to_vec()));
        }

        Self {
            min_key: entries.first().map_or(KEY_MAX, |(k, _)| *k),
            max_key: entries.last().map_or(KEY_MIN, |(k, _)| *k),
            pair_count: entries.len() as u64,
            len_of_values: offset,
            bloom,
            entries,
            offsets,
        }
    }

    /// Writes the run to `path` and syncs it. The caller installs the
    /// summary only after this returns, so a failed write never leaves a
    /// partially visible run.
    pub fn write_to(&self, path: &Path, timestamp: u64) -> Result<()> {
        let file = File::create(path)?;
        let mut writer = BufWriter::new(file);

        writer.write_u64::<LittleEndian>(timestamp)?;
        writer.write_u64::<LittleEndian>(self.len_of_values)?;
        writer.write_u64::<LittleEndian>(self.min_key)?;
        writer.write_u64::<LittleEndian>(self.max_key)?;
        writer.write_u64::<LittleEndian>(self.pair_count)?;
        writer.write_all(self.bloom.as_bytes())?;
        for ((key, _), offset) in self.entries.iter().zip(&self.offsets) {
            writer.write_u64::<LittleEndian>(*key)?;
            writer.write_u64::<LittleEndian>(*offset)?;
        }
        for (_, value) in &self.entries {
            writer.write_all(value)?;
        }

        writer.flush()?;
        writer.get_ref().sync_all()?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sstable::HEADER_SIZE;
    use tempfile::TempDir;

    #[test]
    fn test_builder_snapshot() {
        let mut list = SkipList::new();
        for key in [20, 10, 30] {
            list.insert(key, format!("v{key}").into_bytes());
        }
        let table = TableBuilder::from_memtable(&list);

        assert_eq!(table.min_key, 10);
        assert_eq!(table.max_key, 30);
        assert_eq!(table.pair_count, 3);
        assert_eq!(table.len_of_values, 3 * 3);
        assert_eq!(table.offsets, vec![0, 3, 6]);
        let keys: Vec<u64> = table.entries.iter().map(|(k, _)| *k).collect();
        assert_eq!(keys, vec![10, 20, 30]);
        for key in [10, 20, 30] {
            assert!(table.bloom.contains(key));
        }
    }

    #[test]
    fn test_written_file_size_matches_layout() {
        let dir = TempDir::new().expect("tempdir");
        let mut list = SkipList::new();
        for key in 1..=10 {
            list.insert(key, vec![b'x'; key as usize]);
        }
        let table = TableBuilder::from_memtable(&list);
        let path = dir.path().join("sst_0.sst");
        table.write_to(&path, 1).expect("write");

        let len = std::fs::metadata(&path).expect("metadata").len();
        assert_eq!(len, HEADER_SIZE + 10 * 16 + (1..=10u64).sum::<u64>());
    }
}
