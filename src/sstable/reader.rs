//! Reading values back out of a sorted run.
//!
//! Two access paths: a random read of one value given its directory offset
//! (the point-lookup path), and a lazy full scan with run provenance (the
//! compaction path).

use std::fs::File;
use std::io::{BufReader, Read, Seek, SeekFrom};
use std::path::Path;

use byteorder::{LittleEndian, ReadBytesExt};

use crate::bloom::BLOOM_BYTES;
use crate::config::{Key, Value};
use crate::errdata;
use crate::error::Result;
use crate::sstable::{Header, DIR_ENTRY_SIZE, HEADER_SIZE};

/// Reads the single value whose directory offset equals `offset`.
///
/// The directory is streamed rather than materialized: the matching entry's
/// length is the gap to its successor's offset, or to `len_of_values` for
/// the final entry. An offset no directory entry claims is an error.
pub fn read_value_at(path: &Path, offset: u64) -> Result<Value> {
    let file = File::open(path)?;
    let file_len = file.metadata()?.len();
    let mut reader = BufReader::new(file);
    let header = Header::read_from(&mut reader)?;
    header.validate(file_len)?;
    reader.seek_relative(BLOOM_BYTES as i64)?;

    let mut found = false;
    let mut successor = None;
    for _ in 0..header.pair_count {
        let _key = reader.read_u64::<LittleEndian>()?;
        let entry_offset = reader.read_u64::<LittleEndian>()?;
        if found {
            successor = Some(entry_offset);
            break;
        }
        found = entry_offset == offset;
    }
    if !found {
        return errdata!("no value at offset {offset} in table {}", path.display());
    }
    let end = successor.unwrap_or(header.len_of_values);
    let Some(len) = end.checked_sub(offset) else {
        return errdata!(
            "corrupt table {}: directory offsets not ascending at {offset}",
            path.display()
        );
    };

    let mut file = reader.into_inner();
    file.seek(SeekFrom::Start(
        HEADER_SIZE + header.pair_count * DIR_ENTRY_SIZE + offset,
    ))?;
    let mut value = vec![0u8; len as usize];
    file.read_exact(&mut value)?;
    Ok(value)
}

/// One merged-stream element: a key-value pair tagged with the run it came
/// from, so the merge can break key ties by recency.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RunEntry {
    pub layer: u32,
    pub serial: u64,
    pub key: Key,
    pub value: Value,
}

/// Lazy in-order scan over every pair of a run.
///
/// The directory is held in memory; values stream from the file one at a
/// time as the iterator advances.
pub struct TableStream {
    layer: u32,
    serial: u64,
    reader: BufReader<File>,
    directory: Vec<(Key, u64)>,
    len_of_values: u64,
    next: usize,
}

impl TableStream {
    pub fn open(path: &Path, layer: u32, serial: u64) -> Result<Self> {
        let file = File::open(path)?;
        let file_len = file.metadata()?.len();
        let mut reader = BufReader::new(file);
        let header = Header::read_from(&mut reader)?;
        header.validate(file_len)?;
        reader.seek_relative(BLOOM_BYTES as i64)?;

        let mut directory = Vec::with_capacity(header.pair_count as usize);
        for _ in 0..header.pair_count {
            let key = reader.read_u64::<LittleEndian>()?;
            let offset = reader.read_u64::<LittleEndian>()?;
            directory.push((key, offset));
        }

        // The reader now sits at the start of the value region.
        Ok(Self {
            layer,
            serial,
            reader,
            directory,
            len_of_values: header.len_of_values,
            next: 0,
        })
    }

    fn read(&mut self) -> Result<Option<RunEntry>> {
        let Some(&(key, offset)) = self.directory.get(self.next) else {
            return Ok(None);
        };
        let end = self
            .directory
            .get(self.next + 1)
            .map_or(self.len_of_values, |&(_, next_offset)| next_offset);
        let Some(len) = end.checked_sub(offset) else {
            return errdata!("corrupt table: directory offsets not ascending at key {key}");
        };
        let mut value = vec![0u8; len as usize];
        self.reader.read_exact(&mut value)?;
        self.next += 1;
        Ok(Some(RunEntry {
            layer: self.layer,
            serial: self.serial,
            key,
            value,
        }))
    }
}

impl Iterator for TableStream {
    type Item = Result<RunEntry>;

    fn next(&mut self) -> Option<Self::Item> {
        self.read().transpose()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::skiplist::SkipList;
    use crate::sstable::TableBuilder;
    use std::io::Write;
    use tempfile::TempDir;

    fn write_run(dir: &TempDir, range: std::ops::RangeInclusive<u64>) -> std::path::PathBuf {
        let mut list = SkipList::new();
        for key in range {
            list.insert(key, format!("key = {key}, value = {key}").into_bytes());
        }
        let table = TableBuilder::from_memtable(&list);
        let path = dir.path().join("sst_0.sst");
        table.write_to(&path, 1).expect("write");
        path
    }

    #[test]
    fn test_read_value_at_offsets() {
        let dir = TempDir::new().expect("tempdir");
        let path = write_run(&dir, 1..=127);

        assert_eq!(
            read_value_at(&path, 0).expect("first value"),
            b"key = 1, value = 1".to_vec()
        );
        assert_eq!(
            read_value_at(&path, 18).expect("second value"),
            b"key = 2, value = 2".to_vec()
        );

        let len_of_values: u64 = (1..=127u64)
            .map(|i| format!("key = {i}, value = {i}").len() as u64)
            .sum();
        let last = b"key = 127, value = 127";
        assert_eq!(
            read_value_at(&path, len_of_values - last.len() as u64).expect("last value"),
            last.to_vec()
        );
    }

    #[test]
    fn test_read_value_at_unknown_offset_fails() {
        let dir = TempDir::new().expect("tempdir");
        let path = write_run(&dir, 1..=4);
        assert!(read_value_at(&path, 1).is_err());
    }

    #[test]
    fn test_stream_round_trips_pairs() {
        let dir = TempDir::new().expect("tempdir");
        let path = write_run(&dir, 1..=127);

        let entries: Vec<_> = TableStream::open(&path, 3, 9)
            .expect("open")
            .collect::<Result<Vec<_>>>()
            .expect("entries");
        assert_eq!(entries.len(), 127);
        for (i, entry) in entries.iter().enumerate() {
            let key = i as u64 + 1;
            assert_eq!(entry.layer, 3);
            assert_eq!(entry.serial, 9);
            assert_eq!(entry.key, key);
            assert_eq!(entry.value, format!("key = {key}, value = {key}").into_bytes());
        }
    }

    #[test]
    fn test_truncated_file_is_rejected_at_open() {
        let dir = TempDir::new().expect("tempdir");
        let path = write_run(&dir, 1..=16);

        let len = std::fs::metadata(&path).expect("metadata").len();
        let file = std::fs::OpenOptions::new()
            .write(true)
            .open(&path)
            .expect("open");
        file.set_len(len - 10).expect("truncate");

        assert!(TableStream::open(&path, 0, 0).is_err());
    }

    #[test]
    fn test_garbage_header_is_rejected_at_open() {
        let dir = TempDir::new().expect("tempdir");
        let path = dir.path().join("sst_1.sst");
        let mut file = File::create(&path).expect("create");
        file.write_all(&[0xAB; 64]).expect("garbage");
        drop(file);

        assert!(TableStream::open(&path, 0, 0).is_err());
    }
}
