//! In-memory projection of a persisted run.
//!
//! A summary carries everything the read path needs to decide whether a run
//! can contain a key (key range, bloom filter, key-to-offset directory) plus
//! the run's identity, without holding any value bytes. Summaries are built
//! from the table builder at write time or reloaded from the file's header
//! region at open.

use std::fs::File;
use std::io::BufReader;
use std::path::Path;

use byteorder::{LittleEndian, ReadBytesExt};

use crate::bloom::{BloomFilter, BLOOM_BYTES};
use crate::config::Key;
use crate::errdata;
use crate::error::Result;
use crate::sstable::{Header, TableBuilder};

#[derive(Debug, Clone)]
pub struct Summary {
    pub layer: u32,
    pub serial: u64,
    pub timestamp: u64,
    pub min_key: Key,
    pub max_key: Key,
    pub pair_count: u64,
    pub bloom: BloomFilter,
    pub key_offset: Vec<(Key, u64)>,
}

impl Summary {
    /// Projects a freshly built table, copying its bloom and directory.
    pub fn from_table(table: &TableBuilder, layer: u32, serial: u64, timestamp: u64) -> Self {
        let key_offset = table
            .entries
            .iter()
            .zip(&table.offsets)
            .map(|((key, _), offset)| (*key, *offset))
            .collect();
        Self {
            layer,
            serial,
            timestamp,
            min_key: table.min_key,
            max_key: table.max_key,
            pair_count: table.pair_count,
            bloom: table.bloom.clone(),
            key_offset,
        }
    }

    /// Reads only the header, bloom, and directory region of a run file.
    pub fn load(path: &Path, layer: u32, serial: u64) -> Result<Self> {
        let file = File::open(path)?;
        let file_len = file.metadata()?.len();
        let mut reader = BufReader::new(file);
        let header = Header::read_from(&mut reader)?;
        header.validate(file_len)?;

        let mut bloom_bytes = [0u8; BLOOM_BYTES];
        std::io::Read::read_exact(&mut reader, &mut bloom_bytes)?;
        let Some(bloom) = BloomFilter::from_bytes(&bloom_bytes) else {
            return errdata!("corrupt bloom region in {}", path.display());
        };

        let mut key_offset = Vec::with_capacity(header.pair_count as usize);
        for _ in 0..header.pair_count {
            let key = reader.read_u64::<LittleEndian>()?;
            let offset = reader.read_u64::<LittleEndian>()?;
            key_offset.push((key, offset));
        }

        Ok(Self {
            layer,
            serial,
            timestamp: header.timestamp,
            min_key: header.min_key,
            max_key: header.max_key,
            pair_count: header.pair_count,
            bloom,
            key_offset,
        })
    }

    /// Whether this run's key range intersects `[lo, hi]`.
    pub fn overlaps(&self, lo: Key, hi: Key) -> bool {
        !(hi < self.min_key || self.max_key < lo)
    }

    /// Exact directory lookup; the caller has already consulted the bloom.
    pub fn offset_of(&self, key: Key) -> Option<u64> {
        self.key_offset
            .binary_search_by_key(&key, |&(k, _)| k)
            .ok()
            .map(|i| self.key_offset[i].1)
    }
}
