//! Per-run bloom filter.
//!
//! Every SSTable carries a fixed-size bit array summarizing its key set. A
//! lookup consults the filter before touching the run's directory: an unset
//! bit proves the key is absent, while a full match only means "possibly
//! present" and must be confirmed against the directory.

use xxhash_rust::xxh3::xxh3_128;

use crate::config::{Key, BLOOM_SIZE};

/// Number of bytes the filter occupies on disk.
pub const BLOOM_BYTES: usize = BLOOM_SIZE / 8;

/// Fixed-size bloom filter addressed by four independent 32-bit hash lanes.
#[derive(Clone)]
pub struct BloomFilter {
    bits: Box<[u8; BLOOM_BYTES]>,
}

/// Splits a 128-bit fingerprint of the key into four independent lanes.
fn lanes(key: Key) -> [u32; 4] {
    let h = xxh3_128(&key.to_le_bytes());
    [h as u32, (h >> 32) as u32, (h >> 64) as u32, (h >> 96) as u32]
}

impl BloomFilter {
    pub fn new() -> Self {
        Self {
            bits: Box::new([0u8; BLOOM_BYTES]),
        }
    }

    pub fn insert(&mut self, key: Key) {
        for lane in lanes(key) {
            let bit = lane as usize % BLOOM_SIZE;
            self.bits[bit / 8] |= 1 << (bit % 8);
        }
    }

    /// Returns false only if the key was definitely never inserted.
    pub fn contains(&self, key: Key) -> bool {
        lanes(key).into_iter().all(|lane| {
            let bit = lane as usize % BLOOM_SIZE;
            self.bits[bit / 8] & (1 << (bit % 8)) != 0
        })
    }

    /// Raw bits, persisted verbatim inside the SSTable header region.
    pub fn as_bytes(&self) -> &[u8] {
        self.bits.as_slice()
    }

    pub fn from_bytes(bytes: &[u8]) -> Option<Self> {
        let bits: [u8; BLOOM_BYTES] = bytes.try_into().ok()?;
        Some(Self { bits: Box::new(bits) })
    }
}

impl Default for BloomFilter {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for BloomFilter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let set: usize = self.bits.iter().map(|b| b.count_ones() as usize).sum();
        f.debug_struct("BloomFilter").field("set_bits", &set).finish()
    }
}
