//! Compile-time engine configuration.
//!
//! All sizing knobs are fixed at build time. The values mirror the layout of
//! the on-disk formats: changing `BLOOM_SIZE` changes the SSTable header, so
//! data directories are only compatible with the constants they were written
//! under.

/// User-visible key type. The reserved values [`KEY_MIN`] and [`KEY_MAX`]
/// anchor the skip-list sentinels and are rejected as user keys.
pub type Key = u64;

/// User-visible value type: an owned byte string.
pub type Value = Vec<u8>;

/// Reserved key for the skip-list head sentinel.
pub const KEY_MIN: Key = Key::MIN;

/// Reserved key for the skip-list tail sentinel.
pub const KEY_MAX: Key = Key::MAX;

/// On-disk width of a key in bytes.
pub const KEY_SIZE: usize = std::mem::size_of::<Key>();

/// Reserved value marking a deleted key. User values equal to this literal
/// are rejected on write.
pub const TOMBSTONE: &[u8] = b"~DELETED~";

/// Number of on-disk levels.
pub const LSM_MAX_LAYER: usize = 16;

/// Size of each per-run bloom filter in bits. Must be a power of two so the
/// lane positions reduce with a mask-friendly modulus.
pub const BLOOM_SIZE: usize = 8 * 1024;

/// Memtable byte budget. A write that would reach this limit flushes first.
pub const MEM_LIMIT: usize = 16 * 1024;

const _: () = assert!(BLOOM_SIZE.is_power_of_two(), "BLOOM_SIZE must be a power of 2");

/// Maximum number of runs a level may hold before it is compacted into the
/// next one.
pub const fn capacity(level: usize) -> usize {
    2 << level
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_level_capacities() {
        assert_eq!(capacity(0), 2);
        assert_eq!(capacity(1), 4);
        assert_eq!(capacity(2), 8);
        assert_eq!(capacity(3), 16);
    }
}
