//! Per-level cache of run summaries.
//!
//! Each on-disk level keeps an ordered list of its runs' summaries, newest
//! at the front. Point lookups walk the list front-to-back so a newer run
//! shadows an older one, and consult each summary's key range and bloom
//! filter before its directory, so a read touches disk only once a run has
//! actually claimed the key.

use std::collections::VecDeque;

use crate::config::Key;
use crate::sstable::Summary;

#[derive(Debug, Default)]
pub struct LevelCache {
    summaries: VecDeque<Summary>,
}

impl LevelCache {
    pub fn new() -> Self {
        Self {
            summaries: VecDeque::new(),
        }
    }

    pub fn len(&self) -> usize {
        self.summaries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.summaries.is_empty()
    }

    /// Installs a newly written run at the front.
    pub fn insert(&mut self, summary: Summary) {
        self.summaries.push_front(summary);
    }

    /// Removes the first summary with the given timestamp.
    pub fn delete_by_timestamp(&mut self, timestamp: u64) -> bool {
        match self.summaries.iter().position(|s| s.timestamp == timestamp) {
            Some(index) => {
                self.summaries.remove(index);
                true
            }
            None => false,
        }
    }

    /// Locates the newest run that holds `key`, returning
    /// `(layer, serial, value offset)`.
    ///
    /// A summary is skipped when the key falls outside its range or any of
    /// the four bloom bits is unset. A bloom accept that the directory then
    /// contradicts is a false positive; the scan continues with the next
    /// (older) summary, which matters at level 0 where run ranges overlap.
    pub fn search(&self, key: Key) -> Option<(u32, u64, u64)> {
        for summary in &self.summaries {
            if key < summary.min_key || key > summary.max_key {
                continue;
            }
            if !summary.bloom.contains(key) {
                continue;
            }
            if let Some(offset) = summary.offset_of(key) {
                return Some((summary.layer, summary.serial, offset));
            }
        }
        None
    }

    /// Detaches every summary from index `at` to the back (the oldest runs),
    /// preserving newest-first order.
    pub fn take_from(&mut self, at: usize) -> Vec<Summary> {
        self.summaries.split_off(at).into()
    }

    /// Detaches every summary whose key range intersects `[lo, hi]`.
    pub fn take_overlapping(&mut self, lo: Key, hi: Key) -> Vec<Summary> {
        let mut taken = Vec::new();
        let mut kept = VecDeque::with_capacity(self.summaries.len());
        for summary in self.summaries.drain(..) {
            if summary.overlaps(lo, hi) {
                taken.push(summary);
            } else {
                kept.push_back(summary);
            }
        }
        self.summaries = kept;
        taken
    }

    pub fn iter(&self) -> impl Iterator<Item = &Summary> {
        self.summaries.iter()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::skiplist::SkipList;
    use crate::sstable::TableBuilder;

    fn summary(keys: &[u64], layer: u32, serial: u64, timestamp: u64) -> Summary {
        let mut list = SkipList::new();
        for &key in keys {
            list.insert(key, format!("{layer}/{serial}/{key}").into_bytes());
        }
        Summary::from_table(&TableBuilder::from_memtable(&list), layer, serial, timestamp)
    }

    #[test]
    fn test_insert_keeps_newest_first() {
        let mut cache = LevelCache::new();
        cache.insert(summary(&[1], 0, 0, 10));
        cache.insert(summary(&[2], 0, 1, 11));
        cache.insert(summary(&[3], 0, 2, 12));

        let timestamps: Vec<u64> = cache.iter().map(|s| s.timestamp).collect();
        assert_eq!(timestamps, vec![12, 11, 10]);
    }

    #[test]
    fn test_delete_by_timestamp() {
        let mut cache = LevelCache::new();
        cache.insert(summary(&[1], 0, 0, 10));
        cache.insert(summary(&[2], 0, 1, 11));

        assert!(cache.delete_by_timestamp(10));
        assert!(!cache.delete_by_timestamp(10));
        assert_eq!(cache.len(), 1);
        assert_eq!(cache.iter().next().map(|s| s.timestamp), Some(11));
    }

    #[test]
    fn test_search_newest_run_wins() {
        let mut cache = LevelCache::new();
        cache.insert(summary(&[5, 6], 0, 0, 10));
        cache.insert(summary(&[5, 7], 0, 1, 11));

        let (layer, serial, _) = cache.search(5).expect("hit");
        assert_eq!((layer, serial), (0, 1));
    }

    #[test]
    fn test_search_continues_past_directory_miss() {
        let mut cache = LevelCache::new();
        // Older run holds key 3; the newer run's range [2, 4] covers 3 but
        // its directory does not, so the scan must fall through to the
        // older run whatever the newer bloom says.
        cache.insert(summary(&[1, 3], 0, 0, 10));
        cache.insert(summary(&[2, 4], 0, 1, 11));

        let (layer, serial, _) = cache.search(3).expect("hit in older run");
        assert_eq!((layer, serial), (0, 0));
    }

    #[test]
    fn test_search_miss() {
        let mut cache = LevelCache::new();
        cache.insert(summary(&[2, 4, 6], 0, 0, 10));

        assert_eq!(cache.search(100), None, "outside every range");
        assert_eq!(cache.search(3), None, "inside range, not in directory");
    }

    #[test]
    fn test_take_from_detaches_oldest() {
        let mut cache = LevelCache::new();
        for serial in 0..4 {
            cache.insert(summary(&[serial + 1], 0, serial, 10 + serial));
        }

        let taken = cache.take_from(2);
        assert_eq!(cache.len(), 2);
        let taken_ts: Vec<u64> = taken.iter().map(|s| s.timestamp).collect();
        assert_eq!(taken_ts, vec![11, 10]);
        let kept_ts: Vec<u64> = cache.iter().map(|s| s.timestamp).collect();
        assert_eq!(kept_ts, vec![13, 12]);
    }

    #[test]
    fn test_take_overlapping() {
        let mut cache = LevelCache::new();
        cache.insert(summary(&[1, 5], 1, 0, 10));
        cache.insert(summary(&[10, 15], 1, 1, 11));
        cache.insert(summary(&[20, 25], 1, 2, 12));

        let taken = cache.take_overlapping(4, 12);
        assert_eq!(taken.len(), 2);
        assert_eq!(cache.len(), 1);
        assert_eq!(cache.iter().next().map(|s| s.serial), Some(2));
    }
}
