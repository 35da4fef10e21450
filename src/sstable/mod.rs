//! On-disk sorted run (SSTable) format.
//!
//! One file per persisted run, immutable once written:
//!
//! ```text
//! +--------------------------------+
//! | timestamp            (u64 LE)  |
//! | len_of_values        (u64 LE)  |
//! | min_key              (u64 LE)  |
//! | max_key              (u64 LE)  |
//! | pair_count           (u64 LE)  |
//! +--------------------------------+
//! | bloom bits    (BLOOM_SIZE / 8) |
//! +--------------------------------+
//! | directory: pair_count x        |
//! |   (key u64 LE, offset u64 LE)  |
//! +--------------------------------+
//! | packed values (len_of_values)  |
//! +--------------------------------+
//! ```
//!
//! Directory offsets are relative to the start of the value region, so the
//! i-th value's length is the gap to the next offset (or to `len_of_values`
//! for the last entry).

pub mod reader;
pub mod summary;
pub mod table;

pub use reader::{read_value_at, RunEntry, TableStream};
pub use summary::Summary;
pub use table::TableBuilder;

use std::io::Read;

use byteorder::{LittleEndian, ReadBytesExt};

use crate::bloom::BLOOM_BYTES;
use crate::config::Key;
use crate::error::Result;
use crate::errdata;

/// Bytes preceding the directory: five u64 fields plus the bloom bits.
pub const HEADER_SIZE: u64 = 5 * 8 + BLOOM_BYTES as u64;

/// Width of one directory entry.
pub(crate) const DIR_ENTRY_SIZE: u64 = 16;

/// The fixed fields at the start of every table file (bloom excluded).
#[derive(Debug, Clone, Copy)]
pub(crate) struct Header {
    pub timestamp: u64,
    pub len_of_values: u64,
    pub min_key: Key,
    pub max_key: Key,
    pub pair_count: u64,
}

impl Header {
    pub(crate) fn read_from(reader: &mut impl Read) -> Result<Self> {
        Ok(Self {
            timestamp: reader.read_u64::<LittleEndian>()?,
            len_of_values: reader.read_u64::<LittleEndian>()?,
            min_key: reader.read_u64::<LittleEndian>()?,
            max_key: reader.read_u64::<LittleEndian>()?,
            pair_count: reader.read_u64::<LittleEndian>()?,
        })
    }

    /// Rejects headers whose field arithmetic disagrees with the actual file
    /// size, before any of those fields are used to size reads.
    pub(crate) fn validate(&self, file_len: u64) -> Result<()> {
        let expected = self
            .pair_count
            .checked_mul(DIR_ENTRY_SIZE)
            .and_then(|dir| dir.checked_add(HEADER_SIZE))
            .and_then(|n| n.checked_add(self.len_of_values));
        match expected {
            Some(expected) if expected == file_len => Ok(()),
            _ => errdata!(
                "corrupt table: {} pairs and {} value bytes do not fit file of {} bytes",
                self.pair_count,
                self.len_of_values,
                file_len
            ),
        }
    }
}
