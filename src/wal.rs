//! Write-ahead log.
//!
//! Every pending memtable write is appended here before it becomes visible,
//! so an unclean shutdown can rebuild the memtable on the next open. A
//! record is `key (8 bytes LE) ∥ value length (8 bytes LE) ∥ value bytes`.
//! The log is cleared after a successful flush; a truncated final record
//! marks a crash mid-append and is dropped silently on replay, since the
//! writer never acknowledged that put.

use std::fs::{File, OpenOptions};
use std::io::{BufReader, Read, Write};
use std::path::{Path, PathBuf};

use byteorder::{LittleEndian, ReadBytesExt, WriteBytesExt};

use crate::config::{Key, Value, KEY_SIZE};
use crate::error::Result;

const RECORD_HEADER: u64 = (KEY_SIZE + 8) as u64;

#[derive(Debug)]
pub struct Wal {
    path: PathBuf,
}

impl Wal {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn exists(&self) -> bool {
        self.path.exists()
    }

    /// Appends one record and flushes it to the file before returning. The
    /// caller inserts into the memtable only after this succeeds.
    pub fn append(&mut self, key: Key, value: &[u8]) -> Result<()> {
        let mut buf = Vec::with_capacity(RECORD_HEADER as usize + value.len());
        buf.write_u64::<LittleEndian>(key)?;
        buf.write_u64::<LittleEndian>(value.len() as u64)?;
        buf.extend_from_slice(value);

        let mut file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)?;
        file.write_all(&buf)?;
        file.flush()?;
        Ok(())
    }

    /// Iterates the intact records in append order.
    pub fn replay(&self) -> Result<ReplayIterator> {
        let file = File::open(&self.path)?;
        let remaining = file.metadata()?.len();
        Ok(ReplayIterator {
            reader: BufReader::new(file),
            remaining,
        })
    }

    /// Removes the log. The next append recreates it.
    pub fn clear(&mut self) -> Result<()> {
        match std::fs::remove_file(&self.path) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e.into()),
        }
    }
}

pub struct ReplayIterator {
    reader: BufReader<File>,
    remaining: u64,
}

impl ReplayIterator {
    /// Reads one record. `Ok(None)` is the clean end of the log or a torn
    /// final record; both stop replay.
    fn read(&mut self) -> Result<Option<(Key, Value)>> {
        if self.remaining < RECORD_HEADER {
            return Ok(None);
        }
        let key = self.reader.read_u64::<LittleEndian>()?;
        let len = self.reader.read_u64::<LittleEndian>()?;
        self.remaining -= RECORD_HEADER;
        if len > self.remaining {
            // Torn value: the length field outruns the file.
            return Ok(None);
        }
        let mut value = vec![0u8; len as usize];
        self.reader.read_exact(&mut value)?;
        self.remaining -= len;
        Ok(Some((key, value)))
    }
}

impl Iterator for ReplayIterator {
    type Item = Result<(Key, Value)>;

    fn next(&mut self) -> Option<Self::Item> {
        self.read().transpose()
    }
}
