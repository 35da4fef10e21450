//! Advisory lock on the data directory.
//!
//! The engine is single-threaded with no internal synchronization, so two
//! stores opening the same directory would corrupt each other. The lock file
//! holds the owning process id for debugging.

use std::fs::{File, OpenOptions};
use std::io::{self, Write};
use std::path::{Path, PathBuf};

#[cfg(unix)]
use std::os::unix::io::AsRawFd;

pub struct FileLock {
    _file: File,
    path: PathBuf,
}

impl FileLock {
    /// Creates the lock file and acquires an exclusive non-blocking lock on
    /// it, failing if another holder exists.
    pub fn lock<P: AsRef<Path>>(path: P) -> io::Result<Self> {
        let path = path.as_ref().to_path_buf();
        let mut file = OpenOptions::new()
            .create(true)
            .write(true)
            .open(&path)?;
        Self::try_lock(&file)?;

        file.set_len(0)?;
        writeln!(file, "{}", std::process::id())?;
        file.flush()?;

        Ok(Self { _file: file, path })
    }

    #[cfg(unix)]
    fn try_lock(file: &File) -> io::Result<()> {
        use libc::{flock, LOCK_EX, LOCK_NB};

        let fd = file.as_raw_fd();
        if unsafe { flock(fd, LOCK_EX | LOCK_NB) } != 0 {
            return Err(io::Error::last_os_error());
        }
        Ok(())
    }

    // Advisory create-only fallback where flock(2) is unavailable.
    #[cfg(not(unix))]
    fn try_lock(_file: &File) -> io::Result<()> {
        Ok(())
    }
}

impl Drop for FileLock {
    fn drop(&mut self) {
        let _ = std::fs::remove_file(&self.path);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    #[cfg(unix)]
    fn test_second_lock_is_refused() {
        let dir = TempDir::new().expect("tempdir");
        let path = dir.path().join("LOCK");

        let held = FileLock::lock(&path).expect("first lock");
        assert!(FileLock::lock(&path).is_err(), "second lock must fail");

        drop(held);
        FileLock::lock(&path).expect("relock after release");
    }

    #[test]
    fn test_lock_file_is_removed_on_drop() {
        let dir = TempDir::new().expect("tempdir");
        let path = dir.path().join("LOCK");

        let held = FileLock::lock(&path).expect("lock");
        assert!(path.exists());
        drop(held);
        assert!(!path.exists());
    }
}
