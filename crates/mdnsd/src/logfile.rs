//! Log file writer that follows external rotation
//!
//! Before every write the path is checked; when logrotate (or anyone else)
//! moved or deleted the file, it is reopened so new lines land in a fresh
//! file at the configured path.

use std::fs::{self, File, Metadata, OpenOptions};
use std::io::{self, Write};
use std::path::{Path, PathBuf};

/// Append-only file reopened whenever its path stops pointing at it
#[derive(Debug)]
pub struct WatchedFile {
    path: PathBuf,
    file: File,
    identity: Option<(u64, u64)>,
}

impl WatchedFile {
    /// Open (or create) the log file for appending
    pub fn open(path: &Path) -> io::Result<Self> {
        let file = open_append(path)?;
        let identity = file.metadata().ok().and_then(|m| identity(&m));

        Ok(Self {
            path: path.to_path_buf(),
            file,
            identity,
        })
    }

    fn reopen_if_rotated(&mut self) -> io::Result<()> {
        let current = fs::metadata(&self.path).ok().and_then(|m| identity(&m));
        if current.is_some() && current == self.identity {
            return Ok(());
        }

        let _ = self.file.flush();
        self.file = open_append(&self.path)?;
        self.identity = self.file.metadata().ok().and_then(|m| identity(&m));
        Ok(())
    }
}

impl Write for WatchedFile {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.reopen_if_rotated()?;
        self.file.write(buf)
    }

    fn flush(&mut self) -> io::Result<()> {
        self.file.flush()
    }
}

fn open_append(path: &Path) -> io::Result<File> {
    OpenOptions::new().create(true).append(true).open(path)
}

#[cfg(unix)]
fn identity(metadata: &Metadata) -> Option<(u64, u64)> {
    use std::os::unix::fs::MetadataExt;
    Some((metadata.dev(), metadata.ino()))
}

// Only deletion is noticed here.
#[cfg(not(unix))]
fn identity(_metadata: &Metadata) -> Option<(u64, u64)> {
    Some((0, 0))
}
