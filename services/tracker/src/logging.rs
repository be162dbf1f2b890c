//! Size-rotated log file writer.
//!
//! When `logfile` is configured, tracing output goes through this writer:
//! the active file is capped at 2 MB, and up to 10 rotated archives are kept
//! as `<path>.1` (newest) through `<path>.10` (oldest).

use std::fs::{self, File, OpenOptions};
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, PoisonError};

use tracing_subscriber::fmt::MakeWriter;

const MAX_LOG_BYTES: u64 = 2 * 1024 * 1024;
const MAX_ARCHIVES: u32 = 10;

/// A `MakeWriter` that appends to one file and rotates it by size.
/// Clones share the same file handle and rotation state.
#[derive(Debug, Clone)]
pub struct RotatingWriter {
    shared: Arc<Mutex<Inner>>,
}

#[derive(Debug)]
struct Inner {
    path: PathBuf,
    file: File,
    written: u64,
    max_bytes: u64,
    max_archives: u32,
}

impl RotatingWriter {
    /// Open (or create) the log file at `path`, appending to existing content.
    pub fn open(path: &Path) -> io::Result<Self> {
        Self::with_limits(path, MAX_LOG_BYTES, MAX_ARCHIVES)
    }

    fn with_limits(path: &Path, max_bytes: u64, max_archives: u32) -> io::Result<Self> {
        let file = OpenOptions::new().create(true).append(true).open(path)?;
        let written = file.metadata()?.len();
        Ok(Self {
            shared: Arc::new(Mutex::new(Inner {
                path: path.to_owned(),
                file,
                written,
                max_bytes,
                max_archives,
            })),
        })
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, Inner> {
        self.shared.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl Inner {
    /// Shift `<path>.N` → `<path>.N+1`, dropping the oldest, then reopen a
    /// fresh active file.
    fn rotate(&mut self) -> io::Result<()> {
        let _ = fs::remove_file(archive_path(&self.path, self.max_archives));
        for i in (1..self.max_archives).rev() {
            let from = archive_path(&self.path, i);
            if from.exists() {
                let _ = fs::rename(from, archive_path(&self.path, i + 1));
            }
        }
        self.file.flush()?;
        fs::rename(&self.path, archive_path(&self.path, 1))?;
        self.file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)?;
        self.written = 0;
        Ok(())
    }
}

fn archive_path(path: &Path, index: u32) -> PathBuf {
    let mut name = path.as_os_str().to_owned();
    name.push(format!(".{index}"));
    PathBuf::from(name)
}

impl Write for RotatingWriter {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        let mut inner = self.lock();
        if inner.written > 0 && inner.written + buf.len() as u64 > inner.max_bytes {
            inner.rotate()?;
        }
        let n = inner.file.write(buf)?;
        inner.written += n as u64;
        Ok(n)
    }

    fn flush(&mut self) -> io::Result<()> {
        self.lock().file.flush()
    }
}

impl<'a> MakeWriter<'a> for RotatingWriter {
    type Writer = RotatingWriter;

    fn make_writer(&'a self) -> Self::Writer {
        self.clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn writes_append_to_the_active_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("tracker.log");
        let mut writer = RotatingWriter::with_limits(&path, 1024, 3).unwrap();
        writer.write_all(b"hello\n").unwrap();
        writer.flush().unwrap();
        assert_eq!(fs::read_to_string(&path).unwrap(), "hello\n");
    }

    #[test]
    fn rotates_when_the_limit_would_be_exceeded() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("tracker.log");
        let mut writer = RotatingWriter::with_limits(&path, 10, 3).unwrap();
        writer.write_all(b"first....\n").unwrap(); // 10 bytes, fills the file
        writer.write_all(b"second\n").unwrap(); // forces rotation
        writer.flush().unwrap();
        assert_eq!(fs::read_to_string(&path).unwrap(), "second\n");
        assert_eq!(
            fs::read_to_string(archive_path(&path, 1)).unwrap(),
            "first....\n"
        );
    }

    #[test]
    fn oldest_archive_is_dropped() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("tracker.log");
        let mut writer = RotatingWriter::with_limits(&path, 4, 2).unwrap();
        for chunk in [b"aaaa", b"bbbb", b"cccc", b"dddd"] {
            writer.write_all(chunk).unwrap();
        }
        writer.flush().unwrap();
        assert_eq!(fs::read_to_string(&path).unwrap(), "dddd");
        assert_eq!(fs::read_to_string(archive_path(&path, 1)).unwrap(), "cccc");
        assert_eq!(fs::read_to_string(archive_path(&path, 2)).unwrap(), "bbbb");
        assert!(!archive_path(&path, 3).exists(), "oldest must be dropped");
    }

    #[test]
    fn clones_share_rotation_state() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("tracker.log");
        let writer = RotatingWriter::with_limits(&path, 8, 2).unwrap();
        let mut a = writer.clone();
        let mut b = writer.clone();
        a.write_all(b"12345678").unwrap();
        b.write_all(b"x").unwrap();
        b.flush().unwrap();
        assert_eq!(fs::read_to_string(&path).unwrap(), "x");
        assert_eq!(fs::read_to_string(archive_path(&path, 1)).unwrap(), "12345678");
    }
}
