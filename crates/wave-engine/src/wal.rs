//! WAL spool: appended documents land as numbered files under `wal/` and
//! drain into a real block once a batch fills. The not-yet-drained tail is
//! re-parsed into the virtual WAL block.

use std::fs;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Mutex;

use wave_core::Result;

pub struct WalSpool {
    dir: PathBuf,
    counter: AtomicU64,
    batch: Mutex<Vec<PathBuf>>,
    batch_size: usize,
}

impl WalSpool {
    pub fn open(dir: impl Into<PathBuf>, batch_size: usize) -> Result<Self> {
        let dir = dir.into();
        fs::create_dir_all(&dir)?;

        // Resume numbering past whatever is already spooled.
        let mut max = 0u64;
        let mut pending = Vec::new();
        for entry in fs::read_dir(&dir)? {
            let entry = entry?;
            let name = entry.file_name();
            if let Some(n) = name.to_str().and_then(|s| s.parse::<u64>().ok()) {
                max = max.max(n);
                pending.push(entry.path());
            }
        }
        pending.sort_by_key(|p| {
            p.file_name()
                .and_then(|n| n.to_str())
                .and_then(|s| s.parse::<u64>().ok())
                .unwrap_or(u64::MAX)
        });

        Ok(Self {
            dir,
            counter: AtomicU64::new(max),
            batch: Mutex::new(pending),
            batch_size: batch_size.max(1),
        })
    }

    /// Writes one document; returns a full batch of file paths once the
    /// threshold is reached.
    pub fn append(&self, json: &[u8]) -> Result<Option<Vec<PathBuf>>> {
        let n = self.counter.fetch_add(1, Ordering::SeqCst) + 1;
        let path = self.dir.join(n.to_string());
        fs::write(&path, json)?;

        let mut batch = self.batch.lock().expect("wal batch lock");
        batch.push(path);
        if batch.len() >= self.batch_size {
            let drained: Vec<PathBuf> = batch.drain(..self.batch_size).collect();
            return Ok(Some(drained));
        }
        Ok(None)
    }

    /// Files spooled but not yet drained, in append order.
    pub fn pending(&self) -> Vec<PathBuf> {
        self.batch.lock().expect("wal batch lock").clone()
    }

    /// Concatenates the pending documents into `buf`.
    pub fn read_pending(&self, buf: &mut Vec<u8>) -> Result<()> {
        buf.clear();
        for path in self.pending() {
            if let Ok(data) = fs::read(&path) {
                buf.extend_from_slice(&data);
                buf.push(b'\n');
            }
        }
        Ok(())
    }

    /// Removes a drained batch's files.
    pub fn remove(&self, files: &[PathBuf]) {
        for f in files {
            if let Err(e) = fs::remove_file(f) {
                if e.kind() != std::io::ErrorKind::NotFound {
                    tracing::warn!(path = %f.display(), "failed to remove wal file: {e}");
                }
            }
        }
    }

    /// Returns a drained batch to the spool after a failed build.
    pub fn restore(&self, files: Vec<PathBuf>) {
        let mut batch = self.batch.lock().expect("wal batch lock");
        let mut restored = files;
        restored.extend(batch.drain(..));
        *batch = restored;
    }
}

/// Pool of reusable parse buffers for WAL re-indexing.
pub struct BufferPool {
    buffers: Mutex<Vec<Vec<u8>>>,
    capacity: usize,
}

impl BufferPool {
    pub fn new(capacity: usize) -> Self {
        Self { buffers: Mutex::new(Vec::new()), capacity }
    }

    pub fn get(&self) -> Vec<u8> {
        self.buffers
            .lock()
            .expect("buffer pool lock")
            .pop()
            .unwrap_or_else(|| Vec::with_capacity(self.capacity))
    }

    pub fn put(&self, mut buf: Vec<u8>) {
        buf.clear();
        if buf.capacity() <= self.capacity * 2 {
            self.buffers.lock().expect("buffer pool lock").push(buf);
        }
    }
}

pub(crate) fn wal_dir(root: &Path) -> PathBuf {
    root.join("wal")
}

pub(crate) fn index_dir(root: &Path) -> PathBuf {
    root.join("index")
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn batch_fills_and_drains() {
        let dir = tempdir().unwrap();
        let wal = WalSpool::open(dir.path(), 3).unwrap();

        assert!(wal.append(b"{\"a\":1}").unwrap().is_none());
        assert!(wal.append(b"{\"a\":2}").unwrap().is_none());
        let drained = wal.append(b"{\"a\":3}").unwrap().expect("third append drains");
        assert_eq!(drained.len(), 3);
        assert!(wal.pending().is_empty());
    }

    #[test]
    fn pending_survives_reopen() {
        let dir = tempdir().unwrap();
        {
            let wal = WalSpool::open(dir.path(), 10).unwrap();
            wal.append(b"{\"a\":1}").unwrap();
            wal.append(b"{\"a\":2}").unwrap();
        }
        let wal = WalSpool::open(dir.path(), 10).unwrap();
        assert_eq!(wal.pending().len(), 2);
        // Numbering resumes without collisions.
        wal.append(b"{\"a\":3}").unwrap();
        assert_eq!(wal.pending().len(), 3);
    }

    #[test]
    fn read_pending_concatenates_documents() {
        let dir = tempdir().unwrap();
        let wal = WalSpool::open(dir.path(), 10).unwrap();
        wal.append(br#"{"a":1}"#).unwrap();
        wal.append(br#"{"a":2}"#).unwrap();

        let mut buf = Vec::new();
        wal.read_pending(&mut buf).unwrap();
        let text = String::from_utf8(buf).unwrap();
        assert!(text.contains(r#"{"a":1}"#));
        assert!(text.contains(r#"{"a":2}"#));
    }

    #[test]
    fn restore_puts_files_back_in_front() {
        let dir = tempdir().unwrap();
        let wal = WalSpool::open(dir.path(), 2).unwrap();
        wal.append(b"{}").unwrap();
        let drained = wal.append(b"{}").unwrap().unwrap();
        wal.append(b"{}").unwrap();
        wal.restore(drained);
        assert_eq!(wal.pending().len(), 3);
    }

    #[test]
    fn buffer_pool_reuses_capacity() {
        let pool = BufferPool::new(1024);
        let mut buf = pool.get();
        buf.extend_from_slice(&[1, 2, 3]);
        pool.put(buf);
        let buf = pool.get();
        assert!(buf.is_empty());
        assert!(buf.capacity() >= 3);
    }
}
