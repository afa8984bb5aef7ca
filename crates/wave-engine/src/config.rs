//! Engine configuration. All process-wide tunables live here explicitly; no
//! implicit globals.

use std::path::PathBuf;

/// Runtime configuration for an [`crate::Engine`].
#[derive(Debug, Clone)]
pub struct EngineConfig {
    /// Root data directory; `wal/` and `index/` live under it.
    pub directory: PathBuf,
    /// Window between FRAG markers in long text. Default: 128.
    pub fragment_size: usize,
    /// Documents spooled before the WAL drains into a block. Default: 256.
    pub wal_batch: usize,
    /// Worker threads for the per-block query fan-out. Default: CPU count.
    pub worker_threads: usize,
    /// Byte budget of the decoded-block LRU cache. Default: 64 MiB.
    pub cache_bytes: usize,
    /// Size of each pooled WAL parse buffer. Default: 10 MiB.
    pub parse_buffer_bytes: usize,
}

impl EngineConfig {
    pub fn new(directory: impl Into<PathBuf>) -> Self {
        Self {
            directory: directory.into(),
            fragment_size: 128,
            wal_batch: 256,
            worker_threads: std::thread::available_parallelism().map(|n| n.get()).unwrap_or(1),
            cache_bytes: 64 * 1024 * 1024,
            parse_buffer_bytes: 10 * 1024 * 1024,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_are_sane() {
        let config = EngineConfig::new("/tmp/waves");
        assert_eq!(config.fragment_size, 128);
        assert_eq!(config.wal_batch, 256);
        assert!(config.worker_threads >= 1);
        assert_eq!(config.parse_buffer_bytes, 10 * 1024 * 1024);
    }
}
