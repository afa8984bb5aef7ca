//! The embedded engine: block build and registration, WAL ingestion, the
//! parallel per-block query fan-out, and purge.

use std::fs;
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, AtomicI64, Ordering};
use std::sync::{Arc, RwLock};

use chrono::{DateTime, Utc};
use rayon::prelude::*;

use wave_core::json::parse_json;
use wave_core::{Result, WaveError, INT64, TEXT};
use wave_index::{build, decode_block, encode_block, IndexedBlock};
use wave_query::{exec, marshal_result_set, merge, order_by, ResultSet};
use wave_ssql::{Attribute, Expr, KeyValue, Predicate, Statement, Tuple};

use crate::cache::BlockCache;
use crate::config::EngineConfig;
use crate::store::{create_pool, MetaStore, SqliteMetaStore};
use crate::wal::{index_dir, wal_dir, BufferPool, WalSpool};

// ---------------------------------------------------------------------------
// CancelToken
// ---------------------------------------------------------------------------

/// Cooperative cancellation for in-flight queries: queued block tasks drop
/// without dispatching once cancelled.
#[derive(Clone, Default)]
pub struct CancelToken(Arc<AtomicBool>);

impl CancelToken {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}

// ---------------------------------------------------------------------------
// Engine
// ---------------------------------------------------------------------------

pub struct Engine {
    config: EngineConfig,
    store: SqliteMetaStore,
    wal: WalSpool,
    wal_index: RwLock<Option<Arc<IndexedBlock>>>,
    cache: BlockCache,
    buffers: BufferPool,
    workers: rayon::ThreadPool,
    seq: AtomicI64,
    /// Timestamp path and key paths applied to ingested batches.
    ts_path: String,
    key_paths: Vec<String>,
}

impl Engine {
    /// Opens (or creates) the data directory, the metadata store, and the
    /// worker pool. `ts_path` locates the timestamp inside each document.
    pub fn open(config: EngineConfig, ts_path: &str, key_paths: &[String]) -> Result<Self> {
        fs::create_dir_all(index_dir(&config.directory))?;
        let wal = WalSpool::open(wal_dir(&config.directory), config.wal_batch)?;
        let store = SqliteMetaStore::new(create_pool(&config.directory)?);
        let seq = AtomicI64::new(store.max_wid()?);

        let workers = rayon::ThreadPoolBuilder::new()
            .num_threads(config.worker_threads)
            .build()
            .map_err(|e| WaveError::Internal(e.to_string()))?;

        Ok(Self {
            cache: BlockCache::new(config.cache_bytes),
            buffers: BufferPool::new(config.parse_buffer_bytes),
            config,
            store,
            wal,
            wal_index: RwLock::new(None),
            workers,
            seq,
            ts_path: ts_path.to_string(),
            key_paths: key_paths.to_vec(),
        })
    }

    /// Builds one block from a JSON batch file and registers it.
    pub fn index_file(&self, path: &std::path::Path) -> Result<u64> {
        let data = fs::read(path)?;
        let wid = self.next_wid();
        self.create_index(wid, &data)?;
        Ok(wid as u64)
    }

    /// Spools one document; a full batch drains into a real block.
    pub fn ingest(&self, json: &[u8]) -> Result<()> {
        if let Some(files) = self.wal.append(json)? {
            let mut buf = self.buffers.get();
            for f in &files {
                if let Ok(data) = fs::read(f) {
                    buf.extend_from_slice(&data);
                    buf.push(b'\n');
                }
            }
            let wid = self.next_wid();
            let result = self.create_index(wid, &buf);
            self.buffers.put(buf);
            match result {
                Ok(()) => {
                    self.wal.remove(&files);
                    *self.wal_index.write().expect("wal index lock") = None;
                }
                Err(e) => {
                    tracing::warn!("wal drain failed, restoring batch: {e}");
                    self.wal.restore(files);
                    return Err(e);
                }
            }
        }
        Ok(())
    }

    /// Rebuilds the virtual WAL block from the not-yet-drained documents and
    /// swaps it in.
    pub fn refresh_wal_index(&self) {
        let mut buf = self.buffers.get();
        let rebuilt = self
            .wal
            .read_pending(&mut buf)
            .ok()
            .filter(|_| !buf.is_empty())
            .and_then(|_| parse_json(&buf, self.config.fragment_size).ok())
            .and_then(|parsed| build(&parsed, 0).ok())
            .map(Arc::new);
        self.buffers.put(buf);

        *self.wal_index.write().expect("wal index lock") = rebuilt;
    }

    /// Parses and runs one SSQL statement; parse errors surface verbatim.
    pub fn query(&self, ssql: &str) -> std::result::Result<Vec<u8>, Vec<wave_ssql::ParseError>> {
        let (stmt, errors) = wave_ssql::parse(ssql);
        if !errors.is_empty() {
            return Err(errors);
        }
        Ok(self.query_stmt(&stmt, &CancelToken::new()))
    }

    /// Evaluates a statement across the candidate blocks plus the WAL block,
    /// one worker task per block, then merges, orders, and encodes on the
    /// calling thread. A corrupt or failing block yields an empty partial
    /// result.
    pub fn query_stmt(&self, stmt: &Statement, cancel: &CancelToken) -> Vec<u8> {
        let wids = match self.candidate_blocks(stmt) {
            Ok(wids) => wids,
            Err(e) => {
                tracing::error!("candidate selection failed: {e}");
                Vec::new()
            }
        };

        let wal_block = self.wal_index.read().expect("wal index lock").clone();

        let mut sets: Vec<ResultSet> = self.workers.install(|| {
            wids.par_iter()
                .map(|&wid| {
                    if cancel.is_cancelled() {
                        return ResultSet::empty();
                    }
                    self.exec_block(wid, stmt)
                })
                .collect()
        });

        if let Some(block) = wal_block {
            if !cancel.is_cancelled() {
                sets.push(recovered_exec(&block, stmt));
            }
        }

        if cancel.is_cancelled() {
            return b"[]".to_vec();
        }

        let mut rs = merge(&sets);
        if !stmt.order_by.is_empty() {
            order_by(&mut rs, stmt);
        }
        marshal_result_set(&rs, stmt.limit)
    }

    /// Deletes every block created before `t`: whole files plus their
    /// metadata rows.
    pub fn purge_before(&self, t: DateTime<Utc>) -> Result<()> {
        for wid in self.store.select_before(t)? {
            let path = self.block_path(wid);
            self.cache.remove(wid as u64);
            if let Err(e) = fs::remove_file(&path) {
                if e.kind() != std::io::ErrorKind::NotFound {
                    tracing::info!(path = %path.display(), "purge: {e}");
                }
            }
        }
        self.store.purge_before(t)
    }

    fn next_wid(&self) -> i64 {
        self.seq.fetch_add(1, Ordering::SeqCst) + 1
    }

    /// Sharded path of a block file: `name[0..4]/name[8..12]/name` over the
    /// 16-hex-digit id.
    fn block_path(&self, wid: i64) -> PathBuf {
        let name = format!("{wid:016X}");
        index_dir(&self.config.directory).join(&name[0..4]).join(&name[8..12]).join(name)
    }

    /// Parses, builds, serializes, and registers one block. Build errors
    /// abort the batch and leave no block file behind.
    fn create_index(&self, wid: i64, data: &[u8]) -> Result<()> {
        let parsed = parse_json(data, self.config.fragment_size)?;
        let indexed = build(&parsed, wid as u64)?;
        let encoded = encode_block(&indexed);

        let path = self.block_path(wid);
        let dir = path.parent().expect("sharded path has a parent");
        fs::create_dir_all(dir)?;
        let tmp = dir.join(format!("tmp-{wid}"));
        fs::write(&tmp, &encoded)?;
        fs::rename(&tmp, &path)?;

        match self.register_block(wid, &indexed) {
            Ok(()) => Ok(()),
            Err(e) => {
                let _ = fs::remove_file(&path);
                Err(e)
            }
        }
    }

    /// Evaluates the timestamp and key paths against a fresh block and
    /// writes the `wave` / `waveloc` rows.
    fn register_block(&self, wid: i64, indexed: &IndexedBlock) -> Result<()> {
        let mut find = vec![Attribute { name: "ts".into(), group: false, func: None }];
        let mut where_ = vec![Expr::Tuple(Tuple {
            name: Some("ts".into()),
            path: self.ts_path.clone(),
            predicate: None,
        })];
        for (i, key) in self.key_paths.iter().enumerate() {
            find.push(Attribute { name: i.to_string(), group: false, func: None });
            where_.push(Expr::Tuple(Tuple {
                name: Some(i.to_string()),
                path: key.clone(),
                predicate: None,
            }));
        }
        let stmt = Statement { find, where_, order_by: Vec::new(), limit: 0 };
        let rs = exec(indexed, &stmt);

        let (mut min, mut max) = (i64::MAX, i64::MIN);
        if rs.column_type.first() == Some(&INT64) {
            let ts = &rs.column[0];
            for (row, &present) in ts.row_idx.iter().enumerate() {
                if present != 0 {
                    let v = ts.value[row] as i64;
                    min = min.min(v);
                    max = max.max(v);
                }
            }
        }
        if min > max {
            return Err(WaveError::InvalidInput(format!(
                "invalid timestamp path [{}]",
                self.ts_path
            )));
        }
        self.store.insert_wave(wid, min, max)?;

        for (i, path) in self.key_paths.iter().enumerate() {
            let column = &rs.column[i + 1];
            let mut keys: Vec<String> = Vec::new();
            for (row, &present) in column.row_idx.iter().enumerate() {
                if present == 0 {
                    continue;
                }
                match rs.column_type[i + 1] {
                    TEXT => {
                        let text = &rs.text[column.value[row] as usize];
                        if !text.is_empty() {
                            keys.push(String::from_utf8_lossy(text).into_owned());
                        }
                    }
                    INT64 => keys.push(format!("{:x}", column.value[row] as i64)),
                    _ => {}
                }
            }
            keys.sort_unstable();
            keys.dedup();
            self.store.insert_wave_loc(path, &keys, wid)?;
        }

        Ok(())
    }

    /// Narrows candidates via the first timeframe or key predicate; with
    /// neither, every known block is a candidate.
    fn candidate_blocks(&self, stmt: &Statement) -> Result<Vec<i64>> {
        for expr in &stmt.where_ {
            let Expr::Tuple(tuple) = expr else { continue };
            match &tuple.predicate {
                Some(Predicate::Timeframe(beg, end)) => {
                    return self.store.select_wave(*beg, *end);
                }
                Some(Predicate::Key(value)) => {
                    let key = match value {
                        KeyValue::Text(t) => t.clone(),
                        KeyValue::Int(v) => format!("{v:x}"),
                    };
                    return self.store.select_key(&tuple.path, &key);
                }
                _ => {}
            }
        }
        self.store.select_all()
    }

    /// Reads, decodes, and evaluates one block; any failure (missing file,
    /// corrupt bytes, worker panic) becomes an empty partial result.
    fn exec_block(&self, wid: i64, stmt: &Statement) -> ResultSet {
        let id = wid as u64;
        let block = match self.cache.get(id) {
            Some(block) => block,
            None => {
                let path = self.block_path(wid);
                let data = match fs::read(&path) {
                    Ok(data) => data,
                    Err(e) => {
                        tracing::warn!(path = %path.display(), "skipped block: {e}");
                        return ResultSet::empty();
                    }
                };
                match decode_block(&data) {
                    Ok(block) => {
                        let block = Arc::new(block);
                        self.cache.put(id, block.clone(), data.len());
                        block
                    }
                    Err(e) => {
                        tracing::warn!(path = %path.display(), "skipped corrupt block: {e}");
                        return ResultSet::empty();
                    }
                }
            }
        };

        recovered_exec(&block, stmt)
    }
}

// ---------------------------------------------------------------------------
// Worker panic recovery
// ---------------------------------------------------------------------------

/// Evaluation with panic recovery: a panicking block worker logs and
/// contributes an empty result.
fn recovered_exec(block: &IndexedBlock, stmt: &Statement) -> ResultSet {
    match std::panic::catch_unwind(std::panic::AssertUnwindSafe(|| exec(block, stmt))) {
        Ok(rs) => rs,
        Err(cause) => {
            let what = cause
                .downcast_ref::<&str>()
                .map(|s| s.to_string())
                .or_else(|| cause.downcast_ref::<String>().cloned())
                .unwrap_or_else(|| "unknown panic".into());
            tracing::error!(block = block.id, "block worker panicked: {what}");
            ResultSet::empty()
        }
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    fn engine_in(dir: &std::path::Path, keys: &[&str]) -> Engine {
        let keys: Vec<String> = keys.iter().map(|s| s.to_string()).collect();
        Engine::open(EngineConfig::new(dir), "/ts", &keys).expect("engine")
    }

    fn write_batch(dir: &std::path::Path, name: &str, json: &str) -> PathBuf {
        let path = dir.join(name);
        fs::write(&path, json).unwrap();
        path
    }

    #[test]
    fn index_then_query_round_trips() {
        let dir = tempdir().unwrap();
        let engine = engine_in(dir.path(), &[]);
        let batch = write_batch(
            dir.path(),
            "batch.json",
            r#"[{"ts": 1000, "d": "c"}, {"ts": 1500, "d": "f"}]"#,
        );
        engine.index_file(&batch).unwrap();

        let out = engine.query(r#"find $a where [$a /d contain("f")]"#).unwrap();
        assert_eq!(out, br#"[{"a":"f"}]"#);
    }

    #[test]
    fn timeframe_narrows_to_overlapping_blocks() {
        let dir = tempdir().unwrap();
        let engine = engine_in(dir.path(), &[]);
        let early = write_batch(dir.path(), "a.json", r#"[{"ts": 1000, "v": 1}]"#);
        let late = write_batch(dir.path(), "b.json", r#"[{"ts": 9000, "v": 2}]"#);
        engine.index_file(&early).unwrap();
        engine.index_file(&late).unwrap();

        let out = engine
            .query("find $v where [/ts timeframe(500, 1500)] [$v /v exist]")
            .unwrap();
        assert_eq!(out, br#"[{"v":1}]"#);
    }

    #[test]
    fn key_predicate_narrows_via_waveloc() {
        let dir = tempdir().unwrap();
        let engine = engine_in(dir.path(), &["/k"]);
        let a = write_batch(dir.path(), "a.json", r#"[{"ts": 1, "k": "A", "v": 1}]"#);
        let b = write_batch(dir.path(), "b.json", r#"[{"ts": 2, "k": "B", "v": 2}]"#);
        engine.index_file(&a).unwrap();
        engine.index_file(&b).unwrap();

        let out = engine.query("find $v where [/k key('A')] [$v /v exist]").unwrap();
        assert_eq!(out, br#"[{"v":1}]"#);
    }

    #[test]
    fn invalid_timestamp_path_leaves_no_block() {
        let dir = tempdir().unwrap();
        let engine = engine_in(dir.path(), &[]);
        let batch = write_batch(dir.path(), "bad.json", r#"[{"other": 1}]"#);
        assert!(engine.index_file(&batch).is_err());

        // No metadata row and no block file survive.
        assert_eq!(engine.store.select_all().unwrap(), Vec::<i64>::new());
        let out = engine.query("find $v where [$v /other exist]").unwrap();
        assert_eq!(out, b"[]");
    }

    #[test]
    fn merge_spans_blocks_with_grouping() {
        let dir = tempdir().unwrap();
        let engine = engine_in(dir.path(), &[]);
        let a = write_batch(
            dir.path(),
            "a.json",
            r#"[{"ts": 1, "url": "/x", "hit": 10, "duration": 1},
                {"ts": 2, "url": "/x", "hit": 20, "duration": 2}]"#,
        );
        let b = write_batch(
            dir.path(),
            "b.json",
            r#"[{"ts": 3, "url": "/x", "hit": 30, "duration": 3}]"#,
        );
        engine.index_file(&a).unwrap();
        engine.index_file(&b).unwrap();

        let out = engine
            .query("find group-by($u), max($h), avg($d) where [$u /url] [$h /hit] [$d /duration]")
            .unwrap();
        assert_eq!(out, br#"[{"u":"/x","h":30,"d":2}]"#);
    }

    #[test]
    fn wal_documents_are_visible_after_refresh() {
        let dir = tempdir().unwrap();
        let engine = engine_in(dir.path(), &[]);
        engine.ingest(br#"{"ts": 5, "v": 42}"#).unwrap();
        engine.refresh_wal_index();

        let out = engine.query("find $v where [$v /v eq(42)]").unwrap();
        assert_eq!(out, br#"[{"v":42}]"#);
    }

    #[test]
    fn wal_batch_drains_into_a_real_block() {
        let dir = tempdir().unwrap();
        let mut config = EngineConfig::new(dir.path());
        config.wal_batch = 2;
        let engine = Engine::open(config, "/ts", &[]).unwrap();

        engine.ingest(br#"{"ts": 1, "v": 1}"#).unwrap();
        engine.ingest(br#"{"ts": 2, "v": 2}"#).unwrap();

        assert_eq!(engine.store.select_all().unwrap().len(), 1);
        let out = engine.query("find $v where [$v /v exist] order-by $v asc").unwrap();
        assert_eq!(out, br#"[{"v":1},{"v":2}]"#);
    }

    #[test]
    fn cancelled_query_returns_empty() {
        let dir = tempdir().unwrap();
        let engine = engine_in(dir.path(), &[]);
        let batch = write_batch(dir.path(), "a.json", r#"[{"ts": 1, "v": 1}]"#);
        engine.index_file(&batch).unwrap();

        let (stmt, _) = wave_ssql::parse("find $v where [$v /v exist]");
        let cancel = CancelToken::new();
        cancel.cancel();
        assert_eq!(engine.query_stmt(&stmt, &cancel), b"[]");
    }

    #[test]
    fn purge_deletes_files_and_rows() {
        let dir = tempdir().unwrap();
        let engine = engine_in(dir.path(), &[]);
        let batch = write_batch(dir.path(), "a.json", r#"[{"ts": 1, "v": 1}]"#);
        let wid = engine.index_file(&batch).unwrap();
        let path = engine.block_path(wid as i64);
        assert!(path.exists());

        engine.purge_before(Utc::now() + chrono::Duration::hours(1)).unwrap();
        assert!(!path.exists());
        assert_eq!(engine.store.select_all().unwrap(), Vec::<i64>::new());
        assert_eq!(engine.query("find $v where [$v /v exist]").unwrap(), b"[]");
    }

    #[test]
    fn corrupt_block_is_skipped_with_partial_results() {
        let dir = tempdir().unwrap();
        let engine = engine_in(dir.path(), &[]);
        let a = write_batch(dir.path(), "a.json", r#"[{"ts": 1, "v": 1}]"#);
        let b = write_batch(dir.path(), "b.json", r#"[{"ts": 2, "v": 2}]"#);
        let wid = engine.index_file(&a).unwrap();
        engine.index_file(&b).unwrap();

        // Truncate the first block's file.
        let path = engine.block_path(wid as i64);
        let data = fs::read(&path).unwrap();
        fs::write(&path, &data[..data.len() / 2]).unwrap();

        let out = engine.query("find $v where [$v /v exist]").unwrap();
        assert_eq!(out, br#"[{"v":2}]"#);
    }
}
