//! SQLite metadata store: per-block time ranges (`wave`) and the inverted
//! index on configured key paths (`waveloc`).

use chrono::{DateTime, Utc};
use r2d2::Pool;
use r2d2_sqlite::SqliteConnectionManager;
use rusqlite::params;
use wave_core::{Result, WaveError};

// ---------------------------------------------------------------------------
// Pool constructors
// ---------------------------------------------------------------------------

pub type DbPool = Pool<SqliteConnectionManager>;

const CREATE_TABLES: &str = "
CREATE TABLE IF NOT EXISTS wave (
    wid     INTEGER PRIMARY KEY,
    beg     INTEGER NOT NULL,
    end     INTEGER NOT NULL,
    created INTEGER NOT NULL DEFAULT (strftime('%s','now'))
);

CREATE INDEX IF NOT EXISTS wave_time ON wave (beg, end);

CREATE TABLE IF NOT EXISTS waveloc (
    path    TEXT,
    key     TEXT,
    wid     INTEGER,
    created INTEGER NOT NULL DEFAULT (strftime('%s','now')),
    PRIMARY KEY (path, key, wid)
) WITHOUT ROWID;
";

/// Open a pool backed by the `db` file under `dir`.
pub fn create_pool(dir: &std::path::Path) -> Result<DbPool> {
    let manager = SqliteConnectionManager::file(dir.join("db")).with_init(|conn| {
        conn.execute_batch("PRAGMA journal_mode = WAL; PRAGMA foreign_keys = ON;")
    });
    build_pool(manager, 8)
}

/// Open a pool backed by a private in-memory database, for tests.
pub fn create_memory_pool() -> Result<DbPool> {
    build_pool(SqliteConnectionManager::memory(), 1)
}

fn build_pool(manager: SqliteConnectionManager, size: u32) -> Result<DbPool> {
    let pool = Pool::builder()
        .max_size(size)
        .build(manager)
        .map_err(|e| WaveError::Database(e.to_string()))?;
    let conn = pool.get().map_err(|e| WaveError::Database(e.to_string()))?;
    conn.execute_batch(CREATE_TABLES)
        .map_err(|e| WaveError::Database(e.to_string()))?;
    Ok(pool)
}

// ---------------------------------------------------------------------------
// MetaStore trait
// ---------------------------------------------------------------------------

/// Read/write operations the engine needs from the metadata store.
pub trait MetaStore: Send + Sync {
    fn insert_wave(&self, wid: i64, beg: i64, end: i64) -> Result<()>;
    fn insert_wave_loc(&self, path: &str, keys: &[String], wid: i64) -> Result<()>;
    /// Block ids whose time range overlaps `[beg, end]`.
    fn select_wave(&self, beg: i64, end: i64) -> Result<Vec<i64>>;
    /// Block ids indexed under `(path, key)`.
    fn select_key(&self, path: &str, key: &str) -> Result<Vec<i64>>;
    fn select_all(&self) -> Result<Vec<i64>>;
    fn select_before(&self, t: DateTime<Utc>) -> Result<Vec<i64>>;
    fn purge_before(&self, t: DateTime<Utc>) -> Result<()>;
    fn max_wid(&self) -> Result<i64>;
}

pub struct SqliteMetaStore {
    pool: DbPool,
}

impl SqliteMetaStore {
    pub fn new(pool: DbPool) -> Self {
        Self { pool }
    }

    fn conn(&self) -> Result<r2d2::PooledConnection<SqliteConnectionManager>> {
        self.pool.get().map_err(|e| WaveError::Database(e.to_string()))
    }
}

fn wids(mut stmt: rusqlite::Statement<'_>, params: impl rusqlite::Params) -> Result<Vec<i64>> {
    let rows = stmt
        .query_map(params, |row| row.get::<_, i64>(0))
        .map_err(db_err)?
        .collect::<rusqlite::Result<Vec<_>>>()
        .map_err(db_err)?;
    Ok(rows)
}

fn db_err(e: rusqlite::Error) -> WaveError {
    WaveError::Database(e.to_string())
}

// ---------------------------------------------------------------------------
// MetaStore implementation
// ---------------------------------------------------------------------------

impl MetaStore for SqliteMetaStore {
    fn insert_wave(&self, wid: i64, beg: i64, end: i64) -> Result<()> {
        let conn = self.conn()?;
        conn.execute(
            "INSERT INTO wave (wid, beg, end) VALUES (?1, ?2, ?3)",
            params![wid, beg, end],
        )
        .map_err(db_err)?;
        Ok(())
    }

    fn insert_wave_loc(&self, path: &str, keys: &[String], wid: i64) -> Result<()> {
        let mut conn = self.conn()?;
        let tx = conn.transaction().map_err(db_err)?;
        for key in keys {
            tx.execute(
                "INSERT INTO waveloc (path, key, wid) VALUES (?1, ?2, ?3) ON CONFLICT DO NOTHING",
                params![path, key, wid],
            )
            .map_err(db_err)?;
        }
        tx.commit().map_err(db_err)?;
        Ok(())
    }

    fn select_wave(&self, beg: i64, end: i64) -> Result<Vec<i64>> {
        let conn = self.conn()?;
        let stmt = conn
            .prepare("SELECT wid FROM wave WHERE beg <= ?2 AND end >= ?1")
            .map_err(db_err)?;
        wids(stmt, params![beg, end])
    }

    fn select_key(&self, path: &str, key: &str) -> Result<Vec<i64>> {
        let conn = self.conn()?;
        let stmt = conn
            .prepare("SELECT DISTINCT wid FROM waveloc WHERE path = ?1 AND key = ?2")
            .map_err(db_err)?;
        wids(stmt, params![path, key])
    }

    fn select_all(&self) -> Result<Vec<i64>> {
        let conn = self.conn()?;
        let stmt = conn.prepare("SELECT wid FROM wave ORDER BY wid").map_err(db_err)?;
        wids(stmt, params![])
    }

    fn select_before(&self, t: DateTime<Utc>) -> Result<Vec<i64>> {
        let conn = self.conn()?;
        let stmt = conn
            .prepare(
                "SELECT DISTINCT wid FROM wave WHERE created < ?1
                 UNION SELECT DISTINCT wid FROM waveloc WHERE created < ?1",
            )
            .map_err(db_err)?;
        wids(stmt, params![t.timestamp()])
    }

    fn purge_before(&self, t: DateTime<Utc>) -> Result<()> {
        let mut conn = self.conn()?;
        let tx = conn.transaction().map_err(db_err)?;
        tx.execute("DELETE FROM wave WHERE created < ?1", params![t.timestamp()]).map_err(db_err)?;
        tx.execute("DELETE FROM waveloc WHERE created < ?1", params![t.timestamp()]).map_err(db_err)?;
        tx.commit().map_err(db_err)?;
        Ok(())
    }

    fn max_wid(&self) -> Result<i64> {
        let conn = self.conn()?;
        conn.query_row("SELECT COALESCE(MAX(wid), 0) FROM wave", [], |row| row.get(0))
            .map_err(db_err)
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
