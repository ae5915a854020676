use anyhow::{anyhow, Result};
use rusqlite::{params, Connection, OptionalExtension};
use std::sync::{Arc, Mutex, MutexGuard};

pub mod models;
use models::*;

use crate::cache::CacheStore;

/// Thread-safe SQLite connection pool (single connection with mutex)
#[derive(Clone)]
pub struct Database {
    conn: Arc<Mutex<Connection>>,
}

impl Database {
    /// Open (or create) the SQLite database at the given path
    pub fn open(path: &str) -> Result<Self> {
        let conn = Connection::open(path)?;
        conn.execute_batch("PRAGMA journal_mode=WAL;")?;
        Self::from_connection(conn)
    }

    /// Private in-memory database, used by tests and `--database-path :memory:`
    pub fn open_in_memory() -> Result<Self> {
        Self::from_connection(Connection::open_in_memory()?)
    }

    fn from_connection(conn: Connection) -> Result<Self> {
        let db = Database {
            conn: Arc::new(Mutex::new(conn)),
        };
        db.run_migrations()?;
        Ok(db)
    }

    fn conn(&self) -> Result<MutexGuard<'_, Connection>> {
        self.conn
            .lock()
            .map_err(|_| anyhow!("database mutex poisoned"))
    }

    /// Run schema migrations (idempotent)
    fn run_migrations(&self) -> Result<()> {
        let conn = self.conn()?;
        conn.execute_batch(SCHEMA_SQL)?;
        Ok(())
    }

    // ── Cache entries ─────────────────────────────────────────────────────────

    /// Fetch one entry by fingerprint
    pub fn get_cache_entry(&self, fingerprint: &str) -> Result<Option<CacheEntry>> {
        let conn = self.conn()?;
        let entry = conn
            .query_row(
                "SELECT fingerprint, source, class, payload, last_updated,
                        has_live_matches, next_earliest_match_time, live_match_count
                 FROM cache_entries WHERE fingerprint=?1",
                params![fingerprint],
                map_cache_entry,
            )
            .optional()?;
        Ok(entry)
    }

    /// Insert or fully overwrite an entry
    pub fn upsert_cache_entry(&self, entry: &CacheEntry) -> Result<()> {
        let conn = self.conn()?;
        conn.execute(
            "INSERT INTO cache_entries (
                fingerprint, source, class, payload, last_updated,
                has_live_matches, next_earliest_match_time, live_match_count
             ) VALUES (?1,?2,?3,?4,?5,?6,?7,?8)
             ON CONFLICT(fingerprint) DO UPDATE SET
                source=excluded.source,
                class=excluded.class,
                payload=excluded.payload,
                last_updated=excluded.last_updated,
                has_live_matches=excluded.has_live_matches,
                next_earliest_match_time=excluded.next_earliest_match_time,
                live_match_count=excluded.live_match_count",
            params![
                entry.fingerprint,
                entry.source,
                entry.class.as_str(),
                entry.payload,
                entry.last_updated,
                entry.has_live_matches,
                entry.next_earliest_match_time,
                entry.live_match_count,
            ],
        )?;
        Ok(())
    }

    /// Delete one entry; returns whether it existed
    pub fn delete_cache_entry(&self, fingerprint: &str) -> Result<bool> {
        let conn = self.conn()?;
        let n = conn.execute(
            "DELETE FROM cache_entries WHERE fingerprint=?1",
            params![fingerprint],
        )?;
        Ok(n > 0)
    }

    /// Delete every entry whose `field` column equals `value`
    pub fn delete_cache_entries_where(&self, field: CacheField, value: &str) -> Result<usize> {
        let conn = self.conn()?;
        let sql = format!("DELETE FROM cache_entries WHERE {}=?1", field.column());
        let n = conn.execute(&sql, params![value])?;
        Ok(n)
    }

    /// List entries whose `field` column equals `value`, newest first
    pub fn find_cache_entries_where(&self, field: CacheField, value: &str) -> Result<Vec<CacheEntry>> {
        let conn = self.conn()?;
        let sql = format!(
            "SELECT fingerprint, source, class, payload, last_updated,
                    has_live_matches, next_earliest_match_time, live_match_count
             FROM cache_entries WHERE {}=?1 ORDER BY last_updated DESC",
            field.column()
        );
        let mut stmt = conn.prepare(&sql)?;
        let entries = stmt
            .query_map(params![value], map_cache_entry)?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(entries)
    }

    /// List every entry, newest first
    pub fn list_cache_entries(&self) -> Result<Vec<CacheEntry>> {
        let conn = self.conn()?;
        let mut stmt = conn.prepare(
            "SELECT fingerprint, source, class, payload, last_updated,
                    has_live_matches, next_earliest_match_time, live_match_count
             FROM cache_entries ORDER BY last_updated DESC",
        )?;
        let entries = stmt
            .query_map([], map_cache_entry)?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(entries)
    }
}

impl CacheStore for Database {
    fn get(&self, fingerprint: &str) -> Result<Option<CacheEntry>> {
        self.get_cache_entry(fingerprint)
    }

    fn put(&self, entry: &CacheEntry) -> Result<()> {
        self.upsert_cache_entry(entry)
    }

    fn delete(&self, fingerprint: &str) -> Result<bool> {
        self.delete_cache_entry(fingerprint)
    }

    fn delete_where(&self, field: CacheField, value: &str) -> Result<usize> {
        self.delete_cache_entries_where(field, value)
    }

    fn find_where(&self, field: CacheField, value: &str) -> Result<Vec<CacheEntry>> {
        self.find_cache_entries_where(field, value)
    }

    fn list(&self) -> Result<Vec<CacheEntry>> {
        self.list_cache_entries()
    }
}

/// Indexed cache columns usable for bulk queries.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CacheField {
    Source,
    Class,
}

impl CacheField {
    pub fn column(&self) -> &'static str {
        match self {
            CacheField::Source => "source",
            CacheField::Class => "class",
        }
    }
}

// ── SQL helpers ────────────────────────────────────────────────────────────────

fn map_cache_entry(row: &rusqlite::Row) -> rusqlite::Result<CacheEntry> {
    let class: String = row.get(2)?;
    let class = class.parse::<FreshnessClass>().map_err(|e| {
        rusqlite::Error::FromSqlConversionFailure(2, rusqlite::types::Type::Text, e.into())
    })?;
    Ok(CacheEntry {
        fingerprint: row.get(0)?,
        source: row.get(1)?,
        class,
        payload: row.get(3)?,
        last_updated: row.get(4)?,
        has_live_matches: row.get(5)?,
        next_earliest_match_time: row.get(6)?,
        live_match_count: row.get(7)?,
    })
}

/// SQLite schema (idempotent CREATE IF NOT EXISTS)
pub const SCHEMA_SQL: &str = r#"
CREATE TABLE IF NOT EXISTS cache_entries (
    fingerprint              TEXT    PRIMARY KEY,
    source                   TEXT    NOT NULL,
    class                    TEXT    NOT NULL,
    payload                  TEXT    NOT NULL,
    last_updated             TEXT    NOT NULL,
    has_live_matches         INTEGER NOT NULL DEFAULT 0,
    next_earliest_match_time TEXT,
    live_match_count         INTEGER NOT NULL DEFAULT 0
);

CREATE INDEX IF NOT EXISTS idx_cache_entries_source ON cache_entries(source);
CREATE INDEX IF NOT EXISTS idx_cache_entries_class ON cache_entries(class);
"#;
