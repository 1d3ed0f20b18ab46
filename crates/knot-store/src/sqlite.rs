//! SQLite-backed durable cache storage.

use std::path::Path;
use std::sync::Mutex;

use chrono::Utc;
use rusqlite::{params, Connection, OptionalExtension};
use tracing::{debug, info};

use crate::backend::CacheBackend;
use crate::{CacheEntry, CacheKey, StoreError, StoreResult};

/// Database schema version for migrations
const SCHEMA_VERSION: i32 = 2;

const SCHEMA_V1: &str = r#"
CREATE TABLE IF NOT EXISTS schema_version (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    version INTEGER NOT NULL,
    applied_at INTEGER NOT NULL
);

CREATE TABLE IF NOT EXISTS caches (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    name TEXT NOT NULL UNIQUE,
    created_at INTEGER NOT NULL
);

CREATE TABLE IF NOT EXISTS entries (
    cache_id INTEGER NOT NULL REFERENCES caches(id) ON DELETE CASCADE,
    request_key TEXT NOT NULL,
    response_url TEXT,
    status INTEGER NOT NULL,
    status_text TEXT NOT NULL,
    headers TEXT NOT NULL,
    body BLOB NOT NULL,
    response_type TEXT NOT NULL,
    redirected INTEGER NOT NULL DEFAULT 0,
    cached_at INTEGER NOT NULL,
    PRIMARY KEY (cache_id, request_key)
);
"#;

/// v2 stores header values as raw bytes. v1 rows cannot be read back, so
/// they are dropped and refetched on the next install.
const MIGRATE_V2: &str = "DELETE FROM entries;";

/// Durable backend storing every generation in one SQLite file.
pub struct SqliteBackend {
    conn: Mutex<Connection>,
}

impl SqliteBackend {
    /// Open or create the database at `path`.
    pub fn open(path: &Path) -> StoreResult<Self> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let conn = Connection::open(path)?;
        info!(path = %path.display(), "Opened cache database");
        Self::init(conn)
    }

    /// A database that lives only as long as this value.
    pub fn open_in_memory() -> StoreResult<Self> {
        Self::init(Connection::open_in_memory()?)
    }

    fn init(conn: Connection) -> StoreResult<Self> {
        conn.execute("PRAGMA foreign_keys = ON", [])?;

        let table_exists: bool = conn.query_row(
            "SELECT COUNT(*) FROM sqlite_master WHERE type='table' AND name='schema_version'",
            [],
            |row| row.get::<_, i32>(0).map(|count| count > 0),
        )?;

        let version: i32 = if table_exists {
            conn.query_row(
                "SELECT version FROM schema_version ORDER BY id DESC LIMIT 1",
                [],
                |row| row.get(0),
            )
            .optional()?
            .unwrap_or(0)
        } else {
            0
        };

        if version < SCHEMA_VERSION {
            conn.execute_batch(SCHEMA_V1)?;
            if version == 1 {
                conn.execute_batch(MIGRATE_V2)?;
            }
            conn.execute(
                "INSERT INTO schema_version (version, applied_at) VALUES (?, ?)",
                params![SCHEMA_VERSION, Utc::now().timestamp()],
            )?;
            debug!(from = version, to = SCHEMA_VERSION, "Migrated cache schema");
        }

        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    fn cache_id(conn: &Connection, name: &str) -> StoreResult<Option<i64>> {
        Ok(conn
            .query_row("SELECT id FROM caches WHERE name = ?", params![name], |row| {
                row.get(0)
            })
            .optional()?)
    }
}

fn read_entry(row: &rusqlite::Row<'_>) -> rusqlite::Result<RawEntry> {
    Ok(RawEntry {
        key: row.get(0)?,
        url: row.get(1)?,
        status: row.get(2)?,
        status_text: row.get(3)?,
        headers: row.get(4)?,
        body: row.get(5)?,
        response_type: row.get(6)?,
        redirected: row.get(7)?,
        cached_at: row.get(8)?,
    })
}

/// Row as read from SQLite, before JSON and enum decoding.
struct RawEntry {
    key: String,
    url: Option<String>,
    status: u16,
    status_text: String,
    headers: String,
    body: Vec<u8>,
    response_type: String,
    redirected: bool,
    cached_at: i64,
}

impl RawEntry {
    fn decode(self) -> StoreResult<CacheEntry> {
        let response_type = self.response_type.parse().map_err(|_| StoreError::Corrupt {
            key: self.key.clone(),
            reason: format!("unknown response type {}", self.response_type),
        })?;
        Ok(CacheEntry {
            headers: serde_json::from_str(&self.headers)?,
            key: CacheKey::from_stored(self.key),
            url: self.url,
            status: self.status,
            status_text: self.status_text,
            body: self.body,
            response_type,
            redirected: self.redirected,
            cached_at: self.cached_at,
        })
    }
}

impl CacheBackend for SqliteBackend {
    fn create(&self, name: &str) -> StoreResult<()> {
        let conn = self.conn.lock().map_err(|_| StoreError::Poisoned)?;
        conn.execute(
            "INSERT OR IGNORE INTO caches (name, created_at) VALUES (?, ?)",
            params![name, Utc::now().timestamp_millis()],
        )?;
        Ok(())
    }

    fn has(&self, name: &str) -> StoreResult<bool> {
        let conn = self.conn.lock().map_err(|_| StoreError::Poisoned)?;
        Ok(Self::cache_id(&conn, name)?.is_some())
    }

    fn delete(&self, name: &str) -> StoreResult<bool> {
        let conn = self.conn.lock().map_err(|_| StoreError::Poisoned)?;
        let removed = conn.execute("DELETE FROM caches WHERE name = ?", params![name])?;
        Ok(removed > 0)
    }

    fn names(&self) -> StoreResult<Vec<String>> {
        let conn = self.conn.lock().map_err(|_| StoreError::Poisoned)?;
        let mut stmt = conn.prepare("SELECT name FROM caches ORDER BY id")?;
        let names = stmt
            .query_map([], |row| row.get(0))?
            .collect::<rusqlite::Result<Vec<String>>>()?;
        Ok(names)
    }

    fn get(&self, name: &str, key: &CacheKey) -> StoreResult<Option<CacheEntry>> {
        let conn = self.conn.lock().map_err(|_| StoreError::Poisoned)?;
        let raw = conn
            .query_row(
                "SELECT e.request_key, e.response_url, e.status, e.status_text, e.headers,
                        e.body, e.response_type, e.redirected, e.cached_at
                 FROM entries e
                 INNER JOIN caches c ON c.id = e.cache_id
                 WHERE c.name = ? AND e.request_key = ?",
                params![name, key.as_str()],
                read_entry,
            )
            .optional()?;
        raw.map(RawEntry::decode).transpose()
    }

    fn put(&self, name: &str, entries: Vec<CacheEntry>) -> StoreResult<()> {
        let mut conn = self.conn.lock().map_err(|_| StoreError::Poisoned)?;
        let cache_id = Self::cache_id(&conn, name)?
            .ok_or_else(|| StoreError::CacheNotFound(name.to_string()))?;

        let tx = conn.transaction()?;
        for entry in &entries {
            let headers = serde_json::to_string(&entry.headers)?;
            tx.execute(
                "INSERT OR REPLACE INTO entries
                    (cache_id, request_key, response_url, status, status_text, headers,
                     body, response_type, redirected, cached_at)
                 VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?)",
                params![
                    cache_id,
                    entry.key.as_str(),
                    entry.url,
                    entry.status,
                    entry.status_text,
                    headers,
                    entry.body,
                    entry.response_type.as_str(),
                    entry.redirected,
                    entry.cached_at,
                ],
            )?;
        }
        tx.commit()?;

        debug!(cache = name, count = entries.len(), "Stored cache entries");
        Ok(())
    }

    fn remove(&self, name: &str, key: &CacheKey) -> StoreResult<bool> {
        let conn = self.conn.lock().map_err(|_| StoreError::Poisoned)?;
        let removed = conn.execute(
            "DELETE FROM entries
             WHERE request_key = ? AND cache_id = (SELECT id FROM caches WHERE name = ?)",
            params![key.as_str(), name],
        )?;
        Ok(removed > 0)
    }

    fn keys(&self, name: &str) -> StoreResult<Vec<CacheKey>> {
        let conn = self.conn.lock().map_err(|_| StoreError::Poisoned)?;
        let cache_id = Self::cache_id(&conn, name)?
            .ok_or_else(|| StoreError::CacheNotFound(name.to_string()))?;
        let mut stmt =
            conn.prepare("SELECT request_key FROM entries WHERE cache_id = ? ORDER BY request_key")?;
        let keys = stmt
            .query_map(params![cache_id], |row| row.get::<_, String>(0))?
            .collect::<rusqlite::Result<Vec<String>>>()?;
        Ok(keys.into_iter().map(CacheKey::from_stored).collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use knot_net::{Response, ResponseType};
    use tempfile::tempdir;
    use url::Url;

    fn entry(url: &str, body: &'static str) -> CacheEntry {
        let key = CacheKey::from_url(&Url::parse(url).unwrap());
        CacheEntry::new(key, &Response::synthetic(200, "OK", body))
    }

    #[test]
    fn test_entries_survive_reopen() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("origin").join("caches.db");

        {
            let backend = SqliteBackend::open(&path).unwrap();
            backend.create("knot-app-cache-v1").unwrap();
            backend
                .put("knot-app-cache-v1", vec![entry("https://a.test/index.html", "<html>")])
                .unwrap();
        }

        let backend = SqliteBackend::open(&path).unwrap();
        assert_eq!(backend.names().unwrap(), vec!["knot-app-cache-v1"]);
        let key = CacheKey::from_url(&Url::parse("https://a.test/index.html").unwrap());
        let stored = backend.get("knot-app-cache-v1", &key).unwrap().unwrap();
        assert_eq!(stored.body, b"<html>");
        assert_eq!(stored.response_type, ResponseType::Default);
        assert_eq!(stored.status_text, "OK");
    }

    #[test]
    fn test_binary_header_value_survives_reopen() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("caches.db");
        let url = Url::parse("https://a.test/photo.jpg").unwrap();
        let mut response = Response::synthetic(200, "OK", "jpeg");
        response.headers.insert(
            "content-disposition",
            http::HeaderValue::from_bytes(b"attachment; filename=caf\xe9.jpg").unwrap(),
        );

        {
            let backend = SqliteBackend::open(&path).unwrap();
            backend.create("v1").unwrap();
            backend
                .put("v1", vec![CacheEntry::new(CacheKey::from_url(&url), &response)])
                .unwrap();
        }

        let backend = SqliteBackend::open(&path).unwrap();
        let stored = backend.get("v1", &CacheKey::from_url(&url)).unwrap().unwrap();
        assert_eq!(stored.to_response().unwrap(), response);
    }

    #[test]
    fn test_v1_entries_are_dropped_on_upgrade() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("caches.db");

        {
            let backend = SqliteBackend::open(&path).unwrap();
            backend.create("v1").unwrap();
            backend.put("v1", vec![entry("https://a.test/x", "x")]).unwrap();
            let conn = backend.conn.lock().unwrap();
            conn.execute("DELETE FROM schema_version", []).unwrap();
            conn.execute(
                "INSERT INTO schema_version (version, applied_at) VALUES (1, 0)",
                [],
            )
            .unwrap();
        }

        let backend = SqliteBackend::open(&path).unwrap();
        assert!(backend.has("v1").unwrap());
        assert!(backend.keys("v1").unwrap().is_empty());
    }

    #[test]
    fn test_delete_cascades_to_entries() {
        let backend = SqliteBackend::open_in_memory().unwrap();
        backend.create("v0").unwrap();
        backend.put("v0", vec![entry("https://a.test/x", "x")]).unwrap();

        assert!(backend.delete("v0").unwrap());
        assert!(!backend.has("v0").unwrap());

        backend.create("v0").unwrap();
        assert!(backend.keys("v0").unwrap().is_empty());
    }

    #[test]
    fn test_put_overwrites_and_is_scoped_by_cache() {
        let backend = SqliteBackend::open_in_memory().unwrap();
        backend.create("v1").unwrap();
        backend.create("v2").unwrap();
        backend.put("v1", vec![entry("https://a.test/x", "one")]).unwrap();
        backend.put("v1", vec![entry("https://a.test/x", "two")]).unwrap();

        let key = CacheKey::from_url(&Url::parse("https://a.test/x").unwrap());
        assert_eq!(backend.get("v1", &key).unwrap().unwrap().body, b"two");
        assert!(backend.get("v2", &key).unwrap().is_none());
        assert_eq!(backend.keys("v1").unwrap(), vec![key]);
    }

    #[test]
    fn test_put_into_missing_cache_fails() {
        let backend = SqliteBackend::open_in_memory().unwrap();
        assert!(matches!(
            backend.put("nope", vec![entry("https://a.test/x", "x")]),
            Err(StoreError::CacheNotFound(_))
        ));
    }

    #[test]
    fn test_remove_single_entry() {
        let backend = SqliteBackend::open_in_memory().unwrap();
        backend.create("v1").unwrap();
        backend
            .put("v1", vec![entry("https://a.test/x", "x"), entry("https://a.test/y", "y")])
            .unwrap();

        let key = CacheKey::from_url(&Url::parse("https://a.test/x").unwrap());
        assert!(backend.remove("v1", &key).unwrap());
        assert!(!backend.remove("v1", &key).unwrap());
        assert_eq!(backend.keys("v1").unwrap().len(), 1);
    }
}
