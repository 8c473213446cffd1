//! Cache storage trait and SQLite implementation.

use chrono::{DateTime, Utc};
use color_eyre::{eyre::eyre, Result};
use rusqlite::{params, Connection, OptionalExtension};
use std::path::{Path, PathBuf};
use std::sync::Mutex;

use super::traits::{CachedSnapshot, RequestKey, Snapshot};

/// Trait for cache storage backends.
///
/// Every entry belongs to exactly one generation; nothing here reads or
/// writes across generations.
pub trait CacheStorage: Send + Sync + 'static {
  /// Create the generation if it does not exist yet.
  fn open_generation(&self, generation: &str) -> Result<()>;

  /// All stored generations, oldest first.
  fn generations(&self) -> Result<Vec<String>>;

  /// Delete a generation and all its entries. Returns false if it did not exist.
  fn delete_generation(&self, generation: &str) -> Result<bool>;

  /// Store (or overwrite) a single entry. Writes into a generation that no
  /// longer exists are dropped.
  fn put(&self, generation: &str, key: &RequestKey, snapshot: &Snapshot) -> Result<()>;

  /// Store several entries atomically: either all of them land or none.
  fn put_all(&self, generation: &str, entries: &[(RequestKey, Snapshot)]) -> Result<()>;

  /// Look up an entry. An unreadable entry is an error, a missing one is `None`.
  fn lookup(&self, generation: &str, key: &RequestKey) -> Result<Option<CachedSnapshot>>;

  /// Keys stored in a generation.
  fn keys(&self, generation: &str) -> Result<Vec<RequestKey>>;
}

/// SQLite-based cache storage implementation.
pub struct SqliteStorage {
  conn: Mutex<Connection>,
}

impl SqliteStorage {
  /// Open the store at the default location.
  pub fn open() -> Result<Self> {
    Self::open_at(&Self::default_path()?)
  }

  /// Open (creating if absent) the store at `path`.
  pub fn open_at(path: &Path) -> Result<Self> {
    // Ensure parent directory exists
    if let Some(parent) = path.parent() {
      std::fs::create_dir_all(parent)
        .map_err(|e| eyre!("Failed to create cache directory: {}", e))?;
    }

    let conn = Connection::open(path)
      .map_err(|e| eyre!("Failed to open cache database at {}: {}", path.display(), e))?;

    Self::with_connection(conn)
  }

  /// Open a throwaway store that lives in memory.
  pub fn open_in_memory() -> Result<Self> {
    let conn = Connection::open_in_memory()
      .map_err(|e| eyre!("Failed to open in-memory cache database: {}", e))?;

    Self::with_connection(conn)
  }

  fn with_connection(conn: Connection) -> Result<Self> {
    let storage = Self {
      conn: Mutex::new(conn),
    };
    storage.run_migrations()?;

    Ok(storage)
  }

  /// Get the default database path.
  pub fn default_path() -> Result<PathBuf> {
    let data_dir = dirs::data_dir()
      .or_else(|| dirs::home_dir().map(|p| p.join(".local/share")))
      .ok_or_else(|| eyre!("Could not determine data directory"))?;

    Ok(data_dir.join("offline-router").join("cache.db"))
  }

  /// Run database migrations for cache tables.
  fn run_migrations(&self) -> Result<()> {
    let conn = self.lock()?;

    conn
      .execute_batch(CACHE_SCHEMA)
      .map_err(|e| eyre!("Failed to run cache migrations: {}", e))?;

    Ok(())
  }

  fn lock(&self) -> Result<std::sync::MutexGuard<'_, Connection>> {
    self
      .conn
      .lock()
      .map_err(|e| eyre!("Lock poisoned: {}", e))
  }
}

/// Schema for cache tables.
const CACHE_SCHEMA: &str = r#"
CREATE TABLE IF NOT EXISTS generations (
    name TEXT PRIMARY KEY,
    created_at TEXT NOT NULL DEFAULT (datetime('now'))
);

-- One captured response per (generation, request key)
CREATE TABLE IF NOT EXISTS cache_entries (
    generation TEXT NOT NULL,
    key_hash TEXT NOT NULL,
    method TEXT NOT NULL,
    url TEXT NOT NULL,
    status INTEGER NOT NULL,
    headers TEXT NOT NULL,
    body BLOB NOT NULL,
    cached_at TEXT NOT NULL DEFAULT (datetime('now')),
    PRIMARY KEY (generation, key_hash)
);

CREATE INDEX IF NOT EXISTS idx_cache_entries_generation ON cache_entries(generation);
"#;

const INSERT_ENTRY: &str = r#"
INSERT OR REPLACE INTO cache_entries (generation, key_hash, method, url, status, headers, body, cached_at)
SELECT ?1, ?2, ?3, ?4, ?5, ?6, ?7, datetime('now')
WHERE EXISTS (SELECT 1 FROM generations WHERE name = ?1)
"#;

impl CacheStorage for SqliteStorage {
  fn open_generation(&self, generation: &str) -> Result<()> {
    let conn = self.lock()?;

    conn
      .execute(
        "INSERT OR IGNORE INTO generations (name) VALUES (?)",
        params![generation],
      )
      .map_err(|e| eyre!("Failed to open generation {}: {}", generation, e))?;

    Ok(())
  }

  fn generations(&self) -> Result<Vec<String>> {
    let conn = self.lock()?;

    let mut stmt = conn
      .prepare("SELECT name FROM generations ORDER BY rowid")
      .map_err(|e| eyre!("Failed to prepare query: {}", e))?;

    let names = stmt
      .query_map([], |row| row.get(0))
      .map_err(|e| eyre!("Failed to list generations: {}", e))?
      .collect::<rusqlite::Result<Vec<String>>>()
      .map_err(|e| eyre!("Failed to read generation: {}", e))?;

    Ok(names)
  }

  fn delete_generation(&self, generation: &str) -> Result<bool> {
    let mut conn = self.lock()?;
    let tx = conn
      .transaction()
      .map_err(|e| eyre!("Failed to begin transaction: {}", e))?;

    tx.execute(
      "DELETE FROM cache_entries WHERE generation = ?",
      params![generation],
    )
    .map_err(|e| eyre!("Failed to delete entries of {}: {}", generation, e))?;

    let removed = tx
      .execute("DELETE FROM generations WHERE name = ?", params![generation])
      .map_err(|e| eyre!("Failed to delete generation {}: {}", generation, e))?;

    tx.commit()
      .map_err(|e| eyre!("Failed to commit transaction: {}", e))?;

    Ok(removed > 0)
  }

  fn put(&self, generation: &str, key: &RequestKey, snapshot: &Snapshot) -> Result<()> {
    let conn = self.lock()?;
    insert_entry(&conn, generation, key, snapshot)
  }

  fn put_all(&self, generation: &str, entries: &[(RequestKey, Snapshot)]) -> Result<()> {
    let mut conn = self.lock()?;
    let tx = conn
      .transaction()
      .map_err(|e| eyre!("Failed to begin transaction: {}", e))?;

    for (key, snapshot) in entries {
      insert_entry(&tx, generation, key, snapshot)?;
    }

    tx.commit()
      .map_err(|e| eyre!("Failed to commit transaction: {}", e))?;

    Ok(())
  }

  fn lookup(&self, generation: &str, key: &RequestKey) -> Result<Option<CachedSnapshot>> {
    let conn = self.lock()?;

    let mut stmt = conn
      .prepare(
        "SELECT status, headers, body, cached_at FROM cache_entries
         WHERE generation = ? AND key_hash = ?",
      )
      .map_err(|e| eyre!("Failed to prepare query: {}", e))?;

    let row: Option<(i64, String, Vec<u8>, String)> = stmt
      .query_row(params![generation, key.cache_hash()], |row| {
        Ok((row.get(0)?, row.get(1)?, row.get(2)?, row.get(3)?))
      })
      .optional()
      .map_err(|e| eyre!("Failed to read entry for {}: {}", key, e))?;

    let Some((status, headers, body, cached_at)) = row else {
      return Ok(None);
    };

    let status = u16::try_from(status)
      .ok()
      .filter(|s| (100..=599).contains(s))
      .ok_or_else(|| eyre!("Invalid status {} stored for {}", status, key))?;
    let headers: Vec<(String, String)> = serde_json::from_str(&headers)
      .map_err(|e| eyre!("Failed to deserialize headers for {}: {}", key, e))?;
    let cached_at = parse_datetime(&cached_at)?;

    Ok(Some(CachedSnapshot {
      snapshot: Snapshot {
        status,
        headers,
        body,
      },
      cached_at,
    }))
  }

  fn keys(&self, generation: &str) -> Result<Vec<RequestKey>> {
    let conn = self.lock()?;

    let mut stmt = conn
      .prepare("SELECT method, url FROM cache_entries WHERE generation = ? ORDER BY url, method")
      .map_err(|e| eyre!("Failed to prepare query: {}", e))?;

    let keys = stmt
      .query_map(params![generation], |row| {
        Ok(RequestKey::from_parts(row.get(0)?, row.get(1)?))
      })
      .map_err(|e| eyre!("Failed to list keys: {}", e))?
      .collect::<rusqlite::Result<Vec<_>>>()
      .map_err(|e| eyre!("Failed to read key: {}", e))?;

    Ok(keys)
  }
}

fn insert_entry(
  conn: &Connection,
  generation: &str,
  key: &RequestKey,
  snapshot: &Snapshot,
) -> Result<()> {
  let headers = serde_json::to_string(&snapshot.headers)
    .map_err(|e| eyre!("Failed to serialize headers: {}", e))?;

  conn
    .execute(
      INSERT_ENTRY,
      params![
        generation,
        key.cache_hash(),
        key.method(),
        key.url(),
        snapshot.status,
        headers,
        snapshot.body,
      ],
    )
    .map_err(|e| eyre!("Failed to store entry for {}: {}", key, e))?;

  Ok(())
}

/// Parse a datetime string from SQLite format.
fn parse_datetime(s: &str) -> Result<DateTime<Utc>> {
  // SQLite stores as "YYYY-MM-DD HH:MM:SS"
  chrono::NaiveDateTime::parse_from_str(s, "%Y-%m-%d %H:%M:%S")
    .map(|dt| dt.and_utc())
    .map_err(|e| eyre!("Failed to parse datetime '{}': {}", s, e))
}

#[cfg(test)]
mod tests {
  use super::*;
  use reqwest::Method;
  use url::Url;

  fn key(path: &str) -> RequestKey {
    let url = Url::parse("http://localhost").unwrap().join(path).unwrap();
    RequestKey::new(&Method::GET, &url)
  }

  fn snapshot(body: &str) -> Snapshot {
    Snapshot {
      status: 200,
      headers: vec![("content-type".to_string(), "text/css".to_string())],
      body: body.as_bytes().to_vec(),
    }
  }

  #[test]
  fn test_put_then_lookup_returns_same_snapshot() {
    let storage = SqliteStorage::open_in_memory().unwrap();
    storage.open_generation("v1").unwrap();
    storage.put("v1", &key("/style.css"), &snapshot("body{}")).unwrap();

    let cached = storage.lookup("v1", &key("/style.css")).unwrap().unwrap();
    assert_eq!(cached.snapshot, snapshot("body{}"));
  }

  #[test]
  fn test_put_overwrites_same_key() {
    let storage = SqliteStorage::open_in_memory().unwrap();
    storage.open_generation("v1").unwrap();
    storage.put("v1", &key("/app.js"), &snapshot("one")).unwrap();
    storage.put("v1", &key("/app.js"), &snapshot("two")).unwrap();

    let cached = storage.lookup("v1", &key("/app.js")).unwrap().unwrap();
    assert_eq!(cached.snapshot.body, b"two");
    assert_eq!(storage.keys("v1").unwrap().len(), 1);
  }

  #[test]
  fn test_lookup_does_not_cross_generations() {
    let storage = SqliteStorage::open_in_memory().unwrap();
    storage.open_generation("v1").unwrap();
    storage.open_generation("v2").unwrap();
    storage.put("v1", &key("/style.css"), &snapshot("old")).unwrap();

    assert!(storage.lookup("v2", &key("/style.css")).unwrap().is_none());
  }

  #[test]
  fn test_put_into_missing_generation_is_dropped() {
    let storage = SqliteStorage::open_in_memory().unwrap();
    storage.put("gone", &key("/style.css"), &snapshot("x")).unwrap();

    assert!(storage.lookup("gone", &key("/style.css")).unwrap().is_none());
    assert!(storage.generations().unwrap().is_empty());
  }

  #[test]
  fn test_delete_generation_removes_entries() {
    let storage = SqliteStorage::open_in_memory().unwrap();
    storage.open_generation("v1").unwrap();
    storage.put("v1", &key("/index.html"), &snapshot("<html>")).unwrap();

    assert!(storage.delete_generation("v1").unwrap());
    assert!(!storage.delete_generation("v1").unwrap());
    assert!(storage.keys("v1").unwrap().is_empty());
    assert!(storage.generations().unwrap().is_empty());
  }

  #[test]
  fn test_generations_in_creation_order() {
    let storage = SqliteStorage::open_in_memory().unwrap();
    storage.open_generation("v2").unwrap();
    storage.open_generation("v1").unwrap();
    storage.open_generation("v2").unwrap();

    assert_eq!(storage.generations().unwrap(), vec!["v2", "v1"]);
  }

  #[test]
  fn test_put_all_stores_every_entry() {
    let storage = SqliteStorage::open_in_memory().unwrap();
    storage.open_generation("v1").unwrap();
    storage
      .put_all(
        "v1",
        &[
          (key("/index.html"), snapshot("<html>")),
          (key("/style.css"), snapshot("body{}")),
        ],
      )
      .unwrap();

    let keys: Vec<String> = storage
      .keys("v1")
      .unwrap()
      .iter()
      .map(|k| k.url().to_string())
      .collect();
    assert_eq!(
      keys,
      vec!["http://localhost/index.html", "http://localhost/style.css"]
    );
  }

  #[test]
  fn test_corrupt_headers_are_an_error() {
    let storage = SqliteStorage::open_in_memory().unwrap();
    storage.open_generation("v1").unwrap();
    storage.put("v1", &key("/app.js"), &snapshot("x")).unwrap();

    storage
      .lock()
      .unwrap()
      .execute("UPDATE cache_entries SET headers = 'not json'", [])
      .unwrap();

    assert!(storage.lookup("v1", &key("/app.js")).is_err());
  }
}
