//! Named response caches and the SQLite store behind them.

use chrono::{DateTime, Utc};
use color_eyre::{eyre::eyre, Result};
use rusqlite::{params, Connection, OptionalExtension};
use sha2::{Digest, Sha256};
use std::path::{Path, PathBuf};
use std::sync::Mutex;

use super::types::{Request, Response, ResponseKind};

/// A response found in one of the named caches.
#[derive(Debug, Clone)]
pub struct CachedResponse {
  pub cache_name: String,
  pub response: Response,
  pub cached_at: DateTime<Utc>,
}

/// Listing row for `qrscan cache list`.
#[derive(Debug, Clone)]
pub struct CachedEntryInfo {
  pub method: String,
  pub url: String,
  pub status: u16,
  pub size: usize,
  pub cached_at: DateTime<Utc>,
}

/// Storage for named caches of request/response pairs.
///
/// Only GET requests are ever matched or stored. Implementations must be safe
/// to call from concurrent fetch handlers.
pub trait CacheStore: Send + Sync {
  /// Create the named cache if it does not exist yet.
  fn open(&self, cache: &str) -> Result<()>;

  fn has(&self, cache: &str) -> Result<bool>;

  /// Cache names in creation order.
  fn keys(&self) -> Result<Vec<String>>;

  /// Delete a cache and everything in it. Returns whether it existed.
  fn delete(&self, cache: &str) -> Result<bool>;

  /// Store `response` under `request`, creating the cache when needed.
  fn put(&self, cache: &str, request: &Request, response: &Response) -> Result<()>;

  fn match_in(&self, cache: &str, request: &Request) -> Result<Option<CachedResponse>>;

  fn entries(&self, cache: &str) -> Result<Vec<CachedEntryInfo>>;

  /// Look the request up in every cache, oldest cache first.
  fn match_any(&self, request: &Request) -> Result<Option<CachedResponse>> {
    for cache in self.keys()? {
      if let Some(hit) = self.match_in(&cache, request)? {
        return Ok(Some(hit));
      }
    }
    Ok(None)
  }
}

/// Stable, fixed-length key for a request.
pub fn request_key(request: &Request) -> String {
  let mut hasher = Sha256::new();
  hasher.update(request.method.to_ascii_uppercase().as_bytes());
  hasher.update(b" ");
  hasher.update(request.url.as_str().as_bytes());
  hex::encode(hasher.finalize())
}

/// SQLite-based cache store.
pub struct SqliteCacheStore {
  conn: Mutex<Connection>,
}

impl SqliteCacheStore {
  /// Open the store at `path`, or at the default location when `None`.
  pub fn open_at(path: Option<&Path>) -> Result<Self> {
    let path = match path {
      Some(p) => p.to_path_buf(),
      None => Self::default_path()?,
    };

    if let Some(parent) = path.parent() {
      std::fs::create_dir_all(parent)
        .map_err(|e| eyre!("Failed to create cache directory: {}", e))?;
    }

    let conn = Connection::open(&path)
      .map_err(|e| eyre!("Failed to open cache database at {}: {}", path.display(), e))?;
    Self::with_connection(conn)
  }

  pub fn in_memory() -> Result<Self> {
    let conn =
      Connection::open_in_memory().map_err(|e| eyre!("Failed to open in-memory cache: {}", e))?;
    Self::with_connection(conn)
  }

  fn with_connection(conn: Connection) -> Result<Self> {
    conn
      .execute_batch(CACHE_SCHEMA)
      .map_err(|e| eyre!("Failed to run cache migrations: {}", e))?;
    Ok(Self {
      conn: Mutex::new(conn),
    })
  }

  pub fn default_path() -> Result<PathBuf> {
    let data_dir = dirs::data_dir()
      .or_else(|| dirs::home_dir().map(|p| p.join(".local/share")))
      .ok_or_else(|| eyre!("Could not determine data directory"))?;

    Ok(data_dir.join("qrscan").join("offline.db"))
  }

  fn lock(&self) -> Result<std::sync::MutexGuard<'_, Connection>> {
    self.conn.lock().map_err(|e| eyre!("Lock poisoned: {}", e))
  }
}

const CACHE_SCHEMA: &str = r#"
-- Cache names; rowid gives creation order
CREATE TABLE IF NOT EXISTS cache_names (
    name TEXT PRIMARY KEY,
    created_at TEXT NOT NULL DEFAULT (datetime('now'))
);

CREATE TABLE IF NOT EXISTS cache_entries (
    cache_name TEXT NOT NULL,
    request_hash TEXT NOT NULL,
    method TEXT NOT NULL,
    url TEXT NOT NULL,
    status INTEGER NOT NULL,
    status_text TEXT NOT NULL,
    kind TEXT NOT NULL,
    headers TEXT NOT NULL,
    body BLOB NOT NULL,
    cached_at TEXT NOT NULL DEFAULT (datetime('now')),
    PRIMARY KEY (cache_name, request_hash)
);
"#;

impl CacheStore for SqliteCacheStore {
  fn open(&self, cache: &str) -> Result<()> {
    let conn = self.lock()?;
    conn
      .execute(
        "INSERT OR IGNORE INTO cache_names (name) VALUES (?)",
        params![cache],
      )
      .map_err(|e| eyre!("Failed to open cache {}: {}", cache, e))?;
    Ok(())
  }

  fn has(&self, cache: &str) -> Result<bool> {
    let conn = self.lock()?;
    let found: Option<i64> = conn
      .query_row(
        "SELECT 1 FROM cache_names WHERE name = ?",
        params![cache],
        |row| row.get(0),
      )
      .optional()
      .map_err(|e| eyre!("Failed to look up cache {}: {}", cache, e))?;
    Ok(found.is_some())
  }

  fn keys(&self) -> Result<Vec<String>> {
    let conn = self.lock()?;
    let mut stmt = conn
      .prepare("SELECT name FROM cache_names ORDER BY rowid")
      .map_err(|e| eyre!("Failed to prepare query: {}", e))?;

    let names = stmt
      .query_map([], |row| row.get::<_, String>(0))
      .map_err(|e| eyre!("Failed to list caches: {}", e))?
      .filter_map(|r| r.ok())
      .collect();
    Ok(names)
  }

  fn delete(&self, cache: &str) -> Result<bool> {
    let conn = self.lock()?;

    conn
      .execute("BEGIN TRANSACTION", [])
      .map_err(|e| eyre!("Failed to begin transaction: {}", e))?;
    conn
      .execute(
        "DELETE FROM cache_entries WHERE cache_name = ?",
        params![cache],
      )
      .map_err(|e| eyre!("Failed to delete entries of {}: {}", cache, e))?;
    let removed = conn
      .execute("DELETE FROM cache_names WHERE name = ?", params![cache])
      .map_err(|e| eyre!("Failed to delete cache {}: {}", cache, e))?;
    conn
      .execute("COMMIT", [])
      .map_err(|e| eyre!("Failed to commit transaction: {}", e))?;

    Ok(removed > 0)
  }

  fn put(&self, cache: &str, request: &Request, response: &Response) -> Result<()> {
    if !request.is_get() {
      return Err(eyre!(
        "Only GET requests can be cached (got {})",
        request.method
      ));
    }

    let headers = serde_json::to_string(&response.headers)
      .map_err(|e| eyre!("Failed to serialize headers: {}", e))?;
    let kind =
      serde_json::to_string(&response.kind).map_err(|e| eyre!("Failed to serialize kind: {}", e))?;

    let conn = self.lock()?;
    conn
      .execute(
        "INSERT OR IGNORE INTO cache_names (name) VALUES (?)",
        params![cache],
      )
      .map_err(|e| eyre!("Failed to open cache {}: {}", cache, e))?;
    conn
      .execute(
        "INSERT OR REPLACE INTO cache_entries
           (cache_name, request_hash, method, url, status, status_text, kind, headers, body, cached_at)
         VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, datetime('now'))",
        params![
          cache,
          request_key(request),
          request.method,
          request.url.as_str(),
          response.status,
          response.status_text,
          kind,
          headers,
          response.body,
        ],
      )
      .map_err(|e| eyre!("Failed to store {}: {}", request.url, e))?;

    Ok(())
  }

  fn match_in(&self, cache: &str, request: &Request) -> Result<Option<CachedResponse>> {
    if !request.is_get() {
      return Ok(None);
    }

    let conn = self.lock()?;
    let row: Option<(u16, String, String, String, Vec<u8>, String)> = conn
      .query_row(
        "SELECT status, status_text, kind, headers, body, cached_at FROM cache_entries
         WHERE cache_name = ? AND request_hash = ?",
        params![cache, request_key(request)],
        |row| {
          Ok((
            row.get(0)?,
            row.get(1)?,
            row.get(2)?,
            row.get(3)?,
            row.get(4)?,
            row.get(5)?,
          ))
        },
      )
      .optional()
      .map_err(|e| eyre!("Failed to query cache {}: {}", cache, e))?;

    let Some((status, status_text, kind, headers, body, cached_at)) = row else {
      return Ok(None);
    };

    let kind: ResponseKind =
      serde_json::from_str(&kind).map_err(|e| eyre!("Corrupt cached response kind: {}", e))?;
    let headers: Vec<(String, String)> =
      serde_json::from_str(&headers).map_err(|e| eyre!("Corrupt cached headers: {}", e))?;

    Ok(Some(CachedResponse {
      cache_name: cache.to_string(),
      response: Response {
        status,
        status_text,
        kind,
        headers,
        body,
      },
      cached_at: parse_datetime(&cached_at)?,
    }))
  }

  fn entries(&self, cache: &str) -> Result<Vec<CachedEntryInfo>> {
    let conn = self.lock()?;
    let mut stmt = conn
      .prepare(
        "SELECT method, url, status, length(body), cached_at FROM cache_entries
         WHERE cache_name = ?
         ORDER BY url",
      )
      .map_err(|e| eyre!("Failed to prepare query: {}", e))?;

    let rows: Vec<(String, String, u16, i64, String)> = stmt
      .query_map(params![cache], |row| {
        Ok((
          row.get(0)?,
          row.get(1)?,
          row.get(2)?,
          row.get(3)?,
          row.get(4)?,
        ))
      })
      .map_err(|e| eyre!("Failed to list entries of {}: {}", cache, e))?
      .filter_map(|r| r.ok())
      .collect();

    rows
      .into_iter()
      .map(|(method, url, status, size, cached_at)| {
        Ok(CachedEntryInfo {
          method,
          url,
          status,
          size: size.max(0) as usize,
          cached_at: parse_datetime(&cached_at)?,
        })
      })
      .collect()
  }
}

/// Parse a datetime string from SQLite format.
fn parse_datetime(s: &str) -> Result<DateTime<Utc>> {
  // SQLite stores as "YYYY-MM-DD HH:MM:SS"
  chrono::NaiveDateTime::parse_from_str(s, "%Y-%m-%d %H:%M:%S")
    .map(|dt| dt.and_utc())
    .map_err(|e| eyre!("Failed to parse datetime '{}': {}", s, e))
}
