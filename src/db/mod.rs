pub mod schema;

use color_eyre::{eyre::eyre, Result};
use rusqlite::{params, Connection, OptionalExtension};
use serde::{de::DeserializeOwned, Serialize};
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, MutexGuard};

/// Shared SQLite connection for everything sigwatch persists
#[derive(Clone)]
pub struct Database {
  conn: Arc<Mutex<Connection>>,
}

impl Database {
  /// Open or create the database at the default location
  pub fn open() -> Result<Self> {
    Self::open_at(&Self::default_path()?)
  }

  /// Open or create the database at `path`
  pub fn open_at(path: &Path) -> Result<Self> {
    // Ensure parent directory exists
    if let Some(parent) = path.parent() {
      std::fs::create_dir_all(parent)
        .map_err(|e| eyre!("Failed to create database directory: {}", e))?;
    }

    let conn = Connection::open(path)
      .map_err(|e| eyre!("Failed to open database at {}: {}", path.display(), e))?;

    Self::from_connection(conn)
  }

  /// Private in-memory database, mostly for tests
  pub fn open_in_memory() -> Result<Self> {
    let conn =
      Connection::open_in_memory().map_err(|e| eyre!("Failed to open in-memory database: {}", e))?;
    Self::from_connection(conn)
  }

  fn from_connection(conn: Connection) -> Result<Self> {
    let db = Self {
      conn: Arc::new(Mutex::new(conn)),
    };
    db.run_migrations()?;
    Ok(db)
  }

  /// Get the default database path
  pub fn default_path() -> Result<PathBuf> {
    Ok(data_dir()?.join("sigwatch.db"))
  }

  /// Run database migrations
  fn run_migrations(&self) -> Result<()> {
    self
      .conn()?
      .execute_batch(schema::SCHEMA)
      .map_err(|e| eyre!("Failed to run migrations: {}", e))?;
    Ok(())
  }

  /// Lock the connection
  pub fn conn(&self) -> Result<MutexGuard<'_, Connection>> {
    self.conn.lock().map_err(|e| eyre!("Lock poisoned: {}", e))
  }

  pub fn kv(&self) -> KvStore {
    KvStore { db: self.clone() }
  }
}

/// Directory for the database and log files
pub fn data_dir() -> Result<PathBuf> {
  let data_dir = dirs::data_dir()
    .or_else(|| dirs::home_dir().map(|p| p.join(".local/share")))
    .ok_or_else(|| eyre!("Could not determine data directory"))?;

  Ok(data_dir.join("sigwatch"))
}

/// JSON values under fixed string keys
#[derive(Clone)]
pub struct KvStore {
  db: Database,
}

impl KvStore {
  pub fn get_raw(&self, key: &str) -> Result<Option<String>> {
    let conn = self.db.conn()?;
    conn
      .query_row("SELECT value FROM kv WHERE key = ?", params![key], |row| {
        row.get(0)
      })
      .optional()
      .map_err(|e| eyre!("Failed to read {}: {}", key, e))
  }

  pub fn put_raw(&self, key: &str, value: &str) -> Result<()> {
    let conn = self.db.conn()?;
    conn
      .execute(
        "INSERT OR REPLACE INTO kv (key, value, updated_at) VALUES (?, ?, datetime('now'))",
        params![key, value],
      )
      .map_err(|e| eyre!("Failed to write {}: {}", key, e))?;
    Ok(())
  }

  pub fn delete(&self, key: &str) -> Result<()> {
    let conn = self.db.conn()?;
    conn
      .execute("DELETE FROM kv WHERE key = ?", params![key])
      .map_err(|e| eyre!("Failed to delete {}: {}", key, e))?;
    Ok(())
  }

  /// Read and decode a value. A value that fails to parse is an error.
  pub fn get_json<T: DeserializeOwned>(&self, key: &str) -> Result<Option<T>> {
    match self.get_raw(key)? {
      Some(raw) => serde_json::from_str(&raw)
        .map(Some)
        .map_err(|e| eyre!("Failed to parse stored {}: {}", key, e)),
      None => Ok(None),
    }
  }

  pub fn put_json<T: Serialize>(&self, key: &str, value: &T) -> Result<()> {
    let raw =
      serde_json::to_string(value).map_err(|e| eyre!("Failed to serialize {}: {}", key, e))?;
    self.put_raw(key, &raw)
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn test_kv_roundtrip_and_delete() {
    let db = Database::open_in_memory().unwrap();
    let kv = db.kv();
    assert_eq!(kv.get_json::<Vec<u32>>("k").unwrap(), None);

    kv.put_json("k", &vec![1u32, 2]).unwrap();
    assert_eq!(kv.get_json::<Vec<u32>>("k").unwrap(), Some(vec![1, 2]));

    kv.put_json("k", &vec![3u32]).unwrap();
    assert_eq!(kv.get_json::<Vec<u32>>("k").unwrap(), Some(vec![3]));

    kv.delete("k").unwrap();
    assert_eq!(kv.get_raw("k").unwrap(), None);
  }

  #[test]
  fn test_corrupt_value_is_error() {
    let db = Database::open_in_memory().unwrap();
    db.kv().put_raw("k", "{{{").unwrap();
    assert!(db.kv().get_json::<Vec<u32>>("k").is_err());
  }
}
