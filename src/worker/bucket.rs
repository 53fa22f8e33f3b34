//! Named response buckets stored in SQLite.
//!
//! Entries never expire on their own. They are replaced by the next
//! successful fetch of the same URL or dropped with their whole bucket.

use color_eyre::{eyre::eyre, Result};
use rusqlite::{params, OptionalExtension};
use sha2::{Digest, Sha256};
use url::Url;

use super::http::Response;
use crate::db::Database;

/// Handle to every bucket in the database.
#[derive(Clone)]
pub struct BucketStorage {
  db: Database,
}

impl BucketStorage {
  pub fn new(db: Database) -> Self {
    Self { db }
  }

  pub fn put(&self, bucket: &str, url: &Url, response: &Response) -> Result<()> {
    let headers = serde_json::to_string(&response.headers)
      .map_err(|e| eyre!("Failed to serialize headers: {}", e))?;
    let conn = self.db.conn()?;
    conn
      .execute(
        "INSERT OR REPLACE INTO worker_cache (bucket, url_hash, url, status, headers, body, stored_at)
         VALUES (?, ?, ?, ?, ?, ?, datetime('now'))",
        params![
          bucket,
          url_hash(url),
          url.as_str(),
          response.status,
          headers,
          response.body
        ],
      )
      .map_err(|e| eyre!("Failed to store {} in {}: {}", url, bucket, e))?;
    Ok(())
  }

  pub fn get(&self, bucket: &str, url: &Url) -> Result<Option<Response>> {
    let conn = self.db.conn()?;
    let row: Option<(u16, String, Vec<u8>)> = conn
      .query_row(
        "SELECT status, headers, body FROM worker_cache WHERE bucket = ? AND url_hash = ?",
        params![bucket, url_hash(url)],
        |row| Ok((row.get(0)?, row.get(1)?, row.get(2)?)),
      )
      .optional()
      .map_err(|e| eyre!("Failed to read {} from {}: {}", url, bucket, e))?;

    row.map(decode).transpose()
  }

  /// Look `url` up in every bucket, first match by bucket name.
  pub fn match_any(&self, url: &Url) -> Result<Option<Response>> {
    let conn = self.db.conn()?;
    let row: Option<(u16, String, Vec<u8>)> = conn
      .query_row(
        "SELECT status, headers, body FROM worker_cache WHERE url_hash = ?
         ORDER BY bucket LIMIT 1",
        params![url_hash(url)],
        |row| Ok((row.get(0)?, row.get(1)?, row.get(2)?)),
      )
      .optional()
      .map_err(|e| eyre!("Failed to match {}: {}", url, e))?;

    row.map(decode).transpose()
  }

  pub fn bucket_names(&self) -> Result<Vec<String>> {
    let conn = self.db.conn()?;
    let mut stmt = conn
      .prepare("SELECT DISTINCT bucket FROM worker_cache ORDER BY bucket")
      .map_err(|e| eyre!("Failed to prepare query: {}", e))?;
    let names = stmt
      .query_map([], |row| row.get(0))
      .map_err(|e| eyre!("Failed to list buckets: {}", e))?
      .collect::<rusqlite::Result<Vec<String>>>()
      .map_err(|e| eyre!("Failed to list buckets: {}", e))?;
    Ok(names)
  }

  pub fn delete_bucket(&self, bucket: &str) -> Result<usize> {
    let conn = self.db.conn()?;
    conn
      .execute("DELETE FROM worker_cache WHERE bucket = ?", params![bucket])
      .map_err(|e| eyre!("Failed to delete bucket {}: {}", bucket, e))
  }

  /// Drop every bucket.
  pub fn clear(&self) -> Result<()> {
    let conn = self.db.conn()?;
    conn
      .execute("DELETE FROM worker_cache", [])
      .map_err(|e| eyre!("Failed to clear worker cache: {}", e))?;
    Ok(())
  }

  /// Total stored body bytes across all buckets.
  pub fn size(&self) -> Result<u64> {
    let conn = self.db.conn()?;
    let size: i64 = conn
      .query_row(
        "SELECT COALESCE(SUM(LENGTH(body)), 0) FROM worker_cache",
        [],
        |row| row.get(0),
      )
      .map_err(|e| eyre!("Failed to compute cache size: {}", e))?;
    Ok(size.max(0) as u64)
  }
}

fn decode((status, headers, body): (u16, String, Vec<u8>)) -> Result<Response> {
  let headers =
    serde_json::from_str(&headers).map_err(|e| eyre!("Failed to parse stored headers: {}", e))?;
  Ok(Response {
    status,
    headers,
    body,
  })
}

/// SHA256 of the URL for stable, fixed-length keys
fn url_hash(url: &Url) -> String {
  let mut hasher = Sha256::new();
  hasher.update(url.as_str().as_bytes());
  hex::encode(hasher.finalize())
}

#[cfg(test)]
mod tests {
  use super::*;

  fn storage() -> BucketStorage {
    BucketStorage::new(Database::open_in_memory().unwrap())
  }

  fn url(path: &str) -> Url {
    Url::parse("https://app.example.com").unwrap().join(path).unwrap()
  }

  #[test]
  fn test_put_get_overwrite() {
    let buckets = storage();
    let u = url("/api/signals");
    assert!(buckets.get("dynamic", &u).unwrap().is_none());

    buckets
      .put("dynamic", &u, &Response::new(200, "v1").with_header("etag", "1"))
      .unwrap();
    buckets.put("dynamic", &u, &Response::new(200, "v2")).unwrap();

    let stored = buckets.get("dynamic", &u).unwrap().unwrap();
    assert_eq!(stored.body, b"v2");
    assert!(stored.headers.is_empty());
    assert!(buckets.get("static", &u).unwrap().is_none());
  }

  #[test]
  fn test_match_any_and_size() {
    let buckets = storage();
    buckets.put("static", &url("/"), &Response::new(200, "<html>")).unwrap();
    buckets
      .put("dynamic", &url("/api/coins"), &Response::new(200, "[]"))
      .unwrap();

    assert!(buckets.match_any(&url("/api/coins")).unwrap().is_some());
    assert!(buckets.match_any(&url("/missing")).unwrap().is_none());
    assert_eq!(buckets.size().unwrap(), 8);
    assert_eq!(buckets.bucket_names().unwrap(), vec!["dynamic", "static"]);
  }

  #[test]
  fn test_delete_bucket_and_clear() {
    let buckets = storage();
    buckets.put("old-v0", &url("/"), &Response::new(200, "x")).unwrap();
    buckets.put("static", &url("/"), &Response::new(200, "y")).unwrap();

    assert_eq!(buckets.delete_bucket("old-v0").unwrap(), 1);
    assert_eq!(buckets.bucket_names().unwrap(), vec!["static"]);

    buckets.clear().unwrap();
    assert!(buckets.bucket_names().unwrap().is_empty());
    assert_eq!(buckets.size().unwrap(), 0);
  }
}
