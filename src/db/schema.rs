/// Schema for persisted settings and worker cache buckets.
pub const SCHEMA: &str = r#"
-- Small key/value store for settings and notification history (JSON values)
CREATE TABLE IF NOT EXISTS kv (
    key TEXT PRIMARY KEY,
    value TEXT NOT NULL,
    updated_at TEXT NOT NULL DEFAULT (datetime('now'))
);

-- Worker response cache, one row per (bucket, url)
CREATE TABLE IF NOT EXISTS worker_cache (
    bucket TEXT NOT NULL,
    url_hash TEXT NOT NULL,
    url TEXT NOT NULL,
    status INTEGER NOT NULL,
    headers TEXT NOT NULL,
    body BLOB NOT NULL,
    stored_at TEXT NOT NULL DEFAULT (datetime('now')),
    PRIMARY KEY (bucket, url_hash)
);

CREATE INDEX IF NOT EXISTS idx_worker_cache_bucket ON worker_cache(bucket);
"#;
