//! The response cache (spec §4.8): content-hash keyed, bounded by size and
//! TTL, evicted by LRU + expiry, persisted opportunistically to survive a
//! restart. The persisted copy is advisory — losing it is never a
//! correctness issue, only a warm-up cost.

use crate::connector::LlmParameters;
use chrono::{DateTime, Utc};
use dashmap::DashMap;
use rusqlite::Connection;
use sha2::{Digest, Sha256};
use std::path::Path;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tracing::{debug, warn};

/// Derive the cache key for a `(prompt, modelId, parameter-subset)` triple.
/// `parameters` is a `BTreeMap`, so iteration order — and therefore the
/// hash — is stable regardless of call-site insertion order.
pub fn content_hash(prompt: &str, model_id: &str, parameters: &LlmParameters) -> String {
    let mut hasher = Sha256::new();
    hasher.update(prompt.as_bytes());
    hasher.update([0u8]);
    hasher.update(model_id.as_bytes());
    for (key, value) in parameters {
        hasher.update([0u8]);
        hasher.update(key.as_bytes());
        hasher.update([b'=']);
        hasher.update(value.to_string().as_bytes());
    }
    hex::encode(hasher.finalize())
}

#[derive(Debug, Clone)]
struct CacheEntry {
    value: String,
    expires_at: DateTime<Utc>,
    last_access: DateTime<Utc>,
}

/// Thread-safe response cache.
pub struct ResponseCache {
    entries: DashMap<String, CacheEntry>,
    max_size: usize,
    ttl: Duration,
    conn: Option<Arc<Mutex<Connection>>>,
}

impl ResponseCache {
    /// Build an in-memory-only cache (no persistence).
    pub fn in_memory(max_size: usize, ttl: Duration) -> Self {
        Self { entries: DashMap::new(), max_size, ttl, conn: None }
    }

    /// Build a cache backed by an opportunistic on-disk snapshot at
    /// `db_path`. Failure to open the database falls back to in-memory
    /// operation with a warning rather than failing construction — the
    /// cache is advisory per spec.
    pub fn with_persistence(max_size: usize, ttl: Duration, db_path: &Path) -> Self {
        match Self::open_connection(db_path) {
            Ok(conn) => {
                let cache = Self { entries: DashMap::new(), max_size, ttl, conn: Some(Arc::new(Mutex::new(conn))) };
                cache.load_from_disk();
                cache
            }
            Err(e) => {
                warn!(error = %e, path = %db_path.display(), "response cache persistence unavailable, running in-memory only");
                Self::in_memory(max_size, ttl)
            }
        }
    }

    fn open_connection(db_path: &Path) -> rusqlite::Result<Connection> {
        if let Some(parent) = db_path.parent() {
            let _ = std::fs::create_dir_all(parent);
        }
        let conn = Connection::open(db_path)?;
        conn.execute(
            "CREATE TABLE IF NOT EXISTS response_cache (
                key TEXT PRIMARY KEY,
                value TEXT NOT NULL,
                expires_at TEXT NOT NULL,
                last_access TEXT NOT NULL
            )",
            [],
        )?;
        Ok(conn)
    }

    fn load_from_disk(&self) {
        let Some(conn) = &self.conn else { return };
        let Ok(conn) = conn.lock() else { return };
        let now = Utc::now();
        let mut stmt = match conn.prepare("SELECT key, value, expires_at, last_access FROM response_cache") {
            Ok(stmt) => stmt,
            Err(_) => return,
        };
        let rows = stmt.query_map([], |row| {
            let key: String = row.get(0)?;
            let value: String = row.get(1)?;
            let expires_at: String = row.get(2)?;
            let last_access: String = row.get(3)?;
            Ok((key, value, expires_at, last_access))
        });
        let Ok(rows) = rows else { return };
        let mut restored = 0usize;
        for row in rows.flatten() {
            let (key, value, expires_at, last_access) = row;
            let (Ok(expires_at), Ok(last_access)) = (
                DateTime::parse_from_rfc3339(&expires_at),
                DateTime::parse_from_rfc3339(&last_access),
            ) else {
                continue;
            };
            let expires_at = expires_at.with_timezone(&Utc);
            if expires_at <= now {
                continue;
            }
            self.entries.insert(
                key,
                CacheEntry { value, expires_at, last_access: last_access.with_timezone(&Utc) },
            );
            restored += 1;
        }
        debug!(restored, "response cache restored from disk");
    }

    fn persist(&self, key: &str, entry: &CacheEntry) {
        let Some(conn) = &self.conn else { return };
        let Ok(conn) = conn.lock() else { return };
        let _ = conn.execute(
            "INSERT INTO response_cache (key, value, expires_at, last_access) VALUES (?1, ?2, ?3, ?4)
             ON CONFLICT(key) DO UPDATE SET value = ?2, expires_at = ?3, last_access = ?4",
            rusqlite::params![key, entry.value, entry.expires_at.to_rfc3339(), entry.last_access.to_rfc3339()],
        );
    }

    fn forget(&self, key: &str) {
        if let Some(conn) = &self.conn {
            if let Ok(conn) = conn.lock() {
                let _ = conn.execute("DELETE FROM response_cache WHERE key = ?1", rusqlite::params![key]);
            }
        }
    }

    /// Look up `key`, returning `None` on a miss or an expired entry
    /// (which is evicted as a side effect).
    pub fn get(&self, key: &str) -> Option<String> {
        let expired = {
            let mut entry = self.entries.get_mut(key)?;
            if entry.expires_at <= Utc::now() {
                true
            } else {
                entry.last_access = Utc::now();
                false
            }
        };
        if expired {
            self.entries.remove(key);
            self.forget(key);
            return None;
        }
        let entry = self.entries.get(key)?;
        self.persist(key, &entry);
        Some(entry.value.clone())
    }

    /// Insert or refresh `key`, evicting the least-recently-used entry if
    /// this insertion would exceed `max_size`.
    pub fn put(&self, key: String, value: String) {
        let now = Utc::now();
        let entry = CacheEntry {
            value,
            expires_at: now + chrono::Duration::from_std(self.ttl).unwrap_or(chrono::Duration::zero()),
            last_access: now,
        };
        self.persist(&key, &entry);
        self.entries.insert(key, entry);
        self.evict_if_over_capacity();
    }

    fn evict_if_over_capacity(&self) {
        while self.entries.len() > self.max_size {
            let oldest = self
                .entries
                .iter()
                .min_by_key(|entry| entry.value().last_access)
                .map(|entry| entry.key().clone());
            match oldest {
                Some(key) => {
                    self.entries.remove(&key);
                    self.forget(&key);
                }
                None => break,
            }
        }
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn content_hash_is_order_independent_over_parameters() {
        let mut p1 = LlmParameters::new();
        p1.insert("temperature".to_string(), serde_json::json!(0.7));
        p1.insert("max_tokens".to_string(), serde_json::json!(256));
        let mut p2 = LlmParameters::new();
        p2.insert("max_tokens".to_string(), serde_json::json!(256));
        p2.insert("temperature".to_string(), serde_json::json!(0.7));
        assert_eq!(content_hash("hi", "gpt", &p1), content_hash("hi", "gpt", &p2));
    }

    #[test]
    fn different_prompts_hash_differently() {
        let params = LlmParameters::new();
        assert_ne!(content_hash("a", "gpt", &params), content_hash("b", "gpt", &params));
    }

    #[test]
    fn put_then_get_round_trips() {
        let cache = ResponseCache::in_memory(10, Duration::from_secs(60));
        cache.put("k1".to_string(), "hello".to_string());
        assert_eq!(cache.get("k1"), Some("hello".to_string()));
    }

    #[test]
    fn expired_entry_is_a_miss() {
        let cache = ResponseCache::in_memory(10, Duration::from_millis(1));
        cache.put("k1".to_string(), "hello".to_string());
        std::thread::sleep(Duration::from_millis(20));
        assert_eq!(cache.get("k1"), None);
    }

    #[test]
    fn over_capacity_evicts_least_recently_used() {
        let cache = ResponseCache::in_memory(2, Duration::from_secs(60));
        cache.put("a".to_string(), "1".to_string());
        cache.put("b".to_string(), "2".to_string());
        // touch "a" so it is more recently used than "b"
        assert_eq!(cache.get("a"), Some("1".to_string()));
        cache.put("c".to_string(), "3".to_string());
        assert_eq!(cache.len(), 2);
        assert_eq!(cache.get("b"), None);
        assert_eq!(cache.get("a"), Some("1".to_string()));
    }

    #[test]
    fn persists_and_reloads_across_instances() {
        let dir = tempfile::tempdir().unwrap();
        let db_path = dir.path().join("cache.sqlite3");
        {
            let cache = ResponseCache::with_persistence(10, Duration::from_secs(3600), &db_path);
            cache.put("k1".to_string(), "persisted".to_string());
        }
        let reloaded = ResponseCache::with_persistence(10, Duration::from_secs(3600), &db_path);
        assert_eq!(reloaded.get("k1"), Some("persisted".to_string()));
    }
}
