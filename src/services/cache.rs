use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::RwLock;
use chrono::Utc;
use tracing::{debug, warn};

/// Cache configuration; TTL and size are configuration, not invariants
#[derive(Debug, Clone)]
pub struct CacheConfig {
    /// Master switch; a disabled cache misses on every read and drops writes
    pub enabled: bool,
    /// Default time-to-live for entries, in seconds
    pub ttl_seconds: i64,
    /// Byte budget across all live entries
    pub max_size_bytes: u64,
    /// Directory for the persistent backend (None = in-memory only)
    pub directory: Option<PathBuf>,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            ttl_seconds: 24 * 60 * 60,
            max_size_bytes: 100 * 1024 * 1024,
            directory: None,
        }
    }
}

/// One cached blob with TTL and access bookkeeping
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CacheEntry {
    /// Full key (prefix + content hash)
    pub key: String,
    /// Opaque blob (serialized JSON in practice)
    pub value: String,
    /// Unix seconds at creation
    pub created_at: i64,
    /// Unix seconds at last read
    pub last_accessed_at: i64,
    /// Time-to-live in seconds
    pub ttl_seconds: i64,
    /// Number of reads served from this entry
    pub hit_count: u64,
    /// Size of the stored value in bytes
    pub size_bytes: u64,
}

impl CacheEntry {
    fn is_live(&self, now: i64) -> bool {
        self.created_at + self.ttl_seconds >= now
    }
}

/// Aggregate cache statistics
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CacheStats {
    pub entries: usize,
    pub total_bytes: u64,
    pub hits: u64,
    pub misses: u64,
    pub evictions: u64,
}

#[derive(Debug, Default)]
struct CacheInner {
    entries: HashMap<String, CacheEntry>,
    hits: u64,
    misses: u64,
    evictions: u64,
}

impl CacheInner {
    fn total_bytes(&self) -> u64 {
        self.entries.values().map(|e| e.size_bytes).sum()
    }
}

/// Key→blob store with TTL and least-recently-accessed eviction.
///
/// Any I/O failure in the persistent backend is logged and treated as a miss;
/// callers never abort on cache errors.
#[derive(Debug)]
pub struct CacheStore {
    config: CacheConfig,
    inner: RwLock<CacheInner>,
}

impl CacheStore {
    /// Create a store from configuration, loading the persistent index if one
    /// is configured and present
    pub fn new(config: CacheConfig) -> Self {
        let mut inner = CacheInner::default();
        if config.enabled {
            if let Some(dir) = &config.directory {
                match Self::load_index(dir) {
                    Ok(entries) => inner.entries = entries,
                    Err(err) => warn!("cache index unreadable, starting empty: {}", err),
                }
            }
        }
        Self {
            config,
            inner: RwLock::new(inner),
        }
    }

    /// In-memory store with default sizing
    pub fn in_memory() -> Self {
        Self::new(CacheConfig::default())
    }

    /// Deterministic key for a content string: `prefix` + hex sha256
    pub fn content_key(prefix: &str, content: &str) -> String {
        let mut hasher = Sha256::new();
        hasher.update(content.as_bytes());
        format!("{}{:x}", prefix, hasher.finalize())
    }

    /// Read a value. Expired entries are invisible and removed on sight.
    pub fn get(&self, key: &str) -> Option<String> {
        if !self.config.enabled {
            return None;
        }
        let now = Utc::now().timestamp();
        let mut inner = match self.inner.write() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };

        let live = match inner.entries.get(key) {
            Some(entry) => entry.is_live(now),
            None => {
                inner.misses += 1;
                return None;
            }
        };

        if !live {
            inner.entries.remove(key);
            inner.misses += 1;
            return None;
        }

        let entry = inner.entries.get_mut(key).expect("checked above");
        entry.last_accessed_at = now;
        entry.hit_count += 1;
        let value = entry.value.clone();
        inner.hits += 1;
        Some(value)
    }

    /// Store a value under a key with the default TTL, replacing any existing
    /// entry and evicting least-recently-accessed entries to fit the budget
    pub fn put(&self, key: &str, value: String) {
        self.put_with_ttl(key, value, self.config.ttl_seconds);
    }

    /// Store a value with an explicit TTL
    pub fn put_with_ttl(&self, key: &str, value: String, ttl_seconds: i64) {
        if !self.config.enabled {
            return;
        }
        let size_bytes = value.len() as u64;
        if size_bytes > self.config.max_size_bytes {
            debug!("cache value larger than budget, not stored: {}", key);
            return;
        }
        let now = Utc::now().timestamp();
        let entry = CacheEntry {
            key: key.to_string(),
            value,
            created_at: now,
            last_accessed_at: now,
            ttl_seconds,
            hit_count: 0,
            size_bytes,
        };

        let mut inner = match self.inner.write() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        inner.entries.remove(key);

        // Evict least-recently-accessed live entries until the new value fits
        while inner.total_bytes() + size_bytes > self.config.max_size_bytes {
            let oldest = inner
                .entries
                .values()
                .min_by_key(|e| e.last_accessed_at)
                .map(|e| e.key.clone());
            match oldest {
                Some(victim) => {
                    inner.entries.remove(&victim);
                    inner.evictions += 1;
                }
                None => break,
            }
        }

        inner.entries.insert(key.to_string(), entry);
        drop(inner);
        self.persist();
    }

    /// Remove a key
    pub fn invalidate(&self, key: &str) {
        let mut inner = match self.inner.write() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        inner.entries.remove(key);
        drop(inner);
        self.persist();
    }

    /// Drop every expired entry, returning how many were removed
    pub fn cleanup_expired(&self) -> usize {
        let now = Utc::now().timestamp();
        let mut inner = match self.inner.write() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        let before = inner.entries.len();
        inner.entries.retain(|_, entry| entry.is_live(now));
        let removed = before - inner.entries.len();
        drop(inner);
        if removed > 0 {
            self.persist();
        }
        removed
    }

    /// Snapshot of current statistics
    pub fn stats(&self) -> CacheStats {
        let inner = match self.inner.read() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        CacheStats {
            entries: inner.entries.len(),
            total_bytes: inner.total_bytes(),
            hits: inner.hits,
            misses: inner.misses,
            evictions: inner.evictions,
        }
    }

    fn index_path(dir: &PathBuf) -> PathBuf {
        dir.join("cache_index.json")
    }

    fn load_index(dir: &PathBuf) -> Result<HashMap<String, CacheEntry>, String> {
        let path = Self::index_path(dir);
        if !path.exists() {
            return Ok(HashMap::new());
        }
        let content = std::fs::read_to_string(&path).map_err(|e| e.to_string())?;
        serde_json::from_str(&content).map_err(|e| e.to_string())
    }

    /// Write the index to disk atomically (temp file + rename). Errors are
    /// logged and swallowed.
    fn persist(&self) {
        let Some(dir) = &self.config.directory else {
            return;
        };
        let inner = match self.inner.read() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        let serialized = match serde_json::to_string(&inner.entries) {
            Ok(s) => s,
            Err(err) => {
                warn!("cache index serialization failed: {}", err);
                return;
            }
        };
        drop(inner);

        if let Err(err) = std::fs::create_dir_all(dir) {
            warn!("cache directory unavailable: {}", err);
            return;
        }
        let tmp = dir.join("cache_index.json.tmp");
        if let Err(err) = std::fs::write(&tmp, serialized) {
            warn!("cache index write failed: {}", err);
            return;
        }
        if let Err(err) = std::fs::rename(&tmp, Self::index_path(dir)) {
            warn!("cache index rename failed: {}", err);
        }
    }
}
