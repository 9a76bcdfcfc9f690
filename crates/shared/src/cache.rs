use anyhow::{Context, Result};
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::{Duration, SystemTime};

const CACHE_EXTENSION: &str = "cache";

/// Source of "now" for freshness checks
pub trait Clock: Send + Sync {
    fn now(&self) -> SystemTime;
}

#[derive(Debug, Default, Clone, Copy)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> SystemTime {
        SystemTime::now()
    }
}

/// Turns cached values into bytes and back
pub trait Codec: Send + Sync {
    fn encode<T: Serialize>(&self, value: &T) -> Result<Vec<u8>>;
    fn decode<T: DeserializeOwned>(&self, bytes: &[u8]) -> Result<T>;
}

#[derive(Debug, Default, Clone, Copy)]
pub struct JsonCodec;

impl Codec for JsonCodec {
    fn encode<T: Serialize>(&self, value: &T) -> Result<Vec<u8>> {
        serde_json::to_vec(value).context("Failed to encode cache payload")
    }

    fn decode<T: DeserializeOwned>(&self, bytes: &[u8]) -> Result<T> {
        serde_json::from_slice(bytes).context("Failed to decode cache payload")
    }
}

/// File-per-key cache. An entry is fresh while its file's modification time
/// is less than `ttl` in the past.
pub struct CacheStore<C: Codec = JsonCodec> {
    dir: PathBuf,
    ttl: Duration,
    codec: C,
    clock: Arc<dyn Clock>,
}

impl CacheStore<JsonCodec> {
    pub fn new(dir: impl Into<PathBuf>, ttl: Duration) -> Self {
        Self::with_codec(dir, ttl, JsonCodec)
    }
}

impl<C: Codec> CacheStore<C> {
    pub fn with_codec(dir: impl Into<PathBuf>, ttl: Duration, codec: C) -> Self {
        Self {
            dir: dir.into(),
            ttl,
            codec,
            clock: Arc::new(SystemClock),
        }
    }

    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    pub fn ttl(&self) -> Duration {
        self.ttl
    }

    fn entry_path(&self, key: &str) -> PathBuf {
        // Percent-encoding keeps every key a single, distinct file name
        self.dir
            .join(format!("{}.{}", urlencoding::encode(key), CACHE_EXTENSION))
    }

    pub fn is_valid(&self, key: &str) -> bool {
        let modified = match fs::metadata(self.entry_path(key)).and_then(|m| m.modified()) {
            Ok(modified) => modified,
            Err(_) => return false,
        };

        // A timestamp ahead of the clock counts as age zero
        let age = self
            .clock
            .now()
            .duration_since(modified)
            .unwrap_or(Duration::ZERO);

        age < self.ttl
    }

    pub fn get<T: DeserializeOwned>(&self, key: &str) -> Option<T> {
        if !self.is_valid(key) {
            return None;
        }

        let path = self.entry_path(key);
        let bytes = match fs::read(&path) {
            Ok(bytes) => bytes,
            Err(e) => {
                tracing::warn!(key, "failed to read cache entry: {}", e);
                return None;
            }
        };

        match self.codec.decode(&bytes) {
            Ok(value) => Some(value),
            Err(e) => {
                tracing::warn!(key, "discarding unreadable cache entry: {:#}", e);
                None
            }
        }
    }

    pub fn set<T: Serialize>(&self, key: &str, value: &T) -> Result<()> {
        fs::create_dir_all(&self.dir)
            .with_context(|| format!("Failed to create cache directory: {}", self.dir.display()))?;

        let bytes = self.codec.encode(value)?;
        let path = self.entry_path(key);
        let tmp_path = path.with_extension("tmp");

        fs::write(&tmp_path, bytes).context("Failed to write cache entry")?;
        fs::rename(&tmp_path, &path).context("Failed to move cache entry into place")?;

        tracing::debug!(key, "cache entry stored");
        Ok(())
    }

    /// Remove one entry, or every entry when `key` is `None`.
    /// Returns how many files were deleted.
    pub fn clear(&self, key: Option<&str>) -> Result<usize> {
        let removed = match key {
            Some(key) => {
                let path = self.entry_path(key);
                if path.exists() {
                    fs::remove_file(&path).context("Failed to remove cache entry")?;
                    1
                } else {
                    0
                }
            }
            None => {
                if !self.dir.exists() {
                    return Ok(0);
                }

                let mut removed = 0;
                for entry in fs::read_dir(&self.dir).context("Failed to read cache directory")? {
                    let path = entry?.path();
                    if path.extension().and_then(|s| s.to_str()) == Some(CACHE_EXTENSION) {
                        fs::remove_file(&path).with_context(|| {
                            format!("Failed to remove cache entry: {}", path.display())
                        })?;
                        removed += 1;
                    }
                }
                removed
            }
        };

        tracing::info!(key = key.unwrap_or("all"), removed, "cache cleared");
        Ok(removed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::ManualClock;
    use tempfile::TempDir;

    fn store() -> (TempDir, CacheStore, Arc<ManualClock>) {
        let dir = TempDir::new().unwrap();
        let clock = Arc::new(ManualClock::new());
        let store = CacheStore::new(dir.path(), Duration::from_secs(30 * 60))
            .with_clock(clock.clone());
        (dir, store, clock)
    }

    #[test]
    fn test_set_then_get_is_fresh() {
        let (_dir, cache, _) = store();
        cache.set("market_indices", &vec![1.5, 2.5]).unwrap();

        assert!(cache.is_valid("market_indices"));
        assert_eq!(cache.get::<Vec<f64>>("market_indices"), Some(vec![1.5, 2.5]));
    }

    #[test]
    fn test_entry_expires_after_ttl() {
        let (_dir, cache, clock) = store();
        cache.set("news", &"headline".to_string()).unwrap();

        clock.advance(Duration::from_secs(29 * 60));
        assert!(cache.is_valid("news"));

        clock.advance(Duration::from_secs(2 * 60));
        assert!(!cache.is_valid("news"));
        assert_eq!(cache.get::<String>("news"), None);
    }

    #[test]
    fn test_missing_entry_is_invalid() {
        let (_dir, cache, _) = store();
        assert!(!cache.is_valid("nothing"));
        assert_eq!(cache.get::<String>("nothing"), None);
    }

    #[test]
    fn test_overwrite_replaces_value() {
        let (_dir, cache, _) = store();
        cache.set("k", &1u32).unwrap();
        cache.set("k", &2u32).unwrap();
        assert_eq!(cache.get::<u32>("k"), Some(2));
    }

    #[test]
    fn test_corrupt_entry_is_a_miss() {
        let (_dir, cache, _) = store();
        cache.set("k", &vec!["a".to_string()]).unwrap();
        fs::write(cache.entry_path("k"), b"\x00\x01garbage").unwrap();

        assert!(cache.is_valid("k"));
        assert_eq!(cache.get::<Vec<String>>("k"), None);
    }

    #[test]
    fn test_clear_single_key() {
        let (_dir, cache, _) = store();
        cache.set("a", &1u8).unwrap();
        cache.set("b", &2u8).unwrap();

        assert_eq!(cache.clear(Some("a")).unwrap(), 1);
        assert!(!cache.is_valid("a"));
        assert!(cache.is_valid("b"));
        assert_eq!(cache.clear(Some("a")).unwrap(), 0);
    }

    #[test]
    fn test_clear_all() {
        let (_dir, cache, _) = store();
        let keys = ["market_indices", "top_stocks_rise", "top/stocks fall", "뉴스"];
        for key in keys {
            cache.set(key, &key.to_string()).unwrap();
        }

        assert_eq!(cache.clear(None).unwrap(), keys.len());
        for key in keys {
            assert!(!cache.is_valid(key));
        }
    }

    #[test]
    fn test_keys_with_separators_stay_distinct() {
        let (_dir, cache, _) = store();
        cache.set("a/b", &1u8).unwrap();
        cache.set("a_b", &2u8).unwrap();

        assert_eq!(cache.get::<u8>("a/b"), Some(1));
        assert_eq!(cache.get::<u8>("a_b"), Some(2));
    }
}
