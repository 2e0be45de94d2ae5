//! File-based caching for API responses.
//!
//! A simple file-based cache with TTL (time-to-live) support, used to
//! cache vulnerability lookups so repeated scans of the same components
//! do not hit the network again. The cache is an explicit handle: create
//! one per process and pass it (usually as `Arc<Cache>`) to whatever needs
//! it.
//!
//! # Cache Location
//!
//! By default entries live in [`crate::platform::cache_dir`]. Use
//! [`Cache::with_dir`] to point it elsewhere.
//!
//! # Example
//!
//! ```no_run
//! use depscan::Cache;
//!
//! let cache = Cache::new();
//!
//! cache.set("my_key", &"cached value".to_string()).unwrap();
//!
//! let value: Option<String> = cache.get("my_key");
//! assert_eq!(value, Some("cached value".to_string()));
//!
//! cache.invalidate("my_key");
//! ```

use anyhow::Result;
use serde::{de::DeserializeOwned, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use std::time::{Duration, SystemTime};

use crate::platform::cache_dir;

/// Default cache TTL in hours.
const CACHE_TTL_HOURS: u64 = 24;

/// A file-based cache with TTL support.
///
/// Values are stored as JSON files in the cache directory. Each entry
/// expires after the configured TTL period. A disabled cache never stores
/// or returns anything.
#[derive(Debug, Clone)]
pub struct Cache {
    dir: PathBuf,
    ttl: Duration,
    enabled: bool,
}

impl Cache {
    /// Creates a new cache with the default 24-hour TTL.
    pub fn new() -> Self {
        Self::with_ttl_hours(CACHE_TTL_HOURS)
    }

    /// Creates a new cache with a custom TTL.
    pub fn with_ttl_hours(hours: u64) -> Self {
        Self::with_dir(cache_dir(), Duration::from_secs(hours * 3600))
    }

    /// Creates a cache rooted at `dir`.
    pub fn with_dir(dir: impl Into<PathBuf>, ttl: Duration) -> Self {
        Self {
            dir: dir.into(),
            ttl,
            enabled: true,
        }
    }

    /// A cache that never stores anything.
    pub fn disabled() -> Self {
        Self {
            dir: cache_dir(),
            ttl: Duration::ZERO,
            enabled: false,
        }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    pub fn ttl(&self) -> Duration {
        self.ttl
    }

    fn ensure_dir(&self) -> Result<()> {
        if !self.dir.exists() {
            fs::create_dir_all(&self.dir)?;
        }
        Ok(())
    }

    /// Converts a cache key to a safe filename.
    ///
    /// ASCII alphanumerics, `-` and `.` are kept; every other byte becomes
    /// `_xx` (hex). `_` itself is escaped, so distinct keys never share a file.
    fn cache_path(&self, key: &str) -> PathBuf {
        let mut safe_key = String::with_capacity(key.len());
        for byte in key.bytes() {
            if byte.is_ascii_alphanumeric() || byte == b'-' || byte == b'.' {
                safe_key.push(byte as char);
            } else {
                safe_key.push_str(&format!("_{:02x}", byte));
            }
        }
        self.dir.join(format!("{}.json", safe_key))
    }

    /// Retrieves a value from the cache.
    ///
    /// Returns `None` if the key doesn't exist or has expired.
    pub fn get<T: DeserializeOwned>(&self, key: &str) -> Option<T> {
        if !self.enabled {
            return None;
        }

        let path = self.cache_path(key);
        if !path.exists() {
            return None;
        }

        if let Ok(modified) = fs::metadata(&path).and_then(|m| m.modified()) {
            if let Ok(elapsed) = SystemTime::now().duration_since(modified) {
                if elapsed > self.ttl {
                    let _ = fs::remove_file(&path);
                    return None;
                }
            }
        }

        let content = fs::read_to_string(&path).ok()?;
        serde_json::from_str(&content).ok()
    }

    /// Stores a value in the cache.
    ///
    /// # Errors
    ///
    /// Returns an error if the cache directory cannot be created or
    /// the file cannot be written.
    pub fn set<T: Serialize>(&self, key: &str, value: &T) -> Result<()> {
        if !self.enabled {
            return Ok(());
        }
        self.ensure_dir()?;
        let content = serde_json::to_string(value)?;
        fs::write(self.cache_path(key), content)?;
        Ok(())
    }

    /// Removes a single entry. Missing entries are ignored.
    pub fn invalidate(&self, key: &str) {
        let _ = fs::remove_file(self.cache_path(key));
    }

    /// Clears all cached entries.
    ///
    /// # Errors
    ///
    /// Returns an error if the cache directory cannot be read.
    pub fn clear(&self) -> Result<()> {
        if self.dir.exists() {
            for entry in fs::read_dir(&self.dir)?.flatten() {
                let path = entry.path();
                if path.extension().map(|e| e == "json").unwrap_or(false) {
                    let _ = fs::remove_file(path);
                }
            }
        }
        Ok(())
    }
}

impl Default for Cache {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_set_get_invalidate() {
        let dir = tempfile::tempdir().unwrap();
        let cache = Cache::with_dir(dir.path(), Duration::from_secs(60));

        cache.set("osv_pkg:npm/lodash@4.17.21", &vec!["GHSA-1".to_string()]).unwrap();
        let hit: Option<Vec<String>> = cache.get("osv_pkg:npm/lodash@4.17.21");
        assert_eq!(hit, Some(vec!["GHSA-1".to_string()]));

        cache.invalidate("osv_pkg:npm/lodash@4.17.21");
        let miss: Option<Vec<String>> = cache.get("osv_pkg:npm/lodash@4.17.21");
        assert_eq!(miss, None);
    }

    #[test]
    fn test_similar_keys_do_not_collide() {
        let dir = tempfile::tempdir().unwrap();
        let cache = Cache::with_dir(dir.path(), Duration::from_secs(60));

        cache
            .set("osv_pkg:npm/lodash.get@4.4.2", &vec!["GHSA-for-lodash.get".to_string()])
            .unwrap();

        let other: Option<Vec<String>> = cache.get("osv_pkg:npm/lodash_get@4.4.2");
        assert_eq!(other, None);
        let other: Option<Vec<String>> = cache.get("osv_pkg_npm/lodash.get@4.4.2");
        assert_eq!(other, None);

        let own: Option<Vec<String>> = cache.get("osv_pkg:npm/lodash.get@4.4.2");
        assert_eq!(own, Some(vec!["GHSA-for-lodash.get".to_string()]));
    }

    #[test]
    fn test_cache_file_names_are_filesystem_safe() {
        let cache = Cache::with_dir("/tmp/depscan-test", Duration::from_secs(60));
        let path = cache.cache_path("osv_pkg:maven/org.slf4j/slf4j-api@2.0.9");
        assert_eq!(path.parent(), Some(Path::new("/tmp/depscan-test")));
        assert_eq!(
            path.file_name().and_then(|n| n.to_str()),
            Some("osv_5fpkg_3amaven_2forg.slf4j_2fslf4j-api_402.0.9.json")
        );
    }

    #[test]
    fn test_expired_entries_are_dropped() {
        let dir = tempfile::tempdir().unwrap();
        let cache = Cache::with_dir(dir.path(), Duration::ZERO);

        cache.set("key", &1u32).unwrap();
        std::thread::sleep(Duration::from_millis(20));
        assert_eq!(cache.get::<u32>("key"), None);
    }

    #[test]
    fn test_disabled_cache_stores_nothing() {
        let cache = Cache::disabled();
        cache.set("depscan_disabled_entry", &1u32).unwrap();
        assert_eq!(cache.get::<u32>("depscan_disabled_entry"), None);
    }

    #[test]
    fn test_clear_removes_entries() {
        let dir = tempfile::tempdir().unwrap();
        let cache = Cache::with_dir(dir.path(), Duration::from_secs(60));
        cache.set("a", &1u32).unwrap();
        cache.set("b", &2u32).unwrap();

        cache.clear().unwrap();
        assert_eq!(cache.get::<u32>("a"), None);
        assert_eq!(cache.get::<u32>("b"), None);
    }
}
