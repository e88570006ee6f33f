//! Fingerprint-keyed completion store with TTL expiry and optional
//! one-file-per-entry persistence.

use chrono::{DateTime, Duration as ChronoDuration, Utc};
use serde::{Deserialize, Serialize};
use sha2::{Digest as _, Sha256};
use std::collections::HashMap;
use std::ffi::OsStr;
use std::fs;
use std::io::{Result as IoResult, Write as _};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tempfile::NamedTempFile;
use tokio::runtime::Handle;
use tokio::task;

use survey_core::{Error, IgnoreLock as _, Result};

/// A cached completion with its validity window.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CacheEntry {
    /// Request fingerprint
    pub key: String,
    /// Completion text
    pub value: String,
    /// When this entry was written
    pub created_at: DateTime<Utc>,
    /// When this entry stops being served
    pub expires_at: DateTime<Utc>,
}

impl CacheEntry {
    fn new(key: String, value: String, ttl: Duration) -> Self {
        let created_at = Utc::now();
        let expires_at = ChronoDuration::from_std(ttl)
            .ok()
            .and_then(|delta| created_at.checked_add_signed(delta))
            .unwrap_or(DateTime::<Utc>::MAX_UTC);
        Self {
            key,
            value,
            created_at,
            expires_at,
        }
    }

    /// Checks if this cache entry has expired
    pub fn is_expired(&self) -> bool {
        Utc::now() > self.expires_at
    }
}

/// Cache statistics
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CacheStats {
    /// Number of entries in the index
    pub entries: usize,
    /// Lookups answered from the cache
    pub hits: u64,
    /// Lookups that found nothing usable
    pub misses: u64,
}

/// Index of live entries keyed by fingerprint.
type EntryIndex = Arc<Mutex<HashMap<String, CacheEntry>>>;

/// Completion cache shared by every matching worker.
///
/// The index is guarded by a single mutex held only while the map is read or
/// updated. Entry files are written outside the lock; removing an expired
/// file happens under it so a concurrent `set` of the same key always wins.
///
/// Only files named `<64 hex digits>.json` in the directory belong to the
/// cache. Anything else there is left alone.
pub struct CompletionCache {
    entries: EntryIndex,
    dir: Option<PathBuf>,
    ttl: Duration,
    hits: AtomicU64,
    misses: AtomicU64,
}

impl CompletionCache {
    /// Creates a cache that lives only as long as the process.
    pub fn in_memory(ttl: Duration) -> Self {
        Self {
            entries: Arc::new(Mutex::new(HashMap::new())),
            dir: None,
            ttl,
            hits: AtomicU64::new(0),
            misses: AtomicU64::new(0),
        }
    }

    /// Creates a cache backed by `dir`, loading every unexpired entry found there.
    ///
    /// Unreadable or corrupt entry files are skipped with a warning; expired
    /// ones are deleted.
    ///
    /// # Errors
    /// Returns an error if the directory cannot be created.
    pub fn persistent(dir: impl Into<PathBuf>, ttl: Duration) -> Result<Self> {
        let dir = dir.into();
        fs::create_dir_all(&dir).map_err(|error| {
            Error::Cache(format!(
                "failed to create cache directory {}: {error}",
                dir.display()
            ))
        })?;

        let entries = load_entries(&dir);
        tracing::info!(
            dir = %dir.display(),
            entries = entries.len(),
            "Loaded completion cache"
        );

        Ok(Self {
            entries: Arc::new(Mutex::new(entries)),
            dir: Some(dir),
            ttl,
            hits: AtomicU64::new(0),
            misses: AtomicU64::new(0),
        })
    }

    /// Directory entries are persisted to, if any.
    pub fn dir(&self) -> Option<&Path> {
        self.dir.as_deref()
    }

    /// Looks up a completion, treating expired entries as absent.
    ///
    /// An expired entry is dropped from the index and its file is removed in
    /// the background.
    pub fn get(&self, key: &str) -> Option<String> {
        let (found, expired) = {
            let mut entries = self.entries.lock_ignore_poison();
            let lookup = entries
                .get(key)
                .map(|entry| (entry.is_expired(), entry.value.clone()));
            match lookup {
                Some((false, value)) => (Some(value), false),
                Some((true, _)) => {
                    entries.remove(key);
                    (None, true)
                }
                None => (None, false),
            }
        };
        if expired {
            self.purge_file(key);
        }

        if found.is_some() {
            self.hits.fetch_add(1, Ordering::Relaxed);
            tracing::debug!(key = %short(key), "Cache hit");
        } else {
            self.misses.fetch_add(1, Ordering::Relaxed);
            tracing::debug!(key = %short(key), "Cache miss");
        }
        found
    }

    /// Stores a completion, restarting its TTL.
    ///
    /// The entry is usable from memory even if persisting it fails.
    ///
    /// # Errors
    /// Returns an error if the entry file cannot be written.
    pub fn set(&self, key: &str, value: &str) -> Result<()> {
        let entry = CacheEntry::new(key.to_owned(), value.to_owned(), self.ttl);
        self.entries
            .lock_ignore_poison()
            .insert(key.to_owned(), entry.clone());

        self.dir
            .as_deref()
            .map_or(Ok(()), |dir| write_entry(dir, &entry))
    }

    /// Removes every entry, including persisted entry files.
    ///
    /// Other files in the cache directory are kept.
    ///
    /// # Errors
    /// Returns an error if the cache directory cannot be listed or a file cannot be removed.
    pub fn clear(&self) -> Result<()> {
        self.entries.lock_ignore_poison().clear();

        let Some(dir) = &self.dir else {
            return Ok(());
        };
        let listing = fs::read_dir(dir).map_err(|error| {
            Error::Cache(format!("failed to list {}: {error}", dir.display()))
        })?;
        for dir_entry in listing.flatten() {
            let path = dir_entry.path();
            if is_entry_file(&path) {
                fs::remove_file(&path).map_err(|error| {
                    Error::Cache(format!("failed to remove {}: {error}", path.display()))
                })?;
            }
        }
        tracing::info!(dir = %dir.display(), "Cleared completion cache");
        Ok(())
    }

    /// Returns the number of entries in the index
    pub fn len(&self) -> usize {
        self.entries.lock_ignore_poison().len()
    }

    /// Returns whether the index is empty
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Returns cache statistics
    pub fn stats(&self) -> CacheStats {
        CacheStats {
            entries: self.len(),
            hits: self.hits.load(Ordering::Relaxed),
            misses: self.misses.load(Ordering::Relaxed),
        }
    }

    /// Deletes the file of an expired entry, in the background when a runtime exists.
    fn purge_file(&self, key: &str) {
        let Some(dir) = &self.dir else {
            return;
        };
        let path = entry_path(dir, key);
        let entries = Arc::clone(&self.entries);
        let key = key.to_owned();
        if Handle::try_current().is_ok() {
            drop(task::spawn_blocking(move || {
                remove_unless_reinserted(&entries, &key, &path);
            }));
        } else {
            remove_unless_reinserted(&entries, &key, &path);
        }
    }
}

/// Removes the file at `path` unless `key` has been stored again since it expired.
///
/// The index lock is held across the check and the removal; `set` inserts
/// before it writes, so a fresh file is never deleted.
#[allow(
    clippy::significant_drop_tightening,
    reason = "The lock must cover the removal"
)]
fn remove_unless_reinserted(entries: &Mutex<HashMap<String, CacheEntry>>, key: &str, path: &Path) {
    let index = entries.lock_ignore_poison();
    if index.contains_key(key) {
        tracing::debug!(key = %short(key), "Expired entry was stored again, keeping its file");
        return;
    }
    if let Err(error) = fs::remove_file(path) {
        tracing::debug!(path = %path.display(), %error, "Expired cache file not removed");
    }
    drop(index);
}

/// `<dir>/<sha256(key)>.json`
fn entry_path(dir: &Path, key: &str) -> PathBuf {
    dir.join(format!("{}.json", hex::encode(Sha256::digest(key.as_bytes()))))
}

/// Whether `path` is named like a file this cache writes.
fn is_entry_file(path: &Path) -> bool {
    let digest_named = path
        .file_stem()
        .and_then(OsStr::to_str)
        .is_some_and(|stem| {
            stem.len() == 64 && stem.bytes().all(|byte| matches!(byte, b'0'..=b'9' | b'a'..=b'f'))
        });
    digest_named && path.extension().is_some_and(|ext| ext == "json") && path.is_file()
}

fn short(key: &str) -> &str {
    key.get(..12).unwrap_or(key)
}

fn write_entry(dir: &Path, entry: &CacheEntry) -> Result<()> {
    let path = entry_path(dir, &entry.key);
    let persist = || -> IoResult<()> {
        let mut file = NamedTempFile::new_in(dir)?;
        serde_json::to_writer(&mut file, entry)?;
        file.flush()?;
        file.persist(&path).map_err(|error| error.error)?;
        Ok(())
    };
    persist().map_err(|error| {
        Error::Cache(format!("failed to write {}: {error}", path.display()))
    })
}

fn load_entries(dir: &Path) -> HashMap<String, CacheEntry> {
    let mut entries = HashMap::new();
    let listing = match fs::read_dir(dir) {
        Ok(listing) => listing,
        Err(error) => {
            tracing::warn!(dir = %dir.display(), %error, "Failed to read cache directory");
            return entries;
        }
    };

    for dir_entry in listing.flatten() {
        let path = dir_entry.path();
        if !is_entry_file(&path) {
            continue;
        }
        let entry = fs::read_to_string(&path)
            .map_err(Error::from)
            .and_then(|contents| serde_json::from_str::<CacheEntry>(&contents).map_err(Error::from));
        match entry {
            Ok(entry) if entry_path(dir, &entry.key) != path => {
                tracing::warn!(path = %path.display(), "Skipping cache entry stored under another key's name");
            }
            Ok(entry) if entry.is_expired() => {
                if let Err(error) = fs::remove_file(&path) {
                    tracing::warn!(path = %path.display(), %error, "Failed to remove expired cache entry");
                }
            }
            Ok(entry) => {
                entries.insert(entry.key.clone(), entry);
            }
            Err(error) => {
                tracing::warn!(path = %path.display(), %error, "Skipping unreadable cache entry");
            }
        }
    }
    entries
}

#[cfg(test)]
#[allow(
    clippy::assertions_on_result_states,
    reason = "Test code is allowed to use unwrap and has different conventions"
)]
mod tests {
    use super::*;
    use std::thread;
    use tempfile::TempDir;
    use tokio::time::sleep;

    const DAY: Duration = Duration::from_secs(24 * 3600);

    fn temp_dir() -> TempDir {
        match TempDir::new() {
            Ok(dir) => dir,
            Err(error) => panic!("tempdir failed: {error}"),
        }
    }

    fn persistent(dir: &TempDir) -> CompletionCache {
        match CompletionCache::persistent(dir.path(), DAY) {
            Ok(cache) => cache,
            Err(error) => panic!("cache creation failed: {error}"),
        }
    }

    fn expired_entry(key: &str) -> CacheEntry {
        let created_at = Utc::now() - ChronoDuration::hours(48);
        CacheEntry {
            key: key.to_owned(),
            value: "stale".to_owned(),
            created_at,
            expires_at: created_at + ChronoDuration::hours(24),
        }
    }

    #[test]
    fn test_cache_set_and_get() {
        let cache = CompletionCache::in_memory(DAY);
        assert!(cache.get("fp").is_none());
        assert!(cache.set("fp", "- Parking").is_ok());
        assert_eq!(cache.get("fp").as_deref(), Some("- Parking"));

        let stats = cache.stats();
        assert_eq!(stats.entries, 1);
        assert_eq!(stats.hits, 1);
        assert_eq!(stats.misses, 1);
    }

    #[test]
    fn test_set_overwrites_value() {
        let cache = CompletionCache::in_memory(DAY);
        assert!(cache.set("fp", "first").is_ok());
        assert!(cache.set("fp", "second").is_ok());
        assert_eq!(cache.get("fp").as_deref(), Some("second"));
        assert_eq!(cache.len(), 1);
    }

    #[test]
    fn test_persisted_entries_survive_reload() {
        let dir = temp_dir();
        {
            let cache = persistent(&dir);
            assert!(cache.set("fingerprint-a", "value a").is_ok());
            assert!(cache.set("fingerprint-b", "value b").is_ok());
        }

        let file = entry_path(dir.path(), "fingerprint-a");
        assert!(file.is_file());
        assert_eq!(file.file_name().map(OsStr::len), Some(64 + ".json".len()));

        let reloaded = persistent(&dir);
        assert_eq!(reloaded.len(), 2);
        assert_eq!(reloaded.get("fingerprint-b").as_deref(), Some("value b"));
    }

    #[test]
    fn test_load_discards_expired_and_corrupt_entries() {
        let dir = temp_dir();
        let stale = expired_entry("old");
        let stale_path = entry_path(dir.path(), "old");
        let corrupt_path = entry_path(dir.path(), "corrupt");
        let written = serde_json::to_string(&stale)
            .map_err(Error::from)
            .and_then(|json| fs::write(&stale_path, json).map_err(Error::from))
            .and_then(|()| fs::write(&corrupt_path, "{not json").map_err(Error::from));
        if let Err(error) = written {
            panic!("fixture write failed: {error}");
        }

        let cache = persistent(&dir);
        assert!(cache.is_empty());
        assert!(!stale_path.exists());
        assert!(corrupt_path.exists());
    }

    #[test]
    fn test_expired_entry_is_absent_and_purged() {
        let dir = temp_dir();
        let cache = persistent(&dir);
        let stale = expired_entry("old");
        if let Err(error) = write_entry(dir.path(), &stale) {
            panic!("fixture write failed: {error}");
        }
        cache
            .entries
            .lock_ignore_poison()
            .insert("old".to_owned(), stale);

        assert!(cache.get("old").is_none());
        assert!(cache.is_empty());
        assert!(!entry_path(dir.path(), "old").exists());
    }

    fn write_fixture(path: &Path, contents: &str) {
        if let Err(error) = fs::write(path, contents) {
            panic!("fixture write failed: {error}");
        }
    }

    fn entry_file_count(dir: &Path) -> usize {
        match fs::read_dir(dir) {
            Ok(listing) => listing
                .flatten()
                .filter(|dir_entry| is_entry_file(&dir_entry.path()))
                .count(),
            Err(error) => panic!("listing failed: {error}"),
        }
    }

    #[test]
    fn test_foreign_files_are_left_alone() {
        let dir = temp_dir();
        let state = dir.path().join("survey.state.json");
        let audit = dir.path().join("audit.json");
        let notes = dir.path().join("notes.txt");
        write_fixture(&state, r#"{"themes":["Parking"]}"#);
        write_fixture(&audit, "[]");
        write_fixture(&notes, "keep me");

        let cache = persistent(&dir);
        assert!(cache.is_empty());
        assert!(cache.set("k", "v").is_ok());
        assert!(cache.clear().is_ok());

        assert!(cache.is_empty());
        assert_eq!(entry_file_count(dir.path()), 0);
        assert!(state.is_file());
        assert!(audit.is_file());
        assert!(notes.is_file());
    }

    #[test]
    fn test_entry_under_wrong_name_is_not_loaded() {
        let dir = temp_dir();
        let entry = CacheEntry::new("real-key".to_owned(), "value".to_owned(), DAY);
        let misplaced = entry_path(dir.path(), "other-key");
        match serde_json::to_string(&entry) {
            Ok(json) => write_fixture(&misplaced, &json),
            Err(error) => panic!("serialize failed: {error}"),
        }

        let cache = persistent(&dir);
        assert!(cache.is_empty());
        assert!(cache.get("real-key").is_none());
    }

    #[test]
    fn test_concurrent_readers_and_writers() {
        const WORKERS: usize = 8;
        const KEYS_PER_WORKER: usize = 25;

        let dir = temp_dir();
        let cache = persistent(&dir);

        thread::scope(|scope| {
            for worker in 0..WORKERS {
                let cache = &cache;
                scope.spawn(move || {
                    for index in 0..KEYS_PER_WORKER {
                        let key = format!("worker-{worker}-key-{index}");
                        let value = format!("value {worker}/{index}");
                        assert!(cache.set(&key, &value).is_ok());
                        assert_eq!(cache.get(&key), Some(value));

                        assert!(cache.set("shared", &format!("shared from {worker}")).is_ok());
                        let shared = cache.get("shared");
                        assert!(shared.is_some_and(|text| text.starts_with("shared from ")));
                    }
                });
            }
        });

        let expected = WORKERS * KEYS_PER_WORKER + 1;
        assert_eq!(cache.len(), expected);
        for worker in 0..WORKERS {
            for index in 0..KEYS_PER_WORKER {
                let key = format!("worker-{worker}-key-{index}");
                assert_eq!(cache.get(&key), Some(format!("value {worker}/{index}")));
            }
        }
        assert_eq!(entry_file_count(dir.path()), expected);

        let reloaded = persistent(&dir);
        assert_eq!(reloaded.len(), expected);
        assert_eq!(
            reloaded.get("worker-7-key-24").as_deref(),
            Some("value 7/24")
        );
        assert!(
            reloaded
                .get("shared")
                .is_some_and(|text| text.starts_with("shared from "))
        );
    }

    #[test]
    fn test_purge_skips_reinserted_key() {
        let dir = temp_dir();
        let cache = persistent(&dir);
        assert!(cache.set("fp", "fresh").is_ok());
        let path = entry_path(dir.path(), "fp");

        remove_unless_reinserted(&cache.entries, "fp", &path);
        assert!(path.is_file());

        cache.entries.lock_ignore_poison().remove("fp");
        remove_unless_reinserted(&cache.entries, "fp", &path);
        assert!(!path.exists());
    }

    #[tokio::test]
    async fn test_store_after_expiry_survives_background_purge() {
        let dir = temp_dir();
        let cache = persistent(&dir);
        let stale = expired_entry("fp");
        if let Err(error) = write_entry(dir.path(), &stale) {
            panic!("fixture write failed: {error}");
        }
        cache
            .entries
            .lock_ignore_poison()
            .insert("fp".to_owned(), stale);

        assert!(cache.get("fp").is_none());
        assert!(cache.set("fp", "fresh").is_ok());
        for _ in 0..20 {
            task::yield_now().await;
            sleep(Duration::from_millis(5)).await;
        }

        assert!(entry_path(dir.path(), "fp").is_file());
        let reloaded = persistent(&dir);
        assert_eq!(reloaded.get("fp").as_deref(), Some("fresh"));
    }

    #[test]
    fn test_clear_removes_files() {
        let dir = temp_dir();
        let cache = persistent(&dir);
        assert!(cache.set("a", "1").is_ok());
        assert!(cache.set("b", "2").is_ok());

        assert!(cache.clear().is_ok());
        assert!(cache.is_empty());
        let remaining = fs::read_dir(dir.path()).map(Iterator::count).unwrap_or(usize::MAX);
        assert_eq!(remaining, 0);
    }

    #[test]
    fn test_write_failure_keeps_memory_entry() {
        let dir = temp_dir();
        let cache = persistent(&dir);
        let removed = fs::remove_dir_all(dir.path());
        assert!(removed.is_ok());

        assert!(matches!(cache.set("fp", "value"), Err(Error::Cache(_))));
        assert_eq!(cache.get("fp").as_deref(), Some("value"));
    }

    #[tokio::test]
    async fn test_expired_file_purged_in_background() {
        let dir = temp_dir();
        let cache = persistent(&dir);
        let stale = expired_entry("old");
        if let Err(error) = write_entry(dir.path(), &stale) {
            panic!("fixture write failed: {error}");
        }
        cache
            .entries
            .lock_ignore_poison()
            .insert("old".to_owned(), stale);

        assert!(cache.get("old").is_none());
        let path = entry_path(dir.path(), "old");
        for _ in 0..200 {
            if !path.exists() {
                break;
            }
            sleep(Duration::from_millis(10)).await;
        }
        assert!(!path.exists());
    }
}
