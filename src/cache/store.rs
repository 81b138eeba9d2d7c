use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{debug, info, warn};

use super::file_cache::FileCache;
use super::types::{cache_key, CacheEntry, CachePayload, CacheStats, CleanupReport, SetOutcome};
use crate::app::CacheConfig;
use crate::constants::{CACHE_METADATA_FILE, CACHE_STATS_FILE, PAYLOAD_DIR_NAME};
use crate::utils::{read_json_or_default, write_json_atomic, Clock, ScanError, SystemClock};

/// Persistent, size-bounded, TTL-aware cache
///
/// Layout under the cache directory:
/// - `cache_metadata.json`: key -> [`CacheEntry`]
/// - `cache_stats.json`: [`CacheStats`]
/// - `payloads/<key>.bin`: one compressed payload per key
///
/// Metadata and stats are flushed after every mutating call, each write
/// replacing the previous file atomically.
#[derive(Debug)]
pub struct CacheStore {
    dir: PathBuf,
    files: FileCache,
    config: CacheConfig,
    clock: Arc<dyn Clock>,
    entries: BTreeMap<String, CacheEntry>,
    stats: CacheStats,
}

impl CacheStore {
    /// Open (or create) a cache directory using the wall clock
    pub fn open(dir: &Path, config: CacheConfig) -> Result<Self, ScanError> {
        Self::open_with_clock(dir, config, Arc::new(SystemClock))
    }

    pub fn open_with_clock(
        dir: &Path,
        config: CacheConfig,
        clock: Arc<dyn Clock>,
    ) -> Result<Self, ScanError> {
        fs::create_dir_all(dir)?;
        let files = FileCache::new(dir.join(PAYLOAD_DIR_NAME))?;

        let entries: BTreeMap<String, CacheEntry> =
            read_json_or_default(&dir.join(CACHE_METADATA_FILE));
        let stats: CacheStats = read_json_or_default(&dir.join(CACHE_STATS_FILE));

        let mut store = Self {
            dir: dir.to_path_buf(),
            files,
            config,
            clock,
            entries,
            stats,
        };
        store.sync_totals();

        debug!(
            "Opened cache at {} with {} entries ({} bytes)",
            store.dir.display(),
            store.stats.total_entries,
            store.stats.total_bytes
        );
        Ok(store)
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    pub fn capacity(&self) -> u64 {
        self.config.max_cache_size_bytes
    }

    /// Look up a payload
    ///
    /// Expired, orphaned (payload file missing) and undecodable entries are
    /// misses and are purged on the spot.
    pub fn get<P: CachePayload>(&mut self, args: &[&str]) -> Option<P> {
        let key = cache_key(P::ENTRY_TYPE, args);
        let now = self.clock.now();

        let result = match self.entries.get(&key) {
            None => None,
            Some(entry) if entry.is_expired(now) => {
                debug!("Cache entry {} expired at {}", key, entry.expires_at);
                self.remove_entry(&key);
                None
            }
            Some(_) => match self.files.load::<P>(&key) {
                Ok(payload) => Some(payload),
                Err(err) => {
                    warn!("{}. Purging entry.", err);
                    self.remove_entry(&key);
                    None
                }
            },
        };

        if result.is_some() {
            self.stats.hits += 1;
            debug!("Cache hit for {}", key);
        } else {
            self.stats.misses += 1;
            debug!("Cache miss for {}", key);
        }

        if let Err(err) = self.flush() {
            warn!("Failed to persist cache metadata: {}", err);
        }
        result
    }

    /// Store a payload, evicting the oldest entries when over capacity
    ///
    /// `ttl` overrides the configured TTL for the payload's entry type.
    /// Payloads larger than the whole cache are rejected before anything is
    /// written or evicted.
    pub fn set<P: CachePayload>(
        &mut self,
        payload: &P,
        args: &[&str],
        ttl: Option<u64>,
    ) -> Result<SetOutcome, ScanError> {
        let key = cache_key(P::ENTRY_TYPE, args);
        let bytes = FileCache::encode(payload)?;
        let needed = bytes.len() as u64;
        let capacity = self.config.max_cache_size_bytes;

        if needed > capacity {
            warn!(
                "{}. Result for {} is not cached.",
                ScanError::CacheCapacityExceeded { needed, capacity },
                key
            );
            return Ok(SetOutcome::Rejected { needed, capacity });
        }

        let replaced = self.entries.get(&key).map(|e| e.size_bytes).unwrap_or(0);
        let evicted = self.evict_for(needed, replaced, &key);

        self.files.save(&key, &bytes)?;

        let created_at = self.clock.now();
        let ttl = ttl.unwrap_or_else(|| self.config.ttl_for(P::ENTRY_TYPE));
        self.entries.insert(
            key.clone(),
            CacheEntry {
                key: key.clone(),
                entry_type: P::ENTRY_TYPE.to_string(),
                created_at,
                expires_at: created_at.saturating_add(ttl),
                size_bytes: needed,
            },
        );
        self.flush()?;

        debug!("Cached {} ({} bytes, ttl {}s)", key, needed, ttl);
        Ok(SetOutcome::Stored { key, evicted })
    }

    /// Remove entries by type and/or key substring; both `None` removes all
    pub fn invalidate(
        &mut self,
        entry_type: Option<&str>,
        pattern: Option<&str>,
    ) -> Result<usize, ScanError> {
        let matching: Vec<String> = self
            .entries
            .values()
            .filter(|e| entry_type.map_or(true, |t| e.entry_type == t))
            .filter(|e| pattern.map_or(true, |p| e.key.contains(p)))
            .map(|e| e.key.clone())
            .collect();

        for key in &matching {
            self.remove_entry(key);
        }
        self.flush()?;

        if !matching.is_empty() {
            info!("Invalidated {} cache entries", matching.len());
        }
        Ok(matching.len())
    }

    /// Remove expired entries and payload files without metadata
    pub fn cleanup(&mut self) -> Result<CleanupReport, ScanError> {
        let now = self.clock.now();
        let expired: Vec<String> = self
            .entries
            .values()
            .filter(|e| e.is_expired(now))
            .map(|e| e.key.clone())
            .collect();

        let mut report = CleanupReport::default();
        for key in &expired {
            if let Some(entry) = self.remove_entry(key) {
                report.expired_count += 1;
                report.freed_bytes += entry.size_bytes;
            }
        }

        for (key, size) in self.files.stored_keys()? {
            if !self.entries.contains_key(&key) {
                debug!("Removing orphaned payload {}", key);
                self.files.remove(&key)?;
                report.freed_bytes += size;
            }
        }

        self.stats.last_cleanup = Some(now);
        self.flush()?;

        info!(
            "Cache cleanup removed {} expired entries ({} bytes)",
            report.expired_count, report.freed_bytes
        );
        Ok(report)
    }

    /// Remove every entry and reset the counters
    pub fn clear(&mut self) -> Result<usize, ScanError> {
        let count = self.entries.len();
        self.entries.clear();
        self.files.clear()?;

        self.stats.hits = 0;
        self.stats.misses = 0;
        self.stats.evictions = 0;
        self.flush()?;

        info!("Cleared {} cache entries", count);
        Ok(count)
    }

    /// Snapshot of the counters
    pub fn stats(&self) -> CacheStats {
        self.stats.clone()
    }

    /// Entries, oldest first, optionally restricted to one type
    pub fn list(&self, entry_type: Option<&str>) -> Vec<CacheEntry> {
        let mut entries: Vec<CacheEntry> = self
            .entries
            .values()
            .filter(|e| entry_type.map_or(true, |t| e.entry_type == t))
            .cloned()
            .collect();
        entries.sort_by(|a, b| a.created_at.cmp(&b.created_at).then_with(|| a.key.cmp(&b.key)));
        entries
    }

    fn total_bytes(&self) -> u64 {
        self.entries.values().map(|e| e.size_bytes).sum()
    }

    /// Evict oldest-created entries until `needed` more bytes fit
    ///
    /// The entry being replaced (`key`) is not counted and never evicted.
    fn evict_for(&mut self, needed: u64, replaced: u64, key: &str) -> usize {
        let capacity = self.config.max_cache_size_bytes;
        let mut used = self.total_bytes() - replaced;
        if used + needed <= capacity {
            return 0;
        }

        let mut candidates: Vec<(u64, String, u64)> = self
            .entries
            .values()
            .filter(|e| e.key != key)
            .map(|e| (e.created_at, e.key.clone(), e.size_bytes))
            .collect();
        candidates.sort();

        let mut evicted = 0;
        for (_, victim, size) in candidates {
            if used + needed <= capacity {
                break;
            }
            self.remove_entry(&victim);
            used -= size;
            evicted += 1;
            self.stats.evictions += 1;
            debug!("Evicted {} ({} bytes)", victim, size);
        }

        if evicted > 0 {
            info!("Evicted {} cache entries to stay under {} bytes", evicted, capacity);
        }
        evicted
    }

    /// Drop metadata and payload file for a key (no flush)
    fn remove_entry(&mut self, key: &str) -> Option<CacheEntry> {
        let entry = self.entries.remove(key);
        if let Err(err) = self.files.remove(key) {
            warn!("Failed to remove payload for {}: {}", key, err);
        }
        entry
    }

    fn sync_totals(&mut self) {
        self.stats.total_entries = self.entries.len();
        self.stats.total_bytes = self.total_bytes();
    }

    fn flush(&mut self) -> Result<(), ScanError> {
        self.sync_totals();
        write_json_atomic(&self.dir.join(CACHE_METADATA_FILE), &self.entries)?;
        write_json_atomic(&self.dir.join(CACHE_STATS_FILE), &self.stats)?;
        Ok(())
    }
}
