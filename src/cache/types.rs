use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};

use crate::constants::CACHE_KEY_HASH_LEN;
use crate::utils::hash_str;

/// A value that can be stored in the cache
///
/// Every payload type owns exactly one entry type, so the TTL policy and
/// the key namespace follow from the Rust type being stored.
pub trait CachePayload: Serialize + DeserializeOwned {
    const ENTRY_TYPE: &'static str;
}

/// Metadata for one cache entry; the payload lives in its own file
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CacheEntry {
    pub key: String,
    pub entry_type: String,
    /// Epoch seconds
    pub created_at: u64,
    /// Epoch seconds, `created_at + ttl(entry_type)`
    pub expires_at: u64,
    /// Bytes of the stored payload file
    pub size_bytes: u64,
}

impl CacheEntry {
    pub fn is_expired(&self, now: u64) -> bool {
        now >= self.expires_at
    }
}

/// Persisted cache counters
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct CacheStats {
    pub total_entries: usize,
    pub total_bytes: u64,
    pub hits: u64,
    pub misses: u64,
    pub evictions: u64,
    pub last_cleanup: Option<u64>,
}

impl CacheStats {
    pub fn hit_rate(&self) -> f64 {
        let total_requests = self.hits + self.misses;
        if total_requests > 0 {
            (self.hits as f64 / total_requests as f64) * 100.0
        } else {
            0.0
        }
    }

    /// Format cache stats for display
    pub fn format(&self) -> String {
        let last_cleanup = self
            .last_cleanup
            .and_then(|ts| chrono::DateTime::from_timestamp(ts as i64, 0))
            .map(|dt| dt.format("%Y-%m-%d %H:%M:%S UTC").to_string())
            .unwrap_or_else(|| "never".to_string());

        format!(
            "Cache Statistics:\n\
            Entries: {}\n\
            Total Size: {:.2} MB\n\
            Hit Rate: {:.1}% ({} hits, {} misses)\n\
            Evictions: {}\n\
            Last Cleanup: {}",
            self.total_entries,
            self.total_bytes as f64 / 1_048_576.0,
            self.hit_rate(),
            self.hits,
            self.misses,
            self.evictions,
            last_cleanup
        )
    }
}

/// Result of a cache write
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SetOutcome {
    /// Entry written; `evicted` older entries were removed to make room
    Stored { key: String, evicted: usize },
    /// Entry larger than the whole cache; nothing was written
    Rejected { needed: u64, capacity: u64 },
}

impl SetOutcome {
    pub fn is_stored(&self) -> bool {
        matches!(self, SetOutcome::Stored { .. })
    }
}

/// Result of removing expired entries
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CleanupReport {
    pub expired_count: usize,
    pub freed_bytes: u64,
}

/// Cache key for an entry type and its arguments
///
/// `{entry_type}_{sha256("{entry_type}:{args joined by ':'}")[..16]}`;
/// a pure function of its inputs.
pub fn cache_key(entry_type: &str, args: &[&str]) -> String {
    let material = format!("{}:{}", entry_type, args.join(":"));
    let digest = hash_str(&material);
    format!("{}_{}", entry_type, &digest[..CACHE_KEY_HASH_LEN])
}
