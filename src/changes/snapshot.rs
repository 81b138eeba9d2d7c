use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::Path;

use super::types::{ChangeKind, ChangeRecord};
use crate::utils::{digest_pairs, read_json_or_default, write_json_atomic, ScanError};

/// Last known state of one tracked file
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SnapshotEntry {
    pub hash: String,
    pub size_bytes: u64,
    pub modified_at: u64,
}

/// Path -> file state for every tracked file, persisted as `file-snapshot.json`
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct FileSnapshot {
    #[serde(default)]
    pub files: BTreeMap<String, SnapshotEntry>,
}

impl FileSnapshot {
    /// Load a snapshot; a missing or corrupt file yields an empty one
    pub fn load(path: &Path) -> Self {
        read_json_or_default(path)
    }

    pub fn save(&self, path: &Path) -> Result<(), ScanError> {
        write_json_atomic(path, self)
    }

    pub fn get(&self, path: &str) -> Option<&SnapshotEntry> {
        self.files.get(path)
    }

    pub fn contains(&self, path: &str) -> bool {
        self.files.contains_key(path)
    }

    pub fn insert(&mut self, path: String, entry: SnapshotEntry) {
        self.files.insert(path, entry);
    }

    pub fn remove(&mut self, path: &str) -> Option<SnapshotEntry> {
        self.files.remove(path)
    }

    pub fn len(&self) -> usize {
        self.files.len()
    }

    pub fn is_empty(&self) -> bool {
        self.files.is_empty()
    }

    pub fn paths(&self) -> impl Iterator<Item = &str> {
        self.files.keys().map(String::as_str)
    }

    /// Changes that turn `self` into `current`, sorted by path
    pub fn diff(&self, current: &FileSnapshot, detected_at: u64) -> Vec<ChangeRecord> {
        let mut changes = Vec::new();

        for (path, now) in &current.files {
            match self.files.get(path) {
                None => {
                    let mut record = ChangeRecord::new(path.clone(), ChangeKind::Added, detected_at);
                    record.hash_after = Some(now.hash.clone());
                    record.size_bytes = now.size_bytes;
                    changes.push(record);
                }
                Some(before) if before.hash != now.hash => {
                    let mut record =
                        ChangeRecord::new(path.clone(), ChangeKind::Modified, detected_at);
                    record.hash_before = Some(before.hash.clone());
                    record.hash_after = Some(now.hash.clone());
                    record.size_bytes = now.size_bytes;
                    changes.push(record);
                }
                Some(_) => {}
            }
        }

        for (path, before) in &self.files {
            if !current.files.contains_key(path) {
                let mut record = ChangeRecord::new(path.clone(), ChangeKind::Deleted, detected_at);
                record.hash_before = Some(before.hash.clone());
                record.size_bytes = before.size_bytes;
                changes.push(record);
            }
        }

        changes.sort_by(|a, b| a.path.cmp(&b.path));
        changes
    }

    /// Apply changes entry by entry, taking new file state from `current`
    pub fn apply(&mut self, changes: &[ChangeRecord], current: &FileSnapshot) {
        for change in changes {
            if let Some(old_path) = &change.old_path {
                self.files.remove(old_path);
            }
            match current.files.get(&change.path) {
                Some(entry) if change.is_present() => {
                    self.files.insert(change.path.clone(), entry.clone());
                }
                _ => {
                    self.files.remove(&change.path);
                }
            }
        }
    }

    /// Order-independent digest of every `path -> hash` pair
    pub fn digest(&self) -> String {
        digest_pairs(
            self.files
                .iter()
                .map(|(path, entry)| (path.as_str(), entry.hash.as_str())),
        )
    }
}
