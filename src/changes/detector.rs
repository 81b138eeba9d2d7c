use serde::Serialize;
use std::collections::BTreeSet;
use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{debug, info, warn};

use super::snapshot::FileSnapshot;
use super::types::{ChangeKind, ChangeRecord};
use super::vcs::{VcsChange, VcsRepository};
use super::walker::TreeWalker;
use crate::app::{Config, StatePaths};
use crate::utils::{Clock, ScanError};

/// How a set of changes was obtained
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum DetectionMode {
    Vcs,
    Snapshot,
}

impl fmt::Display for DetectionMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DetectionMode::Vcs => f.write_str("vcs"),
            DetectionMode::Snapshot => f.write_str("snapshot"),
        }
    }
}

/// Result of one detection pass
#[derive(Debug, Clone)]
pub struct Detection {
    pub mode: DetectionMode,
    /// Sorted by path
    pub changes: Vec<ChangeRecord>,
    /// Persisted state the changes were computed against
    pub previous: FileSnapshot,
    /// Live state of the tracked tree
    pub current: FileSnapshot,
}

impl Detection {
    pub fn is_empty(&self) -> bool {
        self.changes.is_empty()
    }
}

/// Finds what changed since the last successful scan
#[derive(Debug)]
pub struct ChangeDetector {
    root: PathBuf,
    walker: TreeWalker,
    snapshot_file: PathBuf,
    base_ref: Option<String>,
    clock: Arc<dyn Clock>,
}

impl ChangeDetector {
    pub fn new(
        root: &Path,
        config: &Config,
        paths: &StatePaths,
        clock: Arc<dyn Clock>,
    ) -> Result<Self, ScanError> {
        let mut walker = TreeWalker::new(root, &config.scan, &config.policy)?;
        if let Some(name) = paths.state_dir.file_name().and_then(|n| n.to_str()) {
            walker.exclude_dir(name);
        }

        Ok(Self {
            root: root.to_path_buf(),
            walker,
            snapshot_file: paths.snapshot_file.clone(),
            base_ref: config.scan.vcs_base_ref.clone(),
            clock,
        })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// The live tree as a snapshot
    pub fn current_snapshot(&self) -> Result<FileSnapshot, ScanError> {
        self.walker.snapshot()
    }

    /// Changes only, see [`ChangeDetector::detect`]
    pub fn detect_changes(&self, use_vcs: bool) -> Result<Vec<ChangeRecord>, ScanError> {
        Ok(self.detect(use_vcs)?.changes)
    }

    /// Run one detection pass
    ///
    /// With `use_vcs`, git status is tried first; any failure to use it is
    /// logged and the pass falls back to snapshot comparison.
    pub fn detect(&self, use_vcs: bool) -> Result<Detection, ScanError> {
        let previous = FileSnapshot::load(&self.snapshot_file);
        let current = self.walker.snapshot()?;
        let now = self.clock.now();

        if use_vcs {
            match self.detect_vcs(&previous, &current, now) {
                Ok(changes) => {
                    info!("Detected {} changes via git", changes.len());
                    return Ok(Detection {
                        mode: DetectionMode::Vcs,
                        changes,
                        previous,
                        current,
                    });
                }
                Err(err) => warn!("{}. Falling back to snapshot comparison.", err),
            }
        }

        let changes = previous.diff(&current, now);
        info!(
            "Detected {} changes against a snapshot of {} files",
            changes.len(),
            previous.len()
        );
        Ok(Detection {
            mode: DetectionMode::Snapshot,
            changes,
            previous,
            current,
        })
    }

    /// Persist the file state a successful scan was run against
    pub fn commit(&self, detection: &Detection) -> Result<(), ScanError> {
        let snapshot = match detection.mode {
            DetectionMode::Snapshot => {
                let mut snapshot = detection.previous.clone();
                snapshot.apply(&detection.changes, &detection.current);
                snapshot
            }
            // git tracks history itself; keep the snapshot fresh for a later fallback
            DetectionMode::Vcs => detection.current.clone(),
        };
        snapshot.save(&self.snapshot_file)?;
        debug!("Saved snapshot of {} files", snapshot.len());
        Ok(())
    }

    fn detect_vcs(
        &self,
        previous: &FileSnapshot,
        current: &FileSnapshot,
        now: u64,
    ) -> Result<Vec<ChangeRecord>, ScanError> {
        let repo = VcsRepository::discover(&self.root)?;
        let changes = repo
            .changes(self.base_ref.as_deref())
            .map_err(|e| ScanError::ChangeDetectionUnavailable(e.to_string()))?;

        let reported: Vec<ChangeRecord> = changes
            .into_iter()
            .filter_map(|change| self.to_record(change, previous, current, now))
            .collect();

        if previous.is_empty() {
            return Ok(reported);
        }
        Ok(since_snapshot(reported, previous, current, now))
    }

    /// Attach hashes and size, dropping paths the walker does not track
    fn to_record(
        &self,
        change: VcsChange,
        previous: &FileSnapshot,
        current: &FileSnapshot,
        now: u64,
    ) -> Option<ChangeRecord> {
        let tracked = self.walker.is_tracked(&change.path)
            || change
                .old_path
                .as_deref()
                .is_some_and(|p| self.walker.is_tracked(p));
        if !tracked {
            return None;
        }

        let before_path = change.old_path.as_deref().unwrap_or(&change.path);
        let mut record = ChangeRecord::new(change.path.clone(), change.kind, now);
        record.old_path = change.old_path.clone();
        record.hash_before = previous.get(before_path).map(|e| e.hash.clone());

        if change.kind != ChangeKind::Deleted {
            // Present per git but filtered out of the walk (e.g. ignored)
            let entry = current.get(&change.path)?;
            record.hash_after = Some(entry.hash.clone());
            record.size_bytes = entry.size_bytes;
        } else if let Some(entry) = previous.get(&change.path) {
            record.size_bytes = entry.size_bytes;
        }
        Some(record)
    }
}

/// Narrow git's working-tree view to what changed since `previous`
///
/// Reports the last scan already saw are dropped. Edits git no longer
/// shows, such as commits or reverts since that scan, come from the
/// snapshot diff.
fn since_snapshot(
    reported: Vec<ChangeRecord>,
    previous: &FileSnapshot,
    current: &FileSnapshot,
    now: u64,
) -> Vec<ChangeRecord> {
    let mut changes: Vec<ChangeRecord> = reported
        .into_iter()
        .filter(|change| differs_from(change, previous))
        .collect();

    let covered: BTreeSet<String> = changes
        .iter()
        .flat_map(|c| c.touched_paths())
        .map(str::to_string)
        .collect();
    changes.extend(
        previous
            .diff(current, now)
            .into_iter()
            .filter(|c| !c.touched_paths().any(|p| covered.contains(p))),
    );

    changes.sort_by(|a, b| a.path.cmp(&b.path));
    changes
}

fn differs_from(change: &ChangeRecord, previous: &FileSnapshot) -> bool {
    if change.kind == ChangeKind::Deleted {
        return previous.contains(&change.path);
    }
    let renamed_away = change
        .old_path
        .as_deref()
        .is_some_and(|p| previous.contains(p));
    renamed_away || previous.get(&change.path).map(|e| &e.hash) != change.hash_after.as_ref()
}
