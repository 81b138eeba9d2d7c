use std::collections::BTreeSet;
use std::sync::Arc;
use tracing::{debug, info};

use super::plan::{PlanKind, PlanReason, ScanPlan};
use crate::app::PolicyConfig;
use crate::changes::ChangeRecord;
use crate::constants::FULL_SCAN_TARGET;
use crate::utils::{parent_dir, Clock, PathMatcher, ScanError};

/// Chooses between a full and an incremental scan
#[derive(Debug, Clone)]
pub struct ScanPolicy {
    critical: PathMatcher,
    change_threshold: usize,
    max_full_scan_age: u64,
    clock: Arc<dyn Clock>,
}

impl ScanPolicy {
    pub fn new(config: &PolicyConfig, clock: Arc<dyn Clock>) -> Result<Self, ScanError> {
        Ok(Self {
            critical: PathMatcher::new(&config.critical_file_patterns)?,
            change_threshold: config.change_count_full_scan_threshold,
            max_full_scan_age: config.full_scan_max_age_seconds,
            clock,
        })
    }

    pub fn is_critical(&self, rel_path: &str) -> bool {
        self.critical.is_match(rel_path)
    }

    /// Decide how to scan a change set; `None` when nothing changed
    ///
    /// Rules, first match wins: too many changes, stale or missing full
    /// scan, a critical file touched. Otherwise the plan is incremental
    /// over the affected files and their directories.
    pub fn decide(
        &self,
        changes: &[ChangeRecord],
        affected: &BTreeSet<String>,
        last_full_scan_at: Option<u64>,
    ) -> Option<ScanPlan> {
        if changes.is_empty() {
            debug!("No changes, no scan needed");
            return None;
        }

        let changed = changes.len();
        let full = |reason: PlanReason| Some(self.full_plan(changed, affected.len(), reason));

        if changed > self.change_threshold {
            return full(PlanReason::ChangeThresholdExceeded {
                changed,
                threshold: self.change_threshold,
            });
        }

        match last_full_scan_at {
            None => return full(PlanReason::NoPriorScan),
            Some(at) => {
                let age_seconds = self.clock.now().saturating_sub(at);
                if age_seconds > self.max_full_scan_age {
                    return full(PlanReason::FullScanStale { age_seconds });
                }
            }
        }

        if let Some(path) = changes
            .iter()
            .flat_map(|c| c.touched_paths())
            .find(|p| self.is_critical(p))
        {
            return full(PlanReason::CriticalFileChanged {
                path: path.to_string(),
            });
        }

        let target_paths = incremental_targets(changes, affected);
        if target_paths.is_empty() {
            return full(PlanReason::NoIncrementalTargets);
        }
        info!(
            "Incremental scan: {} changed, {} affected, {} targets",
            changed,
            affected.len(),
            target_paths.len()
        );
        Some(ScanPlan {
            kind: PlanKind::Incremental,
            target_paths,
            changed_count: changed,
            affected_count: affected.len(),
            reason: PlanReason::Incremental,
            fingerprint: String::new(),
        })
    }

    /// A plan over the whole repository
    pub fn full_plan(&self, changed_count: usize, affected_count: usize, reason: PlanReason) -> ScanPlan {
        info!("Full scan: {}", reason);
        ScanPlan {
            kind: PlanKind::Full,
            target_paths: vec![FULL_SCAN_TARGET.to_string()],
            changed_count,
            affected_count,
            reason,
            fingerprint: String::new(),
        }
    }
}

/// Affected files that still exist, plus their containing directories
fn incremental_targets(changes: &[ChangeRecord], affected: &BTreeSet<String>) -> Vec<String> {
    let removed: BTreeSet<&str> = changes
        .iter()
        .filter(|c| !c.is_present())
        .map(|c| c.path.as_str())
        .chain(changes.iter().filter_map(|c| c.old_path.as_deref()))
        .collect();

    let mut targets = BTreeSet::new();
    for path in affected.iter().filter(|p| !removed.contains(p.as_str())) {
        targets.insert(path.clone());
        if let Some(dir) = parent_dir(path) {
            targets.insert(dir.to_string());
        }
    }
    targets.into_iter().collect()
}
