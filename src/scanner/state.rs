use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::Path;

use crate::policy::{PlanKind, ScanPlan};
use crate::utils::{read_json_or_default, write_json_atomic, ScanError};

/// One completed scan
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ScanRecord {
    pub timestamp: u64,
    pub kind: PlanKind,
    pub changed_count: usize,
    pub affected_count: usize,
    pub target_count: usize,
    pub duration_ms: u64,
    pub findings_count: usize,
    pub fingerprint: String,
    #[serde(default)]
    pub from_cache: bool,
}

/// Aggregates per plan kind
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct KindPerformance {
    pub runs: u64,
    pub total_duration_ms: u64,
    pub total_findings: u64,
    pub cache_hits: u64,
}

impl KindPerformance {
    pub fn average_duration_ms(&self) -> u64 {
        if self.runs == 0 {
            0
        } else {
            self.total_duration_ms / self.runs
        }
    }
}

/// Scan history and decision inputs, persisted as `scan-state.json`
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ScanState {
    /// Oldest first
    pub history: Vec<ScanRecord>,
    /// Last engine run over the whole tree; cache hits do not count
    pub last_full_scan_at: Option<u64>,
    pub last_plan: Option<ScanPlan>,
    pub last_config_hash: Option<String>,
    pub last_engine_version: Option<String>,
    pub performance: BTreeMap<PlanKind, KindPerformance>,
}

impl ScanState {
    /// Load state; a missing or corrupt file yields a fresh state
    pub fn load(path: &Path) -> Self {
        read_json_or_default(path)
    }

    pub fn save(&self, path: &Path) -> Result<(), ScanError> {
        write_json_atomic(path, self)
    }

    /// Append a record, dropping the oldest beyond `limit`
    pub fn record(&mut self, record: ScanRecord, limit: usize) {
        let performance = self.performance.entry(record.kind).or_default();
        if record.from_cache {
            performance.cache_hits += 1;
        } else {
            performance.runs += 1;
            performance.total_duration_ms += record.duration_ms;
            performance.total_findings += record.findings_count as u64;
        }

        self.history.push(record);
        if self.history.len() > limit {
            let excess = self.history.len() - limit;
            self.history.drain(..excess);
        }
    }

    /// Remember what a completed engine run was based on
    pub fn remember_run(
        &mut self,
        plan: &ScanPlan,
        config_hash: &str,
        engine_version: &str,
        finished_at: u64,
    ) {
        if plan.is_full() {
            self.last_full_scan_at = Some(finished_at);
        }
        self.last_plan = Some(plan.clone());
        self.last_config_hash = Some(config_hash.to_string());
        self.last_engine_version = Some(engine_version.to_string());
    }

    /// Whether engine inputs differ from the last completed run
    pub fn inputs_changed(&self, config_hash: &str, engine_version: &str) -> bool {
        let config_changed = self
            .last_config_hash
            .as_deref()
            .is_some_and(|h| h != config_hash);
        let version_changed = self
            .last_engine_version
            .as_deref()
            .is_some_and(|v| v != engine_version);
        config_changed || version_changed
    }

    /// Most recent records first
    pub fn recent(&self, limit: usize) -> impl Iterator<Item = &ScanRecord> {
        self.history.iter().rev().take(limit)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::policy::PlanReason;
    use pretty_assertions::assert_eq;
    use tempfile::TempDir;

    fn record(timestamp: u64, kind: PlanKind, from_cache: bool) -> ScanRecord {
        ScanRecord {
            timestamp,
            kind,
            changed_count: 1,
            affected_count: 2,
            target_count: 3,
            duration_ms: 100,
            findings_count: 4,
            fingerprint: format!("fp{}", timestamp),
            from_cache,
        }
    }

    #[test]
    fn test_history_is_bounded_oldest_dropped() {
        let mut state = ScanState::default();
        for ts in 0..5 {
            state.record(record(ts, PlanKind::Incremental, false), 3);
        }
        let timestamps: Vec<u64> = state.history.iter().map(|r| r.timestamp).collect();
        assert_eq!(timestamps, vec![2, 3, 4]);
        assert_eq!(state.recent(2).map(|r| r.timestamp).collect::<Vec<_>>(), vec![4, 3]);
    }

    #[test]
    fn test_performance_aggregates() {
        let mut state = ScanState::default();
        state.record(record(1, PlanKind::Full, false), 100);
        state.record(record(2, PlanKind::Full, false), 100);
        state.record(record(3, PlanKind::Full, true), 100);

        let full = &state.performance[&PlanKind::Full];
        assert_eq!(full.runs, 2);
        assert_eq!(full.cache_hits, 1);
        assert_eq!(full.total_findings, 8);
        assert_eq!(full.average_duration_ms(), 100);
        assert!(!state.performance.contains_key(&PlanKind::Incremental));
    }

    #[test]
    fn test_remember_run_and_input_changes() {
        let mut state = ScanState::default();
        assert!(!state.inputs_changed("cfg", "1.0"));

        let plan = ScanPlan {
            kind: PlanKind::Incremental,
            target_paths: vec!["a.html".to_string()],
            changed_count: 1,
            affected_count: 1,
            reason: PlanReason::Incremental,
            fingerprint: "fp".to_string(),
        };
        state.remember_run(&plan, "cfg", "1.0", 50);
        assert_eq!(state.last_full_scan_at, None);
        assert!(!state.inputs_changed("cfg", "1.0"));
        assert!(state.inputs_changed("cfg2", "1.0"));
        assert!(state.inputs_changed("cfg", "1.1"));

        let full = ScanPlan {
            kind: PlanKind::Full,
            ..plan
        };
        state.remember_run(&full, "cfg", "1.0", 60);
        assert_eq!(state.last_full_scan_at, Some(60));
    }

    #[test]
    fn test_state_persists() {
        let temp_dir = TempDir::new().unwrap();
        let path = temp_dir.path().join("scan-state.json");
        assert_eq!(ScanState::load(&path), ScanState::default());

        let mut state = ScanState::default();
        state.record(record(7, PlanKind::Full, false), 10);
        state.save(&path).unwrap();
        assert_eq!(ScanState::load(&path), state);
    }
}
