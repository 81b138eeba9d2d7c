use serde::{Deserialize, Serialize};
use std::fmt;

use super::fingerprint::{compute_fingerprint, FingerprintInputs};

/// Scope of one engine run
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PlanKind {
    Full,
    Incremental,
}

impl PlanKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            PlanKind::Full => "full",
            PlanKind::Incremental => "incremental",
        }
    }
}

impl fmt::Display for PlanKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Which decision rule produced a plan
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "rule", rename_all = "snake_case")]
pub enum PlanReason {
    ForcedFull,
    ChangeThresholdExceeded { changed: usize, threshold: usize },
    FullScanStale { age_seconds: u64 },
    NoPriorScan,
    CriticalFileChanged { path: String },
    Incremental,
    /// Tree unchanged but the previous result is no longer cached
    UnchangedTree,
    /// Engine configuration or version differs from the last run
    InputsChanged,
    /// Every affected file was deleted
    NoIncrementalTargets,
}

impl fmt::Display for PlanReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PlanReason::ForcedFull => write!(f, "full scan requested"),
            PlanReason::ChangeThresholdExceeded { changed, threshold } => {
                write!(f, "{} changed files exceed the threshold of {}", changed, threshold)
            }
            PlanReason::FullScanStale { age_seconds } => {
                write!(f, "last full scan was {}s ago", age_seconds)
            }
            PlanReason::NoPriorScan => write!(f, "no previous full scan"),
            PlanReason::CriticalFileChanged { path } => write!(f, "critical file {} changed", path),
            PlanReason::Incremental => write!(f, "incremental"),
            PlanReason::UnchangedTree => write!(f, "tree unchanged, previous result expired"),
            PlanReason::InputsChanged => write!(f, "engine configuration or version changed"),
            PlanReason::NoIncrementalTargets => write!(f, "only deleted files affected"),
        }
    }
}

/// What to hand to the analysis engine
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ScanPlan {
    pub kind: PlanKind,
    /// Sorted, deduplicated; `["."]` for a full scan
    pub target_paths: Vec<String>,
    pub changed_count: usize,
    pub affected_count: usize,
    pub reason: PlanReason,
    /// Empty until [`ScanPlan::with_fingerprint`] is called
    #[serde(default)]
    pub fingerprint: String,
}

impl ScanPlan {
    pub fn is_full(&self) -> bool {
        self.kind == PlanKind::Full
    }

    /// Attach the cache fingerprint for this plan's targets and `inputs`
    pub fn with_fingerprint(mut self, inputs: &FingerprintInputs) -> Self {
        self.fingerprint = compute_fingerprint(self.kind, &self.target_paths, inputs);
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_reason_round_trips_through_json() {
        let reason = PlanReason::CriticalFileChanged {
            path: "Cargo.toml".to_string(),
        };
        let json = serde_json::to_string(&reason).unwrap();
        assert!(json.contains("\"rule\":\"critical_file_changed\""));
        assert_eq!(serde_json::from_str::<PlanReason>(&json).unwrap(), reason);
        assert_eq!(reason.to_string(), "critical file Cargo.toml changed");
    }

    #[test]
    fn test_plan_kind_ordering_and_display() {
        assert!(PlanKind::Full < PlanKind::Incremental);
        assert_eq!(PlanKind::Incremental.to_string(), "incremental");
    }
}
