use anyhow::{Context, Result};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{debug, info, warn};

use super::engine::AnalysisEngine;
use super::findings::{EngineVersionPayload, Finding, ScanResultPayload};
use super::state::{ScanRecord, ScanState};
use crate::app::{Config, StatePaths};
use crate::cache::{CacheStore, SetOutcome};
use crate::changes::{ChangeDetector, Detection, DetectionMode};
use crate::impact::ImpactAnalyzer;
use crate::policy::{config_input_hash, FingerprintInputs, PlanReason, ScanPlan, ScanPolicy};
use crate::utils::{Clock, SystemClock};

/// Result of one orchestrated scan
#[derive(Debug, Clone)]
pub struct ScanOutcome {
    pub from_cache: bool,
    pub plan: ScanPlan,
    pub findings: Vec<Finding>,
    /// Non-fatal engine diagnostics
    pub warnings: Vec<String>,
    pub duration: Duration,
    pub detection_mode: DetectionMode,
}

/// Everything decided before the cache or the engine is consulted
struct Prepared {
    detection: Detection,
    plan: ScanPlan,
    inputs: FingerprintInputs,
    /// `plan` is the previous run's plan, reused for an unchanged tree
    reused_last_plan: bool,
}

/// Coordinates change detection, planning, the cache and the engine
///
/// All state is owned explicitly: the cache store and scan state are handed
/// in at construction and written back after every completed run.
pub struct Orchestrator {
    root: PathBuf,
    config: Config,
    paths: StatePaths,
    engine: Box<dyn AnalysisEngine>,
    cache: CacheStore,
    state: ScanState,
    detector: ChangeDetector,
    analyzer: ImpactAnalyzer,
    policy: ScanPolicy,
    clock: Arc<dyn Clock>,
}

impl Orchestrator {
    pub fn new(
        root: &Path,
        config: Config,
        engine: Box<dyn AnalysisEngine>,
        cache: CacheStore,
        state: ScanState,
        clock: Arc<dyn Clock>,
    ) -> Result<Self> {
        let paths = config.state_paths(root);
        let detector = ChangeDetector::new(root, &config, &paths, clock.clone())
            .context("Failed to set up change detection")?;
        let analyzer = ImpactAnalyzer::new(root, &config.scan);
        let policy = ScanPolicy::new(&config.policy, clock.clone())
            .context("Invalid critical file patterns")?;

        Ok(Self {
            root: root.to_path_buf(),
            config,
            paths,
            engine,
            cache,
            state,
            detector,
            analyzer,
            policy,
            clock,
        })
    }

    /// Load cache and scan state from the project's state directory
    pub fn open(root: &Path, config: Config, engine: Box<dyn AnalysisEngine>) -> Result<Self> {
        let paths = config.state_paths(root);
        let cache = CacheStore::open(&paths.cache_dir, config.cache.clone()).with_context(|| {
            format!("Failed to open cache at {}", paths.cache_dir.display())
        })?;
        let state = ScanState::load(&paths.scan_state_file);
        Self::new(root, config, engine, cache, state, Arc::new(SystemClock))
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    pub fn cache(&self) -> &CacheStore {
        &self.cache
    }

    pub fn state(&self) -> &ScanState {
        &self.state
    }

    /// Decide what a scan would do, without running the engine
    pub async fn plan(&mut self, use_vcs: bool, force_full: bool) -> Result<ScanPlan> {
        Ok(self.prepare(use_vcs, force_full).await?.plan)
    }

    /// Run one scan
    ///
    /// A cached result for the plan's fingerprint is returned as is. On a
    /// miss the engine runs; only a successful run updates the cache, the
    /// file snapshot and the scan history. Engine failures are returned as
    /// `ScanError::EngineInvocationFailed`.
    pub async fn run(&mut self, use_vcs: bool, force_full: bool) -> Result<ScanOutcome> {
        let started = Instant::now();
        let prepared = self.prepare(use_vcs, force_full).await?;
        let Prepared {
            detection,
            mut plan,
            inputs,
            reused_last_plan,
        } = prepared;

        let mut cached = self.cache.get::<ScanResultPayload>(&[plan.fingerprint.as_str()]);
        if cached.is_none() && reused_last_plan {
            info!("Tree unchanged but the previous result is gone, running a full scan");
            plan = self
                .policy
                .full_plan(0, 0, PlanReason::UnchangedTree)
                .with_fingerprint(&inputs);
            cached = self.cache.get::<ScanResultPayload>(&[plan.fingerprint.as_str()]);
        }

        if let Some(payload) = cached {
            info!("Reusing cached result for {}", &plan.fingerprint[..12]);
            let duration = started.elapsed();
            self.record(&plan, payload.findings.len(), duration, true);
            self.state
                .save(&self.paths.scan_state_file)
                .context("Failed to save scan state")?;

            return Ok(ScanOutcome {
                from_cache: true,
                plan,
                findings: payload.findings,
                warnings: payload.warnings,
                duration,
                detection_mode: detection.mode,
            });
        }

        let engine_started = Instant::now();
        let report = self.engine.analyze(&plan.target_paths).await?;
        let engine_duration = engine_started.elapsed();

        let payload = ScanResultPayload {
            warnings: report.warnings(),
            findings: report.findings,
            duration_ms: engine_duration.as_millis() as u64,
        };
        match self.cache.set(&payload, &[plan.fingerprint.as_str()], None) {
            Ok(SetOutcome::Stored { evicted, .. }) => {
                debug!("Cached scan result ({} entries evicted)", evicted)
            }
            Ok(SetOutcome::Rejected { .. }) => {}
            Err(e) => warn!("Failed to cache scan result: {}", e),
        }

        self.detector
            .commit(&detection)
            .context("Failed to save file snapshot")?;

        let duration = started.elapsed();
        let now = self.clock.now();
        self.state
            .remember_run(&plan, &inputs.config_hash, &inputs.engine_version, now);
        self.record(&plan, payload.findings.len(), engine_duration, false);
        self.state
            .save(&self.paths.scan_state_file)
            .context("Failed to save scan state")?;

        info!(
            "{} scan finished: {} findings in {} ms",
            plan.kind,
            payload.findings.len(),
            duration.as_millis()
        );
        Ok(ScanOutcome {
            from_cache: false,
            plan,
            findings: payload.findings,
            warnings: payload.warnings,
            duration,
            detection_mode: detection.mode,
        })
    }

    async fn prepare(&mut self, use_vcs: bool, force_full: bool) -> Result<Prepared> {
        let detection = self
            .detector
            .detect(use_vcs)
            .context("Failed to detect changes")?;

        let descriptor = self.engine.descriptor();
        let inputs = FingerprintInputs {
            config_hash: config_input_hash(&self.root, &descriptor.config_path),
            tool_flags: descriptor.flags,
            engine_version: self.engine_version(&descriptor.program).await?,
            tree_digest: detection.current.digest(),
        };

        let changed = detection.changes.len();
        let mut reused_last_plan = false;

        let plan = if force_full {
            self.policy.full_plan(changed, 0, PlanReason::ForcedFull)
        } else if self
            .state
            .inputs_changed(&inputs.config_hash, &inputs.engine_version)
        {
            self.policy.full_plan(changed, 0, PlanReason::InputsChanged)
        } else {
            let affected = self
                .analyzer
                .analyze_impact(&detection.changes, &detection.current);
            match self
                .policy
                .decide(&detection.changes, &affected, self.state.last_full_scan_at)
            {
                Some(plan) => plan,
                None => match self.state.last_plan.clone() {
                    Some(last) => {
                        reused_last_plan = true;
                        last
                    }
                    None => self.policy.full_plan(0, 0, PlanReason::NoPriorScan),
                },
            }
        };

        let plan = plan.with_fingerprint(&inputs);
        debug!("Plan {} ({}): {:?}", plan.kind, plan.reason, plan.target_paths);
        Ok(Prepared {
            detection,
            plan,
            inputs,
            reused_last_plan,
        })
    }

    /// Engine version, cached per program
    async fn engine_version(&mut self, program: &str) -> Result<String> {
        if let Some(cached) = self.cache.get::<EngineVersionPayload>(&[program]) {
            return Ok(cached.version);
        }

        let version = self.engine.version().await?;
        let payload = EngineVersionPayload {
            version: version.clone(),
        };
        match self.cache.set(&payload, &[program], None) {
            Ok(outcome) if !outcome.is_stored() => {
                debug!("Engine version for {} not cached", program)
            }
            Ok(_) => {}
            Err(e) => warn!("Failed to cache engine version: {}", e),
        }
        Ok(version)
    }

    fn record(&mut self, plan: &ScanPlan, findings: usize, duration: Duration, from_cache: bool) {
        let record = ScanRecord {
            timestamp: self.clock.now(),
            kind: plan.kind,
            changed_count: plan.changed_count,
            affected_count: plan.affected_count,
            target_count: plan.target_paths.len(),
            duration_ms: duration.as_millis() as u64,
            findings_count: findings,
            fingerprint: plan.fingerprint.clone(),
            from_cache,
        };
        self.state.record(record, self.config.scan.history_limit);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::policy::PlanKind;
    use crate::scanner::engine::{EngineDescriptor, MockAnalysisEngine};
    use crate::scanner::findings::{EngineReport, Severity};
    use crate::utils::{ManualClock, ScanError};
    use mockall::Sequence;
    use pretty_assertions::assert_eq;
    use git2::{Repository, Signature};
    use std::fs;
    use tempfile::TempDir;

    const START: u64 = 1_700_000_000;

    fn write(root: &Path, rel: &str, content: &str) {
        let path = root.join(rel);
        fs::create_dir_all(path.parent().unwrap()).unwrap();
        fs::write(path, content).unwrap();
    }

    fn report(count: usize) -> EngineReport {
        EngineReport {
            findings: (0..count)
                .map(|i| Finding {
                    path: "templates/a.html".to_string(),
                    start_line: i as u64 + 1,
                    end_line: i as u64 + 1,
                    rule_id: "xss".to_string(),
                    message: "unescaped".to_string(),
                    severity: Severity::Warning,
                })
                .collect(),
            errors: Vec::new(),
        }
    }

    fn mock_engine() -> MockAnalysisEngine {
        let mut engine = MockAnalysisEngine::new();
        engine.expect_descriptor().returning(|| EngineDescriptor {
            program: "semgrep".to_string(),
            config_path: "rules.yml".to_string(),
            flags: vec!["scan".to_string(), "--json".to_string()],
        });
        engine
            .expect_version()
            .returning(|| Ok("1.50.0".to_string()));
        engine
    }

    fn project() -> TempDir {
        let temp_dir = TempDir::new().unwrap();
        let root = temp_dir.path();
        write(root, "rules.yml", "rules: []");
        write(root, "templates/base.html", "<html>{% block body %}{% endblock %}</html>");
        write(root, "templates/a.html", r#"{% extends "base.html" %}"#);
        write(root, "templates/b.html", r#"{% include "partials/nav.html" %}"#);
        write(root, "templates/partials/nav.html", "<nav></nav>");
        write(root, "app/views.py", "def index(): pass");
        temp_dir
    }

    fn commit_all(repo: &Repository, message: &str) {
        let mut index = repo.index().unwrap();
        index
            .add_all(["*"].iter(), git2::IndexAddOption::DEFAULT, None)
            .unwrap();
        index.write().unwrap();
        let tree = repo.find_tree(index.write_tree().unwrap()).unwrap();
        let signature = Signature::now("Test", "test@example.com").unwrap();
        let parent = repo.head().ok().and_then(|h| h.peel_to_commit().ok());
        let parents: Vec<&git2::Commit> = parent.iter().collect();
        repo.commit(Some("HEAD"), &signature, &signature, message, &tree, &parents)
            .unwrap();
    }

    /// `project()` committed to a fresh git repository
    fn git_project() -> (TempDir, Repository) {
        let temp_dir = project();
        let repo = Repository::init(temp_dir.path()).unwrap();
        write(temp_dir.path(), ".gitignore", ".incscan/\n");
        commit_all(&repo, "init");
        (temp_dir, repo)
    }

    fn orchestrator(root: &Path, engine: MockAnalysisEngine, clock: &ManualClock) -> Orchestrator {
        orchestrator_with(root, engine, clock, Config::default())
    }

    fn orchestrator_with(
        root: &Path,
        engine: MockAnalysisEngine,
        clock: &ManualClock,
        config: Config,
    ) -> Orchestrator {
        let paths = config.state_paths(root);
        let clock: Arc<dyn Clock> = Arc::new(clock.clone());
        let cache =
            CacheStore::open_with_clock(&paths.cache_dir, config.cache.clone(), clock.clone())
                .unwrap();
        let state = ScanState::load(&paths.scan_state_file);
        Orchestrator::new(root, config, Box::new(engine), cache, state, clock).unwrap()
    }

    #[tokio::test]
    async fn test_first_run_is_full_and_second_is_cached() {
        let project = project();
        let clock = ManualClock::new(START);
        let mut engine = mock_engine();
        engine
            .expect_analyze()
            .withf(|targets: &[String]| targets == ["."])
            .times(1)
            .returning(|_| Ok(report(2)));
        let mut orchestrator = orchestrator(project.path(), engine, &clock);

        let first = orchestrator.run(false, false).await.unwrap();
        assert!(!first.from_cache);
        assert_eq!(first.plan.kind, PlanKind::Full);
        assert_eq!(first.plan.reason, PlanReason::NoPriorScan);
        assert_eq!(first.plan.changed_count, 5);
        assert_eq!(first.detection_mode, DetectionMode::Snapshot);

        clock.advance(60);
        let second = orchestrator.run(false, false).await.unwrap();
        assert!(second.from_cache);
        assert_eq!(second.findings, first.findings);
        assert_eq!(second.plan.fingerprint, first.plan.fingerprint);

        let state = orchestrator.state();
        assert_eq!(state.history.len(), 2);
        assert!(state.history[1].from_cache);
        assert_eq!(state.last_full_scan_at, Some(START));
    }

    #[tokio::test]
    async fn test_state_survives_new_process() {
        let project = project();
        let clock = ManualClock::new(START);

        let mut engine = mock_engine();
        engine.expect_analyze().times(1).returning(|_| Ok(report(1)));
        orchestrator(project.path(), engine, &clock)
            .run(false, false)
            .await
            .unwrap();

        let mut engine = mock_engine();
        engine.expect_analyze().never();
        let outcome = orchestrator(project.path(), engine, &clock)
            .run(false, false)
            .await
            .unwrap();
        assert!(outcome.from_cache);
        assert_eq!(outcome.findings.len(), 1);
    }

    #[tokio::test]
    async fn test_small_change_runs_incremental() {
        let project = project();
        let root = project.path();
        let clock = ManualClock::new(START);

        let mut seq = Sequence::new();
        let mut engine = mock_engine();
        engine
            .expect_analyze()
            .withf(|targets: &[String]| targets == ["."])
            .times(1)
            .in_sequence(&mut seq)
            .returning(|_| Ok(report(0)));
        engine
            .expect_analyze()
            .withf(|targets: &[String]| {
                targets
                    == [
                        "app",
                        "app/views.py",
                        "templates",
                        "templates/a.html",
                        "templates/b.html",
                        "templates/base.html",
                        "templates/partials",
                        "templates/partials/nav.html",
                    ]
            })
            .times(1)
            .in_sequence(&mut seq)
            .returning(|_| Ok(report(1)));
        let mut orchestrator = orchestrator(root, engine, &clock);
        orchestrator.run(false, false).await.unwrap();

        clock.advance(60 * 60);
        write(root, "templates/base.html", "<html>changed</html>");
        write(root, "templates/partials/nav.html", "<nav>changed</nav>");
        write(root, "app/views.py", "def index(): return 1");

        let outcome = orchestrator.run(false, false).await.unwrap();
        assert!(!outcome.from_cache);
        assert_eq!(outcome.plan.kind, PlanKind::Incremental);
        assert_eq!(outcome.plan.changed_count, 3);
        assert_eq!(outcome.plan.affected_count, 5);
        assert_eq!(orchestrator.state().last_full_scan_at, Some(START));
    }

    #[tokio::test]
    async fn test_engine_failure_leaves_state_untouched() {
        let project = project();
        let root = project.path();
        let clock = ManualClock::new(START);

        let mut seq = Sequence::new();
        let mut engine = mock_engine();
        engine
            .expect_analyze()
            .withf(|targets: &[String]| targets == ["."])
            .times(1)
            .in_sequence(&mut seq)
            .returning(|_| Ok(report(1)));
        engine
            .expect_analyze()
            .times(1)
            .in_sequence(&mut seq)
            .returning(|_| {
                Err(ScanError::EngineInvocationFailed(
                    "semgrep timed out after 600 seconds".to_string(),
                ))
            });
        let mut orchestrator = orchestrator(root, engine, &clock);
        orchestrator.run(false, false).await.unwrap();

        let entries_before = orchestrator.cache().list(None);
        let state_before = orchestrator.state().clone();
        let snapshot_file = root.join(".incscan/file-snapshot.json");
        let snapshot_before = fs::read_to_string(&snapshot_file).unwrap();

        write(root, "templates/a.html", "changed");
        let err = orchestrator.run(false, false).await.unwrap_err();

        assert!(matches!(
            err.downcast_ref::<ScanError>(),
            Some(ScanError::EngineInvocationFailed(_))
        ));
        assert_eq!(orchestrator.cache().list(None), entries_before);
        assert_eq!(orchestrator.state(), &state_before);
        assert_eq!(fs::read_to_string(&snapshot_file).unwrap(), snapshot_before);
        assert_eq!(ScanState::load(&root.join(".incscan/scan-state.json")), state_before);
    }

    #[tokio::test]
    async fn test_rejected_cache_write_still_returns_findings() {
        let project = project();
        let clock = ManualClock::new(START);
        let mut config = Config::default();
        config.cache.max_cache_size_bytes = 40;

        let mut engine = mock_engine();
        engine.expect_analyze().times(2).returning(|_| Ok(report(20)));
        let mut orchestrator = orchestrator_with(project.path(), engine, &clock, config);

        let first = orchestrator.run(false, false).await.unwrap();
        assert_eq!(first.findings.len(), 20);

        // Nothing was cached, so the unchanged tree is scanned again
        let second = orchestrator.run(false, false).await.unwrap();
        assert!(!second.from_cache);
        assert_eq!(second.plan.reason, PlanReason::UnchangedTree);
    }

    #[tokio::test]
    async fn test_config_change_forces_full() {
        let project = project();
        let root = project.path();
        let clock = ManualClock::new(START);

        let mut engine = mock_engine();
        engine.expect_analyze().times(2).returning(|_| Ok(report(0)));
        let mut orchestrator = orchestrator(root, engine, &clock);
        orchestrator.run(false, false).await.unwrap();

        write(root, "rules.yml", "rules: [new]");
        let outcome = orchestrator.run(false, false).await.unwrap();
        assert!(!outcome.from_cache);
        assert_eq!(outcome.plan.reason, PlanReason::InputsChanged);
    }

    #[tokio::test]
    async fn test_plan_is_a_dry_run() {
        let project = project();
        let clock = ManualClock::new(START);
        let mut engine = mock_engine();
        engine.expect_analyze().never();
        let mut orchestrator = orchestrator(project.path(), engine, &clock);

        let plan = orchestrator.plan(false, false).await.unwrap();
        assert_eq!(plan.kind, PlanKind::Full);
        assert!(!plan.fingerprint.is_empty());
        assert!(orchestrator.state().history.is_empty());
        assert!(!project.path().join(".incscan/file-snapshot.json").exists());
    }

    #[tokio::test]
    async fn test_force_full_overrides_incremental() {
        let project = project();
        let root = project.path();
        let clock = ManualClock::new(START);

        let mut engine = mock_engine();
        engine.expect_analyze().times(2).returning(|_| Ok(report(0)));
        let mut orchestrator = orchestrator(root, engine, &clock);
        orchestrator.run(false, false).await.unwrap();

        write(root, "app/views.py", "changed");
        let outcome = orchestrator.run(false, true).await.unwrap();
        assert_eq!(outcome.plan.kind, PlanKind::Full);
        assert_eq!(outcome.plan.reason, PlanReason::ForcedFull);
        assert_eq!(outcome.plan.changed_count, 1);
    }

    #[tokio::test]
    async fn test_vcs_dirty_tree_second_run_is_cached() {
        let (project, _repo) = git_project();
        let root = project.path();
        let clock = ManualClock::new(START);
        write(root, "templates/a.html", "uncommitted");

        let mut engine = mock_engine();
        engine
            .expect_analyze()
            .withf(|targets: &[String]| targets == ["."])
            .times(1)
            .returning(|_| Ok(report(1)));
        let mut orchestrator = orchestrator(root, engine, &clock);

        let first = orchestrator.run(true, false).await.unwrap();
        assert_eq!(first.detection_mode, DetectionMode::Vcs);
        assert_eq!(first.plan.kind, PlanKind::Full);
        assert_eq!(first.plan.changed_count, 1);

        clock.advance(60);
        let second = orchestrator.run(true, false).await.unwrap();
        assert_eq!(second.detection_mode, DetectionMode::Vcs);
        assert!(second.from_cache);
        assert_eq!(second.plan.fingerprint, first.plan.fingerprint);
        assert_eq!(second.findings, first.findings);
    }

    #[tokio::test]
    async fn test_vcs_incremental_after_committed_base() {
        let (project, repo) = git_project();
        let root = project.path();
        let clock = ManualClock::new(START);

        let mut seq = Sequence::new();
        let mut engine = mock_engine();
        engine
            .expect_analyze()
            .withf(|targets: &[String]| targets == ["."])
            .times(1)
            .in_sequence(&mut seq)
            .returning(|_| Ok(report(0)));
        engine
            .expect_analyze()
            .withf(|targets: &[String]| {
                targets
                    == [
                        "templates",
                        "templates/b.html",
                        "templates/partials",
                        "templates/partials/nav.html",
                    ]
            })
            .times(1)
            .in_sequence(&mut seq)
            .returning(|_| Ok(report(1)));
        let mut orchestrator = orchestrator(root, engine, &clock);

        let first = orchestrator.run(true, false).await.unwrap();
        assert_eq!(first.detection_mode, DetectionMode::Vcs);
        assert_eq!(first.plan.reason, PlanReason::NoPriorScan);

        clock.advance(60 * 60);
        write(root, "templates/partials/nav.html", "<nav>changed</nav>");
        let second = orchestrator.run(true, false).await.unwrap();
        assert_eq!(second.detection_mode, DetectionMode::Vcs);
        assert_eq!(second.plan.kind, PlanKind::Incremental);
        assert_eq!(second.plan.changed_count, 1);

        // Committing the scanned edit changes nothing the engine would see
        commit_all(&repo, "nav");
        let third = orchestrator.run(true, false).await.unwrap();
        assert!(third.from_cache);
        assert_eq!(third.plan.kind, PlanKind::Incremental);
    }
}
