use anyhow::{Context, Result};
use directories::ProjectDirs;
use figment::{
    providers::{Env, Format, Serialized, Toml},
    Figment,
};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use crate::constants::{
    CACHE_DIR_NAME, DEFAULT_CHANGE_COUNT_THRESHOLD, DEFAULT_CRITICAL_FILE_PATTERNS,
    DEFAULT_ENGINE_CONFIG, DEFAULT_ENGINE_PROGRAM, DEFAULT_ENGINE_TIMEOUT_SECS,
    DEFAULT_EXCLUDE_DIRS, DEFAULT_FULL_SCAN_MAX_AGE_SECS, DEFAULT_HISTORY_LIMIT,
    DEFAULT_IMPACT_DEPTH, DEFAULT_INCLUDE_PATTERNS, DEFAULT_MAX_CACHE_SIZE_BYTES,
    DEFAULT_TEMPLATE_DIRS, DEFAULT_TTL_SECS, ENGINE_VERSION_TTL_SECS, ENTRY_TYPE_ENGINE_VERSION,
    ENTRY_TYPE_RULE_COMPILATION, ENTRY_TYPE_SCAN_RESULT, FILE_SNAPSHOT_FILE, LOCAL_CONFIG_FILE,
    RULE_COMPILATION_TTL_SECS, SCAN_RESULT_TTL_SECS, SCAN_STATE_FILE, STATE_DIR_NAME,
};

/// Main configuration structure
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    /// Result cache configuration
    #[serde(default)]
    pub cache: CacheConfig,

    /// Full vs. incremental decision thresholds
    #[serde(default)]
    pub policy: PolicyConfig,

    /// Tree walking and impact analysis
    #[serde(default)]
    pub scan: ScanConfig,

    /// External analysis engine
    #[serde(default)]
    pub engine: EngineConfig,

    /// State directory (defaults to `<project>/.incscan`)
    #[serde(default)]
    pub state_dir: Option<PathBuf>,
}

/// Cache configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CacheConfig {
    /// Upper bound on the summed size of all payload files
    pub max_cache_size_bytes: u64,
    /// TTL for entry types missing from `ttl_by_entry_type`
    pub default_ttl_seconds: u64,
    /// Per entry type TTL in seconds
    pub ttl_by_entry_type: BTreeMap<String, u64>,
}

impl Default for CacheConfig {
    fn default() -> Self {
        let mut ttl_by_entry_type = BTreeMap::new();
        ttl_by_entry_type.insert(ENTRY_TYPE_SCAN_RESULT.to_string(), SCAN_RESULT_TTL_SECS);
        ttl_by_entry_type.insert(ENTRY_TYPE_ENGINE_VERSION.to_string(), ENGINE_VERSION_TTL_SECS);
        ttl_by_entry_type.insert(
            ENTRY_TYPE_RULE_COMPILATION.to_string(),
            RULE_COMPILATION_TTL_SECS,
        );

        Self {
            max_cache_size_bytes: DEFAULT_MAX_CACHE_SIZE_BYTES,
            default_ttl_seconds: DEFAULT_TTL_SECS,
            ttl_by_entry_type,
        }
    }
}

impl CacheConfig {
    /// TTL in seconds for an entry type
    pub fn ttl_for(&self, entry_type: &str) -> u64 {
        self.ttl_by_entry_type
            .get(entry_type)
            .copied()
            .unwrap_or(self.default_ttl_seconds)
    }
}

/// Scan policy configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PolicyConfig {
    /// Changing any matching file forces a full scan
    pub critical_file_patterns: Vec<String>,
    /// More changed files than this forces a full scan
    pub change_count_full_scan_threshold: usize,
    /// A full scan older than this forces a full scan
    pub full_scan_max_age_seconds: u64,
}

impl Default for PolicyConfig {
    fn default() -> Self {
        Self {
            critical_file_patterns: to_strings(DEFAULT_CRITICAL_FILE_PATTERNS),
            change_count_full_scan_threshold: DEFAULT_CHANGE_COUNT_THRESHOLD,
            full_scan_max_age_seconds: DEFAULT_FULL_SCAN_MAX_AGE_SECS,
        }
    }
}

/// Tree walking and impact analysis configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ScanConfig {
    /// Files of the analyzed languages
    pub include_patterns: Vec<String>,
    /// Directory names never traversed
    pub exclude_dirs: Vec<String>,
    /// Extra roots for resolving root-relative template references
    pub template_dirs: Vec<String>,
    /// Reference hops followed from each changed file
    pub impact_depth: usize,
    /// Compare against this ref instead of HEAD in VCS mode
    pub vcs_base_ref: Option<String>,
    /// Scan history records kept
    pub history_limit: usize,
}

impl Default for ScanConfig {
    fn default() -> Self {
        Self {
            include_patterns: to_strings(DEFAULT_INCLUDE_PATTERNS),
            exclude_dirs: to_strings(DEFAULT_EXCLUDE_DIRS),
            template_dirs: to_strings(DEFAULT_TEMPLATE_DIRS),
            impact_depth: DEFAULT_IMPACT_DEPTH,
            vcs_base_ref: None,
            history_limit: DEFAULT_HISTORY_LIMIT,
        }
    }
}

/// External analysis engine configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    /// Executable name or path
    pub program: String,
    /// Arguments placed before `--config <path>` and the targets
    pub args: Vec<String>,
    /// Arguments that make the engine print its version
    pub version_args: Vec<String>,
    /// Rule configuration, relative to the project root or a registry name
    pub config_path: String,
    /// Hard limit for one engine invocation
    pub timeout_seconds: u64,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            program: DEFAULT_ENGINE_PROGRAM.to_string(),
            args: to_strings(&["scan", "--json", "--quiet"]),
            version_args: to_strings(&["--version"]),
            config_path: DEFAULT_ENGINE_CONFIG.to_string(),
            timeout_seconds: DEFAULT_ENGINE_TIMEOUT_SECS,
        }
    }
}

/// Locations of the persisted state for one project
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StatePaths {
    pub state_dir: PathBuf,
    pub cache_dir: PathBuf,
    pub snapshot_file: PathBuf,
    pub scan_state_file: PathBuf,
}

impl Config {
    /// Resolve the state directory layout for a project root
    pub fn state_paths(&self, project_root: &Path) -> StatePaths {
        let state_dir = match &self.state_dir {
            Some(dir) if dir.is_absolute() => dir.clone(),
            Some(dir) => project_root.join(dir),
            None => project_root.join(STATE_DIR_NAME),
        };

        StatePaths {
            cache_dir: state_dir.join(CACHE_DIR_NAME),
            snapshot_file: state_dir.join(FILE_SNAPSHOT_FILE),
            scan_state_file: state_dir.join(SCAN_STATE_FILE),
            state_dir,
        }
    }
}

fn to_strings(values: &[&str]) -> Vec<String> {
    values.iter().map(|v| v.to_string()).collect()
}

/// Load configuration from multiple sources
///
/// Defaults, then the global config, then `<project>/.incscan/config.toml`,
/// then `INCSCAN_` environment variables (`__` separates nested keys).
pub fn load_config(project_root: &Path) -> Result<Config> {
    let global_config = get_config_dir()?.join(LOCAL_CONFIG_FILE);
    let local_config = project_root.join(STATE_DIR_NAME).join(LOCAL_CONFIG_FILE);

    let mut figment = Figment::from(Serialized::defaults(Config::default()));

    if global_config.exists() {
        figment = figment.merge(Toml::file(&global_config));
    }

    if local_config.exists() {
        figment = figment.merge(Toml::file(&local_config));
    }

    figment = figment.merge(Env::prefixed("INCSCAN_").split("__"));

    figment
        .extract()
        .context("Failed to load configuration")
}

/// Load configuration from an explicit file, layered over the defaults
pub fn load_config_file(path: &Path) -> Result<Config> {
    if !path.exists() {
        anyhow::bail!("Configuration file not found: {}", path.display());
    }

    Figment::from(Serialized::defaults(Config::default()))
        .merge(Toml::file(path))
        .merge(Env::prefixed("INCSCAN_").split("__"))
        .extract()
        .with_context(|| format!("Failed to load configuration from {}", path.display()))
}

/// Get the configuration directory
pub fn get_config_dir() -> Result<PathBuf> {
    if let Some(proj_dirs) = ProjectDirs::from("", "", "incscan") {
        Ok(proj_dirs.config_dir().to_path_buf())
    } else {
        // Fallback to home directory
        let home = std::env::var("HOME")
            .or_else(|_| std::env::var("USERPROFILE"))
            .context("Could not determine home directory")?;
        Ok(PathBuf::from(home).join(".config").join("incscan"))
    }
}

/// Save configuration to file
pub fn save_config(config: &Config, path: &Path) -> Result<()> {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)?;
    }

    let toml_string = toml::to_string_pretty(config)?;
    std::fs::write(path, toml_string)
        .with_context(|| format!("Failed to write config to {}", path.display()))?;

    Ok(())
}

/// Create `<project>/.incscan/config.toml` with the defaults if missing
///
/// Returns the path and whether a new file was written.
pub fn init_config(project_root: &Path) -> Result<(PathBuf, bool)> {
    let config_file = project_root.join(STATE_DIR_NAME).join(LOCAL_CONFIG_FILE);

    if config_file.exists() {
        return Ok((config_file, false));
    }

    save_config(&Config::default(), &config_file)?;
    Ok((config_file, true))
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_defaults() {
        let config = Config::default();
        assert_eq!(config.policy.change_count_full_scan_threshold, 50);
        assert_eq!(config.policy.full_scan_max_age_seconds, 86_400);
        assert_eq!(config.scan.impact_depth, 1);
        assert_eq!(config.scan.history_limit, 100);
        assert!(config
            .policy
            .critical_file_patterns
            .contains(&"Cargo.toml".to_string()));
    }

    #[test]
    fn test_ttl_for_entry_types() {
        let cache = CacheConfig::default();
        assert_eq!(cache.ttl_for(ENTRY_TYPE_SCAN_RESULT), SCAN_RESULT_TTL_SECS);
        assert_eq!(
            cache.ttl_for(ENTRY_TYPE_RULE_COMPILATION),
            RULE_COMPILATION_TTL_SECS
        );
        assert!(cache.ttl_for(ENTRY_TYPE_RULE_COMPILATION) > cache.ttl_for(ENTRY_TYPE_SCAN_RESULT));
        assert_eq!(cache.ttl_for("something_else"), DEFAULT_TTL_SECS);
    }

    #[test]
    fn test_state_paths() {
        let root = Path::new("/repo");
        let paths = Config::default().state_paths(root);
        assert_eq!(paths.state_dir, PathBuf::from("/repo/.incscan"));
        assert_eq!(paths.cache_dir, PathBuf::from("/repo/.incscan/cache"));
        assert_eq!(
            paths.snapshot_file,
            PathBuf::from("/repo/.incscan/file-snapshot.json")
        );
        assert_eq!(
            paths.scan_state_file,
            PathBuf::from("/repo/.incscan/scan-state.json")
        );

        let config = Config {
            state_dir: Some(PathBuf::from("/var/cache/incscan")),
            ..Config::default()
        };
        assert_eq!(
            config.state_paths(root).cache_dir,
            PathBuf::from("/var/cache/incscan/cache")
        );
    }

    #[test]
    fn test_partial_file_keeps_defaults() {
        let temp_dir = TempDir::new().unwrap();
        let path = temp_dir.path().join("config.toml");
        std::fs::write(
            &path,
            "[policy]\nchange_count_full_scan_threshold = 10\n\n[cache.ttl_by_entry_type]\nscan_result = 60\n",
        )
        .unwrap();

        let config = load_config_file(&path).unwrap();
        assert_eq!(config.policy.change_count_full_scan_threshold, 10);
        assert_eq!(config.policy.full_scan_max_age_seconds, 86_400);
        assert_eq!(config.cache.ttl_for(ENTRY_TYPE_SCAN_RESULT), 60);
        assert_eq!(config.engine.program, "semgrep");
    }

    #[test]
    fn test_init_config_writes_once() {
        let temp_dir = TempDir::new().unwrap();
        let (path, created) = init_config(temp_dir.path()).unwrap();
        assert!(created);
        assert!(path.exists());

        let (_, created_again) = init_config(temp_dir.path()).unwrap();
        assert!(!created_again);

        let loaded = load_config_file(&path).unwrap();
        assert_eq!(loaded.scan.impact_depth, DEFAULT_IMPACT_DEPTH);
    }
}
