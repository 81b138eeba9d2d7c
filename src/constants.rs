/// Constants module to avoid magic numbers in the codebase

// State directory layout
pub const STATE_DIR_NAME: &str = ".incscan";
pub const CACHE_DIR_NAME: &str = "cache";
pub const PAYLOAD_DIR_NAME: &str = "payloads";
pub const PAYLOAD_EXTENSION: &str = "bin";
pub const CACHE_METADATA_FILE: &str = "cache_metadata.json";
pub const CACHE_STATS_FILE: &str = "cache_stats.json";
pub const FILE_SNAPSHOT_FILE: &str = "file-snapshot.json";
pub const SCAN_STATE_FILE: &str = "scan-state.json";
pub const LOCAL_CONFIG_FILE: &str = "config.toml";

// Cache entry types
pub const ENTRY_TYPE_SCAN_RESULT: &str = "scan_result";
pub const ENTRY_TYPE_ENGINE_VERSION: &str = "engine_version";
pub const ENTRY_TYPE_RULE_COMPILATION: &str = "rule_compilation";

// Cache sizing and lifetimes
pub const CACHE_KEY_HASH_LEN: usize = 16;
pub const DEFAULT_MAX_CACHE_SIZE_BYTES: u64 = 256 * 1024 * 1024; // 256MB
pub const DEFAULT_TTL_SECS: u64 = 60 * 60;
pub const SCAN_RESULT_TTL_SECS: u64 = 60 * 60;
pub const ENGINE_VERSION_TTL_SECS: u64 = 24 * 60 * 60;
pub const RULE_COMPILATION_TTL_SECS: u64 = 7 * 24 * 60 * 60;

// Scan policy
pub const DEFAULT_CHANGE_COUNT_THRESHOLD: usize = 50;
pub const DEFAULT_FULL_SCAN_MAX_AGE_SECS: u64 = 24 * 60 * 60;
pub const DEFAULT_HISTORY_LIMIT: usize = 100;
pub const DEFAULT_IMPACT_DEPTH: usize = 1;
pub const FULL_SCAN_TARGET: &str = ".";

// Analysis engine
pub const DEFAULT_ENGINE_PROGRAM: &str = "semgrep";
pub const DEFAULT_ENGINE_CONFIG: &str = ".semgrep.yml";
pub const DEFAULT_ENGINE_TIMEOUT_SECS: u64 = 600;
pub const ENGINE_VERSION_TIMEOUT_SECS: u64 = 30;
pub const ENGINE_STDERR_TAIL_CHARS: usize = 2000;

/// Process exit code when findings of severity error were reported
pub const FINDINGS_EXIT_CODE: i32 = 1;
/// Process exit code when the engine run itself failed
pub const SCAN_FAILED_EXIT_CODE: i32 = 2;

// Build manifests, root configuration and environment bootstrap files
pub const DEFAULT_CRITICAL_FILE_PATTERNS: &[&str] = &[
    "Cargo.toml",
    "package.json",
    "pyproject.toml",
    "setup.py",
    "setup.cfg",
    "requirements*.txt",
    "Pipfile",
    "go.mod",
    "pom.xml",
    "build.gradle",
    "Gemfile",
    "Makefile",
    "Dockerfile",
    ".env",
    ".env.*",
    "settings.py",
    "config.yaml",
    "config.yml",
];

// Files of the analyzed languages
pub const DEFAULT_INCLUDE_PATTERNS: &[&str] = &[
    "*.html",
    "*.htm",
    "*.jinja",
    "*.jinja2",
    "*.j2",
    "*.twig",
    "*.njk",
    "*.hbs",
    "*.py",
    "*.js",
    "*.ts",
    "*.c",
    "*.h",
    "*.cpp",
    "*.hpp",
];

// Directories never traversed
pub const DEFAULT_EXCLUDE_DIRS: &[&str] = &[
    ".git",
    ".svn",
    ".hg",
    STATE_DIR_NAME,
    "node_modules",
    "target",
    "dist",
    "build",
    "venv",
    ".venv",
    "__pycache__",
    ".pytest_cache",
    ".mypy_cache",
    ".tox",
    ".idea",
    ".vscode",
];

// Search roots for root-relative template references
pub const DEFAULT_TEMPLATE_DIRS: &[&str] = &["templates"];
