use clap::{Parser, Subcommand};
use std::path::PathBuf;

#[derive(Parser, Debug)]
#[command(name = "incscan")]
#[command(version = "0.1.0")]
#[command(about = "Incremental scan planner and result cache for static analysis engines", long_about = None)]
pub struct Cli {
    /// Path to configuration file
    #[arg(short, long, global = true, env = "INCSCAN_CONFIG")]
    pub config: Option<PathBuf>,

    /// Verbose output
    #[arg(short, long, global = true)]
    pub verbose: bool,

    /// Project directory (defaults to current directory)
    #[arg(short, long, global = true)]
    pub path: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Plan a scan, reuse a cached result or run the engine
    Scan {
        /// Detect changes from the file snapshot instead of git
        #[arg(long)]
        no_vcs: bool,

        /// Scan the whole tree regardless of policy
        #[arg(long)]
        full: bool,

        /// Print the outcome as JSON
        #[arg(long)]
        json: bool,
    },
    /// Show the plan a scan would use, without running the engine
    Plan {
        /// Detect changes from the file snapshot instead of git
        #[arg(long)]
        no_vcs: bool,

        /// Scan the whole tree regardless of policy
        #[arg(long)]
        full: bool,
    },
    /// Show recent scans and per-kind performance
    History {
        /// Number of scans to show
        #[arg(short, long, default_value_t = 10)]
        limit: usize,
    },
    /// Inspect or maintain the result cache
    Cache {
        #[command(subcommand)]
        action: CacheCommand,
    },
    /// Write a default project configuration
    Init,
}

#[derive(Subcommand, Debug)]
pub enum CacheCommand {
    /// Show cache statistics
    Stats,
    /// List entries, oldest first
    List {
        /// Only entries of this type (e.g. scan_result)
        #[arg(short = 't', long = "type")]
        entry_type: Option<String>,
    },
    /// Remove expired entries
    Cleanup,
    /// Remove every entry
    Clear,
    /// Remove entries by type and key pattern
    Invalidate {
        /// Only entries of this type
        #[arg(short = 't', long = "type")]
        entry_type: Option<String>,

        /// Substring of the entry key
        #[arg(long)]
        pattern: Option<String>,
    },
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parses_scan_flags() {
        let cli = Cli::try_parse_from(["incscan", "scan", "--no-vcs", "--json"]).unwrap();
        match cli.command {
            Commands::Scan { no_vcs, full, json } => {
                assert!(no_vcs);
                assert!(!full);
                assert!(json);
            }
            other => panic!("unexpected command: {:?}", other),
        }
    }

    #[test]
    fn test_global_path_after_subcommand() {
        let cli = Cli::try_parse_from(["incscan", "plan", "--path", "/repo", "-v"]).unwrap();
        assert_eq!(cli.path, Some(PathBuf::from("/repo")));
        assert!(cli.verbose);
    }

    #[test]
    fn test_parses_cache_invalidate() {
        let cli = Cli::try_parse_from([
            "incscan",
            "cache",
            "invalidate",
            "--type",
            "scan_result",
            "--pattern",
            "scan_result_*",
        ])
        .unwrap();
        match cli.command {
            Commands::Cache {
                action: CacheCommand::Invalidate { entry_type, pattern },
            } => {
                assert_eq!(entry_type.as_deref(), Some("scan_result"));
                assert_eq!(pattern.as_deref(), Some("scan_result_*"));
            }
            other => panic!("unexpected command: {:?}", other),
        }
    }

    #[test]
    fn test_subcommand_required() {
        assert!(Cli::try_parse_from(["incscan"]).is_err());
    }
}
