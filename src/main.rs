use anyhow::{Context, Result};
use clap::Parser;
use colored::Colorize;

use incscan::{
    app::{load_config, load_config_file},
    cli::{handle_command, is_scan_failure, Cli},
    constants::SCAN_FAILED_EXIT_CODE,
    utils::init_logger,
};

#[tokio::main]
async fn main() -> Result<()> {
    // Parse CLI arguments
    let cli = Cli::parse();

    init_logger(cli.verbose);

    // Determine project path
    let project_path = cli.path.clone().unwrap_or_else(|| std::path::PathBuf::from("."));
    let root = project_path
        .canonicalize()
        .with_context(|| format!("Project directory not found: {}", project_path.display()))?;

    // Load configuration
    let config = match &cli.config {
        Some(config_path) => load_config_file(config_path)?,
        None => load_config(&root)?,
    };

    let code = match handle_command(&cli.command, &root, config).await {
        Ok(code) => code,
        Err(err) if is_scan_failure(&err) => {
            eprintln!("{} {:#}", "Scan failed:".red().bold(), err);
            SCAN_FAILED_EXIT_CODE
        }
        Err(err) => return Err(err),
    };

    // Exit with appropriate code
    if code != 0 {
        std::process::exit(code);
    }

    Ok(())
}
