/// CLI argument parsing and command handling - Gateway
mod args;
mod commands;

pub use args::{CacheCommand, Cli, Commands};
pub use commands::{handle_command, is_scan_failure};
