use async_trait::async_trait;
use std::path::{Path, PathBuf};
use std::process::{Output, Stdio};
use std::time::Duration;
use tokio::process::Command;
use tokio::time::timeout;
use tracing::{debug, info};

use super::findings::{parse_engine_output, EngineReport};
use crate::app::EngineConfig;
use crate::constants::{ENGINE_STDERR_TAIL_CHARS, ENGINE_VERSION_TIMEOUT_SECS};
use crate::utils::ScanError;

/// Identity of an engine setup, as far as it affects results
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EngineDescriptor {
    pub program: String,
    /// Rule configuration path or registry name
    pub config_path: String,
    pub flags: Vec<String>,
}

/// The external static-analysis engine
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait AnalysisEngine: Send + Sync {
    /// Program, configuration and flags used for every run
    fn descriptor(&self) -> EngineDescriptor;

    /// Version string reported by the engine
    async fn version(&self) -> Result<String, ScanError>;

    /// Analyze `targets` (paths relative to the project root)
    ///
    /// Any failure, including a timeout or output that is not a report,
    /// is `EngineInvocationFailed`; it is never an empty report.
    async fn analyze(&self, targets: &[String]) -> Result<EngineReport, ScanError>;
}

/// Engine run as a child process with a hard timeout
#[derive(Debug, Clone)]
pub struct ExternalEngine {
    root: PathBuf,
    program: String,
    args: Vec<String>,
    version_args: Vec<String>,
    config_path: String,
    timeout: Duration,
}

impl ExternalEngine {
    pub fn new(root: &Path, config: &EngineConfig) -> Self {
        Self {
            root: root.to_path_buf(),
            program: config.program.clone(),
            args: config.args.clone(),
            version_args: config.version_args.clone(),
            config_path: config.config_path.clone(),
            timeout: Duration::from_secs(config.timeout_seconds),
        }
    }

    /// Locate the executable: a path (relative to the root) or a `PATH` lookup
    fn resolve_program(&self) -> Result<PathBuf, ScanError> {
        let candidate = Path::new(&self.program);
        if candidate.components().count() > 1 {
            let path = self.root.join(candidate);
            return if path.exists() {
                Ok(path)
            } else {
                Err(ScanError::EngineInvocationFailed(format!(
                    "engine not found at {}",
                    path.display()
                )))
            };
        }
        which::which(&self.program).map_err(|e| {
            ScanError::EngineInvocationFailed(format!(
                "engine '{}' not found in PATH: {}",
                self.program, e
            ))
        })
    }

    async fn run(&self, args: &[String], limit: Duration) -> Result<Output, ScanError> {
        let program = self.resolve_program()?;

        let mut cmd = Command::new(&program);
        cmd.args(args)
            .current_dir(&self.root)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);

        debug!("Running {} {}", program.display(), args.join(" "));
        let child = cmd.spawn().map_err(|e| {
            ScanError::EngineInvocationFailed(format!(
                "failed to start {}: {}",
                program.display(),
                e
            ))
        })?;

        // Dropping the child on timeout kills it
        match timeout(limit, child.wait_with_output()).await {
            Ok(Ok(output)) => Ok(output),
            Ok(Err(e)) => Err(ScanError::EngineInvocationFailed(format!(
                "failed waiting for {}: {}",
                self.program, e
            ))),
            Err(_) => Err(ScanError::EngineInvocationFailed(format!(
                "{} timed out after {} seconds",
                self.program,
                limit.as_secs()
            ))),
        }
    }
}

#[async_trait]
impl AnalysisEngine for ExternalEngine {
    fn descriptor(&self) -> EngineDescriptor {
        EngineDescriptor {
            program: self.program.clone(),
            config_path: self.config_path.clone(),
            flags: self.args.clone(),
        }
    }

    async fn version(&self) -> Result<String, ScanError> {
        let output = self
            .run(&self.version_args, Duration::from_secs(ENGINE_VERSION_TIMEOUT_SECS))
            .await?;

        if !output.status.success() {
            return Err(ScanError::EngineInvocationFailed(format!(
                "{} version query exited with {}: {}",
                self.program,
                exit_code(&output),
                stderr_tail(&output)
            )));
        }

        let stdout = String::from_utf8_lossy(&output.stdout);
        stdout
            .lines()
            .map(str::trim)
            .find(|line| !line.is_empty())
            .map(str::to_string)
            .ok_or_else(|| {
                ScanError::EngineInvocationFailed(format!("{} printed no version", self.program))
            })
    }

    async fn analyze(&self, targets: &[String]) -> Result<EngineReport, ScanError> {
        let mut args = self.args.clone();
        args.push("--config".to_string());
        args.push(self.config_path.clone());
        args.extend(targets.iter().cloned());

        info!("Running {} on {} targets", self.program, targets.len());
        let output = self.run(&args, self.timeout).await?;
        let stdout = String::from_utf8_lossy(&output.stdout);

        let report = parse_engine_output(&stdout).map_err(|e| {
            ScanError::EngineInvocationFailed(format!(
                "{} exited with {} and {}; stderr: {}",
                self.program,
                exit_code(&output),
                e,
                stderr_tail(&output)
            ))
        })?;

        if report.has_fatal_errors() {
            let messages: Vec<&str> = report.fatal_errors().map(|e| e.message.as_str()).collect();
            return Err(ScanError::EngineInvocationFailed(format!(
                "{} reported errors: {}",
                self.program,
                messages.join("; ")
            )));
        }

        if !output.status.success() {
            debug!(
                "{} exited with {} but produced a valid report; treating as findings present",
                self.program,
                exit_code(&output)
            );
        }
        Ok(report)
    }
}

fn exit_code(output: &Output) -> String {
    output
        .status
        .code()
        .map(|c| format!("exit code {}", c))
        .unwrap_or_else(|| "a signal".to_string())
}

/// Last few thousand characters of stderr
fn stderr_tail(output: &Output) -> String {
    let stderr = String::from_utf8_lossy(&output.stderr);
    let stderr = stderr.trim();
    let count = stderr.chars().count();
    if count <= ENGINE_STDERR_TAIL_CHARS {
        return stderr.to_string();
    }
    stderr.chars().skip(count - ENGINE_STDERR_TAIL_CHARS).collect()
}
