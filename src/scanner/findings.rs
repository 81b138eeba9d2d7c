use serde::{Deserialize, Serialize};
use std::fmt;

use crate::cache::CachePayload;
use crate::constants::{ENTRY_TYPE_ENGINE_VERSION, ENTRY_TYPE_SCAN_RESULT};
use crate::utils::ScanError;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    Error,
    Warning,
    Info,
}

impl Severity {
    /// Map an engine severity label; unknown labels are informational
    pub fn from_label(label: &str) -> Self {
        match label.to_ascii_uppercase().as_str() {
            "ERROR" | "HIGH" | "CRITICAL" => Severity::Error,
            "WARNING" | "WARN" | "MEDIUM" => Severity::Warning,
            _ => Severity::Info,
        }
    }
}

impl fmt::Display for Severity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            Severity::Error => "error",
            Severity::Warning => "warning",
            Severity::Info => "info",
        };
        f.write_str(label)
    }
}

/// One engine finding
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Finding {
    pub path: String,
    pub start_line: u64,
    pub end_line: u64,
    pub rule_id: String,
    pub message: String,
    pub severity: Severity,
}

/// Cached outcome of one engine run
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ScanResultPayload {
    pub findings: Vec<Finding>,
    /// Non-fatal engine diagnostics (e.g. a file it could not parse)
    pub warnings: Vec<String>,
    pub duration_ms: u64,
}

impl CachePayload for ScanResultPayload {
    const ENTRY_TYPE: &'static str = ENTRY_TYPE_SCAN_RESULT;
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EngineVersionPayload {
    pub version: String,
}

impl CachePayload for EngineVersionPayload {
    const ENTRY_TYPE: &'static str = ENTRY_TYPE_ENGINE_VERSION;
}

/// Parsed engine output
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct EngineReport {
    /// Sorted by path, line, rule
    pub findings: Vec<Finding>,
    pub errors: Vec<EngineDiagnostic>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EngineDiagnostic {
    pub level: String,
    pub message: String,
}

impl EngineDiagnostic {
    pub fn is_fatal(&self) -> bool {
        self.level.eq_ignore_ascii_case("error")
    }
}

impl EngineReport {
    pub fn fatal_errors(&self) -> impl Iterator<Item = &EngineDiagnostic> {
        self.errors.iter().filter(|e| e.is_fatal())
    }

    pub fn has_fatal_errors(&self) -> bool {
        self.fatal_errors().next().is_some()
    }

    pub fn warnings(&self) -> Vec<String> {
        self.errors
            .iter()
            .filter(|e| !e.is_fatal())
            .map(|e| e.message.clone())
            .collect()
    }
}

#[derive(Debug, Deserialize)]
struct RawOutput {
    results: Vec<RawResult>,
    #[serde(default)]
    errors: Vec<RawError>,
}

#[derive(Debug, Deserialize)]
struct RawResult {
    check_id: String,
    path: String,
    start: RawPosition,
    end: RawPosition,
    #[serde(default)]
    extra: RawExtra,
}

#[derive(Debug, Deserialize)]
struct RawPosition {
    line: u64,
}

#[derive(Debug, Default, Deserialize)]
struct RawExtra {
    #[serde(default)]
    message: String,
    #[serde(default)]
    severity: String,
}

#[derive(Debug, Deserialize)]
struct RawError {
    #[serde(default)]
    level: Option<String>,
    #[serde(default)]
    message: Option<String>,
    #[serde(default, rename = "type")]
    kind: Option<serde_json::Value>,
}

/// Parse the engine's JSON report
///
/// A document without a `results` array is not a report.
pub fn parse_engine_output(stdout: &str) -> Result<EngineReport, ScanError> {
    let raw: RawOutput = serde_json::from_str(stdout.trim())
        .map_err(|e| ScanError::SerializationError(format!("unparseable engine output: {}", e)))?;

    let mut findings: Vec<Finding> = raw
        .results
        .into_iter()
        .map(|r| Finding {
            path: r.path.strip_prefix("./").unwrap_or(&r.path).to_string(),
            start_line: r.start.line,
            end_line: r.end.line.max(r.start.line),
            rule_id: r.check_id,
            message: r.extra.message,
            severity: Severity::from_label(&r.extra.severity),
        })
        .collect();
    findings.sort_by(|a, b| {
        (&a.path, a.start_line, &a.rule_id).cmp(&(&b.path, b.start_line, &b.rule_id))
    });

    let errors = raw
        .errors
        .into_iter()
        .map(|e| EngineDiagnostic {
            level: e.level.unwrap_or_else(|| "error".to_string()),
            message: e
                .message
                .or_else(|| e.kind.map(|k| k.to_string()))
                .unwrap_or_else(|| "unknown engine error".to_string()),
        })
        .collect();

    Ok(EngineReport { findings, errors })
}
