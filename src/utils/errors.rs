use thiserror::Error;

/// Main error type for incscan
///
/// Only `EngineInvocationFailed` is fatal for a scan run. The other
/// domain variants are produced internally and handled where they occur:
/// change detection falls back to snapshot mode, unreadable files are
/// scanned without dependencies, corrupt cache entries become misses and
/// oversized cache writes are dropped.
#[derive(Error, Debug)]
pub enum ScanError {
    #[error("Change detection unavailable: {0}")]
    ChangeDetectionUnavailable(String),

    #[error("Dependency analysis skipped for {path}: {reason}")]
    DependencyAnalysisSkipped { path: String, reason: String },

    #[error("Cache corruption in entry {key}: {reason}")]
    CacheCorruption { key: String, reason: String },

    #[error("Cache capacity exceeded: entry needs {needed} bytes, capacity is {capacity} bytes")]
    CacheCapacityExceeded { needed: u64, capacity: u64 },

    #[error("Engine invocation failed: {0}")]
    EngineInvocationFailed(String),

    #[error("Configuration error: {0}")]
    ConfigError(String),

    #[error("Serialization error: {0}")]
    SerializationError(String),

    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),

    #[error("Git error: {0}")]
    GitError(#[from] git2::Error),
}

impl ScanError {
    /// Whether the error aborts the current scan run
    pub fn is_fatal(&self) -> bool {
        matches!(self, ScanError::EngineInvocationFailed(_))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_only_engine_failures_are_fatal() {
        assert!(ScanError::EngineInvocationFailed("timed out".to_string()).is_fatal());
        assert!(!ScanError::ChangeDetectionUnavailable("no repo".to_string()).is_fatal());
        assert!(!ScanError::CacheCapacityExceeded {
            needed: 10,
            capacity: 5
        }
        .is_fatal());
    }

    #[test]
    fn test_error_messages_carry_context() {
        let err = ScanError::CacheCorruption {
            key: "scan_result_0123456789abcdef".to_string(),
            reason: "payload file missing".to_string(),
        };
        let msg = err.to_string();
        assert!(msg.contains("scan_result_0123456789abcdef"));
        assert!(msg.contains("payload file missing"));

        let err = ScanError::DependencyAnalysisSkipped {
            path: "templates/base.html".to_string(),
            reason: "stream did not contain valid UTF-8".to_string(),
        };
        assert!(err.to_string().contains("templates/base.html"));
    }
}
