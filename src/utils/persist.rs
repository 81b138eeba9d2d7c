use serde::{de::DeserializeOwned, Serialize};
use std::fs;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use tracing::warn;

use super::ScanError;

static TMP_COUNTER: AtomicU64 = AtomicU64::new(0);

/// Sibling temp path, unique per process and call
fn temp_path(path: &Path) -> PathBuf {
    let file_name = path
        .file_name()
        .map(|n| n.to_string_lossy().to_string())
        .unwrap_or_else(|| "state".to_string());
    let unique = TMP_COUNTER.fetch_add(1, Ordering::Relaxed);
    path.with_file_name(format!(".{}.{}.{}.tmp", file_name, std::process::id(), unique))
}

/// Write bytes by writing a temp file next to `path` and renaming it over
///
/// Readers in other processes see either the old or the new content,
/// never a half-written file.
pub fn write_atomic(path: &Path, bytes: &[u8]) -> Result<(), ScanError> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)?;
    }

    let tmp_path = temp_path(path);
    if let Err(err) = fs::write(&tmp_path, bytes) {
        let _ = fs::remove_file(&tmp_path);
        return Err(err.into());
    }
    if let Err(err) = fs::rename(&tmp_path, path) {
        let _ = fs::remove_file(&tmp_path);
        return Err(err.into());
    }
    Ok(())
}

/// Serialize `value` as pretty JSON and write it atomically
pub fn write_json_atomic<T: Serialize>(path: &Path, value: &T) -> Result<(), ScanError> {
    let json = serde_json::to_vec_pretty(value)
        .map_err(|e| ScanError::SerializationError(e.to_string()))?;
    write_atomic(path, &json)
}

/// Load JSON state, falling back to the default on a missing or corrupt file
pub fn read_json_or_default<T: DeserializeOwned + Default>(path: &Path) -> T {
    match fs::read(path) {
        Ok(bytes) => match serde_json::from_slice(&bytes) {
            Ok(value) => value,
            Err(e) => {
                warn!(
                    "Ignoring corrupt state file {}: {}. Starting from empty state.",
                    path.display(),
                    e
                );
                T::default()
            }
        },
        Err(e) if e.kind() == ErrorKind::NotFound => T::default(),
        Err(e) => {
            warn!("Could not read {}: {}. Starting from empty state.", path.display(), e);
            T::default()
        }
    }
}
