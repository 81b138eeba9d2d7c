use ignore::WalkBuilder;
use std::path::Path;

use super::plan::PlanKind;
use crate::utils::{digest_pairs, hash_file, hash_str, relative_to};

/// Everything besides the targets that can change the engine's output
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FingerprintInputs {
    /// See [`config_input_hash`]
    pub config_hash: String,
    /// Engine arguments, in invocation order
    pub tool_flags: Vec<String>,
    pub engine_version: String,
    /// Digest of every tracked `path -> content hash` pair
    pub tree_digest: String,
}

/// Stable cache fingerprint for a plan
///
/// Target order does not matter; every other input does.
pub fn compute_fingerprint(kind: PlanKind, targets: &[String], inputs: &FingerprintInputs) -> String {
    let mut sorted: Vec<&str> = targets.iter().map(String::as_str).collect();
    sorted.sort_unstable();
    sorted.dedup();
    let targets = sorted.join("\n");
    let flags = inputs.tool_flags.join("\u{1f}");

    digest_pairs([
        ("kind", kind.as_str()),
        ("targets", targets.as_str()),
        ("config", inputs.config_hash.as_str()),
        ("flags", flags.as_str()),
        ("engine_version", inputs.engine_version.as_str()),
        ("tree", inputs.tree_digest.as_str()),
    ])
}

/// Hash of the engine's rule configuration
///
/// A file is hashed by content and a directory by every file below it.
/// Anything else (a registry name such as `p/default`) is hashed as text.
pub fn config_input_hash(root: &Path, config_path: &str) -> String {
    let path = root.join(config_path);
    if path.is_file() {
        return hash_file(&path);
    }
    if path.is_dir() {
        let files: Vec<(String, String)> = WalkBuilder::new(&path)
            .standard_filters(false)
            .build()
            .filter_map(Result::ok)
            .filter(|entry| entry.file_type().is_some_and(|ft| ft.is_file()))
            .filter_map(|entry| {
                let rel = relative_to(&path, entry.path())?;
                Some((rel, hash_file(entry.path())))
            })
            .collect();
        return digest_pairs(files.iter().map(|(p, h)| (p.as_str(), h.as_str())));
    }
    hash_str(config_path)
}
