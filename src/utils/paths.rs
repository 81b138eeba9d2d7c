use glob::{MatchOptions, Pattern};
use std::path::{Component, Path};

use super::ScanError;

const MATCH_OPTIONS: MatchOptions = MatchOptions {
    case_sensitive: true,
    require_literal_separator: false,
    require_literal_leading_dot: false,
};

/// Glob matcher over repository-relative paths
///
/// A pattern matches when it matches either the whole relative path or
/// just the file name, so `Cargo.toml` also catches `crates/a/Cargo.toml`.
#[derive(Debug, Clone, Default)]
pub struct PathMatcher {
    patterns: Vec<Pattern>,
}

impl PathMatcher {
    pub fn new<S: AsRef<str>>(patterns: &[S]) -> Result<Self, ScanError> {
        let patterns = patterns
            .iter()
            .map(|p| {
                Pattern::new(p.as_ref()).map_err(|e| {
                    ScanError::ConfigError(format!("invalid pattern '{}': {}", p.as_ref(), e))
                })
            })
            .collect::<Result<Vec<_>, _>>()?;
        Ok(Self { patterns })
    }

    /// Combine two matchers into one that accepts either
    pub fn union(mut self, other: PathMatcher) -> Self {
        self.patterns.extend(other.patterns);
        self
    }

    pub fn is_match(&self, rel_path: &str) -> bool {
        let file_name = rel_path.rsplit('/').next().unwrap_or(rel_path);
        self.patterns.iter().any(|pattern| {
            pattern.matches_with(rel_path, MATCH_OPTIONS)
                || pattern.matches_with(file_name, MATCH_OPTIONS)
        })
    }

    pub fn is_empty(&self) -> bool {
        self.patterns.is_empty()
    }
}

/// Repository-relative, forward-slash form of `path`
pub fn relative_to(root: &Path, path: &Path) -> Option<String> {
    let relative = path.strip_prefix(root).ok()?;
    let mut parts = Vec::new();
    for component in relative.components() {
        match component {
            Component::Normal(part) => parts.push(part.to_str()?),
            Component::CurDir => {}
            _ => return None,
        }
    }
    if parts.is_empty() {
        None
    } else {
        Some(parts.join("/"))
    }
}

/// Collapse `.` and `..` segments; `None` when the path escapes the root
pub fn normalize(rel_path: &str) -> Option<String> {
    let mut parts: Vec<&str> = Vec::new();
    for segment in rel_path.split('/') {
        match segment {
            "" | "." => {}
            ".." => {
                parts.pop()?;
            }
            other => parts.push(other),
        }
    }
    if parts.is_empty() {
        None
    } else {
        Some(parts.join("/"))
    }
}

/// Containing directory of a relative path, `None` for files at the root
pub fn parent_dir(rel_path: &str) -> Option<&str> {
    rel_path
        .rsplit_once('/')
        .map(|(dir, _)| dir)
        .filter(|dir| !dir.is_empty())
}

/// Extension of the final path segment
pub fn extension(rel_path: &str) -> Option<&str> {
    let file_name = rel_path.rsplit('/').next()?;
    file_name
        .rsplit_once('.')
        .map(|(_, ext)| ext)
        .filter(|ext| !ext.is_empty())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::PathBuf;

    #[test]
    fn test_matcher_matches_path_or_file_name() {
        let matcher = PathMatcher::new(&["*.html", "Cargo.toml", "config/*.yaml"]).unwrap();
        assert!(matcher.is_match("index.html"));
        assert!(matcher.is_match("templates/partials/nav.html"));
        assert!(matcher.is_match("crates/core/Cargo.toml"));
        assert!(matcher.is_match("config/app.yaml"));
        assert!(!matcher.is_match("src/main.rs"));
        assert!(!matcher.is_match("Cargo.lock"));
    }

    #[test]
    fn test_matcher_rejects_invalid_pattern() {
        let err = PathMatcher::new(&["[unclosed"]).unwrap_err();
        assert!(matches!(err, ScanError::ConfigError(_)));
    }

    #[test]
    fn test_matcher_union() {
        let a = PathMatcher::new(&["*.html"]).unwrap();
        let b = PathMatcher::new(&["Makefile"]).unwrap();
        let both = a.union(b);
        assert!(both.is_match("a.html"));
        assert!(both.is_match("Makefile"));
        assert!(!PathMatcher::default().is_match("a.html"));
    }

    #[test]
    fn test_relative_to() {
        let root = PathBuf::from("/repo");
        assert_eq!(
            relative_to(&root, Path::new("/repo/templates/a.html")),
            Some("templates/a.html".to_string())
        );
        assert_eq!(relative_to(&root, Path::new("/repo")), None);
        assert_eq!(relative_to(&root, Path::new("/elsewhere/a.html")), None);
    }

    #[test]
    fn test_normalize() {
        assert_eq!(normalize("a/./b/../c.html"), Some("a/c.html".to_string()));
        assert_eq!(normalize("/templates/x.html"), Some("templates/x.html".to_string()));
        assert_eq!(normalize("../outside.html"), None);
        assert_eq!(normalize("."), None);
    }

    #[test]
    fn test_parent_dir_and_extension() {
        assert_eq!(parent_dir("templates/base.html"), Some("templates"));
        assert_eq!(parent_dir("a/b/c.h"), Some("a/b"));
        assert_eq!(parent_dir("index.html"), None);
        assert_eq!(extension("a/b/c.html"), Some("html"));
        assert_eq!(extension("a.d/Makefile"), None);
        assert_eq!(extension("partials/header"), None);
    }
}
