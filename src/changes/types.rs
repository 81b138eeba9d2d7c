use serde::{Deserialize, Serialize};
use std::fmt;

/// Kind of filesystem change
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ChangeKind {
    Added,
    Modified,
    Deleted,
    Renamed,
}

impl fmt::Display for ChangeKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            ChangeKind::Added => "added",
            ChangeKind::Modified => "modified",
            ChangeKind::Deleted => "deleted",
            ChangeKind::Renamed => "renamed",
        };
        f.write_str(label)
    }
}

/// One detected change, relative to the project root
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChangeRecord {
    pub path: String,
    pub kind: ChangeKind,
    /// Previous location, only for renames
    #[serde(skip_serializing_if = "Option::is_none")]
    pub old_path: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub hash_before: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub hash_after: Option<String>,
    pub size_bytes: u64,
    pub detected_at: u64,
}

impl ChangeRecord {
    pub fn new(path: impl Into<String>, kind: ChangeKind, detected_at: u64) -> Self {
        Self {
            path: path.into(),
            kind,
            old_path: None,
            hash_before: None,
            hash_after: None,
            size_bytes: 0,
            detected_at,
        }
    }

    /// Whether the file still exists after this change
    pub fn is_present(&self) -> bool {
        self.kind != ChangeKind::Deleted
    }

    /// Every path this change touches: the path itself and a rename source
    pub fn touched_paths(&self) -> impl Iterator<Item = &str> {
        std::iter::once(self.path.as_str()).chain(self.old_path.as_deref())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_touched_paths_include_rename_source() {
        let mut record = ChangeRecord::new("templates/new.html", ChangeKind::Renamed, 0);
        record.old_path = Some("templates/old.html".to_string());

        let touched: Vec<&str> = record.touched_paths().collect();
        assert_eq!(touched, vec!["templates/new.html", "templates/old.html"]);
        assert!(record.is_present());
    }

    #[test]
    fn test_serializes_kind_in_snake_case() {
        let record = ChangeRecord::new("a.py", ChangeKind::Deleted, 5);
        let json = serde_json::to_string(&record).unwrap();
        assert!(json.contains("\"kind\":\"deleted\""));
        assert!(!json.contains("old_path"));
        assert!(!record.is_present());
    }
}
