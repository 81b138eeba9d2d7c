use git2::{Delta, DiffFindOptions, DiffOptions, Repository, Status, StatusOptions};
use std::fs;
use std::path::{Path, PathBuf};

use super::types::ChangeKind;
use crate::utils::{relative_to, ScanError};

/// A path reported by git, relative to the project root
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VcsChange {
    pub path: String,
    pub kind: ChangeKind,
    pub old_path: Option<String>,
}

/// Git repository containing the project root
pub struct VcsRepository {
    repo: Repository,
    /// Project root relative to the repository workdir, `None` when equal
    prefix: Option<String>,
}

impl std::fmt::Debug for VcsRepository {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("VcsRepository")
            .field("workdir", &self.repo.workdir())
            .field("prefix", &self.prefix)
            .finish()
    }
}

impl VcsRepository {
    /// Find the repository that contains `project_root`
    pub fn discover(project_root: &Path) -> Result<Self, ScanError> {
        let repo = Repository::discover(project_root).map_err(|e| {
            ScanError::ChangeDetectionUnavailable(format!(
                "no git repository at {}: {}",
                project_root.display(),
                e.message()
            ))
        })?;

        let workdir = repo
            .workdir()
            .ok_or_else(|| {
                ScanError::ChangeDetectionUnavailable("bare repository has no working tree".into())
            })?
            .to_path_buf();

        let workdir = canonical(&workdir)?;
        let root = canonical(project_root)?;
        if !root.starts_with(&workdir) {
            return Err(ScanError::ChangeDetectionUnavailable(format!(
                "{} is outside the repository working tree",
                root.display()
            )));
        }

        Ok(Self {
            repo,
            prefix: relative_to(&workdir, &root),
        })
    }

    /// Changed paths: working tree and index against `HEAD`, or against
    /// `base_ref` when given
    pub fn changes(&self, base_ref: Option<&str>) -> Result<Vec<VcsChange>, ScanError> {
        let mut changes = match base_ref {
            Some(base) => self.diff_against(base)?,
            None => self.status()?,
        };
        changes.sort_by(|a, b| a.path.cmp(&b.path));
        changes.dedup_by(|a, b| a.path == b.path);
        Ok(changes)
    }

    fn status(&self) -> Result<Vec<VcsChange>, ScanError> {
        let mut options = StatusOptions::new();
        options
            .include_untracked(true)
            .recurse_untracked_dirs(true)
            .include_ignored(false)
            .renames_head_to_index(true)
            .renames_index_to_workdir(true);

        let statuses = self.repo.statuses(Some(&mut options))?;
        let mut changes = Vec::new();

        for entry in statuses.iter() {
            let status = entry.status();
            let Some(kind) = classify_status(status) else {
                continue;
            };

            let (path, old_path) = if kind == ChangeKind::Renamed {
                let delta = entry.head_to_index().or_else(|| entry.index_to_workdir());
                let new_path = delta
                    .as_ref()
                    .and_then(|d| d.new_file().path())
                    .and_then(|p| p.to_str())
                    .map(str::to_string);
                let old_path = delta
                    .as_ref()
                    .and_then(|d| d.old_file().path())
                    .and_then(|p| p.to_str())
                    .map(str::to_string);
                (new_path.or_else(|| entry.path().map(str::to_string)), old_path)
            } else {
                (entry.path().map(str::to_string), None)
            };

            if let Some(change) = path.and_then(|p| self.scoped(p, kind, old_path)) {
                changes.push(change);
            }
        }
        Ok(changes)
    }

    fn diff_against(&self, base: &str) -> Result<Vec<VcsChange>, ScanError> {
        let tree = self.repo.revparse_single(base)?.peel_to_tree()?;

        let mut options = DiffOptions::new();
        options.include_untracked(true).recurse_untracked_dirs(true);
        let mut diff = self
            .repo
            .diff_tree_to_workdir_with_index(Some(&tree), Some(&mut options))?;
        diff.find_similar(Some(DiffFindOptions::new().renames(true)))?;

        let mut changes = Vec::new();
        for delta in diff.deltas() {
            let kind = match delta.status() {
                Delta::Added | Delta::Untracked | Delta::Copied => ChangeKind::Added,
                Delta::Modified | Delta::Typechange | Delta::Conflicted => ChangeKind::Modified,
                Delta::Deleted => ChangeKind::Deleted,
                Delta::Renamed => ChangeKind::Renamed,
                _ => continue,
            };

            let file = if kind == ChangeKind::Deleted {
                delta.old_file()
            } else {
                delta.new_file()
            };
            let Some(path) = file.path().and_then(|p| p.to_str()) else {
                continue;
            };
            let old_path = (kind == ChangeKind::Renamed)
                .then(|| delta.old_file().path().and_then(|p| p.to_str()))
                .flatten()
                .map(str::to_string);

            if let Some(change) = self.scoped(path.to_string(), kind, old_path) {
                changes.push(change);
            }
        }
        Ok(changes)
    }

    /// Re-base a workdir path onto the project root, dropping outside paths
    fn scoped(&self, path: String, kind: ChangeKind, old_path: Option<String>) -> Option<VcsChange> {
        let strip = |p: String| -> Option<String> {
            match &self.prefix {
                None => Some(p),
                Some(prefix) => p
                    .strip_prefix(prefix.as_str())
                    .and_then(|rest| rest.strip_prefix('/'))
                    .map(str::to_string),
            }
        };

        let path = strip(path)?;
        let old_path = old_path.and_then(strip);
        // A rename from outside the project is an addition to it
        let kind = if kind == ChangeKind::Renamed && old_path.is_none() {
            ChangeKind::Added
        } else {
            kind
        };
        Some(VcsChange {
            path,
            kind,
            old_path,
        })
    }
}

/// Net change of a path relative to `HEAD`
fn classify_status(status: Status) -> Option<ChangeKind> {
    if status.is_ignored() {
        return None;
    }
    if status.is_wt_deleted() {
        // Staged as new, then removed from disk: never existed in HEAD
        return (!status.is_index_new()).then_some(ChangeKind::Deleted);
    }
    if status.is_index_deleted() && !status.is_wt_new() {
        return Some(ChangeKind::Deleted);
    }
    if status.is_index_renamed() || status.is_wt_renamed() {
        return Some(ChangeKind::Renamed);
    }
    if status.is_index_new() || status.is_wt_new() {
        return Some(if status.is_index_deleted() {
            ChangeKind::Modified
        } else {
            ChangeKind::Added
        });
    }
    if status.is_index_modified()
        || status.is_wt_modified()
        || status.is_index_typechange()
        || status.is_wt_typechange()
        || status.is_conflicted()
    {
        return Some(ChangeKind::Modified);
    }
    None
}

fn canonical(path: &Path) -> Result<PathBuf, ScanError> {
    fs::canonicalize(path).map_err(|e| {
        ScanError::ChangeDetectionUnavailable(format!("cannot resolve {}: {}", path.display(), e))
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use git2::Signature;
    use pretty_assertions::assert_eq;
    use tempfile::TempDir;

    fn commit_all(repo: &Repository, message: &str) {
        let mut index = repo.index().unwrap();
        index
            .add_all(["*"].iter(), git2::IndexAddOption::DEFAULT, None)
            .unwrap();
        index.update_all(["*"].iter(), None).unwrap();
        index.write().unwrap();

        let tree_id = index.write_tree().unwrap();
        let tree = repo.find_tree(tree_id).unwrap();
        let signature = Signature::now("Test", "test@example.com").unwrap();
        let parent = repo.head().ok().and_then(|h| h.peel_to_commit().ok());
        let parents: Vec<&git2::Commit> = parent.iter().collect();
        repo.commit(Some("HEAD"), &signature, &signature, message, &tree, &parents)
            .unwrap();
    }

    #[test]
    fn test_status_reports_working_tree_changes() {
        let temp_dir = TempDir::new().unwrap();
        let root = temp_dir.path();
        let repo = Repository::init(root).unwrap();

        fs::write(root.join("keep.html"), "keep").unwrap();
        fs::write(root.join("edit.html"), "before").unwrap();
        fs::write(root.join("drop.html"), "drop").unwrap();
        commit_all(&repo, "initial");

        fs::write(root.join("edit.html"), "after").unwrap();
        fs::remove_file(root.join("drop.html")).unwrap();
        fs::write(root.join("new.html"), "new").unwrap();

        let vcs = VcsRepository::discover(root).unwrap();
        let changes: Vec<(String, ChangeKind)> = vcs
            .changes(None)
            .unwrap()
            .into_iter()
            .map(|c| (c.path, c.kind))
            .collect();

        assert_eq!(
            changes,
            vec![
                ("drop.html".to_string(), ChangeKind::Deleted),
                ("edit.html".to_string(), ChangeKind::Modified),
                ("new.html".to_string(), ChangeKind::Added),
            ]
        );
    }

    #[test]
    fn test_paths_are_relative_to_project_subdir() {
        let temp_dir = TempDir::new().unwrap();
        let root = temp_dir.path();
        let repo = Repository::init(root).unwrap();

        fs::create_dir_all(root.join("site/templates")).unwrap();
        fs::write(root.join("site/templates/a.html"), "a").unwrap();
        fs::write(root.join("other.html"), "x").unwrap();
        commit_all(&repo, "initial");

        fs::write(root.join("site/templates/a.html"), "changed").unwrap();
        fs::write(root.join("other.html"), "changed").unwrap();

        let vcs = VcsRepository::discover(&root.join("site")).unwrap();
        let changes = vcs.changes(None).unwrap();
        assert_eq!(changes.len(), 1);
        assert_eq!(changes[0].path, "templates/a.html");
    }

    #[test]
    fn test_diff_against_base_ref() {
        let temp_dir = TempDir::new().unwrap();
        let root = temp_dir.path();
        let repo = Repository::init(root).unwrap();

        fs::write(root.join("a.py"), "one").unwrap();
        commit_all(&repo, "first");
        let base = repo.head().unwrap().peel_to_commit().unwrap().id().to_string();

        fs::write(root.join("b.py"), "two").unwrap();
        commit_all(&repo, "second");

        let vcs = VcsRepository::discover(root).unwrap();
        assert!(vcs.changes(None).unwrap().is_empty());

        let changes = vcs.changes(Some(&base)).unwrap();
        assert_eq!(
            changes,
            vec![VcsChange {
                path: "b.py".to_string(),
                kind: ChangeKind::Added,
                old_path: None,
            }]
        );
    }

    #[test]
    fn test_classify_staged_then_deleted_is_ignored() {
        assert_eq!(classify_status(Status::INDEX_NEW | Status::WT_DELETED), None);
        assert_eq!(
            classify_status(Status::INDEX_NEW | Status::WT_MODIFIED),
            Some(ChangeKind::Added)
        );
        assert_eq!(classify_status(Status::WT_MODIFIED), Some(ChangeKind::Modified));
        assert_eq!(classify_status(Status::CURRENT), None);
    }
}
