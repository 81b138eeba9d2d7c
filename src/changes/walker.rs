use ignore::{DirEntry, WalkBuilder};
use rayon::prelude::*;
use std::path::{Path, PathBuf};
use tracing::{debug, warn};

use super::snapshot::{FileSnapshot, SnapshotEntry};
use crate::app::{PolicyConfig, ScanConfig};
use crate::utils::{metadata, relative_to, PathMatcher, ScanError};

/// Enumerates and hashes the files the scanner cares about
///
/// A file is tracked when it matches an include pattern or a critical file
/// pattern, and no directory on its path is excluded. Ignore files
/// (`.gitignore`, `.ignore`) are honoured even outside a git repository.
#[derive(Debug, Clone)]
pub struct TreeWalker {
    root: PathBuf,
    matcher: PathMatcher,
    exclude_dirs: Vec<String>,
}

impl TreeWalker {
    pub fn new(root: &Path, scan: &ScanConfig, policy: &PolicyConfig) -> Result<Self, ScanError> {
        let matcher = PathMatcher::new(&scan.include_patterns)?
            .union(PathMatcher::new(&policy.critical_file_patterns)?);
        Ok(Self {
            root: root.to_path_buf(),
            matcher,
            exclude_dirs: scan.exclude_dirs.clone(),
        })
    }

    /// Never descend into a directory with this name
    pub fn exclude_dir(&mut self, name: &str) {
        if !self.exclude_dirs.iter().any(|d| d == name) {
            self.exclude_dirs.push(name.to_string());
        }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Whether a repository-relative path would be picked up by a walk
    pub fn is_tracked(&self, rel_path: &str) -> bool {
        let mut segments: Vec<&str> = rel_path.split('/').collect();
        segments.pop();
        if segments
            .iter()
            .any(|segment| self.exclude_dirs.iter().any(|d| d == segment))
        {
            return false;
        }
        self.matcher.is_match(rel_path)
    }

    /// Sorted relative paths of every tracked file
    pub fn tracked_files(&self) -> Result<Vec<String>, ScanError> {
        let exclude_dirs = self.exclude_dirs.clone();

        let mut walker = WalkBuilder::new(&self.root);
        walker
            .standard_filters(true) // .gitignore, .ignore, hidden files...
            .hidden(false) // ...except that dotfiles like .env are wanted
            .parents(false)
            .require_git(false)
            .filter_entry(move |entry: &DirEntry| {
                if entry.depth() == 0 || !entry.file_type().is_some_and(|ft| ft.is_dir()) {
                    return true;
                }
                let name = entry.file_name().to_string_lossy();
                !exclude_dirs.iter().any(|d| *d == name)
            });

        let mut files = Vec::new();
        for result in walker.build() {
            let entry = match result {
                Ok(entry) => entry,
                Err(err) => {
                    warn!("Skipping unreadable entry: {}", err);
                    continue;
                }
            };
            if !entry.file_type().is_some_and(|ft| ft.is_file()) {
                continue;
            }

            let Some(rel_path) = relative_to(&self.root, entry.path()) else {
                debug!("Skipping non UTF-8 path {}", entry.path().display());
                continue;
            };
            if self.matcher.is_match(&rel_path) {
                files.push(rel_path);
            }
        }

        files.sort();
        Ok(files)
    }

    /// Hash every tracked file into a snapshot
    pub fn snapshot(&self) -> Result<FileSnapshot, ScanError> {
        let files = self.tracked_files()?;

        let entries: Vec<(String, SnapshotEntry)> = files
            .into_par_iter()
            .map(|rel_path| {
                let meta = metadata(&self.root.join(&rel_path));
                let entry = SnapshotEntry {
                    hash: meta.hash,
                    size_bytes: meta.size_bytes,
                    modified_at: meta.modified_at,
                };
                (rel_path, entry)
            })
            .collect();

        debug!("Hashed {} tracked files under {}", entries.len(), self.root.display());
        Ok(FileSnapshot {
            files: entries.into_iter().collect(),
        })
    }
}
