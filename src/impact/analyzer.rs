use petgraph::Direction;
use rayon::prelude::*;
use std::collections::{BTreeSet, HashSet};
use std::fs;
use std::path::{Path, PathBuf};
use tracing::{debug, info};

use super::directives::{Directive, DirectiveScanner, RegexDirectiveScanner};
use super::graph::ReferenceGraph;
use crate::app::ScanConfig;
use crate::changes::{ChangeRecord, FileSnapshot};
use crate::utils::{extension, normalize, parent_dir, ScanError};

/// Expands a change set to the files that depend on it
pub struct ImpactAnalyzer {
    root: PathBuf,
    scanner: Box<dyn DirectiveScanner>,
    template_dirs: Vec<String>,
    depth: usize,
}

impl std::fmt::Debug for ImpactAnalyzer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ImpactAnalyzer")
            .field("root", &self.root)
            .field("template_dirs", &self.template_dirs)
            .field("depth", &self.depth)
            .finish()
    }
}

/// Paths a reference may resolve to beyond the current tree
struct KnownPaths<'a> {
    universe: &'a FileSnapshot,
    removed: HashSet<&'a str>,
}

impl ImpactAnalyzer {
    pub fn new(root: &Path, config: &ScanConfig) -> Self {
        Self::with_scanner(root, config, Box::new(RegexDirectiveScanner))
    }

    pub fn with_scanner(root: &Path, config: &ScanConfig, scanner: Box<dyn DirectiveScanner>) -> Self {
        Self {
            root: root.to_path_buf(),
            scanner,
            template_dirs: config.template_dirs.clone(),
            depth: config.impact_depth,
        }
    }

    /// Changed paths plus their dependencies and dependents
    ///
    /// `universe` is the current tracked tree. Dependencies come from
    /// changed files that still exist; dependents are files whose
    /// references resolve to any changed path, including deleted ones and
    /// rename sources. Each direction is followed `impact_depth` hops.
    pub fn analyze_impact(&self, changes: &[ChangeRecord], universe: &FileSnapshot) -> BTreeSet<String> {
        let mut affected: BTreeSet<String> = changes.iter().map(|c| c.path.clone()).collect();
        if changes.is_empty() {
            return affected;
        }

        let graph = self.build_graph(changes, universe);

        for change in changes {
            for path in change.touched_paths() {
                affected.extend(graph.reachable(path, Direction::Incoming, self.depth));
            }
            if change.is_present() {
                affected.extend(graph.reachable(&change.path, Direction::Outgoing, self.depth));
            }
        }

        // Rename sources are gone from disk and were never scan targets
        for change in changes {
            if let Some(old_path) = &change.old_path {
                affected.remove(old_path);
            }
        }

        info!(
            "Impact analysis: {} changed, {} affected",
            changes.len(),
            affected.len()
        );
        affected
    }

    /// Reference graph over every file in `universe`
    pub fn build_graph(&self, changes: &[ChangeRecord], universe: &FileSnapshot) -> ReferenceGraph {
        let known = KnownPaths {
            universe,
            removed: changes
                .iter()
                .filter(|c| !c.is_present())
                .map(|c| c.path.as_str())
                .chain(changes.iter().filter_map(|c| c.old_path.as_deref()))
                .collect(),
        };

        let files: Vec<&str> = universe.paths().collect();
        let scanned: Vec<(&str, Vec<Directive>)> = files
            .par_iter()
            .filter_map(|&path| match self.directives_of(path) {
                Ok(directives) => Some((path, directives)),
                Err(err) => {
                    debug!("{}", err);
                    None
                }
            })
            .collect();

        let mut graph = ReferenceGraph::new();
        for path in &files {
            graph.add_file(path);
        }
        for (path, directives) in scanned {
            for directive in directives {
                if let Some(target) = self.resolve(path, &directive.target, &known) {
                    graph.add_reference(path, &target, directive.kind);
                }
            }
        }

        debug!(
            "Reference graph: {} files, {} references",
            graph.file_count(),
            graph.reference_count()
        );
        graph
    }

    fn directives_of(&self, rel_path: &str) -> Result<Vec<Directive>, ScanError> {
        let skipped = |reason: String| ScanError::DependencyAnalysisSkipped {
            path: rel_path.to_string(),
            reason,
        };
        let bytes = fs::read(self.root.join(rel_path)).map_err(|e| skipped(e.to_string()))?;
        let content = String::from_utf8(bytes).map_err(|_| skipped("not valid UTF-8".to_string()))?;
        Ok(self.scanner.scan(rel_path, &content))
    }

    /// Resolve a reference to a repository-relative path
    ///
    /// Tried in order: next to the referencing file, from the root, then
    /// under each template dir. An extensionless target is retried with
    /// the referencing file's extension (`{{> header}}` -> `header.hbs`).
    fn resolve(&self, from: &str, target: &str, known: &KnownPaths<'_>) -> Option<String> {
        let target = target.trim();
        if target.is_empty() || target.contains("://") {
            return None;
        }

        let mut bases: Vec<Option<&str>> = Vec::new();
        if !target.starts_with('/') {
            bases.push(parent_dir(from));
        }
        bases.push(None);
        bases.extend(self.template_dirs.iter().map(|d| Some(d.as_str())));

        let mut forms = vec![target.to_string()];
        if extension(target).is_none() {
            if let Some(ext) = extension(from) {
                forms.push(format!("{}.{}", target, ext));
            }
        }

        for base in bases {
            for form in &forms {
                let joined = match base {
                    Some(dir) => format!("{}/{}", dir, form),
                    None => form.clone(),
                };
                let Some(candidate) = normalize(&joined) else {
                    continue;
                };
                if candidate != from && self.is_known(&candidate, known) {
                    return Some(candidate);
                }
            }
        }
        None
    }

    fn is_known(&self, candidate: &str, known: &KnownPaths<'_>) -> bool {
        known.universe.contains(candidate)
            || known.removed.contains(candidate)
            || self.root.join(candidate).is_file()
    }
}
