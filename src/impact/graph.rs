use petgraph::graph::{DiGraph, NodeIndex};
use petgraph::Direction;
use std::collections::{BTreeSet, HashMap, HashSet, VecDeque};

use super::directives::DirectiveKind;

/// File reference graph; an edge `a -> b` means `a` refers to `b`
#[derive(Debug, Default)]
pub struct ReferenceGraph {
    graph: DiGraph<String, DirectiveKind>,
    file_indices: HashMap<String, NodeIndex>,
}

impl ReferenceGraph {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a file node, returning the existing one if present
    pub fn add_file(&mut self, path: &str) -> NodeIndex {
        if let Some(&index) = self.file_indices.get(path) {
            return index;
        }
        let index = self.graph.add_node(path.to_string());
        self.file_indices.insert(path.to_string(), index);
        index
    }

    /// Record that `from` refers to `to`; self and duplicate edges are skipped
    pub fn add_reference(&mut self, from: &str, to: &str, kind: DirectiveKind) {
        if from == to {
            return;
        }
        let from_index = self.add_file(from);
        let to_index = self.add_file(to);
        if self.graph.find_edge(from_index, to_index).is_none() {
            self.graph.add_edge(from_index, to_index, kind);
        }
    }

    pub fn file_count(&self) -> usize {
        self.graph.node_count()
    }

    pub fn reference_count(&self) -> usize {
        self.graph.edge_count()
    }

    /// Files within `depth` hops of `path` in one direction, excluding `path`
    pub fn reachable(&self, path: &str, direction: Direction, depth: usize) -> BTreeSet<String> {
        let mut found = BTreeSet::new();
        let Some(&start) = self.file_indices.get(path) else {
            return found;
        };

        let mut seen = HashSet::from([start]);
        let mut queue = VecDeque::from([(start, 0usize)]);
        while let Some((node, hops)) = queue.pop_front() {
            if hops == depth {
                continue;
            }
            for next in self.graph.neighbors_directed(node, direction) {
                if !seen.insert(next) {
                    continue;
                }
                found.insert(self.graph[next].clone());
                queue.push_back((next, hops + 1));
            }
        }
        found
    }
}
