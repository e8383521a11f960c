use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use crate::models::finding::Severity;
use crate::models::package::PackageRef;

/// Where a dependency node was first discovered
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DiscoverySource {
    /// Declared directly in the project manifest
    Manifest,
    /// Found while expanding registry metadata
    Registry,
}

/// One node in the dependency graph
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DependencyNode {
    /// The package this node represents
    pub package: PackageRef,
    /// First depth at which BFS reached this node (root is 0)
    pub depth: usize,
    /// Node key of the first parent that reached this node (None for root)
    pub parent: Option<String>,
    /// Node keys of direct children
    pub children: BTreeSet<String>,
    /// Where the node was discovered
    pub discovered_from: DiscoverySource,
    /// Set when registry expansion for this node failed; the graph continues
    /// without its children
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub partial_reason: Option<String>,
}

impl DependencyNode {
    pub fn new(package: PackageRef, depth: usize, discovered_from: DiscoverySource) -> Self {
        Self {
            package,
            depth,
            parent: None,
            children: BTreeSet::new(),
            discovered_from,
            partial_reason: None,
        }
    }

    /// Node identity key
    pub fn key(&self) -> String {
        self.package.node_key()
    }
}

/// A dependency cycle, recorded once per distinct unordered node set
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CircularDependency {
    /// Package names along the cycle, in discovery order
    pub cycle: Vec<String>,
    /// Reporting severity for the cycle
    pub severity: Severity,
}

impl CircularDependency {
    /// Unordered identity of the cycle, used for deduplication
    pub fn unordered_key(&self) -> BTreeSet<String> {
        self.cycle.iter().cloned().collect()
    }
}

/// Two or more distinct version specs observed for the same package
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VersionConflict {
    /// Conflicting package name
    pub package: String,
    /// All distinct version specs observed
    pub conflicting_versions: Vec<String>,
    /// One dependency path (root-first package names) per observation
    pub paths: Vec<Vec<String>>,
}

/// Directed dependency graph built by BFS from a manifest's direct packages
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct DependencyGraph {
    /// Nodes keyed by `ecosystem:name@version`
    pub nodes: BTreeMap<String, DependencyNode>,
    /// Node keys of the manifest's direct packages (depth 0)
    pub roots: Vec<String>,
    /// Detected cycles, deduped by unordered node set
    pub cycles: Vec<CircularDependency>,
    /// Detected version conflicts
    pub conflicts: Vec<VersionConflict>,
    /// Deepest level reached during expansion
    pub max_depth_reached: usize,
}

impl DependencyGraph {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert a node, returning its key. Existing nodes keep their first
    /// (shallowest) depth.
    pub fn add_node(&mut self, node: DependencyNode) -> String {
        let key = node.key();
        self.max_depth_reached = self.max_depth_reached.max(node.depth);
        self.nodes.entry(key.clone()).or_insert(node);
        key
    }

    /// Record a parent → child edge. The child's parent pointer is only set
    /// on first assignment.
    pub fn add_edge(&mut self, parent_key: &str, child_key: &str) {
        if let Some(parent) = self.nodes.get_mut(parent_key) {
            parent.children.insert(child_key.to_string());
        }
        if let Some(child) = self.nodes.get_mut(child_key) {
            if child.parent.is_none() {
                child.parent = Some(parent_key.to_string());
            }
        }
    }

    /// Record a cycle unless an identical unordered node set is already known
    pub fn add_cycle(&mut self, cycle: CircularDependency) {
        let key = cycle.unordered_key();
        if !self.cycles.iter().any(|c| c.unordered_key() == key) {
            self.cycles.push(cycle);
        }
    }

    /// Number of nodes
    pub fn node_count(&self) -> usize {
        self.nodes.len()
    }

    /// Look up a node by key
    pub fn node(&self, key: &str) -> Option<&DependencyNode> {
        self.nodes.get(key)
    }

    /// Path of package names from a root to the given node, root-first
    pub fn path_to(&self, key: &str) -> Vec<String> {
        let mut path = Vec::new();
        let mut current = Some(key.to_string());
        while let Some(k) = current {
            if let Some(node) = self.nodes.get(&k) {
                path.push(node.package.name.clone());
                current = node.parent.clone();
            } else {
                break;
            }
        }
        path.reverse();
        path
    }

    /// Graph invariant check used by tests: every non-root node has a parent
    pub fn orphan_nodes(&self) -> Vec<&DependencyNode> {
        self.nodes
            .values()
            .filter(|n| n.depth > 0 && n.parent.is_none())
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::ecosystem::Ecosystem;

    fn node(name: &str, spec: &str, depth: usize) -> DependencyNode {
        DependencyNode::new(
            PackageRef::production(name.to_string(), spec.to_string(), Ecosystem::Npm),
            depth,
            if depth == 0 {
                DiscoverySource::Manifest
            } else {
                DiscoverySource::Registry
            },
        )
    }

    #[test]
    fn test_add_node_keeps_first_depth() {
        let mut graph = DependencyGraph::new();
        graph.add_node(node("a", "1.0.0", 1));
        graph.add_node(node("a", "1.0.0", 3));

        assert_eq!(graph.node_count(), 1);
        assert_eq!(graph.nodes["npm:a@1.0.0"].depth, 1);
        assert_eq!(graph.max_depth_reached, 3);
    }

    #[test]
    fn test_edges_and_parents() {
        let mut graph = DependencyGraph::new();
        let a = graph.add_node(node("a", "1.0.0", 0));
        let b = graph.add_node(node("b", "2.0.0", 1));
        graph.add_edge(&a, &b);

        assert!(graph.nodes[&a].children.contains(&b));
        assert_eq!(graph.nodes[&b].parent.as_deref(), Some(a.as_str()));
        assert!(graph.orphan_nodes().is_empty());
    }

    #[test]
    fn test_first_parent_wins() {
        let mut graph = DependencyGraph::new();
        let a = graph.add_node(node("a", "1.0.0", 0));
        let b = graph.add_node(node("b", "1.0.0", 0));
        let c = graph.add_node(node("c", "2.0.0", 1));
        graph.add_edge(&a, &c);
        graph.add_edge(&b, &c);

        assert_eq!(graph.nodes[&c].parent.as_deref(), Some(a.as_str()));
        assert!(graph.nodes[&b].children.contains(&c));
    }

    #[test]
    fn test_cycle_dedupe_by_unordered_set() {
        let mut graph = DependencyGraph::new();
        graph.add_cycle(CircularDependency {
            cycle: vec!["a".to_string(), "b".to_string()],
            severity: Severity::Medium,
        });
        graph.add_cycle(CircularDependency {
            cycle: vec!["b".to_string(), "a".to_string()],
            severity: Severity::Medium,
        });

        assert_eq!(graph.cycles.len(), 1);
    }

    #[test]
    fn test_path_to() {
        let mut graph = DependencyGraph::new();
        let a = graph.add_node(node("a", "1.0.0", 0));
        let b = graph.add_node(node("b", "1.0.0", 1));
        let c = graph.add_node(node("c", "1.0.0", 2));
        graph.add_edge(&a, &b);
        graph.add_edge(&b, &c);

        assert_eq!(graph.path_to(&c), vec!["a", "b", "c"]);
    }
}
