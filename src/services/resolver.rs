use std::collections::{BTreeMap, HashMap, HashSet, VecDeque};
use std::sync::Arc;
use tracing::{debug, warn};

use crate::models::ecosystem::Ecosystem;
use crate::models::finding::Severity;
use crate::models::graph::{
    CircularDependency, DependencyGraph, DependencyNode, DiscoverySource, VersionConflict,
};
use crate::models::manifest::Manifest;
use crate::models::package::PackageRef;
use crate::services::registry_client::{RegistryClient, RegistryError};

/// Builds the transitive dependency graph by breadth-first expansion against
/// the registry, detecting cycles and version conflicts along the way.
///
/// Registry failures for a single node never abort the build; the node is
/// marked partial and traversal continues on its siblings.
#[derive(Debug)]
pub struct DependencyResolver {
    registry: Arc<RegistryClient>,
    /// Expansion depth bound (root packages are depth 0)
    max_depth: usize,
}

/// One queued expansion step
#[derive(Debug)]
struct WorkItem {
    package: PackageRef,
    depth: usize,
    parent_key: Option<String>,
    /// Package names from the root to (and including) this package
    root_path: Vec<String>,
}

impl DependencyResolver {
    pub fn new(registry: Arc<RegistryClient>) -> Self {
        Self {
            registry,
            max_depth: 5,
        }
    }

    /// Override the expansion depth bound
    pub fn with_max_depth(mut self, max_depth: usize) -> Self {
        self.max_depth = max_depth;
        self
    }

    /// Expand a manifest's direct packages into a dependency graph
    pub async fn build_graph(&self, manifest: &Manifest) -> DependencyGraph {
        let mut graph = DependencyGraph::new();
        let mut visited: HashSet<(Ecosystem, String)> = HashSet::new();
        let mut key_by_name: HashMap<(Ecosystem, String), String> = HashMap::new();
        // Every declared (name, spec) observation with the path that declared
        // it; feeds conflict detection after expansion
        let mut spec_observations: BTreeMap<(Ecosystem, String), BTreeMap<String, Vec<Vec<String>>>> =
            BTreeMap::new();

        let mut queue: VecDeque<WorkItem> = manifest
            .packages
            .iter()
            .map(|package| WorkItem {
                package: package.clone(),
                depth: 0,
                parent_key: None,
                root_path: vec![package.name.clone()],
            })
            .collect();

        while let Some(item) = queue.pop_front() {
            let name_key = (item.package.ecosystem, item.package.name.clone());

            spec_observations
                .entry(name_key.clone())
                .or_default()
                .entry(item.package.version_spec.clone())
                .or_default()
                .push(item.root_path.clone());

            if visited.contains(&name_key) {
                // Revisit: only record the extra edge
                if let (Some(parent_key), Some(existing_key)) =
                    (&item.parent_key, key_by_name.get(&name_key))
                {
                    graph.add_edge(parent_key, &existing_key.clone());
                }
                continue;
            }
            visited.insert(name_key.clone());

            let discovered_from = if item.depth == 0 {
                DiscoverySource::Manifest
            } else {
                DiscoverySource::Registry
            };
            let mut node = DependencyNode::new(item.package.clone(), item.depth, discovered_from);

            // Expansion stops at the depth bound but the node itself is kept
            let expand = item.depth < self.max_depth;
            let children = if expand {
                match self
                    .registry
                    .fetch(item.package.ecosystem, &item.package.name, None)
                    .await
                {
                    Ok(metadata) => {
                        if let Some(version) = &metadata.version {
                            node.package.resolved_version = Some(version.clone());
                        }
                        metadata.dependencies
                    }
                    Err(RegistryError::NotFound(_)) => {
                        debug!("package {} not in registry, leaf node", item.package.name);
                        BTreeMap::new()
                    }
                    Err(err) => {
                        warn!(
                            "registry expansion failed for {}: {}; continuing without children",
                            item.package.name, err
                        );
                        node.partial_reason = Some(err.to_string());
                        BTreeMap::new()
                    }
                }
            } else {
                BTreeMap::new()
            };

            let node_key = graph.add_node(node);
            key_by_name.insert(name_key, node_key.clone());
            if item.depth == 0 {
                graph.roots.push(node_key.clone());
            }
            if let Some(parent_key) = &item.parent_key {
                graph.add_edge(parent_key, &node_key);
            }

            for (child_name, child_spec) in children {
                // A child already on this root path closes a cycle
                if let Some(position) = item.root_path.iter().position(|n| *n == child_name) {
                    let cycle: Vec<String> = item.root_path[position..].to_vec();
                    graph.add_cycle(CircularDependency {
                        cycle,
                        severity: Severity::Medium,
                    });
                    continue;
                }

                let mut child_path = item.root_path.clone();
                child_path.push(child_name.clone());
                queue.push_back(WorkItem {
                    package: PackageRef::production(
                        child_name,
                        child_spec,
                        item.package.ecosystem,
                    ),
                    depth: item.depth + 1,
                    parent_key: Some(node_key.clone()),
                    root_path: child_path,
                });
            }
        }

        graph.conflicts = build_conflicts(spec_observations);
        debug!(
            "dependency graph: {} nodes, {} cycles, {} conflicts, depth {}",
            graph.node_count(),
            graph.cycles.len(),
            graph.conflicts.len(),
            graph.max_depth_reached
        );
        graph
    }
}

/// Collapse spec observations into one conflict entry per package with ≥2
/// distinct specs
fn build_conflicts(
    observations: BTreeMap<(Ecosystem, String), BTreeMap<String, Vec<Vec<String>>>>,
) -> Vec<VersionConflict> {
    observations
        .into_iter()
        .filter(|(_, specs)| specs.len() >= 2)
        .map(|((_, name), specs)| {
            let conflicting_versions: Vec<String> = specs.keys().cloned().collect();
            let paths: Vec<Vec<String>> = specs.into_values().flatten().collect();
            VersionConflict {
                package: name,
                conflicting_versions,
                paths,
            }
        })
        .collect()
}
