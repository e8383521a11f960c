use std::collections::BTreeMap;
use std::path::PathBuf;

use crate::agents::AgentResult;
use crate::models::ecosystem::Ecosystem;
use crate::models::finding::Finding;
use crate::models::graph::DependencyGraph;
use crate::models::package::PackageRef;
use crate::models::reputation::ReputationRecord;
use crate::models::vulnerability::VulnerabilityRecord;
use crate::services::detector::DetectionOutcome;

/// Immutable snapshot handed to every agent, plus the append-only result map
/// that only the orchestrator writes.
///
/// Agents receive `&SharedContext` and can observe earlier stages' results
/// exactly as the orchestrator recorded them, never partial updates.
#[derive(Debug)]
pub struct SharedContext {
    /// Project name from the manifest (or the manifest file name)
    pub project_name: String,
    /// Analyzed project directory
    pub project_path: PathBuf,
    /// Ecosystem under analysis
    pub ecosystem: Ecosystem,
    /// Direct packages from the manifest
    pub direct_packages: Vec<PackageRef>,
    /// Every package discovered (direct + transitive), deduped by name
    pub packages: Vec<PackageRef>,
    /// npm lifecycle scripts (empty for Python projects)
    pub manifest_scripts: BTreeMap<String, String>,
    /// Rule-based findings produced before any agent ran
    pub initial_findings: Vec<Finding>,
    /// Transitive dependency graph
    pub dependency_graph: DependencyGraph,
    /// Rule-layer OSV results by package name
    pub vulnerabilities: BTreeMap<String, Vec<VulnerabilityRecord>>,
    /// Rule-layer reputation records by package name
    pub reputations: BTreeMap<String, ReputationRecord>,
    /// True when the rule layer skipped reputation for scale
    pub reputation_skipped: bool,
    /// True when the OSV client found itself offline
    pub osv_offline: bool,
    /// Append-only per-agent results, inserted in stage order
    agent_results: BTreeMap<String, AgentResult>,
    /// Stage order of insertion (BTreeMap keys sort alphabetically)
    result_order: Vec<String>,
}

impl SharedContext {
    /// Assemble the snapshot from the rule layer's outputs
    pub fn new(
        project_name: String,
        project_path: PathBuf,
        ecosystem: Ecosystem,
        direct_packages: Vec<PackageRef>,
        packages: Vec<PackageRef>,
        manifest_scripts: BTreeMap<String, String>,
        dependency_graph: DependencyGraph,
        detection: DetectionOutcome,
    ) -> Self {
        Self {
            project_name,
            project_path,
            ecosystem,
            direct_packages,
            packages,
            manifest_scripts,
            initial_findings: detection.findings,
            dependency_graph,
            vulnerabilities: detection.vulnerabilities,
            reputations: detection.reputations,
            reputation_skipped: detection.reputation_skipped,
            osv_offline: detection.osv_offline,
            agent_results: BTreeMap::new(),
            result_order: Vec::new(),
        }
    }

    /// Append one stage result. Orchestrator-only by construction: agents
    /// never hold a mutable reference.
    pub fn record_result(&mut self, result: AgentResult) {
        let name = result.agent_name.clone();
        if !self.agent_results.contains_key(&name) {
            self.result_order.push(name.clone());
        }
        self.agent_results.insert(name, result);
    }

    /// Look up one agent's result
    pub fn agent_result(&self, name: &str) -> Option<&AgentResult> {
        self.agent_results.get(name)
    }

    /// Results in the order stages recorded them
    pub fn results_in_order(&self) -> Vec<&AgentResult> {
        self.result_order
            .iter()
            .filter_map(|name| self.agent_results.get(name))
            .collect()
    }

    /// Number of recorded results
    pub fn result_count(&self) -> usize {
        self.agent_results.len()
    }

    /// Highest script complexity score attached to any rule-based finding
    pub fn max_script_complexity(&self) -> f64 {
        self.initial_findings
            .iter()
            .filter_map(|f| f.extra.get("script_complexity_score"))
            .filter_map(|v| v.as_f64())
            .fold(0.0, f64::max)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::agents::{AgentData, AgentStatus};

    fn empty_context() -> SharedContext {
        SharedContext::new(
            "demo".to_string(),
            PathBuf::from("/tmp/demo"),
            Ecosystem::Npm,
            Vec::new(),
            Vec::new(),
            BTreeMap::new(),
            DependencyGraph::new(),
            DetectionOutcome::default(),
        )
    }

    #[test]
    fn test_results_preserve_insertion_order() {
        let mut context = empty_context();
        context.record_result(AgentResult::success("vulnerability", AgentData::default(), 0.1));
        context.record_result(AgentResult::success("reputation", AgentData::default(), 0.1));
        context.record_result(AgentResult::success("code", AgentData::default(), 0.1));

        let names: Vec<&str> = context
            .results_in_order()
            .iter()
            .map(|r| r.agent_name.as_str())
            .collect();
        assert_eq!(names, vec!["vulnerability", "reputation", "code"]);
    }

    #[test]
    fn test_rerecord_replaces_without_duplicating_order() {
        let mut context = empty_context();
        context.record_result(AgentResult::success("vulnerability", AgentData::default(), 0.1));
        let mut second = AgentResult::success("vulnerability", AgentData::default(), 0.2);
        second.status = AgentStatus::Failed;
        context.record_result(second);

        assert_eq!(context.result_count(), 1);
        assert_eq!(
            context.agent_result("vulnerability").unwrap().status,
            AgentStatus::Failed
        );
    }

    #[test]
    fn test_max_script_complexity() {
        let mut context = empty_context();
        assert_eq!(context.max_script_complexity(), 0.0);

        let mut finding = crate::models::finding::Finding::rule_based(
            "demo",
            "0.0.0",
            Ecosystem::Npm,
            crate::models::finding::FindingType::MaliciousScript,
            crate::models::finding::Severity::High,
            0.9,
            "pattern_engine",
        );
        finding
            .extra
            .insert("script_complexity_score".to_string(), serde_json::json!(0.7));
        context.initial_findings.push(finding);

        assert_eq!(context.max_script_complexity(), 0.7);
    }
}
