use async_trait::async_trait;
use std::collections::BTreeMap;
use std::path::PathBuf;
use std::time::Duration;

use depsentry::agents::orchestrator::{Orchestrator, RunInfo, StageSpec};
use depsentry::agents::{Agent, AgentData, AgentError, SharedContext};
use depsentry::models::ecosystem::Ecosystem;
use depsentry::models::finding::{Finding, FindingType, Severity};
use depsentry::models::graph::DependencyGraph;
use depsentry::services::cache::CacheStats;
use depsentry::services::detector::DetectionOutcome;

/// Always-succeeding stand-in agent
struct OkAgent(&'static str);

#[async_trait]
impl Agent for OkAgent {
    fn name(&self) -> &'static str {
        self.0
    }

    async fn analyze(&self, _context: &SharedContext) -> Result<AgentData, AgentError> {
        Ok(AgentData {
            data: serde_json::json!({"ok": true}),
            confidence: 0.9,
            packages_analyzed: 2,
            findings: Vec::new(),
        })
    }
}

fn stage(name: &'static str, required: bool) -> StageSpec {
    StageSpec {
        name,
        required,
        timeout: Duration::from_millis(500),
    }
}

fn finding(name: &str, severity: Severity, finding_type: FindingType) -> Finding {
    Finding::rule_based(name, "1.0.0", Ecosystem::Npm, finding_type, severity, 0.9, "test")
        .with_evidence("unit test evidence")
}

fn context_with_findings() -> SharedContext {
    let mut detection = DetectionOutcome::default();
    detection.findings = vec![
        finding("evil-pkg", Severity::Critical, FindingType::MaliciousPackage),
        finding("stale-pkg", Severity::High, FindingType::Vulnerability),
        finding("stale-pkg", Severity::Low, FindingType::LowReputation),
    ];

    SharedContext::new(
        "demo".to_string(),
        PathBuf::from("/tmp/demo"),
        Ecosystem::Npm,
        Vec::new(),
        Vec::new(),
        BTreeMap::new(),
        DependencyGraph::new(),
        detection,
    )
}

async fn composed_report() -> serde_json::Value {
    let mut orchestrator =
        Orchestrator::new().with_timing(Duration::from_secs(5), Duration::from_millis(5));
    orchestrator.register(stage("vulnerability", true), Box::new(OkAgent("vulnerability")));
    orchestrator.register(stage("reputation", true), Box::new(OkAgent("reputation")));
    orchestrator.register(stage("synthesis", true), Box::new(OkAgent("synthesis")));

    let mut context = context_with_findings();
    orchestrator.run(&mut context).await;

    let run = RunInfo {
        analysis_id: "schema-test".to_string(),
        target: "/tmp/demo".to_string(),
        input_mode: "local".to_string(),
        agent_analysis_enabled: false,
    };
    let report = orchestrator.compose_report(&context, &run, &CacheStats::default(), 0.5);
    serde_json::to_value(report).unwrap()
}

#[tokio::test]
async fn report_has_every_fixed_schema_section() {
    let report = composed_report().await;

    for key in [
        "metadata",
        "summary",
        "github_rule_based",
        "dependency_graph",
        "security_findings",
        "recommendations",
        "agent_insights",
        "performance_metrics",
    ] {
        assert!(report.get(key).is_some(), "missing section '{}'", key);
    }

    let metadata = &report["metadata"];
    for key in [
        "analysis_id",
        "target",
        "timestamp",
        "ecosystem",
        "input_mode",
        "analysis_status",
        "confidence",
        "agent_analysis_enabled",
    ] {
        assert!(metadata.get(key).is_some(), "missing metadata.{}", key);
    }

    let summary = &report["summary"];
    for key in [
        "total_packages",
        "packages_with_findings",
        "total_findings",
        "critical_findings",
        "high_findings",
        "medium_findings",
        "low_findings",
    ] {
        assert!(summary.get(key).is_some(), "missing summary.{}", key);
    }

    let graph = &report["dependency_graph"];
    assert!(graph["circular_dependencies"].get("count").is_some());
    assert!(graph["version_conflicts"].get("count").is_some());

    let recommendations = &report["recommendations"];
    for key in ["immediate_actions", "preventive_measures", "monitoring"] {
        assert!(recommendations[key].is_array(), "recommendations.{}", key);
    }
}

#[tokio::test]
async fn summary_counts_equal_grouped_finding_counts() {
    let report = composed_report().await;

    let packages = report["security_findings"]["packages"].as_array().unwrap();
    let mut by_severity: BTreeMap<&str, u64> = BTreeMap::new();
    let mut total = 0u64;
    for package in packages {
        for f in package["findings"].as_array().unwrap() {
            total += 1;
            *by_severity.entry(f["severity"].as_str().unwrap()).or_default() += 1;
        }
    }

    assert_eq!(report["summary"]["total_findings"].as_u64().unwrap(), total);
    assert_eq!(
        report["summary"]["critical_findings"].as_u64().unwrap(),
        by_severity.get("critical").copied().unwrap_or(0)
    );
    assert_eq!(
        report["summary"]["high_findings"].as_u64().unwrap(),
        by_severity.get("high").copied().unwrap_or(0)
    );
    assert_eq!(
        report["summary"]["low_findings"].as_u64().unwrap(),
        by_severity.get("low").copied().unwrap_or(0)
    );
}

#[tokio::test]
async fn agent_details_keys_respect_stage_order() {
    let report = composed_report().await;

    let stage_order = ["vulnerability", "reputation", "code", "supply_chain", "synthesis"];
    let details = report["agent_insights"]["agent_details"].as_object().unwrap();

    // Every reported agent is a known stage name
    for key in details.keys() {
        assert!(
            stage_order.contains(&key.as_str()),
            "unknown stage '{}' in agent_details",
            key
        );
    }
    // All required stages ran and reported
    for required in ["vulnerability", "reputation", "synthesis"] {
        assert!(details.contains_key(required), "missing stage '{}'", required);
    }
}

#[tokio::test]
async fn critical_findings_name_a_package_in_immediate_actions() {
    let report = composed_report().await;

    assert!(report["summary"]["critical_findings"].as_u64().unwrap() > 0);
    let actions = report["recommendations"]["immediate_actions"].as_array().unwrap();
    assert!(
        actions
            .iter()
            .any(|a| a.as_str().unwrap().contains("evil-pkg")),
        "immediate actions do not name the critical package: {:?}",
        actions
    );
}

#[tokio::test]
async fn packages_sorted_worst_first() {
    let report = composed_report().await;
    let packages = report["security_findings"]["packages"].as_array().unwrap();

    assert_eq!(packages[0]["name"], "evil-pkg");
    assert_eq!(packages[0]["risk_level"], "critical");
    assert_eq!(packages[1]["name"], "stale-pkg");
}
