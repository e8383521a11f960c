use async_trait::async_trait;
use std::collections::BTreeMap;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use depsentry::agents::orchestrator::{Orchestrator, RunInfo, StageSpec};
use depsentry::agents::synthesis::SynthesisAgent;
use depsentry::agents::{Agent, AgentData, AgentError, AgentStatus, SharedContext};
use depsentry::models::ecosystem::Ecosystem;
use depsentry::models::finding::{Finding, FindingType, Severity};
use depsentry::models::graph::DependencyGraph;
use depsentry::services::cache::CacheStats;
use depsentry::services::detector::DetectionOutcome;
use depsentry::services::llm_client::LlmClient;

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
            packages_analyzed: 1,
            findings: Vec::new(),
        })
    }
}

fn context_with_critical_finding() -> SharedContext {
    let mut detection = DetectionOutcome::default();
    detection.findings = vec![Finding::rule_based(
        "flatmap-stream",
        "0.1.1",
        Ecosystem::Npm,
        FindingType::MaliciousPackage,
        Severity::Critical,
        0.95,
        "malicious_package_list",
    )
    .with_evidence("block-list match")];

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

/// Scenario: the LLM answers with prose instead of JSON. Synthesis must fail
/// schema validation and the deterministic fallback must produce the final
/// recommendations.
#[tokio::test]
async fn non_json_llm_response_triggers_deterministic_fallback() {
    let mut server = mockito::Server::new_async().await;
    server
        .mock("POST", "/chat/completions")
        .with_status(200)
        .with_body(
            serde_json::json!({
                "choices": [{"message": {"content": "Sorry, here is some prose instead."}}]
            })
            .to_string(),
        )
        .expect_at_least(1)
        .create_async()
        .await;

    let llm = Arc::new(LlmClient::new(
        "sk-test".to_string(),
        server.url(),
        "test-model".to_string(),
    ));

    let mut orchestrator =
        Orchestrator::new().with_timing(Duration::from_secs(10), Duration::from_millis(5));
    orchestrator.register(
        StageSpec {
            name: "vulnerability",
            required: true,
            timeout: Duration::from_secs(2),
        },
        Box::new(OkAgent("vulnerability")),
    );
    orchestrator.register(
        StageSpec {
            name: "synthesis",
            required: true,
            timeout: Duration::from_secs(5),
        },
        Box::new(SynthesisAgent::new(Some(llm))),
    );

    let mut context = context_with_critical_finding();
    orchestrator.run(&mut context).await;

    let synthesis = context.agent_result("synthesis").unwrap();
    assert_eq!(synthesis.status, AgentStatus::Failed);
    assert!(synthesis.fallback_used);

    let run = RunInfo {
        analysis_id: "fallback-test".to_string(),
        target: "/tmp/demo".to_string(),
        input_mode: "local".to_string(),
        agent_analysis_enabled: true,
    };
    let report = orchestrator.compose_report(&context, &run, &CacheStats::default(), 0.4);

    // Report is still complete and says why it degraded
    assert_eq!(report.metadata.analysis_status, "basic");
    assert!(report
        .metadata
        .degradation_reason
        .as_ref()
        .unwrap()
        .contains("synthesis"));

    // Fallback recommendations are populated and name the critical package
    assert!(!report.recommendations.immediate_actions.is_empty());
    assert!(report
        .recommendations
        .immediate_actions
        .iter()
        .any(|a| a.contains("flatmap-stream")));
    assert!(!report.recommendations.preventive_measures.is_empty());
    assert!(!report.recommendations.monitoring.is_empty());

    // The serialized report keeps the fixed schema
    let value = serde_json::to_value(&report).unwrap();
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
        assert!(value.get(key).is_some(), "missing '{}'", key);
    }
}

/// A valid JSON-mode answer is used as-is, no fallback involved
#[tokio::test]
async fn valid_llm_synthesis_is_used_directly() {
    let mut server = mockito::Server::new_async().await;
    let body = serde_json::json!({
        "summary": {"total_findings": 1, "overall_risk": "critical"},
        "recommendations": {
            "immediate_actions": ["Remove flatmap-stream from dependencies now"],
            "preventive_measures": ["Adopt a dependency review policy"],
            "monitoring": ["Alert on new advisories"]
        },
        "risk_assessment": "Critical: known-malicious dependency present."
    });
    server
        .mock("POST", "/chat/completions")
        .with_status(200)
        .with_body(
            serde_json::json!({
                "choices": [{"message": {"content": body.to_string()}}]
            })
            .to_string(),
        )
        .create_async()
        .await;

    let llm = Arc::new(LlmClient::new(
        "sk-test".to_string(),
        server.url(),
        "test-model".to_string(),
    ));

    let mut orchestrator =
        Orchestrator::new().with_timing(Duration::from_secs(10), Duration::from_millis(5));
    orchestrator.register(
        StageSpec {
            name: "synthesis",
            required: true,
            timeout: Duration::from_secs(5),
        },
        Box::new(SynthesisAgent::new(Some(llm))),
    );

    let mut context = context_with_critical_finding();
    orchestrator.run(&mut context).await;

    assert_eq!(
        context.agent_result("synthesis").unwrap().status,
        AgentStatus::Success
    );

    let run = RunInfo {
        analysis_id: "synthesis-ok".to_string(),
        target: "/tmp/demo".to_string(),
        input_mode: "local".to_string(),
        agent_analysis_enabled: true,
    };
    let report = orchestrator.compose_report(&context, &run, &CacheStats::default(), 0.2);

    assert_eq!(report.metadata.analysis_status, "full");
    assert_eq!(
        report.recommendations.immediate_actions,
        vec!["Remove flatmap-stream from dependencies now"]
    );
}
