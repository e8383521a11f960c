use async_trait::async_trait;
use std::sync::Arc;
use std::time::Duration;

use crate::agents::{Agent, AgentData, AgentError, AgentErrorType, SharedContext};
use crate::models::finding::Severity;
use crate::services::llm_client::LlmClient;

/// Asks the LLM to compose the prioritized report body and validates the
/// response against the fixed schema. Any LLM failure or validation miss is
/// returned as an error so the orchestrator can run the deterministic
/// fallback synthesizer instead.
pub struct SynthesisAgent {
    llm: Option<Arc<LlmClient>>,
}

impl SynthesisAgent {
    pub fn new(llm: Option<Arc<LlmClient>>) -> Self {
        Self { llm }
    }

    /// Compact context digest fed to the LLM
    fn build_prompt(context: &SharedContext) -> String {
        let mut finding_lines = Vec::new();
        for finding in context.initial_findings.iter().take(40) {
            finding_lines.push(format!(
                "- {} {} ({}): {} [{}]",
                finding.package_name,
                finding.package_version,
                finding.finding_type,
                finding.severity,
                finding.source,
            ));
        }
        let agent_lines: Vec<String> = context
            .results_in_order()
            .iter()
            .map(|r| format!("- {}: {:?}", r.agent_name, r.status))
            .collect();

        format!(
            "Project '{}' ({} ecosystem) with {} packages analyzed.\n\
             Dependency graph: {} nodes, {} cycles, {} version conflicts.\n\
             Findings:\n{}\n\
             Agent stages so far:\n{}\n\n\
             Produce a JSON object with exactly these keys:\n\
             summary: object with total_findings (int) and overall_risk (low|medium|high|critical);\n\
             recommendations: object with immediate_actions (array of strings naming specific packages), \
             preventive_measures (array of strings), monitoring (array of strings);\n\
             risk_assessment: string.\n\
             Order immediate_actions by severity, critical packages first.",
            context.project_name,
            context.ecosystem,
            context.packages.len(),
            context.dependency_graph.node_count(),
            context.dependency_graph.cycles.len(),
            context.dependency_graph.conflicts.len(),
            finding_lines.join("\n"),
            agent_lines.join("\n"),
        )
    }
}

/// Validate the synthesized body against the schema the report needs.
/// Returns the reason on the first miss.
pub fn validate_synthesis(value: &serde_json::Value) -> Result<(), String> {
    let summary = value
        .get("summary")
        .ok_or_else(|| "missing 'summary'".to_string())?;
    if !summary.is_object() {
        return Err("'summary' is not an object".to_string());
    }

    let recommendations = value
        .get("recommendations")
        .ok_or_else(|| "missing 'recommendations'".to_string())?;
    for key in ["immediate_actions", "preventive_measures", "monitoring"] {
        let bucket = recommendations
            .get(key)
            .ok_or_else(|| format!("missing 'recommendations.{}'", key))?;
        let entries = bucket
            .as_array()
            .ok_or_else(|| format!("'recommendations.{}' is not an array", key))?;
        if !entries.iter().all(|e| e.is_string()) {
            return Err(format!("'recommendations.{}' has non-string entries", key));
        }
    }

    if !value
        .get("risk_assessment")
        .map_or(false, |v| v.is_string())
    {
        return Err("missing or non-string 'risk_assessment'".to_string());
    }
    Ok(())
}

#[async_trait]
impl Agent for SynthesisAgent {
    fn name(&self) -> &'static str {
        "synthesis"
    }

    async fn analyze(&self, context: &SharedContext) -> Result<AgentData, AgentError> {
        let llm = self.llm.as_ref().ok_or_else(|| {
            AgentError::new("LLM API key not configured", AgentErrorType::Auth)
        })?;

        let body = llm
            .chat_json(
                "You are a security analyst writing the final section of a dependency \
                 security report. Respond only with the requested JSON object.",
                &Self::build_prompt(context),
                Duration::from_secs(18),
            )
            .await
            .map_err(AgentError::from)?;

        validate_synthesis(&body).map_err(|reason| {
            AgentError::new(
                format!("synthesis schema validation failed: {}", reason),
                AgentErrorType::InvalidResponse,
            )
        })?;

        let critical_count = context
            .initial_findings
            .iter()
            .filter(|f| f.severity == Severity::Critical)
            .count();

        Ok(AgentData {
            data: serde_json::json!({
                "synthesis": body,
                "critical_findings_seen": critical_count,
            }),
            confidence: 0.9,
            packages_analyzed: context.packages.len(),
            findings: Vec::new(),
        })
    }
}
