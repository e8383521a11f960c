use async_trait::async_trait;
use std::sync::Arc;
use std::time::Duration;
use tracing::debug;

use crate::agents::{Agent, AgentData, AgentError, SharedContext};
use crate::models::vulnerability::VulnerabilityRecord;
use crate::services::llm_client::LlmClient;
use crate::services::osv_client::OsvClient;

/// How many affected packages the LLM enrichment pass will look at before the
/// budget cuts it off
const LLM_ENRICHMENT_BUDGET: usize = 10;

/// Queries the OSV database for every resolved package and, when an LLM is
/// available, enriches affected packages with an exploitation assessment.
pub struct VulnerabilityAgent {
    osv: Arc<OsvClient>,
    llm: Option<Arc<LlmClient>>,
}

impl VulnerabilityAgent {
    pub fn new(osv: Arc<OsvClient>, llm: Option<Arc<LlmClient>>) -> Self {
        Self { osv, llm }
    }

    async fn enrich(
        &self,
        name: &str,
        records: &[VulnerabilityRecord],
    ) -> Option<serde_json::Value> {
        let llm = self.llm.as_ref()?;
        let ids: Vec<&str> = records.iter().map(|r| r.id.as_str()).collect();
        let user = format!(
            "Package '{}' is affected by: {}. Respond with a JSON object with keys \
             exploitation_likelihood (low|medium|high), business_impact (string), \
             recommended_action (string), key_concerns (array of strings), \
             risk_score (number 1-10).",
            name,
            ids.join(", ")
        );
        match llm
            .chat_json(
                "You are a security analyst assessing dependency vulnerabilities.",
                &user,
                Duration::from_secs(15),
            )
            .await
        {
            Ok(value) => Some(value),
            Err(err) => {
                debug!("LLM enrichment for {} skipped: {}", name, err);
                None
            }
        }
    }
}

#[async_trait]
impl Agent for VulnerabilityAgent {
    fn name(&self) -> &'static str {
        "vulnerability"
    }

    async fn analyze(&self, context: &SharedContext) -> Result<AgentData, AgentError> {
        let batch = self.osv.query_batch(&context.packages).await;

        let mut per_package = serde_json::Map::new();
        let mut affected: Vec<(String, Vec<VulnerabilityRecord>)> = Vec::new();

        for (package, records) in &batch.records {
            if records.is_empty() {
                continue;
            }
            let highest = VulnerabilityRecord::highest_severity(records)
                .map(|s| s.to_string())
                .unwrap_or_else(|| "none".to_string());
            per_package.insert(
                package.name.clone(),
                serde_json::json!({
                    "vulnerabilities": records,
                    "vulnerability_count": records.len(),
                    "highest_severity": highest,
                    "confidence": 0.9,
                }),
            );
            affected.push((package.name.clone(), records.clone()));
        }

        // LLM enrichment is best-effort and budget-bounded
        if self.llm.is_some() && affected.len() <= LLM_ENRICHMENT_BUDGET {
            for (name, records) in &affected {
                if let Some(assessment) = self.enrich(name, records).await {
                    if let Some(entry) = per_package.get_mut(name) {
                        entry["llm_assessment"] = assessment;
                    }
                }
            }
        }

        let packages_analyzed = batch.records.len();
        Ok(AgentData {
            data: serde_json::json!({
                "packages": per_package,
                "offline": batch.offline,
                "query_errors": batch.errors.len(),
            }),
            confidence: if batch.offline { 0.3 } else { 0.9 },
            packages_analyzed,
            findings: Vec::new(),
        })
    }
}
