use async_trait::async_trait;
use std::sync::Arc;
use tracing::debug;

use crate::agents::{Agent, AgentData, AgentError, SharedContext};
use crate::models::finding::{Finding, FindingType, Severity};
use crate::models::finding::DetectionMethod;
use crate::services::registry_client::RegistryClient;
use crate::services::reputation::ReputationScorer;

/// Direct packages scored per run; larger manifests get a summarized pass
const SCORING_LIMIT: usize = 50;

/// Scores registry reputation for the project's direct packages
pub struct ReputationAgent {
    registry: Arc<RegistryClient>,
    scorer: ReputationScorer,
}

impl ReputationAgent {
    pub fn new(registry: Arc<RegistryClient>) -> Self {
        Self {
            registry,
            scorer: ReputationScorer::new(),
        }
    }
}

#[async_trait]
impl Agent for ReputationAgent {
    fn name(&self) -> &'static str {
        "reputation"
    }

    async fn analyze(&self, context: &SharedContext) -> Result<AgentData, AgentError> {
        let now = chrono::Utc::now();
        let mut per_package = serde_json::Map::new();
        let mut findings = Vec::new();
        let mut scored = 0usize;
        let mut failures = 0usize;

        let truncated = context.direct_packages.len() > SCORING_LIMIT;
        for package in context.direct_packages.iter().take(SCORING_LIMIT) {
            // The rule layer may have scored this one already; reuse it
            let record = if let Some(existing) = context.reputations.get(&package.name) {
                existing.clone()
            } else {
                match self
                    .registry
                    .fetch(package.ecosystem, &package.name, None)
                    .await
                {
                    Ok(metadata) => self.scorer.score(&metadata, now),
                    Err(err) => {
                        debug!("reputation lookup failed for {}: {}", package.name, err);
                        failures += 1;
                        continue;
                    }
                }
            };

            if let Some(level) = record.risk_level {
                if level.is_reportable_finding() {
                    let mut finding = Finding::rule_based(
                        package.name.clone(),
                        package.best_version(),
                        package.ecosystem,
                        FindingType::LowReputation,
                        Severity::Medium,
                        record.confidence.max(0.5),
                        "reputation_agent",
                    )
                    .with_evidence(format!(
                        "reputation score {:.2} ({})",
                        record.score, level
                    ));
                    finding.detection_method = DetectionMethod::Agent;
                    findings.push(finding);
                }
            }

            per_package.insert(
                package.name.clone(),
                serde_json::to_value(&record).unwrap_or_default(),
            );
            scored += 1;
        }

        if scored == 0 && failures > 0 {
            return Err(AgentError::classified(format!(
                "connection failures prevented all {} reputation lookups",
                failures
            )));
        }

        Ok(AgentData {
            data: serde_json::json!({
                "packages": per_package,
                "scored": scored,
                "lookup_failures": failures,
                "truncated": truncated,
            }),
            confidence: 0.85,
            packages_analyzed: scored,
            findings,
        })
    }
}
