use async_trait::async_trait;

use crate::agents::{Agent, AgentData, AgentError, GateDecision, SharedContext};
use crate::models::finding::{DetectionMethod, Finding, FindingType, Severity};
use crate::models::reputation::ReputationRecord;

/// Risk factor types that open the supply-chain gate
const GATING_FACTORS: &[&str] = &[
    "abandoned",
    "maintainer_change_recent",
    "publishing_pattern_anomaly",
    "suspicious_patterns",
];

/// Named historical attack shapes compared against each package's signals
const ATTACK_PATTERNS: &[(&str, &[&str])] = &[
    ("event-stream takeover", &["abandoned", "maintainer_change_recent"]),
    ("typosquat drop", &["suspicious_patterns", "new_package"]),
    ("burst publishing", &["publishing_pattern_anomaly", "new_package"]),
    ("dormant revival", &["abandoned", "suspicious_patterns"]),
];

/// Examines packages whose reputation signals resemble known supply-chain
/// attack patterns
#[derive(Debug, Default)]
pub struct SupplyChainAgent;

impl SupplyChainAgent {
    pub fn new() -> Self {
        Self
    }
}

fn gating_factor(record: &ReputationRecord) -> bool {
    record
        .risk_factors
        .iter()
        .any(|f| GATING_FACTORS.contains(&f.factor_type.as_str()))
}

/// Similarity of a package's factor set to one named attack pattern
fn pattern_similarity(record: &ReputationRecord, pattern_factors: &[&str]) -> f64 {
    let present = pattern_factors
        .iter()
        .filter(|factor| {
            record
                .risk_factors
                .iter()
                .any(|f| f.factor_type == **factor)
        })
        .count();
    present as f64 / pattern_factors.len() as f64
}

fn likelihood_label(best_similarity: f64) -> &'static str {
    if best_similarity >= 0.99 {
        "high"
    } else if best_similarity >= 0.5 {
        "medium"
    } else {
        "low"
    }
}

#[async_trait]
impl Agent for SupplyChainAgent {
    fn name(&self) -> &'static str {
        "supply_chain"
    }

    fn gate(&self, context: &SharedContext) -> GateDecision {
        if context.reputations.values().any(gating_factor) {
            GateDecision::Run
        } else {
            GateDecision::Skip("no packages with supply-chain risk factors".to_string())
        }
    }

    async fn analyze(&self, context: &SharedContext) -> Result<AgentData, AgentError> {
        let mut per_package = Vec::new();
        let mut findings = Vec::new();
        let mut attacks_detected = 0usize;

        for (name, record) in &context.reputations {
            if !gating_factor(record) {
                continue;
            }

            let indicators: Vec<String> = record
                .risk_factors
                .iter()
                .map(|f| format!("{}: {}", f.factor_type, f.description))
                .collect();

            let mut matches: Vec<serde_json::Value> = Vec::new();
            let mut best = 0.0f64;
            for (pattern_name, factors) in ATTACK_PATTERNS {
                let similarity = pattern_similarity(record, factors);
                if similarity > 0.0 {
                    matches.push(serde_json::json!({
                        "pattern_name": pattern_name,
                        "similarity": similarity,
                    }));
                    best = best.max(similarity);
                }
            }

            let likelihood = likelihood_label(best);
            if likelihood != "low" {
                attacks_detected += 1;
                let package = context
                    .direct_packages
                    .iter()
                    .find(|p| p.name == *name);
                let version = package.map_or("0.0.0".to_string(), |p| p.best_version().to_string());
                let ecosystem = package.map_or(context.ecosystem, |p| p.ecosystem);
                let mut finding = Finding::rule_based(
                    name.clone(),
                    version,
                    ecosystem,
                    FindingType::SupplyChainAttack,
                    if likelihood == "high" {
                        Severity::High
                    } else {
                        Severity::Medium
                    },
                    best.max(0.5),
                    "supply_chain_agent",
                )
                .with_evidence(format!("attack likelihood {}", likelihood))
                .with_remediation("Pin the package version and audit recent releases".to_string());
                finding.detection_method = DetectionMethod::Agent;
                for indicator in &indicators {
                    finding.evidence.push(indicator.clone());
                }
                findings.push(finding);
            }

            per_package.push(serde_json::json!({
                "name": name,
                "supply_chain_indicators": indicators,
                "attack_pattern_matches": matches,
                "attack_likelihood": likelihood,
                "confidence": 0.85,
            }));
        }

        let packages_analyzed = per_package.len();
        Ok(AgentData {
            data: serde_json::json!({
                "packages": per_package,
                "attacks_detected": attacks_detected,
            }),
            confidence: 0.85,
            packages_analyzed,
            findings,
        })
    }
}
