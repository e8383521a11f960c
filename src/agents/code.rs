use async_trait::async_trait;
use std::sync::Arc;
use std::time::Duration;
use tracing::debug;

use crate::agents::{Agent, AgentData, AgentError, GateDecision, SharedContext};
use crate::models::finding::FindingType;
use crate::services::cache::CacheStore;
use crate::services::llm_client::LlmClient;
use crate::services::script_patterns::ScriptPatternEngine;

/// Complexity score at or above which a script warrants a second look even
/// without a pattern hit
const COMPLEXITY_GATE: f64 = 0.5;

/// Re-examines suspicious install scripts with an LLM, falling back to the
/// pattern-only verdict when the LLM is unavailable or fails.
///
/// Only runs when the rule layer flagged a malicious script or a script's
/// complexity score crossed the gate.
pub struct CodeAgent {
    llm: Option<Arc<LlmClient>>,
    cache: Arc<CacheStore>,
}

impl CodeAgent {
    pub fn new(llm: Option<Arc<LlmClient>>, cache: Arc<CacheStore>) -> Self {
        Self { llm, cache }
    }

    /// One LLM verdict per distinct script content; identical scripts are
    /// served from the cache
    async fn llm_verdict(&self, hook: &str, command: &str) -> Option<serde_json::Value> {
        let llm = self.llm.as_ref()?;
        let cache_key = ScriptPatternEngine::content_key(command);
        if let Some(cached) = self.cache.get(&cache_key) {
            debug!("code agent cache hit for script under '{}'", hook);
            return serde_json::from_str(&cached).ok();
        }

        let user = format!(
            "An install-time script registered under '{}' reads:\n\n{}\n\n\
             Attack taxonomy to consider: remote code execution, base64 payloads, \
             credential theft, reverse shells, crypto miners, data exfiltration, \
             environment harvesting, persistence, privilege escalation, typo-squat \
             droppers. Respond with a JSON object with keys obfuscation_detected \
             (array of strings), behavioral_indicators (array of strings), \
             code_quality_assessment (string), severity (low|medium|high|critical), \
             confidence (number 0-1).",
            hook, command
        );
        match llm
            .chat_json(
                "You are a security analyst reviewing package install scripts.",
                &user,
                Duration::from_secs(20),
            )
            .await
        {
            Ok(value) => {
                if let Ok(serialized) = serde_json::to_string(&value) {
                    self.cache.put(&cache_key, serialized);
                }
                Some(value)
            }
            Err(err) => {
                debug!("LLM script verdict failed, using pattern verdict: {}", err);
                None
            }
        }
    }
}

#[async_trait]
impl Agent for CodeAgent {
    fn name(&self) -> &'static str {
        "code"
    }

    fn gate(&self, context: &SharedContext) -> GateDecision {
        let has_script_finding = context
            .initial_findings
            .iter()
            .any(|f| f.finding_type == FindingType::MaliciousScript);
        if has_script_finding || context.max_script_complexity() >= COMPLEXITY_GATE {
            GateDecision::Run
        } else {
            GateDecision::Skip("no suspicious install scripts to examine".to_string())
        }
    }

    async fn analyze(&self, context: &SharedContext) -> Result<AgentData, AgentError> {
        // Commands worth re-examining: everything behind a malicious_script
        // finding, by hook
        let mut suspicious: Vec<(String, String)> = Vec::new();
        for finding in &context.initial_findings {
            if finding.finding_type != FindingType::MaliciousScript {
                continue;
            }
            let hook = finding
                .evidence
                .iter()
                .find_map(|e| e.strip_prefix("hook: "))
                .unwrap_or("unknown")
                .to_string();
            let command = finding
                .evidence
                .iter()
                .find_map(|e| e.strip_prefix("command: "))
                .unwrap_or_default()
                .to_string();
            if !command.is_empty() && !suspicious.iter().any(|(_, c)| *c == command) {
                suspicious.push((hook, command));
            }
        }

        let mut per_package = serde_json::Map::new();
        let mut llm_verdicts = 0usize;
        for (hook, command) in &suspicious {
            let verdict = match self.llm_verdict(hook, command).await {
                Some(value) => {
                    llm_verdicts += 1;
                    value
                }
                // Pattern-only verdict when the LLM path is unavailable
                None => serde_json::json!({
                    "obfuscation_detected": [],
                    "behavioral_indicators": [format!("pattern match on '{}' script", hook)],
                    "code_quality_assessment": "pattern-based verdict only",
                    "severity": "high",
                    "confidence": 0.6,
                }),
            };
            per_package.insert(
                format!("{}:{}", context.project_name, hook),
                verdict,
            );
        }

        Ok(AgentData {
            data: serde_json::json!({
                "packages": per_package,
                "scripts_examined": suspicious.len(),
                "llm_verdicts": llm_verdicts,
            }),
            confidence: if llm_verdicts > 0 { 0.85 } else { 0.6 },
            packages_analyzed: suspicious.len(),
            findings: Vec::new(),
        })
    }
}
