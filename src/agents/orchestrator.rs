use std::collections::BTreeMap;
use std::time::Duration;
use tokio::time::Instant;
use tracing::{info, warn};

use crate::agents::{
    Agent, AgentData, AgentError, AgentErrorType, AgentResult, AgentStatus, GateDecision,
    SharedContext,
};
use crate::models::finding::{dedupe_findings, Finding, Severity};
use crate::models::report::{
    AgentDetail, AgentErrorSummary, AgentInsights, CodeAnalysisSection, ConflictDetail,
    ConflictSection, CycleDetail, CycleSection, DegradationLevel, DetectionMethods, FinalReport,
    GraphSection, PackageReport, PerformanceMetrics, Recommendations, ReportMetadata,
    ReportSummary, RuleBasedSection, SecurityFindings, SupplyChainSection,
};
use crate::models::reputation::ReputationRecord;
use crate::services::cache::CacheStats;

/// One registered stage
#[derive(Debug, Clone)]
pub struct StageSpec {
    pub name: &'static str,
    pub required: bool,
    pub timeout: Duration,
}

/// Identity of the analysis run, supplied by the outer wrapper
#[derive(Debug, Clone)]
pub struct RunInfo {
    pub analysis_id: String,
    pub target: String,
    pub input_mode: String,
    pub agent_analysis_enabled: bool,
}

/// Sequences the specialized agents through their fixed stage order with
/// per-stage timeouts, one retry for retryable failures, fallback data for
/// required stages and gate/failure skips for optional ones.
pub struct Orchestrator {
    stages: Vec<(StageSpec, Box<dyn Agent>)>,
    /// Wall-clock budget across all stages
    total_budget: Duration,
    retry_base: Duration,
}

impl Orchestrator {
    pub fn new() -> Self {
        Self {
            stages: Vec::new(),
            total_budget: Duration::from_secs(140),
            retry_base: Duration::from_secs(1),
        }
    }

    /// Register an agent against a named stage; execution follows
    /// registration order
    pub fn register(&mut self, spec: StageSpec, agent: Box<dyn Agent>) {
        self.stages.push((spec, agent));
    }

    /// Shrink timing knobs (for tests)
    pub fn with_timing(mut self, total_budget: Duration, retry_base: Duration) -> Self {
        self.total_budget = total_budget;
        self.retry_base = retry_base;
        self
    }

    /// The standard five-stage table
    pub fn standard(
        vulnerability: Box<dyn Agent>,
        reputation: Box<dyn Agent>,
        code: Box<dyn Agent>,
        supply_chain: Box<dyn Agent>,
        synthesis: Box<dyn Agent>,
    ) -> Self {
        let mut orchestrator = Self::new();
        orchestrator.register(
            StageSpec { name: "vulnerability", required: true, timeout: Duration::from_secs(30) },
            vulnerability,
        );
        orchestrator.register(
            StageSpec { name: "reputation", required: true, timeout: Duration::from_secs(20) },
            reputation,
        );
        orchestrator.register(
            StageSpec { name: "code", required: false, timeout: Duration::from_secs(40) },
            code,
        );
        orchestrator.register(
            StageSpec { name: "supply_chain", required: false, timeout: Duration::from_secs(30) },
            supply_chain,
        );
        orchestrator.register(
            StageSpec { name: "synthesis", required: true, timeout: Duration::from_secs(20) },
            synthesis,
        );
        orchestrator
    }

    /// Execute every stage in order, recording one result per stage into the
    /// shared context
    pub async fn run(&self, context: &mut SharedContext) {
        let overall_start = Instant::now();

        for (spec, agent) in &self.stages {
            if let GateDecision::Skip(reason) = agent.gate(context) {
                info!("stage {} skipped by gate: {}", spec.name, reason);
                context.record_result(AgentResult {
                    agent_name: spec.name.to_string(),
                    status: AgentStatus::Skipped,
                    data: serde_json::json!({ "gate": reason }),
                    confidence: 0.0,
                    duration_seconds: 0.0,
                    packages_analyzed: 0,
                    findings_count: 0,
                    findings: Vec::new(),
                    error: None,
                    error_type: None,
                    gate_skip: true,
                    fallback_used: false,
                });
                continue;
            }

            let remaining = self.total_budget.saturating_sub(overall_start.elapsed());
            let stage_timeout = spec.timeout.min(remaining);
            info!("stage {} starting (timeout {:?})", spec.name, stage_timeout);

            let stage_start = Instant::now();
            let outcome = self.run_stage(agent.as_ref(), context, stage_timeout).await;
            let duration = stage_start.elapsed().as_secs_f64();

            let result = match outcome {
                Ok(data) => {
                    info!("stage {} succeeded in {:.2}s", spec.name, duration);
                    AgentResult::success(spec.name, data, duration)
                }
                Err(err) => {
                    warn!("stage {} failed: {} ({:?})", spec.name, err.message, err.error_type);
                    self.terminal_result(spec, context, err, duration)
                }
            };
            context.record_result(result);
        }
    }

    /// Invoke one agent under its deadline with a single retry for retryable
    /// errors; backoff sleeps stay inside the stage budget
    async fn run_stage(
        &self,
        agent: &dyn Agent,
        context: &SharedContext,
        stage_timeout: Duration,
    ) -> Result<AgentData, AgentError> {
        let stage_start = Instant::now();
        let mut attempt: u32 = 0;
        loop {
            let left = stage_timeout.saturating_sub(stage_start.elapsed());
            if left.is_zero() {
                return Err(AgentError::new(
                    format!("stage timed out after {:?}", stage_timeout),
                    AgentErrorType::Timeout,
                ));
            }

            let attempt_result = match tokio::time::timeout(left, agent.analyze(context)).await {
                Ok(result) => result,
                Err(_) => Err(AgentError::new(
                    format!("stage timed out after {:?}", stage_timeout),
                    AgentErrorType::Timeout,
                )),
            };

            match attempt_result {
                Ok(data) => return Ok(data),
                Err(err) => {
                    let delay = self.retry_base * 2u32.pow(attempt);
                    let budget_left = stage_timeout.saturating_sub(stage_start.elapsed());
                    if err.error_type.is_retryable()
                        && err.error_type != AgentErrorType::Timeout
                        && attempt < 1
                        && delay < budget_left
                    {
                        warn!("retrying after {:?}: {}", delay, err.message);
                        tokio::time::sleep(delay).await;
                        attempt += 1;
                        continue;
                    }
                    return Err(err);
                }
            }
        }
    }

    /// Terminal failure handling: required stages get fallback data, optional
    /// stages become failure skips
    fn terminal_result(
        &self,
        spec: &StageSpec,
        context: &SharedContext,
        err: AgentError,
        duration: f64,
    ) -> AgentResult {
        let status = if err.error_type == AgentErrorType::Timeout {
            if spec.required {
                AgentStatus::Timeout
            } else {
                AgentStatus::Skipped
            }
        } else if spec.required {
            AgentStatus::Failed
        } else {
            AgentStatus::Skipped
        };

        let (data, fallback_used) = if spec.required {
            (fallback_data(spec.name, context), true)
        } else {
            (serde_json::Value::Null, false)
        };

        AgentResult {
            agent_name: spec.name.to_string(),
            status,
            data,
            confidence: if fallback_used { 0.5 } else { 0.0 },
            duration_seconds: duration,
            packages_analyzed: 0,
            findings_count: 0,
            findings: Vec::new(),
            error: Some(err.message),
            error_type: Some(err.error_type),
            gate_skip: false,
            fallback_used,
        }
    }

    /// Degradation level as a function of the stage status multiset
    pub fn degradation(&self, context: &SharedContext) -> DegradationLevel {
        let mut required_total = 0usize;
        let mut required_degraded = 0usize;
        let mut optional_failure_skip = false;

        for (spec, _) in &self.stages {
            let result = context.agent_result(spec.name);
            if spec.required {
                required_total += 1;
                match result {
                    Some(r) if r.status == AgentStatus::Success => {}
                    _ => required_degraded += 1,
                }
            } else if let Some(r) = result {
                if r.status == AgentStatus::Skipped && !r.gate_skip {
                    optional_failure_skip = true;
                }
            }
        }

        if required_degraded == 0 {
            if optional_failure_skip {
                DegradationLevel::Partial
            } else {
                DegradationLevel::Full
            }
        } else if required_degraded >= required_total.max(1) {
            DegradationLevel::Minimal
        } else {
            DegradationLevel::Basic
        }
    }

    /// Compose the final report from the shared context and the recorded
    /// stage results
    pub fn compose_report(
        &self,
        context: &SharedContext,
        run: &RunInfo,
        cache_stats: &CacheStats,
        total_duration_seconds: f64,
    ) -> FinalReport {
        let degradation = self.degradation(context);
        let packages = build_package_reports(context);
        let summary = ReportSummary::from_packages(context.packages.len(), &packages);

        let rule_findings = &context.initial_findings;
        let rule_packages: std::collections::BTreeSet<&str> = rule_findings
            .iter()
            .map(|f| f.package_name.as_str())
            .collect();
        let mut description = "Deterministic detection layer: OSV lookups, block-list, typosquat and install-script pattern checks".to_string();
        if context.reputation_skipped {
            description.push_str("; rule-layer reputation checks skipped for scale");
        }
        let github_rule_based = RuleBasedSection {
            description,
            confidence: 0.9,
            total_packages: context.packages.len(),
            packages_with_issues: rule_packages.len(),
            total_issues: rule_findings.len(),
            detection_methods: DetectionMethods::default(),
        };

        let dependency_graph = build_graph_section(context);
        let supply_chain_analysis = build_supply_chain_section(context);
        let code_analysis = build_code_section(context);

        let recommendations = synthesized_recommendations(context)
            .unwrap_or_else(|| fallback_recommendations(&packages, context));

        let (agent_insights, error_summary) = build_agent_insights(context, degradation);

        let missing: Vec<String> = agent_insights
            .failed_agents
            .iter()
            .map(|f| f.agent.clone())
            .collect();
        let degradation_reason = if degradation == DegradationLevel::Full {
            None
        } else {
            Some(format!(
                "degraded stages: {}",
                if missing.is_empty() {
                    "optional analysis incomplete".to_string()
                } else {
                    missing.join(", ")
                }
            ))
        };

        let mut agent_durations = BTreeMap::new();
        for result in context.results_in_order() {
            agent_durations.insert(result.agent_name.clone(), result.duration_seconds);
        }

        let mut report = FinalReport {
            metadata: ReportMetadata {
                analysis_id: run.analysis_id.clone(),
                target: run.target.clone(),
                timestamp: chrono::Utc::now().to_rfc3339(),
                ecosystem: context.ecosystem.to_string(),
                input_mode: run.input_mode.clone(),
                analysis_status: degradation.as_str().to_string(),
                confidence: degradation.confidence(),
                agent_analysis_enabled: run.agent_analysis_enabled,
                degradation_reason,
                missing_analysis: if missing.is_empty() { None } else { Some(missing) },
                error_summary: if error_summary.is_empty() {
                    None
                } else {
                    Some(error_summary)
                },
            },
            summary,
            github_rule_based,
            dependency_graph,
            supply_chain_analysis,
            code_analysis,
            security_findings: SecurityFindings { packages },
            recommendations,
            agent_insights,
            performance_metrics: PerformanceMetrics {
                total_duration_seconds,
                agent_durations,
                cache_hits: Some(cache_stats.hits),
                packages_analyzed: Some(context.packages.len()),
                total_findings: None,
            },
        };
        report.performance_metrics.total_findings = Some(report.summary.total_findings);
        report.sort_for_output();
        report
    }
}

impl Default for Orchestrator {
    fn default() -> Self {
        Self::new()
    }
}

/// Deterministic substitute data for a failed required stage
fn fallback_data(stage: &str, context: &SharedContext) -> serde_json::Value {
    match stage {
        "vulnerability" => {
            let mut per_package = serde_json::Map::new();
            for (name, records) in &context.vulnerabilities {
                per_package.insert(
                    name.clone(),
                    serde_json::json!({
                        "vulnerabilities": records,
                        "vulnerability_count": records.len(),
                        "confidence": 0.9,
                    }),
                );
            }
            serde_json::json!({ "packages": per_package, "agent_fallback": true })
        }
        "reputation" => {
            let mut per_package = serde_json::Map::new();
            for package in &context.direct_packages {
                per_package.insert(
                    package.name.clone(),
                    serde_json::to_value(ReputationRecord::neutral()).unwrap_or_default(),
                );
            }
            serde_json::json!({ "packages": per_package, "agent_fallback": true })
        }
        // Synthesis fallback is the deterministic synthesizer at compose time
        _ => serde_json::json!({ "agent_fallback": true }),
    }
}

/// Group rule-based and agent findings into per-package report entries
fn build_package_reports(context: &SharedContext) -> Vec<PackageReport> {
    let mut all_findings: Vec<Finding> = context.initial_findings.clone();
    for result in context.results_in_order() {
        if result.status == AgentStatus::Success {
            all_findings.extend(result.findings.iter().cloned());
        }
    }
    let all_findings = dedupe_findings(all_findings);

    let mut by_package: BTreeMap<String, PackageReport> = BTreeMap::new();
    for finding in all_findings {
        let entry = by_package
            .entry(finding.package_name.clone())
            .or_insert_with(|| PackageReport {
                name: finding.package_name.clone(),
                version: finding.package_version.clone(),
                ecosystem: finding.ecosystem.to_string(),
                findings: Vec::new(),
                vulnerabilities: None,
                reputation_score: None,
                risk_factors: None,
                risk_score: 0.0,
                risk_level: String::new(),
            });
        entry.findings.push(finding);
    }

    // Packages that only have attributes (vulnerabilities or reputation)
    // still appear, so the viewer can render them
    for (name, records) in &context.vulnerabilities {
        if let Some(entry) = by_package.get_mut(name) {
            entry.vulnerabilities = Some(records.clone());
        }
    }
    for (name, record) in &context.reputations {
        let entry = by_package.entry(name.clone()).or_insert_with(|| {
            let package = context.direct_packages.iter().find(|p| p.name == *name);
            PackageReport {
                name: name.clone(),
                version: package.map_or("0.0.0".to_string(), |p| p.best_version().to_string()),
                ecosystem: context.ecosystem.to_string(),
                findings: Vec::new(),
                vulnerabilities: None,
                reputation_score: None,
                risk_factors: None,
                risk_score: 0.0,
                risk_level: String::new(),
            }
        });
        entry.reputation_score = Some(record.score);
        if !record.risk_factors.is_empty() {
            entry.risk_factors = Some(record.risk_factors.clone());
        }
    }

    let mut packages: Vec<PackageReport> = by_package.into_values().collect();
    for package in &mut packages {
        package.recompute_risk();
    }
    packages
}

fn build_graph_section(context: &SharedContext) -> GraphSection {
    let graph = &context.dependency_graph;
    GraphSection {
        applicable: graph.node_count() > 0,
        total_packages: graph.node_count(),
        circular_dependencies: CycleSection {
            count: graph.cycles.len(),
            details: graph
                .cycles
                .iter()
                .map(|c| CycleDetail {
                    cycle: c.cycle.clone(),
                    severity: c.severity.to_string(),
                })
                .collect(),
        },
        version_conflicts: ConflictSection {
            count: graph.conflicts.len(),
            details: graph
                .conflicts
                .iter()
                .map(|c| ConflictDetail {
                    package: c.package.clone(),
                    conflicting_versions: c.conflicting_versions.clone(),
                    paths: c.paths.clone(),
                })
                .collect(),
        },
    }
}

fn build_supply_chain_section(context: &SharedContext) -> Option<SupplyChainSection> {
    let result = context.agent_result("supply_chain")?;
    if result.status != AgentStatus::Success {
        return None;
    }
    let packages = result.data["packages"].as_array().cloned().unwrap_or_default();
    Some(SupplyChainSection {
        applicable: true,
        description: "Supply-chain attack pattern comparison over package risk signals".to_string(),
        total_packages_analyzed: result.packages_analyzed,
        attacks_detected: result.data["attacks_detected"].as_u64().unwrap_or(0) as usize,
        packages,
        confidence: 0.85,
        source: "supply_chain_agent".to_string(),
    })
}

fn build_code_section(context: &SharedContext) -> Option<CodeAnalysisSection> {
    let result = context.agent_result("code")?;
    if result.status != AgentStatus::Success {
        return None;
    }
    let packages: Vec<serde_json::Value> = result.data["packages"]
        .as_object()
        .map(|map| {
            map.iter()
                .map(|(name, verdict)| {
                    let mut entry = verdict.clone();
                    if let Some(obj) = entry.as_object_mut() {
                        obj.insert("name".to_string(), serde_json::json!(name));
                    }
                    entry
                })
                .collect()
        })
        .unwrap_or_default();
    let code_issues_found = packages.len();
    Some(CodeAnalysisSection {
        applicable: true,
        description: "Install-script re-examination with the attack taxonomy".to_string(),
        total_packages_analyzed: result.packages_analyzed,
        code_issues_found,
        packages,
        confidence: 0.85,
        source: "code_agent".to_string(),
    })
}

/// Recommendations from a successful synthesis stage, when its body validates
fn synthesized_recommendations(context: &SharedContext) -> Option<Recommendations> {
    let result = context.agent_result("synthesis")?;
    if result.status != AgentStatus::Success {
        return None;
    }
    let body = result.data.get("synthesis")?;
    let recommendations = body.get("recommendations")?;
    let bucket = |key: &str| -> Vec<String> {
        recommendations
            .get(key)
            .and_then(|v| v.as_array())
            .map(|entries| {
                entries
                    .iter()
                    .filter_map(|e| e.as_str())
                    .map(str::to_string)
                    .collect()
            })
            .unwrap_or_default()
    };
    Some(Recommendations {
        immediate_actions: bucket("immediate_actions"),
        preventive_measures: bucket("preventive_measures"),
        monitoring: bucket("monitoring"),
    })
}

/// Deterministic fallback synthesizer: prioritized, package-specific
/// recommendations scanned straight from the grouped findings
pub fn fallback_recommendations(
    packages: &[PackageReport],
    context: &SharedContext,
) -> Recommendations {
    fn named_with(packages: &[PackageReport], severity: Severity) -> Vec<&PackageReport> {
        packages
            .iter()
            .filter(|p| p.findings.iter().any(|f| f.severity == severity))
            .collect()
    }

    let mut immediate = Vec::new();
    let mut preventive = Vec::new();
    let mut monitoring = Vec::new();

    let critical = named_with(packages, Severity::Critical);
    if !critical.is_empty() {
        let names: Vec<&str> = critical.iter().take(3).map(|p| p.name.as_str()).collect();
        let suffix = if critical.len() > 3 {
            format!(" and {} more", critical.len() - 3)
        } else {
            String::new()
        };
        immediate.push(format!(
            "Immediately remove or replace packages with critical findings: {}{}",
            names.join(", "),
            suffix
        ));
    }

    let high = named_with(packages, Severity::High);
    if !high.is_empty() {
        let names: Vec<&str> = high.iter().take(3).map(|p| p.name.as_str()).collect();
        let suffix = if high.len() > 3 {
            format!(" and {} more", high.len() - 3)
        } else {
            String::new()
        };
        immediate.push(format!(
            "Upgrade or audit high-severity packages: {}{}",
            names.join(", "),
            suffix
        ));
    }

    let low_reputation: Vec<&PackageReport> = packages
        .iter()
        .filter(|p| p.reputation_score.map_or(false, |s| s < 0.5))
        .collect();
    if !low_reputation.is_empty() {
        let names: Vec<&str> = low_reputation
            .iter()
            .take(3)
            .map(|p| p.name.as_str())
            .collect();
        preventive.push(format!(
            "Review low-reputation dependencies before the next release: {}",
            names.join(", ")
        ));
    }

    let graph = &context.dependency_graph;
    if !graph.cycles.is_empty() {
        preventive.push(format!(
            "Break {} circular dependency chains to simplify upgrades",
            graph.cycles.len()
        ));
    }
    if !graph.conflicts.is_empty() {
        preventive.push(format!(
            "Align {} conflicting version constraints across the dependency tree",
            graph.conflicts.len()
        ));
    }

    preventive.push("Pin dependency versions with a lockfile and verify integrity hashes".to_string());
    preventive.push("Run installs with lifecycle scripts disabled until vetted".to_string());
    monitoring.push("Re-run the analysis on every dependency change".to_string());
    monitoring.push("Subscribe to security advisories for your direct dependencies".to_string());

    Recommendations {
        immediate_actions: immediate,
        preventive_measures: preventive,
        monitoring,
    }
}

fn build_agent_insights(
    context: &SharedContext,
    degradation: DegradationLevel,
) -> (AgentInsights, Vec<AgentErrorSummary>) {
    let mut insights = AgentInsights {
        degradation_level: degradation.as_str().to_string(),
        ..Default::default()
    };
    let mut error_summary = Vec::new();

    for result in context.results_in_order() {
        let success = result.status == AgentStatus::Success;
        if success {
            insights.successful_agents.push(result.agent_name.clone());
        } else if !(result.status == AgentStatus::Skipped && result.gate_skip) {
            let summary = AgentErrorSummary {
                agent: result.agent_name.clone(),
                error: result
                    .error
                    .clone()
                    .unwrap_or_else(|| "analysis unavailable".to_string()),
                error_type: result
                    .error_type
                    .map_or("unknown".to_string(), |t| t.as_str().to_string()),
            };
            insights.failed_agents.push(summary.clone());
            error_summary.push(summary);
        }

        // Gate skips carry no analysis and stay out of agent_details
        if result.status == AgentStatus::Skipped && result.gate_skip {
            continue;
        }
        insights.agent_details.insert(
            result.agent_name.clone(),
            AgentDetail {
                success,
                duration_seconds: result.duration_seconds,
                confidence: result.confidence,
                packages_analyzed: result.packages_analyzed,
                findings_count: result.findings_count,
                error: result.error.clone(),
            },
        );
    }

    (insights, error_summary)
}
