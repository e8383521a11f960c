use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use crate::models::finding::{Finding, Severity};
use crate::models::reputation::RiskFactor;
use crate::models::vulnerability::VulnerabilityRecord;

/// Fixed output file name; the downstream report viewer reads this path
pub const REPORT_FILE_NAME: &str = "demo_ui_comprehensive_report.json";

/// How much of the planned analysis succeeded
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DegradationLevel {
    Full,
    Partial,
    Basic,
    Minimal,
}

impl DegradationLevel {
    /// Report confidence associated with each level
    pub fn confidence(&self) -> f64 {
        match self {
            DegradationLevel::Full => 0.95,
            DegradationLevel::Partial => 0.75,
            DegradationLevel::Basic => 0.55,
            DegradationLevel::Minimal => 0.35,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            DegradationLevel::Full => "full",
            DegradationLevel::Partial => "partial",
            DegradationLevel::Basic => "basic",
            DegradationLevel::Minimal => "minimal",
        }
    }
}

/// One degraded agent recorded in metadata and agent_insights
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AgentErrorSummary {
    /// Agent name
    pub agent: String,
    /// Error message
    pub error: String,
    /// Classified error type (e.g. "timeout", "auth")
    #[serde(rename = "type")]
    pub error_type: String,
}

/// Report metadata block
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReportMetadata {
    /// Unique id for this analysis run
    pub analysis_id: String,
    /// Original user input (path or URL)
    pub target: String,
    /// RFC 3339 timestamp of report creation
    pub timestamp: String,
    /// Analyzed ecosystem ("npm" | "pypi")
    pub ecosystem: String,
    /// "local" | "github"
    pub input_mode: String,
    /// Degradation level as status string
    pub analysis_status: String,
    /// Overall report confidence in [0, 1]
    pub confidence: f64,
    /// Whether LLM-backed agent analysis was enabled for the run
    pub agent_analysis_enabled: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub degradation_reason: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub missing_analysis: Option<Vec<String>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error_summary: Option<Vec<AgentErrorSummary>>,
}

/// Severity-bucketed counts over all findings
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ReportSummary {
    pub total_packages: usize,
    pub packages_with_findings: usize,
    pub total_findings: usize,
    pub critical_findings: usize,
    pub high_findings: usize,
    pub medium_findings: usize,
    pub low_findings: usize,
}

impl ReportSummary {
    /// Compute summary counts from package-grouped findings
    pub fn from_packages(total_packages: usize, packages: &[PackageReport]) -> Self {
        let mut summary = ReportSummary {
            total_packages,
            ..Default::default()
        };
        for package in packages {
            if !package.findings.is_empty() {
                summary.packages_with_findings += 1;
            }
            for finding in &package.findings {
                summary.total_findings += 1;
                match finding.severity {
                    Severity::Critical => summary.critical_findings += 1,
                    Severity::High => summary.high_findings += 1,
                    Severity::Medium => summary.medium_findings += 1,
                    Severity::Low => summary.low_findings += 1,
                }
            }
        }
        summary
    }
}

/// Names of the rule-based detection methods, for the report
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DetectionMethods {
    pub osv_api: String,
    pub malicious_packages: String,
    pub typosquatting: String,
    pub pattern_analysis: String,
}

impl Default for DetectionMethods {
    fn default() -> Self {
        Self {
            osv_api: "OSV vulnerability database queries per resolved package".to_string(),
            malicious_packages: "Exact match against bundled known-malicious package list".to_string(),
            typosquatting: "Edit distance against popular package names".to_string(),
            pattern_analysis: "Install-time lifecycle script pattern matching".to_string(),
        }
    }
}

/// Rule-based layer section of the report
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RuleBasedSection {
    pub description: String,
    pub confidence: f64,
    pub total_packages: usize,
    pub packages_with_issues: usize,
    pub total_issues: usize,
    pub detection_methods: DetectionMethods,
}

/// Cycle entry in the dependency graph section
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CycleDetail {
    pub cycle: Vec<String>,
    pub severity: String,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct CycleSection {
    pub count: usize,
    pub details: Vec<CycleDetail>,
}

/// Version conflict entry in the dependency graph section
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConflictDetail {
    pub package: String,
    pub conflicting_versions: Vec<String>,
    pub paths: Vec<Vec<String>>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ConflictSection {
    pub count: usize,
    pub details: Vec<ConflictDetail>,
}

/// Dependency graph section of the report
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct GraphSection {
    pub applicable: bool,
    pub total_packages: usize,
    pub circular_dependencies: CycleSection,
    pub version_conflicts: ConflictSection,
}

/// Optional supply-chain agent section
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SupplyChainSection {
    pub applicable: bool,
    pub description: String,
    pub total_packages_analyzed: usize,
    pub attacks_detected: usize,
    pub packages: Vec<serde_json::Value>,
    pub confidence: f64,
    pub source: String,
}

/// Optional code-analysis agent section
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CodeAnalysisSection {
    pub applicable: bool,
    pub description: String,
    pub total_packages_analyzed: usize,
    pub code_issues_found: usize,
    pub packages: Vec<serde_json::Value>,
    pub confidence: f64,
    pub source: String,
}

/// One package entry in security_findings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PackageReport {
    pub name: String,
    pub version: String,
    pub ecosystem: String,
    pub findings: Vec<Finding>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub vulnerabilities: Option<Vec<VulnerabilityRecord>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reputation_score: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub risk_factors: Option<Vec<RiskFactor>>,
    /// Aggregate package risk in [0, 1] derived from its findings
    pub risk_score: f64,
    /// Risk label derived from risk_score
    pub risk_level: String,
}

impl PackageReport {
    /// Derive the aggregate risk score and level from current findings
    pub fn recompute_risk(&mut self) {
        let highest = self.findings.iter().map(|f| f.severity).max();
        let (score, level) = match highest {
            Some(Severity::Critical) => (0.95, "critical"),
            Some(Severity::High) => (0.8, "high"),
            Some(Severity::Medium) => (0.5, "medium"),
            Some(Severity::Low) => (0.3, "low"),
            None => (0.1, "none"),
        };
        self.risk_score = score;
        self.risk_level = level.to_string();
    }

    /// Highest finding severity for sorting packages in the report
    pub fn highest_severity(&self) -> Option<Severity> {
        self.findings.iter().map(|f| f.severity).max()
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SecurityFindings {
    pub packages: Vec<PackageReport>,
}

/// Prioritized recommendation buckets
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Recommendations {
    pub immediate_actions: Vec<String>,
    pub preventive_measures: Vec<String>,
    pub monitoring: Vec<String>,
}

/// Per-agent execution details
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AgentDetail {
    pub success: bool,
    pub duration_seconds: f64,
    pub confidence: f64,
    pub packages_analyzed: usize,
    pub findings_count: usize,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

/// Agent execution overview
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct AgentInsights {
    pub successful_agents: Vec<String>,
    pub failed_agents: Vec<AgentErrorSummary>,
    pub degradation_level: String,
    pub agent_details: BTreeMap<String, AgentDetail>,
}

/// Timing and throughput metrics attached to the report
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct PerformanceMetrics {
    pub total_duration_seconds: f64,
    pub agent_durations: BTreeMap<String, f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub cache_hits: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub packages_analyzed: Option<usize>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub total_findings: Option<usize>,
}

/// The complete package-centric report written to disk
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FinalReport {
    pub metadata: ReportMetadata,
    pub summary: ReportSummary,
    pub github_rule_based: RuleBasedSection,
    pub dependency_graph: GraphSection,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub supply_chain_analysis: Option<SupplyChainSection>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub code_analysis: Option<CodeAnalysisSection>,
    pub security_findings: SecurityFindings,
    pub recommendations: Recommendations,
    pub agent_insights: AgentInsights,
    pub performance_metrics: PerformanceMetrics,
}

impl FinalReport {
    /// Sort packages by highest finding severity (worst first) then name, and
    /// findings within a package by severity then confidence
    pub fn sort_for_output(&mut self) {
        for package in &mut self.security_findings.packages {
            crate::models::finding::sort_findings(&mut package.findings);
        }
        self.security_findings.packages.sort_by(|a, b| {
            b.highest_severity()
                .cmp(&a.highest_severity())
                .then(a.name.cmp(&b.name))
        });
    }
}
