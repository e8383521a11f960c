use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use crate::models::ecosystem::Ecosystem;

/// Severity of a finding, ordered from least to most severe
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    Low,
    Medium,
    High,
    Critical,
}

impl Severity {
    /// Raise the severity by one level (critical stays critical)
    pub fn escalate(self) -> Self {
        match self {
            Severity::Low => Severity::Medium,
            Severity::Medium => Severity::High,
            Severity::High => Severity::Critical,
            Severity::Critical => Severity::Critical,
        }
    }

    /// Map a CVSS base score to a severity bucket
    pub fn from_cvss(score: f64) -> Self {
        match score {
            s if s >= 9.0 => Severity::Critical,
            s if s >= 7.0 => Severity::High,
            s if s >= 4.0 => Severity::Medium,
            _ => Severity::Low,
        }
    }
}

impl fmt::Display for Severity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Severity::Low => write!(f, "low"),
            Severity::Medium => write!(f, "medium"),
            Severity::High => write!(f, "high"),
            Severity::Critical => write!(f, "critical"),
        }
    }
}

impl std::str::FromStr for Severity {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "low" => Ok(Severity::Low),
            "medium" | "moderate" => Ok(Severity::Medium),
            "high" => Ok(Severity::High),
            "critical" => Ok(Severity::Critical),
            _ => Err(format!("Unknown severity: {}", s)),
        }
    }
}

/// Category of a security finding
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FindingType {
    Vulnerability,
    MaliciousPackage,
    Typosquat,
    LowReputation,
    MaliciousScript,
    SupplyChainAttack,
    CodeAnomaly,
}

impl fmt::Display for FindingType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            FindingType::Vulnerability => "vulnerability",
            FindingType::MaliciousPackage => "malicious_package",
            FindingType::Typosquat => "typosquat",
            FindingType::LowReputation => "low_reputation",
            FindingType::MaliciousScript => "malicious_script",
            FindingType::SupplyChainAttack => "supply_chain_attack",
            FindingType::CodeAnomaly => "code_anomaly",
        };
        write!(f, "{}", name)
    }
}

/// How a finding was produced
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DetectionMethod {
    RuleBased,
    Agent,
}

/// One normalized record of a security-relevant observation about a specific
/// package version
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Finding {
    /// Name of the affected package
    pub package_name: String,
    /// Version (resolved or raw spec) the observation applies to
    pub package_version: String,
    /// Ecosystem of the affected package
    pub ecosystem: Ecosystem,
    /// Category of the finding
    pub finding_type: FindingType,
    /// Severity bucket
    pub severity: Severity,
    /// Confidence in [0, 1]
    pub confidence: f64,
    /// Human-readable evidence lines
    pub evidence: Vec<String>,
    /// Suggested remediation steps
    pub remediation: Vec<String>,
    /// Subcomponent that produced the finding (e.g. "osv_api", "pattern_engine")
    pub source: String,
    /// Whether the finding came from the rule layer or an agent
    pub detection_method: DetectionMethod,
    /// Free-form extra attributes
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub extra: BTreeMap<String, serde_json::Value>,
}

impl Finding {
    /// Create a rule-based finding with empty evidence and remediation
    pub fn rule_based(
        package_name: impl Into<String>,
        package_version: impl Into<String>,
        ecosystem: Ecosystem,
        finding_type: FindingType,
        severity: Severity,
        confidence: f64,
        source: impl Into<String>,
    ) -> Self {
        Self {
            package_name: package_name.into(),
            package_version: package_version.into(),
            ecosystem,
            finding_type,
            severity,
            confidence: confidence.clamp(0.0, 1.0),
            evidence: Vec::new(),
            remediation: Vec::new(),
            source: source.into(),
            detection_method: DetectionMethod::RuleBased,
            extra: BTreeMap::new(),
        }
    }

    /// Append an evidence line
    pub fn with_evidence(mut self, line: impl Into<String>) -> Self {
        self.evidence.push(line.into());
        self
    }

    /// Append a remediation step
    pub fn with_remediation(mut self, step: impl Into<String>) -> Self {
        self.remediation.push(step.into());
        self
    }

    /// Dedupe key: findings with the same key are merged
    pub fn dedupe_key(&self) -> (String, String, FindingType, Severity) {
        (
            self.package_name.clone(),
            self.package_version.clone(),
            self.finding_type,
            self.severity,
        )
    }
}

/// Deduplicate findings by `(name, version, type, severity)`, merging evidence
/// and keeping the highest confidence. Input order of first occurrences is
/// preserved.
pub fn dedupe_findings(findings: Vec<Finding>) -> Vec<Finding> {
    let mut out: Vec<Finding> = Vec::new();

    for finding in findings {
        let key = finding.dedupe_key();
        if let Some(existing) = out.iter_mut().find(|f| f.dedupe_key() == key) {
            for line in finding.evidence {
                if !existing.evidence.contains(&line) {
                    existing.evidence.push(line);
                }
            }
            for step in finding.remediation {
                if !existing.remediation.contains(&step) {
                    existing.remediation.push(step);
                }
            }
            if finding.confidence > existing.confidence {
                existing.confidence = finding.confidence;
            }
        } else {
            out.push(finding);
        }
    }

    out
}

/// Sort findings by severity (critical first) then confidence descending
pub fn sort_findings(findings: &mut [Finding]) {
    findings.sort_by(|a, b| {
        b.severity
            .cmp(&a.severity)
            .then(b.confidence.partial_cmp(&a.confidence).unwrap_or(std::cmp::Ordering::Equal))
    });
}
