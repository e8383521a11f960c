use serde::{Deserialize, Serialize};
use std::fmt;
use crate::models::finding::Severity;

/// Reputation risk level thresholds over the weighted score
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RiskLevel {
    Low,
    Medium,
    High,
    Critical,
}

impl RiskLevel {
    /// Classify a weighted reputation score into a risk level.
    /// Scores at or above 0.7 are not considered a risk at all.
    pub fn from_score(score: f64) -> Option<Self> {
        if score < 0.3 {
            Some(RiskLevel::High)
        } else if score < 0.5 {
            Some(RiskLevel::Medium)
        } else if score < 0.7 {
            Some(RiskLevel::Low)
        } else {
            None
        }
    }

    /// Whether this level should surface as a low_reputation finding
    pub fn is_reportable_finding(&self) -> bool {
        matches!(self, RiskLevel::High | RiskLevel::Critical)
    }
}

impl fmt::Display for RiskLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RiskLevel::Low => write!(f, "low"),
            RiskLevel::Medium => write!(f, "medium"),
            RiskLevel::High => write!(f, "high"),
            RiskLevel::Critical => write!(f, "critical"),
        }
    }
}

/// One contributing risk condition, e.g. `new_package` or `abandoned`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RiskFactor {
    /// Stable factor type (e.g. "new_package", "unknown_author")
    #[serde(rename = "type")]
    pub factor_type: String,
    /// Severity of this factor on its own
    pub severity: Severity,
    /// Human-readable description
    pub description: String,
}

impl RiskFactor {
    pub fn new(
        factor_type: impl Into<String>,
        severity: Severity,
        description: impl Into<String>,
    ) -> Self {
        Self {
            factor_type: factor_type.into(),
            severity,
            description: description.into(),
        }
    }
}

/// The four weighted sub-scores behind a reputation score, each in [0, 1]
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ReputationFactors {
    /// Package age score (older is better)
    pub age: f64,
    /// Download volume score
    pub downloads: f64,
    /// Author/maintainer trust score
    pub author: f64,
    /// Maintenance recency score
    pub maintenance: f64,
}

impl Default for ReputationFactors {
    fn default() -> Self {
        // Neutral midpoint used when no metadata was available
        Self {
            age: 0.5,
            downloads: 0.5,
            author: 0.5,
            maintenance: 0.5,
        }
    }
}

/// Weighted reputation assessment of a package derived from registry metadata
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReputationRecord {
    /// Weighted overall score in [0, 1]
    pub score: f64,
    /// Risk level when the score is below the reporting threshold
    #[serde(skip_serializing_if = "Option::is_none")]
    pub risk_level: Option<RiskLevel>,
    /// Sub-scores behind the weighted total
    pub factors: ReputationFactors,
    /// Conditions that contributed risk
    pub risk_factors: Vec<RiskFactor>,
    /// Short explanation of the dominant factors
    pub reasoning: String,
    /// Fraction of factors that had usable input, in [0, 1]
    pub confidence: f64,
}

impl ReputationRecord {
    /// A neutral record used as fallback data when scoring was impossible
    pub fn neutral() -> Self {
        Self {
            score: 0.5,
            risk_level: RiskLevel::from_score(0.5),
            factors: ReputationFactors::default(),
            risk_factors: Vec::new(),
            reasoning: "No registry metadata available; neutral score assumed".to_string(),
            confidence: 0.0,
        }
    }
}
