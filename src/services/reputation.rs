use chrono::{DateTime, Utc};

use crate::models::finding::Severity;
use crate::models::reputation::{ReputationFactors, ReputationRecord, RiskFactor, RiskLevel};
use crate::services::registry_client::RegistryMetadata;

const WEIGHT_AGE: f64 = 0.30;
const WEIGHT_DOWNLOADS: f64 = 0.30;
const WEIGHT_AUTHOR: f64 = 0.20;
const WEIGHT_MAINTENANCE: f64 = 0.20;

/// Computes a weighted 0–1 reputation score from registry metadata and
/// identifies the contributing risk factors
#[derive(Debug, Default, Clone, Copy)]
pub struct ReputationScorer;

impl ReputationScorer {
    pub fn new() -> Self {
        Self
    }

    /// Score a package's metadata as of `now`
    pub fn score(&self, metadata: &RegistryMetadata, now: DateTime<Utc>) -> ReputationRecord {
        let mut usable = 0u32;

        let age_days = metadata.published_at.map(|ts| (now - ts).num_days());
        let age = match age_days {
            Some(days) => {
                usable += 1;
                age_score(days)
            }
            None => 0.5,
        };

        let downloads = match metadata.weekly_downloads {
            Some(count) => {
                usable += 1;
                download_score(count)
            }
            None => 0.5,
        };

        let author_known = metadata.author.is_some() || !metadata.maintainers.is_empty();
        let author = if author_known {
            usable += 1;
            author_score(metadata)
        } else {
            0.3
        };

        let staleness_days = metadata.last_updated_at.map(|ts| (now - ts).num_days());
        let maintenance = match staleness_days {
            Some(days) => {
                usable += 1;
                maintenance_score(days)
            }
            None => 0.5,
        };

        let factors = ReputationFactors {
            age,
            downloads,
            author,
            maintenance,
        };
        let score = WEIGHT_AGE * age
            + WEIGHT_DOWNLOADS * downloads
            + WEIGHT_AUTHOR * author
            + WEIGHT_MAINTENANCE * maintenance;

        let mut risk_factors = Vec::new();
        if let Some(days) = age_days {
            if days < 30 {
                risk_factors.push(RiskFactor::new(
                    "new_package",
                    Severity::Medium,
                    format!("First published {} days ago", days.max(0)),
                ));
            }
        }
        if maintenance < 0.3 {
            let days = staleness_days.unwrap_or(0);
            risk_factors.push(RiskFactor::new(
                "abandoned",
                Severity::Medium,
                format!("No release or update in {} days", days),
            ));
        }
        if author < 0.4 {
            risk_factors.push(RiskFactor::new(
                "unknown_author",
                Severity::Low,
                "No identifiable author or maintainer".to_string(),
            ));
        }
        if downloads < 0.3 {
            risk_factors.push(RiskFactor::new(
                "low_downloads",
                Severity::Low,
                format!(
                    "Weekly downloads below 100 ({})",
                    metadata.weekly_downloads.unwrap_or(0)
                ),
            ));
        }
        if has_suspicious_metadata(metadata) {
            risk_factors.push(RiskFactor::new(
                "suspicious_patterns",
                Severity::Medium,
                "Metadata anomalies: no repository URL and a throwaway author name".to_string(),
            ));
        }

        let reasoning = build_reasoning(&factors, &risk_factors);

        ReputationRecord {
            score,
            risk_level: RiskLevel::from_score(score),
            factors,
            risk_factors,
            reasoning,
            confidence: f64::from(usable) / 4.0,
        }
    }
}

/// Days since first publish → [0, 1]
fn age_score(days: i64) -> f64 {
    match days {
        d if d < 30 => 0.2,
        d if d < 90 => 0.4,
        d if d < 365 => 0.7,
        d if d < 730 => 0.85,
        _ => 1.0,
    }
}

/// Weekly downloads → [0, 1]
fn download_score(weekly: u64) -> f64 {
    match weekly {
        w if w < 100 => 0.2,
        w if w < 1_000 => 0.4,
        w if w < 10_000 => 0.7,
        w if w < 100_000 => 0.85,
        _ => 1.0,
    }
}

/// Author trust: organizations and established maintainers rank higher than
/// single individuals
fn author_score(metadata: &RegistryMetadata) -> f64 {
    let author = metadata.author.as_deref().unwrap_or("");
    let lowered = author.to_lowercase();
    let looks_organizational = lowered.contains("inc.")
        || lowered.contains("foundation")
        || lowered.contains("team")
        || lowered.contains("contributors");

    if looks_organizational {
        1.0
    } else if metadata.maintainers.len() >= 3 {
        0.7
    } else if !author.is_empty() || !metadata.maintainers.is_empty() {
        0.5
    } else {
        0.3
    }
}

/// Days since last update → [0, 1]
fn maintenance_score(days: i64) -> f64 {
    match days {
        d if d < 180 => 1.0,
        d if d < 365 => 0.7,
        d if d < 730 => 0.4,
        _ => 0.2,
    }
}

/// Missing repository plus a throwaway author name is a classic publishing
/// anomaly
fn has_suspicious_metadata(metadata: &RegistryMetadata) -> bool {
    let no_repository = metadata
        .repository_url
        .as_deref()
        .map_or(true, |url| url.trim().is_empty());
    let throwaway_author = metadata
        .author
        .as_deref()
        .map_or(false, |a| a.trim().len() <= 1);
    no_repository && throwaway_author
}

fn build_reasoning(factors: &ReputationFactors, risk_factors: &[RiskFactor]) -> String {
    let mut parts = Vec::new();
    let weakest = [
        ("age", factors.age),
        ("downloads", factors.downloads),
        ("author", factors.author),
        ("maintenance", factors.maintenance),
    ]
    .into_iter()
    .min_by(|a, b| a.1.partial_cmp(&b.1).unwrap_or(std::cmp::Ordering::Equal));
    if let Some((name, value)) = weakest {
        parts.push(format!("weakest factor is {} at {:.2}", name, value));
    }
    if risk_factors.is_empty() {
        parts.push("no risk conditions triggered".to_string());
    } else {
        let names: Vec<&str> = risk_factors.iter().map(|f| f.factor_type.as_str()).collect();
        parts.push(format!("risk conditions: {}", names.join(", ")));
    }
    parts.join("; ")
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    fn metadata_published_days_ago(age_days: i64, updated_days_ago: i64) -> RegistryMetadata {
        let now = Utc::now();
        RegistryMetadata {
            name: "sample".to_string(),
            version: Some("1.0.0".to_string()),
            published_at: Some(now - Duration::days(age_days)),
            last_updated_at: Some(now - Duration::days(updated_days_ago)),
            maintainers: vec!["alice".to_string()],
            dependencies: Default::default(),
            weekly_downloads: Some(50_000),
            repository_url: Some("https://github.com/sample/sample".to_string()),
            author: Some("alice".to_string()),
            ..Default::default()
        }
    }

    #[test]
    fn test_age_score_buckets() {
        assert_eq!(age_score(10), 0.2);
        assert_eq!(age_score(45), 0.4);
        assert_eq!(age_score(200), 0.7);
        assert_eq!(age_score(500), 0.85);
        assert_eq!(age_score(1000), 1.0);
    }

    #[test]
    fn test_download_score_buckets() {
        assert_eq!(download_score(50), 0.2);
        assert_eq!(download_score(500), 0.4);
        assert_eq!(download_score(5_000), 0.7);
        assert_eq!(download_score(50_000), 0.85);
        assert_eq!(download_score(500_000), 1.0);
    }

    #[test]
    fn test_maintenance_score_buckets() {
        assert_eq!(maintenance_score(30), 1.0);
        assert_eq!(maintenance_score(300), 0.7);
        assert_eq!(maintenance_score(600), 0.4);
        assert_eq!(maintenance_score(900), 0.2);
    }

    #[test]
    fn test_established_package_scores_high() {
        let scorer = ReputationScorer::new();
        let record = scorer.score(&metadata_published_days_ago(1000, 30), Utc::now());

        assert!(record.score > 0.7, "score was {}", record.score);
        assert_eq!(record.risk_level, None);
        assert_eq!(record.confidence, 1.0);
        assert!(record.risk_factors.is_empty());
    }

    #[test]
    fn test_new_package_flagged() {
        let scorer = ReputationScorer::new();
        let mut metadata = metadata_published_days_ago(5, 5);
        metadata.weekly_downloads = Some(10);
        let record = scorer.score(&metadata, Utc::now());

        let types: Vec<&str> = record
            .risk_factors
            .iter()
            .map(|f| f.factor_type.as_str())
            .collect();
        assert!(types.contains(&"new_package"));
        assert!(types.contains(&"low_downloads"));
        assert!(record.risk_level.is_some());
    }

    #[test]
    fn test_abandoned_package_flagged() {
        let scorer = ReputationScorer::new();
        let record = scorer.score(&metadata_published_days_ago(2000, 1500), Utc::now());

        assert!(record
            .risk_factors
            .iter()
            .any(|f| f.factor_type == "abandoned"));
    }

    #[test]
    fn test_suspicious_metadata_flagged() {
        let scorer = ReputationScorer::new();
        let mut metadata = metadata_published_days_ago(10, 10);
        metadata.repository_url = None;
        metadata.author = Some("x".to_string());
        metadata.maintainers = vec!["x".to_string()];
        let record = scorer.score(&metadata, Utc::now());

        assert!(record
            .risk_factors
            .iter()
            .any(|f| f.factor_type == "suspicious_patterns"));
    }

    #[test]
    fn test_confidence_reflects_missing_inputs() {
        let scorer = ReputationScorer::new();
        let metadata = RegistryMetadata {
            name: "bare".to_string(),
            ..Default::default()
        };
        let record = scorer.score(&metadata, Utc::now());

        assert_eq!(record.confidence, 0.0);
        // Unknown author contributes its floor value to the weighted sum
        assert!(record.score < 0.6);
    }

    #[test]
    fn test_weights_sum_to_one() {
        let total = WEIGHT_AGE + WEIGHT_DOWNLOADS + WEIGHT_AUTHOR + WEIGHT_MAINTENANCE;
        assert!((total - 1.0).abs() < f64::EPSILON);
    }
}
