use serde::{Deserialize, Serialize};
use crate::models::finding::Severity;

/// A known vulnerability affecting a package, normalized from an OSV entry
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VulnerabilityRecord {
    /// Advisory identifier (CVE preferred, otherwise the OSV id)
    pub id: String,
    /// Short summary of the vulnerability
    pub summary: String,
    /// Severity bucket derived from CVSS where available
    pub severity: Severity,
    /// CVSS base score when the advisory carries one
    #[serde(skip_serializing_if = "Option::is_none")]
    pub cvss_score: Option<f64>,
    /// Version ranges or enumerated versions the advisory affects
    pub affected_versions: Vec<String>,
    /// Versions that contain the fix
    pub fixed_versions: Vec<String>,
    /// Whether the analyzed version falls in the affected range
    pub is_current_version_affected: bool,
    /// Reference URLs (advisory pages, patches)
    pub references: Vec<String>,
}

impl VulnerabilityRecord {
    /// Create a minimal record with just an id and summary
    pub fn new(id: impl Into<String>, summary: impl Into<String>, severity: Severity) -> Self {
        Self {
            id: id.into(),
            summary: summary.into(),
            severity,
            cvss_score: None,
            affected_versions: Vec::new(),
            fixed_versions: Vec::new(),
            is_current_version_affected: true,
            references: Vec::new(),
        }
    }

    /// Highest severity across a list of records, if any
    pub fn highest_severity(records: &[VulnerabilityRecord]) -> Option<Severity> {
        records.iter().map(|r| r.severity).max()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_highest_severity() {
        let records = vec![
            VulnerabilityRecord::new("CVE-2024-0001", "a", Severity::Medium),
            VulnerabilityRecord::new("CVE-2024-0002", "b", Severity::Critical),
            VulnerabilityRecord::new("CVE-2024-0003", "c", Severity::Low),
        ];
        assert_eq!(
            VulnerabilityRecord::highest_severity(&records),
            Some(Severity::Critical)
        );
        assert_eq!(VulnerabilityRecord::highest_severity(&[]), None);
    }

    #[test]
    fn test_cvss_skipped_when_absent() {
        let record = VulnerabilityRecord::new("GHSA-xxxx", "test", Severity::High);
        let json = serde_json::to_string(&record).unwrap();
        assert!(!json.contains("cvss_score"));
    }
}
