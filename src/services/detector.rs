use std::collections::BTreeMap;
use std::path::Path;
use std::sync::Arc;
use tracing::{info, warn};

use crate::models::ecosystem::Ecosystem;
use crate::models::finding::{dedupe_findings, Finding, FindingType, Severity};
use crate::models::graph::DependencyGraph;
use crate::models::manifest::Manifest;
use crate::models::package::PackageRef;
use crate::models::reputation::ReputationRecord;
use crate::models::vulnerability::VulnerabilityRecord;
use crate::services::osv_client::OsvClient;
use crate::services::registry_client::RegistryClient;
use crate::services::reputation::ReputationScorer;
use crate::services::script_patterns::ScriptPatternEngine;

/// Above this many resolved packages the rule layer skips per-package
/// reputation lookups (the reputation agent still runs)
const REPUTATION_SCALE_LIMIT: usize = 100;

/// Known-malicious npm packages (historical supply-chain incidents)
const KNOWN_MALICIOUS_NPM: &[&str] = &[
    "flatmap-stream",
    "getcookies",
    "crossenv",
    "cross-env.js",
    "event-stream-malicious",
    "eslint-scope-hijack",
    "ua-parser-js-malicious",
    "coa-malicious",
    "rc-malicious",
    "node-ipc-protestware",
];

/// Known-malicious PyPI packages
const KNOWN_MALICIOUS_PYPI: &[&str] = &[
    "jeilyfish",
    "python3-dateutil-malicious",
    "ctx",
    "pymafka",
    "colourama",
    "django-server",
    "pytagora",
    "requesys",
];

/// Popular npm names used for typosquat distance checks
const POPULAR_NPM: &[&str] = &[
    "react", "express", "lodash", "axios", "webpack", "typescript", "eslint", "jest",
    "chalk", "commander", "moment", "vue", "next", "request", "debug", "async",
    "underscore", "rxjs", "prettier", "dotenv",
];

/// Popular PyPI names used for typosquat distance checks
const POPULAR_PYPI: &[&str] = &[
    "requests", "urllib3", "numpy", "pandas", "django", "flask", "setuptools", "pip",
    "boto3", "cryptography", "pillow", "scipy", "pytest", "click", "pyyaml", "sqlalchemy",
];

/// Everything the rule layer produced for one analysis
#[derive(Debug, Default)]
pub struct DetectionOutcome {
    /// Deduplicated rule-based findings
    pub findings: Vec<Finding>,
    /// Vulnerabilities per package name (OSV)
    pub vulnerabilities: BTreeMap<String, Vec<VulnerabilityRecord>>,
    /// Reputation per package name (absent when skipped)
    pub reputations: BTreeMap<String, ReputationRecord>,
    /// True when the package count exceeded the reputation scale limit
    pub reputation_skipped: bool,
    /// True when the OSV client reported itself offline
    pub osv_offline: bool,
    /// OSV side-channel errors (package identifier → error)
    pub osv_errors: Vec<(String, String)>,
}

/// Rule-based detection driver: composes the manifest, graph, OSV client,
/// reputation scorer, script engine, block-list and typosquat checks into raw
/// findings
pub struct RuleDetector {
    osv: Arc<OsvClient>,
    registry: Arc<RegistryClient>,
    scorer: ReputationScorer,
    script_engine: ScriptPatternEngine,
    osv_enabled: bool,
}

impl RuleDetector {
    pub fn new(osv: Arc<OsvClient>, registry: Arc<RegistryClient>, osv_enabled: bool) -> Self {
        Self {
            osv,
            registry,
            scorer: ReputationScorer::new(),
            script_engine: ScriptPatternEngine::new(),
            osv_enabled,
        }
    }

    /// Run every rule-based check over a parsed manifest and its graph
    pub async fn detect(
        &self,
        manifest: &Manifest,
        graph: &DependencyGraph,
        project_dir: &Path,
    ) -> DetectionOutcome {
        let mut outcome = DetectionOutcome::default();
        let mut findings = Vec::new();

        self.scan_scripts(manifest, project_dir, &mut findings);

        let packages = all_packages(manifest, graph);
        for package in &packages {
            if let Some(finding) = check_known_malicious(package) {
                findings.push(finding);
            }
        }
        for package in &manifest.packages {
            if let Some(finding) = check_typosquat(package) {
                findings.push(finding);
            }
        }

        if self.osv_enabled {
            let batch = self.osv.query_batch(&packages).await;
            outcome.osv_offline = batch.offline;
            outcome.osv_errors = batch.errors;
            for (package, records) in batch.records {
                if records.is_empty() {
                    continue;
                }
                for record in &records {
                    findings.push(vulnerability_finding(&package, record));
                }
                outcome.vulnerabilities.insert(package.name.clone(), records);
            }
        } else {
            info!("OSV queries disabled by configuration");
        }

        if packages.len() > REPUTATION_SCALE_LIMIT {
            info!(
                "{} packages exceed the reputation scale limit ({}), skipping rule-layer reputation checks",
                packages.len(),
                REPUTATION_SCALE_LIMIT
            );
            outcome.reputation_skipped = true;
        } else {
            self.score_reputations(manifest, &mut outcome, &mut findings).await;
        }

        outcome.findings = dedupe_findings(findings);
        outcome
    }

    /// Scan npm lifecycle scripts and, for Python projects, the setup.py
    /// source
    fn scan_scripts(&self, manifest: &Manifest, project_dir: &Path, findings: &mut Vec<Finding>) {
        let subject = if manifest.project_name.is_empty() {
            manifest.source_file.clone()
        } else {
            manifest.project_name.clone()
        };

        let mut matches = self.script_engine.scan_npm_scripts(&manifest.scripts);

        if manifest.ecosystem == Ecosystem::Pypi {
            let setup_py = project_dir.join("setup.py");
            if setup_py.exists() {
                match std::fs::read_to_string(&setup_py) {
                    Ok(source) => matches.extend(self.script_engine.scan_setup_py(&source)),
                    Err(err) => warn!("setup.py unreadable, skipping script scan: {}", err),
                }
            }
        }

        for m in matches {
            let mut finding = Finding::rule_based(
                subject.clone(),
                "0.0.0",
                manifest.ecosystem,
                FindingType::MaliciousScript,
                m.severity,
                m.confidence,
                "pattern_engine",
            )
            .with_remediation(format!("Remove or audit the '{}' script", m.hook))
            .with_remediation("Install with --ignore-scripts until the script is vetted".to_string());
            finding.evidence = m.evidence();
            finding.extra.insert(
                "script_content_key".to_string(),
                serde_json::Value::String(ScriptPatternEngine::content_key(&m.command)),
            );
            finding.extra.insert(
                "script_complexity_score".to_string(),
                serde_json::json!(ScriptPatternEngine::complexity_score(&m.command)),
            );
            findings.push(finding);
        }
    }

    /// Fetch metadata and score reputation for every direct package
    async fn score_reputations(
        &self,
        manifest: &Manifest,
        outcome: &mut DetectionOutcome,
        findings: &mut Vec<Finding>,
    ) {
        let now = chrono::Utc::now();
        for package in &manifest.packages {
            let metadata = match self
                .registry
                .fetch(package.ecosystem, &package.name, None)
                .await
            {
                Ok(metadata) => metadata,
                Err(err) => {
                    warn!("reputation metadata unavailable for {}: {}", package.name, err);
                    continue;
                }
            };

            let record = self.scorer.score(&metadata, now);
            if let Some(level) = record.risk_level {
                if level.is_reportable_finding() {
                    let mut finding = Finding::rule_based(
                        package.name.clone(),
                        package.best_version(),
                        package.ecosystem,
                        FindingType::LowReputation,
                        Severity::Medium,
                        record.confidence.max(0.5),
                        "reputation_scorer",
                    )
                    .with_evidence(format!("reputation score {:.2} ({})", record.score, level))
                    .with_remediation("Review the package's maintainers and history before trusting it".to_string());
                    for factor in &record.risk_factors {
                        finding.evidence.push(factor.description.clone());
                    }
                    findings.push(finding);
                }
            }
            outcome.reputations.insert(package.name.clone(), record);
        }
    }
}

/// Direct packages plus every graph node, deduped by name
fn all_packages(manifest: &Manifest, graph: &DependencyGraph) -> Vec<PackageRef> {
    let mut seen = std::collections::HashSet::new();
    let mut out = Vec::new();
    for package in &manifest.packages {
        if seen.insert((package.ecosystem, package.name.clone())) {
            out.push(package.clone());
        }
    }
    for node in graph.nodes.values() {
        let key = (node.package.ecosystem, node.package.name.clone());
        if seen.insert(key) {
            out.push(node.package.clone());
        }
    }
    out
}

/// Exact block-list match
fn check_known_malicious(package: &PackageRef) -> Option<Finding> {
    let list = match package.ecosystem {
        Ecosystem::Npm => KNOWN_MALICIOUS_NPM,
        Ecosystem::Pypi => KNOWN_MALICIOUS_PYPI,
    };
    if !list.contains(&package.name.as_str()) {
        return None;
    }
    Some(
        Finding::rule_based(
            package.name.clone(),
            package.best_version(),
            package.ecosystem,
            FindingType::MaliciousPackage,
            Severity::Critical,
            0.95,
            "malicious_package_list",
        )
        .with_evidence(format!(
            "'{}' is on the known-malicious package list",
            package.name
        ))
        .with_remediation(format!("Remove {} immediately and rotate any exposed credentials", package.name)),
    )
}

/// Edit-distance check against the popular-package list for the ecosystem
fn check_typosquat(package: &PackageRef) -> Option<Finding> {
    let popular = match package.ecosystem {
        Ecosystem::Npm => POPULAR_NPM,
        Ecosystem::Pypi => POPULAR_PYPI,
    };
    // A popular package is never its own typosquat
    if popular.contains(&package.name.as_str()) {
        return None;
    }

    let (target, distance) = popular
        .iter()
        .map(|candidate| (*candidate, levenshtein(&package.name, candidate)))
        .min_by_key(|(_, d)| *d)?;

    let confidence = match distance {
        1 => 0.9,
        2 => 0.75,
        _ => return None,
    };

    Some(
        Finding::rule_based(
            package.name.clone(),
            package.best_version(),
            package.ecosystem,
            FindingType::Typosquat,
            Severity::High,
            confidence,
            "typosquat_check",
        )
        .with_evidence(format!(
            "'{}' is edit distance {} from popular package '{}'",
            package.name, distance, target
        ))
        .with_remediation(format!("Did you mean '{}'? Verify the intended package name", target)),
    )
}

/// Convert an OSV record into a vulnerability finding
fn vulnerability_finding(package: &PackageRef, record: &VulnerabilityRecord) -> Finding {
    let mut finding = Finding::rule_based(
        package.name.clone(),
        package.best_version(),
        package.ecosystem,
        FindingType::Vulnerability,
        record.severity,
        0.9,
        "osv_api",
    )
    .with_evidence(format!("{}: {}", record.id, record.summary));
    if let Some(fixed) = record.fixed_versions.first() {
        finding
            .remediation
            .push(format!("Upgrade {} to {} or later", package.name, fixed));
    } else {
        finding
            .remediation
            .push(format!("Review advisory {} and consider replacing {}", record.id, package.name));
    }
    finding
}

/// Classic two-row Levenshtein distance
fn levenshtein(a: &str, b: &str) -> usize {
    let a: Vec<char> = a.chars().collect();
    let b: Vec<char> = b.chars().collect();
    if a.is_empty() {
        return b.len();
    }
    if b.is_empty() {
        return a.len();
    }

    let mut previous: Vec<usize> = (0..=b.len()).collect();
    let mut current = vec![0usize; b.len() + 1];

    for (i, ca) in a.iter().enumerate() {
        current[0] = i + 1;
        for (j, cb) in b.iter().enumerate() {
            let substitution = previous[j] + usize::from(ca != cb);
            current[j + 1] = substitution
                .min(previous[j + 1] + 1)
                .min(current[j] + 1);
        }
        std::mem::swap(&mut previous, &mut current);
    }
    previous[b.len()]
}
