use futures_util::stream::{self, StreamExt};
use reqwest::Client;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tokio::net::lookup_host;
use tracing::{info, warn};

use crate::models::finding::Severity;
use crate::models::package::PackageRef;
use crate::models::vulnerability::VulnerabilityRecord;

const OSV_API_BASE: &str = "https://api.osv.dev/v1";
const OSV_HOST: &str = "api.osv.dev";

/// Result of one batch query. `records` preserves the input order exactly;
/// packages whose query failed keep an empty list and appear in `errors`.
#[derive(Debug, Default)]
pub struct OsvBatchResult {
    /// `(package, vulnerabilities)` in input order
    pub records: Vec<(PackageRef, Vec<VulnerabilityRecord>)>,
    /// `(package identifier, error)` side channel for partial failures
    pub errors: Vec<(String, String)>,
    /// True when the DNS probe failed and no requests were issued
    pub offline: bool,
}

impl OsvBatchResult {
    fn offline_for(packages: &[PackageRef]) -> Self {
        Self {
            records: packages.iter().map(|p| (p.clone(), Vec::new())).collect(),
            errors: Vec::new(),
            offline: true,
        }
    }
}

/// OSV.dev client issuing one query per package with bounded concurrency.
///
/// A DNS reachability probe runs before any request; when it fails the whole
/// batch resolves to empty results in well under a second.
#[derive(Debug)]
pub struct OsvClient {
    client: Client,
    base_url: String,
    probe_host: String,
    concurrency: usize,
    request_timeout: Duration,
    max_retries: u32,
    retry_base: Duration,
}

impl OsvClient {
    pub fn new() -> Self {
        Self::with_base_url(OSV_API_BASE.to_string(), OSV_HOST.to_string())
    }

    /// Client with a custom endpoint and probe host (for testing)
    pub fn with_base_url(base_url: String, probe_host: String) -> Self {
        Self {
            client: Client::builder()
                .user_agent(format!("depsentry/{}", env!("CARGO_PKG_VERSION")))
                .build()
                .unwrap_or_default(),
            base_url,
            probe_host,
            concurrency: 10,
            request_timeout: Duration::from_secs(10),
            max_retries: 2,
            retry_base: Duration::from_millis(500),
        }
    }

    /// Override the concurrent request bound
    pub fn with_concurrency(mut self, concurrency: usize) -> Self {
        self.concurrency = concurrency.max(1);
        self
    }

    /// Override the per-request timeout
    pub fn with_request_timeout(mut self, timeout: Duration) -> Self {
        self.request_timeout = timeout;
        self
    }

    /// Query vulnerabilities for every package. Individual failures never
    /// block the rest of the batch.
    pub async fn query_batch(&self, packages: &[PackageRef]) -> OsvBatchResult {
        if packages.is_empty() {
            return OsvBatchResult::default();
        }

        if !self.probe_reachability().await {
            info!(
                "OSV endpoint {} unreachable, skipping {} vulnerability queries (offline)",
                self.probe_host,
                packages.len()
            );
            return OsvBatchResult::offline_for(packages);
        }

        let started = std::time::Instant::now();

        let mut pending = stream::FuturesUnordered::new();
        let mut remaining = packages.iter().enumerate();
        for (index, package) in remaining.by_ref().take(self.concurrency) {
            pending.push(query_one(self, index, package));
        }

        let mut indexed: Vec<(usize, Result<Vec<VulnerabilityRecord>, String>)> = Vec::new();
        while let Some(outcome) = pending.next().await {
            indexed.push(outcome);
            if let Some((index, package)) = remaining.next() {
                pending.push(query_one(self, index, package));
            }
        }
        indexed.sort_by_key(|(index, _)| *index);

        let mut result = OsvBatchResult::default();
        let mut succeeded = 0usize;
        for ((_, outcome), package) in indexed.into_iter().zip(packages.iter()) {
            match outcome {
                Ok(records) => {
                    succeeded += 1;
                    result.records.push((package.clone(), records));
                }
                Err(err) => {
                    result.errors.push((package.identifier(), err));
                    result.records.push((package.clone(), Vec::new()));
                }
            }
        }

        let elapsed = started.elapsed();
        let per_second = packages.len() as f64 / elapsed.as_secs_f64().max(0.001);
        info!(
            "OSV batch: {} succeeded, {} failed, {:.2}s total ({:.1} packages/s)",
            succeeded,
            result.errors.len(),
            elapsed.as_secs_f64(),
            per_second
        );
        result
    }

    /// DNS probe with a hard 1s budget; no retries
    async fn probe_reachability(&self) -> bool {
        let target = format!("{}:443", self.probe_host);
        match tokio::time::timeout(Duration::from_secs(1), lookup_host(target)).await {
            Ok(Ok(mut addrs)) => addrs.next().is_some(),
            _ => false,
        }
    }

    /// One package query with retries on retryable failures. 404 means "no
    /// vulnerabilities known", which is success.
    async fn query_single(&self, package: &PackageRef) -> Result<Vec<VulnerabilityRecord>, String> {
        let request = OsvQueryRequest {
            package: OsvPackage {
                name: package.name.clone(),
                ecosystem: package.ecosystem.osv_name().to_string(),
            },
            version: Some(package.best_version().to_string()),
        };
        let url = format!("{}/query", self.base_url);

        let mut attempt: u32 = 0;
        loop {
            let outcome = tokio::time::timeout(
                self.request_timeout,
                self.client.post(&url).json(&request).send(),
            )
            .await;

            let error = match outcome {
                Err(_) => format!("request timed out after {:?}", self.request_timeout),
                Ok(Err(err)) => format!("transport error: {}", err),
                Ok(Ok(response)) => {
                    let status = response.status();
                    if status == reqwest::StatusCode::NOT_FOUND {
                        return Ok(Vec::new());
                    }
                    if status.is_success() {
                        return match response.json::<OsvQueryResponse>().await {
                            Ok(body) => Ok(convert_response(body, package)),
                            Err(err) => Err(format!("invalid OSV response: {}", err)),
                        };
                    }
                    if status.is_server_error() || status == reqwest::StatusCode::TOO_MANY_REQUESTS
                    {
                        format!("server error {}", status)
                    } else {
                        return Err(format!("unexpected status {}", status));
                    }
                }
            };

            if attempt >= self.max_retries {
                warn!("OSV query for {} giving up: {}", package.identifier(), error);
                return Err(error);
            }
            tokio::time::sleep(self.retry_base * 2u32.pow(attempt)).await;
            attempt += 1;
        }
    }
}

fn query_one<'a>(
    client: &'a OsvClient,
    index: usize,
    package: &'a PackageRef,
) -> std::pin::Pin<
    Box<dyn std::future::Future<Output = (usize, Result<Vec<VulnerabilityRecord>, String>)> + Send + 'a>,
> {
    Box::pin(async move { (index, client.query_single(package).await) })
}

impl Default for OsvClient {
    fn default() -> Self {
        Self::new()
    }
}

fn convert_response(body: OsvQueryResponse, package: &PackageRef) -> Vec<VulnerabilityRecord> {
    body.vulns
        .unwrap_or_default()
        .iter()
        .map(|v| convert_vulnerability(v, package))
        .collect()
}

/// Normalize one OSV entry: prefer CVE aliases for the id, derive severity
/// from the CVSS score where present
fn convert_vulnerability(osv: &OsvVulnerability, package: &PackageRef) -> VulnerabilityRecord {
    let id = osv
        .aliases
        .as_ref()
        .and_then(|aliases| aliases.iter().find(|a| a.starts_with("CVE-")))
        .cloned()
        .unwrap_or_else(|| osv.id.clone());

    let cvss_score = osv
        .severity
        .as_ref()
        .and_then(|entries| entries.first())
        .and_then(|entry| entry.score.parse::<f64>().ok());
    let severity = cvss_score.map_or(Severity::Medium, Severity::from_cvss);

    let summary = osv
        .summary
        .clone()
        .or_else(|| osv.details.clone())
        .unwrap_or_else(|| format!("Vulnerability {}", osv.id));

    let mut affected_versions = Vec::new();
    let mut fixed_versions = Vec::new();
    for affected in osv.affected.as_deref().unwrap_or_default() {
        if let Some(versions) = &affected.versions {
            affected_versions.extend(versions.iter().cloned());
        }
        for range in affected.ranges.as_deref().unwrap_or_default() {
            for event in range.events.as_deref().unwrap_or_default() {
                if let Some(introduced) = &event.introduced {
                    affected_versions.push(format!(">={}", introduced));
                }
                if let Some(fixed) = &event.fixed {
                    fixed_versions.push(fixed.clone());
                }
            }
        }
    }
    affected_versions.dedup();
    fixed_versions.dedup();

    let references = osv
        .references
        .as_deref()
        .unwrap_or_default()
        .iter()
        .map(|r| r.url.clone())
        .collect();

    VulnerabilityRecord {
        id,
        summary,
        severity,
        cvss_score,
        affected_versions,
        fixed_versions,
        // The query was version-scoped, so a hit means this version
        is_current_version_affected: package.is_resolved() || !package.version_spec.is_empty(),
        references,
    }
}

#[derive(Debug, Serialize)]
struct OsvQueryRequest {
    package: OsvPackage,
    #[serde(skip_serializing_if = "Option::is_none")]
    version: Option<String>,
}

#[derive(Debug, Serialize)]
struct OsvPackage {
    name: String,
    ecosystem: String,
}

#[derive(Debug, Deserialize)]
struct OsvQueryResponse {
    vulns: Option<Vec<OsvVulnerability>>,
}

#[derive(Debug, Deserialize)]
struct OsvVulnerability {
    id: String,
    summary: Option<String>,
    details: Option<String>,
    severity: Option<Vec<OsvSeverity>>,
    references: Option<Vec<OsvReference>>,
    aliases: Option<Vec<String>>,
    affected: Option<Vec<OsvAffected>>,
}

#[derive(Debug, Deserialize)]
struct OsvSeverity {
    #[serde(rename = "type")]
    _type: String,
    score: String,
}

#[derive(Debug, Deserialize)]
struct OsvReference {
    #[serde(rename = "type")]
    _ref_type: String,
    url: String,
}

#[derive(Debug, Deserialize)]
struct OsvAffected {
    versions: Option<Vec<String>>,
    ranges: Option<Vec<OsvRange>>,
}

#[derive(Debug, Deserialize)]
struct OsvRange {
    events: Option<Vec<OsvEvent>>,
}

#[derive(Debug, Deserialize)]
struct OsvEvent {
    introduced: Option<String>,
    fixed: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::ecosystem::Ecosystem;

    fn pkg(name: &str) -> PackageRef {
        PackageRef::production(name.to_string(), "1.0.0".to_string(), Ecosystem::Npm)
    }

    #[test]
    fn test_convert_prefers_cve_alias() {
        let osv = OsvVulnerability {
            id: "GHSA-xxxx-yyyy-zzzz".to_string(),
            summary: Some("Prototype pollution".to_string()),
            details: None,
            severity: Some(vec![OsvSeverity {
                _type: "CVSS_V3".to_string(),
                score: "7.5".to_string(),
            }]),
            references: Some(vec![OsvReference {
                _ref_type: "ADVISORY".to_string(),
                url: "https://example.com/advisory".to_string(),
            }]),
            aliases: Some(vec!["CVE-2021-12345".to_string()]),
            affected: None,
        };

        let record = convert_vulnerability(&osv, &pkg("lodash"));
        assert_eq!(record.id, "CVE-2021-12345");
        assert_eq!(record.severity, Severity::High);
        assert_eq!(record.cvss_score, Some(7.5));
        assert_eq!(record.references, vec!["https://example.com/advisory"]);
    }

    #[test]
    fn test_convert_without_severity_defaults_medium() {
        let osv = OsvVulnerability {
            id: "MAL-0001".to_string(),
            summary: None,
            details: Some("Malicious code".to_string()),
            severity: None,
            references: None,
            aliases: None,
            affected: None,
        };

        let record = convert_vulnerability(&osv, &pkg("evil"));
        assert_eq!(record.id, "MAL-0001");
        assert_eq!(record.severity, Severity::Medium);
        assert_eq!(record.summary, "Malicious code");
    }

    #[test]
    fn test_fixed_versions_from_range_events() {
        let osv = OsvVulnerability {
            id: "GHSA-aaaa".to_string(),
            summary: Some("x".to_string()),
            details: None,
            severity: None,
            references: None,
            aliases: None,
            affected: Some(vec![OsvAffected {
                versions: Some(vec!["1.0.0".to_string()]),
                ranges: Some(vec![OsvRange {
                    events: Some(vec![
                        OsvEvent {
                            introduced: Some("0".to_string()),
                            fixed: None,
                        },
                        OsvEvent {
                            introduced: None,
                            fixed: Some("1.2.3".to_string()),
                        },
                    ]),
                }]),
            }]),
        };

        let record = convert_vulnerability(&osv, &pkg("sample"));
        assert!(record.affected_versions.contains(&"1.0.0".to_string()));
        assert_eq!(record.fixed_versions, vec!["1.2.3"]);
    }

    #[tokio::test]
    async fn test_offline_fast_fail_preserves_inputs() {
        // Unresolvable host forces the probe down the offline path
        let client = OsvClient::with_base_url(
            "http://invalid.depsentry-test".to_string(),
            "invalid.depsentry-test".to_string(),
        );
        let packages = vec![pkg("a"), pkg("b"), pkg("c")];

        let started = std::time::Instant::now();
        let result = client.query_batch(&packages).await;

        assert!(result.offline);
        assert!(started.elapsed() < Duration::from_secs(2));
        assert_eq!(result.records.len(), 3);
        assert!(result.records.iter().all(|(_, vulns)| vulns.is_empty()));
        assert_eq!(result.records[0].0.name, "a");
        assert_eq!(result.records[2].0.name, "c");
    }

    #[test]
    fn test_empty_batch() {
        let client = OsvClient::new();
        let result = tokio_test::block_on(client.query_batch(&[]));
        assert!(result.records.is_empty());
        assert!(!result.offline);
    }
}
