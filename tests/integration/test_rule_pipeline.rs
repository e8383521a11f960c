use std::sync::Arc;
use std::time::Duration;

use depsentry::models::ecosystem::Ecosystem;
use depsentry::models::finding::FindingType;
use depsentry::models::manifest::Manifest;
use depsentry::models::package::PackageRef;
use depsentry::services::cache::CacheStore;
use depsentry::services::detector::RuleDetector;
use depsentry::services::osv_client::OsvClient;
use depsentry::services::registry_client::RegistryClient;
use depsentry::services::resolver::DependencyResolver;

/// npm registry body with a single published version and its dependencies
fn npm_body(name: &str, dependencies: serde_json::Value) -> String {
    serde_json::json!({
        "name": name,
        "dist-tags": {"latest": "1.0.0"},
        "time": {
            "created": "2019-03-01T00:00:00.000Z",
            "modified": "2024-01-01T00:00:00.000Z"
        },
        "maintainers": [{"name": "alice"}, {"name": "bob"}, {"name": "carol"}],
        "repository": {"url": "https://github.com/test/repo"},
        "versions": {
            "1.0.0": {"dependencies": dependencies}
        }
    })
    .to_string()
}

async fn mock_registry(server: &mut mockito::ServerGuard) {
    for (name, deps) in [
        ("liba", serde_json::json!({"libb": "^1.0.0", "libc": "^1.0.0"})),
        ("libb", serde_json::json!({"libc": "~1.2.0"})),
        ("libc", serde_json::json!({"liba": "^1.0.0"})),
    ] {
        server
            .mock("GET", format!("/{}", name).as_str())
            .with_status(200)
            .with_body(npm_body(name, deps))
            .expect_at_least(1)
            .create_async()
            .await;
        server
            .mock(
                "GET",
                format!("/downloads/point/last-week/{}", name).as_str(),
            )
            .with_status(200)
            .with_body(r#"{"downloads": 250000}"#)
            .create_async()
            .await;
    }
}

fn manifest_with_liba() -> Manifest {
    let mut manifest = Manifest::new(Ecosystem::Npm, "package.json");
    manifest.project_name = "pipeline-demo".to_string();
    manifest.packages.push(PackageRef::production(
        "liba".to_string(),
        "^1.0.0".to_string(),
        Ecosystem::Npm,
    ));
    manifest
}

#[tokio::test]
async fn graph_resolves_cycles_and_conflicts_from_registry() {
    let mut server = mockito::Server::new_async().await;
    mock_registry(&mut server).await;

    let cache = Arc::new(CacheStore::in_memory());
    let registry = Arc::new(
        RegistryClient::with_base_urls(cache, server.url(), server.url(), server.url())
            .with_retry_base(Duration::from_millis(10)),
    );
    let resolver = DependencyResolver::new(registry).with_max_depth(4);

    let graph = resolver.build_graph(&manifest_with_liba()).await;

    // All three packages became nodes, every non-root node has a parent
    assert_eq!(graph.node_count(), 3);
    assert!(graph.orphan_nodes().is_empty());
    assert_eq!(graph.roots.len(), 1);

    // liba -> libc -> liba closes a cycle; its nodes exist in the graph
    assert_eq!(graph.cycles.len(), 1);
    for name in &graph.cycles[0].cycle {
        assert!(
            graph.nodes.values().any(|n| n.package.name == *name),
            "cycle names a node missing from the graph: {}",
            name
        );
    }

    // libc is declared as ^1.0.0 and ~1.2.0: exactly one conflict entry
    assert_eq!(graph.conflicts.len(), 1);
    let conflict = &graph.conflicts[0];
    assert_eq!(conflict.package, "libc");
    assert_eq!(conflict.conflicting_versions.len(), 2);
    assert!(conflict.conflicting_versions.contains(&"^1.0.0".to_string()));
    assert!(conflict.conflicting_versions.contains(&"~1.2.0".to_string()));
}

#[tokio::test]
async fn detector_combines_osv_results_with_graph() {
    let mut server = mockito::Server::new_async().await;
    mock_registry(&mut server).await;

    // liba has one advisory; libb and libc find nothing
    server
        .mock("POST", "/query")
        .match_body(mockito::Matcher::PartialJsonString(
            r#"{"package": {"name": "liba"}}"#.to_string(),
        ))
        .with_status(200)
        .with_body(
            serde_json::json!({
                "vulns": [{
                    "id": "GHSA-test-0001",
                    "summary": "Remote code execution in liba",
                    "aliases": ["CVE-2024-41234"],
                    "severity": [{"type": "CVSS_V3", "score": "9.8"}]
                }]
            })
            .to_string(),
        )
        .create_async()
        .await;
    for name in ["libb", "libc"] {
        server
            .mock("POST", "/query")
            .match_body(mockito::Matcher::PartialJsonString(format!(
                r#"{{"package": {{"name": "{}"}}}}"#,
                name
            )))
            .with_status(200)
            .with_body(r#"{}"#)
            .create_async()
            .await;
    }

    let cache = Arc::new(CacheStore::in_memory());
    let registry = Arc::new(
        RegistryClient::with_base_urls(cache, server.url(), server.url(), server.url())
            .with_retry_base(Duration::from_millis(10)),
    );
    let osv = Arc::new(OsvClient::with_base_url(server.url(), "localhost".to_string()));

    let manifest = manifest_with_liba();
    let resolver = DependencyResolver::new(Arc::clone(&registry)).with_max_depth(4);
    let graph = resolver.build_graph(&manifest).await;

    let detector = RuleDetector::new(osv, registry, true);
    let temp = tempfile::tempdir().unwrap();
    let outcome = detector.detect(&manifest, &graph, temp.path()).await;

    assert!(!outcome.osv_offline);
    // The advisory shows up as a finding and in the per-package map
    let vuln_findings: Vec<_> = outcome
        .findings
        .iter()
        .filter(|f| f.finding_type == FindingType::Vulnerability)
        .collect();
    assert_eq!(vuln_findings.len(), 1);
    assert_eq!(vuln_findings[0].package_name, "liba");
    assert!(vuln_findings[0].evidence[0].contains("CVE-2024-41234"));
    assert_eq!(outcome.vulnerabilities["liba"].len(), 1);

    // Healthy metadata, so no reputation findings; records are present
    assert!(!outcome.reputation_skipped);
    assert!(outcome.reputations.contains_key("liba"));
}

#[tokio::test]
async fn osv_batch_preserves_input_order_under_partial_failure() {
    let mut server = mockito::Server::new_async().await;
    // Persistent 500 for libb; success for liba and libc
    server
        .mock("POST", "/query")
        .match_body(mockito::Matcher::PartialJsonString(
            r#"{"package": {"name": "libb"}}"#.to_string(),
        ))
        .with_status(500)
        .expect_at_least(1)
        .create_async()
        .await;
    for name in ["liba", "libc"] {
        server
            .mock("POST", "/query")
            .match_body(mockito::Matcher::PartialJsonString(format!(
                r#"{{"package": {{"name": "{}"}}}}"#,
                name
            )))
            .with_status(200)
            .with_body(r#"{}"#)
            .create_async()
            .await;
    }

    let osv = OsvClient::with_base_url(server.url(), "localhost".to_string());
    let packages: Vec<PackageRef> = ["liba", "libb", "libc"]
        .iter()
        .map(|n| PackageRef::production(n.to_string(), "1.0.0".to_string(), Ecosystem::Npm))
        .collect();

    let result = osv.query_batch(&packages).await;

    // Exactly N entries, in input order, with the failure noted aside
    assert_eq!(result.records.len(), 3);
    let names: Vec<&str> = result.records.iter().map(|(p, _)| p.name.as_str()).collect();
    assert_eq!(names, vec!["liba", "libb", "libc"]);
    assert_eq!(result.errors.len(), 1);
    assert!(result.errors[0].0.contains("libb"));
}
