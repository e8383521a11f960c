use std::path::PathBuf;
use std::sync::Arc;
use std::time::Instant;
use tracing::info;

use crate::agents::orchestrator::{Orchestrator, RunInfo};
use crate::agents::code::CodeAgent;
use crate::agents::reputation::ReputationAgent;
use crate::agents::supply_chain::SupplyChainAgent;
use crate::agents::synthesis::SynthesisAgent;
use crate::agents::vulnerability::VulnerabilityAgent;
use crate::agents::SharedContext;
use crate::models::package::PackageRef;
use crate::models::report::REPORT_FILE_NAME;
use crate::services::cache::CacheStore;
use crate::services::detector::RuleDetector;
use crate::services::llm_client::LlmClient;
use crate::services::manifest_parser::ManifestParser;
use crate::services::osv_client::OsvClient;
use crate::services::registry_client::RegistryClient;
use crate::services::resolver::DependencyResolver;
use crate::utils::config::AnalyzerConfig;
use crate::utils::error::{validate_local_target, Result};
use crate::utils::target::{resolve_target, write_report_atomically, InputMode};

/// Runs the full analysis pipeline for one target and writes the report
pub struct AnalyzeCommand;

impl AnalyzeCommand {
    /// Execute an analysis. Returns the path the report was written to.
    pub async fn execute(target: String, config: AnalyzerConfig) -> Result<PathBuf> {
        let started = Instant::now();
        let analysis_id = format!(
            "analysis-{}-{}",
            chrono::Utc::now().timestamp_millis(),
            std::process::id()
        );

        // Proactive validation: resolve and check the target before any agent
        let resolved = resolve_target(
            &target,
            config.github_token.as_deref(),
            config.clone_timeout,
        )
        .await?;
        if resolved.mode == InputMode::Local {
            validate_local_target(&resolved.path)?;
        }

        let parser = ManifestParser::new(config.include_dev);
        let manifest = parser.parse_dir(&resolved.path)?;
        info!(
            "parsed {} ({}): {} direct packages, {} scripts",
            manifest.source_file,
            manifest.ecosystem,
            manifest.package_count(),
            manifest.scripts.len()
        );

        // Shared infrastructure, created once and passed by reference
        let cache = Arc::new(CacheStore::new(config.cache_config()));
        let registry = Arc::new(RegistryClient::new(Arc::clone(&cache)));
        let osv = Arc::new(OsvClient::new().with_concurrency(config.osv_concurrency));
        let llm = LlmClient::from_api_key(config.openai_api_key.clone()).map(Arc::new);

        let resolver =
            DependencyResolver::new(Arc::clone(&registry)).with_max_depth(config.max_depth);
        let graph = resolver.build_graph(&manifest).await;

        let detector = RuleDetector::new(Arc::clone(&osv), Arc::clone(&registry), config.osv_enabled);
        let detection = detector.detect(&manifest, &graph, &resolved.path).await;
        info!(
            "rule layer: {} findings across {} graph nodes",
            detection.findings.len(),
            graph.node_count()
        );

        let packages = collect_packages(&manifest.packages, &graph);
        let mut context = SharedContext::new(
            if manifest.project_name.is_empty() {
                manifest.source_file.clone()
            } else {
                manifest.project_name.clone()
            },
            resolved.path.clone(),
            manifest.ecosystem,
            manifest.packages.clone(),
            packages,
            manifest.scripts.clone(),
            graph,
            detection,
        );

        let orchestrator = Orchestrator::standard(
            Box::new(VulnerabilityAgent::new(Arc::clone(&osv), llm.clone())),
            Box::new(ReputationAgent::new(Arc::clone(&registry))),
            Box::new(CodeAgent::new(llm.clone(), Arc::clone(&cache))),
            Box::new(SupplyChainAgent::new()),
            Box::new(SynthesisAgent::new(llm.clone())),
        );
        orchestrator.run(&mut context).await;

        let run = RunInfo {
            analysis_id,
            target,
            input_mode: resolved.mode.as_str().to_string(),
            agent_analysis_enabled: llm.is_some(),
        };
        let report = orchestrator.compose_report(
            &context,
            &run,
            &cache.stats(),
            started.elapsed().as_secs_f64(),
        );

        let output_path = config.output_directory.join(REPORT_FILE_NAME);
        let serialized = serde_json::to_string_pretty(&report)
            .map_err(|e| crate::utils::error::DepsentryError::Report(e.to_string()))?;
        write_report_atomically(&output_path, &serialized)?;

        println!(
            "Report written to {} ({} findings, status {})",
            output_path.display(),
            report.summary.total_findings,
            report.metadata.analysis_status
        );
        Ok(output_path)
    }
}

/// Direct packages plus graph nodes, deduped by name, with resolved versions
/// from the graph where available
fn collect_packages(
    direct: &[PackageRef],
    graph: &crate::models::graph::DependencyGraph,
) -> Vec<PackageRef> {
    let mut seen = std::collections::HashSet::new();
    let mut out = Vec::new();
    for node in graph.nodes.values() {
        if seen.insert((node.package.ecosystem, node.package.name.clone())) {
            out.push(node.package.clone());
        }
    }
    for package in direct {
        if seen.insert((package.ecosystem, package.name.clone())) {
            out.push(package.clone());
        }
    }
    out
}
