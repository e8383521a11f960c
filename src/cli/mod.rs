// CLI module for command-line interface

pub mod analyze;

use clap::{Parser, Subcommand};
use std::path::PathBuf;

use crate::utils::config::AnalyzerConfig;
use crate::utils::error::{Result, UserError};

use self::analyze::AnalyzeCommand;

/// Main CLI structure
#[derive(Parser)]
#[command(name = "depsentry")]
#[command(about = "Security analyzer for JavaScript and Python dependency manifests")]
#[command(long_about = r#"depsentry analyzes a project's dependency manifest and emits a
package-centric JSON security report.

The report aggregates, per package:
  - Known vulnerabilities from the OSV database
  - A reputation score derived from registry metadata
  - Static findings from install-time lifecycle scripts
  - Dependency-graph anomalies (cycles, version conflicts)

Examples:
  depsentry analyze .                         Analyze the current directory
  depsentry analyze /path/to/project          Analyze a local project
  depsentry analyze https://github.com/u/r    Shallow-clone and analyze
  depsentry analyze . --no-dev                Skip devDependencies
  OUTPUT_DIRECTORY=/tmp depsentry analyze .   Custom report directory

Configuration via environment:
  OPENAI_API_KEY       Enables LLM-backed agent analysis
  GITHUB_TOKEN         Authenticated clones for private repositories
  CACHE_ENABLED        Registry/LLM response cache (default: true)
  OUTPUT_DIRECTORY     Report directory (default: outputs/)
  ENABLE_OSV_QUERIES   OSV vulnerability lookups (default: true)"#)]
#[command(version)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,
}

/// All available CLI commands
#[derive(Subcommand)]
pub enum Commands {
    /// Analyze a project's dependencies and write the JSON report
    Analyze {
        /// Local directory or remote repository URL
        target: String,

        /// Exclude devDependencies from the analysis
        #[arg(long)]
        no_dev: bool,

        /// Override the report output directory
        #[arg(long)]
        output_dir: Option<PathBuf>,

        /// Override the dependency graph expansion depth
        #[arg(long)]
        max_depth: Option<usize>,

        /// Disable OSV vulnerability queries for this run
        #[arg(long)]
        no_osv: bool,
    },
}

/// Dispatches parsed commands to their handlers
pub struct CliDispatcher;

impl CliDispatcher {
    pub async fn execute(command: Commands) -> Result<()> {
        match command {
            Commands::Analyze {
                target,
                no_dev,
                output_dir,
                max_depth,
                no_osv,
            } => {
                let mut config = AnalyzerConfig::from_env();
                if no_dev {
                    config.include_dev = false;
                }
                if let Some(dir) = output_dir {
                    config.output_directory = dir;
                }
                if let Some(depth) = max_depth {
                    config.max_depth = depth;
                }
                if no_osv {
                    config.osv_enabled = false;
                }

                match AnalyzeCommand::execute(target, config).await {
                    Ok(_) => Ok(()),
                    Err(err) => {
                        UserError::from_error(&err).print();
                        Err(err)
                    }
                }
            }
        }
    }
}
