// Environment-driven configuration

use std::path::PathBuf;
use std::time::Duration;

use crate::services::cache::CacheConfig;

/// Analyzer configuration assembled from the environment with spec defaults.
/// Every knob can also be set programmatically for tests.
#[derive(Debug, Clone)]
pub struct AnalyzerConfig {
    /// LLM API key; absent means rule-based + deterministic synthesis only
    pub openai_api_key: Option<String>,
    /// Token used for authenticated clones
    pub github_token: Option<String>,
    /// Master cache switch
    pub cache_enabled: bool,
    /// Directory the report is written into
    pub output_directory: PathBuf,
    /// Master switch for OSV queries
    pub osv_enabled: bool,
    /// Include devDependencies when parsing npm manifests
    pub include_dev: bool,
    /// Dependency graph expansion bound
    pub max_depth: usize,
    /// Concurrent OSV requests
    pub osv_concurrency: usize,
    /// Shallow clone timeout for remote targets
    pub clone_timeout: Duration,
}

impl Default for AnalyzerConfig {
    fn default() -> Self {
        Self {
            openai_api_key: None,
            github_token: None,
            cache_enabled: true,
            output_directory: PathBuf::from("outputs"),
            osv_enabled: true,
            include_dev: true,
            max_depth: 5,
            osv_concurrency: 10,
            clone_timeout: Duration::from_secs(60),
        }
    }
}

impl AnalyzerConfig {
    /// Read configuration from the process environment
    pub fn from_env() -> Self {
        let mut config = Self::default();
        config.openai_api_key = non_empty_var("OPENAI_API_KEY");
        config.github_token = non_empty_var("GITHUB_TOKEN");
        if let Some(value) = non_empty_var("CACHE_ENABLED") {
            config.cache_enabled = parse_bool(&value, config.cache_enabled);
        }
        if let Some(value) = non_empty_var("OUTPUT_DIRECTORY") {
            config.output_directory = PathBuf::from(value);
        }
        if let Some(value) = non_empty_var("ENABLE_OSV_QUERIES") {
            config.osv_enabled = parse_bool(&value, config.osv_enabled);
        }
        if let Some(value) = non_empty_var("MAX_DEPENDENCY_DEPTH") {
            if let Ok(depth) = value.parse() {
                config.max_depth = depth;
            }
        }
        config
    }

    /// Cache configuration derived from this analyzer configuration
    pub fn cache_config(&self) -> CacheConfig {
        CacheConfig {
            enabled: self.cache_enabled,
            directory: dirs::home_dir().map(|home| home.join(".depsentry").join("cache")),
            ..CacheConfig::default()
        }
    }

    /// Whether LLM-backed agent analysis can run at all
    pub fn agent_analysis_enabled(&self) -> bool {
        self.openai_api_key.is_some()
    }
}

fn non_empty_var(name: &str) -> Option<String> {
    std::env::var(name).ok().filter(|v| !v.trim().is_empty())
}

fn parse_bool(value: &str, default: bool) -> bool {
    match value.to_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => true,
        "0" | "false" | "no" | "off" => false,
        _ => default,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = AnalyzerConfig::default();
        assert!(config.cache_enabled);
        assert!(config.osv_enabled);
        assert!(config.include_dev);
        assert_eq!(config.max_depth, 5);
        assert_eq!(config.osv_concurrency, 10);
        assert_eq!(config.output_directory, PathBuf::from("outputs"));
        assert!(!config.agent_analysis_enabled());
    }

    #[test]
    fn test_parse_bool() {
        assert!(parse_bool("true", false));
        assert!(parse_bool("1", false));
        assert!(!parse_bool("off", true));
        assert!(parse_bool("gibberish", true));
    }

    #[test]
    fn test_agent_analysis_requires_key() {
        let mut config = AnalyzerConfig::default();
        assert!(!config.agent_analysis_enabled());
        config.openai_api_key = Some("sk-test".to_string());
        assert!(config.agent_analysis_enabled());
    }
}
