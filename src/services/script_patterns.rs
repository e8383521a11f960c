use regex::Regex;
use serde::{Deserialize, Serialize};

use crate::models::finding::Severity;
use crate::models::manifest::Manifest;
use crate::services::cache::CacheStore;

/// One attack category in the corpus
#[derive(Debug)]
pub struct ScriptPattern {
    /// Stable category name
    pub category: &'static str,
    /// Human description used as evidence
    pub description: &'static str,
    /// Matching expression
    pub regex: Regex,
    /// Base severity before hook escalation
    pub severity: Severity,
    /// Base confidence before hook escalation
    pub confidence: f64,
}

/// A command that matched one attack category
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScriptMatch {
    /// Hook the command was registered under ("setup.py" for Python sources)
    pub hook: String,
    /// The offending command (or line)
    pub command: String,
    /// Matched category
    pub category: String,
    /// Category description
    pub description: String,
    /// Severity after escalation
    pub severity: Severity,
    /// Confidence after escalation
    pub confidence: f64,
    /// True when the hook runs automatically on install
    pub runs_automatically: bool,
}

impl ScriptMatch {
    /// Evidence lines in the report contract order
    pub fn evidence(&self) -> Vec<String> {
        let mut lines = vec![
            format!("hook: {}", self.hook),
            format!("command: {}", self.command),
            self.description.to_string(),
        ];
        if self.runs_automatically {
            lines.push("runs automatically on install".to_string());
        }
        lines
    }
}

/// Commands that are well-known test/lint tooling and never worth flagging
/// when invoked plainly
const SAFE_TOOLS: &[&str] = &[
    "jest", "mocha", "pytest", "eslint", "tsc", "vitest", "prettier", "rimraf",
];

/// Scans install-time lifecycle scripts and Python setup sources against a
/// fixed corpus of attack categories
#[derive(Debug)]
pub struct ScriptPatternEngine {
    patterns: Vec<ScriptPattern>,
}

impl ScriptPatternEngine {
    pub fn new() -> Self {
        Self {
            patterns: build_corpus(),
        }
    }

    /// Number of categories in the corpus
    pub fn category_count(&self) -> usize {
        self.patterns.len()
    }

    /// Content-hash key used to deduplicate LLM second opinions on identical
    /// scripts
    pub fn content_key(command: &str) -> String {
        CacheStore::content_key("script:", command)
    }

    /// Scan an npm scripts map. Matches on dangerous hooks are escalated one
    /// severity level with confidence raised to at least 0.9.
    pub fn scan_npm_scripts(
        &self,
        scripts: &std::collections::BTreeMap<String, String>,
    ) -> Vec<ScriptMatch> {
        let mut matches = Vec::new();
        for (hook, command) in scripts {
            let dangerous = Manifest::is_dangerous_hook(hook);
            matches.extend(self.scan_command(hook, command, dangerous));
        }
        matches
    }

    /// Scan one command string registered under a hook
    pub fn scan_command(&self, hook: &str, command: &str, dangerous: bool) -> Vec<ScriptMatch> {
        let trimmed = command.trim();
        if trimmed.len() < 4 || is_safe_tool_invocation(trimmed) {
            return Vec::new();
        }

        self.patterns
            .iter()
            .filter(|pattern| pattern.regex.is_match(trimmed))
            .map(|pattern| {
                let (severity, confidence) = if dangerous {
                    (pattern.severity.escalate(), pattern.confidence.max(0.9))
                } else {
                    (pattern.severity, pattern.confidence)
                };
                ScriptMatch {
                    hook: hook.to_string(),
                    command: trimmed.to_string(),
                    category: pattern.category.to_string(),
                    description: pattern.description.to_string(),
                    severity,
                    confidence,
                    runs_automatically: dangerous,
                }
            })
            .collect()
    }

    /// Scan a Python `setup.py` source line by line. Everything in setup.py
    /// executes at install time, so every match escalates.
    pub fn scan_setup_py(&self, source: &str) -> Vec<ScriptMatch> {
        let mut matches = Vec::new();
        for line in source.lines() {
            let line = line.trim();
            if line.is_empty() || line.starts_with('#') {
                continue;
            }
            matches.extend(self.scan_command("setup.py", line, true));
        }
        matches
    }

    /// Rough obfuscation proxy in [0, 1]: long one-liners, escape soup and
    /// encoded payloads push the score up. Gates the code agent.
    pub fn complexity_score(command: &str) -> f64 {
        let mut score: f64 = 0.0;
        if command.len() > 200 {
            score += 0.3;
        }
        if command.matches("\\x").count() > 3 || command.matches("\\u").count() > 3 {
            score += 0.3;
        }
        if command.contains("base64") || command.contains("fromCharCode") {
            score += 0.3;
        }
        let pipe_count = command.matches('|').count();
        if pipe_count >= 3 {
            score += 0.2;
        }
        score.min(1.0)
    }
}

impl Default for ScriptPatternEngine {
    fn default() -> Self {
        Self::new()
    }
}

/// True for plain invocations of well-known tooling with no shell plumbing
fn is_safe_tool_invocation(command: &str) -> bool {
    if command.contains(&['|', ';', '&', '$', '>', '<', '`'][..]) {
        return false;
    }
    let first = command.split_whitespace().next().unwrap_or("");
    SAFE_TOOLS.contains(&first)
}

fn pattern(
    category: &'static str,
    description: &'static str,
    expr: &str,
    severity: Severity,
    confidence: f64,
) -> ScriptPattern {
    ScriptPattern {
        category,
        description,
        // Corpus expressions are static and verified by tests
        regex: Regex::new(expr).expect("invalid corpus regex"),
        severity,
        confidence,
    }
}

/// The fixed attack-pattern corpus
fn build_corpus() -> Vec<ScriptPattern> {
    vec![
        pattern(
            "remote_code_execution",
            "Downloads a script and pipes it straight into a shell",
            r"(curl|wget)[^|;&]*\|\s*(sh|bash|zsh)\b",
            Severity::High,
            0.9,
        ),
        pattern(
            "base64_payload",
            "Decodes a base64 payload into a shell or interpreter",
            r"base64\s+(-d|-D|--decode)[^|]*\|\s*(sh|bash|node|python)",
            Severity::High,
            0.85,
        ),
        pattern(
            "credential_theft",
            "Touches credential stores (SSH keys, cloud credentials, npm tokens)",
            r"~/\.ssh|id_rsa|\.aws/credentials|\.npmrc|\.docker/config\.json",
            Severity::High,
            0.85,
        ),
        pattern(
            "reverse_shell",
            "Opens a reverse shell to a remote host",
            r"bash\s+-i\s+>&\s*/dev/tcp|nc\s+(-e|-c)\s|/dev/tcp/",
            Severity::Critical,
            0.95,
        ),
        pattern(
            "crypto_miner",
            "Launches or installs a cryptocurrency miner",
            r"xmrig|minerd|stratum\+tcp|cryptonight",
            Severity::High,
            0.9,
        ),
        pattern(
            "data_exfiltration",
            "Archives local data and ships it to a remote endpoint",
            r"tar\s+[^|;&]*\|\s*curl|curl\s+[^;&|]*(-d|--data|--data-binary)\s*@",
            Severity::High,
            0.85,
        ),
        pattern(
            "eval_execution",
            "Evaluates dynamically constructed code",
            r"\beval\s*\(",
            Severity::Medium,
            0.6,
        ),
        pattern(
            "child_process_exec",
            "Spawns shell commands from JavaScript",
            r"child_process|execSync\s*\(",
            Severity::Medium,
            0.6,
        ),
        pattern(
            "destructive_delete",
            "Recursively deletes from the filesystem root or home",
            r"rm\s+-rf\s+[/~]",
            Severity::High,
            0.9,
        ),
        pattern(
            "privilege_escalation",
            "Sets setuid bits or escalates privileges",
            r"sudo\s+chmod\s+(u\+s|4755)|chmod\s+\+s",
            Severity::High,
            0.9,
        ),
        pattern(
            "persistence_cron",
            "Installs persistence through cron",
            r"crontab\s*-|/etc/cron",
            Severity::High,
            0.85,
        ),
        pattern(
            "environment_harvest",
            "Collects environment variables for exfiltration",
            r"(printenv|env)\s*\|\s*(curl|nc|wget)|JSON\.stringify\(process\.env\)",
            Severity::High,
            0.85,
        ),
        pattern(
            "direct_ip_url",
            "Contacts a raw IP address instead of a hostname",
            r"https?://\d{1,3}\.\d{1,3}\.\d{1,3}\.\d{1,3}",
            Severity::Medium,
            0.7,
        ),
        pattern(
            "prototype_pollution",
            "Tampers with JavaScript prototype chains",
            r"__proto__|constructor\s*\[\s*['\x22]prototype['\x22]\s*\]",
            Severity::Medium,
            0.65,
        ),
        pattern(
            "hidden_download_exec",
            "Downloads a binary then makes it executable",
            r"(wget|curl)\s+[^;&|]*;\s*chmod\s+\+x|powershell\s+-enc",
            Severity::High,
            0.85,
        ),
        pattern(
            "python_os_system",
            "Runs shell commands from Python setup code",
            r"os\.system\s*\(|subprocess\.(run|call|Popen)\s*\(",
            Severity::Medium,
            0.6,
        ),
        pattern(
            "python_dynamic_exec",
            "Executes dynamically decoded Python code",
            r"\bexec\s*\(|__import__\s*\(|compile\s*\(",
            Severity::Medium,
            0.6,
        ),
        pattern(
            "dns_tunneling",
            "Resolves attacker-controlled lookups with embedded data",
            r"(nslookup|dig)\s+[^\s]*\$",
            Severity::Medium,
            0.6,
        ),
    ]
}
