use std::fs;
use std::path::{Path, PathBuf};
use tracing::warn;

use crate::models::ecosystem::Ecosystem;
use crate::models::manifest::Manifest;
use crate::models::package::PackageRef;

/// Manifest parser errors. Unrecognized entries inside a manifest are skipped
/// with a warning; errors are reserved for unreadable or unparseable files.
#[derive(Debug, thiserror::Error)]
pub enum ParserError {
    /// No supported manifest found in the directory
    #[error("No supported manifest found in {0}")]
    NoManifest(PathBuf),

    /// File exists but could not be read
    #[error("Failed to read {path}: {reason}")]
    Unreadable { path: PathBuf, reason: String },

    /// File content is not valid for its format
    #[error("Invalid {format} in {path}: {reason}")]
    Invalid {
        format: &'static str,
        path: PathBuf,
        reason: String,
    },
}

/// Reads npm and Python manifests and normalizes them into a package list
#[derive(Debug, Clone)]
pub struct ManifestParser {
    /// Whether devDependencies are included (npm)
    pub include_dev: bool,
}

impl Default for ManifestParser {
    fn default() -> Self {
        Self { include_dev: true }
    }
}

impl ManifestParser {
    pub fn new(include_dev: bool) -> Self {
        Self { include_dev }
    }

    /// Locate and parse the first supported manifest in a project directory.
    /// Precedence: package.json, then requirements.txt, pyproject.toml,
    /// setup.py.
    pub fn parse_dir(&self, dir: &Path) -> Result<Manifest, ParserError> {
        let package_json = dir.join("package.json");
        if package_json.exists() {
            return self.parse_package_json(&package_json);
        }
        let requirements = dir.join("requirements.txt");
        if requirements.exists() {
            return self.parse_requirements_txt(&requirements);
        }
        let pyproject = dir.join("pyproject.toml");
        if pyproject.exists() {
            return self.parse_pyproject_toml(&pyproject);
        }
        let setup_py = dir.join("setup.py");
        if setup_py.exists() {
            return self.parse_setup_py(&setup_py);
        }
        Err(ParserError::NoManifest(dir.to_path_buf()))
    }

    /// Parse an npm `package.json`
    pub fn parse_package_json(&self, path: &Path) -> Result<Manifest, ParserError> {
        let content = read_file(path)?;
        let body: serde_json::Value =
            serde_json::from_str(&content).map_err(|e| ParserError::Invalid {
                format: "JSON",
                path: path.to_path_buf(),
                reason: e.to_string(),
            })?;

        let mut manifest = Manifest::new(Ecosystem::Npm, "package.json");
        manifest.project_name = body
            .get("name")
            .and_then(|n| n.as_str())
            .unwrap_or_default()
            .to_string();

        self.collect_npm_section(&body, "dependencies", false, &mut manifest);
        if self.include_dev {
            self.collect_npm_section(&body, "devDependencies", true, &mut manifest);
        }

        if let Some(scripts) = body.get("scripts").and_then(|s| s.as_object()) {
            for (hook, command) in scripts {
                match command.as_str() {
                    Some(cmd) => {
                        manifest.scripts.insert(hook.clone(), cmd.to_string());
                    }
                    None => warn!("skipping non-string script entry '{}'", hook),
                }
            }
        }

        Ok(manifest)
    }

    fn collect_npm_section(
        &self,
        body: &serde_json::Value,
        section: &str,
        dev_only: bool,
        manifest: &mut Manifest,
    ) {
        let Some(entries) = body.get(section).and_then(|d| d.as_object()) else {
            return;
        };
        for (name, spec) in entries {
            match spec.as_str() {
                Some(spec) => {
                    let pkg = PackageRef::new(
                        name.clone(),
                        spec.to_string(),
                        Ecosystem::Npm,
                        dev_only,
                    );
                    if pkg.validate().is_ok() {
                        manifest.packages.push(pkg);
                    } else {
                        warn!("skipping invalid {} entry '{}'", section, name);
                    }
                }
                None => warn!("skipping non-string {} entry '{}'", section, name),
            }
        }
    }

    /// Parse a pip `requirements.txt`: one constraint per non-comment line
    pub fn parse_requirements_txt(&self, path: &Path) -> Result<Manifest, ParserError> {
        let content = read_file(path)?;
        let mut manifest = Manifest::new(Ecosystem::Pypi, "requirements.txt");

        for raw_line in content.lines() {
            let line = raw_line.trim();
            if line.is_empty() || line.starts_with('#') {
                continue;
            }
            // Includes, editable installs and pip options are out of scope
            if line.starts_with('-') || line.contains("://") {
                warn!("skipping unsupported requirements entry '{}'", line);
                continue;
            }
            // Strip environment markers and trailing comments
            let line = line.split(';').next().unwrap_or(line);
            let line = line.split('#').next().unwrap_or(line).trim();
            if line.is_empty() {
                continue;
            }

            match parse_requirement_line(line) {
                Some((name, spec)) => {
                    let pkg = PackageRef::production(name, spec, Ecosystem::Pypi);
                    if pkg.validate().is_ok() {
                        manifest.packages.push(pkg);
                    } else {
                        warn!("skipping invalid requirements entry '{}'", line);
                    }
                }
                None => warn!("skipping unrecognized requirements entry '{}'", line),
            }
        }

        Ok(manifest)
    }

    /// Parse a `pyproject.toml`: PEP 621 `[project] dependencies` plus Poetry
    /// `[tool.poetry.dependencies]`
    pub fn parse_pyproject_toml(&self, path: &Path) -> Result<Manifest, ParserError> {
        let content = read_file(path)?;
        let body: toml::Value = toml::from_str(&content).map_err(|e| ParserError::Invalid {
            format: "TOML",
            path: path.to_path_buf(),
            reason: e.to_string(),
        })?;

        let mut manifest = Manifest::new(Ecosystem::Pypi, "pyproject.toml");
        manifest.project_name = body
            .get("project")
            .and_then(|p| p.get("name"))
            .and_then(|n| n.as_str())
            .or_else(|| {
                body.get("tool")
                    .and_then(|t| t.get("poetry"))
                    .and_then(|p| p.get("name"))
                    .and_then(|n| n.as_str())
            })
            .unwrap_or_default()
            .to_string();

        // PEP 621
        if let Some(deps) = body
            .get("project")
            .and_then(|p| p.get("dependencies"))
            .and_then(|d| d.as_array())
        {
            for entry in deps {
                match entry.as_str().and_then(parse_requirement_line) {
                    Some((name, spec)) => {
                        manifest
                            .packages
                            .push(PackageRef::production(name, spec, Ecosystem::Pypi));
                    }
                    None => warn!("skipping unrecognized PEP 621 dependency {:?}", entry),
                }
            }
        }

        // Poetry
        if let Some(deps) = body
            .get("tool")
            .and_then(|t| t.get("poetry"))
            .and_then(|p| p.get("dependencies"))
            .and_then(|d| d.as_table())
        {
            for (name, value) in deps {
                if name == "python" {
                    continue;
                }
                let spec = match value {
                    toml::Value::String(s) => Some(s.clone()),
                    toml::Value::Table(t) => t
                        .get("version")
                        .and_then(|v| v.as_str())
                        .map(str::to_string),
                    _ => None,
                };
                match spec {
                    Some(spec) => {
                        manifest.packages.push(PackageRef::production(
                            name.clone(),
                            spec,
                            Ecosystem::Pypi,
                        ));
                    }
                    None => warn!("skipping unrecognized poetry dependency '{}'", name),
                }
            }
        }

        Ok(manifest)
    }

    /// Extract `install_requires` entries from a `setup.py` without executing
    /// it. A `cmdclass` override marks the manifest as carrying install hooks.
    pub fn parse_setup_py(&self, path: &Path) -> Result<Manifest, ParserError> {
        let content = read_file(path)?;
        let mut manifest = Manifest::new(Ecosystem::Pypi, "setup.py");

        if let Some(list) = extract_bracket_list(&content, "install_requires") {
            for entry in extract_quoted_strings(&list) {
                let entry = entry.split(';').next().unwrap_or(&entry).trim().to_string();
                match parse_requirement_line(&entry) {
                    Some((name, spec)) => {
                        manifest
                            .packages
                            .push(PackageRef::production(name, spec, Ecosystem::Pypi));
                    }
                    None => warn!("skipping unrecognized install_requires entry '{}'", entry),
                }
            }
        }

        if let Some(name) = extract_setup_kwarg(&content, "name") {
            manifest.project_name = name;
        }

        // A custom install command class executes arbitrary code at install
        // time; surface it through the scripts map so the pattern engine and
        // code agent look at the file
        if content.contains("cmdclass") {
            manifest
                .scripts
                .insert("install".to_string(), "setup.py cmdclass override".to_string());
        }

        Ok(manifest)
    }
}

fn read_file(path: &Path) -> Result<String, ParserError> {
    fs::read_to_string(path).map_err(|e| ParserError::Unreadable {
        path: path.to_path_buf(),
        reason: e.to_string(),
    })
}

/// Split `name<op>version` into parts; supports ==, >=, <=, !=, ~=, >, <
/// and bare names (spec "*")
fn parse_requirement_line(line: &str) -> Option<(String, String)> {
    let line = line.trim();
    if line.is_empty() {
        return None;
    }
    let name_end = line
        .find(|c: char| !(c.is_ascii_alphanumeric() || c == '-' || c == '_' || c == '.'))
        .unwrap_or(line.len());
    let name = line[..name_end].trim();
    if name.is_empty() {
        return None;
    }
    let rest = line[name_end..].trim();
    // Extras like package[security]>=1.0 keep the bare name
    let rest = if let Some(close) = rest.strip_prefix('[') {
        close.split(']').nth(1).unwrap_or("").trim()
    } else {
        rest
    };
    let spec = if rest.is_empty() { "*" } else { rest };
    Some((name.to_string(), spec.to_string()))
}

/// Find `keyword = [ ... ]` in Python source and return the bracketed body
fn extract_bracket_list(source: &str, keyword: &str) -> Option<String> {
    let start = source.find(keyword)?;
    let after = &source[start + keyword.len()..];
    let open = after.find('[')?;
    let mut depth = 0usize;
    for (offset, c) in after[open..].char_indices() {
        match c {
            '[' => depth += 1,
            ']' => {
                depth -= 1;
                if depth == 0 {
                    return Some(after[open + 1..open + offset].to_string());
                }
            }
            _ => {}
        }
    }
    None
}

/// All single- or double-quoted strings in a snippet
fn extract_quoted_strings(snippet: &str) -> Vec<String> {
    let mut out = Vec::new();
    let mut chars = snippet.chars().peekable();
    while let Some(c) = chars.next() {
        if c == '"' || c == '\'' {
            let quote = c;
            let mut value = String::new();
            for inner in chars.by_ref() {
                if inner == quote {
                    break;
                }
                value.push(inner);
            }
            if !value.is_empty() {
                out.push(value);
            }
        }
    }
    out
}

/// Extract a simple `name="value"` keyword argument from setup()
fn extract_setup_kwarg(source: &str, keyword: &str) -> Option<String> {
    let pattern = format!("{}=", keyword);
    let start = source.find(&pattern)?;
    let rest = source[start + pattern.len()..].trim_start();
    let quote = rest.chars().next().filter(|c| *c == '"' || *c == '\'')?;
    let body = &rest[1..];
    body.find(quote).map(|end| body[..end].to_string())
}
