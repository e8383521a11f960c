use serde::{Deserialize, Serialize};
use crate::models::ecosystem::Ecosystem;

/// A package reference within one ecosystem, with its raw version constraint
/// and (once known) the concrete resolved version
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct PackageRef {
    /// Name of the package
    pub name: String,
    /// Version specification/constraint as written in the manifest (e.g. "^1.0.0", ">=2.0.0")
    pub version_spec: String,
    /// Resolved version after a registry lookup (None if not resolved yet)
    pub resolved_version: Option<String>,
    /// Which ecosystem this package belongs to
    pub ecosystem: Ecosystem,
    /// Whether this is a development-only dependency
    pub dev_only: bool,
}

impl PackageRef {
    /// Create a new package reference with the given parameters
    pub fn new(name: String, version_spec: String, ecosystem: Ecosystem, dev_only: bool) -> Self {
        Self {
            name,
            version_spec,
            resolved_version: None,
            ecosystem,
            dev_only,
        }
    }

    /// Create a production package reference (dev_only = false)
    pub fn production(name: String, version_spec: String, ecosystem: Ecosystem) -> Self {
        Self::new(name, version_spec, ecosystem, false)
    }

    /// Create a development package reference (dev_only = true)
    pub fn development(name: String, version_spec: String, ecosystem: Ecosystem) -> Self {
        Self::new(name, version_spec, ecosystem, true)
    }

    /// Create a reference with a resolved version
    pub fn with_resolved_version(
        name: String,
        version_spec: String,
        resolved_version: String,
        ecosystem: Ecosystem,
    ) -> Self {
        Self {
            name,
            version_spec,
            resolved_version: Some(resolved_version),
            ecosystem,
            dev_only: false,
        }
    }

    /// The best version string known for this package: resolved if present,
    /// otherwise the raw constraint
    pub fn best_version(&self) -> &str {
        self.resolved_version.as_deref().unwrap_or(&self.version_spec)
    }

    /// Check if this reference has been resolved to a concrete version
    pub fn is_resolved(&self) -> bool {
        self.resolved_version.is_some()
    }

    /// Set the resolved version
    pub fn resolve(&mut self, version: String) {
        self.resolved_version = Some(version);
    }

    /// Get the package identifier (name@version_spec)
    pub fn identifier(&self) -> String {
        format!("{}@{}", self.name, self.version_spec)
    }

    /// Get the full identifier with ecosystem prefix
    pub fn full_identifier(&self) -> String {
        format!("{}:{}@{}", self.ecosystem, self.name, self.version_spec)
    }

    /// Node identity within the dependency graph: resolved version wins over spec
    pub fn node_key(&self) -> String {
        format!("{}:{}@{}", self.ecosystem, self.name, self.best_version())
    }

    /// Validate the reference according to ecosystem rules
    pub fn validate(&self) -> Result<(), String> {
        self.ecosystem
            .validate_package_name(&self.name)
            .map_err(|e| e.to_string())?;

        if self.version_spec.trim().is_empty() {
            return Err("Version specification cannot be empty".to_string());
        }

        Ok(())
    }
}
