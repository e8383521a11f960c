use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use crate::models::ecosystem::Ecosystem;
use crate::models::package::PackageRef;

/// npm lifecycle hooks that run automatically during `npm install`
pub const DANGEROUS_HOOKS: &[&str] = &["preinstall", "install", "postinstall"];

/// A normalized dependency manifest: the direct package references declared by
/// a project plus, for npm, its lifecycle scripts
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Manifest {
    /// Ecosystem the manifest belongs to
    pub ecosystem: Ecosystem,
    /// Project name as declared in the manifest (empty when absent)
    pub project_name: String,
    /// Direct package references
    pub packages: Vec<PackageRef>,
    /// Lifecycle scripts keyed by hook name (npm only; empty for Python)
    pub scripts: BTreeMap<String, String>,
    /// File the manifest was read from (e.g. "package.json")
    pub source_file: String,
}

impl Manifest {
    /// Create an empty manifest for an ecosystem
    pub fn new(ecosystem: Ecosystem, source_file: impl Into<String>) -> Self {
        Self {
            ecosystem,
            project_name: String::new(),
            packages: Vec::new(),
            scripts: BTreeMap::new(),
            source_file: source_file.into(),
        }
    }

    /// Check whether a hook name runs automatically on install
    pub fn is_dangerous_hook(hook: &str) -> bool {
        DANGEROUS_HOOKS.contains(&hook)
    }

    /// Scripts that run automatically during install
    pub fn dangerous_scripts(&self) -> impl Iterator<Item = (&String, &String)> {
        self.scripts
            .iter()
            .filter(|(hook, _)| Self::is_dangerous_hook(hook))
    }

    /// Scripts that only run when invoked explicitly
    pub fn manual_scripts(&self) -> impl Iterator<Item = (&String, &String)> {
        self.scripts
            .iter()
            .filter(|(hook, _)| !Self::is_dangerous_hook(hook))
    }

    /// Production packages only
    pub fn production_packages(&self) -> Vec<&PackageRef> {
        self.packages.iter().filter(|p| !p.dev_only).collect()
    }

    /// Number of direct packages
    pub fn package_count(&self) -> usize {
        self.packages.len()
    }

    /// Look up a direct package by name
    pub fn find_package(&self, name: &str) -> Option<&PackageRef> {
        self.packages.iter().find(|p| p.name == name)
    }
}
