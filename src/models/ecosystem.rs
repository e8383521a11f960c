use serde::{Deserialize, Serialize};
use std::fmt;

/// Enumeration of supported package ecosystems
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Ecosystem {
    /// JavaScript ecosystem (npm registry)
    Npm,
    /// Python ecosystem (PyPI registry)
    Pypi,
}

impl Ecosystem {
    /// Returns the metadata registry base URL for this ecosystem
    pub fn registry_url(&self) -> &'static str {
        match self {
            Ecosystem::Npm => "https://registry.npmjs.org",
            Ecosystem::Pypi => "https://pypi.org/pypi",
        }
    }

    /// Returns the registry host name (used for rate limiting and DNS probes)
    pub fn registry_host(&self) -> &'static str {
        match self {
            Ecosystem::Npm => "registry.npmjs.org",
            Ecosystem::Pypi => "pypi.org",
        }
    }

    /// Returns the ecosystem name the OSV API expects
    pub fn osv_name(&self) -> &'static str {
        match self {
            Ecosystem::Npm => "npm",
            Ecosystem::Pypi => "PyPI",
        }
    }

    /// Validates a package name for this ecosystem
    pub fn validate_package_name(&self, name: &str) -> Result<(), EcosystemError> {
        if name.is_empty() {
            return Err(EcosystemError::InvalidPackageName(
                "Package name cannot be empty".to_string(),
            ));
        }

        match self {
            Ecosystem::Npm => {
                if name.starts_with('.') || name.starts_with('_') {
                    return Err(EcosystemError::InvalidPackageName(
                        "npm package names cannot start with . or _".to_string(),
                    ));
                }
                if name.len() > 214 {
                    return Err(EcosystemError::InvalidPackageName(
                        "npm package names must be 214 characters or less".to_string(),
                    ));
                }
                if !name
                    .chars()
                    .all(|c| c.is_ascii_lowercase() || c.is_ascii_digit() || c == '-' || c == '.' || c == '_' || c == '/' || c == '@')
                {
                    return Err(EcosystemError::InvalidPackageName(
                        "npm package names can only contain lowercase letters, digits, hyphens, dots, underscores, slashes, and @".to_string(),
                    ));
                }
            }
            Ecosystem::Pypi => {
                // PEP 508 name rules
                if !name
                    .chars()
                    .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_' || c == '.')
                {
                    return Err(EcosystemError::InvalidPackageName(
                        "Python package names can only contain letters, digits, hyphens, underscores, and periods".to_string(),
                    ));
                }
            }
        }

        Ok(())
    }

    /// Returns all supported ecosystems
    pub fn all() -> &'static [Ecosystem] {
        &[Ecosystem::Npm, Ecosystem::Pypi]
    }
}

impl fmt::Display for Ecosystem {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Ecosystem::Npm => write!(f, "npm"),
            Ecosystem::Pypi => write!(f, "pypi"),
        }
    }
}

impl std::str::FromStr for Ecosystem {
    type Err = EcosystemError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "npm" | "javascript" | "js" | "node" => Ok(Ecosystem::Npm),
            "pypi" | "python" | "py" | "pip" => Ok(Ecosystem::Pypi),
            _ => Err(EcosystemError::UnknownEcosystem(s.to_string())),
        }
    }
}

/// Errors that can occur when working with ecosystems
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum EcosystemError {
    /// Unknown ecosystem name
    #[error("Unknown ecosystem: {0}")]
    UnknownEcosystem(String),

    /// Invalid package name for ecosystem
    #[error("Invalid package name: {0}")]
    InvalidPackageName(String),
}
