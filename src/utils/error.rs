// Common error types for depsentry

use std::path::PathBuf;

use crate::services::manifest_parser::ParserError;

/// Top-level analyzer errors. Component-level errors (registry, OSV, LLM) are
/// contained at their boundaries; what surfaces here ends the run.
#[derive(Debug, thiserror::Error)]
pub enum DepsentryError {
    /// File system operations failed
    #[error("File system error: {0}")]
    Io(#[from] std::io::Error),

    /// Proactive input validation failed before any agent ran
    #[error("Validation error: {0}")]
    Validation(String),

    /// Manifest reading or parsing failed
    #[error("Manifest error: {0}")]
    Manifest(#[from] ParserError),

    /// Remote target could not be cloned
    #[error("Clone error: {0}")]
    Clone(String),

    /// Report serialization or writing failed
    #[error("Report error: {0}")]
    Report(String),
}

pub type Result<T> = std::result::Result<T, DepsentryError>;

/// User-facing error with context and fix suggestions, printed before a
/// non-zero exit
pub struct UserError {
    /// The main error message
    pub message: String,
    /// Additional context about what was happening
    pub context: Option<String>,
    /// Suggestions for how to fix the error
    pub suggestions: Vec<String>,
}

impl UserError {
    pub fn new(message: String) -> Self {
        Self {
            message,
            context: None,
            suggestions: Vec::new(),
        }
    }

    pub fn with_context(mut self, context: String) -> Self {
        self.context = Some(context);
        self
    }

    pub fn with_suggestion(mut self, suggestion: String) -> Self {
        self.suggestions.push(suggestion);
        self
    }

    /// Map an analyzer error to a user-facing message with suggestions
    pub fn from_error(err: &DepsentryError) -> Self {
        match err {
            DepsentryError::Manifest(ParserError::NoManifest(dir)) => {
                UserError::new(format!("No dependency manifest found in {}", dir.display()))
                    .with_context("The analyzer needs a package.json, requirements.txt, pyproject.toml or setup.py".to_string())
                    .with_suggestion("Point the analyzer at the directory containing the manifest".to_string())
                    .with_suggestion("For remote targets, pass the repository URL".to_string())
            }
            DepsentryError::Manifest(inner) => {
                UserError::new(format!("Manifest could not be parsed: {}", inner))
                    .with_context("The manifest exists but its content is invalid".to_string())
                    .with_suggestion("Validate the file's JSON/TOML syntax".to_string())
            }
            DepsentryError::Clone(msg) => {
                UserError::new(format!("Repository clone failed: {}", msg))
                    .with_context("The remote target could not be fetched".to_string())
                    .with_suggestion("Check the URL and your network connection".to_string())
                    .with_suggestion("Set GITHUB_TOKEN for private repositories".to_string())
            }
            DepsentryError::Validation(msg) => {
                UserError::new(format!("Invalid input: {}", msg))
                    .with_suggestion("Run 'depsentry --help' for usage information".to_string())
            }
            DepsentryError::Report(msg) => {
                UserError::new(format!("Report could not be written: {}", msg))
                    .with_suggestion("Check write permissions on the output directory".to_string())
            }
            DepsentryError::Io(inner) => {
                UserError::new(format!("File system error: {}", inner))
                    .with_suggestion("Check that the target path exists and is readable".to_string())
            }
        }
    }

    /// Print the error in a user-friendly format
    pub fn print(&self) {
        eprintln!("error: {}", self.message);
        if let Some(context) = &self.context {
            eprintln!("   {}", context);
        }
        if !self.suggestions.is_empty() {
            eprintln!();
            eprintln!("suggestions:");
            for suggestion in &self.suggestions {
                eprintln!("   - {}", suggestion);
            }
        }
    }
}

/// Proactive validation run before any agent: unreadable targets and missing
/// prerequisites surface here with fix suggestions
pub fn validate_local_target(path: &PathBuf) -> Result<()> {
    if !path.exists() {
        return Err(DepsentryError::Validation(format!(
            "target path {} does not exist",
            path.display()
        )));
    }
    if !path.is_dir() {
        return Err(DepsentryError::Validation(format!(
            "target path {} is not a directory",
            path.display()
        )));
    }
    Ok(())
}
