// Configuration, error and target-resolution utilities

pub mod config;
pub mod error;
pub mod target;

pub use config::AnalyzerConfig;
pub use error::{DepsentryError, Result, UserError};
pub use target::{resolve_target, InputMode, ResolvedTarget};
