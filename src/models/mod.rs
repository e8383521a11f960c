// Data model module exports

pub mod ecosystem;
pub mod finding;
pub mod graph;
pub mod manifest;
pub mod package;
pub mod report;
pub mod reputation;
pub mod vulnerability;

pub use ecosystem::Ecosystem;
pub use finding::{Finding, FindingType, Severity};
pub use graph::{CircularDependency, DependencyGraph, DependencyNode, VersionConflict};
pub use manifest::Manifest;
pub use package::PackageRef;
pub use report::FinalReport;
pub use reputation::{ReputationRecord, RiskFactor, RiskLevel};
pub use vulnerability::VulnerabilityRecord;
