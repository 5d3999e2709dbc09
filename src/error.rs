//! Error types for the tabulua core

use thiserror::Error;

/// Result type for core setup operations
pub type Result<T> = std::result::Result<T, TabuluaError>;

/// Errors raised by misuse of the core API itself.
///
/// Data problems (bad cells, failed validators, malformed type specs inside a
/// file) never surface here: they are reported through the
/// [`ErrorSink`](crate::report::ErrorSink) so batch validation can continue.
/// This enum covers the setup surface only — registering types, declaring
/// packages, wiring libraries.
#[derive(Error, Debug)]
pub enum TabuluaError {
    #[error("Reserved type name: {0}")]
    ReservedName(String),

    #[error("Invalid type name: {0}")]
    InvalidName(String),

    #[error("Type already registered with a different parent: {name} (existing parent {existing}, new parent {requested})")]
    ParentMismatch {
        name: String,
        existing: String,
        requested: String,
    },

    #[error("Unknown parent type: {0}")]
    UnknownParent(String),

    #[error("Union type {parent} cannot carry a {constraint} constraint")]
    UnionConstraint { parent: String, constraint: String },

    #[error("Invalid constraint on {name}: {reason}")]
    InvalidConstraint { name: String, reason: String },

    #[error("Invalid type spec: {0}")]
    InvalidTypeSpec(String),

    #[error("Tag membership cycle through {0}")]
    TagCycle(String),

    #[error("Invalid package id: {0}")]
    InvalidPackageId(String),

    #[error("Package {package} depends on missing package {dependency}")]
    MissingDependency { package: String, dependency: String },

    #[error("Package {package} needs {dependency} {required}, found {found}")]
    DependencyVersion {
        package: String,
        dependency: String,
        required: String,
        found: String,
    },

    #[error("Invalid version requirement: {0}")]
    InvalidVersionReq(String),

    #[error("Dependency cycle among packages: {0}")]
    PackageCycle(String),

    #[error("Library already registered: {0}")]
    DuplicateLibrary(String),

    #[error("Semver error: {0}")]
    Semver(#[from] semver::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}
