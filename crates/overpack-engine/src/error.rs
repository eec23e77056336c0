//! Engine error types

use overpack_core::CoreError;
use thiserror::Error;

/// Result type for engine operations
pub type Result<T> = std::result::Result<T, EngineError>;

/// Errors reported by the overlay-merge engine
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum EngineError {
    /// The target directory carries no recognized descriptor filename
    #[error("no overlay descriptor found in '{path}'")]
    MissingDescriptor { path: String },

    /// Two resource entries resolve to the same identity
    #[error("resource '{id}' is declared more than once")]
    DuplicateResource { id: String },

    /// Nested descriptors reference each other
    #[error("overlay reference cycle through '{path}'")]
    ResourceCycle { path: String },

    /// A patch body or operation list is malformed
    #[error("invalid patch: {message}")]
    InvalidPatch { message: String },

    /// A patch selected no resource
    #[error("no resource matches patch target [{target}]")]
    PatchTargetNotFound { target: String },

    /// Sandbox or I/O failure surfaced through the filesystem boundary
    #[error(transparent)]
    Core(#[from] CoreError),

    /// YAML error
    #[error("YAML error: {0}")]
    Yaml(#[from] serde_yaml::Error),

    /// JSON error
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}
