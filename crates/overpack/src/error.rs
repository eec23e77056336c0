//! Pipeline error types

use overpack_core::CoreError;
use overpack_engine::EngineError;
use thiserror::Error;

/// Result type for pipeline operations
pub type Result<T> = std::result::Result<T, BuildError>;

/// Errors surfaced by the build pipeline
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum BuildError {
    /// Sandbox, descriptor I/O, or resource decoding failure
    #[error(transparent)]
    Core(#[from] CoreError),

    /// The merge engine reported a build failure
    #[error(transparent)]
    Engine(#[from] EngineError),

    /// A structured patch's operation list could not be serialized
    #[error("failed to encode patch operations: {0}")]
    PatchEncode(#[source] serde_json::Error),

    /// The merge engine panicked; the panic was contained and the engine
    /// lock released
    #[error("recovered from engine build panic: {message}")]
    PanicRecovered { message: String },
}
