//! Core error types

use thiserror::Error;

#[derive(Error, Debug)]
pub enum CoreError {
    #[error("path '{path}' escapes the sandbox root")]
    PathEscape { path: String },

    #[error("failed to decode resources from {path}: {message}")]
    ResourceDecode { path: String, message: String },

    #[error("remote reference '{url}' is not allowed by this filesystem")]
    RemoteRefused { url: String },

    #[error("failed to fetch remote reference '{url}': {message}")]
    RemoteFetch { url: String, message: String },

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("YAML error: {0}")]
    Yaml(#[from] serde_yaml::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

pub type Result<T> = std::result::Result<T, CoreError>;
