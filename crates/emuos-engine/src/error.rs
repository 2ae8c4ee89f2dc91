//! Errors surfaced to engine collaborators.
//!
//! The engine recovers locally from everything that can happen on the hot
//! path (admission denials, quantum expiries, full variable tables); only
//! conditions a collaborator must react to are represented here.

use thiserror::Error;

/// Errors returned by the public [`Engine`](crate::Engine) surface.
#[derive(Debug, Error)]
pub enum EngineError {
    /// Lookup by process name failed.
    #[error("no such process: {0}")]
    NoSuchProcess(String),

    /// The supplied configuration cannot drive an engine.
    #[error(transparent)]
    Config(#[from] ConfigError),
}

/// Validation and parse failures for [`EngineConfig`](crate::EngineConfig).
#[derive(Debug, Error, PartialEq, Eq)]
pub enum ConfigError {
    /// A recognized key was present but its value is out of range.
    #[error("{key} must be {requirement} (got {value})")]
    InvalidValue {
        key: &'static str,
        requirement: &'static str,
        value: String,
    },

    /// A recognized key's value failed to parse.
    #[error("unable to parse {key} value {value:?}")]
    Unparseable { key: &'static str, value: String },
}
