//! Error types.
//!
//! Nothing here ever reaches a `preload` caller: pipeline errors are
//! recorded as per-item `Failed` state, config errors only surface while
//! loading configuration.

use std::path::PathBuf;
use std::time::Duration;
use thiserror::Error;

/// Why a single analysis did not produce a result.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum PipelineError {
    /// A collaborator the pipeline needs is not configured
    #[error("pipeline unavailable: {0}")]
    Unavailable(String),

    /// The analysis ran and failed
    #[error("analysis failed: {0}")]
    Failed(String),

    /// The analysis returned something unusable
    #[error("malformed result: {0}")]
    Malformed(String),

    /// The call exceeded the configured per-item timeout
    #[error("analysis timed out after {}ms", .0.as_millis())]
    TimedOut(Duration),

    /// The pipeline panicked
    #[error("analysis panicked: {0}")]
    Panicked(String),
}

impl PipelineError {
    /// Build a `Panicked` error from a `catch_unwind` payload.
    pub fn from_panic(payload: &(dyn std::any::Any + Send)) -> Self {
        let msg = if let Some(s) = payload.downcast_ref::<&str>() {
            (*s).to_string()
        } else if let Some(s) = payload.downcast_ref::<String>() {
            s.clone()
        } else {
            "unknown panic payload".to_string()
        };
        Self::Panicked(msg)
    }
}

/// Configuration loading errors.
#[derive(Error, Debug)]
pub enum ConfigError {
    /// Config file could not be read
    #[error("failed to read config {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// Config file is not valid TOML for this schema
    #[error("failed to parse config {path}: {source}")]
    Parse {
        path: PathBuf,
        #[source]
        source: toml::de::Error,
    },
}
