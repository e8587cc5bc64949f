//! Crate error types.
//!
//! Nothing in the metric bridge itself is fatal: [`EngineError`] values are
//! recovered where they occur (the affected entity is skipped for one scrape).
//! [`ExporterError`] covers the process-level failures that can stop the
//! binary: configuration, sockets, exposition encoding.

use std::path::PathBuf;

use thiserror::Error;

/// Failures reported by the engine collaborator.
#[derive(Debug, Error)]
pub enum EngineError {
    /// The engine refused to attach an audio meter to a source.
    #[error("meter subscription refused for source '{source_id}': {reason}")]
    SubscriptionRefused { source_id: String, reason: String },
}

/// Process-level errors surfaced by the exporter binary.
#[derive(Debug, Error)]
pub enum ExporterError {
    #[error("failed to read config file {path}: {source}")]
    ConfigRead {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to parse config file {path}: {source}")]
    ConfigParse {
        path: PathBuf,
        #[source]
        source: toml::de::Error,
    },

    /// A configuration value was syntactically valid but unusable.
    #[error("invalid config: {0}")]
    InvalidConfig(String),

    #[error("failed to encode metrics: {0}")]
    Encode(#[from] prometheus::Error),

    #[error("logging already initialised: {0}")]
    Logging(String),

    #[error(transparent)]
    Io(#[from] std::io::Error),
}

pub type Result<T, E = ExporterError> = std::result::Result<T, E>;
