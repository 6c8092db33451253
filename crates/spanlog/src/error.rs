//! Typed error definitions for telemetry setup and span handling.
//!
//! Initialization errors are returned synchronously and leave nothing
//! half-built behind. Per-record logging has no error path: a failed sink
//! write is reported on stderr and the record is lost for that sink only.

use std::path::PathBuf;

use thiserror::Error;

/// Result alias used across the crate.
pub type Result<T> = std::result::Result<T, TelemetryError>;

/// Errors raised while configuring, running, or tearing down telemetry.
#[derive(Debug, Error)]
pub enum TelemetryError {
    /// Configuration is missing a required value or is self-contradictory.
    #[error("config error: {0}")]
    Config(String),

    /// The configuration file could not be read.
    #[error("failed to read config file {}: {source}", path.display())]
    ConfigLoad {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// The configuration file is not valid JSON for [`crate::TelemetryConfig`].
    #[error("failed to parse config: {0}")]
    ConfigParse(#[from] serde_json::Error),

    /// The log directory did not exist and could not be created.
    #[error("failed to create log directory {}: {source}", path.display())]
    DirectoryCreateFailed {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// The active log file could not be opened.
    #[error("failed to open log file {}: {source}", path.display())]
    FileOpenFailed {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// A sink worker thread could not be started.
    #[error("failed to start log sink thread: {0}")]
    SinkStartFailed(#[source] std::io::Error),

    /// The span exporter or tracer provider could not be constructed.
    #[error("failed to initialize tracing: {0}")]
    TracingInitFailed(String),

    /// A span was requested from an instance built with tracing disabled.
    #[error("tracing is not configured for this telemetry instance")]
    TracingNotConfigured,

    /// The span was already ended.
    #[error("span already ended")]
    SpanAlreadyEnded,

    /// The process-wide instance was used before `global::init`.
    #[error("global telemetry is not initialized")]
    NotInitialized,

    /// The instance has been shut down and no longer starts spans.
    #[error("telemetry has been shut down")]
    ShutDown,

    /// The tracer provider failed to export pending spans on request.
    #[error("telemetry flush failed: {0}")]
    Flush(String),

    /// The tracer provider failed while draining.
    #[error("telemetry shutdown failed: {0}")]
    Shutdown(String),
}
