//! Leveled multi-sink logging correlated with OpenTelemetry spans.
//!
//! A [`Telemetry`] handle owns one [`Logger`] (console, size-rotated file,
//! caller-supplied writers) and, when tracing is enabled, one tracer provider.
//! [`Telemetry::start_span`] returns a [`SpanLogger`] whose records carry the
//! span's `traceId`, `spanId` and operation name:
//!
//! ```no_run
//! use spanlog::{Field, LeveledLog, Telemetry, TelemetryConfig};
//!
//! let mut config = TelemetryConfig::new("billing", true);
//! config.tracing = true;
//! let telemetry = Telemetry::init(config)?;
//!
//! let span = telemetry.start_span("charge")?;
//! span.info("card charged", &[Field::new("amount", 1200)]);
//! span.end()?;
//!
//! telemetry.shutdown()?;
//! # Ok::<(), spanlog::TelemetryError>(())
//! ```

pub mod bridge;
pub mod config;
pub mod encoder;
pub mod error;
pub mod field;
pub mod global;
pub mod level;
pub mod logger;
mod rotate;
mod sink;
pub mod span_logger;
pub mod telemetry;

pub use bridge::{TelemetryLayer, init_global_tracing_bridge, init_tracing_bridge};
pub use config::{Settings, TelemetryConfig, load_config};
pub use encoder::Encoding;
pub use error::{Result, TelemetryError};
pub use field::{Correlation, ERROR_KEY, Field, FieldValue, SERVICE_KEY, SPAN_ID_KEY, TRACE_ID_KEY, derive_fields};
pub use level::Severity;
pub use logger::{LeveledLog, Logger, SinkKind};
pub use span_logger::SpanLogger;
pub use telemetry::{Telemetry, TelemetryBuilder};
