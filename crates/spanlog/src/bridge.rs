//! Bridge from `tracing` macros into a [`Logger`].
//!
//! Libraries that log through `tracing::info!` and friends end up in the same
//! sinks, with the same encoding, as records written through [`LeveledLog`].
//! Event fields keep their names; the event target is added as `target`.
//!
//! A layer either stays bound to one instance ([`Telemetry::tracing_layer`])
//! or follows the process-wide slot ([`TelemetryLayer::global`]). Only one
//! global subscriber can be installed per process, so a process that
//! re-initializes [`crate::global`] should install the following kind.
//!
//! [`LeveledLog`]: crate::LeveledLog

use std::fmt::Debug;
use std::sync::Arc;

use tracing::field::{Field as TracingField, Visit};
use tracing::{Event, Subscriber};
use tracing_subscriber::layer::{Context, SubscriberExt};
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{EnvFilter, Layer};

use crate::error::{Result, TelemetryError};
use crate::field::Field;
use crate::level::Severity;
use crate::logger::Logger;
use crate::telemetry::Telemetry;

const TARGET_KEY: &str = "target";

#[derive(Debug, Clone)]
enum Target {
    Bound(Arc<Logger>),
    Global,
}

/// `tracing-subscriber` layer writing each event as one record.
#[derive(Debug, Clone)]
pub struct TelemetryLayer {
    target: Target,
}

impl TelemetryLayer {
    /// Layer writing into `logger` for as long as it lives.
    pub fn new(logger: Arc<Logger>) -> Self {
        Self { target: Target::Bound(logger) }
    }

    /// Layer writing into whichever instance the global slot holds when each
    /// event fires. Events are dropped while the slot is empty or being
    /// replaced.
    pub fn global() -> Self {
        Self { target: Target::Global }
    }

    fn logger(&self) -> Option<Arc<Logger>> {
        match &self.target {
            Target::Bound(logger) => Some(logger.clone()),
            Target::Global => crate::global::current_logger(),
        }
    }
}

impl<S: Subscriber> Layer<S> for TelemetryLayer {
    fn on_event(&self, event: &Event<'_>, _ctx: Context<'_, S>) {
        let meta = event.metadata();
        let level = Severity::from(*meta.level());
        let Some(logger) = self.logger().filter(|l| l.enabled(level)) else {
            return;
        };

        let mut visitor = FieldCollector::default();
        event.record(&mut visitor);
        visitor.fields.push(Field::new(TARGET_KEY, meta.target()));
        logger.write_record(level, &visitor.message, &visitor.fields);
    }
}

#[derive(Default)]
struct FieldCollector {
    message: String,
    fields: Vec<Field>,
}

impl Visit for FieldCollector {
    fn record_str(&mut self, field: &TracingField, value: &str) {
        if field.name() == "message" {
            self.message = value.to_owned();
        } else {
            self.fields.push(Field::new(field.name(), value));
        }
    }

    fn record_i64(&mut self, field: &TracingField, value: i64) {
        self.fields.push(Field::new(field.name(), value));
    }

    fn record_u64(&mut self, field: &TracingField, value: u64) {
        self.fields.push(Field::new(field.name(), value));
    }

    fn record_bool(&mut self, field: &TracingField, value: bool) {
        self.fields.push(Field::new(field.name(), value));
    }

    fn record_f64(&mut self, field: &TracingField, value: f64) {
        self.fields.push(Field::any(field.name(), &value));
    }

    fn record_error(&mut self, field: &TracingField, value: &(dyn std::error::Error + 'static)) {
        self.fields.push(Field::display(field.name(), value));
    }

    fn record_debug(&mut self, field: &TracingField, value: &dyn Debug) {
        if field.name() == "message" {
            self.message = format!("{value:?}");
        } else {
            self.fields.push(Field::display(field.name(), format_args!("{value:?}")));
        }
    }
}

/// Install a global subscriber that routes `tracing` events into `telemetry`.
///
/// `RUST_LOG` takes precedence over `default_directive` (e.g. `"info"`).
/// Fails if a global subscriber is already set.
pub fn init_tracing_bridge(telemetry: &Telemetry, default_directive: &str) -> Result<()> {
    install(telemetry.tracing_layer(), default_directive)
}

/// Like [`init_tracing_bridge`], but events follow the instance currently in
/// the global slot, across re-initialization.
pub fn init_global_tracing_bridge(default_directive: &str) -> Result<()> {
    install(TelemetryLayer::global(), default_directive)
}

fn install(layer: TelemetryLayer, default_directive: &str) -> Result<()> {
    let env_filter = match EnvFilter::try_from_default_env() {
        Ok(filter) => filter,
        Err(_) => EnvFilter::try_new(default_directive)
            .map_err(|e| TelemetryError::Config(format!("invalid log filter {default_directive:?}: {e}")))?,
    };

    tracing_subscriber::registry()
        .with(env_filter)
        .with(layer)
        .try_init()
        .map_err(|e| TelemetryError::Config(format!("cannot install tracing subscriber: {e}")))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::TelemetryConfig;
    use crate::logger::test_support::SharedBuf;

    fn telemetry(level: Severity) -> (Telemetry, SharedBuf) {
        let mut cfg = TelemetryConfig::new("svc", true);
        cfg.console = false;
        cfg.file = false;
        cfg.level = Some(level);
        let buf = SharedBuf::default();
        let telemetry = Telemetry::builder(cfg).writer(buf.clone()).build().unwrap();
        (telemetry, buf)
    }

    #[test]
    fn events_become_records() {
        let (telemetry, buf) = telemetry(Severity::Info);
        let subscriber = tracing_subscriber::registry().with(telemetry.tracing_layer());
        tracing::subscriber::with_default(subscriber, || {
            tracing::info!(order_id = 7, venue = "xnys", filled = true, "order {} placed", "A1");
            tracing::debug!("below minimum");
            tracing::warn!(ratio = 0.5, "slow");
        });
        telemetry.shutdown().unwrap();

        let records = buf.records();
        assert_eq!(records.len(), 2);
        assert_eq!(records[0]["level"], "info");
        assert_eq!(records[0]["message"], "order A1 placed");
        assert_eq!(records[0]["order_id"], 7);
        assert_eq!(records[0]["venue"], "xnys");
        assert_eq!(records[0]["filled"], true);
        assert_eq!(records[0]["target"], module_path!());
        assert_eq!(records[1]["level"], "warn");
        assert_eq!(records[1]["ratio"], 0.5);
    }

    #[test]
    fn trace_events_map_to_debug() {
        let (telemetry, buf) = telemetry(Severity::Debug);
        let subscriber = tracing_subscriber::registry().with(telemetry.tracing_layer());
        tracing::subscriber::with_default(subscriber, || {
            tracing::trace!(detail = ?vec![1, 2], "fine grained");
        });
        telemetry.shutdown().unwrap();

        let records = buf.records();
        assert_eq!(records[0]["level"], "debug");
        assert_eq!(records[0]["detail"], "[1, 2]");
    }
}
