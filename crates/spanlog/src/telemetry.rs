//! Telemetry handle: one logger and, optionally, one tracer provider.
//!
//! [`Telemetry`] is built once at process entry and passed to whatever logs or
//! traces. Building is all-or-nothing: if the tracer cannot be set up, the
//! logger that was already built is closed and nothing is returned.
//!
//! Shutdown drains the tracer provider first (ending batches flush through
//! the exporter), then drains and closes the logger sinks. It runs at most
//! once, whether called directly, from [`Telemetry::shutdown_on`], or on drop.

use std::io::Write;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use opentelemetry::Context;
use opentelemetry_sdk::Resource;
use opentelemetry_sdk::trace::{Sampler, SdkTracerProvider, SpanExporter, TracerProviderBuilder};
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{debug, info};

use crate::bridge::TelemetryLayer;
use crate::config::{Settings, TelemetryConfig};
use crate::error::{Result, TelemetryError};
use crate::field::{ERROR_KEY, Field};
use crate::level::Severity;
use crate::logger::{BoxedWriter, LeveledLog, Logger};
use crate::span_logger::SpanLogger;

type InstallResult = std::result::Result<TracerProviderBuilder, String>;
type InstallExporter = Box<dyn FnOnce(TracerProviderBuilder) -> InstallResult>;

// ---------------------------------------------------------------------------
// TelemetryBuilder
// ---------------------------------------------------------------------------

/// Builder for [`Telemetry`], for extra sinks or a non-default span exporter.
pub struct TelemetryBuilder {
    config: TelemetryConfig,
    writers: Vec<BoxedWriter>,
    exporter: Option<InstallExporter>,
}

impl TelemetryBuilder {
    pub fn new(config: TelemetryConfig) -> Self {
        Self { config, writers: Vec::new(), exporter: None }
    }

    /// Add a sink writing to `writer` with the configured level and encoding.
    pub fn writer(mut self, writer: impl Write + Send + 'static) -> Self {
        self.writers.push(Box::new(writer));
        self
    }

    /// Export spans through `exporter` instead of stdout.
    pub fn exporter<E: SpanExporter + 'static>(mut self, exporter: E) -> Self {
        self.exporter = Some(Box::new(move |builder| Ok(builder.with_batch_exporter(exporter))));
        self
    }

    /// Construct the exporter while building. A factory error fails the build
    /// with [`TelemetryError::TracingInitFailed`].
    pub fn exporter_with<E, F, Err>(mut self, make: F) -> Self
    where
        E: SpanExporter + 'static,
        F: FnOnce() -> std::result::Result<E, Err> + 'static,
        Err: std::fmt::Display,
    {
        self.exporter = Some(Box::new(move |builder| {
            let exporter = make().map_err(|e| e.to_string())?;
            Ok(builder.with_batch_exporter(exporter))
        }));
        self
    }

    pub fn build(self) -> Result<Telemetry> {
        let settings = self.config.resolve()?;
        let logger = Arc::new(Logger::build(&settings, self.writers)?);

        let provider = if settings.tracing {
            match build_provider(&settings, self.exporter) {
                Ok(provider) => Some(provider),
                Err(e) => {
                    logger.sync();
                    return Err(e);
                }
            }
        } else {
            None
        };

        if let Some(provider) = &provider {
            opentelemetry::global::set_tracer_provider(provider.clone());
        }

        debug!(
            service = %settings.service_name,
            sinks = ?logger.sink_kinds(),
            tracing = settings.tracing,
            "telemetry initialized"
        );

        Ok(Telemetry { settings, logger, provider, shut_down: AtomicBool::new(false) })
    }
}

fn build_provider(settings: &Settings, exporter: Option<InstallExporter>) -> Result<SdkTracerProvider> {
    let builder = SdkTracerProvider::builder()
        .with_sampler(Sampler::AlwaysOn)
        .with_resource(Resource::builder().with_service_name(settings.service_name.clone()).build());

    let builder = match exporter {
        Some(install) => install(builder).map_err(TelemetryError::TracingInitFailed)?,
        None => builder.with_batch_exporter(opentelemetry_stdout::SpanExporter::default()),
    };
    Ok(builder.build())
}

// ---------------------------------------------------------------------------
// Telemetry
// ---------------------------------------------------------------------------

pub struct Telemetry {
    settings: Settings,
    logger: Arc<Logger>,
    provider: Option<SdkTracerProvider>,
    shut_down: AtomicBool,
}

impl Telemetry {
    /// Build from `config` with the default sinks and the stdout exporter.
    pub fn init(config: TelemetryConfig) -> Result<Self> {
        TelemetryBuilder::new(config).build()
    }

    pub fn builder(config: TelemetryConfig) -> TelemetryBuilder {
        TelemetryBuilder::new(config)
    }

    /// Resolved settings, defaults filled.
    pub fn settings(&self) -> &Settings {
        &self.settings
    }

    /// The uncorrelated logger shared by every span of this instance.
    pub fn logger(&self) -> &Arc<Logger> {
        &self.logger
    }

    pub fn tracing_enabled(&self) -> bool {
        self.provider.is_some()
    }

    pub fn is_shut_down(&self) -> bool {
        self.shut_down.load(Ordering::Acquire)
    }

    /// Start a root span named `name` and return a logger bound to it.
    ///
    /// Each call starts from an empty context, so spans from separate calls
    /// are siblings with distinct trace ids. Use [`SpanLogger::child`] to nest.
    pub fn start_span(&self, name: &str) -> Result<SpanLogger> {
        let provider = self.provider.as_ref().ok_or(TelemetryError::TracingNotConfigured)?;
        if self.is_shut_down() {
            return Err(TelemetryError::ShutDown);
        }
        Ok(SpanLogger::start(provider, self.logger.clone(), name, &Context::new()))
    }

    /// Export every ended span, then wait until every record logged so far
    /// has reached its sink. The instance stays usable.
    pub fn flush(&self) -> Result<()> {
        let traced = match &self.provider {
            Some(provider) => provider.force_flush().map_err(|e| TelemetryError::Flush(e.to_string())),
            None => Ok(()),
        };
        self.logger.flush();
        traced
    }

    /// Drain the tracer provider, then the logger. Later calls are no-ops.
    pub fn shutdown(&self) -> Result<()> {
        if self.shut_down.swap(true, Ordering::AcqRel) {
            return Ok(());
        }

        let traced = match &self.provider {
            Some(provider) => provider.shutdown().map_err(|e| TelemetryError::Shutdown(e.to_string())),
            None => Ok(()),
        };
        if let Err(e) = &traced {
            let fields = [Field::display(ERROR_KEY, e)];
            self.logger.write_record(Severity::Error, "tracer provider shutdown failed", &fields);
        }

        info!(service = %self.settings.service_name, "telemetry shutting down");
        self.logger.sync();
        traced
    }

    /// Spawn a task that waits for `signal` to turn `true` (or its sender to
    /// drop) and then shuts this instance down once.
    pub fn shutdown_on(self: Arc<Self>, mut signal: watch::Receiver<bool>) -> JoinHandle<Result<()>> {
        tokio::spawn(async move {
            let _ = signal.wait_for(|stop| *stop).await;
            match tokio::task::spawn_blocking(move || self.shutdown()).await {
                Ok(result) => result,
                Err(e) => Err(TelemetryError::Shutdown(format!("shutdown task failed: {e}"))),
            }
        })
    }

    /// A `tracing-subscriber` layer writing `tracing` events into this
    /// instance's sinks. It stays bound to this instance; see
    /// [`crate::global::tracing_layer`] for one that follows re-initialization.
    pub fn tracing_layer(&self) -> TelemetryLayer {
        TelemetryLayer::new(self.logger.clone())
    }
}

impl LeveledLog for Telemetry {
    fn emit(&self, level: Severity, message: &str, fields: &[Field]) {
        self.logger.write_record(level, message, fields);
    }

    fn flush_for_exit(&self) {
        if let Err(e) = self.flush() {
            eprintln!("spanlog: tracer flush before exit failed: {e}");
        }
        self.logger.sync();
    }
}

impl Drop for Telemetry {
    fn drop(&mut self) {
        if let Err(e) = self.shutdown() {
            eprintln!("spanlog: {e}");
        }
    }
}

impl std::fmt::Debug for Telemetry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Telemetry")
            .field("settings", &self.settings)
            .field("logger", &self.logger)
            .field("tracing", &self.tracing_enabled())
            .field("shut_down", &self.is_shut_down())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use opentelemetry_sdk::trace::InMemorySpanExporter;
    use tracing_subscriber::layer::SubscriberExt;

    use super::*;
    use crate::field::{SERVICE_KEY, SPAN_ID_KEY, TRACE_ID_KEY};
    use crate::logger::test_support::{SharedBuf, SlowWriter};

    fn quiet_config(tracing: bool) -> TelemetryConfig {
        let mut cfg = TelemetryConfig::new("svc", true);
        cfg.console = false;
        cfg.file = false;
        cfg.tracing = tracing;
        cfg
    }

    fn is_hex(s: &str, len: usize) -> bool {
        s.len() == len && s.chars().all(|c| c.is_ascii_hexdigit() && !c.is_ascii_uppercase())
    }

    #[test]
    fn round_trip_with_file_sink() {
        let tmp = tempfile::tempdir().unwrap();
        let mut cfg = TelemetryConfig::new("svc", true);
        cfg.console = false;
        cfg.log_dir = Some(tmp.path().to_path_buf());
        cfg.tracing = true;

        let telemetry = Telemetry::builder(cfg).exporter(InMemorySpanExporter::default()).build().unwrap();
        assert_eq!(telemetry.settings().max_file_size_mb, 100);
        assert_eq!(telemetry.settings().max_age_days, 28);
        assert_eq!(telemetry.settings().max_backups, 7);

        let span = telemetry.start_span("op1").unwrap();
        span.info("hello", &[Field::new("key", "value")]);
        span.end().unwrap();
        telemetry.shutdown().unwrap();

        let text = std::fs::read_to_string(tmp.path().join("svc.log")).unwrap();
        let line = text.lines().next().unwrap();
        let record: serde_json::Value = serde_json::from_str(line).unwrap();
        assert_eq!(record["message"], "hello");
        assert_eq!(record["key"], "value");
        assert!(is_hex(record[TRACE_ID_KEY].as_str().unwrap(), 32), "{line}");
        assert!(is_hex(record[SPAN_ID_KEY].as_str().unwrap(), 16), "{line}");
        assert_eq!(record[SERVICE_KEY], "op1");

        let keys: Vec<&str> = record.as_object().unwrap().keys().map(String::as_str).collect();
        assert_eq!(keys, ["level", "timestamp", "message", "key", TRACE_ID_KEY, SPAN_ID_KEY, SERVICE_KEY]);
    }

    #[test]
    fn shutdown_returns_after_slow_sink_drains() {
        let buf = SharedBuf::default();
        let telemetry = Telemetry::builder(quiet_config(true))
            .writer(SlowWriter::new(buf.clone(), Duration::from_millis(5)))
            .exporter(InMemorySpanExporter::default())
            .build()
            .unwrap();

        let span = telemetry.start_span("bulk").unwrap();
        for i in 0..300 {
            span.info("row", &[Field::new("i", i)]);
        }
        span.end().unwrap();
        telemetry.shutdown().unwrap();

        let rows: Vec<i64> = buf.records().iter().map(|r| r["i"].as_i64().unwrap()).collect();
        assert_eq!(rows, (0..300).collect::<Vec<_>>());
    }

    #[test]
    fn flush_makes_records_visible_without_closing() {
        let buf = SharedBuf::default();
        let telemetry = Telemetry::builder(quiet_config(false)).writer(buf.clone()).build().unwrap();
        telemetry.info("early", &[]);
        telemetry.flush().unwrap();
        assert_eq!(buf.records().len(), 1);
        assert!(!telemetry.is_shut_down());
        assert!(!telemetry.logger().is_closed());
    }

    #[test]
    fn tracer_flush_failure_is_a_flush_error() {
        let telemetry = Telemetry::builder(quiet_config(true))
            .writer(SharedBuf::default())
            .exporter(InMemorySpanExporter::default())
            .build()
            .unwrap();
        telemetry.shutdown().unwrap();
        let err = telemetry.flush().unwrap_err();
        assert!(matches!(err, TelemetryError::Flush(_)), "{err}");
        assert!(err.to_string().starts_with("telemetry flush failed"));
    }

    #[test]
    fn shutdown_diagnostic_reaches_bridged_sink() {
        let buf = SharedBuf::default();
        let telemetry = Telemetry::builder(quiet_config(false)).writer(buf.clone()).build().unwrap();
        let subscriber = tracing_subscriber::registry().with(telemetry.tracing_layer());
        tracing::subscriber::with_default(subscriber, || telemetry.shutdown().unwrap());

        let records = buf.records();
        let last = records.last().unwrap();
        assert_eq!(last["message"], "telemetry shutting down");
        assert_eq!(last["service"], "svc");
        assert_eq!(last["target"], module_path!().trim_end_matches("::tests"));
    }

    #[test]
    fn sequential_spans_are_siblings() {
        let telemetry = Telemetry::builder(quiet_config(true))
            .writer(SharedBuf::default())
            .exporter(InMemorySpanExporter::default())
            .build()
            .unwrap();

        let a = telemetry.start_span("same").unwrap();
        let b = telemetry.start_span("same").unwrap();
        assert_ne!(a.trace_id(), b.trace_id());
        assert_ne!(a.span_id(), b.span_id());
    }

    #[test]
    fn start_span_without_tracing_fails() {
        let telemetry = Telemetry::builder(quiet_config(false)).writer(SharedBuf::default()).build().unwrap();
        assert!(!telemetry.tracing_enabled());
        let err = telemetry.start_span("op").unwrap_err();
        assert!(matches!(err, TelemetryError::TracingNotConfigured));
    }

    #[test]
    fn exporter_failure_fails_whole_build() {
        let buf = SharedBuf::default();
        let result = Telemetry::builder(quiet_config(true))
            .writer(buf.clone())
            .exporter_with(|| Err::<InMemorySpanExporter, _>("collector unreachable"))
            .build();
        match result {
            Err(TelemetryError::TracingInitFailed(msg)) => assert!(msg.contains("collector unreachable")),
            other => panic!("expected TracingInitFailed, got {other:?}"),
        }
        assert!(buf.contents().is_empty());
    }

    #[test]
    fn directory_failure_surfaces() {
        let tmp = tempfile::tempdir().unwrap();
        let blocker = tmp.path().join("file");
        std::fs::write(&blocker, b"x").unwrap();
        let mut cfg = quiet_config(true);
        cfg.file = true;
        cfg.log_dir = Some(blocker.join("logs"));

        let err = Telemetry::init(cfg).unwrap_err();
        assert!(matches!(err, TelemetryError::DirectoryCreateFailed { .. }), "{err}");
    }

    #[test]
    fn shutdown_is_idempotent() {
        let buf = SharedBuf::default();
        let telemetry = Telemetry::builder(quiet_config(true))
            .writer(buf.clone())
            .exporter(InMemorySpanExporter::default())
            .build()
            .unwrap();
        telemetry.info("plain", &[]);
        telemetry.shutdown().unwrap();
        telemetry.shutdown().unwrap();
        assert!(telemetry.is_shut_down());
        assert!(matches!(telemetry.start_span("late"), Err(TelemetryError::ShutDown)));
        assert_eq!(buf.records().len(), 1);
    }

    #[test]
    fn flush_exports_ended_spans() {
        let exporter = InMemorySpanExporter::default();
        let telemetry = Telemetry::builder(quiet_config(true))
            .writer(SharedBuf::default())
            .exporter(exporter.clone())
            .build()
            .unwrap();

        let span = telemetry.start_span("exported").unwrap();
        let span_id = span.span_id();
        span.end().unwrap();
        telemetry.flush().unwrap();

        let spans = exporter.get_finished_spans().unwrap();
        assert_eq!(spans.len(), 1);
        assert_eq!(spans[0].name, "exported");
        assert_eq!(spans[0].span_context.span_id().to_string(), span_id);
    }

    #[test]
    fn drop_drains_sinks() {
        let buf = SharedBuf::default();
        {
            let telemetry = Telemetry::builder(quiet_config(false)).writer(buf.clone()).build().unwrap();
            telemetry.warn("on the way out", &[]);
        }
        let records = buf.records();
        assert_eq!(records.len(), 1);
        assert_eq!(records[0]["level"], "warn");
    }

    #[tokio::test]
    async fn shutdown_on_signal_runs_once() {
        let buf = SharedBuf::default();
        let telemetry = Arc::new(Telemetry::builder(quiet_config(false)).writer(buf.clone()).build().unwrap());
        let (tx, rx) = watch::channel(false);
        let task = telemetry.clone().shutdown_on(rx);

        telemetry.info("before signal", &[]);
        tokio::time::sleep(Duration::from_millis(10)).await;
        assert!(!telemetry.is_shut_down());

        tx.send(true).unwrap();
        task.await.unwrap().unwrap();
        assert!(telemetry.is_shut_down());
        assert_eq!(buf.records().len(), 1);
    }

    #[tokio::test]
    async fn dropped_signal_sender_also_shuts_down() {
        let telemetry = Arc::new(Telemetry::builder(quiet_config(false)).writer(SharedBuf::default()).build().unwrap());
        let (tx, rx) = watch::channel(false);
        let task = telemetry.clone().shutdown_on(rx);
        drop(tx);
        task.await.unwrap().unwrap();
        assert!(telemetry.is_shut_down());
    }
}
