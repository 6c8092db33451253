//! Span-bound logger.
//!
//! A [`SpanLogger`] owns one started span and the context carrying it. Every
//! record it writes is stamped with that span's trace id, span id and the
//! operation name (see [`crate::field::derive_fields`]).
//!
//! Lifecycle is `Started -> Ended`. The span ends exactly once: on the first
//! [`SpanLogger::end`] call, or on drop if `end` was never called. After that,
//! leveled calls are dropped and [`SpanLogger::try_log`] reports
//! [`TelemetryError::SpanAlreadyEnded`].

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use opentelemetry::Context;
use opentelemetry::trace::{TraceContextExt, Tracer, TracerProvider};
use opentelemetry_sdk::trace::SdkTracerProvider;

use crate::error::{Result, TelemetryError};
use crate::field::{Correlation, Field, derive_fields};
use crate::level::Severity;
use crate::logger::{LeveledLog, Logger};

pub struct SpanLogger {
    name: String,
    cx: Context,
    logger: Arc<Logger>,
    provider: SdkTracerProvider,
    ended: AtomicBool,
}

impl SpanLogger {
    /// Start a span named `name` as a child of `parent`.
    pub(crate) fn start(provider: &SdkTracerProvider, logger: Arc<Logger>, name: &str, parent: &Context) -> Self {
        let tracer = provider.tracer(name.to_owned());
        let span = tracer.start_with_context(name.to_owned(), parent);
        Self {
            name: name.to_owned(),
            cx: parent.with_span(span),
            logger,
            provider: provider.clone(),
            ended: AtomicBool::new(false),
        }
    }

    /// Operation name, emitted as the `service` field.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Context carrying this span, for explicit hand-off to other operations.
    pub fn context(&self) -> &Context {
        &self.cx
    }

    pub fn trace_id(&self) -> String {
        self.correlation().trace_id
    }

    pub fn span_id(&self) -> String {
        self.correlation().span_id
    }

    pub fn is_ended(&self) -> bool {
        self.ended.load(Ordering::Acquire)
    }

    /// Start a span nested under this one. Spans from
    /// [`crate::Telemetry::start_span`] are siblings; this is the only way to
    /// get a parent/child pair.
    pub fn child(&self, name: &str) -> Result<SpanLogger> {
        if self.is_ended() {
            return Err(TelemetryError::SpanAlreadyEnded);
        }
        Ok(Self::start(&self.provider, self.logger.clone(), name, &self.cx))
    }

    /// Like [`LeveledLog::log`], but reports a call on an ended span.
    pub fn try_log(&self, level: Severity, message: &str, fields: &[Field]) -> Result<()> {
        if self.is_ended() {
            return Err(TelemetryError::SpanAlreadyEnded);
        }
        self.log(level, message, fields);
        Ok(())
    }

    /// End the span. A second call returns [`TelemetryError::SpanAlreadyEnded`]
    /// and leaves the span untouched.
    pub fn end(&self) -> Result<()> {
        if self.ended.swap(true, Ordering::AcqRel) {
            return Err(TelemetryError::SpanAlreadyEnded);
        }
        self.cx.span().end();
        Ok(())
    }

    fn correlation(&self) -> Correlation {
        Correlation::from_span_context(self.cx.span().span_context(), &self.name)
    }
}

impl LeveledLog for SpanLogger {
    fn emit(&self, level: Severity, message: &str, fields: &[Field]) {
        if self.is_ended() || !self.logger.enabled(level) {
            return;
        }
        let fields = derive_fields(fields, &self.correlation());
        self.logger.write_record(level, message, &fields);
    }

    fn flush_for_exit(&self) {
        if let Err(e) = self.provider.force_flush() {
            eprintln!("spanlog: tracer flush before exit failed: {e}");
        }
        self.logger.sync();
    }
}

impl Drop for SpanLogger {
    fn drop(&mut self) {
        let _ = self.end();
    }
}

impl std::fmt::Debug for SpanLogger {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SpanLogger")
            .field("name", &self.name)
            .field("trace_id", &self.trace_id())
            .field("span_id", &self.span_id())
            .field("ended", &self.is_ended())
            .finish()
    }
}
