//! Leveled multi-sink logger.
//!
//! A [`Logger`] owns one writer per sink:
//! - console: stdout;
//! - file: `<log_dir>/<service>.log`, rotated by size;
//! - any extra `io::Write` handed to the builder (tests use an in-memory buffer).
//!
//! Every writer runs on its own worker thread behind a bounded queue, so a
//! slow sink applies backpressure instead of dropping records.
//! [`Logger::flush`] waits until each worker has written what was queued.
//! [`Logger::sync`] drains each queue, joins the workers and closes the sinks.
//! Records logged after that are discarded.
//!
//! Write failures are reported on stderr. The record path never emits
//! `tracing` events, so a [`crate::bridge::TelemetryLayer`] forwarding into this
//! logger cannot recurse.

use std::fs;
use std::io::Write;
use std::path::Path;
use std::sync::atomic::{AtomicBool, Ordering};

use crate::config::Settings;
use crate::encoder::{self, Encoding};
use crate::error::{Result, TelemetryError};
use crate::field::Field;
use crate::level::Severity;
use crate::rotate::{RotatingFile, RotationPolicy};
use crate::sink::SinkWorker;

/// Writer type accepted for extra sinks.
pub type BoxedWriter = Box<dyn Write + Send + 'static>;

/// Where a sink writes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SinkKind {
    Console,
    File,
    Writer,
}

impl std::fmt::Display for SinkKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Console => write!(f, "console"),
            Self::File => write!(f, "file"),
            Self::Writer => write!(f, "writer"),
        }
    }
}

struct Sink {
    min_level: Severity,
    worker: SinkWorker,
}

/// Leveled logger writing to every configured sink.
pub struct Logger {
    sinks: Vec<Sink>,
    encoding: Encoding,
    local_time: bool,
    closed: AtomicBool,
}

impl Logger {
    /// Build the sinks described by `settings` plus one sink per extra writer.
    ///
    /// The log directory is created when the file sink is enabled. Fails with
    /// [`TelemetryError::Config`] when no sink would be active.
    pub(crate) fn build(settings: &Settings, extra: Vec<BoxedWriter>) -> Result<Self> {
        let mut writers: Vec<(SinkKind, BoxedWriter)> = Vec::new();
        if settings.file {
            ensure_log_dir(&settings.log_dir)?;
            let path = settings.log_file();
            let file = RotatingFile::open(path.clone(), RotationPolicy::from_settings(settings))
                .map_err(|source| TelemetryError::FileOpenFailed { path, source })?;
            writers.push((SinkKind::File, Box::new(file)));
        }
        if settings.console {
            writers.push((SinkKind::Console, Box::new(std::io::stdout())));
        }
        writers.extend(extra.into_iter().map(|w| (SinkKind::Writer, w)));

        if writers.is_empty() {
            return Err(TelemetryError::Config("no log sinks enabled".into()));
        }

        let mut sinks = Vec::with_capacity(writers.len());
        for (kind, writer) in writers {
            let worker = SinkWorker::spawn(kind, writer).map_err(TelemetryError::SinkStartFailed)?;
            sinks.push(Sink { min_level: settings.level, worker });
        }

        Ok(Self {
            sinks,
            encoding: Encoding::from_structured(settings.structured),
            local_time: settings.local_time,
            closed: AtomicBool::new(false),
        })
    }

    /// Whether a record at `level` would reach at least one sink.
    pub fn enabled(&self, level: Severity) -> bool {
        !self.is_closed() && self.sinks.iter().any(|s| level >= s.min_level)
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }

    pub fn encoding(&self) -> Encoding {
        self.encoding
    }

    pub fn sink_kinds(&self) -> Vec<SinkKind> {
        self.sinks.iter().map(|s| s.worker.kind()).collect()
    }

    /// Encode one record and hand it to every sink whose minimum level it meets.
    pub(crate) fn write_record(&self, level: Severity, message: &str, fields: &[Field]) {
        if !self.enabled(level) {
            return;
        }

        let timestamp = encoder::timestamp(self.local_time);
        let line = match encoder::encode(self.encoding, &timestamp, level, message, fields) {
            Ok(line) => line,
            Err(e) => {
                eprintln!("spanlog: failed to encode record {message:?}: {e}");
                return;
            }
        };

        for sink in self.sinks.iter().filter(|s| level >= s.min_level) {
            sink.worker.send(line.clone());
        }
    }

    /// Wait until every record logged so far has reached its sink. The logger
    /// stays open.
    pub fn flush(&self) {
        if self.is_closed() {
            return;
        }
        for sink in &self.sinks {
            sink.worker.flush();
        }
    }

    /// Drain every queued record and close the sinks. Idempotent.
    pub fn sync(&self) {
        if self.closed.swap(true, Ordering::AcqRel) {
            return;
        }
        for sink in &self.sinks {
            sink.worker.close();
        }
    }
}

impl Drop for Logger {
    fn drop(&mut self) {
        self.sync();
    }
}

impl std::fmt::Debug for Logger {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Logger")
            .field("sinks", &self.sink_kinds())
            .field("encoding", &self.encoding)
            .field("closed", &self.is_closed())
            .finish()
    }
}

// ---------------------------------------------------------------------------
// LeveledLog
// ---------------------------------------------------------------------------

/// Leveled logging methods shared by [`Logger`] and [`crate::SpanLogger`].
///
/// `Panic` panics after the record is written and `Fatal` flushes then exits
/// the process with status 1. `DPanic` panics only in debug builds.
pub trait LeveledLog {
    /// Write one record with no termination side effect.
    fn emit(&self, level: Severity, message: &str, fields: &[Field]);

    /// Flush everything reachable from this handle before the process exits.
    fn flush_for_exit(&self);

    fn log(&self, level: Severity, message: &str, fields: &[Field]) {
        self.emit(level, message, fields);
        match level {
            Severity::Fatal => {
                self.flush_for_exit();
                std::process::exit(1);
            }
            Severity::Panic => panic!("{message}"),
            Severity::DPanic if cfg!(debug_assertions) => panic!("{message}"),
            _ => {}
        }
    }

    fn debug(&self, message: &str, fields: &[Field]) {
        self.log(Severity::Debug, message, fields);
    }

    fn info(&self, message: &str, fields: &[Field]) {
        self.log(Severity::Info, message, fields);
    }

    fn warn(&self, message: &str, fields: &[Field]) {
        self.log(Severity::Warn, message, fields);
    }

    fn error(&self, message: &str, fields: &[Field]) {
        self.log(Severity::Error, message, fields);
    }

    fn dpanic(&self, message: &str, fields: &[Field]) {
        self.log(Severity::DPanic, message, fields);
    }

    fn panic(&self, message: &str, fields: &[Field]) -> ! {
        self.emit(Severity::Panic, message, fields);
        panic!("{message}")
    }

    fn fatal(&self, message: &str, fields: &[Field]) -> ! {
        self.emit(Severity::Fatal, message, fields);
        self.flush_for_exit();
        std::process::exit(1)
    }
}

impl LeveledLog for Logger {
    fn emit(&self, level: Severity, message: &str, fields: &[Field]) {
        self.write_record(level, message, fields);
    }

    fn flush_for_exit(&self) {
        self.sync();
    }
}

// ---------------------------------------------------------------------------
// Log directory
// ---------------------------------------------------------------------------

fn ensure_log_dir(dir: &Path) -> Result<()> {
    if dir.is_dir() {
        return Ok(());
    }
    let mut builder = fs::DirBuilder::new();
    builder.recursive(true);
    #[cfg(unix)]
    {
        use std::os::unix::fs::DirBuilderExt;
        builder.mode(0o755);
    }
    builder
        .create(dir)
        .map_err(|source| TelemetryError::DirectoryCreateFailed { path: dir.to_path_buf(), source })
}
