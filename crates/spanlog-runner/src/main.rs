//! # spanlog-runner
//!
//! Smoke test for a deployment's telemetry configuration.
//!
//! Loads a JSON telemetry config, routes `tracing` output into the configured
//! sinks, emits correlated records for a few sample operations, and shuts the
//! sinks down cleanly.
//!
//! # Usage
//!
//! ```bash
//! spanlog-runner telemetry.json --operations 5 --log-level debug --wait
//! ```

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Instant;

use anyhow::{Context, Result};
use clap::Parser;
use spanlog::{Field, LeveledLog, Telemetry};
use tokio::sync::watch;
use tracing::info;

/// Correlated logging and tracing smoke test.
#[derive(Parser)]
#[command(name = "spanlog-runner", about = "Emit correlated sample records through a telemetry config")]
struct Cli {
    /// Telemetry configuration file path (JSON).
    config: PathBuf,

    /// Number of sample operations to trace.
    #[arg(short = 'n', long, default_value_t = 3)]
    operations: usize,

    /// Filter for `tracing` events when RUST_LOG is unset.
    #[arg(short, long, default_value = "info")]
    log_level: String,

    /// Keep running after the samples until Ctrl+C.
    #[arg(long)]
    wait: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    // 1. Build telemetry from the config file
    let config = spanlog::load_config(&cli.config)
        .with_context(|| format!("loading telemetry config {}", cli.config.display()))?;
    let telemetry = Arc::new(Telemetry::init(config)?);
    spanlog::init_tracing_bridge(&telemetry, &cli.log_level)?;

    let settings = telemetry.settings();
    info!(
        service = %settings.service_name,
        log_file = %settings.log_file().display(),
        tracing = telemetry.tracing_enabled(),
        "spanlog-runner starting"
    );

    // 2. Arm shutdown
    let (stop_tx, stop_rx) = watch::channel(false);
    let shutdown_task = telemetry.clone().shutdown_on(stop_rx);

    // 3. Emit samples
    for idx in 0..cli.operations {
        emit_sample(&telemetry, idx)?;
    }
    info!(operations = cli.operations, "samples emitted");

    // 4. Wait for shutdown signal
    if cli.wait {
        info!("press Ctrl+C to stop");
        tokio::signal::ctrl_c().await?;
        info!("shutdown signal received");
    }

    // 5. Drain tracer and sinks
    let _ = stop_tx.send(true);
    shutdown_task.await??;
    Ok(())
}

fn emit_sample(telemetry: &Telemetry, idx: usize) -> Result<()> {
    if !telemetry.tracing_enabled() {
        telemetry.info("sample operation", &[Field::new("index", idx)]);
        return Ok(());
    }

    let started = Instant::now();
    let span = telemetry.start_span(&format!("operation-{idx}"))?;
    span.info("operation started", &[Field::new("index", idx)]);

    let step = span.child("validate")?;
    step.debug("validating input", &[Field::new("attempt", 0), Field::new("ok", true)]);
    step.end()?;

    span.info(
        "operation finished",
        &[Field::new("index", idx), Field::display("elapsed", format_args!("{:?}", started.elapsed()))],
    );
    span.end()?;
    Ok(())
}
