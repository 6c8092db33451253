//! Optional process-wide telemetry slot.
//!
//! Prefer passing a [`Telemetry`] handle explicitly. This slot exists for call
//! sites that cannot be threaded one, and holds at most one instance at a time.
//! Installing a new instance shuts the previous one down first, under the same
//! write lock, so two instances never share the sinks.

use std::sync::{Arc, PoisonError, RwLock, TryLockError};

use tracing::{info, warn};

use crate::bridge::TelemetryLayer;
use crate::config::TelemetryConfig;
use crate::error::{Result, TelemetryError};
use crate::logger::Logger;
use crate::span_logger::SpanLogger;
use crate::telemetry::{Telemetry, TelemetryBuilder};

static GLOBAL: RwLock<Option<Arc<Telemetry>>> = RwLock::new(None);

/// Build an instance from `config` and install it.
pub fn init(config: TelemetryConfig) -> Result<Arc<Telemetry>> {
    init_with(TelemetryBuilder::new(config))
}

/// Install the instance `builder` produces.
///
/// Any installed instance is shut down before the new one is built. If the
/// build fails, the slot is left empty.
pub fn init_with(builder: TelemetryBuilder) -> Result<Arc<Telemetry>> {
    let mut slot = GLOBAL.write().unwrap_or_else(PoisonError::into_inner);
    if let Some(previous) = slot.take() {
        info!(service = %previous.settings().service_name, "replacing global telemetry");
        if let Err(e) = previous.shutdown() {
            warn!(error = %e, "previous global telemetry did not shut down cleanly");
        }
    }

    let telemetry = Arc::new(builder.build()?);
    *slot = Some(telemetry.clone());
    Ok(telemetry)
}

/// The installed instance.
pub fn get() -> Result<Arc<Telemetry>> {
    GLOBAL.read().unwrap_or_else(PoisonError::into_inner).clone().ok_or(TelemetryError::NotInitialized)
}

/// Logger of the installed instance, looked up without blocking.
///
/// `None` while the slot is empty or held for writing. Lifecycle diagnostics
/// fire under the write lock in [`init_with`], so waiting here would deadlock.
pub(crate) fn current_logger() -> Option<Arc<Logger>> {
    let slot = match GLOBAL.try_read() {
        Ok(slot) => slot,
        Err(TryLockError::Poisoned(e)) => e.into_inner(),
        Err(TryLockError::WouldBlock) => return None,
    };
    slot.as_ref().map(|telemetry| telemetry.logger().clone())
}

/// Bridge layer that follows whichever instance is installed here.
pub fn tracing_layer() -> TelemetryLayer {
    TelemetryLayer::global()
}

/// Start a root span on the installed instance.
pub fn start_span(name: &str) -> Result<SpanLogger> {
    get()?.start_span(name)
}

/// Remove and shut down the installed instance. A no-op when the slot is empty.
pub fn shutdown() -> Result<()> {
    let previous = GLOBAL.write().unwrap_or_else(PoisonError::into_inner).take();
    match previous {
        Some(telemetry) => telemetry.shutdown(),
        None => Ok(()),
    }
}
