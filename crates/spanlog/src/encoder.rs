//! Record encoding.
//!
//! Structured records are one JSON object per line:
//!
//! ```text
//! {"level":"info","timestamp":"2026-10-14T09:30:00.123+0200","message":"hello","key":"value"}
//! ```
//!
//! Human-readable records are tab separated, with fields as a trailing JSON
//! object:
//!
//! ```text
//! 2026-10-14T09:30:00.123+0200	INFO	hello	{"key":"value"}
//! ```
//!
//! The object is streamed through `serde_json::Serializer` so that repeated
//! keys are written as given instead of collapsing into one map entry.

use serde::Serialize;
use serde::ser::{SerializeMap, Serializer as _};

use crate::field::Field;
use crate::level::Severity;

pub(crate) const LEVEL_KEY: &str = "level";
pub(crate) const TIMESTAMP_KEY: &str = "timestamp";
pub(crate) const MESSAGE_KEY: &str = "message";

const TIMESTAMP_FORMAT: &str = "%Y-%m-%dT%H:%M:%S%.3f%z";

/// Output encoding shared by all sinks of a logger.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Encoding {
    /// One JSON object per line.
    Json,
    /// Tab-separated text for terminals.
    Console,
}

impl Encoding {
    pub fn from_structured(structured: bool) -> Self {
        if structured { Self::Json } else { Self::Console }
    }
}

/// Current time formatted for a record.
pub(crate) fn timestamp(local_time: bool) -> String {
    if local_time {
        chrono::Local::now().format(TIMESTAMP_FORMAT).to_string()
    } else {
        chrono::Utc::now().format(TIMESTAMP_FORMAT).to_string()
    }
}

/// Encode one record, newline terminated.
pub(crate) fn encode(
    encoding: Encoding,
    timestamp: &str,
    level: Severity,
    message: &str,
    fields: &[Field],
) -> serde_json::Result<Vec<u8>> {
    let mut buf = Vec::with_capacity(128 + message.len());
    match encoding {
        Encoding::Json => {
            let mut ser = serde_json::Serializer::new(&mut buf);
            let mut map = ser.serialize_map(None)?;
            map.serialize_entry(LEVEL_KEY, &level)?;
            map.serialize_entry(TIMESTAMP_KEY, timestamp)?;
            map.serialize_entry(MESSAGE_KEY, message)?;
            for field in fields.iter().filter(|f| !f.value().is_absent()) {
                map.serialize_entry(field.key(), field.value())?;
            }
            map.end()?;
        }
        Encoding::Console => {
            buf.extend_from_slice(timestamp.as_bytes());
            buf.push(b'\t');
            buf.extend_from_slice(level.as_upper_str().as_bytes());
            buf.push(b'\t');
            buf.extend_from_slice(message.as_bytes());
            if fields.iter().any(|f| !f.value().is_absent()) {
                buf.push(b'\t');
                FieldObject(fields).serialize(&mut serde_json::Serializer::new(&mut buf))?;
            }
        }
    }
    buf.push(b'\n');
    Ok(buf)
}

struct FieldObject<'a>(&'a [Field]);

impl Serialize for FieldObject<'_> {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let mut map = serializer.serialize_map(None)?;
        for field in self.0.iter().filter(|f| !f.value().is_absent()) {
            map.serialize_entry(field.key(), field.value())?;
        }
        map.end()
    }
}
