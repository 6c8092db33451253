//! Telemetry configuration.
//!
//! A service describes its logging and tracing setup with one JSON document:
//!
//! ```json
//! {
//!   "serviceName": "billing",
//!   "logDirectory": "/var/log/billing",
//!   "enableConsoleSink": true,
//!   "maxFileSizeMB": 100,
//!   "maxAgeDays": 28,
//!   "maxBackups": 7,
//!   "minimumLevel": "info",
//!   "structuredEncoding": true,
//!   "tracingEnabled": true
//! }
//! ```
//!
//! [`TelemetryConfig`] mirrors the document as written. [`TelemetryConfig::resolve`]
//! fills every default once and produces the immutable [`Settings`] the rest of
//! the crate reads.

use std::path::{Path, PathBuf};

use serde::Deserialize;

use crate::error::{Result, TelemetryError};
use crate::level::Severity;

pub const DEFAULT_MAX_FILE_SIZE_MB: u64 = 100;
pub const DEFAULT_MAX_AGE_DAYS: u64 = 28;
pub const DEFAULT_MAX_BACKUPS: usize = 7;
pub const DEFAULT_LOG_DIR_NAME: &str = "logs";

/// Configuration as supplied by the service.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TelemetryConfig {
    /// Names the log file (`<service_name>.log`) and the trace resource.
    #[serde(default)]
    pub service_name: String,

    /// Directory for the file sink (default: `<cwd>/logs`).
    #[serde(default, rename = "logDirectory")]
    pub log_dir: Option<PathBuf>,

    #[serde(default = "default_true", rename = "enableConsoleSink")]
    pub console: bool,

    #[serde(default = "default_true", rename = "enableFileSink")]
    pub file: bool,

    /// Rotate the active file once it grows past this size (default: 100).
    #[serde(default, rename = "maxFileSizeMB")]
    pub max_file_size_mb: Option<u64>,

    /// Remove rotated copies older than this many days (default: 28).
    #[serde(default)]
    pub max_age_days: Option<u64>,

    /// Keep at most this many rotated copies (default: 7).
    #[serde(default)]
    pub max_backups: Option<usize>,

    /// Gzip rotated copies.
    #[serde(default = "default_true")]
    pub compress: bool,

    /// Write record timestamps in local time rather than UTC.
    #[serde(default = "default_true")]
    pub local_time: bool,

    /// Minimum severity written to any sink (default: info).
    #[serde(default, rename = "minimumLevel")]
    pub level: Option<Severity>,

    /// JSON records when `true`, tab-separated text when `false`. Required.
    #[serde(rename = "structuredEncoding")]
    pub structured: bool,

    #[serde(default, rename = "tracingEnabled")]
    pub tracing: bool,
}

fn default_true() -> bool {
    true
}

impl TelemetryConfig {
    /// Configuration with both sinks enabled, tracing off, and every
    /// tunable left at its default.
    pub fn new(service_name: impl Into<String>, structured: bool) -> Self {
        Self {
            service_name: service_name.into(),
            log_dir: None,
            console: true,
            file: true,
            max_file_size_mb: None,
            max_age_days: None,
            max_backups: None,
            compress: true,
            local_time: true,
            level: None,
            structured,
            tracing: false,
        }
    }

    /// Validate and fill defaults. Zero counts as unset for the rotation
    /// parameters.
    pub fn resolve(&self) -> Result<Settings> {
        let service_name = self.service_name.trim().to_owned();
        if self.file && service_name.is_empty() {
            return Err(TelemetryError::Config("serviceName is required for the file sink".into()));
        }
        if service_name.contains(['/', '\\']) {
            return Err(TelemetryError::Config(format!(
                "serviceName must not contain a path separator: {service_name:?}"
            )));
        }

        let log_dir = match &self.log_dir {
            Some(dir) if !dir.as_os_str().is_empty() => dir.clone(),
            _ => std::env::current_dir()
                .map_err(|e| TelemetryError::Config(format!("cannot determine working directory: {e}")))?
                .join(DEFAULT_LOG_DIR_NAME),
        };

        Ok(Settings {
            service_name,
            log_dir,
            console: self.console,
            file: self.file,
            max_file_size_mb: non_zero_or(self.max_file_size_mb, DEFAULT_MAX_FILE_SIZE_MB),
            max_age_days: non_zero_or(self.max_age_days, DEFAULT_MAX_AGE_DAYS),
            max_backups: non_zero_or(self.max_backups, DEFAULT_MAX_BACKUPS),
            compress: self.compress,
            local_time: self.local_time,
            level: self.level.unwrap_or_default(),
            structured: self.structured,
            tracing: self.tracing,
        })
    }
}

fn non_zero_or<T: PartialEq + Default>(value: Option<T>, default: T) -> T {
    value.filter(|v| *v != T::default()).unwrap_or(default)
}

/// Fully resolved configuration. Built once per telemetry instance.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Settings {
    pub service_name: String,
    pub log_dir: PathBuf,
    pub console: bool,
    pub file: bool,
    pub max_file_size_mb: u64,
    pub max_age_days: u64,
    pub max_backups: usize,
    pub compress: bool,
    pub local_time: bool,
    pub level: Severity,
    pub structured: bool,
    pub tracing: bool,
}

impl Settings {
    /// Path of the active log file.
    pub fn log_file(&self) -> PathBuf {
        self.log_dir.join(format!("{}.log", self.service_name))
    }
}

/// Load and parse a JSON config file.
pub fn load_config(path: &Path) -> Result<TelemetryConfig> {
    let content = std::fs::read_to_string(path)
        .map_err(|source| TelemetryError::ConfigLoad { path: path.to_path_buf(), source })?;
    Ok(serde_json::from_str(&content)?)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn zero_and_absent_rotation_values_get_defaults() {
        let mut cfg = TelemetryConfig::new("svc", true);
        cfg.max_file_size_mb = Some(0);
        cfg.max_backups = Some(0);
        let s = cfg.resolve().unwrap();
        assert_eq!(s.max_file_size_mb, 100);
        assert_eq!(s.max_age_days, 28);
        assert_eq!(s.max_backups, 7);
        assert_eq!(s.level, Severity::Info);
    }

    #[test]
    fn explicit_values_survive() {
        let mut cfg = TelemetryConfig::new("svc", false);
        cfg.max_file_size_mb = Some(5);
        cfg.max_age_days = Some(1);
        cfg.max_backups = Some(2);
        cfg.level = Some(Severity::Warn);
        let s = cfg.resolve().unwrap();
        assert_eq!((s.max_file_size_mb, s.max_age_days, s.max_backups), (5, 1, 2));
        assert_eq!(s.level, Severity::Warn);
    }

    #[test]
    fn default_log_dir_is_under_cwd() {
        let s = TelemetryConfig::new("svc", true).resolve().unwrap();
        assert_eq!(s.log_dir, std::env::current_dir().unwrap().join("logs"));
        assert!(s.log_file().ends_with("logs/svc.log"));
    }

    #[test]
    fn file_sink_requires_service_name() {
        let err = TelemetryConfig::new("  ", true).resolve().unwrap_err();
        assert!(matches!(err, TelemetryError::Config(_)));

        let mut console_only = TelemetryConfig::new("", true);
        console_only.file = false;
        assert!(console_only.resolve().is_ok());
    }

    #[test]
    fn rejects_path_separators() {
        assert!(TelemetryConfig::new("../escape", true).resolve().is_err());
    }

    #[test]
    fn parse_camel_case_document() {
        let cfg: TelemetryConfig = serde_json::from_str(
            r#"{
                "serviceName": "billing",
                "logDirectory": "/tmp/billing",
                "enableConsoleSink": false,
                "maxFileSizeMB": 10,
                "minimumLevel": "debug",
                "structuredEncoding": true,
                "tracingEnabled": true
            }"#,
        )
        .unwrap();
        assert_eq!(cfg.service_name, "billing");
        assert_eq!(cfg.log_dir.as_deref(), Some(Path::new("/tmp/billing")));
        assert!(!cfg.console);
        assert!(cfg.file);
        assert_eq!(cfg.max_file_size_mb, Some(10));
        assert_eq!(cfg.level, Some(Severity::Debug));
        assert!(cfg.tracing);
        assert!(cfg.compress);
    }

    #[test]
    fn minimum_level_is_case_insensitive() {
        let cfg: TelemetryConfig =
            serde_json::from_str(r#"{"serviceName":"svc","structuredEncoding":false,"minimumLevel":"WARN"}"#).unwrap();
        assert_eq!(cfg.level, Some(Severity::Warn));
    }

    #[test]
    fn structured_encoding_is_required() {
        let err = serde_json::from_str::<TelemetryConfig>(r#"{"serviceName":"svc"}"#).unwrap_err();
        assert!(err.to_string().contains("structuredEncoding"), "{err}");
    }

    #[test]
    fn load_config_reports_missing_file() {
        let err = load_config(Path::new("/nonexistent/spanlog.json")).unwrap_err();
        assert!(matches!(err, TelemetryError::ConfigLoad { .. }));
    }
}
