//! Size-rotated log file.
//!
//! The active file is `<dir>/<service>.log`. When a write would push it past
//! the size limit, it is renamed to `<service>.log.<timestamp>` (gzipped to
//! `.gz` when compression is on) and a fresh active file is opened. Rotated
//! copies beyond the backup count, or older than the age limit, are removed
//! after every rotation and once on open.
//!
//! Runs on the sink's worker thread, so everything here is blocking I/O.

use std::fs::{self, File, OpenOptions};
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use std::time::{Duration, SystemTime};

use flate2::Compression;
use flate2::write::GzEncoder;

use crate::config::Settings;

const SECS_PER_DAY: u64 = 24 * 60 * 60;
const SUFFIX_FORMAT: &str = "%Y%m%dT%H%M%S%.3f";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) struct RotationPolicy {
    pub max_bytes: u64,
    pub max_backups: usize,
    pub max_age: Duration,
    pub compress: bool,
    pub local_time: bool,
}

impl RotationPolicy {
    pub(crate) fn from_settings(settings: &Settings) -> Self {
        Self {
            max_bytes: settings.max_file_size_mb.saturating_mul(1024 * 1024),
            max_backups: settings.max_backups,
            max_age: Duration::from_secs(settings.max_age_days.saturating_mul(SECS_PER_DAY)),
            compress: settings.compress,
            local_time: settings.local_time,
        }
    }
}

pub(crate) struct RotatingFile {
    path: PathBuf,
    file: File,
    size: u64,
    policy: RotationPolicy,
}

impl RotatingFile {
    /// Open (or create) the active file at `path`, appending.
    pub(crate) fn open(path: PathBuf, policy: RotationPolicy) -> io::Result<Self> {
        let file = open_append(&path)?;
        let size = file.metadata()?.len();
        let this = Self { path, file, size, policy };
        this.remove_stale();
        Ok(this)
    }

    fn rotate(&mut self) -> io::Result<()> {
        self.file.flush()?;
        let rotated = self.next_backup_path();
        fs::rename(&self.path, &rotated)?;
        self.file = open_append(&self.path)?;
        self.size = 0;

        if self.policy.compress {
            if let Err(e) = compress(&rotated) {
                eprintln!("spanlog: failed to compress {}: {e}", rotated.display());
            }
        }
        self.remove_stale();
        Ok(())
    }

    fn next_backup_path(&self) -> PathBuf {
        let stamp = if self.policy.local_time {
            chrono::Local::now().format(SUFFIX_FORMAT).to_string()
        } else {
            chrono::Utc::now().format(SUFFIX_FORMAT).to_string()
        };
        let base = format!("{}.{stamp}", self.path.display());
        let mut candidate = PathBuf::from(&base);
        let mut n = 1;
        while candidate.exists() || gz_path(&candidate).exists() {
            candidate = PathBuf::from(format!("{base}-{n}"));
            n += 1;
        }
        candidate
    }

    /// Rotated copies of the active file, oldest first.
    fn backups(&self) -> Vec<(PathBuf, SystemTime)> {
        let (Some(dir), Some(name)) = (self.path.parent(), self.path.file_name().and_then(|n| n.to_str())) else {
            return Vec::new();
        };
        let Ok(entries) = fs::read_dir(dir) else {
            return Vec::new();
        };
        let prefix = format!("{name}.");

        let mut backups: Vec<_> = entries
            .flatten()
            .filter(|e| e.file_name().to_str().is_some_and(|n| n.starts_with(&prefix)))
            .filter_map(|e| {
                let modified = e.metadata().and_then(|m| m.modified()).ok()?;
                Some((e.path(), modified))
            })
            .collect();
        backups.sort_by_key(|(_, modified)| *modified);
        backups
    }

    fn remove_stale(&self) {
        let backups = self.backups();
        let cutoff = SystemTime::now().checked_sub(self.policy.max_age);
        let excess = backups.len().saturating_sub(self.policy.max_backups);

        for (idx, (path, modified)) in backups.iter().enumerate() {
            let expired = cutoff.is_some_and(|c| *modified < c);
            if idx < excess || expired {
                if let Err(e) = fs::remove_file(path) {
                    eprintln!("spanlog: failed to remove old log {}: {e}", path.display());
                }
            }
        }
    }
}

impl Write for RotatingFile {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        let len = buf.len() as u64;
        // A record larger than the limit still lands whole in a fresh file.
        if self.size > 0 && self.size.saturating_add(len) > self.policy.max_bytes {
            self.rotate()?;
        }
        self.file.write_all(buf)?;
        self.size += len;
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        self.file.flush()
    }
}

fn open_append(path: &Path) -> io::Result<File> {
    let mut options = OpenOptions::new();
    options.create(true).append(true);
    #[cfg(unix)]
    {
        use std::os::unix::fs::OpenOptionsExt;
        options.mode(0o644);
    }
    options.open(path)
}

fn gz_path(path: &Path) -> PathBuf {
    PathBuf::from(format!("{}.gz", path.display()))
}

fn compress(path: &Path) -> io::Result<()> {
    let gz = gz_path(path);
    let mut encoder = GzEncoder::new(File::create(&gz)?, Compression::default());
    io::copy(&mut File::open(path)?, &mut encoder)?;
    encoder.finish()?;
    fs::remove_file(path)
}
