//! Day-partitioned append log for operational messages.

use chrono::{DateTime, Duration, Local, NaiveDate, TimeZone};
use std::fmt;
use std::fs::{self, File, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::Mutex;
use tracing::{debug, warn};
use tripwire_core::{Error, Result};

/// Days of files kept by default.
pub const DEFAULT_RETENTION_DAYS: i64 = 30;

const DATE_SUFFIX: &str = "%Y-%m-%d";

/// Writes `<base>.<YYYY-MM-DD>` files, switching file at midnight and
/// deleting files older than the retention window.
pub struct DailyRotatingLog {
    base: PathBuf,
    retention_days: i64,
    current: Mutex<Option<(NaiveDate, File)>>,
}

impl DailyRotatingLog {
    pub fn new(base: impl Into<PathBuf>) -> Self {
        Self::with_retention(base, DEFAULT_RETENTION_DAYS)
    }

    pub fn with_retention(base: impl Into<PathBuf>, retention_days: i64) -> Self {
        Self {
            base: base.into(),
            retention_days,
            current: Mutex::new(None),
        }
    }

    pub fn base(&self) -> &Path {
        &self.base
    }

    /// File holding the lines written on `date`.
    pub fn path_for(&self, date: NaiveDate) -> PathBuf {
        let mut name = self.base.as_os_str().to_os_string();
        name.push(format!(".{}", date.format(DATE_SUFFIX)));
        PathBuf::from(name)
    }

    pub fn write_line(&self, message: &str) -> Result<()> {
        self.write_at(&Local::now(), message)
    }

    pub fn write_at<Tz: TimeZone>(&self, now: &DateTime<Tz>, message: &str) -> Result<()>
    where
        Tz::Offset: fmt::Display,
    {
        let today = now.date_naive();
        let mut current = self.current.lock().unwrap_or_else(|e| e.into_inner());

        let stale = !matches!(current.as_ref(), Some((date, _)) if *date == today);
        if stale {
            let path = self.path_for(today);
            if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
                fs::create_dir_all(parent).map_err(|e| storage_error(parent, e))?;
            }
            let file = OpenOptions::new()
                .create(true)
                .append(true)
                .open(&path)
                .map_err(|e| storage_error(&path, e))?;
            *current = Some((today, file));
            self.prune(today);
        }

        if let Some((date, file)) = current.as_mut() {
            writeln!(file, "{}, INFO, {}", now.to_rfc3339(), message)
                .map_err(|e| storage_error(&self.path_for(*date), e))?;
        }
        Ok(())
    }

    fn prune(&self, today: NaiveDate) {
        let cutoff = today - Duration::days(self.retention_days);
        let Some(prefix) = self.base.file_name().map(|n| format!("{}.", n.to_string_lossy()))
        else {
            return;
        };
        let dir = match self.base.parent() {
            Some(parent) if !parent.as_os_str().is_empty() => parent.to_path_buf(),
            _ => PathBuf::from("."),
        };

        let entries = match fs::read_dir(&dir) {
            Ok(entries) => entries,
            Err(e) => {
                warn!(dir = %dir.display(), error = %e, "Cannot scan for expired logs");
                return;
            }
        };

        for entry in entries.flatten() {
            let name = entry.file_name().to_string_lossy().to_string();
            let Some(date) = name
                .strip_prefix(&prefix)
                .and_then(|suffix| NaiveDate::parse_from_str(suffix, DATE_SUFFIX).ok())
            else {
                continue;
            };
            if date < cutoff {
                match fs::remove_file(entry.path()) {
                    Ok(()) => debug!(file = %name, "Expired log removed"),
                    Err(e) => warn!(file = %name, error = %e, "Cannot remove expired log"),
                }
            }
        }
    }
}

fn storage_error(path: &Path, err: std::io::Error) -> Error {
    Error::Storage(format!("{}: {}", path.display(), err))
}
