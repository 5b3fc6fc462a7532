// Rotating JSON-lines files, one active file per severity tier.
//
// Tiers are severity-inclusive: `info-*.log` holds info and above,
// `warn-*.log` warn and above, `error-*.log` errors only. Debug entries are
// not written to disk.
//
// A file is named `<level>-<YYYY-MM-DD>.log` after the entry's UTC date.
// When it reaches the size ceiling the next one for the same day is
// `<level>-<YYYY-MM-DD>.1.log`, then `.2.log`, and so on.

use super::retention::RetentionSweeper;
use super::{FALLBACK_TARGET, Transport, audit};
use crate::config::FileSinkConfig;
use crate::domain::{LogLevel, LoggerError, RenderedEntry};
use chrono::{NaiveDate, Utc};
use parking_lot::Mutex;
use std::fs::{self, File, OpenOptions};
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use tracing::{debug, error, warn};

/// Levels that own a file, lowest first.
pub const FILE_LEVELS: [LogLevel; 3] = [LogLevel::Info, LogLevel::Warn, LogLevel::Error];

pub fn file_name(level: LogLevel, date: NaiveDate, index: u32) -> String {
    if index == 0 {
        format!("{level}-{}.log", date.format("%Y-%m-%d"))
    } else {
        format!("{level}-{}.{index}.log", date.format("%Y-%m-%d"))
    }
}

/// Parse the level and date marker out of a log file name, compressed or
/// not. Returns `None` for anything that is not one of ours.
pub fn parse_file_name(name: &str) -> Option<(LogLevel, NaiveDate)> {
    let stem = name.strip_suffix(".gz").unwrap_or(name);
    if !stem.ends_with(".log") {
        return None;
    }
    FILE_LEVELS.iter().find_map(|level| {
        let rest = stem.strip_prefix(level.as_str())?.strip_prefix('-')?;
        let date = rest.get(..10)?;
        NaiveDate::parse_from_str(date, "%Y-%m-%d")
            .ok()
            .map(|d| (*level, d))
    })
}

struct ActiveFile {
    name: String,
    date: NaiveDate,
    file: File,
}

struct LevelFile {
    level: LogLevel,
    active: Mutex<Option<ActiveFile>>,
}

pub struct FileTransport {
    config: FileSinkConfig,
    tiers: Vec<LevelFile>,
}

impl FileTransport {
    /// Create the sink, making sure the log directory exists. Files are
    /// opened lazily on first write.
    pub fn new(config: FileSinkConfig) -> Result<Self, LoggerError> {
        fs::create_dir_all(&config.directory).map_err(|source| LoggerError::LogDirectory {
            path: config.directory.display().to_string(),
            source,
        })?;

        let tiers = FILE_LEVELS
            .iter()
            .map(|&level| LevelFile {
                level,
                active: Mutex::new(None),
            })
            .collect();

        Ok(Self { config, tiers })
    }

    pub fn directory(&self) -> &Path {
        &self.config.directory
    }

    /// A sweeper enforcing this sink's retention and compression policy.
    pub fn retention_sweeper(&self) -> RetentionSweeper {
        RetentionSweeper::new(
            self.config.directory.clone(),
            self.config.retention_days,
            self.config.compress,
            self.config.sweep_interval,
        )
    }

    /// Path of the file `level` is currently appending to, if any.
    pub fn active_path(&self, level: LogLevel) -> Option<PathBuf> {
        let tier = self.tiers.iter().find(|t| t.level == level)?;
        let active = tier.active.lock();
        active.as_ref().map(|a| self.config.directory.join(&a.name))
    }

    fn ensure_directory(&self) {
        if let Err(e) = fs::create_dir_all(&self.config.directory) {
            error!(
                target: FALLBACK_TARGET,
                directory = %self.config.directory.display(),
                "Failed to ensure log directory: {e}"
            );
        }
    }

    fn append(&self, tier: &LevelFile, line: &[u8], date: NaiveDate) -> io::Result<()> {
        let mut active = tier.active.lock();

        // Other sinks may append to the same file, so size comes from disk.
        let reuse = active.as_ref().is_some_and(|a| {
            a.date == date
                && fs::metadata(self.config.directory.join(&a.name))
                    .is_ok_and(|meta| meta.len() < self.config.max_size_bytes)
        });

        if !reuse {
            if let Some(previous) = active.take() {
                self.retire(tier.level, previous);
            }
            *active = Some(self.open_active(tier.level, date)?);
        }

        let Some(current) = active.as_mut() else {
            return Ok(());
        };
        current.file.write_all(line)
    }

    /// Drop the handle of a file we stop writing to. A file that still exists
    /// was rotated away and is marked closed; a vanished one is left alone.
    fn retire(&self, level: LogLevel, previous: ActiveFile) {
        let ActiveFile { name, file, .. } = previous;
        if let Err(e) = file.sync_data() {
            debug!("sync of {name} failed: {e}");
        }
        drop(file);

        if !self.config.directory.join(&name).exists() {
            return;
        }
        if let Err(e) = audit::update(&self.config.directory, level, |a| a.mark_closed(&name)) {
            warn!(target: FALLBACK_TARGET, "Failed to update {level} audit file: {e}");
        }
    }

    /// Find the first file for `date` that is not full and open it for
    /// appending.
    fn open_active(&self, level: LogLevel, date: NaiveDate) -> io::Result<ActiveFile> {
        let mut index = 0;
        loop {
            let name = file_name(level, date, index);
            let path = self.config.directory.join(&name);
            let compressed = self.config.directory.join(format!("{name}.gz"));

            let existing = match fs::metadata(&path) {
                Ok(meta) => Some(meta.len()),
                Err(e) if e.kind() == io::ErrorKind::NotFound => None,
                Err(e) => return Err(e),
            };
            let full = compressed.exists()
                || existing.is_some_and(|len| len >= self.config.max_size_bytes);
            if full {
                index += 1;
                continue;
            }

            let file = OpenOptions::new().create(true).append(true).open(&path)?;

            let created_at = Utc::now().timestamp_millis();
            if let Err(e) = audit::update(&self.config.directory, level, |a| {
                a.record_opened(&name, date, created_at);
            }) {
                warn!(target: FALLBACK_TARGET, "Failed to update {level} audit file: {e}");
            }

            debug!(file = %name, size = existing.unwrap_or(0), "Opened log file");
            return Ok(ActiveFile { name, date, file });
        }
    }
}

impl Transport for FileTransport {
    fn name(&self) -> &'static str {
        "file"
    }

    fn write(&self, entry: &RenderedEntry) {
        if entry.entry.level < LogLevel::Info {
            return;
        }

        self.ensure_directory();

        let date = entry.entry.timestamp.date_naive();
        let mut line = Vec::with_capacity(entry.json.len() + 1);
        line.extend_from_slice(entry.json.as_bytes());
        line.push(b'\n');

        for tier in self.tiers.iter().filter(|t| entry.entry.level >= t.level) {
            if let Err(e) = self.append(tier, &line, date) {
                error!(
                    target: FALLBACK_TARGET,
                    level = %tier.level,
                    "Failed to write log file: {e}"
                );
            }
        }
    }
}

impl Drop for FileTransport {
    fn drop(&mut self) {
        for tier in &self.tiers {
            if let Some(active) = tier.active.lock().as_mut() {
                let _ = active.file.flush();
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::LogEntry;
    use crate::transport::audit::AuditLog;
    use chrono::TimeZone;
    use tempfile::TempDir;

    fn config(dir: &Path, max_size_bytes: u64) -> FileSinkConfig {
        FileSinkConfig {
            directory: dir.to_path_buf(),
            max_size_bytes,
            ..FileSinkConfig::default()
        }
    }

    fn entry_on(level: LogLevel, day: u32, message: &str) -> RenderedEntry {
        let mut entry = LogEntry::new(level, "svc", message);
        entry.timestamp = Utc.with_ymd_and_hms(2024, 5, day, 8, 0, 0).unwrap();
        RenderedEntry::new(entry)
    }

    fn read_lines(path: &Path) -> Vec<String> {
        fs::read_to_string(path)
            .unwrap_or_default()
            .lines()
            .map(str::to_string)
            .collect()
    }

    #[test]
    fn test_file_name_round_trip() {
        let date = NaiveDate::from_ymd_opt(2024, 5, 1).unwrap();
        assert_eq!(file_name(LogLevel::Info, date, 0), "info-2024-05-01.log");
        assert_eq!(file_name(LogLevel::Error, date, 2), "error-2024-05-01.2.log");
        assert_eq!(
            parse_file_name("warn-2024-05-01.1.log.gz"),
            Some((LogLevel::Warn, date))
        );
        assert_eq!(parse_file_name(".audit-info.json"), None);
        assert_eq!(parse_file_name("debug-2024-05-01.log"), None);
    }

    #[test]
    fn test_rotates_by_date() {
        let dir = TempDir::new().unwrap();
        let sink = FileTransport::new(config(dir.path(), 1024 * 1024)).unwrap();

        sink.write(&entry_on(LogLevel::Info, 1, "first day"));
        sink.write(&entry_on(LogLevel::Info, 2, "second day"));

        assert_eq!(read_lines(&dir.path().join("info-2024-05-01.log")).len(), 1);
        assert_eq!(read_lines(&dir.path().join("info-2024-05-02.log")).len(), 1);

        let audit = AuditLog::load(&AuditLog::path(dir.path(), LogLevel::Info)).unwrap();
        assert_eq!(audit.files.len(), 2);
        assert!(audit.get("info-2024-05-01.log").unwrap().closed);
        assert!(!audit.get("info-2024-05-02.log").unwrap().closed);
    }

    #[test]
    fn test_rotates_by_size() {
        let dir = TempDir::new().unwrap();
        let sink = FileTransport::new(config(dir.path(), 10)).unwrap();

        sink.write(&entry_on(LogLevel::Error, 1, "one"));
        sink.write(&entry_on(LogLevel::Error, 1, "two"));
        sink.write(&entry_on(LogLevel::Error, 1, "three"));

        assert_eq!(read_lines(&dir.path().join("error-2024-05-01.log")).len(), 1);
        assert_eq!(read_lines(&dir.path().join("error-2024-05-01.1.log")).len(), 1);
        assert_eq!(read_lines(&dir.path().join("error-2024-05-01.2.log")).len(), 1);
    }

    #[test]
    fn test_recreates_deleted_directory() {
        let dir = TempDir::new().unwrap();
        let logs = dir.path().join("logs");
        let sink = FileTransport::new(config(&logs, 1024)).unwrap();

        sink.write(&entry_on(LogLevel::Warn, 3, "before"));
        fs::remove_dir_all(&logs).unwrap();
        sink.write(&entry_on(LogLevel::Warn, 3, "after"));

        let lines = read_lines(&logs.join("warn-2024-05-03.log"));
        assert_eq!(lines.len(), 1);
        assert!(lines[0].contains("after"));
    }

    #[test]
    fn test_resumes_existing_file() {
        let dir = TempDir::new().unwrap();
        {
            let sink = FileTransport::new(config(dir.path(), 1024 * 1024)).unwrap();
            sink.write(&entry_on(LogLevel::Info, 4, "first run"));
        }
        let sink = FileTransport::new(config(dir.path(), 1024 * 1024)).unwrap();
        sink.write(&entry_on(LogLevel::Info, 4, "second run"));

        assert_eq!(read_lines(&dir.path().join("info-2024-05-04.log")).len(), 2);
        let audit = AuditLog::load(&AuditLog::path(dir.path(), LogLevel::Info)).unwrap();
        assert_eq!(audit.files.len(), 1);
    }

    #[test]
    fn test_reopened_file_is_not_compressed_while_active() {
        let dir = TempDir::new().unwrap();
        let sink = FileTransport::new(FileSinkConfig {
            compress: true,
            ..config(dir.path(), 1024 * 1024)
        })
        .unwrap();

        // A late entry from the previous day rotates away from today's file
        // and back.
        sink.write(&entry_on(LogLevel::Info, 2, "today"));
        sink.write(&entry_on(LogLevel::Info, 1, "late"));
        sink.write(&entry_on(LogLevel::Info, 2, "today again"));

        let audit = AuditLog::load(&AuditLog::path(dir.path(), LogLevel::Info)).unwrap();
        assert!(!audit.get("info-2024-05-02.log").unwrap().closed);

        let today = NaiveDate::from_ymd_opt(2024, 5, 2).unwrap();
        let report = sink.retention_sweeper().sweep_once(today).unwrap();
        assert_eq!(report.compressed, 1);

        assert!(dir.path().join("info-2024-05-01.log.gz").exists());
        assert_eq!(read_lines(&dir.path().join("info-2024-05-02.log")).len(), 2);
        assert!(!dir.path().join("info-2024-05-02.1.log").exists());

        sink.write(&entry_on(LogLevel::Info, 2, "after sweep"));
        assert_eq!(read_lines(&dir.path().join("info-2024-05-02.log")).len(), 3);
    }

    #[test]
    fn test_size_cap_holds_across_sinks_sharing_a_directory() {
        let dir = TempDir::new().unwrap();
        let first = FileTransport::new(config(dir.path(), 1000)).unwrap();
        let second = FileTransport::new(config(dir.path(), 1000)).unwrap();
        let line_len = entry_on(LogLevel::Info, 3, "entry 000").json.len() as u64 + 1;

        for i in 0..40 {
            first.write(&entry_on(LogLevel::Info, 3, &format!("entry {i:03}")));
            second.write(&entry_on(LogLevel::Info, 3, &format!("entry {i:03}")));
        }

        let mut total = 0;
        for entry in fs::read_dir(dir.path()).unwrap() {
            let entry = entry.unwrap();
            let name = entry.file_name().to_string_lossy().into_owned();
            if !name.starts_with("info-") {
                continue;
            }
            let len = entry.metadata().unwrap().len();
            assert!(len < 1000 + line_len, "{name} grew to {len} bytes");
            total += len;
        }
        assert_eq!(total, 80 * line_len);
    }
}
