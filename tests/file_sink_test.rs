use chrono::{NaiveDate, TimeZone, Utc};
use shopra_logging::domain::RenderedEntry;
use shopra_logging::transport::audit::AuditLog;
use shopra_logging::transport::file::file_name;
use shopra_logging::transport::{FileTransport, RetentionSweeper, SweepReport, Transport};
use shopra_logging::{FileSinkConfig, LogEntry, LogLevel};
use std::fs;
use std::path::Path;
use std::time::Duration;
use tempfile::TempDir;

fn sink(dir: &Path) -> FileTransport {
    FileTransport::new(FileSinkConfig {
        directory: dir.to_path_buf(),
        ..FileSinkConfig::default()
    })
    .unwrap()
}

fn date() -> NaiveDate {
    NaiveDate::from_ymd_opt(2024, 7, 15).unwrap()
}

fn write(sink: &FileTransport, level: LogLevel, message: &str) {
    let mut entry = LogEntry::new(level, "inventory", message);
    entry.timestamp = Utc.with_ymd_and_hms(2024, 7, 15, 23, 59, 59).unwrap();
    sink.write(&RenderedEntry::new(entry));
}

fn messages(dir: &Path, level: LogLevel) -> Vec<String> {
    let path = dir.join(file_name(level, date(), 0));
    fs::read_to_string(path)
        .unwrap_or_default()
        .lines()
        .map(|l| {
            let v: serde_json::Value = serde_json::from_str(l).unwrap();
            v["message"].as_str().unwrap().to_string()
        })
        .collect()
}

#[test]
fn test_severity_inclusive_boundaries() {
    let dir = TempDir::new().unwrap();
    let sink = sink(dir.path());

    write(&sink, LogLevel::Debug, "debug");
    write(&sink, LogLevel::Info, "info");
    write(&sink, LogLevel::Warn, "warn");
    write(&sink, LogLevel::Error, "error");

    // Lowest level of each tier is included, the one below is not.
    assert_eq!(messages(dir.path(), LogLevel::Info), ["info", "warn", "error"]);
    assert_eq!(messages(dir.path(), LogLevel::Warn), ["warn", "error"]);
    assert_eq!(messages(dir.path(), LogLevel::Error), ["error"]);
}

#[test]
fn test_file_names_embed_utc_date() {
    let dir = TempDir::new().unwrap();
    let sink = sink(dir.path());
    write(&sink, LogLevel::Error, "late night");

    for level in [LogLevel::Info, LogLevel::Warn, LogLevel::Error] {
        assert!(dir.path().join(format!("{level}-2024-07-15.log")).exists());
        assert!(AuditLog::path(dir.path(), level).exists());
    }
    assert!(!dir.path().join("debug-2024-07-15.log").exists());
}

#[test]
fn test_concurrent_construction_on_shared_directory() {
    let dir = TempDir::new().unwrap();
    let logs = dir.path().join("nested").join("logs");

    std::thread::scope(|scope| {
        for _ in 0..8 {
            let logs = logs.clone();
            scope.spawn(move || {
                let sink = FileTransport::new(FileSinkConfig {
                    directory: logs,
                    ..FileSinkConfig::default()
                })
                .unwrap();
                write(&sink, LogLevel::Info, "hello");
            });
        }
    });

    assert_eq!(messages(&logs, LogLevel::Info).len(), 8);
}

#[test]
fn test_sweeper_applies_retention_to_sink_output() {
    let dir = TempDir::new().unwrap();
    let sink = sink(dir.path());
    write(&sink, LogLevel::Warn, "old news");

    let sweeper = RetentionSweeper::new(dir.path(), 7, true, Duration::from_secs(3600));

    // Still inside the window: the past-day file is compressed, not deleted.
    let report = sweeper.sweep_once(date() + chrono::Days::new(1)).unwrap();
    assert_eq!(report.deleted, 0);
    assert_eq!(report.compressed, 2);
    assert!(dir.path().join("warn-2024-07-15.log.gz").exists());

    // Past the window: everything for that day goes.
    let report = sweeper.sweep_once(date() + chrono::Days::new(30)).unwrap();
    assert_eq!(report, SweepReport { compressed: 0, deleted: 2 });
    assert!(!dir.path().join("warn-2024-07-15.log.gz").exists());
}
