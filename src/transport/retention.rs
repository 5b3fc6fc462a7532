// RetentionSweeper: periodically compresses closed log files and deletes the
// ones whose date marker falls outside the retention window.

use super::audit::{self, AuditLog};
use super::file::{FILE_LEVELS, parse_file_name};
use chrono::{Days, NaiveDate, Utc};
use flate2::Compression;
use flate2::write::GzEncoder;
use std::collections::HashSet;
use std::fs::{self, File};
use std::io;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio::time::sleep;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SweepReport {
    pub compressed: usize,
    pub deleted: usize,
}

pub struct RetentionSweeper {
    directory: PathBuf,
    retention_days: u32,
    compress: bool,
    interval: Duration,
}

impl RetentionSweeper {
    #[must_use]
    pub fn new(
        directory: impl Into<PathBuf>,
        retention_days: u32,
        compress: bool,
        interval: Duration,
    ) -> Self {
        Self {
            directory: directory.into(),
            retention_days,
            compress,
            interval,
        }
    }

    /// Spawn the periodic sweep on the current runtime.
    ///
    /// The returned `JoinHandle` resolves after `cancel_token` fires.
    #[must_use]
    pub fn spawn(self, cancel_token: CancellationToken) -> JoinHandle<()> {
        tokio::spawn(async move { self.run(cancel_token).await })
    }

    async fn run(self, cancel_token: CancellationToken) {
        info!(
            "RetentionSweeper started for {:?}, interval {:?}",
            self.directory, self.interval
        );
        let sweeper = std::sync::Arc::new(self);

        loop {
            tokio::select! {
                () = cancel_token.cancelled() => {
                    info!("RetentionSweeper received shutdown signal, stopping");
                    break;
                }
                () = sleep(sweeper.interval) => {
                    let pass = sweeper.clone();
                    let today = Utc::now().date_naive();
                    match tokio::task::spawn_blocking(move || pass.sweep_once(today)).await {
                        Ok(Ok(report)) if report != SweepReport::default() => {
                            info!(
                                compressed = report.compressed,
                                deleted = report.deleted,
                                "Log retention sweep finished"
                            );
                        }
                        Ok(Ok(_)) => {}
                        Ok(Err(e)) => error!("log retention sweep error: {e}"),
                        Err(e) => error!("log retention sweep task failed: {e}"),
                    }
                }
            }
        }

        info!("RetentionSweeper shutdown complete");
    }

    /// Oldest date that is still kept.
    fn cutoff(&self, today: NaiveDate) -> NaiveDate {
        today
            .checked_sub_days(Days::new(u64::from(self.retention_days)))
            .unwrap_or(NaiveDate::MIN)
    }

    /// One pass over the directory as of `today`.
    ///
    /// Files dated before `today - retention_days` are deleted. When
    /// compression is on, files that are closed (or from a past day) are
    /// gzipped in place.
    pub fn sweep_once(&self, today: NaiveDate) -> io::Result<SweepReport> {
        let cutoff = self.cutoff(today);
        let mut report = SweepReport::default();
        let mut known: HashSet<String> = HashSet::new();

        for level in FILE_LEVELS {
            let _guard = audit::lock();
            let path = AuditLog::path(&self.directory, level);
            let mut log = match AuditLog::load(&path) {
                Ok(log) => log,
                Err(e) => {
                    warn!("Skipping unreadable audit file {path:?}: {e}");
                    continue;
                }
            };
            let before = log.clone();

            log.files.retain_mut(|record| {
                if record.date < cutoff {
                    for candidate in [record.name.clone(), format!("{}.gz", record.name)] {
                        match remove_if_exists(&self.directory.join(&candidate)) {
                            Ok(true) => report.deleted += 1,
                            Ok(false) => {}
                            Err(e) => error!("Failed to remove {candidate}: {e}"),
                        }
                    }
                    return false;
                }

                known.insert(record.name.clone());
                known.insert(format!("{}.gz", record.name));

                let eligible = record.closed || record.date < today;
                if self.compress && eligible && !record.compressed {
                    match gzip_in_place(&self.directory.join(&record.name)) {
                        Ok(true) => {
                            record.compressed = true;
                            record.closed = true;
                            report.compressed += 1;
                        }
                        Ok(false) => {}
                        Err(e) => error!("Failed to compress {}: {e}", record.name),
                    }
                }
                true
            });

            if log != before {
                log.save(&path)?;
            }
        }

        // Files no audit knows about, e.g. left behind by a lost audit file.
        for dir_entry in fs::read_dir(&self.directory)? {
            let dir_entry = dir_entry?;
            let name = dir_entry.file_name().to_string_lossy().into_owned();
            if known.contains(&name) {
                continue;
            }
            let Some((_, date)) = parse_file_name(&name) else {
                continue;
            };
            if date < cutoff {
                match fs::remove_file(dir_entry.path()) {
                    Ok(()) => {
                        warn!("Removed expired orphan log file {name}");
                        report.deleted += 1;
                    }
                    Err(e) => error!("Failed to remove {name}: {e}"),
                }
            }
        }

        Ok(report)
    }
}

fn remove_if_exists(path: &Path) -> io::Result<bool> {
    match fs::remove_file(path) {
        Ok(()) => Ok(true),
        Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(false),
        Err(e) => Err(e),
    }
}

/// Replace `path` with `path.gz`. Returns `false` if `path` does not exist.
fn gzip_in_place(path: &Path) -> io::Result<bool> {
    let mut input = match File::open(path) {
        Ok(f) => f,
        Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(false),
        Err(e) => return Err(e),
    };

    let mut gz_name = path.as_os_str().to_owned();
    gz_name.push(".gz");
    let gz_path = PathBuf::from(gz_name);

    let output = File::create(&gz_path)?;
    let mut encoder = GzEncoder::new(output, Compression::default());
    io::copy(&mut input, &mut encoder)?;
    encoder.finish()?.sync_all()?;

    fs::remove_file(path)?;
    Ok(true)
}
