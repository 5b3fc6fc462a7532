//! Rotation bookkeeping: one `.audit-<level>.json` per level listing every
//! file that level has created.

use crate::domain::LogLevel;
use chrono::NaiveDate;
use parking_lot::{Mutex, MutexGuard};
use serde::{Deserialize, Serialize};
use std::fs;
use std::io;
use std::path::{Path, PathBuf};

/// Serializes read-modify-write cycles on audit files across every file sink
/// and sweeper in the process.
static AUDIT_LOCK: Mutex<()> = Mutex::new(());

pub(crate) fn lock() -> MutexGuard<'static, ()> {
    AUDIT_LOCK.lock()
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AuditRecord {
    pub name: String,
    pub date: NaiveDate,
    /// Epoch milliseconds.
    pub created_at: i64,
    #[serde(default)]
    pub closed: bool,
    #[serde(default)]
    pub compressed: bool,
}

impl AuditRecord {
    /// Name of the file on disk, accounting for compression.
    pub fn file_name(&self) -> String {
        if self.compressed {
            format!("{}.gz", self.name)
        } else {
            self.name.clone()
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct AuditLog {
    pub files: Vec<AuditRecord>,
}

impl AuditLog {
    pub fn path(directory: &Path, level: LogLevel) -> PathBuf {
        directory.join(format!(".audit-{level}.json"))
    }

    /// A missing file is an empty log.
    pub fn load(path: &Path) -> io::Result<Self> {
        match fs::read(path) {
            Ok(bytes) => serde_json::from_slice(&bytes)
                .map_err(|e| io::Error::new(io::ErrorKind::InvalidData, e)),
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(Self::default()),
            Err(e) => Err(e),
        }
    }

    /// Write through a temp file and rename, so readers never see a torn file.
    pub fn save(&self, path: &Path) -> io::Result<()> {
        let json = serde_json::to_vec_pretty(self)
            .map_err(|e| io::Error::new(io::ErrorKind::InvalidData, e))?;
        let tmp = path.with_extension("json.tmp");
        fs::write(&tmp, json)?;
        fs::rename(&tmp, path)
    }

    pub fn get(&self, name: &str) -> Option<&AuditRecord> {
        self.files.iter().find(|r| r.name == name)
    }

    /// Add a record for a new file. Returns `false` if it is already listed,
    /// in which case a reopened uncompressed file is marked open again.
    pub fn record_opened(&mut self, name: &str, date: NaiveDate, created_at: i64) -> bool {
        if let Some(record) = self.files.iter_mut().find(|r| r.name == name) {
            if !record.compressed {
                record.closed = false;
            }
            return false;
        }
        self.files.push(AuditRecord {
            name: name.to_string(),
            date,
            created_at,
            closed: false,
            compressed: false,
        });
        true
    }

    pub fn mark_closed(&mut self, name: &str) {
        if let Some(record) = self.files.iter_mut().find(|r| r.name == name) {
            record.closed = true;
        }
    }
}

/// Load, modify and save one audit file under the process-wide lock.
pub(crate) fn update<F>(directory: &Path, level: LogLevel, f: F) -> io::Result<()>
where
    F: FnOnce(&mut AuditLog),
{
    let _guard = lock();
    let path = AuditLog::path(directory, level);
    let mut audit = AuditLog::load(&path)?;
    f(&mut audit);
    audit.save(&path)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_missing_audit_is_empty() {
        let dir = TempDir::new().unwrap();
        let audit = AuditLog::load(&AuditLog::path(dir.path(), LogLevel::Info)).unwrap();
        assert!(audit.files.is_empty());
    }

    #[test]
    fn test_update_persists_records() {
        let dir = TempDir::new().unwrap();
        let date = NaiveDate::from_ymd_opt(2024, 3, 1).unwrap();

        update(dir.path(), LogLevel::Warn, |a| {
            assert!(a.record_opened("warn-2024-03-01.log", date, 1));
            assert!(!a.record_opened("warn-2024-03-01.log", date, 2));
        })
        .unwrap();
        update(dir.path(), LogLevel::Warn, |a| a.mark_closed("warn-2024-03-01.log")).unwrap();

        update(dir.path(), LogLevel::Warn, |a| {
            assert!(!a.record_opened("warn-2024-03-01.log", date, 3));
        })
        .unwrap();
        let path = AuditLog::path(dir.path(), LogLevel::Warn);
        assert!(!AuditLog::load(&path).unwrap().files[0].closed);
        update(dir.path(), LogLevel::Warn, |a| a.mark_closed("warn-2024-03-01.log")).unwrap();

        assert!(path.ends_with(".audit-warn.json"));
        let audit = AuditLog::load(&path).unwrap();
        assert_eq!(audit.files.len(), 1);
        assert!(audit.files[0].closed);
        assert_eq!(audit.files[0].created_at, 1);

        let raw: serde_json::Value = serde_json::from_slice(&fs::read(&path).unwrap()).unwrap();
        assert_eq!(raw["files"][0]["date"], "2024-03-01");
        assert_eq!(raw["files"][0]["createdAt"], 1);
    }
}
