//! Append-only JSONL logs with size-based rotation.
//!
//! One record per line, written with a single `write` call in append mode so
//! concurrent processes do not interleave partial lines. When the file would
//! exceed its size limit it is rotated by shifting numeric suffixes
//! (`log`, `log.1`, `log.2`, ...) and discarding the oldest backup.

use std::fs::OpenOptions;
use std::io::Write;
use std::path::PathBuf;
use std::sync::Mutex;

use chrono::DateTime;
use chrono::Utc;
use serde::Serialize;
use serde_json::Value;

use crate::error::Result;

pub struct RotatingLog {
    path: PathBuf,
    max_bytes: u64,
    max_backups: usize,
}

impl RotatingLog {
    pub fn new(path: impl Into<PathBuf>, max_bytes: u64, max_backups: usize) -> Self {
        Self {
            path: path.into(),
            max_bytes,
            max_backups,
        }
    }

    /// Append one record as a JSON line, rotating first when the line would
    /// push the file past its size limit.
    pub fn append<T: Serialize>(&self, record: &T) -> Result<()> {
        let mut line = serde_json::to_string(record)?;
        line.push('\n');
        self.rotate_if_needed(line.len() as u64)?;
        if let Some(parent) = self.path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let mut options = OpenOptions::new();
        options.append(true).create(true);
        #[cfg(unix)]
        {
            use std::os::unix::fs::OpenOptionsExt;
            options.mode(0o600);
        }
        let mut file = options.open(&self.path)?;
        file.write_all(line.as_bytes())?;
        Ok(())
    }

    fn backup_path(&self, n: usize) -> PathBuf {
        let mut os = self.path.clone().into_os_string();
        os.push(format!(".{n}"));
        PathBuf::from(os)
    }

    fn rotate_if_needed(&self, incoming: u64) -> Result<()> {
        if self.max_bytes == 0 {
            return Ok(());
        }
        let size = match std::fs::metadata(&self.path) {
            Ok(meta) => meta.len(),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(()),
            Err(e) => return Err(e.into()),
        };
        if size == 0 || size + incoming <= self.max_bytes {
            return Ok(());
        }
        // Shift backups from the oldest down; anything past max_backups is
        // dropped.
        let oldest = self.backup_path(self.max_backups);
        match std::fs::remove_file(&oldest) {
            Ok(()) => {}
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
            Err(e) => return Err(e.into()),
        }
        for n in (1..self.max_backups).rev() {
            let from = self.backup_path(n);
            if from.exists() {
                std::fs::rename(&from, self.backup_path(n + 1))?;
            }
        }
        if self.max_backups >= 1 {
            std::fs::rename(&self.path, self.backup_path(1))?;
        } else {
            std::fs::remove_file(&self.path)?;
        }
        Ok(())
    }
}

/// One audit record per handled request, with the request body captured.
#[derive(Debug, Clone, Serialize)]
pub struct AuditEntry {
    pub ts: DateTime<Utc>,
    pub request_id: String,
    pub key_id: String,
    pub path: String,
    pub status: u16,
    pub body: Value,
}

pub struct AuditLog {
    inner: Mutex<RotatingLog>,
}

impl AuditLog {
    pub fn new(path: impl Into<PathBuf>, max_bytes: u64, max_backups: usize) -> Self {
        Self {
            inner: Mutex::new(RotatingLog::new(path, max_bytes, max_backups)),
        }
    }

    pub fn record(&self, entry: &AuditEntry) -> Result<()> {
        match self.inner.lock() {
            Ok(log) => log.append(entry),
            Err(_) => Ok(()),
        }
    }
}

/// Payload-or-message trace record tagged by request position.
#[derive(Debug, Clone, Serialize)]
pub struct TraceRecord {
    pub ts: DateTime<Utc>,
    pub request_id: String,
    /// Which subsystem produced the record: `"client"`, `"harness"`, ...
    pub layer: String,
    /// `"in"` or `"out"` relative to the gateway.
    pub direction: String,
    pub path: String,
    /// Request lifecycle phase: `"request"`, `"event"`, `"completion"`, ...
    pub phase: String,
    pub payload: Value,
}

pub struct TraceLog {
    inner: Mutex<RotatingLog>,
}

impl TraceLog {
    pub fn new(path: impl Into<PathBuf>, max_bytes: u64, max_backups: usize) -> Self {
        Self {
            inner: Mutex::new(RotatingLog::new(path, max_bytes, max_backups)),
        }
    }

    pub fn record(&self, record: &TraceRecord) -> Result<()> {
        match self.inner.lock() {
            Ok(log) => log.append(record),
            Err(_) => Ok(()),
        }
    }
}
