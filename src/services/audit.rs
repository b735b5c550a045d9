//! Audit log
//!
//! Append-only JSON-lines record of completed requests. Writes stay within a
//! single line per entry; I/O failures are the caller's to log and swallow so
//! a successful response is never hidden by audit trouble.

use crate::config::ObservabilityConfig;
use serde_json::Value;
use std::fs::OpenOptions;
use std::io::Write;
use std::path::PathBuf;
use std::time::{SystemTime, UNIX_EPOCH};

pub struct AuditLogger {
    path: PathBuf,
}

impl AuditLogger {
    /// Parent directories are created at construction time.
    pub fn new(cfg: &ObservabilityConfig) -> std::io::Result<Self> {
        let path = PathBuf::from(&cfg.audit_log_path);
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        Ok(Self { path })
    }

    /// Appends one entry: `{"timestamp": <epoch seconds>, ...payload}`.
    pub fn write(&self, payload: Value) -> std::io::Result<()> {
        let timestamp = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_secs_f64())
            .unwrap_or(0.0);
        let mut entry = serde_json::Map::new();
        entry.insert("timestamp".to_string(), timestamp.into());
        if let Value::Object(fields) = payload {
            entry.extend(fields);
        }

        let mut file = OpenOptions::new().create(true).append(true).open(&self.path)?;
        writeln!(file, "{}", Value::Object(entry))?;
        Ok(())
    }
}
