//! Run results - per-host records, the JSON report and the process exit code

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::fs;
use std::path::Path;

/// Status ssh itself exits with on connection or authentication errors
pub const SSH_ERROR_STATUS: i32 = 255;

/// What happened on one host
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct TaskResult {
    /// When the child was spawned, `None` if it never was
    pub started: Option<DateTime<Utc>>,
    pub host: String,
    pub name: String,
    #[serde(skip)]
    pub pretty_host: String,
    pub command: String,
    #[serde(serialize_with = "lossy_bytes::serialize")]
    pub stdout: Vec<u8>,
    #[serde(serialize_with = "lossy_bytes::serialize")]
    pub stderr: Vec<u8>,
    /// Exit code, `-N` when killed by signal `N`
    pub exitcode: Option<i32>,
    pub failures: Vec<String>,
}

impl TaskResult {
    pub fn succeeded(&self) -> bool {
        self.failures.is_empty()
    }
}

/// Process exit code for a finished run.
///
/// 3 if any task was killed or never produced a status, else 4 if any ssh
/// reported a connection error, else 5 if any remote command failed, else 0.
pub fn exit_code(results: &[TaskResult]) -> u8 {
    let statuses: Vec<Option<i32>> = results.iter().map(|r| r.exitcode).collect();
    if statuses.iter().any(|s| s.map_or(true, |code| code < 0)) {
        3
    } else if statuses.contains(&Some(SSH_ERROR_STATUS)) {
        4
    } else if statuses.iter().any(|s| *s != Some(0)) {
        5
    } else {
        0
    }
}

/// Write every result as a pretty-printed JSON array
pub fn write_json(path: &Path, results: &[TaskResult]) -> Result<()> {
    let json = serde_json::to_string_pretty(results)?;
    fs::write(path, json)
        .with_context(|| format!("Could not write JSON report to {}", path.display()))?;
    log::info!("Wrote report for {} hosts to {}", results.len(), path.display());
    Ok(())
}

mod lossy_bytes {
    use serde::Serializer;

    pub fn serialize<S: Serializer>(bytes: &[u8], serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&String::from_utf8_lossy(bytes))
    }
}
