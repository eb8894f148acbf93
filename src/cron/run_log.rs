/// Append-only JSONL run history for cron jobs, one file per job id under
/// `runs/<jobId>.jsonl`, pruned to stay bounded.
///
/// Grounded on `utils::atomic_write`'s write-to-temp-then-rename pattern,
/// applied here to the pruned/rewritten file rather than every append (an
/// append is a single `OpenOptions::append` write — only the prune pass
/// needs atomicity since it rewrites the whole file).
use std::fs::OpenOptions;
use std::io::{BufRead, Write};
use std::path::{Path, PathBuf};

use anyhow::{bail, Context, Result};
use serde::{Deserialize, Serialize};

pub const MAX_BYTES: u64 = 5 * 1024 * 1024;
pub const KEEP_LINES: usize = 1000;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunLogEntry {
    pub ts: i64,
    #[serde(rename = "jobId")]
    pub job_id: String,
    pub action: String,
    pub status: String,
    #[serde(rename = "durationMs", default, skip_serializing_if = "Option::is_none")]
    pub duration_ms: Option<i64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub delivered: Option<bool>,
    #[serde(
        rename = "deliveryStatus",
        default,
        skip_serializing_if = "Option::is_none"
    )]
    pub delivery_status: Option<String>,
    #[serde(
        rename = "deliveryError",
        default,
        skip_serializing_if = "Option::is_none"
    )]
    pub delivery_error: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub summary: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(rename = "sessionId", default, skip_serializing_if = "Option::is_none")]
    pub session_id: Option<String>,
    #[serde(
        rename = "sessionKey",
        default,
        skip_serializing_if = "Option::is_none"
    )]
    pub session_key: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub model: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub provider: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub usage: Option<serde_json::Value>,
}

/// Resolve `runs/<jobId>.jsonl` under `runs_dir`, rejecting a `jobId` that
/// could escape the directory (`..`, `/`, `\`).
pub fn resolve_run_log_path(runs_dir: &Path, job_id: &str) -> Result<PathBuf> {
    if job_id.is_empty()
        || job_id.contains("..")
        || job_id.contains('/')
        || job_id.contains('\\')
    {
        bail!("unsafe cron job id for run log path: {:?}", job_id);
    }
    Ok(runs_dir.join(format!("{job_id}.jsonl")))
}

/// Append one entry, then prune if the file has grown past `MAX_BYTES` or
/// `KEEP_LINES`.
pub fn append(runs_dir: &Path, job_id: &str, entry: &RunLogEntry) -> Result<()> {
    let path = resolve_run_log_path(runs_dir, job_id)?;
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)?;
    }
    let line = serde_json::to_string(entry)?;
    let mut file = OpenOptions::new()
        .create(true)
        .append(true)
        .open(&path)
        .with_context(|| format!("opening run log {}", path.display()))?;
    writeln!(file, "{line}")?;
    drop(file);
    prune_if_needed(&path)?;
    Ok(())
}

fn prune_if_needed(path: &Path) -> Result<()> {
    let metadata = std::fs::metadata(path)?;
    let file = std::fs::File::open(path)?;
    let reader = std::io::BufReader::new(file);
    let lines: Vec<String> = reader.lines().collect::<std::io::Result<_>>()?;
    if metadata.len() <= MAX_BYTES && lines.len() <= KEEP_LINES {
        return Ok(());
    }
    let start = lines.len().saturating_sub(KEEP_LINES);
    let kept = lines[start..].join("\n");
    let content = if kept.is_empty() {
        String::new()
    } else {
        format!("{kept}\n")
    };
    crate::utils::atomic_write(path, &content)
}

/// Read valid, well-formed entries from a job's run log, most recent last.
/// Malformed or partially-written lines are skipped rather than failing
/// the whole read.
pub fn read(runs_dir: &Path, job_id: &str, limit: Option<usize>) -> Result<Vec<RunLogEntry>> {
    let path = resolve_run_log_path(runs_dir, job_id)?;
    if !path.exists() {
        return Ok(Vec::new());
    }
    let file = std::fs::File::open(&path)?;
    let reader = std::io::BufReader::new(file);
    let mut entries: Vec<RunLogEntry> = reader
        .lines()
        .map_while(Result::ok)
        .filter_map(|line| serde_json::from_str::<RunLogEntry>(&line).ok())
        .collect();
    if let Some(limit) = limit {
        let start = entries.len().saturating_sub(limit);
        entries = entries.split_off(start);
    }
    Ok(entries)
}
