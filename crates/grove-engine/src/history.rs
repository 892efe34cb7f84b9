use std::path::Path;
use std::sync::{Mutex, MutexGuard};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::io::AsyncWriteExt;
use tracing::debug;

use grove_core::error::Result;
use grove_core::skill::SkillResult;
use grove_core::types::SelectionMethod;

const SUMMARY_LIMIT: usize = 200;

/// One completed query. Immutable once appended.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HistoryRecord {
    pub query: String,
    pub branch: Option<String>,
    pub leaf: Option<String>,
    pub outcome: SkillResult,
    pub success: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub selection: Option<SelectionMethod>,
    /// Completion time.
    pub timestamp: DateTime<Utc>,
}

impl HistoryRecord {
    pub fn new(
        query: impl Into<String>,
        branch: Option<String>,
        leaf: Option<String>,
        outcome: SkillResult,
        selection: Option<SelectionMethod>,
    ) -> Self {
        Self {
            query: query.into(),
            branch,
            leaf,
            success: outcome.is_success(),
            outcome,
            selection,
            timestamp: Utc::now(),
        }
    }
}

/// Flattened record for external consumers.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HistoryExport {
    pub query: String,
    pub branch: Option<String>,
    pub leaf: Option<String>,
    pub success: bool,
    pub timestamp: DateTime<Utc>,
    pub result_summary: String,
}

impl From<&HistoryRecord> for HistoryExport {
    fn from(record: &HistoryRecord) -> Self {
        let full = match &record.outcome {
            SkillResult::Success(value) => match value {
                serde_json::Value::String(s) => s.clone(),
                other => other.to_string(),
            },
            SkillResult::Failure(message) => message.clone(),
        };
        Self {
            query: record.query.clone(),
            branch: record.branch.clone(),
            leaf: record.leaf.clone(),
            success: record.success,
            timestamp: record.timestamp,
            result_summary: summarize(&full),
        }
    }
}

fn summarize(text: &str) -> String {
    match text.char_indices().nth(SUMMARY_LIMIT) {
        Some((cut, _)) => text[..cut].to_string(),
        None => text.to_string(),
    }
}

/// Append-only, completion-ordered execution history.
///
/// Retention is the caller's business: see [`clear`](Self::clear) and
/// [`truncate_to`](Self::truncate_to).
#[derive(Debug, Default)]
pub struct HistoryLog {
    state: Mutex<LogState>,
    // Serializes `write_jsonl` so concurrent flushes never repeat a record.
    flush: tokio::sync::Mutex<()>,
}

#[derive(Debug, Default)]
struct LogState {
    records: Vec<HistoryRecord>,
    /// Records ever appended; `records[0]` has sequence `appended - records.len()`.
    appended: u64,
    /// Sequence of the first record not yet written by `write_jsonl`.
    written: u64,
}

impl LogState {
    fn first_seq(&self) -> u64 {
        self.appended - self.records.len() as u64
    }
}

impl HistoryLog {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, LogState> {
        // Each push is a single operation, so a poisoned lock still holds whole records.
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }

    pub fn append(&self, record: HistoryRecord) {
        let mut state = self.lock();
        state.records.push(record);
        state.appended += 1;
    }

    /// The last `limit` records, oldest first.
    pub fn recent(&self, limit: usize) -> Vec<HistoryRecord> {
        let state = self.lock();
        let start = state.records.len().saturating_sub(limit);
        state.records[start..].to_vec()
    }

    pub fn all(&self) -> Vec<HistoryRecord> {
        self.lock().records.clone()
    }

    pub fn len(&self) -> usize {
        self.lock().records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.lock().records.is_empty()
    }

    pub fn clear(&self) {
        self.lock().records.clear();
    }

    /// Keep only the `n` most recent records.
    pub fn truncate_to(&self, n: usize) {
        let mut state = self.lock();
        let excess = state.records.len().saturating_sub(n);
        state.records.drain(..excess);
    }

    pub fn export(&self) -> Vec<HistoryExport> {
        self.lock().records.iter().map(HistoryExport::from).collect()
    }

    /// Append the records not yet written by an earlier call to `path` as
    /// JSON lines. Returns how many lines were written.
    ///
    /// Records dropped by `clear` or `truncate_to` before being written are
    /// never written.
    pub async fn write_jsonl(&self, path: &Path) -> Result<usize> {
        let _flush = self.flush.lock().await;

        let (pending, end) = {
            let state = self.lock();
            let skip = state.written.saturating_sub(state.first_seq()) as usize;
            let pending: Vec<HistoryExport> = state
                .records
                .iter()
                .skip(skip)
                .map(HistoryExport::from)
                .collect();
            (pending, state.appended)
        };
        if pending.is_empty() {
            return Ok(0);
        }

        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                tokio::fs::create_dir_all(parent).await?;
            }
        }

        let file = tokio::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(path)
            .await?;
        let mut writer = tokio::io::BufWriter::new(file);
        for entry in &pending {
            let line = format!("{}\n", serde_json::to_string(entry)?);
            writer.write_all(line.as_bytes()).await?;
        }
        writer.flush().await?;

        self.lock().written = end;
        debug!(path = %path.display(), records = pending.len(), "History written");
        Ok(pending.len())
    }
}
