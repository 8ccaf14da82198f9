//! Run reports
//!
//! A [`RunReport`] records what happened to every planned node. It is printed
//! as a summary by the CLI and can be written as JSON for CI artifacts.

use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use serde::Serialize;

use crate::error::{Error, Result};
use crate::storage::write_atomic;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskStatus {
    Succeeded,
    Failed,
    Skipped,
    NotStarted,
}

impl TaskStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            TaskStatus::Succeeded => "succeeded",
            TaskStatus::Failed => "failed",
            TaskStatus::Skipped => "skipped",
            TaskStatus::NotStarted => "not_started",
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct TaskReport {
    pub id: String,
    pub kind: &'static str,
    pub status: TaskStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub duration_ms: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub output: Option<PathBuf>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub output_bytes: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub output_sha256: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub exit_code: Option<i32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub skipped_because: Option<String>,
}

impl TaskReport {
    pub fn new(id: impl Into<String>, kind: &'static str) -> Self {
        Self {
            id: id.into(),
            kind,
            status: TaskStatus::NotStarted,
            duration_ms: None,
            output: None,
            output_bytes: None,
            output_sha256: None,
            exit_code: None,
            error: None,
            skipped_because: None,
        }
    }
}

#[derive(Debug, Serialize)]
pub struct RunReport {
    pub started_at: DateTime<Utc>,
    pub finished_at: Option<DateTime<Utc>>,
    pub duration_ms: u64,
    pub tasks: Vec<TaskReport>,
    #[serde(skip)]
    errors: Vec<Error>,
}

impl RunReport {
    pub fn new(started_at: DateTime<Utc>) -> Self {
        Self {
            started_at,
            finished_at: None,
            duration_ms: 0,
            tasks: Vec::new(),
            errors: Vec::new(),
        }
    }

    pub fn push(&mut self, entry: TaskReport) {
        self.tasks.push(entry);
    }

    pub fn push_error(&mut self, error: Error) {
        self.errors.push(error);
    }

    pub fn finish(&mut self) {
        let now = Utc::now();
        self.duration_ms = (now - self.started_at).num_milliseconds().max(0) as u64;
        self.finished_at = Some(now);
    }

    /// True when every planned node succeeded
    pub fn is_success(&self) -> bool {
        self.tasks
            .iter()
            .all(|t| t.status == TaskStatus::Succeeded)
    }

    pub fn status_of(&self, id: &str) -> Option<TaskStatus> {
        self.tasks.iter().find(|t| t.id == id).map(|t| t.status)
    }

    pub fn count(&self, status: TaskStatus) -> usize {
        self.tasks.iter().filter(|t| t.status == status).count()
    }

    pub fn errors(&self) -> &[Error] {
        &self.errors
    }

    /// One-line summary, e.g. `3 succeeded, 1 failed, 2 skipped in 1.20s`
    pub fn summary(&self) -> String {
        let mut parts = vec![format!("{} succeeded", self.count(TaskStatus::Succeeded))];
        for status in [TaskStatus::Failed, TaskStatus::Skipped, TaskStatus::NotStarted] {
            let count = self.count(status);
            if count > 0 {
                parts.push(format!("{} {}", count, status.as_str().replace('_', " ")));
            }
        }
        format!(
            "{} in {:.2}s",
            parts.join(", "),
            self.duration_ms as f64 / 1000.0
        )
    }

    pub fn write_json(&self, path: &Path) -> Result<()> {
        let json = serde_json::to_vec_pretty(self).map_err(|e| Error::io(path, e.into()))?;
        write_atomic(path, &json)
    }

    /// Turn a failed run into its first error
    ///
    /// A run stopped by cancellation without any node failing yields
    /// [`Error::Cancelled`].
    pub fn into_result(mut self) -> Result<Self> {
        if self.is_success() {
            return Ok(self);
        }
        if self.errors.is_empty() {
            return Err(Error::Cancelled);
        }
        Err(self.errors.remove(0))
    }
}
