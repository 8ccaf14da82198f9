use std::path::PathBuf;
use std::time::Duration;
use thiserror::Error;

/// Errors produced while planning or generating fixtures
#[derive(Error, Debug)]
pub enum Error {
    #[error("Resource not found: {name} (searched: {})", .searched.join(", "))]
    ResourceNotFound { name: String, searched: Vec<String> },

    #[error("Invalid resource name: {0}")]
    InvalidResourceName(String),

    #[error("Task already registered: {0}")]
    DuplicateTask(String),

    #[error("Unknown task: {0}")]
    UnknownTask(String),

    #[error("Cycle detected: {}", .path.join(" -> "))]
    CycleDetected { path: Vec<String> },

    #[error("Process exited with {}{}", exit_label(.code), stderr_suffix(.stderr))]
    ProcessFailed { code: Option<i32>, stderr: String },

    #[error("Process timed out after {}s{}", .after.as_secs_f64(), stderr_suffix(.stderr))]
    TimedOut { after: Duration, stderr: String },

    #[error("Failed to spawn {program}: {source}")]
    Spawn {
        program: String,
        #[source]
        source: std::io::Error,
    },

    #[error("Pattern not found: {0}")]
    PatternNotFound(String),

    #[error("Invalid pattern {pattern}: {source}")]
    InvalidPattern {
        pattern: String,
        #[source]
        source: regex::Error,
    },

    #[error("Line {line} out of range (input has {lines} lines)")]
    LineOutOfRange { line: usize, lines: usize },

    #[error("Substring {needle:?} not found on line {line}")]
    SubstringNotFound { line: usize, needle: String },

    #[error("I/O error on {}: {source}", .path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Workspace bootstrap failed for {}: {reason}", .path.display())]
    Bootstrap { path: PathBuf, reason: String },

    #[error("Cancelled")]
    Cancelled,

    #[error("Task {id} failed: {source}")]
    Task {
        id: String,
        #[source]
        source: Box<Error>,
    },
}

pub type Result<T> = std::result::Result<T, Error>;

impl Error {
    pub(crate) fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Error::Io {
            path: path.into(),
            source,
        }
    }

    /// Attach the id of the node that produced this error
    pub fn in_task(self, id: &str) -> Self {
        match self {
            already @ Error::Task { .. } => already,
            other => Error::Task {
                id: id.to_string(),
                source: Box::new(other),
            },
        }
    }

    /// The innermost error, skipping task wrappers
    pub fn root(&self) -> &Error {
        match self {
            Error::Task { source, .. } => source.root(),
            other => other,
        }
    }
}

fn exit_label(code: &Option<i32>) -> String {
    match code {
        Some(code) => format!("exit code {}", code),
        None => "termination by signal".to_string(),
    }
}

fn stderr_suffix(stderr: &str) -> String {
    let trimmed = stderr.trim_end();
    if trimmed.is_empty() {
        String::new()
    } else {
        format!("\n--- stderr ---\n{}", trimmed)
    }
}
