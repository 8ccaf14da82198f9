//! Generation tasks
//!
//! A generation task materializes its dependencies and its script into the
//! resource cache, runs the script in the working directory and captures
//! stdout into the fixture file.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use tracing::{info, warn};

use super::executor::{ExecutionResult, Invocation, ScriptExecutor};
use crate::error::Result;
use crate::logging::{operations, status};
use crate::resource::{ResourceCache, ResourceSet};

/// Interpreter used when a task does not name one
pub const DEFAULT_INTERPRETER: &str = "bash";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GenerationTask {
    pub id: String,
    pub script: String,
    /// Resource names materialized next to the script, in order
    pub dependencies: Vec<String>,
    pub args: Vec<String>,
    pub work_dir: PathBuf,
    pub cache_dir: PathBuf,
    pub output: PathBuf,
    pub interpreter: String,
    pub timeout: Option<Duration>,
    /// Reminder logged every time the task runs
    pub note: Option<String>,
}

impl GenerationTask {
    pub fn new(
        id: impl Into<String>,
        script: impl Into<String>,
        work_dir: impl Into<PathBuf>,
        cache_dir: impl Into<PathBuf>,
        output: impl Into<PathBuf>,
    ) -> Self {
        Self {
            id: id.into(),
            script: script.into(),
            dependencies: Vec::new(),
            args: Vec::new(),
            work_dir: work_dir.into(),
            cache_dir: cache_dir.into(),
            output: output.into(),
            interpreter: DEFAULT_INTERPRETER.to_string(),
            timeout: None,
            note: None,
        }
    }

    pub fn with_dependencies<I, S>(mut self, deps: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.dependencies = deps.into_iter().map(Into::into).collect();
        self
    }

    pub fn with_args<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.args = args.into_iter().map(Into::into).collect();
        self
    }

    pub fn with_interpreter(mut self, interpreter: impl Into<String>) -> Self {
        self.interpreter = interpreter.into();
        self
    }

    pub fn with_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn with_note(mut self, note: impl Into<String>) -> Self {
        self.note = Some(note.into());
        self
    }

    /// Materialize everything the script needs and run it
    ///
    /// A missing dependency or script fails before anything is spawned, and
    /// `output` is left untouched on every failure.
    pub fn execute(
        &self,
        resources: &Arc<ResourceSet>,
        executor: &ScriptExecutor,
    ) -> Result<ExecutionResult> {
        if let Some(note) = &self.note {
            warn!(task = %self.id, "{}", note);
        }

        let cache = ResourceCache::new(Arc::clone(resources), &self.cache_dir);

        for dep in &self.dependencies {
            cache.materialize(dep)?;
        }
        let script = cache.materialize(&self.script)?;

        let invocation = Invocation {
            interpreter: self.interpreter.clone(),
            script,
            args: self.args.clone(),
            current_dir: self.work_dir.clone(),
            env: vec![
                ("FIXTUREGEN_TASK".to_string(), self.id.clone()),
                (
                    "FIXTUREGEN_CACHE_DIR".to_string(),
                    cache.cache_dir().display().to_string(),
                ),
            ],
            timeout: self.timeout,
        };

        let result = executor.execute(&invocation, &self.output)?;

        info!(
            task = %self.id,
            operation = operations::EXECUTE,
            status = status::SUCCESS,
            path = %self.output.display(),
            size_bytes = result.output_bytes,
            duration_ms = result.duration.as_millis() as u64,
            "fixture generated"
        );

        Ok(result)
    }
}
