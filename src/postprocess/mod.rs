//! Post-processing of generated fixtures
//!
//! A step reads one produced file, applies its edits in order and writes the
//! derived file. Steps correct metadata that scripts cannot control, such as
//! renamed paths or hand-adjusted revision numbers.

pub mod edit;

pub use edit::{edit_line, substitute, Occurrence};

use std::fs;
use std::path::PathBuf;

use tracing::info;

use crate::error::{Error, Result};
use crate::logging::{operations, status};
use crate::script::executor::digest_file;
use crate::storage::write_atomic;

/// One transformation applied by a [`PostProcessStep`]
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Edit {
    Substitute {
        pattern: String,
        replacement: String,
        occurrence: Occurrence,
        strict: bool,
    },
    EditLine {
        line: usize,
        old: String,
        new: String,
    },
}

impl Edit {
    pub fn apply(&self, input: &[u8]) -> Result<Vec<u8>> {
        match self {
            Edit::Substitute {
                pattern,
                replacement,
                occurrence,
                strict,
            } => substitute(input, pattern, replacement, *occurrence, *strict),
            Edit::EditLine { line, old, new } => edit_line(input, *line, old, new),
        }
    }

    /// Reject edits that can never apply, before anything runs
    pub fn validate(&self) -> Result<()> {
        match self {
            Edit::Substitute { pattern, .. } => edit::compile(pattern).map(|_| ()),
            Edit::EditLine { line: 0, .. } => Err(Error::LineOutOfRange { line: 0, lines: 0 }),
            Edit::EditLine { old, line, .. } if old.is_empty() => Err(Error::SubstringNotFound {
                line: *line,
                needle: String::new(),
            }),
            Edit::EditLine { .. } => Ok(()),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PostProcessStep {
    pub id: String,
    pub input: PathBuf,
    pub output: PathBuf,
    pub edits: Vec<Edit>,
}

/// Result of a post-processing step
#[derive(Debug, Clone)]
pub struct PostProcessResult {
    pub output_bytes: u64,
    pub output_sha256: String,
}

impl PostProcessStep {
    pub fn new(id: impl Into<String>, input: impl Into<PathBuf>, output: impl Into<PathBuf>) -> Self {
        Self {
            id: id.into(),
            input: input.into(),
            output: output.into(),
            edits: Vec::new(),
        }
    }

    pub fn with_edit(mut self, edit: Edit) -> Self {
        self.edits.push(edit);
        self
    }

    /// Apply all edits to the input bytes
    pub fn transform(&self, input: &[u8]) -> Result<Vec<u8>> {
        let mut bytes = input.to_vec();
        for edit in &self.edits {
            bytes = edit.apply(&bytes)?;
        }
        Ok(bytes)
    }

    /// Read the input file, transform it and write the output file
    ///
    /// Nothing is written when any edit fails.
    pub fn execute(&self) -> Result<PostProcessResult> {
        let input = fs::read(&self.input).map_err(|e| Error::io(&self.input, e))?;
        let output = self.transform(&input)?;
        write_atomic(&self.output, &output)?;

        let (output_bytes, output_sha256) = digest_file(&self.output)?;

        info!(
            task = %self.id,
            operation = operations::POST_PROCESS,
            status = status::SUCCESS,
            path = %self.output.display(),
            edits = self.edits.len(),
            size_bytes = output_bytes,
            "fixture post-processed"
        );

        Ok(PostProcessResult {
            output_bytes,
            output_sha256,
        })
    }
}
