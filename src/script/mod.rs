//! Script execution module
//!
//! Runs fixture scripts through an interpreter with their helper resources
//! materialized alongside, capturing stdout into the fixture file.

pub mod executor;
pub mod task;

pub use executor::{ExecutionResult, Invocation, ScriptExecutor};
pub use task::{GenerationTask, DEFAULT_INTERPRETER};
