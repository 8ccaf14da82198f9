// Library interface for fixturegen
// This allows integration tests and external code to use fixturegen's modules

pub mod cli_utils;
pub mod config;
pub mod config_discovery;
pub mod error;
pub mod graph;
pub mod logging;
pub mod postprocess;
pub mod report;
pub mod resource;
pub mod script;
pub mod storage;
pub mod workspace;

// Re-export commonly used types
pub use config::{FixtureConfig, Project};
pub use error::{Error, Result};
pub use graph::{Action, FailurePolicy, RunContext, RunOptions, TaskGraph};
pub use postprocess::{Edit, PostProcessStep};
pub use report::{RunReport, TaskStatus};
pub use resource::{DirectoryProvider, MemoryProvider, ResourceCache, ResourceSet};
pub use script::GenerationTask;
pub use workspace::{Bootstrap, Workspace};
