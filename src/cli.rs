use clap::{Args, Parser, Subcommand};
use std::path::PathBuf;

/// fixturegen - Deterministic test-fixture generation
///
/// fixturegen runs scripts that write fixtures to standard output, in
/// dependency order, against working directories whose state accumulates
/// from one script to the next.
#[derive(Parser, Debug)]
#[command(name = "fixturegen")]
#[command(author = "Fixturegen Team")]
#[command(version = env!("CARGO_PKG_VERSION"))]
#[command(about = "Deterministic test-fixture generation", long_about = None)]
pub struct Cli {
    /// Manifest path, or a directory containing fixturegen.toml
    #[arg(short = 'c', long, global = true, env = "FIXTUREGEN_CONFIG")]
    pub config: Option<PathBuf>,

    /// Verbose output
    #[arg(short, long, global = true)]
    pub verbose: bool,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Generate the named fixtures and everything they depend on
    Run(RunArgs),

    /// Generate every fixture in the manifest
    All(AllArgs),

    /// List scenarios and post-processing steps
    List(ListArgs),

    /// Show the execution order without running anything
    Plan(PlanArgs),

    /// Write an example fixturegen.toml
    Init(InitArgs),
}

/// Options shared by commands that execute the graph
#[derive(Args, Debug, Clone)]
pub struct ExecutionArgs {
    /// Number of tasks to run in parallel (default: number of CPUs)
    #[arg(short, long, env = "FIXTUREGEN_JOBS")]
    pub jobs: Option<usize>,

    /// Keep running tasks that do not depend on a failed one
    #[arg(long)]
    pub keep_going: bool,

    /// Write a JSON run report to this file
    #[arg(long)]
    pub report: Option<PathBuf>,
}

#[derive(Args, Debug)]
pub struct RunArgs {
    /// Task ids; a scenario with variants stands for all of them
    #[arg(required = true)]
    pub ids: Vec<String>,

    /// Run exactly the named tasks, assuming their dependencies are already produced
    #[arg(long)]
    pub only: bool,

    #[command(flatten)]
    pub execution: ExecutionArgs,
}

#[derive(Args, Debug)]
pub struct AllArgs {
    #[command(flatten)]
    pub execution: ExecutionArgs,
}

#[derive(Args, Debug)]
pub struct ListArgs {
    /// List resource names instead of tasks
    #[arg(long)]
    pub resources: bool,
}

#[derive(Args, Debug)]
pub struct PlanArgs {
    /// Only plan this task and its dependencies
    pub id: Option<String>,
}

#[derive(Args, Debug)]
pub struct InitArgs {
    /// Directory to write the manifest into
    #[arg(default_value = ".")]
    pub path: PathBuf,

    /// Overwrite an existing manifest
    #[arg(long)]
    pub force: bool,
}
