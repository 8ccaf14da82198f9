//! `fixturegen run` command implementation
//!
//! Generates the named fixtures, with their dependency closure unless
//! `--only` is given.

use anyhow::{bail, Context, Result};
use std::path::Path;
use std::sync::Arc;

use fixturegen::cli_utils::fixturegen_prefix;
use fixturegen::config::Project;
use fixturegen::config_discovery::load_project;
use fixturegen::graph::{FailurePolicy, Plan, RunContext, RunOptions};
use fixturegen::report::TaskStatus;

use crate::cli::{ExecutionArgs, RunArgs};
use crate::signal_handler::Interrupts;

pub fn run(args: &RunArgs, config: Option<&Path>) -> Result<()> {
    let project = load_project(config)?;

    let mut ids: Vec<String> = Vec::new();
    for name in &args.ids {
        for id in project.resolve(name)? {
            if !ids.contains(&id) {
                ids.push(id);
            }
        }
    }

    let plan = project
        .graph
        .plan(&ids, !args.only)
        .context("Failed to plan tasks")?;

    execute(&project, &plan, &args.execution)
}

/// Run a plan and report the outcome on stderr
pub fn execute(project: &Project, plan: &Plan, args: &ExecutionArgs) -> Result<()> {
    let jobs = args
        .jobs
        .or(project.jobs)
        .unwrap_or_else(num_cpus::get)
        .max(1);
    let policy = if args.keep_going {
        FailurePolicy::KeepGoing
    } else {
        FailurePolicy::FailFast
    };
    let interrupts = Interrupts::install()?;
    let options = RunOptions::default()
        .with_jobs(jobs)
        .with_policy(policy)
        .with_cancel(interrupts.token());
    let ctx = RunContext::new(Arc::clone(&project.resources));

    let report = project.graph.execute_plan(plan, &ctx, &options);

    if let Some(path) = &args.report {
        report
            .write_json(path)
            .with_context(|| format!("Failed to write run report: {}", path.display()))?;
    }

    let prefix = fixturegen_prefix();
    for error in report.errors() {
        eprintln!("{} {}", prefix, error);
    }
    for task in &report.tasks {
        if let Some(because) = &task.skipped_because {
            eprintln!("{} {} skipped (depends on {})", prefix, task.id, because);
        }
    }
    eprintln!("{} {}", prefix, report.summary());

    if let Some(code) = interrupts.exit_code() {
        eprintln!("{} Interrupted", prefix);
        std::process::exit(code);
    }

    if !report.is_success() {
        let failed: Vec<&str> = report
            .tasks
            .iter()
            .filter(|t| t.status == TaskStatus::Failed)
            .map(|t| t.id.as_str())
            .collect();
        if failed.is_empty() {
            bail!("Run stopped before all tasks completed");
        }
        bail!("Failed tasks: {}", failed.join(", "));
    }

    Ok(())
}
