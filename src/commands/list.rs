//! `fixturegen list` command implementation

use anyhow::{Context, Result};
use std::path::Path;

use fixturegen::config_discovery::load_project;
use fixturegen::graph::Action;

use crate::cli::ListArgs;

pub fn run(args: &ListArgs, config: Option<&Path>) -> Result<()> {
    let project = load_project(config)?;

    if args.resources {
        let names = project
            .resources
            .names()
            .context("Failed to list resources")?;
        for name in names {
            println!("{}", name);
        }
        return Ok(());
    }

    let plan = project.graph.plan_all()?;
    for id in plan.ids() {
        let Some(action) = project.graph.get(id) else {
            continue;
        };
        let detail = match action {
            Action::Bootstrap { workspace, .. } => format!("{:?}", workspace.bootstrap),
            Action::Generate(task) => task.script.clone(),
            Action::PostProcess(step) => format!("{} edit(s)", step.edits.len()),
        };
        let output = action
            .output()
            .and_then(|p| p.strip_prefix(&project.root).ok().or(Some(p)))
            .map(|p| p.display().to_string())
            .unwrap_or_default();
        println!("{:<40} {:<12} {:<32} {}", id, action.kind(), detail, output);
    }

    Ok(())
}
