//! `fixturegen plan` command implementation
//!
//! Prints the execution order, one task per line, with what each task waits
//! for. Nothing is executed.

use anyhow::Result;
use std::path::Path;

use fixturegen::config_discovery::load_project;

use crate::cli::PlanArgs;

pub fn run(args: &PlanArgs, config: Option<&Path>) -> Result<()> {
    let project = load_project(config)?;

    let plan = match &args.id {
        Some(name) => project.graph.plan(&project.resolve(name)?, true)?,
        None => project.graph.plan_all()?,
    };

    for (pos, node) in plan.nodes().iter().enumerate() {
        let mut line = format!("{:>3}. {}", pos + 1, node.id);
        if !node.after.is_empty() {
            let after: Vec<&str> = node
                .after
                .iter()
                .map(|&before| plan.nodes()[before].id.as_str())
                .collect();
            line.push_str(&format!("  (after: {})", after.join(", ")));
        }
        if let Some(shared) = node.shares_work_dir_with {
            line.push_str(&format!("  [shares work dir with {}]", plan.nodes()[shared].id));
        }
        println!("{}", line);
    }

    Ok(())
}
