//! `fixturegen all` command implementation

use anyhow::{Context, Result};
use std::path::Path;

use fixturegen::config_discovery::load_project;

use crate::cli::AllArgs;

pub fn run(args: &AllArgs, config: Option<&Path>) -> Result<()> {
    let project = load_project(config)?;
    let plan = project
        .graph
        .plan_all()
        .context("Failed to plan tasks")?;

    super::run::execute(&project, &plan, &args.execution)
}
