use anyhow::{bail, Context, Result};
use std::fs;

use fixturegen::cli_utils::fixturegen_prefix;
use fixturegen::config::{FixtureConfig, MANIFEST_FILE};

use crate::cli::InitArgs;

pub fn run(args: &InitArgs) -> Result<()> {
    let path = args.path.join(MANIFEST_FILE);

    if path.exists() && !args.force {
        bail!(
            "{} already exists (use --force to overwrite)",
            path.display()
        );
    }

    fs::create_dir_all(&args.path)
        .with_context(|| format!("Failed to create {}", args.path.display()))?;
    fs::write(&path, FixtureConfig::example())
        .with_context(|| format!("Failed to write {}", path.display()))?;

    eprintln!("{} Created {}", fixturegen_prefix(), path.display());
    eprintln!();
    eprintln!("Next steps:");
    eprintln!("   1. Put your scripts under scripts/ (e.g. scripts/bash/empty.sh)");
    eprintln!("   2. Check the execution order:");
    eprintln!("      fixturegen plan");
    eprintln!("   3. Generate every fixture:");
    eprintln!("      fixturegen all");

    Ok(())
}
