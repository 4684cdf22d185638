//! Initialize a new dbvc repository.

use anyhow::{Context, Result};
use dbvc_core::DbvcRepo;

/// Initialize a new dbvc repository in the current directory.
pub fn run() -> Result<()> {
    let repo = DbvcRepo::init(".").context("Failed to initialize dbvc repository")?;

    println!("Initialized dbvc repository in .dbvc/");
    println!();
    println!("Directory structure:");
    println!("  .dbvc/objects/      - Commits and snapshots (content-addressed)");
    println!("  .dbvc/refs/heads/   - Branches");
    println!("  .dbvc/refs/tags/    - Tags");
    println!("  .dbvc/stash/        - Stashed change sets");
    println!("  .dbvc/logs/         - Reflog");
    println!();
    println!("Configuration written to .dbvc/config.toml");
    println!("Current branch: {}", repo.current_branch());

    Ok(())
}
