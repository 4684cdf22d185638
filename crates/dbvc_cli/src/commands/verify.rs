//! Repository verification command.

use super::open_repo;
use anyhow::{bail, Result};
use console::style;
use dbvc_core::VerifyConfig;
use indicatif::{ProgressBar, ProgressStyle};
use std::time::Duration;

/// Verify repository integrity. `quick` skips snapshot and id hashing.
pub fn run(quick: bool) -> Result<()> {
    let repo = open_repo()?;
    let config = if quick {
        VerifyConfig {
            check_snapshots: false,
            check_commit_ids: false,
        }
    } else {
        VerifyConfig::default()
    };

    let pb = ProgressBar::new_spinner();
    pb.set_style(ProgressStyle::default_spinner().template("{spinner:.green} {msg}")?);
    pb.set_message(if quick {
        "Verifying references..."
    } else {
        "Verifying objects and references..."
    });
    pb.enable_steady_tick(Duration::from_millis(100));

    let report = repo.verify(&config)?;
    pb.finish_and_clear();

    println!("{}", style("Verification Report:").bold());
    println!("  Commits checked:   {}", style(report.commits_checked).cyan());
    println!("  Snapshots checked: {}", style(report.snapshots_checked).cyan());
    println!("  Branches checked:  {}", style(report.branches_checked).cyan());
    println!("  Tags checked:      {}", style(report.tags_checked).cyan());
    println!();

    if report.has_issues() {
        println!("{}", style("Issues:").red().bold());
        for issue in &report.issues {
            println!("  {} {}", style("×").red(), issue);
        }
        bail!("{}", report.summary());
    }

    println!("{} {}", style("✓").green(), report.summary());
    Ok(())
}
