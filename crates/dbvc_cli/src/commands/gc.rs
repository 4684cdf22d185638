//! Garbage collection command.

use super::open_repo;
use anyhow::Result;
use console::style;
use dbvc_core::{GcConfig, GcProgress};
use indicatif::{ProgressBar, ProgressStyle};
use std::io::{self, Write};
use std::time::Duration;

/// Run garbage collection.
pub fn run(dry_run: bool, aggressive: bool, grace_days: Option<u32>, yes: bool) -> Result<()> {
    let mut repo = open_repo()?;
    let grace = match grace_days {
        Some(days) => days,
        None => repo.config()?.core.gc_grace_period_days,
    };
    let config = GcConfig {
        dry_run,
        grace_period_days: Some(grace),
        aggressive,
    };

    if dry_run {
        println!(
            "{} Running GC in dry-run mode (no objects will be deleted)...",
            style("→").cyan()
        );
    } else if !yes {
        println!(
            "{} {}",
            style("⚠").yellow().bold(),
            style("WARNING:").yellow().bold()
        );
        println!("  Garbage collection permanently deletes unreachable commits and snapshots.");
        if aggressive {
            println!(
                "  {} mode: no grace period, every unreachable object goes.",
                style("Aggressive").red()
            );
        } else {
            println!("  Grace period: {} day(s)", grace);
        }
        println!(
            "  {} Run with {} first to see what would be deleted.",
            style("Tip:").cyan(),
            style("--dry-run").cyan()
        );
        println!();

        print!("Continue with garbage collection? [y/N]: ");
        io::stdout().flush()?;
        let mut input = String::new();
        io::stdin().read_line(&mut input)?;
        if !input.trim().eq_ignore_ascii_case("y") {
            println!("{} Garbage collection cancelled.", style("✓").green());
            return Ok(());
        }
    }

    let pb = ProgressBar::new_spinner();
    pb.set_style(ProgressStyle::default_spinner().template("{spinner:.green} {msg}")?);
    pb.enable_steady_tick(Duration::from_millis(100));
    let progress_pb = pb.clone();
    let report = repo.gc_with_progress(&config, &move |event| match event {
        GcProgress::Marking { commits } => {
            progress_pb.set_message(format!("Marking: {} reachable commit(s)", commits))
        }
        GcProgress::Sweeping { keep } => {
            progress_pb.set_message(format!("Sweeping: keeping {} object(s)", keep))
        }
        GcProgress::Done { deleted } => progress_pb.set_message(format!("Done: {} deleted", deleted)),
    })?;
    pb.finish_and_clear();

    println!("{}", style("Garbage Collection Report:").bold());
    println!("  Reachable commits:   {}", style(report.reachable_commits).green());
    println!("  Reachable snapshots: {}", style(report.reachable_snapshots).green());
    println!("  Objects scanned:     {}", style(report.objects_scanned).cyan());
    println!(
        "  Objects deleted:     {}",
        if report.objects_deleted > 0 {
            style(report.objects_deleted).yellow()
        } else {
            style(report.objects_deleted).green()
        }
    );
    println!(
        "  Bytes freed:         {} ({:.2} MB)",
        style(report.bytes_freed).cyan(),
        report.bytes_freed as f64 / 1_048_576.0
    );

    if !report.errors.is_empty() {
        println!();
        println!("{}", style("Errors encountered:").red().bold());
        for error in &report.errors {
            println!("  {} {}", style("×").red(), error);
        }
    }

    if dry_run && report.objects_deleted > 0 {
        println!();
        println!("This was a dry run. To actually delete objects, run:");
        println!("  {}", style("dbvc gc").cyan());
    }
    Ok(())
}
