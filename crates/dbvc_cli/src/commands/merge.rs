//! Merge, cherry-pick, rebase and reset.

use super::{open_repo, resolve_or_head, write_snapshot};
use anyhow::{bail, Result};
use console::style;
use dbvc_core::{
    CherryPickOptions, DbvcRepo, MergeConflict, MergeKind, MergeOptions, MergeStrategy, RebaseOptions,
};
use std::path::Path;

/// Merge a branch into the current branch.
pub fn merge(
    branch: &str,
    strategy: Option<MergeStrategy>,
    no_ff: bool,
    allow_conflicts: bool,
    message: Option<String>,
    output: Option<&Path>,
) -> Result<()> {
    let mut repo = open_repo()?;
    let options = MergeOptions {
        strategy,
        no_fast_forward: no_ff.then_some(true),
        allow_conflicts,
        message,
        author: None,
    };
    let result = repo.merge(branch, &options)?;

    print_conflicts(&result.conflicts);
    if !result.success {
        bail!(
            "Merge of '{}' stopped with {} unresolved conflict(s); nothing was committed",
            branch,
            result.conflicts.len()
        );
    }

    match (result.kind, result.commit_id) {
        (MergeKind::UpToDate, _) => println!("{} Already up to date.", style("✓").green()),
        (MergeKind::FastForward, Some(id)) => {
            println!("{} Fast-forward to {}", style("✓").green(), style(id.short()).yellow())
        }
        (_, Some(id)) => println!(
            "{} Merge made by the '{}' strategy: {}",
            style("✓").green(),
            strategy_name(&repo, strategy)?,
            style(id.short()).yellow()
        ),
        (_, None) => {}
    }

    if let (Some(snapshot), Some(path)) = (result.snapshot.as_ref(), output) {
        write_snapshot(snapshot, Some(path))?;
    }
    Ok(())
}

/// Replay one commit onto the current branch.
pub fn cherry_pick(rev: &str, strategy: Option<MergeStrategy>, no_commit: bool) -> Result<()> {
    let mut repo = open_repo()?;
    let id = resolve_or_head(&repo, Some(rev))?;
    let result = repo.cherry_pick(
        id,
        &CherryPickOptions {
            strategy,
            no_commit,
        },
    )?;

    print_conflicts(&result.conflicts);
    if !result.success {
        bail!("Cherry-pick of {} stopped with conflicts", id.short());
    }
    match result.commit_id {
        Some(new_id) => println!(
            "{} Picked {} as {}",
            style("✓").green(),
            id.short(),
            style(new_id.short()).yellow()
        ),
        None => {
            println!("{} Picked {} without committing", style("✓").green(), id.short());
            if let Some(snapshot) = &result.snapshot {
                write_snapshot(snapshot, None)?;
            }
        }
    }
    Ok(())
}

/// Replay the current branch onto `upstream`.
pub fn rebase(upstream: &str, strategy: Option<MergeStrategy>) -> Result<()> {
    let mut repo = open_repo()?;
    let result = repo.rebase(
        upstream,
        &RebaseOptions { strategy },
    )?;

    for id in &result.skipped {
        println!("{} Skipped merge commit {}", style("→").cyan(), id.short());
    }
    if !result.success {
        print_conflicts(&result.conflicts);
        let failed = result.failed_commit.map(|id| id.short()).unwrap_or_default();
        bail!(
            "Rebase stopped at {} after {} commit(s); run 'dbvc reset {}' to abort",
            failed,
            result.applied.len(),
            result.original_head.as_hex()
        );
    }

    if result.new_head == result.original_head {
        println!("{} Current branch is up to date.", style("✓").green());
    } else {
        println!(
            "{} Rebased {} commit(s) onto {}; head is now {}",
            style("✓").green(),
            result.applied.len(),
            upstream,
            style(result.new_head.short()).yellow()
        );
    }
    Ok(())
}

/// Point the current branch at another commit.
pub fn reset(rev: &str) -> Result<()> {
    let mut repo = open_repo()?;
    let id = resolve_or_head(&repo, Some(rev))?;
    repo.reset(id)?;
    println!(
        "{} {} is now at {}",
        style("✓").green(),
        repo.current_branch(),
        style(id.short()).yellow()
    );
    Ok(())
}

fn print_conflicts(conflicts: &[MergeConflict]) {
    if conflicts.is_empty() {
        return;
    }
    println!("{}", style("Conflicts:").bold());
    for conflict in conflicts {
        let marker = if conflict.resolved {
            style("✓").green()
        } else {
            style("×").red()
        };
        println!("  {} {}", marker, conflict);
    }
}

fn strategy_name(repo: &DbvcRepo, strategy: Option<MergeStrategy>) -> Result<&'static str> {
    let strategy = match strategy {
        Some(s) => s,
        None => repo.config()?.merge.unwrap_or_default().strategy,
    };
    Ok(match strategy {
        MergeStrategy::Recursive => "recursive",
        MergeStrategy::Ours => "ours",
        MergeStrategy::Theirs => "theirs",
    })
}
