//! Stash commands.

use super::{author, format_time, open_repo, read_snapshot, write_snapshot};
use anyhow::Result;
use console::style;
use dbvc_core::{diff_snapshots, DbvcRepo, Stash};
use std::path::Path;

/// Save a snapshot of uncommitted state.
pub fn push(message: &str, snapshot: &Path, author_arg: Option<&str>) -> Result<()> {
    let mut repo = open_repo()?;
    let author = author(&repo, author_arg)?;
    let snapshot = read_snapshot(snapshot)?;
    let changes = diff_snapshots(&repo.head_snapshot()?, &snapshot).to_changes();
    let count = changes.len();
    let stash = repo.stash_push(message, &author, changes, Some(&snapshot))?;
    println!(
        "{} Saved {} ({} change(s)) on {}",
        style("✓").green(),
        style(&stash.id).yellow(),
        count,
        stash.branch_name
    );
    Ok(())
}

/// Remove the most recent stash and emit its snapshot.
pub fn pop(output: Option<&Path>) -> Result<()> {
    let mut repo = open_repo()?;
    let stash = repo.stash_pop()?;
    eprintln!("Dropped {} ({})", stash.id, stash.message);
    emit(&repo, &stash, output)
}

/// Emit a stash's snapshot without removing it.
pub fn apply(id: Option<&str>, output: Option<&Path>) -> Result<()> {
    let repo = open_repo()?;
    let stash = repo.stash_apply(id)?;
    emit(&repo, &stash, output)
}

/// List stashes, most recent first.
pub fn list() -> Result<()> {
    let repo = open_repo()?;
    let stashes = repo.stash_list()?;
    if stashes.is_empty() {
        println!("No stashes");
    }
    for (i, stash) in stashes.iter().enumerate() {
        println!(
            "stash@{{{}}} {} on {}: {} ({})",
            i,
            style(&stash.id).yellow(),
            stash.branch_name,
            stash.message,
            format_time(stash.created_at)
        );
    }
    Ok(())
}

/// Delete one stash.
pub fn drop(id: &str) -> Result<()> {
    let mut repo = open_repo()?;
    let stash = repo.stash_drop(id)?;
    println!("Dropped {} ({})", stash.id, stash.message);
    Ok(())
}

/// Delete every stash.
pub fn clear() -> Result<()> {
    let mut repo = open_repo()?;
    let removed = repo.stash_clear()?;
    println!("Removed {} stash(es)", removed);
    Ok(())
}

fn emit(repo: &DbvcRepo, stash: &Stash, output: Option<&Path>) -> Result<()> {
    match repo.stash_snapshot(stash)? {
        Some(snapshot) => write_snapshot(&snapshot, output),
        None => {
            for change in &stash.changes {
                println!("{} {}: {}", change.operation(), change.target(), change.description());
            }
            Ok(())
        }
    }
}
