//! Commit command for recording snapshots.

use super::{author, open_repo, read_snapshot};
use anyhow::Result;
use console::style;
use std::path::Path;

/// Commit the snapshot document at `snapshot` with changes derived from HEAD.
pub fn run(message: &str, snapshot: &Path, author_arg: Option<&str>) -> Result<()> {
    let mut repo = open_repo()?;
    let author = author(&repo, author_arg)?;
    let snapshot = read_snapshot(snapshot)?;

    let commit = repo.commit_snapshot(message, &author, &snapshot)?;

    println!(
        "[{} {}] {}",
        repo.current_branch(),
        style(commit.id.short()).yellow(),
        commit.summary()
    );
    if commit.changes.is_empty() {
        println!("  (no changes)");
    } else {
        println!("  {} change(s)", commit.changes.len());
    }

    Ok(())
}
