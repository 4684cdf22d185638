//! History inspection: log and show.

use super::{format_time, open_repo, resolve_or_head, write_snapshot};
use anyhow::Result;
use console::style;
use dbvc_core::{Commit, DbvcRepo, LogOptions};
use std::collections::HashMap;

/// Show first-parent history.
pub fn log(rev: Option<String>, max_count: Option<usize>, author: Option<String>, oneline: bool) -> Result<()> {
    let repo = open_repo()?;
    let commits = repo.log(&LogOptions {
        from: rev,
        author,
        max_count,
        ..Default::default()
    })?;

    if commits.is_empty() {
        println!("No commits yet on {}", repo.current_branch());
        return Ok(());
    }

    let decorations = decorations(&repo)?;
    for commit in &commits {
        let decoration = decorations
            .get(&commit.id.as_hex())
            .map(|names| format!(" ({})", names.join(", ")))
            .unwrap_or_default();
        if oneline {
            println!(
                "{}{} {}",
                style(commit.id.short()).yellow(),
                style(decoration).cyan(),
                commit.summary()
            );
        } else {
            print_commit(commit, &decoration);
        }
    }

    Ok(())
}

/// Show one commit with its changes, or its snapshot document.
pub fn show(rev: Option<&str>, snapshot: bool) -> Result<()> {
    let repo = open_repo()?;
    let id = resolve_or_head(&repo, rev)?;

    if snapshot {
        return write_snapshot(&repo.snapshot_at(id)?, None);
    }

    let commit = repo.get_commit(id)?;
    print_commit(&commit, "");
    if commit.changes.is_empty() {
        println!("    (no changes)");
    }
    for change in &commit.changes {
        let op = change.operation();
        let line = format!("{}{} {}: {}", op.patch_prefix(), op, change.target(), change.description());
        match op.patch_prefix() {
            '+' => println!("{}", style(line).green()),
            '-' => println!("{}", style(line).red()),
            _ => println!("{}", line),
        }
        for detail in change.detail_lines() {
            println!("    {}", style(detail).dim());
        }
    }

    Ok(())
}

fn print_commit(commit: &Commit, decoration: &str) {
    println!(
        "{}{}",
        style(format!("commit {}", commit.id.as_hex())).yellow(),
        style(decoration).cyan()
    );
    if commit.is_merge() {
        let parents: Vec<String> = commit.parent_ids.iter().map(|p| p.short()).collect();
        println!("Merge:  {}", parents.join(" "));
    }
    println!("Author: {}", commit.author.key());
    println!("Date:   {}", format_time(commit.timestamp));
    println!();
    for line in commit.message.lines() {
        println!("    {}", line);
    }
    println!();
}

/// Branch and tag names per commit id, `HEAD -> ` marking the current
/// branch.
fn decorations(repo: &DbvcRepo) -> Result<HashMap<String, Vec<String>>> {
    let mut names: HashMap<String, Vec<String>> = HashMap::new();
    for branch in repo.list_branches()? {
        if let Some(id) = branch.commit_id {
            let label = if branch.name == repo.current_branch() {
                format!("HEAD -> {}", branch.name)
            } else {
                branch.name
            };
            names.entry(id.as_hex()).or_default().push(label);
        }
    }
    for tag in repo.list_tags(None)? {
        names
            .entry(tag.commit_id.as_hex())
            .or_default()
            .push(format!("tag: {}", tag.name));
    }
    Ok(names)
}
