//! Diff, blame and contributor statistics.

use super::{format_time, open_repo, resolve_or_head};
use anyhow::{bail, Result};
use console::style;
use dbvc_core::{diff_snapshots, BlameResult, Change, DatabaseSnapshot};

/// Diff two revisions. With no `from`, diffs `to` against its first parent.
pub fn diff(from: Option<&str>, to: Option<&str>, verbose: bool) -> Result<()> {
    let repo = open_repo()?;
    let to_id = resolve_or_head(&repo, to)?;
    let from_snapshot = match from {
        Some(rev) => repo.snapshot_at(resolve_or_head(&repo, Some(rev))?)?,
        None => match repo.get_commit(to_id)?.first_parent() {
            Some(parent) => repo.snapshot_at(parent)?,
            None => DatabaseSnapshot::empty(),
        },
    };
    let diff = diff_snapshots(&from_snapshot, &repo.snapshot_at(to_id)?);

    if diff.is_empty() {
        println!("No differences");
        return Ok(());
    }
    for change in diff.to_changes() {
        print_change(&change, verbose);
    }

    let summary = diff.summary;
    println!();
    println!(
        "{} table(s) changed, {} insertion(s), {} deletion(s), {} modification(s)",
        summary.tables_changed,
        style(summary.insertions).green(),
        style(summary.deletions).red(),
        style(summary.modifications).yellow()
    );
    Ok(())
}

/// Blame a table, one of its columns, or one of its rows.
pub fn blame(table: &str, column: Option<&str>, row: Option<&str>, rev: Option<&str>) -> Result<()> {
    let repo = open_repo()?;
    let from = Some(resolve_or_head(&repo, rev)?);
    let result = match (column, row) {
        (Some(_), Some(_)) => bail!("Pass either --column or --row, not both"),
        (Some(column), None) => repo.blame_column(table, column, from)?,
        (None, Some(key)) => repo.blame_row(table, key, from)?,
        (None, None) => repo.blame_table(table, from)?,
    };
    print_blame(&result);
    Ok(())
}

/// Commit counts per author over the commits that touched a table.
pub fn contributors(table: &str, column: Option<&str>, rev: Option<&str>) -> Result<()> {
    let repo = open_repo()?;
    let from = Some(resolve_or_head(&repo, rev)?);
    let contributors = repo.contributors(table, column, from)?;
    if contributors.is_empty() {
        println!("No commits touch {}", table);
        return Ok(());
    }
    for c in contributors {
        println!(
            "{:>6}  {}  (first {}, last {})",
            style(c.commits).cyan(),
            c.key(),
            format_time(c.first_commit),
            format_time(c.last_commit)
        );
    }
    Ok(())
}

fn print_change(change: &Change, verbose: bool) {
    let op = change.operation();
    let line = format!("{}{} {}: {}", op.patch_prefix(), op, change.target(), change.description());
    match op.patch_prefix() {
        '+' => println!("{}", style(line).green()),
        '-' => println!("{}", style(line).red()),
        _ => println!("{}", style(line).yellow()),
    }
    if verbose {
        for detail in change.detail_lines() {
            println!("    {}", style(detail).dim());
        }
    }
}

fn print_blame(result: &BlameResult) {
    println!("{} {}", style("Blame:").bold(), result.target);
    if result.lines.is_empty() {
        println!("  No commit touched {}", result.target);
        return;
    }
    for line in &result.lines {
        println!(
            "  {} {} {} ({} day(s) ago)  {}",
            style(line.commit_id.short()).yellow(),
            format_time(line.timestamp),
            line.author,
            line.age_days,
            line.summary
        );
        for change in &line.changes {
            println!("      {}", style(change).dim());
        }
    }
    if let Some(last) = &result.last_modified {
        println!();
        println!(
            "Last modified by {} in {}",
            last.author,
            style(last.commit_id.short()).yellow()
        );
    }
}
