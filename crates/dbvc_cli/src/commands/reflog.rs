//! Reflog command.

use super::{format_time, open_repo};
use anyhow::Result;
use console::style;
use dbvc_core::ReflogQuery;

/// Show ref movements, most recent first.
pub fn run(ref_name: Option<String>, max_count: Option<usize>) -> Result<()> {
    let repo = open_repo()?;
    let entries = repo.get_reflog(&ReflogQuery {
        ref_name,
        max_count,
        ..Default::default()
    })?;

    for entry in entries {
        let target = entry
            .new_commit_id
            .map(|id| id.short())
            .unwrap_or_else(|| "-".repeat(7));
        println!(
            "{} {} {}: {}  {}",
            style(target).yellow(),
            style(&entry.ref_name).cyan(),
            entry.action,
            entry.message,
            style(format!("({}, {})", entry.author, format_time(entry.timestamp))).dim()
        );
    }
    Ok(())
}
