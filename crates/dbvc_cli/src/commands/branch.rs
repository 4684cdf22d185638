//! Branch management and checkout.

use super::{open_repo, resolve_or_head, write_snapshot};
use anyhow::Result;
use console::style;
use std::path::Path;

/// List branches, marking the current one.
pub fn list() -> Result<()> {
    let repo = open_repo()?;
    for branch in repo.list_branches()? {
        let marker = if branch.name == repo.current_branch() { "*" } else { " " };
        let target = branch
            .commit_id
            .map(|id| id.short())
            .unwrap_or_else(|| "(no commits)".to_string());
        let mut flags = Vec::new();
        if branch.protected {
            flags.push("protected".to_string());
        }
        if let Some(upstream) = &branch.upstream {
            flags.push(format!("upstream: {}", upstream));
        }
        let flags = if flags.is_empty() {
            String::new()
        } else {
            format!(" [{}]", flags.join(", "))
        };
        if marker == "*" {
            println!("{} {} {}{}", marker, style(&branch.name).green(), style(target).yellow(), flags);
        } else {
            println!("{} {} {}{}", marker, branch.name, style(target).yellow(), flags);
        }
    }
    Ok(())
}

/// Create a branch.
pub fn create(name: &str, from: Option<&str>) -> Result<()> {
    let mut repo = open_repo()?;
    let start = match from {
        Some(_) => Some(resolve_or_head(&repo, from)?),
        None => repo.head()?,
    };
    let branch = repo.create_branch(name, start)?;
    match branch.commit_id {
        Some(id) => println!("Created branch {} at {}", style(name).green(), id.short()),
        None => println!("Created branch {}", style(name).green()),
    }
    Ok(())
}

/// Delete a branch.
pub fn delete(name: &str, force: bool) -> Result<()> {
    let mut repo = open_repo()?;
    repo.delete_branch(name, force)?;
    println!("Deleted branch {}", name);
    Ok(())
}

/// Rename a branch.
pub fn rename(old: &str, new: &str) -> Result<()> {
    let mut repo = open_repo()?;
    repo.rename_branch(old, new)?;
    println!("Renamed branch {} to {}", old, style(new).green());
    Ok(())
}

/// Set or clear deletion protection.
pub fn protect(name: &str, protected: bool) -> Result<()> {
    let mut repo = open_repo()?;
    repo.set_branch_protection(name, protected)?;
    if protected {
        println!("Branch {} is now protected", name);
    } else {
        println!("Branch {} is no longer protected", name);
    }
    Ok(())
}

/// Set or clear a branch's upstream.
pub fn upstream(name: &str, upstream: Option<&str>) -> Result<()> {
    let mut repo = open_repo()?;
    repo.set_upstream(name, upstream)?;
    match upstream {
        Some(upstream) => println!("Branch {} now tracks {}", name, upstream),
        None => println!("Branch {} has no upstream", name),
    }
    Ok(())
}

/// Switch branches and emit the branch's snapshot for the host to apply.
pub fn checkout(name: &str, output: Option<&Path>) -> Result<()> {
    let mut repo = open_repo()?;
    let snapshot = repo.checkout(name)?;
    eprintln!("Switched to branch '{}'", style(name).green());
    match snapshot {
        Some(snapshot) => write_snapshot(&snapshot, output),
        None => {
            eprintln!("Branch has no commits yet");
            Ok(())
        }
    }
}
