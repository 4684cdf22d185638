//! CLI commands.

pub mod bisect;
pub mod branch;
pub mod commit;
pub mod diff;
pub mod gc;
pub mod init;
pub mod log;
pub mod merge;
pub mod patch;
pub mod reflog;
pub mod stash;
pub mod tag;
pub mod verify;

use anyhow::{anyhow, Context, Result};
use chrono::{DateTime, Local};
use dbvc_core::{Author, DatabaseSnapshot, DbvcRepo, ObjectId};
use std::fs;
use std::path::Path;

/// Opens the repository in the current directory.
pub fn open_repo() -> Result<DbvcRepo> {
    DbvcRepo::open(".").context("Not a dbvc repository (run 'dbvc init' first)")
}

/// Author from `--author`, else the configured user.
pub fn author(repo: &DbvcRepo, arg: Option<&str>) -> Result<Author> {
    match arg {
        Some(s) => Ok(Author::parse(s)),
        None => repo
            .config()?
            .author()
            .ok_or_else(|| anyhow!("No author: pass --author \"Name <email>\" or set [user] in .dbvc/config.toml")),
    }
}

/// Resolves an optional revision, defaulting to HEAD.
pub fn resolve_or_head(repo: &DbvcRepo, rev: Option<&str>) -> Result<ObjectId> {
    let rev = rev.unwrap_or("HEAD");
    repo.resolve(rev)
        .with_context(|| format!("Unknown revision '{}'", rev))
}

/// Reads a snapshot document.
pub fn read_snapshot(path: &Path) -> Result<DatabaseSnapshot> {
    let json = fs::read_to_string(path)
        .with_context(|| format!("Failed to read snapshot {}", path.display()))?;
    DatabaseSnapshot::from_json(&json)
        .with_context(|| format!("Invalid snapshot document {}", path.display()))
}

/// Writes a snapshot document to `path`, or stdout.
pub fn write_snapshot(snapshot: &DatabaseSnapshot, path: Option<&Path>) -> Result<()> {
    let json = snapshot.to_json_pretty()?;
    match path {
        Some(path) => {
            fs::write(path, json + "\n")
                .with_context(|| format!("Failed to write snapshot {}", path.display()))?;
            println!("Snapshot written to {}", path.display());
        }
        None => println!("{}", json),
    }
    Ok(())
}

/// Formats Unix milliseconds as local time.
pub fn format_time(millis: i64) -> String {
    DateTime::from_timestamp_millis(millis)
        .map(|t| t.with_timezone(&Local).format("%Y-%m-%d %H:%M:%S %z").to_string())
        .unwrap_or_else(|| millis.to_string())
}
