//! Bisect session commands.

use super::{open_repo, resolve_or_head};
use anyhow::Result;
use console::style;
use dbvc_core::{BisectSession, BisectStatus, DbvcRepo, ObjectId};

/// Start bisecting between a good and a bad revision.
pub fn start(good: &str, bad: &str) -> Result<()> {
    let mut repo = open_repo()?;
    let good = resolve_or_head(&repo, Some(good))?;
    let bad = resolve_or_head(&repo, Some(bad))?;
    let session = repo.bisect_start(good, bad)?;
    report(&repo, &session)
}

/// Mark a commit (default: the current one) good.
pub fn good(rev: Option<&str>) -> Result<()> {
    let mut repo = open_repo()?;
    let commit = resolve_opt(&repo, rev)?;
    let session = repo.bisect_good(commit)?;
    report(&repo, &session)
}

/// Mark a commit (default: the current one) bad.
pub fn bad(rev: Option<&str>) -> Result<()> {
    let mut repo = open_repo()?;
    let commit = resolve_opt(&repo, rev)?;
    let session = repo.bisect_bad(commit)?;
    report(&repo, &session)
}

/// Leave a commit (default: the current one) untested.
pub fn skip(rev: Option<&str>) -> Result<()> {
    let mut repo = open_repo()?;
    let commit = resolve_opt(&repo, rev)?;
    let session = repo.bisect_skip(commit)?;
    report(&repo, &session)
}

/// Abandon the session.
pub fn reset() -> Result<()> {
    let mut repo = open_repo()?;
    match repo.bisect_reset()? {
        Some(session) => println!(
            "{} Bisect aborted after {} step(s)",
            style("✓").green(),
            session.steps
        ),
        None => println!("No bisect in progress"),
    }
    Ok(())
}

/// Show the session state.
pub fn status() -> Result<()> {
    let repo = open_repo()?;
    match repo.bisect_status()? {
        Some(session) => report(&repo, &session),
        None => {
            println!("No bisect in progress");
            Ok(())
        }
    }
}

fn resolve_opt(repo: &DbvcRepo, rev: Option<&str>) -> Result<Option<ObjectId>> {
    match rev {
        Some(rev) => Ok(Some(resolve_or_head(repo, Some(rev))?)),
        None => Ok(None),
    }
}

fn report(repo: &DbvcRepo, session: &BisectSession) -> Result<()> {
    match session.status {
        BisectStatus::Found => {
            if let Some(id) = session.first_bad_commit {
                let commit = repo.get_commit(id)?;
                println!(
                    "{} {} is the first bad commit ({} step(s))",
                    style("✓").green().bold(),
                    style(id.as_hex()).yellow(),
                    session.steps
                );
                println!("    {}", commit.summary());
            }
        }
        BisectStatus::Active => {
            let remaining = session.remaining_commits.len();
            let steps_left = usize::BITS - remaining.leading_zeros();
            println!(
                "{} {} candidate(s) left (roughly {} step(s))",
                style("→").cyan(),
                remaining,
                steps_left
            );
            if let Some(id) = session.current_commit {
                let commit = repo.get_commit(id)?;
                println!(
                    "Test {} {}",
                    style(id.short()).yellow(),
                    commit.summary()
                );
            }
        }
        BisectStatus::Aborted => println!("Bisect aborted"),
    }
    Ok(())
}
