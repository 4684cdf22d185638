//! Attribution of tables, columns and rows to the commits that changed
//! them.

use crate::error::Result;
use crate::object_id::ObjectId;
use crate::repo::DbvcRepo;
use crate::storage::StorageProvider;
use crate::types::{Change, Commit};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use tracing::debug;

const MILLIS_PER_DAY: i64 = 86_400_000;

/// One commit that touched the blamed target.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BlameLine {
    /// The commit.
    pub commit_id: ObjectId,
    /// `name <email>` of its author.
    pub author: String,
    /// First line of its message.
    pub summary: String,
    /// Commit time (Unix milliseconds).
    pub timestamp: i64,
    /// Whole days between the commit and now.
    pub age_days: i64,
    /// Descriptions of the matching changes.
    pub changes: Vec<String>,
}

/// Blame for one target, oldest line first.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BlameResult {
    /// `table`, `table.column` or `table[key]`.
    pub target: String,
    /// Commits that touched the target.
    pub lines: Vec<BlameLine>,
    /// The most recent of them.
    pub last_modified: Option<BlameLine>,
}

/// Commit statistics of one author.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Contributor {
    /// Author name.
    pub name: String,
    /// Author email.
    pub email: String,
    /// Commits authored.
    pub commits: usize,
    /// Time of their first commit.
    pub first_commit: i64,
    /// Time of their latest commit.
    pub last_commit: i64,
}

impl Contributor {
    /// `name <email>`.
    pub fn key(&self) -> String {
        format!("{} <{}>", self.name, self.email)
    }
}

impl<S: StorageProvider> DbvcRepo<S> {
    /// Commits on the first-parent chain of `from` (default HEAD) whose
    /// changes touch `table`.
    pub fn blame_table(&self, table: &str, from: Option<ObjectId>) -> Result<BlameResult> {
        self.blame(table.to_string(), from, |c| c.references_table(table))
    }

    /// Commits whose changes touch `table.column`.
    pub fn blame_column(&self, table: &str, column: &str, from: Option<ObjectId>) -> Result<BlameResult> {
        self.blame(format!("{}.{}", table, column), from, |c| {
            c.references_column(table, column)
        })
    }

    /// Commits whose data changes touch the row with `key`.
    pub fn blame_row(&self, table: &str, key: &str, from: Option<ObjectId>) -> Result<BlameResult> {
        self.blame(format!("{}[{}]", table, key), from, |c| {
            c.references_row(table, key)
        })
    }

    fn blame(
        &self,
        target: String,
        from: Option<ObjectId>,
        touches: impl Fn(&Change) -> bool,
    ) -> Result<BlameResult> {
        let now = self.now();
        let lines: Vec<BlameLine> = self
            .touching_commits(from, &touches)?
            .iter()
            .map(|commit| {
                let changes = commit
                    .changes
                    .iter()
                    .filter(|c| touches(c))
                    .map(|c| c.description().to_string())
                    .collect();
                line(commit, changes, now)
            })
            .collect();

        debug!(target = %target, matched = lines.len(), "Blame");
        Ok(BlameResult {
            last_modified: lines.last().cloned(),
            target,
            lines,
        })
    }

    /// First-parent chain of `from` (default HEAD), oldest first, kept to
    /// the commits with at least one change matching `touches`.
    fn touching_commits(
        &self,
        from: Option<ObjectId>,
        touches: impl Fn(&Change) -> bool,
    ) -> Result<Vec<Commit>> {
        let start = match from {
            Some(id) => Some(id),
            None => self.head()?,
        };
        let mut chain = match start {
            Some(id) => self.graph().first_parent_chain(id, None)?,
            None => Vec::new(),
        };
        chain.reverse();
        chain.retain(|commit| commit.changes.iter().any(&touches));
        Ok(chain)
    }

    /// Authors of the commits blame selects for `table` (or `table.column`),
    /// most commits first.
    pub fn contributors(
        &self,
        table: &str,
        column: Option<&str>,
        from: Option<ObjectId>,
    ) -> Result<Vec<Contributor>> {
        let commits = self.touching_commits(from, |c| match column {
            Some(column) => c.references_column(table, column),
            None => c.references_table(table),
        })?;

        let mut by_author: BTreeMap<String, Contributor> = BTreeMap::new();
        for commit in &commits {
            let author = &commit.author;
            let entry = by_author
                .entry(author.key())
                .or_insert_with(|| Contributor {
                    name: author.name.clone(),
                    email: author.email.clone(),
                    commits: 0,
                    first_commit: commit.timestamp,
                    last_commit: commit.timestamp,
                });
            entry.commits += 1;
            entry.first_commit = entry.first_commit.min(commit.timestamp);
            entry.last_commit = entry.last_commit.max(commit.timestamp);
        }

        let mut contributors: Vec<Contributor> = by_author.into_values().collect();
        contributors.sort_by(|a, b| b.commits.cmp(&a.commits).then_with(|| a.key().cmp(&b.key())));
        Ok(contributors)
    }
}

fn line(commit: &Commit, changes: Vec<String>, now: i64) -> BlameLine {
    BlameLine {
        commit_id: commit.id,
        author: commit.author.key(),
        summary: commit.summary().to_string(),
        timestamp: commit.timestamp,
        age_days: (now - commit.timestamp).max(0) / MILLIS_PER_DAY,
        changes,
    }
}
