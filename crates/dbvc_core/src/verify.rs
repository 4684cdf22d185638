//! Repository integrity checks.

use crate::error::{DbvcError, Result};
use crate::object_id::ObjectId;
use crate::repo::DbvcRepo;
use crate::storage::StorageProvider;
use std::collections::HashSet;
use std::fmt;
use tracing::{debug, warn};

/// What [`DbvcRepo::verify`] checks beyond references.
#[derive(Debug, Clone)]
pub struct VerifyConfig {
    /// Load every referenced snapshot and check it hashes to its id.
    pub check_snapshots: bool,
    /// Check every stored commit still hashes to its id.
    pub check_commit_ids: bool,
}

impl Default for VerifyConfig {
    fn default() -> Self {
        Self {
            check_snapshots: true,
            check_commit_ids: true,
        }
    }
}

/// One integrity problem.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum VerifyIssue {
    /// HEAD names a branch that does not exist.
    MissingHeadBranch(String),
    /// A branch points at a missing commit.
    DanglingBranch {
        /// Branch.
        branch: String,
        /// Missing commit.
        commit: ObjectId,
    },
    /// A tag points at a missing commit.
    DanglingTag {
        /// Tag.
        tag: String,
        /// Missing commit.
        commit: ObjectId,
    },
    /// A stash's parent commit is missing.
    DanglingStash {
        /// Stash id.
        stash: String,
        /// Missing commit.
        commit: ObjectId,
    },
    /// A commit's parent is missing.
    MissingParent {
        /// Child.
        commit: ObjectId,
        /// Missing parent.
        parent: ObjectId,
    },
    /// A commit's snapshot is missing.
    MissingSnapshot {
        /// Commit.
        commit: ObjectId,
        /// Missing snapshot.
        tree_id: ObjectId,
    },
    /// A commit could not be read or no longer hashes to its id.
    CorruptCommit {
        /// Commit.
        commit: ObjectId,
        /// Details.
        reason: String,
    },
    /// A snapshot could not be read or no longer hashes to its id.
    CorruptSnapshot {
        /// Snapshot.
        tree_id: ObjectId,
        /// Details.
        reason: String,
    },
}

impl fmt::Display for VerifyIssue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::MissingHeadBranch(name) => write!(f, "HEAD names missing branch '{}'", name),
            Self::DanglingBranch { branch, commit } => {
                write!(f, "branch '{}' points at missing commit {}", branch, commit.short())
            }
            Self::DanglingTag { tag, commit } => {
                write!(f, "tag '{}' points at missing commit {}", tag, commit.short())
            }
            Self::DanglingStash { stash, commit } => {
                write!(f, "stash {} is based on missing commit {}", stash, commit.short())
            }
            Self::MissingParent { commit, parent } => {
                write!(f, "commit {} has missing parent {}", commit.short(), parent.short())
            }
            Self::MissingSnapshot { commit, tree_id } => {
                write!(f, "commit {} has missing snapshot {}", commit.short(), tree_id.short())
            }
            Self::CorruptCommit { commit, reason } => {
                write!(f, "commit {} is corrupt: {}", commit.short(), reason)
            }
            Self::CorruptSnapshot { tree_id, reason } => {
                write!(f, "snapshot {} is corrupt: {}", tree_id.short(), reason)
            }
        }
    }
}

/// Outcome of [`DbvcRepo::verify`].
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct VerifyReport {
    /// Commits examined.
    pub commits_checked: usize,
    /// Snapshots examined.
    pub snapshots_checked: usize,
    /// Branches examined.
    pub branches_checked: usize,
    /// Tags examined.
    pub tags_checked: usize,
    /// Problems found.
    pub issues: Vec<VerifyIssue>,
}

impl VerifyReport {
    /// True if any problem was found.
    pub fn has_issues(&self) -> bool {
        !self.issues.is_empty()
    }

    /// One-line summary.
    pub fn summary(&self) -> String {
        let counts = format!(
            "{} commits, {} snapshots, {} branches, {} tags checked",
            self.commits_checked, self.snapshots_checked, self.branches_checked, self.tags_checked
        );
        if self.has_issues() {
            format!("{}; {} issue(s) found", counts, self.issues.len())
        } else {
            format!("{}; no issues", counts)
        }
    }
}

impl<S: StorageProvider> DbvcRepo<S> {
    /// Checks references and objects for consistency.
    ///
    /// Problems are collected into the report; only failures that stop the
    /// walk itself (such as cancellation) are returned as errors.
    pub fn verify(&self, config: &VerifyConfig) -> Result<VerifyReport> {
        let mut report = VerifyReport::default();

        let mut commits: HashSet<ObjectId> = HashSet::new();
        let mut snapshots: Vec<(ObjectId, ObjectId)> = Vec::new();
        for id in self.storage.list_commits()? {
            self.cancel.check()?;
            report.commits_checked += 1;
            match self.storage.get_commit(&id) {
                Ok(Some(commit)) => {
                    if config.check_commit_ids {
                        match commit.compute_id() {
                            Ok(actual) if actual == id => {}
                            Ok(actual) => report.issues.push(VerifyIssue::CorruptCommit {
                                commit: id,
                                reason: format!("content hashes to {}", actual.short()),
                            }),
                            Err(e) => report.issues.push(VerifyIssue::CorruptCommit {
                                commit: id,
                                reason: e.to_string(),
                            }),
                        }
                    }
                    commits.insert(id);
                    snapshots.push((id, commit.tree_id));
                    for parent in commit.parent_ids {
                        if !self.commit_exists(parent)? {
                            report.issues.push(VerifyIssue::MissingParent { commit: id, parent });
                        }
                    }
                }
                Ok(None) => report.issues.push(VerifyIssue::CorruptCommit {
                    commit: id,
                    reason: "listed but unreadable".to_string(),
                }),
                Err(DbvcError::Cancelled) => return Err(DbvcError::Cancelled),
                Err(e) => report.issues.push(VerifyIssue::CorruptCommit {
                    commit: id,
                    reason: e.to_string(),
                }),
            }
        }

        let mut seen_snapshots = HashSet::new();
        for (commit, tree_id) in snapshots {
            if !seen_snapshots.insert(tree_id) {
                continue;
            }
            self.cancel.check()?;
            if let Some(issue) = self.check_snapshot(commit, tree_id, config)? {
                report.issues.push(issue);
            }
            report.snapshots_checked += 1;
        }

        let config_head = self.storage.get_config()?.head;
        let branches = self.storage.list_branches()?;
        if !branches.iter().any(|b| b.name == config_head) {
            report.issues.push(VerifyIssue::MissingHeadBranch(config_head));
        }
        for branch in branches {
            report.branches_checked += 1;
            if let Some(commit) = branch.commit_id {
                if !commits.contains(&commit) && !self.commit_exists(commit)? {
                    report.issues.push(VerifyIssue::DanglingBranch {
                        branch: branch.name,
                        commit,
                    });
                }
            }
        }
        for tag in self.storage.list_tags(None)? {
            report.tags_checked += 1;
            if !commits.contains(&tag.commit_id) && !self.commit_exists(tag.commit_id)? {
                report.issues.push(VerifyIssue::DanglingTag {
                    tag: tag.name,
                    commit: tag.commit_id,
                });
            }
        }
        for stash in self.storage.list_stashes()? {
            if let Some(commit) = stash.parent_commit_id {
                if !commits.contains(&commit) && !self.commit_exists(commit)? {
                    report.issues.push(VerifyIssue::DanglingStash { stash: stash.id, commit });
                }
            }
        }

        for issue in &report.issues {
            warn!(issue = %issue, "Integrity problem");
        }
        debug!(summary = %report.summary(), "Verify finished");
        Ok(report)
    }

    fn commit_exists(&self, id: ObjectId) -> Result<bool> {
        match self.storage.get_commit(&id) {
            Ok(found) => Ok(found.is_some()),
            Err(DbvcError::Cancelled) => Err(DbvcError::Cancelled),
            // Unreadable commits are reported by the commit pass
            Err(_) => Ok(true),
        }
    }

    fn check_snapshot(&self, commit: ObjectId, tree_id: ObjectId, config: &VerifyConfig) -> Result<Option<VerifyIssue>> {
        if !config.check_snapshots {
            return Ok(None);
        }
        let issue = match self.storage.get_snapshot(&tree_id) {
            Ok(None) => Some(VerifyIssue::MissingSnapshot { commit, tree_id }),
            Ok(Some(snapshot)) => match snapshot.tree_id() {
                Ok(actual) if actual == tree_id => None,
                Ok(actual) => Some(VerifyIssue::CorruptSnapshot {
                    tree_id,
                    reason: format!("content hashes to {}", actual.short()),
                }),
                Err(e) => Some(VerifyIssue::CorruptSnapshot {
                    tree_id,
                    reason: e.to_string(),
                }),
            },
            Err(DbvcError::Cancelled) => return Err(DbvcError::Cancelled),
            Err(e) => Some(VerifyIssue::CorruptSnapshot {
                tree_id,
                reason: e.to_string(),
            }),
        };
        Ok(issue)
    }
}
