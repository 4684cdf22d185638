//! Portable patches: commits bundled with their snapshots and diffs.
//!
//! [`Patch::to_json`] is the transfer encoding; [`export_patch`] renders
//! a Git-style text view for humans.

use crate::diff::{diff_snapshots, Diff};
use crate::error::{DbvcError, Result};
use crate::object_id::ObjectId;
use crate::repo::DbvcRepo;
use crate::snapshot::{DatabaseSnapshot, Row, Value};
use crate::storage::StorageProvider;
use crate::types::{Change, Commit};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::fmt;
use tracing::{info, warn};

/// Current patch format version.
pub const PATCH_VERSION: u32 = 1;

/// One commit inside a patch.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PatchCommit {
    /// The commit, id included.
    pub commit: Commit,
    /// The snapshot it records.
    pub snapshot: DatabaseSnapshot,
    /// Diff against its first parent (or the empty snapshot).
    pub diff: Diff,
}

/// A sequence of commits, oldest first.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Patch {
    /// Format version.
    pub version: u32,
    /// Exclusive start of the range, if any.
    pub from: Option<ObjectId>,
    /// Inclusive end of the range.
    pub to: ObjectId,
    /// Unix milliseconds.
    pub created_at: i64,
    /// Commits, parents before children.
    pub commits: Vec<PatchCommit>,
}

impl Patch {
    /// Serializes to JSON.
    ///
    /// JSON has no NaN or infinity, so a patch carrying such a float is
    /// rejected rather than silently changing its content hashes.
    pub fn to_json(&self) -> Result<String> {
        for entry in &self.commits {
            if let Some(location) = entry.non_finite_value() {
                return Err(DbvcError::InvalidPatch(format!(
                    "commit {} holds a non-finite float in {}",
                    entry.commit.id.short(),
                    location
                )));
            }
        }
        serde_json::to_string_pretty(self).map_err(|e| DbvcError::Serialization(e.to_string()))
    }

    /// Parses JSON produced by [`Patch::to_json`].
    pub fn from_json(json: &str) -> Result<Self> {
        let patch: Patch =
            serde_json::from_str(json).map_err(|e| DbvcError::InvalidPatch(e.to_string()))?;
        if patch.version != PATCH_VERSION {
            return Err(DbvcError::InvalidPatch(format!(
                "unsupported version {}",
                patch.version
            )));
        }
        Ok(patch)
    }
}

impl PatchCommit {
    /// Where the first NaN or infinite cell sits, if any.
    fn non_finite_value(&self) -> Option<String> {
        let finite = |row: &Row| row.values().all(Value::is_finite);
        for (table, data) in &self.snapshot.data {
            if !data.rows.iter().all(finite) {
                return Some(format!("snapshot table {}", table));
            }
        }
        let changes = self.commit.changes.iter().filter_map(|c| match c {
            Change::Data(d) => Some(d),
            _ => None,
        });
        for change in changes.chain(&self.diff.data_changes) {
            let rows = change.old_values.iter().chain(&change.new_values);
            if !rows.into_iter().all(finite) {
                return Some(format!("change {}[{}]", change.table, change.key));
            }
        }
        None
    }
}

impl fmt::Display for Patch {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "# dbvc patch v{}", self.version)?;
        match self.from {
            Some(from) => writeln!(f, "# range {}..{}", from, self.to)?,
            None => writeln!(f, "# range ..{}", self.to)?,
        }
        writeln!(f, "# {} commit(s)", self.commits.len())?;

        for entry in &self.commits {
            let commit = &entry.commit;
            writeln!(f)?;
            writeln!(f, "commit {}", commit.id)?;
            for parent in &commit.parent_ids {
                writeln!(f, "Parent: {}", parent)?;
            }
            writeln!(f, "Author: {}", commit.author.key())?;
            writeln!(f, "Date:   {}", commit.timestamp)?;
            if let Some(branch) = &commit.branch_name {
                writeln!(f, "Branch: {}", branch)?;
            }
            writeln!(f)?;
            for line in commit.message.lines() {
                writeln!(f, "    {}", line)?;
            }
            writeln!(f)?;

            let summary = &entry.diff.summary;
            writeln!(
                f,
                "--- {} insertion(s), {} deletion(s), {} modification(s)",
                summary.insertions, summary.deletions, summary.modifications
            )?;
            for change in entry.diff.to_changes() {
                let op = change.operation();
                writeln!(
                    f,
                    "{}{} {}: {}",
                    op.patch_prefix(),
                    op,
                    change.target(),
                    change.description()
                )?;
                for detail in change.detail_lines() {
                    writeln!(f, "    {}", detail)?;
                }
            }
        }
        Ok(())
    }
}

/// Renders a patch as Git-style text.
pub fn export_patch(patch: &Patch) -> String {
    patch.to_string()
}

/// Options for [`DbvcRepo::apply_patch`].
#[derive(Debug, Clone, Copy, Default)]
pub struct ApplyPatchOptions {
    /// Validate only; store nothing.
    pub check: bool,
}

/// Why a patch commit was rejected.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PatchConflict {
    /// The rejected commit.
    pub commit_id: ObjectId,
    /// Reason.
    pub reason: String,
}

/// Outcome of [`DbvcRepo::apply_patch`].
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ApplyPatchResult {
    /// Commits stored (or, with `check`, that would be), already-present
    /// ones included.
    pub applied_patches: usize,
    /// Commits rejected.
    pub failed_patches: usize,
    /// Ids of applied commits, in patch order.
    pub applied: Vec<ObjectId>,
    /// One entry per rejected commit.
    pub conflicts: Vec<PatchConflict>,
}

impl ApplyPatchResult {
    /// True if every commit applied.
    pub fn is_clean(&self) -> bool {
        self.failed_patches == 0
    }
}

impl<S: StorageProvider> DbvcRepo<S> {
    /// Patch holding a single commit.
    pub fn generate_patch(&self, id: ObjectId) -> Result<Patch> {
        let commit = self.get_commit(id)?;
        let from = commit.first_parent();
        Ok(Patch {
            version: PATCH_VERSION,
            from,
            to: id,
            created_at: self.now(),
            commits: vec![self.patch_commit(commit)?],
        })
    }

    /// Patch holding the commits reachable from `to` but not from `from`,
    /// oldest first. Without `from` the whole history of `to` is included.
    pub fn generate_patch_range(&self, from: Option<ObjectId>, to: ObjectId) -> Result<Patch> {
        let commits = self
            .graph()
            .commits_between(from, to)?
            .into_iter()
            .map(|c| self.patch_commit(c))
            .collect::<Result<Vec<_>>>()?;
        Ok(Patch {
            version: PATCH_VERSION,
            from,
            to,
            created_at: self.now(),
            commits,
        })
    }

    fn patch_commit(&self, commit: Commit) -> Result<PatchCommit> {
        let snapshot = self.load_snapshot(commit.tree_id)?;
        let before = match commit.first_parent() {
            Some(parent) => self.snapshot_at(parent)?,
            None => DatabaseSnapshot::empty(),
        };
        Ok(PatchCommit {
            diff: diff_snapshots(&before, &snapshot),
            commit,
            snapshot,
        })
    }

    /// Stores the patch's commits and snapshots.
    ///
    /// Each commit must hash to its id, its snapshot to its `tree_id`, and
    /// its parents must already exist or precede it in the patch. Commits
    /// already present count as applied. No branch moves; create or reset
    /// one to the patch's `to` to use the result.
    pub fn apply_patch(&mut self, patch: &Patch, options: &ApplyPatchOptions) -> Result<ApplyPatchResult> {
        let _lock = self.storage.lock()?;
        let mut result = ApplyPatchResult::default();
        let mut known: HashSet<ObjectId> = HashSet::new();

        for entry in &patch.commits {
            let commit = &entry.commit;
            match self.validate_patch_commit(entry, &known)? {
                Some(reason) => {
                    warn!(commit = %commit.id, reason = %reason, "Rejected patch commit");
                    result.failed_patches += 1;
                    result.conflicts.push(PatchConflict {
                        commit_id: commit.id,
                        reason,
                    });
                }
                None => {
                    if !options.check && self.storage.get_commit(&commit.id)?.is_none() {
                        self.storage.save_snapshot(&commit.tree_id, &entry.snapshot)?;
                        self.storage.save_commit(commit)?;
                    }
                    known.insert(commit.id);
                    result.applied_patches += 1;
                    result.applied.push(commit.id);
                }
            }
        }

        info!(
            applied = result.applied_patches,
            failed = result.failed_patches,
            check = options.check,
            "Applied patch"
        );
        Ok(result)
    }

    /// Reason the commit cannot be applied, if any.
    fn validate_patch_commit(&self, entry: &PatchCommit, known: &HashSet<ObjectId>) -> Result<Option<String>> {
        let commit = &entry.commit;
        let id = commit.compute_id()?;
        if id != commit.id {
            return Ok(Some(format!("content hashes to {}", id.short())));
        }
        let tree_id = entry.snapshot.tree_id()?;
        if tree_id != commit.tree_id {
            return Ok(Some(format!(
                "snapshot hashes to {}, commit expects {}",
                tree_id.short(),
                commit.tree_id.short()
            )));
        }
        for parent in &commit.parent_ids {
            if !known.contains(parent) && self.storage.get_commit(parent)?.is_none() {
                return Ok(Some(format!("missing parent {}", parent.short())));
            }
        }
        Ok(None)
    }
}
