//! Stash stack: uncommitted change sets parked against a branch head.

use crate::error::{DbvcError, Result};
use crate::repo::DbvcRepo;
use crate::snapshot::DatabaseSnapshot;
use crate::storage::StorageProvider;
use crate::types::{Author, Change, ReflogAction, Signature, Stash};
use tracing::info;

/// Ref name used for stash reflog entries.
pub const STASH_REF: &str = "stash";

impl<S: StorageProvider> DbvcRepo<S> {
    /// Saves `changes` (and optionally the live `snapshot`) on top of the
    /// stash stack.
    pub fn stash_push(
        &mut self,
        message: &str,
        author: &Author,
        changes: Vec<Change>,
        snapshot: Option<&DatabaseSnapshot>,
    ) -> Result<Stash> {
        let _lock = self.storage.lock()?;

        let snapshot_id = match snapshot {
            Some(snapshot) => {
                let tree_id = snapshot.tree_id()?;
                self.storage.save_snapshot(&tree_id, snapshot)?;
                Some(tree_id)
            }
            None => None,
        };

        // Two pushes in the same millisecond must still stack in order
        let newest = self.stash_stack()?.first().map(|s| s.created_at);
        let now = self.now();
        let created_at = match newest {
            Some(t) if t >= now => t + 1,
            _ => now,
        };

        let parent = self.head()?;
        let stash = Stash {
            id: uuid::Uuid::new_v4().to_string(),
            message: message.to_string(),
            branch_name: self.current_branch.clone(),
            parent_commit_id: parent,
            changes,
            author: Signature::new(author, created_at),
            created_at,
            snapshot_id,
        };
        self.storage.save_stash(&stash)?;
        self.record(
            STASH_REF,
            None,
            parent,
            ReflogAction::Stash,
            format!("push on {}: {}", stash.branch_name, message),
            &author.key(),
        )?;

        info!(branch = %stash.branch_name, stash = %stash.id, "Stashed changes");
        Ok(stash)
    }

    /// Stashes, most recent first.
    pub fn stash_list(&self) -> Result<Vec<Stash>> {
        self.stash_stack()
    }

    fn stash_stack(&self) -> Result<Vec<Stash>> {
        let mut stashes = self.storage.list_stashes()?;
        stashes.sort_by(|a, b| b.created_at.cmp(&a.created_at).then_with(|| a.id.cmp(&b.id)));
        Ok(stashes)
    }

    /// Removes and returns the most recent stash.
    ///
    /// Fails with [`DbvcError::EmptyStash`] and changes nothing when the
    /// stack is empty.
    pub fn stash_pop(&mut self) -> Result<Stash> {
        let _lock = self.storage.lock()?;
        let stash = self
            .stash_stack()?
            .into_iter()
            .next()
            .ok_or(DbvcError::EmptyStash)?;
        self.remove_stash(&stash, "pop")?;
        Ok(stash)
    }

    /// Returns a stash (default: the most recent) without removing it.
    pub fn stash_apply(&self, id: Option<&str>) -> Result<Stash> {
        match id {
            Some(id) => self
                .storage
                .get_stash(id)?
                .ok_or_else(|| DbvcError::StashNotFound(id.to_string())),
            None => self
                .stash_stack()?
                .into_iter()
                .next()
                .ok_or(DbvcError::EmptyStash),
        }
    }

    /// Snapshot captured with a stash, if one was.
    pub fn stash_snapshot(&self, stash: &Stash) -> Result<Option<DatabaseSnapshot>> {
        stash.snapshot_id.map(|id| self.load_snapshot(id)).transpose()
    }

    /// Removes one stash by id.
    pub fn stash_drop(&mut self, id: &str) -> Result<Stash> {
        let _lock = self.storage.lock()?;
        let stash = self
            .storage
            .get_stash(id)?
            .ok_or_else(|| DbvcError::StashNotFound(id.to_string()))?;
        self.remove_stash(&stash, "drop")?;
        Ok(stash)
    }

    /// Removes every stash, returning how many there were.
    pub fn stash_clear(&mut self) -> Result<usize> {
        let _lock = self.storage.lock()?;
        let stashes = self.stash_stack()?;
        for stash in &stashes {
            self.remove_stash(stash, "clear")?;
        }
        Ok(stashes.len())
    }

    fn remove_stash(&self, stash: &Stash, verb: &str) -> Result<()> {
        if !self.storage.delete_stash(&stash.id)? {
            return Err(DbvcError::StashNotFound(stash.id.clone()));
        }
        self.record(
            STASH_REF,
            stash.parent_commit_id,
            None,
            ReflogAction::Stash,
            format!("{}: {}", verb, stash.message),
            &self.actor()?,
        )?;
        info!(stash = %stash.id, action = verb, "Removed stash");
        Ok(())
    }
}
