//! In-memory storage.

use super::lock::RepoLock;
use super::{tag_filter, PrunePolicy, PruneReport, StorageProvider};
use crate::config::RepositoryConfig;
use crate::error::{DbvcError, Result};
use crate::object_id::ObjectId;
use crate::snapshot::DatabaseSnapshot;
use crate::types::{BisectSession, Branch, Commit, ReflogEntry, ReflogQuery, Stash, Tag};
use std::collections::{BTreeMap, HashMap, HashSet};
use std::sync::atomic::AtomicBool;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::{SystemTime, UNIX_EPOCH};

#[derive(Default)]
struct State {
    /// Commit plus the time it was stored.
    commits: HashMap<ObjectId, (Commit, i64)>,
    snapshots: HashMap<ObjectId, (DatabaseSnapshot, i64)>,
    branches: BTreeMap<String, Branch>,
    tags: BTreeMap<String, Tag>,
    stashes: HashMap<String, Stash>,
    /// Oldest first.
    reflog: Vec<ReflogEntry>,
    config: Option<RepositoryConfig>,
    bisect: Option<BisectSession>,
}

/// Storage held entirely in process memory.
///
/// Cloning shares the underlying state, so several repository handles can
/// work against one store the way they would against one directory.
#[derive(Clone, Default)]
pub struct MemoryStorage {
    state: Arc<Mutex<State>>,
    lock_flag: Arc<AtomicBool>,
}

impl MemoryStorage {
    /// Creates an empty store.
    pub fn new() -> Self {
        Self::default()
    }

    fn state(&self) -> Result<MutexGuard<'_, State>> {
        self.state
            .lock()
            .map_err(|_| DbvcError::Database("memory storage mutex poisoned".into()))
    }
}

fn now_ms() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as i64)
        .unwrap_or(0)
}

impl StorageProvider for MemoryStorage {
    fn save_commit(&self, commit: &Commit) -> Result<()> {
        // Rejects commits whose fields no longer match their id
        commit.encode()?;
        self.state()?
            .commits
            .entry(commit.id)
            .or_insert_with(|| (commit.clone(), now_ms()));
        Ok(())
    }

    fn get_commit(&self, id: &ObjectId) -> Result<Option<Commit>> {
        Ok(self.state()?.commits.get(id).map(|(c, _)| c.clone()))
    }

    fn list_commits(&self) -> Result<Vec<ObjectId>> {
        let mut ids: Vec<ObjectId> = self.state()?.commits.keys().copied().collect();
        ids.sort();
        Ok(ids)
    }

    fn save_branch(&self, branch: &Branch) -> Result<()> {
        self.state()?
            .branches
            .insert(branch.name.clone(), branch.clone());
        Ok(())
    }

    fn get_branch(&self, name: &str) -> Result<Option<Branch>> {
        Ok(self.state()?.branches.get(name).cloned())
    }

    fn list_branches(&self) -> Result<Vec<Branch>> {
        Ok(self.state()?.branches.values().cloned().collect())
    }

    fn delete_branch(&self, name: &str) -> Result<bool> {
        Ok(self.state()?.branches.remove(name).is_some())
    }

    fn save_tag(&self, tag: &Tag) -> Result<()> {
        self.state()?.tags.insert(tag.name.clone(), tag.clone());
        Ok(())
    }

    fn get_tag(&self, name: &str) -> Result<Option<Tag>> {
        Ok(self.state()?.tags.get(name).cloned())
    }

    fn list_tags(&self, filter: Option<&str>) -> Result<Vec<Tag>> {
        Ok(self
            .state()?
            .tags
            .values()
            .filter(|t| tag_filter(filter, &t.name))
            .cloned()
            .collect())
    }

    fn delete_tag(&self, name: &str) -> Result<bool> {
        Ok(self.state()?.tags.remove(name).is_some())
    }

    fn save_stash(&self, stash: &Stash) -> Result<()> {
        self.state()?
            .stashes
            .insert(stash.id.clone(), stash.clone());
        Ok(())
    }

    fn get_stash(&self, id: &str) -> Result<Option<Stash>> {
        Ok(self.state()?.stashes.get(id).cloned())
    }

    fn list_stashes(&self) -> Result<Vec<Stash>> {
        let mut stashes: Vec<Stash> = self.state()?.stashes.values().cloned().collect();
        stashes.sort_by(|a, b| b.created_at.cmp(&a.created_at).then(b.id.cmp(&a.id)));
        Ok(stashes)
    }

    fn delete_stash(&self, id: &str) -> Result<bool> {
        Ok(self.state()?.stashes.remove(id).is_some())
    }

    fn add_reflog_entry(&self, entry: &ReflogEntry) -> Result<()> {
        self.state()?.reflog.push(entry.clone());
        Ok(())
    }

    fn get_reflog(&self, query: &ReflogQuery) -> Result<Vec<ReflogEntry>> {
        let state = self.state()?;
        Ok(query.apply(state.reflog.iter().rev().cloned()))
    }

    fn save_snapshot(&self, tree_id: &ObjectId, snapshot: &DatabaseSnapshot) -> Result<()> {
        let actual = snapshot.tree_id()?;
        if actual != *tree_id {
            return Err(DbvcError::HashMismatch {
                expected: tree_id.as_hex(),
                actual: actual.as_hex(),
            });
        }
        self.state()?
            .snapshots
            .entry(*tree_id)
            .or_insert_with(|| (snapshot.clone(), now_ms()));
        Ok(())
    }

    fn get_snapshot(&self, tree_id: &ObjectId) -> Result<Option<DatabaseSnapshot>> {
        Ok(self.state()?.snapshots.get(tree_id).map(|(s, _)| s.clone()))
    }

    fn list_snapshots(&self) -> Result<Vec<ObjectId>> {
        let mut ids: Vec<ObjectId> = self.state()?.snapshots.keys().copied().collect();
        ids.sort();
        Ok(ids)
    }

    fn get_config(&self) -> Result<RepositoryConfig> {
        Ok(self.state()?.config.clone().unwrap_or_default())
    }

    fn save_config(&self, config: &RepositoryConfig) -> Result<()> {
        self.state()?.config = Some(config.clone());
        Ok(())
    }

    fn save_bisect(&self, session: &BisectSession) -> Result<()> {
        self.state()?.bisect = Some(session.clone());
        Ok(())
    }

    fn get_bisect(&self) -> Result<Option<BisectSession>> {
        Ok(self.state()?.bisect.clone())
    }

    fn clear_bisect(&self) -> Result<()> {
        self.state()?.bisect = None;
        Ok(())
    }

    fn lock(&self) -> Result<RepoLock> {
        RepoLock::acquire_flag(&self.lock_flag)
    }

    fn prune_objects(&self, keep: &HashSet<ObjectId>, policy: &PrunePolicy) -> Result<PruneReport> {
        let mut state = self.state()?;
        let mut report = PruneReport {
            objects_scanned: state.commits.len() + state.snapshots.len(),
            ..Default::default()
        };

        let doomed_commits: Vec<ObjectId> = state
            .commits
            .iter()
            .filter(|(id, (_, at))| !keep.contains(id) && policy.expired(*at))
            .map(|(id, _)| *id)
            .collect();
        let doomed_snapshots: Vec<ObjectId> = state
            .snapshots
            .iter()
            .filter(|(id, (_, at))| !keep.contains(id) && policy.expired(*at))
            .map(|(id, _)| *id)
            .collect();

        report.objects_deleted = doomed_commits.len() + doomed_snapshots.len();
        if !policy.dry_run {
            for id in doomed_commits {
                state.commits.remove(&id);
            }
            for id in doomed_snapshots {
                state.snapshots.remove(&id);
            }
        }

        Ok(report)
    }
}
