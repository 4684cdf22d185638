//! Commit graph traversal: ancestry, merge bases and ranges.
//!
//! Ancestry questions walk every parent of every commit. Only `log` and
//! blame use the first-parent chain.

use crate::error::{DbvcError, Result};
use crate::object_id::ObjectId;
use crate::storage::StorageProvider;
use crate::types::Commit;
use std::cell::RefCell;
use std::cmp::Reverse;
use std::collections::{BinaryHeap, HashMap, HashSet, VecDeque};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tracing::debug;

/// Shared flag a host can set to abort long-running walks.
///
/// Clones observe the same flag, so a token handed to another thread can
/// cancel work running on the repository's thread.
#[derive(Debug, Clone, Default)]
pub struct CancellationToken(Arc<AtomicBool>);

impl CancellationToken {
    /// Creates an untriggered token.
    pub fn new() -> Self {
        Self::default()
    }

    /// Requests cancellation.
    pub fn cancel(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    /// Clears a previous cancellation request.
    pub fn reset(&self) {
        self.0.store(false, Ordering::SeqCst);
    }

    /// True once `cancel` has been called.
    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }

    /// `Err(Cancelled)` if cancellation was requested.
    pub fn check(&self) -> Result<()> {
        if self.is_cancelled() {
            Err(DbvcError::Cancelled)
        } else {
            Ok(())
        }
    }
}

/// Read-only view of the commit DAG with a per-walk commit cache.
pub struct CommitGraph<'a, S: StorageProvider + ?Sized> {
    storage: &'a S,
    cache: RefCell<HashMap<ObjectId, Commit>>,
    cancel: CancellationToken,
}

impl<'a, S: StorageProvider + ?Sized> CommitGraph<'a, S> {
    /// Creates a graph over `storage`.
    pub fn new(storage: &'a S, cancel: CancellationToken) -> Self {
        Self {
            storage,
            cache: RefCell::new(HashMap::new()),
            cancel,
        }
    }

    /// Loads a commit, failing with `CommitNotFound` if it is absent.
    pub fn commit(&self, id: ObjectId) -> Result<Commit> {
        if let Some(commit) = self.cache.borrow().get(&id) {
            return Ok(commit.clone());
        }
        let commit = self
            .storage
            .get_commit(&id)?
            .ok_or_else(|| DbvcError::CommitNotFound(id.as_hex()))?;
        self.cache.borrow_mut().insert(id, commit.clone());
        Ok(commit)
    }

    fn parents(&self, id: ObjectId) -> Result<Vec<ObjectId>> {
        Ok(self.commit(id)?.parent_ids)
    }

    /// Every commit reachable from `start`, including `start`.
    pub fn ancestors(&self, start: ObjectId) -> Result<HashSet<ObjectId>> {
        self.ancestors_of_all([start])
    }

    fn ancestors_of_all(&self, starts: impl IntoIterator<Item = ObjectId>) -> Result<HashSet<ObjectId>> {
        let mut visited = HashSet::new();
        let mut queue = VecDeque::new();

        for start in starts {
            if visited.insert(start) {
                queue.push_back(start);
            }
        }

        while let Some(id) = queue.pop_front() {
            self.cancel.check()?;
            for parent in self.parents(id)? {
                if visited.insert(parent) {
                    queue.push_back(parent);
                }
            }
        }

        Ok(visited)
    }

    /// True if `ancestor` is reachable from `descendant` (or equal to it).
    pub fn is_ancestor(&self, ancestor: ObjectId, descendant: ObjectId) -> Result<bool> {
        if ancestor == descendant {
            return Ok(true);
        }

        let mut visited = HashSet::new();
        let mut queue = VecDeque::from([descendant]);
        visited.insert(descendant);

        while let Some(id) = queue.pop_front() {
            self.cancel.check()?;
            for parent in self.parents(id)? {
                if parent == ancestor {
                    return Ok(true);
                }
                if visited.insert(parent) {
                    queue.push_back(parent);
                }
            }
        }

        Ok(false)
    }

    /// Best common ancestor of `a` and `b`, or `None` for unrelated
    /// histories.
    ///
    /// Among common ancestors, those with no descendant in the common set
    /// are candidates; the most recent wins, then the smallest id.
    pub fn merge_base(&self, a: ObjectId, b: ObjectId) -> Result<Option<ObjectId>> {
        let ours = self.ancestors(a)?;
        let theirs = self.ancestors(b)?;
        let common: HashSet<ObjectId> = ours.intersection(&theirs).copied().collect();
        if common.is_empty() {
            return Ok(None);
        }

        // Strict ancestors of common commits are themselves common
        let mut parents = Vec::new();
        for id in &common {
            parents.extend(self.parents(*id)?);
        }
        let shadowed = self.ancestors_of_all(parents)?;

        let mut best: Option<(i64, ObjectId)> = None;
        for id in common.difference(&shadowed) {
            let ts = self.commit(*id)?.timestamp;
            best = match best {
                Some((best_ts, best_id)) if (best_ts, Reverse(best_id)) >= (ts, Reverse(*id)) => {
                    Some((best_ts, best_id))
                }
                _ => Some((ts, *id)),
            };
        }

        let base = best.map(|(_, id)| id);
        debug!(a = %a, b = %b, base = ?base, "Computed merge base");
        Ok(base)
    }

    /// Commits reachable from `to` but not from `from`, oldest first.
    ///
    /// Parents always precede children; ties are ordered by timestamp,
    /// then id.
    pub fn commits_between(&self, from: Option<ObjectId>, to: ObjectId) -> Result<Vec<Commit>> {
        let excluded = match from {
            Some(from) => self.ancestors(from)?,
            None => HashSet::new(),
        };
        let included: HashSet<ObjectId> = self
            .ancestors(to)?
            .into_iter()
            .filter(|id| !excluded.contains(id))
            .collect();

        // Kahn's algorithm over the included subgraph
        let mut pending: HashMap<ObjectId, usize> = HashMap::new();
        let mut children: HashMap<ObjectId, Vec<ObjectId>> = HashMap::new();
        for id in &included {
            let inside: Vec<ObjectId> = self
                .parents(*id)?
                .into_iter()
                .filter(|p| included.contains(p))
                .collect();
            pending.insert(*id, inside.len());
            for parent in inside {
                children.entry(parent).or_default().push(*id);
            }
        }

        let mut ready = BinaryHeap::new();
        for (id, count) in &pending {
            if *count == 0 {
                ready.push(Reverse((self.commit(*id)?.timestamp, *id)));
            }
        }

        let mut ordered = Vec::with_capacity(included.len());
        while let Some(Reverse((_, id))) = ready.pop() {
            self.cancel.check()?;
            ordered.push(self.commit(id)?);
            for child in children.get(&id).into_iter().flatten() {
                if let Some(count) = pending.get_mut(child) {
                    *count -= 1;
                    if *count == 0 {
                        ready.push(Reverse((self.commit(*child)?.timestamp, *child)));
                    }
                }
            }
        }

        Ok(ordered)
    }

    /// First-parent chain from `start`, newest first, up to `limit` commits.
    pub fn first_parent_chain(&self, start: ObjectId, limit: Option<usize>) -> Result<Vec<Commit>> {
        let limit = limit.unwrap_or(usize::MAX);
        let mut chain = Vec::new();
        let mut seen = HashSet::new();
        let mut current = Some(start);

        while let Some(id) = current {
            if chain.len() >= limit || !seen.insert(id) {
                break;
            }
            self.cancel.check()?;
            let commit = self.commit(id)?;
            current = commit.first_parent();
            chain.push(commit);
        }

        Ok(chain)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::snapshot::DatabaseSnapshot;
    use crate::storage::MemoryStorage;
    use crate::types::{Author, Signature};

    fn add(storage: &MemoryStorage, parents: &[ObjectId], message: &str, ts: i64) -> ObjectId {
        let sig = Signature::new(&Author::new("t", "t@x"), ts);
        let tree = DatabaseSnapshot::empty().tree_id().unwrap();
        let commit = Commit::new(parents.to_vec(), message, sig, ts, tree, vec![], None).unwrap();
        storage.save_commit(&commit).unwrap();
        commit.id
    }

    /// a - b - c - m
    ///      \     /
    ///       d - e
    fn diamond(storage: &MemoryStorage) -> [ObjectId; 6] {
        let a = add(storage, &[], "a", 1);
        let b = add(storage, &[a], "b", 2);
        let c = add(storage, &[b], "c", 3);
        let d = add(storage, &[b], "d", 4);
        let e = add(storage, &[d], "e", 5);
        let m = add(storage, &[c, e], "m", 6);
        [a, b, c, d, e, m]
    }

    #[test]
    fn test_is_ancestor_through_second_parent() {
        let storage = MemoryStorage::new();
        let [a, _, c, d, e, m] = diamond(&storage);
        let graph = CommitGraph::new(&storage, CancellationToken::new());

        assert!(graph.is_ancestor(d, m).unwrap());
        assert!(graph.is_ancestor(a, m).unwrap());
        assert!(graph.is_ancestor(m, m).unwrap());
        assert!(!graph.is_ancestor(c, e).unwrap());
        assert!(!graph.is_ancestor(m, a).unwrap());
    }

    #[test]
    fn test_merge_base() {
        let storage = MemoryStorage::new();
        let [_, b, c, _, e, m] = diamond(&storage);
        let graph = CommitGraph::new(&storage, CancellationToken::new());

        assert_eq!(graph.merge_base(c, e).unwrap(), Some(b));
        assert_eq!(graph.merge_base(m, e).unwrap(), Some(e));
    }

    #[test]
    fn test_merge_base_criss_cross_prefers_recent() {
        let storage = MemoryStorage::new();
        let a = add(&storage, &[], "a", 1);
        let x = add(&storage, &[a], "x", 2);
        let y = add(&storage, &[a], "y", 3);
        let p = add(&storage, &[x, y], "p", 4);
        let q = add(&storage, &[y, x], "q", 5);
        let graph = CommitGraph::new(&storage, CancellationToken::new());

        assert_eq!(graph.merge_base(p, q).unwrap(), Some(y));
    }

    #[test]
    fn test_unrelated_histories() {
        let storage = MemoryStorage::new();
        let a = add(&storage, &[], "a", 1);
        let b = add(&storage, &[], "b", 2);
        let graph = CommitGraph::new(&storage, CancellationToken::new());
        assert_eq!(graph.merge_base(a, b).unwrap(), None);
    }

    #[test]
    fn test_commits_between_topological() {
        let storage = MemoryStorage::new();
        let [a, b, c, d, e, m] = diamond(&storage);
        let graph = CommitGraph::new(&storage, CancellationToken::new());

        let ids: Vec<ObjectId> = graph
            .commits_between(Some(a), m)
            .unwrap()
            .iter()
            .map(|c| c.id)
            .collect();
        assert_eq!(ids, vec![b, c, d, e, m]);

        let all = graph.commits_between(None, m).unwrap();
        assert_eq!(all.len(), 6);
        assert_eq!(all[0].id, a);
    }

    #[test]
    fn test_first_parent_chain() {
        let storage = MemoryStorage::new();
        let [a, b, c, _, _, m] = diamond(&storage);
        let graph = CommitGraph::new(&storage, CancellationToken::new());

        let ids: Vec<ObjectId> = graph
            .first_parent_chain(m, None)
            .unwrap()
            .iter()
            .map(|c| c.id)
            .collect();
        assert_eq!(ids, vec![m, c, b, a]);
        assert_eq!(graph.first_parent_chain(m, Some(2)).unwrap().len(), 2);
    }

    #[test]
    fn test_cancelled_walk() {
        let storage = MemoryStorage::new();
        let [_, _, _, _, _, m] = diamond(&storage);
        let token = CancellationToken::new();
        token.cancel();
        let graph = CommitGraph::new(&storage, token);
        assert!(matches!(graph.ancestors(m), Err(DbvcError::Cancelled)));
    }

    #[test]
    fn test_missing_parent_reported() {
        let storage = MemoryStorage::new();
        let ghost = ObjectId::from_bytes([3; 32]);
        let child = add(&storage, &[ghost], "orphan", 1);
        let graph = CommitGraph::new(&storage, CancellationToken::new());
        assert!(matches!(
            graph.ancestors(child),
            Err(DbvcError::CommitNotFound(_))
        ));
    }
}
