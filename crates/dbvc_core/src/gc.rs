//! Garbage collection of unreachable commits and snapshots.
//!
//! Marking walks the full commit DAG from every root (branches, tags,
//! stashes and an active bisect session); the storage backend then sweeps
//! whatever is left and older than the grace period.

use crate::error::Result;
use crate::object_id::ObjectId;
use crate::repo::DbvcRepo;
use crate::storage::{PrunePolicy, StorageProvider};
use std::collections::HashSet;
use tracing::{debug, info};

const MILLIS_PER_DAY: i64 = 86_400_000;

/// Options for [`DbvcRepo::gc`].
#[derive(Debug, Clone, Default)]
pub struct GcConfig {
    /// Report what would be deleted without deleting.
    pub dry_run: bool,
    /// Keep unreachable objects younger than this many days
    /// (default: `core.gc_grace_period_days`).
    pub grace_period_days: Option<u32>,
    /// Ignore the grace period.
    pub aggressive: bool,
}

/// Outcome of a collection.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct GcReport {
    /// Commits reachable from a root.
    pub reachable_commits: usize,
    /// Snapshots reachable from a root.
    pub reachable_snapshots: usize,
    /// Objects the backend examined.
    pub objects_scanned: usize,
    /// Objects deleted (or that would be, in a dry run).
    pub objects_deleted: usize,
    /// Bytes freed, where the backend can tell.
    pub bytes_freed: u64,
    /// Non-fatal problems met while sweeping.
    pub errors: Vec<String>,
    /// Whether this was a dry run.
    pub dry_run: bool,
}

/// Progress events reported by [`DbvcRepo::gc_with_progress`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GcProgress {
    /// Marking; commits reached so far.
    Marking {
        /// Reachable commits found so far.
        commits: usize,
    },
    /// Handing the reachable set to the backend.
    Sweeping {
        /// Objects to keep.
        keep: usize,
    },
    /// Finished.
    Done {
        /// Objects deleted.
        deleted: usize,
    },
}

impl<S: StorageProvider> DbvcRepo<S> {
    /// Deletes unreachable objects.
    pub fn gc(&mut self, config: &GcConfig) -> Result<GcReport> {
        let _lock = self.storage.lock()?;
        self.gc_unlocked(config, None)
    }

    /// [`DbvcRepo::gc`], reporting progress to `progress`.
    pub fn gc_with_progress(&mut self, config: &GcConfig, progress: &dyn Fn(GcProgress)) -> Result<GcReport> {
        let _lock = self.storage.lock()?;
        self.gc_unlocked(config, Some(progress))
    }

    pub(crate) fn gc_unlocked(&self, config: &GcConfig, progress: Option<&dyn Fn(GcProgress)>) -> Result<GcReport> {
        let notify = |event: GcProgress| {
            if let Some(progress) = progress {
                progress(event);
            }
        };

        let (commits, snapshots) = self.reachable(&notify)?;
        let mut keep: HashSet<ObjectId> = commits.iter().copied().collect();
        keep.extend(snapshots.iter().copied());
        notify(GcProgress::Sweeping { keep: keep.len() });

        let grace_days = match config.grace_period_days {
            Some(days) => days,
            None => self.storage.get_config()?.core.gc_grace_period_days,
        };
        let policy = PrunePolicy {
            dry_run: config.dry_run,
            grace_period_ms: i64::from(grace_days) * MILLIS_PER_DAY,
            aggressive: config.aggressive,
            now: self.now(),
        };
        let pruned = self.storage.prune_objects(&keep, &policy)?;

        let report = GcReport {
            reachable_commits: commits.len(),
            reachable_snapshots: snapshots.len(),
            objects_scanned: pruned.objects_scanned,
            objects_deleted: pruned.objects_deleted,
            bytes_freed: pruned.bytes_freed,
            errors: pruned.errors,
            dry_run: config.dry_run,
        };
        notify(GcProgress::Done {
            deleted: report.objects_deleted,
        });
        info!(
            reachable = report.reachable_commits,
            deleted = report.objects_deleted,
            dry_run = report.dry_run,
            "Garbage collection finished"
        );
        Ok(report)
    }

    /// Commits and snapshots reachable from every root.
    fn reachable(&self, notify: &dyn Fn(GcProgress)) -> Result<(HashSet<ObjectId>, HashSet<ObjectId>)> {
        let mut roots: Vec<ObjectId> = Vec::new();
        let mut snapshots: HashSet<ObjectId> = HashSet::new();

        roots.extend(self.storage.list_branches()?.into_iter().filter_map(|b| b.commit_id));
        roots.extend(self.storage.list_tags(None)?.into_iter().map(|t| t.commit_id));
        for stash in self.storage.list_stashes()? {
            roots.extend(stash.parent_commit_id);
            snapshots.extend(stash.snapshot_id);
        }
        if let Some(session) = self.storage.get_bisect()? {
            roots.extend(session.good_commits);
            roots.extend(session.bad_commits);
            roots.extend(session.remaining_commits);
            roots.extend(session.skipped_commits);
            roots.extend(session.current_commit);
        }
        debug!(roots = roots.len(), "Marking reachable objects");

        let graph = self.graph();
        let mut commits: HashSet<ObjectId> = HashSet::new();
        for root in roots {
            if commits.contains(&root) {
                continue;
            }
            commits.extend(graph.ancestors(root)?);
            notify(GcProgress::Marking {
                commits: commits.len(),
            });
        }
        for id in &commits {
            snapshots.insert(graph.commit(*id)?.tree_id);
        }
        Ok((commits, snapshots))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::snapshot::{row, DatabaseSnapshot, Value};
    use crate::storage::MemoryStorage;
    use crate::types::Author;
    use std::cell::RefCell;

    fn repo() -> DbvcRepo<MemoryStorage> {
        DbvcRepo::with_storage(MemoryStorage::new()).unwrap()
    }

    fn snap(i: i64) -> DatabaseSnapshot {
        DatabaseSnapshot::empty().with_row("t", row([("v", Value::from(i))]))
    }

    #[test]
    fn test_keeps_everything_reachable() {
        let mut repo = repo();
        let author = Author::new("Ada", "ada@example.com");
        repo.commit("c1", &author, vec![], &snap(1)).unwrap();
        repo.commit("c2", &author, vec![], &snap(2)).unwrap();

        let report = repo
            .gc(&GcConfig {
                aggressive: true,
                ..Default::default()
            })
            .unwrap();
        assert_eq!(report.reachable_commits, 2);
        assert_eq!(report.reachable_snapshots, 2);
        assert_eq!(report.objects_deleted, 0);
    }

    #[test]
    fn test_deleted_branch_objects_collected() {
        let mut repo = repo();
        let author = Author::new("Ada", "ada@example.com");
        repo.commit("base", &author, vec![], &snap(1)).unwrap();
        repo.create_branch("topic", None).unwrap();
        repo.checkout("topic").unwrap();
        let orphan = repo.commit("topic work", &author, vec![], &snap(2)).unwrap();
        repo.checkout("main").unwrap();
        repo.delete_branch("topic", true).unwrap();

        // Auto gc is off by default
        assert!(repo.storage().get_commit(&orphan.id).unwrap().is_some());

        let dry = repo
            .gc(&GcConfig {
                dry_run: true,
                aggressive: true,
                ..Default::default()
            })
            .unwrap();
        assert_eq!(dry.objects_deleted, 2);
        assert!(repo.storage().get_commit(&orphan.id).unwrap().is_some());

        let events = RefCell::new(Vec::new());
        let report = repo
            .gc_with_progress(
                &GcConfig {
                    aggressive: true,
                    ..Default::default()
                },
                &|e| events.borrow_mut().push(e),
            )
            .unwrap();
        assert_eq!(report.objects_deleted, 2);
        assert!(repo.storage().get_commit(&orphan.id).unwrap().is_none());
        assert_eq!(
            events.borrow().last(),
            Some(&GcProgress::Done { deleted: 2 })
        );
    }

    #[test]
    fn test_stash_and_tag_roots() {
        let mut repo = repo();
        let author = Author::new("Ada", "ada@example.com");
        repo.commit("base", &author, vec![], &snap(1)).unwrap();
        repo.create_branch("release", None).unwrap();
        repo.checkout("release").unwrap();
        let tagged = repo.commit("release", &author, vec![], &snap(2)).unwrap();
        repo.create_tag("v1", Some(tagged.id), None, None).unwrap();
        repo.checkout("main").unwrap();
        repo.delete_branch("release", true).unwrap();

        let stashed = snap(99);
        repo.stash_push("wip", &author, vec![], Some(&stashed)).unwrap();

        let report = repo
            .gc(&GcConfig {
                aggressive: true,
                ..Default::default()
            })
            .unwrap();
        assert_eq!(report.objects_deleted, 0);
        assert!(repo.storage().get_commit(&tagged.id).unwrap().is_some());
        assert!(repo
            .storage()
            .get_snapshot(&stashed.tree_id().unwrap())
            .unwrap()
            .is_some());
    }
}
