//! Storage provider abstraction and its backends.
//!
//! Everything the engine persists goes through [`StorageProvider`]. Three
//! backends ship with the crate:
//!
//! - [`FileStorage`]: a `.dbvc/` directory with a content-addressed object
//!   store, JSON ref files and a line-delimited reflog.
//! - [`RedbStorage`]: a single embedded redb database file.
//! - [`MemoryStorage`]: mutex-guarded maps, for tests and embedding.

mod file;
mod lock;
mod memory;
mod object_store;
mod redb_store;

pub use self::file::{FileStorage, REPO_DIR};
pub use self::lock::RepoLock;
pub use self::memory::MemoryStorage;
pub use self::object_store::{ObjectInfo, ObjectStore};
pub use self::redb_store::RedbStorage;

use crate::config::RepositoryConfig;
use crate::error::Result;
use crate::object_id::ObjectId;
use crate::snapshot::DatabaseSnapshot;
use crate::types::{BisectSession, Branch, Commit, ReflogEntry, ReflogQuery, Stash, Tag};
use std::collections::HashSet;

/// What [`StorageProvider::prune_objects`] may delete.
#[derive(Debug, Clone, Default)]
pub struct PrunePolicy {
    /// Report only.
    pub dry_run: bool,
    /// Objects younger than this (milliseconds) are kept.
    pub grace_period_ms: i64,
    /// Ignore the grace period.
    pub aggressive: bool,
    /// Current time (Unix milliseconds).
    pub now: i64,
}

impl PrunePolicy {
    /// True if an unreachable object stored at `stored_at` may go.
    pub fn expired(&self, stored_at: i64) -> bool {
        self.aggressive || self.now.saturating_sub(stored_at) >= self.grace_period_ms
    }
}

/// Outcome of pruning.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PruneReport {
    /// Objects examined.
    pub objects_scanned: usize,
    /// Objects deleted (or that would be, in a dry run).
    pub objects_deleted: usize,
    /// Bytes freed, where the backend can tell.
    pub bytes_freed: u64,
    /// Non-fatal problems.
    pub errors: Vec<String>,
}

/// Durable persistence for every repository entity.
///
/// Methods take `&self`; backends synchronize internally. Lookups of
/// absent entities return `Ok(None)`; `Err` is reserved for storage
/// failures.
pub trait StorageProvider: Send + Sync {
    /// Stores a commit under its id.
    fn save_commit(&self, commit: &Commit) -> Result<()>;
    /// Loads a commit.
    fn get_commit(&self, id: &ObjectId) -> Result<Option<Commit>>;
    /// Ids of every stored commit.
    fn list_commits(&self) -> Result<Vec<ObjectId>>;

    /// Creates or replaces a branch record.
    fn save_branch(&self, branch: &Branch) -> Result<()>;
    /// Loads a branch.
    fn get_branch(&self, name: &str) -> Result<Option<Branch>>;
    /// All branches, sorted by name.
    fn list_branches(&self) -> Result<Vec<Branch>>;
    /// Removes a branch; false if it did not exist.
    fn delete_branch(&self, name: &str) -> Result<bool>;

    /// Creates or replaces a tag record.
    fn save_tag(&self, tag: &Tag) -> Result<()>;
    /// Loads a tag.
    fn get_tag(&self, name: &str) -> Result<Option<Tag>>;
    /// Tags whose name matches the glob `filter` (`*`, `?`), sorted by name.
    fn list_tags(&self, filter: Option<&str>) -> Result<Vec<Tag>>;
    /// Removes a tag; false if it did not exist.
    fn delete_tag(&self, name: &str) -> Result<bool>;

    /// Creates or replaces a stash entry.
    fn save_stash(&self, stash: &Stash) -> Result<()>;
    /// Loads a stash entry.
    fn get_stash(&self, id: &str) -> Result<Option<Stash>>;
    /// All stash entries, most recent first.
    fn list_stashes(&self) -> Result<Vec<Stash>>;
    /// Removes a stash entry; false if it did not exist.
    fn delete_stash(&self, id: &str) -> Result<bool>;

    /// Appends to the reflog.
    fn add_reflog_entry(&self, entry: &ReflogEntry) -> Result<()>;
    /// Reads the reflog, most recent first.
    fn get_reflog(&self, query: &ReflogQuery) -> Result<Vec<ReflogEntry>>;

    /// Stores a snapshot under its tree id.
    fn save_snapshot(&self, tree_id: &ObjectId, snapshot: &DatabaseSnapshot) -> Result<()>;
    /// Loads a snapshot.
    fn get_snapshot(&self, tree_id: &ObjectId) -> Result<Option<DatabaseSnapshot>>;
    /// Ids of every stored snapshot.
    fn list_snapshots(&self) -> Result<Vec<ObjectId>>;

    /// Loads the configuration (defaults if never saved).
    fn get_config(&self) -> Result<RepositoryConfig>;
    /// Persists the configuration.
    fn save_config(&self, config: &RepositoryConfig) -> Result<()>;

    /// Persists the active bisect session.
    fn save_bisect(&self, session: &BisectSession) -> Result<()>;
    /// Loads the active bisect session.
    fn get_bisect(&self) -> Result<Option<BisectSession>>;
    /// Removes the active bisect session.
    fn clear_bisect(&self) -> Result<()>;

    /// Takes the repository write lock; released when the guard drops.
    fn lock(&self) -> Result<RepoLock>;

    /// Deletes commits and snapshots not in `keep` that the policy allows.
    fn prune_objects(&self, keep: &HashSet<ObjectId>, policy: &PrunePolicy) -> Result<PruneReport> {
        let _ = (keep, policy);
        Ok(PruneReport::default())
    }
}

/// Glob match supporting `*` (any run) and `?` (one character).
pub fn glob_match(pattern: &str, name: &str) -> bool {
    let p: Vec<char> = pattern.chars().collect();
    let n: Vec<char> = name.chars().collect();
    let (mut pi, mut ni) = (0, 0);
    let mut star: Option<(usize, usize)> = None;

    while ni < n.len() {
        if pi < p.len() && (p[pi] == '?' || p[pi] == n[ni]) {
            pi += 1;
            ni += 1;
        } else if pi < p.len() && p[pi] == '*' {
            star = Some((pi, ni));
            pi += 1;
        } else if let Some((sp, sn)) = star {
            pi = sp + 1;
            ni = sn + 1;
            star = Some((sp, sn + 1));
        } else {
            return false;
        }
    }

    p[pi..].iter().all(|c| *c == '*')
}

/// Shared tag filter for backends.
pub(crate) fn tag_filter(filter: Option<&str>, name: &str) -> bool {
    filter.map_or(true, |f| glob_match(f, name))
}
