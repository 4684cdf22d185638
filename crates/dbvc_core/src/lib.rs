//! dbvc Core Library
//!
//! Git-style version control for database state, providing:
//! - Content-addressed commits over full database snapshots
//! - Branches, tags, stash and an append-only reflog
//! - Schema- and row-level diff with three-way merge, cherry-pick and rebase
//! - Bisect, blame and portable patches
//!
//! The core never talks to a database. A host captures the live state as a
//! [`DatabaseSnapshot`] before committing and applies the snapshot returned
//! by `checkout` or `merge` afterwards.
//!
//! # Quick Start
//!
//! ```
//! use dbvc_core::{row, Author, ColumnDefinition, DatabaseSnapshot, DbvcRepo, MemoryStorage,
//!     TableDefinition, Value};
//!
//! let mut repo = DbvcRepo::with_storage(MemoryStorage::new()).unwrap();
//! let ada = Author::new("Ada", "ada@example.com");
//!
//! let schema = DatabaseSnapshot::empty().with_table(
//!     "users",
//!     TableDefinition::new(vec![ColumnDefinition::new("id", "integer")], &["id"]),
//! );
//! let first = repo.commit_snapshot("create users", &ada, &schema).unwrap();
//!
//! let data = schema.clone().with_row("users", row([("id", Value::from(1))]));
//! let second = repo.commit_snapshot("add a user", &ada, &data).unwrap();
//!
//! assert_eq!(second.parent_ids, vec![first.id]);
//! assert_eq!(repo.diff(first.id, second.id).unwrap().summary.insertions, 1);
//! ```
//!
//! # Features
//!
//! ## Branching and Merging
//!
//! Branches merge three-way; changes to different rows, or to different
//! columns of one row, combine without conflicts:
//!
//! ```
//! use dbvc_core::{row, Author, DatabaseSnapshot, DbvcRepo, MemoryStorage, MergeKind,
//!     MergeOptions, Value};
//!
//! let mut repo = DbvcRepo::with_storage(MemoryStorage::new()).unwrap();
//! let ada = Author::new("Ada", "ada@example.com");
//! let base = DatabaseSnapshot::empty().with_row("notes", row([("text", Value::from("a"))]));
//! repo.commit_snapshot("base", &ada, &base).unwrap();
//!
//! repo.create_branch("feature", None).unwrap();
//! repo.checkout("feature").unwrap();
//! let feature = base.clone().with_row("notes", row([("text", Value::from("b"))]));
//! repo.commit_snapshot("feature work", &ada, &feature).unwrap();
//!
//! repo.checkout("main").unwrap();
//! let result = repo.merge("feature", &MergeOptions::default()).unwrap();
//! assert_eq!(result.kind, MergeKind::FastForward);
//! ```
//!
//! ## Persistent Repositories
//!
//! [`FileStorage`] keeps everything under `.dbvc/`, with commits and
//! snapshots in a zstd-compressed, BLAKE3-verified object store:
//!
//! ```
//! use dbvc_core::{Author, DatabaseSnapshot, DbvcRepo};
//! use tempfile::TempDir;
//!
//! let tmp = TempDir::new().unwrap();
//! let mut repo = DbvcRepo::init(tmp.path()).unwrap();
//! let commit = repo
//!     .commit_snapshot("initial", &Author::new("Ada", "ada@example.com"), &DatabaseSnapshot::empty())
//!     .unwrap();
//!
//! let reopened = DbvcRepo::open(tmp.path()).unwrap();
//! assert_eq!(reopened.head().unwrap(), Some(commit.id));
//! ```

mod bisect;
mod blame;
mod config;
mod diff;
mod error;
mod gc;
mod graph;
mod merge;
mod object_id;
mod patch;
mod repo;
mod snapshot;
mod stash;
mod storage;
mod types;
mod verify;

pub use blame::{BlameLine, BlameResult, Contributor};
pub use config::{
    CoreConfig, LogConfig, MergeConfig, RepositoryConfig, UserConfig, DEFAULT_BRANCH,
};
pub use diff::{diff_snapshots, Diff, DiffSummary};
pub use error::{DbvcError, Result};
pub use gc::{GcConfig, GcProgress, GcReport};
pub use graph::{CancellationToken, CommitGraph};
pub use merge::{
    merge_snapshots, CherryPickOptions, CherryPickResult, ConflictKind, MergeConflict, MergeKind,
    MergeOptions, MergeResult, MergeStrategy, RebaseOptions, RebaseResult, ThreeWayMerge,
};
pub use object_id::{ObjectId, ObjectKind};
pub use patch::{
    export_patch, ApplyPatchOptions, ApplyPatchResult, Patch, PatchCommit, PatchConflict,
    PATCH_VERSION,
};
pub use repo::{validate_ref_name, DbvcRepo, LogOptions, MAX_REF_NAME_LEN};
pub use snapshot::{
    format_row, row, row_hash_key, row_key, ColumnDefinition, DatabaseSnapshot, ForeignKey,
    IndexDefinition, Row, SchemaDefinition, TableData, TableDefinition, Value, ViewDefinition,
    HASH_KEY_PREFIX,
};
pub use stash::STASH_REF;
pub use storage::{
    glob_match, FileStorage, MemoryStorage, ObjectInfo, ObjectStore, PrunePolicy, PruneReport, RedbStorage,
    RepoLock, StorageProvider, REPO_DIR,
};
pub use types::*;
pub use verify::{VerifyConfig, VerifyIssue, VerifyReport};

/// Source of the current time in Unix milliseconds.
///
/// Any `Fn() -> i64` closure qualifies, which keeps tests deterministic:
///
/// ```
/// use dbvc_core::{DbvcRepo, MemoryStorage};
///
/// let repo = DbvcRepo::with_storage(MemoryStorage::new())
///     .unwrap()
///     .with_time_provider(|| 1_700_000_000_000);
/// # let _ = repo;
/// ```
pub trait TimeProvider: Send + Sync {
    /// Current time.
    fn now_millis(&self) -> i64;
}

impl<F> TimeProvider for F
where
    F: Fn() -> i64 + Send + Sync,
{
    fn now_millis(&self) -> i64 {
        self()
    }
}
