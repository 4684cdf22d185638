//! Repository handle providing the main dbvc API.

use crate::config::{RepositoryConfig, DEFAULT_BRANCH};
use crate::diff::{diff_snapshots, Diff};
use crate::error::{DbvcError, Result};
use crate::graph::{CancellationToken, CommitGraph};
use crate::object_id::ObjectId;
use crate::snapshot::DatabaseSnapshot;
use crate::storage::{FileStorage, StorageProvider};
use crate::types::{
    Author, Branch, Change, Commit, ReflogAction, ReflogEntry, ReflogQuery, Signature, Tag,
    TagKind,
};
use crate::TimeProvider;
use std::path::Path;
use std::sync::Arc;
use std::time::{SystemTime, UNIX_EPOCH};
use tracing::{debug, info, warn};

/// Longest accepted branch or tag name.
pub const MAX_REF_NAME_LEN: usize = 255;

/// Options for [`DbvcRepo::log`].
#[derive(Debug, Clone, Default)]
pub struct LogOptions {
    /// Revision to start from (default: HEAD).
    pub from: Option<String>,
    /// Case-insensitive substring of the author's name or email.
    pub author: Option<String>,
    /// Commits at or after this time (Unix milliseconds).
    pub since: Option<i64>,
    /// Commits at or before this time (Unix milliseconds).
    pub until: Option<i64>,
    /// Cap on returned commits (default: `config.log.max_count`).
    pub max_count: Option<usize>,
}

/// dbvc repository handle.
///
/// Tracks the checked-out branch and runs every operation against a
/// [`StorageProvider`]. Mutating operations take `&mut self` and hold the
/// storage lock for their duration.
pub struct DbvcRepo<S: StorageProvider = FileStorage> {
    pub(crate) storage: S,
    /// Cached name of the checked-out branch.
    pub(crate) current_branch: String,
    /// Time provider for testing (None = use system time).
    time_provider: Option<Arc<dyn TimeProvider>>,
    pub(crate) cancel: CancellationToken,
}

impl DbvcRepo<FileStorage> {
    /// Creates a repository in `path/.dbvc` with an empty, protected `main`.
    ///
    /// # Errors
    ///
    /// Returns `AlreadyInitialized` if the repository exists.
    ///
    /// # Examples
    ///
    /// ```no_run
    /// use dbvc_core::DbvcRepo;
    ///
    /// let repo = DbvcRepo::init(".").unwrap();
    /// assert_eq!(repo.current_branch(), "main");
    /// ```
    pub fn init(path: impl AsRef<Path>) -> Result<Self> {
        let storage = FileStorage::create(path)?;
        Self::with_storage(storage)
    }

    /// Opens the repository in `path/.dbvc`.
    ///
    /// # Errors
    ///
    /// Returns `NotARepository` if there is none.
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        let storage = FileStorage::open(path)?;
        Self::with_storage(storage)
    }
}

impl<S: StorageProvider> DbvcRepo<S> {
    /// Wraps a storage provider and runs [`initialize`](Self::initialize).
    pub fn with_storage(storage: S) -> Result<Self> {
        let mut repo = Self {
            storage,
            current_branch: DEFAULT_BRANCH.to_string(),
            time_provider: None,
            cancel: CancellationToken::new(),
        };
        repo.initialize()?;
        Ok(repo)
    }

    /// Sets a custom time provider for testing.
    pub fn with_time_provider(mut self, provider: impl TimeProvider + 'static) -> Self {
        self.time_provider = Some(Arc::new(provider));
        self
    }

    /// Prepares repository state. Idempotent.
    ///
    /// With no branches, creates a protected `main` without commits and
    /// points HEAD at it. Otherwise loads HEAD from the configuration,
    /// repairing it if it names a branch that no longer exists.
    pub fn initialize(&mut self) -> Result<()> {
        let _lock = self.storage.lock()?;
        let mut config = self.storage.get_config()?;
        let branches = self.storage.list_branches()?;

        if branches.is_empty() {
            let mut main = Branch::new(DEFAULT_BRANCH, None);
            main.protected = true;
            self.storage.save_branch(&main)?;
            config.head = DEFAULT_BRANCH.to_string();
            self.storage.save_config(&config)?;
            debug!(branch = DEFAULT_BRANCH, "Initialized repository");
        } else if !branches.iter().any(|b| b.name == config.head) {
            let fallback = branches
                .iter()
                .find(|b| b.name == DEFAULT_BRANCH)
                .unwrap_or(&branches[0])
                .name
                .clone();
            warn!(head = %config.head, fallback = %fallback, "HEAD names a missing branch, repairing");
            config.head = fallback;
            self.storage.save_config(&config)?;
        }

        self.current_branch = config.head;
        Ok(())
    }

    /// The storage provider.
    pub fn storage(&self) -> &S {
        &self.storage
    }

    /// Token that cancels this repository's graph walks.
    pub fn cancellation_token(&self) -> CancellationToken {
        self.cancel.clone()
    }

    /// Current time in Unix milliseconds.
    pub(crate) fn now(&self) -> i64 {
        match &self.time_provider {
            Some(provider) => provider.now_millis(),
            None => SystemTime::now()
                .duration_since(UNIX_EPOCH)
                .map(|d| d.as_millis() as i64)
                .unwrap_or(0),
        }
    }

    pub(crate) fn graph(&self) -> CommitGraph<'_, S> {
        CommitGraph::new(&self.storage, self.cancel.clone())
    }

    /// The repository configuration.
    pub fn config(&self) -> Result<RepositoryConfig> {
        self.storage.get_config()
    }

    /// Replaces the repository configuration. HEAD is kept as is.
    pub fn set_config(&mut self, mut config: RepositoryConfig) -> Result<()> {
        let _lock = self.storage.lock()?;
        config.head = self.current_branch.clone();
        self.storage.save_config(&config)
    }

    /// Name of the checked-out branch.
    pub fn current_branch(&self) -> &str {
        &self.current_branch
    }

    /// Head commit of the checked-out branch, `None` before its first commit.
    pub fn head(&self) -> Result<Option<ObjectId>> {
        Ok(self.get_branch(&self.current_branch)?.commit_id)
    }

    /// Snapshot at HEAD, or an empty snapshot before the first commit.
    pub fn head_snapshot(&self) -> Result<DatabaseSnapshot> {
        match self.head()? {
            Some(id) => self.snapshot_at(id),
            None => Ok(DatabaseSnapshot::empty()),
        }
    }

    /// Loads a commit.
    pub fn get_commit(&self, id: ObjectId) -> Result<Commit> {
        self.storage
            .get_commit(&id)?
            .ok_or_else(|| DbvcError::CommitNotFound(id.as_hex()))
    }

    /// Snapshot recorded by a commit.
    pub fn snapshot_at(&self, id: ObjectId) -> Result<DatabaseSnapshot> {
        let commit = self.get_commit(id)?;
        self.load_snapshot(commit.tree_id)
    }

    pub(crate) fn load_snapshot(&self, tree_id: ObjectId) -> Result<DatabaseSnapshot> {
        self.storage
            .get_snapshot(&tree_id)?
            .ok_or_else(|| DbvcError::SnapshotNotFound(tree_id.as_hex()))
    }

    /// Identity used for reflog entries when the caller names no author.
    pub(crate) fn actor(&self) -> Result<String> {
        Ok(self
            .storage
            .get_config()?
            .author()
            .map(|a| a.key())
            .unwrap_or_default())
    }

    /// Appends a reflog entry unless `core.log_all_ref_updates` is off.
    pub(crate) fn record(
        &self,
        ref_name: &str,
        old: Option<ObjectId>,
        new: Option<ObjectId>,
        action: ReflogAction,
        message: impl Into<String>,
        author: &str,
    ) -> Result<()> {
        if !self.storage.get_config()?.core.log_all_ref_updates {
            return Ok(());
        }
        self.storage.add_reflog_entry(&ReflogEntry {
            id: uuid::Uuid::new_v4().to_string(),
            ref_name: ref_name.to_string(),
            old_commit_id: old,
            new_commit_id: new,
            action,
            message: message.into(),
            author: author.to_string(),
            timestamp: self.now(),
        })
    }

    /// Moves a branch pointer.
    pub(crate) fn move_branch(&self, name: &str, target: Option<ObjectId>) -> Result<Option<ObjectId>> {
        let mut branch = self.get_branch(name)?;
        let old = branch.commit_id;
        branch.commit_id = target;
        self.storage.save_branch(&branch)?;
        Ok(old)
    }

    /// Persists `snapshot` and a commit over it. Does not move any branch.
    pub(crate) fn write_commit(
        &self,
        parents: Vec<ObjectId>,
        message: &str,
        author: Signature,
        changes: Vec<Change>,
        snapshot: &DatabaseSnapshot,
    ) -> Result<Commit> {
        let tree_id = snapshot.tree_id()?;
        self.storage.save_snapshot(&tree_id, snapshot)?;

        let commit = Commit::new(
            parents,
            message,
            author,
            self.now(),
            tree_id,
            changes,
            Some(self.current_branch.clone()),
        )?;
        self.storage.save_commit(&commit)?;
        Ok(commit)
    }

    /// Records `snapshot` on the current branch.
    ///
    /// The new commit's parent is the branch head (none for the first
    /// commit); the branch advances and a `COMMIT` reflog entry is written.
    ///
    /// # Examples
    ///
    /// ```
    /// use dbvc_core::{Author, DatabaseSnapshot, DbvcRepo, MemoryStorage};
    ///
    /// let mut repo = DbvcRepo::with_storage(MemoryStorage::new()).unwrap();
    /// let author = Author::new("Ada", "ada@example.com");
    /// let commit = repo
    ///     .commit("initial", &author, vec![], &DatabaseSnapshot::empty())
    ///     .unwrap();
    /// assert_eq!(repo.head().unwrap(), Some(commit.id));
    /// ```
    pub fn commit(
        &mut self,
        message: &str,
        author: &Author,
        changes: Vec<Change>,
        snapshot: &DatabaseSnapshot,
    ) -> Result<Commit> {
        let _lock = self.storage.lock()?;
        self.commit_unlocked(message, author, changes, snapshot)
    }

    fn commit_unlocked(
        &self,
        message: &str,
        author: &Author,
        changes: Vec<Change>,
        snapshot: &DatabaseSnapshot,
    ) -> Result<Commit> {
        let head = self.head()?;
        let signature = Signature::new(author, self.now());
        let commit = self.write_commit(head.into_iter().collect(), message, signature, changes, snapshot)?;

        self.move_branch(&self.current_branch, Some(commit.id))?;
        self.record(
            &self.current_branch,
            head,
            Some(commit.id),
            ReflogAction::Commit,
            format!("commit: {}", commit.summary()),
            &author.key(),
        )?;

        info!(branch = %self.current_branch, commit = %commit.id, "Committed");
        Ok(commit)
    }

    /// Commits `snapshot` with changes derived from the diff against HEAD.
    pub fn commit_snapshot(
        &mut self,
        message: &str,
        author: &Author,
        snapshot: &DatabaseSnapshot,
    ) -> Result<Commit> {
        let _lock = self.storage.lock()?;
        let changes = diff_snapshots(&self.head_snapshot()?, snapshot).to_changes();
        self.commit_unlocked(message, author, changes, snapshot)
    }

    /// Creates a branch at `from` (default: HEAD).
    pub fn create_branch(&mut self, name: &str, from: Option<ObjectId>) -> Result<Branch> {
        let _lock = self.storage.lock()?;
        validate_ref_name(name)?;
        if self.storage.get_branch(name)?.is_some() {
            return Err(DbvcError::BranchAlreadyExists(name.to_string()));
        }

        let start = match from {
            Some(id) => Some(self.get_commit(id)?.id),
            None => self.head()?,
        };

        let branch = Branch::new(name, start);
        self.storage.save_branch(&branch)?;
        self.record(
            name,
            None,
            start,
            ReflogAction::Branch,
            format!("branch: created from {}", self.current_branch),
            &self.actor()?,
        )?;

        info!(branch = %name, commit = ?start, "Created branch");
        Ok(branch)
    }

    /// Switches HEAD to `name`.
    ///
    /// Returns the branch's snapshot for the caller to apply, or `None` if
    /// the branch has no commits yet.
    pub fn checkout(&mut self, name: &str) -> Result<Option<DatabaseSnapshot>> {
        let _lock = self.storage.lock()?;
        let target = self.get_branch(name)?;
        let previous = self.head()?;

        let mut config = self.storage.get_config()?;
        config.head = name.to_string();
        self.storage.save_config(&config)?;
        let from = std::mem::replace(&mut self.current_branch, name.to_string());

        self.record(
            "HEAD",
            previous,
            target.commit_id,
            ReflogAction::Checkout,
            format!("checkout: moving from {} to {}", from, name),
            &self.actor()?,
        )?;
        info!(branch = %name, "Checked out");

        target.commit_id.map(|id| self.snapshot_at(id)).transpose()
    }

    /// Deletes a branch.
    ///
    /// # Errors
    ///
    /// Fails for the current branch, or a protected one unless `force`.
    pub fn delete_branch(&mut self, name: &str, force: bool) -> Result<()> {
        let _lock = self.storage.lock()?;
        if name == self.current_branch {
            return Err(DbvcError::CurrentBranch(name.to_string()));
        }
        let branch = self.get_branch(name)?;
        if branch.protected && !force {
            return Err(DbvcError::ProtectedBranch(name.to_string()));
        }

        self.storage.delete_branch(name)?;
        self.record(
            name,
            branch.commit_id,
            None,
            ReflogAction::Branch,
            "branch: deleted",
            &self.actor()?,
        )?;
        info!(branch = %name, "Deleted branch");

        if self.storage.get_config()?.core.auto_gc {
            let report = self.gc_unlocked(&crate::gc::GcConfig::default(), None)?;
            debug!(deleted = report.objects_deleted, "Auto gc after branch deletion");
        }
        Ok(())
    }

    /// Renames a branch, moving HEAD along if it is checked out.
    pub fn rename_branch(&mut self, old: &str, new: &str) -> Result<Branch> {
        let _lock = self.storage.lock()?;
        validate_ref_name(new)?;
        let mut branch = self.get_branch(old)?;
        if self.storage.get_branch(new)?.is_some() {
            return Err(DbvcError::BranchAlreadyExists(new.to_string()));
        }

        branch.name = new.to_string();
        self.storage.save_branch(&branch)?;
        self.storage.delete_branch(old)?;

        if self.current_branch == old {
            let mut config = self.storage.get_config()?;
            config.head = new.to_string();
            self.storage.save_config(&config)?;
            self.current_branch = new.to_string();
        }

        self.record(
            new,
            branch.commit_id,
            branch.commit_id,
            ReflogAction::Branch,
            format!("branch: renamed {} to {}", old, new),
            &self.actor()?,
        )?;
        Ok(branch)
    }

    /// Marks a branch as protected or not.
    pub fn set_branch_protection(&mut self, name: &str, protected: bool) -> Result<()> {
        let _lock = self.storage.lock()?;
        let mut branch = self.get_branch(name)?;
        branch.protected = protected;
        self.storage.save_branch(&branch)
    }

    /// Sets or clears a branch's upstream.
    pub fn set_upstream(&mut self, name: &str, upstream: Option<&str>) -> Result<()> {
        let _lock = self.storage.lock()?;
        let mut branch = self.get_branch(name)?;
        if let Some(upstream) = upstream {
            self.get_branch(upstream)?;
        }
        branch.upstream = upstream.map(str::to_string);
        self.storage.save_branch(&branch)
    }

    /// All branches, sorted by name.
    pub fn list_branches(&self) -> Result<Vec<Branch>> {
        self.storage.list_branches()
    }

    /// Loads a branch.
    pub fn get_branch(&self, name: &str) -> Result<Branch> {
        self.storage
            .get_branch(name)?
            .ok_or_else(|| DbvcError::BranchNotFound(name.to_string()))
    }

    /// Head of a branch, failing if it has no commits.
    pub(crate) fn branch_head(&self, name: &str) -> Result<ObjectId> {
        self.get_branch(name)?
            .commit_id
            .ok_or_else(|| DbvcError::NoCommits(name.to_string()))
    }

    /// Moves the current branch to `target` and records a `RESET`.
    ///
    /// Used to abort a partially applied rebase.
    pub fn reset(&mut self, target: ObjectId) -> Result<()> {
        let _lock = self.storage.lock()?;
        self.get_commit(target)?;
        let old = self.move_branch(&self.current_branch, Some(target))?;
        self.record(
            &self.current_branch,
            old,
            Some(target),
            ReflogAction::Reset,
            format!("reset: moving to {}", target.short()),
            &self.actor()?,
        )?;
        info!(branch = %self.current_branch, commit = %target, "Reset");
        Ok(())
    }

    /// First-parent history, newest first.
    pub fn log(&self, options: &LogOptions) -> Result<Vec<Commit>> {
        let start = match &options.from {
            Some(rev) => Some(self.resolve(rev)?),
            None => self.head()?,
        };
        let Some(start) = start else {
            return Ok(Vec::new());
        };

        let max_count = match options.max_count {
            Some(n) => n,
            None => self.storage.get_config()?.log.max_count,
        };
        let needle = options.author.as_ref().map(|a| a.to_lowercase());

        let graph = self.graph();
        let mut commits = Vec::new();
        let mut current = Some(start);
        while let Some(id) = current {
            if commits.len() >= max_count {
                break;
            }
            self.cancel.check()?;
            let commit = graph.commit(id)?;
            current = commit.first_parent();

            // Clock skew means an old commit does not end the walk
            if options.since.is_some_and(|t| commit.timestamp < t) {
                continue;
            }
            if options.until.is_some_and(|t| commit.timestamp > t) {
                continue;
            }
            if let Some(needle) = &needle {
                let name = commit.author.name.to_lowercase();
                let email = commit.author.email.to_lowercase();
                if !name.contains(needle) && !email.contains(needle) {
                    continue;
                }
            }
            commits.push(commit);
        }

        debug!(count = commits.len(), "Walked log");
        Ok(commits)
    }

    /// Resolves a revision to a commit id.
    ///
    /// Accepts `HEAD`, a branch name, a tag name, a full id or an
    /// unambiguous id prefix (at least 4 hex chars), each optionally
    /// followed by `~N` to step back N first parents.
    pub fn resolve(&self, rev: &str) -> Result<ObjectId> {
        let (base, back) = match rev.rsplit_once('~') {
            Some((base, n)) if !n.is_empty() && n.chars().all(|c| c.is_ascii_digit()) => {
                let n: usize = n
                    .parse()
                    .map_err(|_| DbvcError::CommitNotFound(rev.to_string()))?;
                (base, n)
            }
            Some((base, "")) => (base, 1),
            _ => (rev, 0),
        };

        let mut id = self.resolve_base(base)?;
        for _ in 0..back {
            id = self
                .get_commit(id)?
                .first_parent()
                .ok_or_else(|| DbvcError::CommitNotFound(rev.to_string()))?;
        }
        Ok(id)
    }

    fn resolve_base(&self, rev: &str) -> Result<ObjectId> {
        if rev == "HEAD" {
            return self.branch_head(&self.current_branch);
        }
        if let Some(branch) = self.storage.get_branch(rev)? {
            return branch
                .commit_id
                .ok_or_else(|| DbvcError::NoCommits(rev.to_string()));
        }
        if let Some(tag) = self.storage.get_tag(rev)? {
            return Ok(tag.commit_id);
        }

        let is_hex = rev.len() >= 4 && rev.chars().all(|c| c.is_ascii_hexdigit());
        if !is_hex {
            return Err(DbvcError::CommitNotFound(rev.to_string()));
        }
        if rev.len() == ObjectId::HEX_LEN {
            let id = ObjectId::from_hex(rev)?;
            return self.get_commit(id).map(|c| c.id);
        }

        let prefix = rev.to_lowercase();
        let mut matches = self
            .storage
            .list_commits()?
            .into_iter()
            .filter(|id| id.matches_prefix(&prefix));
        match (matches.next(), matches.next()) {
            (Some(id), None) => Ok(id),
            (Some(_), Some(_)) => Err(DbvcError::AmbiguousRevision(rev.to_string())),
            (None, _) => Err(DbvcError::CommitNotFound(rev.to_string())),
        }
    }

    /// Creates a tag at `commit` (default: HEAD). A message makes it annotated.
    pub fn create_tag(
        &mut self,
        name: &str,
        commit: Option<ObjectId>,
        message: Option<&str>,
        tagger: Option<&Author>,
    ) -> Result<Tag> {
        let _lock = self.storage.lock()?;
        validate_ref_name(name)?;
        if self.storage.get_tag(name)?.is_some() {
            return Err(DbvcError::TagAlreadyExists(name.to_string()));
        }

        let commit_id = match commit {
            Some(id) => self.get_commit(id)?.id,
            None => self.branch_head(&self.current_branch)?,
        };
        let now = self.now();
        let tag = Tag {
            name: name.to_string(),
            commit_id,
            kind: if message.is_some() {
                TagKind::Annotated
            } else {
                TagKind::Lightweight
            },
            message: message.map(str::to_string),
            tagger: tagger.map(|a| Signature::new(a, now)),
            created_at: now,
        };
        self.storage.save_tag(&tag)?;
        info!(tag = %name, commit = %commit_id, "Created tag");
        Ok(tag)
    }

    /// Deletes a tag.
    pub fn delete_tag(&mut self, name: &str) -> Result<()> {
        let _lock = self.storage.lock()?;
        if !self.storage.delete_tag(name)? {
            return Err(DbvcError::TagNotFound(name.to_string()));
        }
        Ok(())
    }

    /// Loads a tag.
    pub fn get_tag(&self, name: &str) -> Result<Tag> {
        self.storage
            .get_tag(name)?
            .ok_or_else(|| DbvcError::TagNotFound(name.to_string()))
    }

    /// Tags matching a glob (`*`, `?`), sorted by name.
    pub fn list_tags(&self, filter: Option<&str>) -> Result<Vec<Tag>> {
        self.storage.list_tags(filter)
    }

    /// Reads the reflog, most recent first.
    pub fn get_reflog(&self, query: &ReflogQuery) -> Result<Vec<ReflogEntry>> {
        self.storage.get_reflog(query)
    }

    /// Diff between the snapshots of two commits.
    pub fn diff(&self, from: ObjectId, to: ObjectId) -> Result<Diff> {
        let before = self.snapshot_at(from)?;
        let after = self.snapshot_at(to)?;
        Ok(diff_snapshots(&before, &after))
    }
}

/// Checks a branch or tag name.
///
/// Names must be non-empty, at most 255 characters, free of whitespace,
/// control characters and `..`, must not start or end with `/`, and must
/// not be `HEAD`.
pub fn validate_ref_name(name: &str) -> Result<()> {
    let reject = |reason: &str| {
        Err(DbvcError::InvalidName {
            name: name.to_string(),
            reason: reason.to_string(),
        })
    };

    if name.is_empty() {
        return reject("name is empty");
    }
    if name.len() > MAX_REF_NAME_LEN {
        return reject("name is longer than 255 characters");
    }
    if name == "HEAD" {
        return reject("HEAD is reserved");
    }
    if name.contains("..") {
        return reject("name contains '..'");
    }
    if name.starts_with('/') || name.ends_with('/') || name.contains("//") {
        return reject("name has an empty path component");
    }
    if name.chars().any(|c| c.is_whitespace() || c.is_control()) {
        return reject("name contains whitespace or control characters");
    }
    if name.contains('~') || name.contains('\\') {
        return reject("name contains '~' or '\\'");
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::snapshot::{row, ColumnDefinition, TableDefinition, Value};
    use crate::storage::MemoryStorage;
    use std::sync::atomic::{AtomicI64, Ordering};
    use tempfile::TempDir;

    fn repo() -> DbvcRepo<MemoryStorage> {
        let clock = Arc::new(AtomicI64::new(1_000));
        DbvcRepo::with_storage(MemoryStorage::new())
            .unwrap()
            .with_time_provider(move || clock.fetch_add(1_000, Ordering::SeqCst))
    }

    fn author() -> Author {
        Author::new("Ada", "ada@example.com")
    }

    fn snap(n: i64) -> DatabaseSnapshot {
        DatabaseSnapshot::empty()
            .with_table(
                "t",
                TableDefinition::new(vec![ColumnDefinition::new("id", "integer")], &["id"]),
            )
            .with_row("t", row([("id", Value::from(n))]))
    }

    #[test]
    fn test_initialize_creates_protected_main() {
        let repo = repo();
        let branches = repo.list_branches().unwrap();
        assert_eq!(branches.len(), 1);
        assert_eq!(branches[0].name, "main");
        assert!(branches[0].protected);
        assert_eq!(branches[0].commit_id, None);
        assert_eq!(repo.current_branch(), "main");
    }

    #[test]
    fn test_initialize_is_idempotent() {
        let storage = MemoryStorage::new();
        let mut repo = DbvcRepo::with_storage(storage.clone()).unwrap();
        repo.create_branch("dev", None).unwrap();
        repo.checkout("dev").unwrap();

        let reopened = DbvcRepo::with_storage(storage).unwrap();
        assert_eq!(reopened.current_branch(), "dev");
        assert_eq!(reopened.list_branches().unwrap().len(), 2);
    }

    #[test]
    fn test_commit_chain() {
        let mut repo = repo();
        let mut previous = None;
        for n in 0..4 {
            let c = repo.commit(&format!("c{}", n), &author(), vec![], &snap(n)).unwrap();
            assert_eq!(c.parent_ids, previous.into_iter().collect::<Vec<_>>());
            previous = Some(c.id);
        }
        assert_eq!(repo.head().unwrap(), previous);
        assert_eq!(repo.log(&LogOptions::default()).unwrap().len(), 4);

        let reflog = repo.get_reflog(&ReflogQuery::default()).unwrap();
        assert_eq!(reflog.len(), 4);
        assert!(reflog.iter().all(|e| e.action == ReflogAction::Commit));
    }

    #[test]
    fn test_commit_snapshot_derives_changes() {
        let mut repo = repo();
        repo.commit_snapshot("one", &author(), &snap(1)).unwrap();
        let second = repo.commit_snapshot("two", &author(), &snap(2)).unwrap();
        assert_eq!(second.changes.len(), 2);
        assert_eq!(repo.snapshot_at(second.id).unwrap(), snap(2));
    }

    #[test]
    fn test_branch_lifecycle() {
        let mut repo = repo();
        repo.commit("c1", &author(), vec![], &snap(1)).unwrap();
        let before = repo.list_branches().unwrap();

        repo.create_branch("feature", None).unwrap();
        assert!(matches!(
            repo.create_branch("feature", None),
            Err(DbvcError::BranchAlreadyExists(_))
        ));
        repo.delete_branch("feature", false).unwrap();
        assert_eq!(repo.list_branches().unwrap(), before);

        assert!(matches!(
            repo.delete_branch("main", true),
            Err(DbvcError::CurrentBranch(_))
        ));
    }

    #[test]
    fn test_protected_branch_needs_force() {
        let mut repo = repo();
        repo.create_branch("release", None).unwrap();
        repo.set_branch_protection("release", true).unwrap();
        assert!(matches!(
            repo.delete_branch("release", false),
            Err(DbvcError::ProtectedBranch(_))
        ));
        repo.delete_branch("release", true).unwrap();
    }

    #[test]
    fn test_checkout() {
        let mut repo = repo();
        let c1 = repo.commit("c1", &author(), vec![], &snap(1)).unwrap();
        repo.create_branch("dev", None).unwrap();

        let restored = repo.checkout("dev").unwrap();
        assert_eq!(repo.current_branch(), "dev");
        assert_eq!(restored, Some(snap(1)));
        assert_eq!(repo.config().unwrap().head, "dev");
        assert_eq!(repo.head().unwrap(), Some(c1.id));

        assert!(matches!(
            repo.checkout("nope"),
            Err(DbvcError::BranchNotFound(_))
        ));
        assert_eq!(repo.current_branch(), "dev");
    }

    #[test]
    fn test_checkout_unborn_branch_returns_none() {
        let mut repo = repo();
        repo.create_branch("empty", None).unwrap();
        assert_eq!(repo.checkout("empty").unwrap(), None);
    }

    #[test]
    fn test_rename_current_branch_moves_head() {
        let mut repo = repo();
        repo.create_branch("dev", None).unwrap();
        repo.checkout("dev").unwrap();
        repo.rename_branch("dev", "develop").unwrap();
        assert_eq!(repo.current_branch(), "develop");
        assert!(repo.storage().get_branch("dev").unwrap().is_none());
        assert_eq!(repo.config().unwrap().head, "develop");
    }

    #[test]
    fn test_name_validation() {
        for bad in ["", "HEAD", "a..b", "/x", "x/", "has space", "a~1", "tab\t"] {
            assert!(validate_ref_name(bad).is_err(), "{:?} should be rejected", bad);
        }
        for good in ["main", "feature/login", "v1.0.0", "fix-123_x"] {
            validate_ref_name(good).unwrap();
        }
        assert!(validate_ref_name(&"x".repeat(256)).is_err());
    }

    #[test]
    fn test_resolve() {
        let mut repo = repo();
        let c1 = repo.commit("c1", &author(), vec![], &snap(1)).unwrap();
        let c2 = repo.commit("c2", &author(), vec![], &snap(2)).unwrap();
        repo.create_tag("v1", Some(c1.id), Some("first"), Some(&author()))
            .unwrap();

        assert_eq!(repo.resolve("HEAD").unwrap(), c2.id);
        assert_eq!(repo.resolve("main").unwrap(), c2.id);
        assert_eq!(repo.resolve("v1").unwrap(), c1.id);
        assert_eq!(repo.resolve("HEAD~1").unwrap(), c1.id);
        assert_eq!(repo.resolve(&c1.id.as_hex()).unwrap(), c1.id);
        assert_eq!(repo.resolve(&c2.id.as_hex()[..10]).unwrap(), c2.id);
        assert!(repo.resolve("HEAD~5").is_err());
        assert!(repo.resolve("unknown").is_err());
    }

    #[test]
    fn test_tags() {
        let mut repo = repo();
        assert!(matches!(
            repo.create_tag("v0", None, None, None),
            Err(DbvcError::NoCommits(_))
        ));
        repo.commit("c1", &author(), vec![], &snap(1)).unwrap();

        let light = repo.create_tag("v1.0", None, None, None).unwrap();
        assert_eq!(light.kind, TagKind::Lightweight);
        let annotated = repo
            .create_tag("v1.1", None, Some("release"), Some(&author()))
            .unwrap();
        assert_eq!(annotated.kind, TagKind::Annotated);
        assert!(matches!(
            repo.create_tag("v1.0", None, None, None),
            Err(DbvcError::TagAlreadyExists(_))
        ));

        assert_eq!(repo.list_tags(Some("v1.*")).unwrap().len(), 2);
        repo.delete_tag("v1.0").unwrap();
        assert!(matches!(
            repo.get_tag("v1.0"),
            Err(DbvcError::TagNotFound(_))
        ));
    }

    #[test]
    fn test_log_filters() {
        let mut repo = repo();
        repo.commit("a", &author(), vec![], &snap(1)).unwrap();
        let other = Author::new("Bob", "bob@example.com");
        let b = repo.commit("b", &other, vec![], &snap(2)).unwrap();
        repo.commit("c", &author(), vec![], &snap(3)).unwrap();

        let by_bob = repo
            .log(&LogOptions {
                author: Some("BOB".into()),
                ..Default::default()
            })
            .unwrap();
        assert_eq!(by_bob.len(), 1);
        assert_eq!(by_bob[0].id, b.id);

        let since_b = repo
            .log(&LogOptions {
                since: Some(b.timestamp),
                ..Default::default()
            })
            .unwrap();
        assert_eq!(since_b.len(), 2);

        let capped = repo
            .log(&LogOptions {
                max_count: Some(1),
                ..Default::default()
            })
            .unwrap();
        assert_eq!(capped[0].message, "c");
    }

    #[test]
    fn test_reset() {
        let mut repo = repo();
        let c1 = repo.commit("c1", &author(), vec![], &snap(1)).unwrap();
        repo.commit("c2", &author(), vec![], &snap(2)).unwrap();
        repo.reset(c1.id).unwrap();
        assert_eq!(repo.head().unwrap(), Some(c1.id));

        let last = &repo.get_reflog(&ReflogQuery::default()).unwrap()[0];
        assert_eq!(last.action, ReflogAction::Reset);
    }

    #[test]
    fn test_reflog_can_be_disabled() {
        let mut repo = repo();
        let mut config = repo.config().unwrap();
        config.core.log_all_ref_updates = false;
        repo.set_config(config).unwrap();
        repo.commit("c1", &author(), vec![], &snap(1)).unwrap();
        assert!(repo.get_reflog(&ReflogQuery::default()).unwrap().is_empty());
    }

    #[test]
    fn test_file_backed_repo() {
        let tmp = TempDir::new().unwrap();
        {
            let mut repo = DbvcRepo::init(tmp.path()).unwrap();
            repo.commit("c1", &author(), vec![], &snap(1)).unwrap();
            repo.create_branch("dev", None).unwrap();
            repo.checkout("dev").unwrap();
        }
        let repo = DbvcRepo::open(tmp.path()).unwrap();
        assert_eq!(repo.current_branch(), "dev");
        assert_eq!(repo.head_snapshot().unwrap(), snap(1));
        assert!(!tmp.path().join(".dbvc/LOCK").exists());
    }
}
