//! Filesystem-backed storage under a `.dbvc/` directory.

use super::lock::RepoLock;
use super::object_store::ObjectStore;
use super::{tag_filter, PrunePolicy, PruneReport, StorageProvider};
use crate::config::RepositoryConfig;
use crate::error::{DbvcError, Result};
use crate::object_id::{encode_object, ObjectId, ObjectKind};
use crate::snapshot::DatabaseSnapshot;
use crate::types::{BisectSession, Branch, Commit, ReflogEntry, ReflogQuery, Stash, Tag};
use serde::{de::DeserializeOwned, Serialize};
use std::collections::HashSet;
use std::fs::{self, File, OpenOptions};
use std::io::{BufRead, BufReader, Write};
use std::path::{Path, PathBuf};
use std::sync::Mutex;
use std::time::UNIX_EPOCH;
use tracing::{debug, warn};

/// Name of the repository directory inside the working root.
pub const REPO_DIR: &str = ".dbvc";

/// Filesystem-backed storage.
///
/// Layout:
///
/// ```text
/// .dbvc/config.toml           repository configuration
/// .dbvc/objects/<ab>/<hex>    commits and snapshots (content-addressed)
/// .dbvc/refs/heads/<name>     branch records (json)
/// .dbvc/refs/tags/<name>      tag records (json)
/// .dbvc/stash/<id>.json       stash entries
/// .dbvc/logs/reflog.jsonl     append-only reflog
/// .dbvc/BISECT                active bisect session
/// .dbvc/LOCK                  writer lock
/// ```
///
/// Every record write is atomic (temp file + fsync + rename).
pub struct FileStorage {
    dir: PathBuf,
    objects: ObjectStore,
    /// Serializes reflog appends from this process.
    reflog_guard: Mutex<()>,
}

impl FileStorage {
    /// Creates the directory structure under `root/.dbvc`.
    ///
    /// # Errors
    ///
    /// Returns `AlreadyInitialized` if the directory exists.
    pub fn create(root: impl AsRef<Path>) -> Result<Self> {
        let dir = root.as_ref().join(REPO_DIR);
        if dir.exists() {
            return Err(DbvcError::AlreadyInitialized(dir));
        }

        for sub in ["objects", "refs/heads", "refs/tags", "stash", "logs"] {
            fs::create_dir_all(dir.join(sub))?;
        }
        fs::write(dir.join(".gitignore"), "LOCK\n*.tmp\n")?;
        RepositoryConfig::default().save(&dir)?;

        debug!(path = %dir.display(), "Created repository directory");
        Ok(Self::at(dir))
    }

    /// Opens an existing `root/.dbvc`.
    ///
    /// # Errors
    ///
    /// Returns `NotARepository` if the directory is missing.
    pub fn open(root: impl AsRef<Path>) -> Result<Self> {
        let dir = root.as_ref().join(REPO_DIR);
        if !dir.is_dir() {
            return Err(DbvcError::NotARepository(root.as_ref().to_path_buf()));
        }
        Ok(Self::at(dir))
    }

    fn at(dir: PathBuf) -> Self {
        Self {
            objects: ObjectStore::new(dir.join("objects")),
            dir,
            reflog_guard: Mutex::new(()),
        }
    }

    /// The `.dbvc` directory.
    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// The object store holding commits and snapshots.
    pub fn object_store(&self) -> &ObjectStore {
        &self.objects
    }

    fn branch_path(&self, name: &str) -> PathBuf {
        self.dir.join("refs/heads").join(name)
    }

    fn tag_path(&self, name: &str) -> PathBuf {
        self.dir.join("refs/tags").join(name)
    }

    fn stash_path(&self, id: &str) -> PathBuf {
        self.dir.join("stash").join(format!("{}.json", id))
    }

    fn reflog_path(&self) -> PathBuf {
        self.dir.join("logs/reflog.jsonl")
    }

    fn bisect_path(&self) -> PathBuf {
        self.dir.join("BISECT")
    }

    fn list_objects_of(&self, kind: ObjectKind) -> Result<Vec<ObjectId>> {
        let mut ids = Vec::new();
        for info in self.objects.list_all_objects()? {
            match self.objects.kind_of(info.id) {
                Ok(Some(k)) if k == kind => ids.push(info.id),
                Ok(_) => {}
                Err(e) => warn!(object = %info.id, error = %e, "Skipping unreadable object"),
            }
        }
        Ok(ids)
    }
}

/// Writes `value` as pretty JSON to `path` atomically.
fn write_json_atomic<T: Serialize>(path: &Path, value: &T) -> Result<()> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)?;
    }

    let json =
        serde_json::to_vec_pretty(value).map_err(|e| DbvcError::Serialization(e.to_string()))?;

    let mut tmp_name = path.as_os_str().to_owned();
    tmp_name.push(".tmp");
    let tmp_path = PathBuf::from(tmp_name);
    {
        let mut file = File::create(&tmp_path)?;
        file.write_all(&json)?;
        file.sync_all()?;
    }

    fs::rename(&tmp_path, path)?;

    #[cfg(unix)]
    {
        if let Some(parent) = path.parent() {
            if let Ok(dir_file) = File::open(parent) {
                let _ = dir_file.sync_all();
            }
        }
    }

    Ok(())
}

/// Reads a JSON record; `None` if the file does not exist.
fn read_json<T: DeserializeOwned>(path: &Path) -> Result<Option<T>> {
    if !path.is_file() {
        return Ok(None);
    }
    let content = fs::read(path)?;
    serde_json::from_slice(&content)
        .map(Some)
        .map_err(|e| DbvcError::InvalidRef {
            path: path.to_path_buf(),
            reason: e.to_string(),
        })
}

fn remove_if_exists(path: &Path) -> Result<bool> {
    match fs::remove_file(path) {
        Ok(()) => Ok(true),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(false),
        Err(e) => Err(e.into()),
    }
}

/// Recursively collects JSON records under `dir`, skipping temp files.
fn collect_records<T: DeserializeOwned>(dir: &Path, out: &mut Vec<T>) -> Result<()> {
    if !dir.exists() {
        return Ok(());
    }

    for entry in fs::read_dir(dir)? {
        let path = entry?.path();

        if path.is_dir() {
            collect_records(&path, out)?;
        } else if path.extension().and_then(|e| e.to_str()) != Some("tmp") {
            if let Some(record) = read_json(&path)? {
                out.push(record);
            }
        }
    }

    Ok(())
}

/// Removes empty directories left behind by nested ref names.
fn prune_empty_parents(path: &Path, stop: &Path) {
    let mut current = path.parent();
    while let Some(dir) = current {
        if dir == stop || fs::remove_dir(dir).is_err() {
            break;
        }
        current = dir.parent();
    }
}

impl StorageProvider for FileStorage {
    fn save_commit(&self, commit: &Commit) -> Result<()> {
        let (id, payload) = commit.encode()?;
        self.objects.put(id, ObjectKind::Commit, &payload)
    }

    fn get_commit(&self, id: &ObjectId) -> Result<Option<Commit>> {
        match self.objects.get(*id, ObjectKind::Commit)? {
            Some(payload) => Commit::decode(*id, &payload).map(Some),
            None => Ok(None),
        }
    }

    fn list_commits(&self) -> Result<Vec<ObjectId>> {
        self.list_objects_of(ObjectKind::Commit)
    }

    fn save_branch(&self, branch: &Branch) -> Result<()> {
        write_json_atomic(&self.branch_path(&branch.name), branch)
    }

    fn get_branch(&self, name: &str) -> Result<Option<Branch>> {
        read_json(&self.branch_path(name))
    }

    fn list_branches(&self) -> Result<Vec<Branch>> {
        let mut branches: Vec<Branch> = Vec::new();
        collect_records(&self.dir.join("refs/heads"), &mut branches)?;
        branches.sort_by(|a, b| a.name.cmp(&b.name));
        Ok(branches)
    }

    fn delete_branch(&self, name: &str) -> Result<bool> {
        let path = self.branch_path(name);
        let removed = remove_if_exists(&path)?;
        prune_empty_parents(&path, &self.dir.join("refs/heads"));
        Ok(removed)
    }

    fn save_tag(&self, tag: &Tag) -> Result<()> {
        write_json_atomic(&self.tag_path(&tag.name), tag)
    }

    fn get_tag(&self, name: &str) -> Result<Option<Tag>> {
        read_json(&self.tag_path(name))
    }

    fn list_tags(&self, filter: Option<&str>) -> Result<Vec<Tag>> {
        let mut tags: Vec<Tag> = Vec::new();
        collect_records(&self.dir.join("refs/tags"), &mut tags)?;
        tags.retain(|t| tag_filter(filter, &t.name));
        tags.sort_by(|a, b| a.name.cmp(&b.name));
        Ok(tags)
    }

    fn delete_tag(&self, name: &str) -> Result<bool> {
        let path = self.tag_path(name);
        let removed = remove_if_exists(&path)?;
        prune_empty_parents(&path, &self.dir.join("refs/tags"));
        Ok(removed)
    }

    fn save_stash(&self, stash: &Stash) -> Result<()> {
        write_json_atomic(&self.stash_path(&stash.id), stash)
    }

    fn get_stash(&self, id: &str) -> Result<Option<Stash>> {
        read_json(&self.stash_path(id))
    }

    fn list_stashes(&self) -> Result<Vec<Stash>> {
        let mut stashes: Vec<Stash> = Vec::new();
        collect_records(&self.dir.join("stash"), &mut stashes)?;
        stashes.sort_by(|a, b| b.created_at.cmp(&a.created_at).then(b.id.cmp(&a.id)));
        Ok(stashes)
    }

    fn delete_stash(&self, id: &str) -> Result<bool> {
        remove_if_exists(&self.stash_path(id))
    }

    fn add_reflog_entry(&self, entry: &ReflogEntry) -> Result<()> {
        let _guard = self
            .reflog_guard
            .lock()
            .map_err(|_| DbvcError::RepositoryLocked)?;

        let path = self.reflog_path();
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }

        let mut line =
            serde_json::to_vec(entry).map_err(|e| DbvcError::Serialization(e.to_string()))?;
        line.push(b'\n');

        let mut file = OpenOptions::new().create(true).append(true).open(&path)?;
        file.write_all(&line)?;
        file.sync_all()?;
        Ok(())
    }

    fn get_reflog(&self, query: &ReflogQuery) -> Result<Vec<ReflogEntry>> {
        let path = self.reflog_path();
        if !path.exists() {
            return Ok(Vec::new());
        }

        let mut entries = Vec::new();
        for (n, line) in BufReader::new(File::open(&path)?).lines().enumerate() {
            let line = line?;
            if line.trim().is_empty() {
                continue;
            }
            match serde_json::from_str::<ReflogEntry>(&line) {
                Ok(entry) => entries.push(entry),
                // A torn final line from a crash is skipped, not fatal
                Err(e) => warn!(line = n + 1, error = %e, "Skipping malformed reflog line"),
            }
        }

        Ok(query.apply(entries.into_iter().rev()))
    }

    fn save_snapshot(&self, tree_id: &ObjectId, snapshot: &DatabaseSnapshot) -> Result<()> {
        let (id, payload) = encode_object(ObjectKind::Snapshot, snapshot)?;
        if id != *tree_id {
            return Err(DbvcError::HashMismatch {
                expected: tree_id.as_hex(),
                actual: id.as_hex(),
            });
        }
        self.objects.put(id, ObjectKind::Snapshot, &payload)
    }

    fn get_snapshot(&self, tree_id: &ObjectId) -> Result<Option<DatabaseSnapshot>> {
        match self.objects.get(*tree_id, ObjectKind::Snapshot)? {
            Some(payload) => postcard::from_bytes(&payload)
                .map(Some)
                .map_err(|e| DbvcError::Deserialization(e.to_string())),
            None => Ok(None),
        }
    }

    fn list_snapshots(&self) -> Result<Vec<ObjectId>> {
        self.list_objects_of(ObjectKind::Snapshot)
    }

    fn get_config(&self) -> Result<RepositoryConfig> {
        RepositoryConfig::load(&self.dir)
    }

    fn save_config(&self, config: &RepositoryConfig) -> Result<()> {
        config.save(&self.dir)
    }

    fn save_bisect(&self, session: &BisectSession) -> Result<()> {
        write_json_atomic(&self.bisect_path(), session)
    }

    fn get_bisect(&self) -> Result<Option<BisectSession>> {
        read_json(&self.bisect_path())
    }

    fn clear_bisect(&self) -> Result<()> {
        remove_if_exists(&self.bisect_path()).map(|_| ())
    }

    fn lock(&self) -> Result<RepoLock> {
        RepoLock::acquire_file(&self.dir.join("LOCK"))
    }

    fn prune_objects(&self, keep: &HashSet<ObjectId>, policy: &PrunePolicy) -> Result<PruneReport> {
        let mut report = PruneReport::default();

        for info in self.objects.list_all_objects()? {
            report.objects_scanned += 1;
            if keep.contains(&info.id) {
                continue;
            }

            let stored_at = info
                .modified
                .duration_since(UNIX_EPOCH)
                .map(|d| d.as_millis() as i64)
                .unwrap_or(policy.now);
            if !policy.expired(stored_at) {
                continue;
            }

            if !policy.dry_run {
                if let Err(e) = self.objects.delete(info.id) {
                    report
                        .errors
                        .push(format!("failed to delete {}: {}", info.id.short(), e));
                    continue;
                }
            }
            report.objects_deleted += 1;
            report.bytes_freed += info.size;
        }

        Ok(report)
    }
}
