//! Storage in a single embedded redb database.

use super::lock::RepoLock;
use super::{tag_filter, StorageProvider};
use crate::config::RepositoryConfig;
use crate::error::{DbvcError, Result};
use crate::object_id::{encode_object, ObjectId, ObjectKind};
use crate::snapshot::DatabaseSnapshot;
use crate::types::{BisectSession, Branch, Commit, ReflogEntry, ReflogQuery, Stash, Tag};
use redb::{Database, ReadableTable, TableDefinition};
use serde::{de::DeserializeOwned, Serialize};
use std::fmt::Display;
use std::path::{Path, PathBuf};
use std::sync::atomic::AtomicBool;
use std::sync::Arc;

/// Storage schema version for migration support.
pub const REDB_SCHEMA_VERSION: u32 = 1;

// Table definitions
const METADATA_TABLE: TableDefinition<&str, u32> = TableDefinition::new("metadata");
const COMMITS_TABLE: TableDefinition<&[u8; 32], &[u8]> = TableDefinition::new("commits");
const SNAPSHOTS_TABLE: TableDefinition<&[u8; 32], &[u8]> = TableDefinition::new("snapshots");
const BRANCHES_TABLE: TableDefinition<&str, &[u8]> = TableDefinition::new("branches");
const TAGS_TABLE: TableDefinition<&str, &[u8]> = TableDefinition::new("tags");
const STASHES_TABLE: TableDefinition<&str, &[u8]> = TableDefinition::new("stashes");
const REFLOG_TABLE: TableDefinition<u64, &[u8]> = TableDefinition::new("reflog");
const STATE_TABLE: TableDefinition<&str, &[u8]> = TableDefinition::new("state");

const CONFIG_KEY: &str = "config";
const BISECT_KEY: &str = "bisect";

type StrTable = TableDefinition<'static, &'static str, &'static [u8]>;
type IdTable = TableDefinition<'static, &'static [u8; 32], &'static [u8]>;

/// Storage backed by one redb file.
///
/// Records are postcard-encoded, except the configuration which is kept
/// as TOML text. Each write is its own transaction. Unreachable objects
/// are not pruned by this backend.
pub struct RedbStorage {
    db: Database,
    path: PathBuf,
    lock_flag: Arc<AtomicBool>,
}

fn db_err<E: Display>(context: &'static str) -> impl FnOnce(E) -> DbvcError {
    move |e| DbvcError::Database(format!("{}: {}", context, e))
}

fn encode<T: Serialize>(value: &T) -> Result<Vec<u8>> {
    postcard::to_allocvec(value).map_err(|e| DbvcError::Serialization(e.to_string()))
}

fn decode<T: DeserializeOwned>(bytes: &[u8]) -> Result<T> {
    postcard::from_bytes(bytes).map_err(|e| DbvcError::Deserialization(e.to_string()))
}

impl RedbStorage {
    /// Opens the database at `path`, creating it and its tables if needed.
    ///
    /// # Errors
    ///
    /// Returns `Database` if the file can't be opened or was written by an
    /// incompatible schema version.
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref().to_path_buf();
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }

        let db = Database::create(&path).map_err(db_err("failed to open database"))?;

        let write_txn = db
            .begin_write()
            .map_err(db_err("failed to begin write transaction"))?;
        {
            let mut meta = write_txn
                .open_table(METADATA_TABLE)
                .map_err(db_err("failed to open metadata table"))?;
            let found = meta
                .get("version")
                .map_err(db_err("failed to read schema version"))?
                .map(|v| v.value());
            match found {
                Some(version) if version != REDB_SCHEMA_VERSION => {
                    return Err(DbvcError::Database(format!(
                        "schema version mismatch: found {}, expected {}",
                        version, REDB_SCHEMA_VERSION
                    )));
                }
                Some(_) => {}
                None => {
                    meta.insert("version", REDB_SCHEMA_VERSION)
                        .map_err(db_err("failed to write schema version"))?;
                }
            }

            // Created up front so read transactions never miss a table
            write_txn.open_table(COMMITS_TABLE).map_err(db_err("failed to create table"))?;
            write_txn.open_table(SNAPSHOTS_TABLE).map_err(db_err("failed to create table"))?;
            write_txn.open_table(BRANCHES_TABLE).map_err(db_err("failed to create table"))?;
            write_txn.open_table(TAGS_TABLE).map_err(db_err("failed to create table"))?;
            write_txn.open_table(STASHES_TABLE).map_err(db_err("failed to create table"))?;
            write_txn.open_table(REFLOG_TABLE).map_err(db_err("failed to create table"))?;
            write_txn.open_table(STATE_TABLE).map_err(db_err("failed to create table"))?;
        }
        write_txn.commit().map_err(db_err("failed to commit"))?;

        Ok(Self {
            db,
            path,
            lock_flag: Arc::new(AtomicBool::new(false)),
        })
    }

    /// Path of the database file.
    pub fn path(&self) -> &Path {
        &self.path
    }

    fn put_str(&self, table: StrTable, key: &str, value: &[u8]) -> Result<()> {
        let write_txn = self
            .db
            .begin_write()
            .map_err(db_err("failed to begin write transaction"))?;
        {
            let mut t = write_txn.open_table(table).map_err(db_err("failed to open table"))?;
            t.insert(key, value).map_err(db_err("failed to insert"))?;
        }
        write_txn.commit().map_err(db_err("failed to commit"))
    }

    fn get_str(&self, table: StrTable, key: &str) -> Result<Option<Vec<u8>>> {
        let read_txn = self
            .db
            .begin_read()
            .map_err(db_err("failed to begin read transaction"))?;
        let t = read_txn.open_table(table).map_err(db_err("failed to open table"))?;
        let value = t
            .get(key)
            .map_err(db_err("failed to read"))?
            .map(|v| v.value().to_vec());
        Ok(value)
    }

    fn remove_str(&self, table: StrTable, key: &str) -> Result<bool> {
        let write_txn = self
            .db
            .begin_write()
            .map_err(db_err("failed to begin write transaction"))?;
        let removed = {
            let mut t = write_txn.open_table(table).map_err(db_err("failed to open table"))?;
            let existed = t.remove(key).map_err(db_err("failed to remove"))?.is_some();
            existed
        };
        write_txn.commit().map_err(db_err("failed to commit"))?;
        Ok(removed)
    }

    /// Values of a string-keyed table in key order.
    fn values_str(&self, table: StrTable) -> Result<Vec<Vec<u8>>> {
        let read_txn = self
            .db
            .begin_read()
            .map_err(db_err("failed to begin read transaction"))?;
        let t = read_txn.open_table(table).map_err(db_err("failed to open table"))?;

        let mut values = Vec::new();
        for entry in t.iter().map_err(db_err("failed to iterate"))? {
            let (_, value) = entry.map_err(db_err("failed to iterate"))?;
            values.push(value.value().to_vec());
        }
        Ok(values)
    }

    fn put_id(&self, table: IdTable, id: &ObjectId, value: &[u8]) -> Result<()> {
        let write_txn = self
            .db
            .begin_write()
            .map_err(db_err("failed to begin write transaction"))?;
        {
            let mut t = write_txn.open_table(table).map_err(db_err("failed to open table"))?;
            t.insert(id.as_bytes(), value).map_err(db_err("failed to insert"))?;
        }
        write_txn.commit().map_err(db_err("failed to commit"))
    }

    fn get_id(&self, table: IdTable, id: &ObjectId) -> Result<Option<Vec<u8>>> {
        let read_txn = self
            .db
            .begin_read()
            .map_err(db_err("failed to begin read transaction"))?;
        let t = read_txn.open_table(table).map_err(db_err("failed to open table"))?;
        let value = t
            .get(id.as_bytes())
            .map_err(db_err("failed to read"))?
            .map(|v| v.value().to_vec());
        Ok(value)
    }

    fn keys_id(&self, table: IdTable) -> Result<Vec<ObjectId>> {
        let read_txn = self
            .db
            .begin_read()
            .map_err(db_err("failed to begin read transaction"))?;
        let t = read_txn.open_table(table).map_err(db_err("failed to open table"))?;

        let mut ids = Vec::new();
        for entry in t.iter().map_err(db_err("failed to iterate"))? {
            let (key, _) = entry.map_err(db_err("failed to iterate"))?;
            ids.push(ObjectId::from_bytes(*key.value()));
        }
        Ok(ids)
    }
}

impl StorageProvider for RedbStorage {
    fn save_commit(&self, commit: &Commit) -> Result<()> {
        let (id, payload) = commit.encode()?;
        self.put_id(COMMITS_TABLE, &id, &payload)
    }

    fn get_commit(&self, id: &ObjectId) -> Result<Option<Commit>> {
        match self.get_id(COMMITS_TABLE, id)? {
            Some(payload) => {
                let commit = Commit::decode(*id, &payload)?;
                let actual = commit.compute_id()?;
                if actual != *id {
                    return Err(DbvcError::HashMismatch {
                        expected: id.as_hex(),
                        actual: actual.as_hex(),
                    });
                }
                Ok(Some(commit))
            }
            None => Ok(None),
        }
    }

    fn list_commits(&self) -> Result<Vec<ObjectId>> {
        self.keys_id(COMMITS_TABLE)
    }

    fn save_branch(&self, branch: &Branch) -> Result<()> {
        self.put_str(BRANCHES_TABLE, &branch.name, &encode(branch)?)
    }

    fn get_branch(&self, name: &str) -> Result<Option<Branch>> {
        self.get_str(BRANCHES_TABLE, name)?
            .map(|b| decode(&b))
            .transpose()
    }

    fn list_branches(&self) -> Result<Vec<Branch>> {
        self.values_str(BRANCHES_TABLE)?
            .iter()
            .map(|b| decode(b))
            .collect()
    }

    fn delete_branch(&self, name: &str) -> Result<bool> {
        self.remove_str(BRANCHES_TABLE, name)
    }

    fn save_tag(&self, tag: &Tag) -> Result<()> {
        self.put_str(TAGS_TABLE, &tag.name, &encode(tag)?)
    }

    fn get_tag(&self, name: &str) -> Result<Option<Tag>> {
        self.get_str(TAGS_TABLE, name)?.map(|b| decode(&b)).transpose()
    }

    fn list_tags(&self, filter: Option<&str>) -> Result<Vec<Tag>> {
        let mut tags = Vec::new();
        for bytes in self.values_str(TAGS_TABLE)? {
            let tag: Tag = decode(&bytes)?;
            if tag_filter(filter, &tag.name) {
                tags.push(tag);
            }
        }
        Ok(tags)
    }

    fn delete_tag(&self, name: &str) -> Result<bool> {
        self.remove_str(TAGS_TABLE, name)
    }

    fn save_stash(&self, stash: &Stash) -> Result<()> {
        self.put_str(STASHES_TABLE, &stash.id, &encode(stash)?)
    }

    fn get_stash(&self, id: &str) -> Result<Option<Stash>> {
        self.get_str(STASHES_TABLE, id)?
            .map(|b| decode(&b))
            .transpose()
    }

    fn list_stashes(&self) -> Result<Vec<Stash>> {
        let mut stashes: Vec<Stash> = self
            .values_str(STASHES_TABLE)?
            .iter()
            .map(|b| decode(b))
            .collect::<Result<_>>()?;
        stashes.sort_by(|a, b| b.created_at.cmp(&a.created_at).then(b.id.cmp(&a.id)));
        Ok(stashes)
    }

    fn delete_stash(&self, id: &str) -> Result<bool> {
        self.remove_str(STASHES_TABLE, id)
    }

    fn add_reflog_entry(&self, entry: &ReflogEntry) -> Result<()> {
        let bytes = encode(entry)?;
        let write_txn = self
            .db
            .begin_write()
            .map_err(db_err("failed to begin write transaction"))?;
        {
            let mut t = write_txn
                .open_table(REFLOG_TABLE)
                .map_err(db_err("failed to open reflog table"))?;
            let next = t
                .last()
                .map_err(db_err("failed to read reflog"))?
                .map(|(k, _)| k.value() + 1)
                .unwrap_or(0);
            t.insert(next, bytes.as_slice())
                .map_err(db_err("failed to append reflog"))?;
        }
        write_txn.commit().map_err(db_err("failed to commit"))
    }

    fn get_reflog(&self, query: &ReflogQuery) -> Result<Vec<ReflogEntry>> {
        let read_txn = self
            .db
            .begin_read()
            .map_err(db_err("failed to begin read transaction"))?;
        let t = read_txn
            .open_table(REFLOG_TABLE)
            .map_err(db_err("failed to open reflog table"))?;

        let mut entries = Vec::new();
        for entry in t.iter().map_err(db_err("failed to iterate reflog"))?.rev() {
            let (_, value) = entry.map_err(db_err("failed to iterate reflog"))?;
            let entry: ReflogEntry = decode(value.value())?;
            if query.matches(&entry) {
                entries.push(entry);
                if query.max_count.is_some_and(|max| entries.len() >= max) {
                    break;
                }
            }
        }
        Ok(entries)
    }

    fn save_snapshot(&self, tree_id: &ObjectId, snapshot: &DatabaseSnapshot) -> Result<()> {
        let (id, payload) = encode_object(ObjectKind::Snapshot, snapshot)?;
        if id != *tree_id {
            return Err(DbvcError::HashMismatch {
                expected: tree_id.as_hex(),
                actual: id.as_hex(),
            });
        }
        self.put_id(SNAPSHOTS_TABLE, &id, &payload)
    }

    fn get_snapshot(&self, tree_id: &ObjectId) -> Result<Option<DatabaseSnapshot>> {
        self.get_id(SNAPSHOTS_TABLE, tree_id)?
            .map(|b| decode(&b))
            .transpose()
    }

    fn list_snapshots(&self) -> Result<Vec<ObjectId>> {
        self.keys_id(SNAPSHOTS_TABLE)
    }

    fn get_config(&self) -> Result<RepositoryConfig> {
        match self.get_str(STATE_TABLE, CONFIG_KEY)? {
            Some(bytes) => {
                let text = String::from_utf8(bytes)
                    .map_err(|e| DbvcError::ConfigError(format!("config is not utf-8: {}", e)))?;
                RepositoryConfig::from_toml(&text)
            }
            None => Ok(RepositoryConfig::default()),
        }
    }

    fn save_config(&self, config: &RepositoryConfig) -> Result<()> {
        self.put_str(STATE_TABLE, CONFIG_KEY, config.to_toml()?.as_bytes())
    }

    fn save_bisect(&self, session: &BisectSession) -> Result<()> {
        self.put_str(STATE_TABLE, BISECT_KEY, &encode(session)?)
    }

    fn get_bisect(&self) -> Result<Option<BisectSession>> {
        self.get_str(STATE_TABLE, BISECT_KEY)?
            .map(|b| decode(&b))
            .transpose()
    }

    fn clear_bisect(&self) -> Result<()> {
        self.remove_str(STATE_TABLE, BISECT_KEY).map(|_| ())
    }

    fn lock(&self) -> Result<RepoLock> {
        RepoLock::acquire_flag(&self.lock_flag)
    }
}
