//! Content-addressed object storage with integrity verification.

use crate::error::{DbvcError, Result};
use crate::object_id::{canonical_bytes, ObjectId, ObjectKind, HEADER_LEN, MAGIC};
use std::fs::{self, File};
use std::io::Write;
use std::path::{Path, PathBuf};
use std::time::SystemTime;

/// Zstd compression level for object storage.
const COMPRESSION_LEVEL: i32 = 3;

/// A stored object as seen by [`ObjectStore::list_all_objects`].
#[derive(Debug, Clone)]
pub struct ObjectInfo {
    /// Object id.
    pub id: ObjectId,
    /// Compressed size on disk.
    pub size: u64,
    /// Last modification time.
    pub modified: SystemTime,
}

/// Content-addressed object storage.
///
/// Commits and snapshots are stored as zstd-compressed files wrapped in a
/// canonical envelope (magic, kind, length). The file path is derived
/// from the object's BLAKE3 hash and every read re-verifies it.
///
/// # Examples
///
/// ```
/// use dbvc_core::{DatabaseSnapshot, ObjectStore};
/// use tempfile::TempDir;
///
/// let tmp = TempDir::new().unwrap();
/// let store = ObjectStore::new(tmp.path().join("objects"));
///
/// let snapshot = DatabaseSnapshot::empty();
/// let id = store.put_snapshot(&snapshot).unwrap();
/// assert_eq!(store.get_snapshot(id).unwrap(), snapshot);
/// ```
pub struct ObjectStore {
    root: PathBuf,
}

impl ObjectStore {
    /// Creates a new ObjectStore at the given root directory.
    ///
    /// The directory will be created on first write.
    pub fn new(root: impl AsRef<Path>) -> Self {
        Self {
            root: root.as_ref().to_path_buf(),
        }
    }

    /// Returns the root directory of this object store.
    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Stores an encoded object under `id`.
    ///
    /// Writing an id that already exists is a no-op (deduplication).
    pub(crate) fn put(&self, id: ObjectId, kind: ObjectKind, payload: &[u8]) -> Result<()> {
        let actual = ObjectId::hash_object(kind, payload);
        if actual != id {
            return Err(DbvcError::HashMismatch {
                expected: id.as_hex(),
                actual: actual.as_hex(),
            });
        }

        if self.exists(id) {
            return Ok(());
        }

        let canonical = canonical_bytes(kind, payload);
        self.write_object(id, &canonical)
    }

    /// Reads and verifies an object of the expected kind.
    ///
    /// Returns `Ok(None)` if no such object exists.
    pub(crate) fn get(&self, id: ObjectId, expected: ObjectKind) -> Result<Option<Vec<u8>>> {
        let Some((kind, payload)) = self.read_object(id)? else {
            return Ok(None);
        };

        if kind != expected {
            return Err(DbvcError::CorruptedObject {
                path: self.object_path(id),
                reason: format!("expected {:?}, got {:?}", expected, kind),
            });
        }

        Ok(Some(payload))
    }

    /// Stores a snapshot and returns its tree id.
    pub fn put_snapshot(&self, snapshot: &crate::snapshot::DatabaseSnapshot) -> Result<ObjectId> {
        let (id, payload) = crate::object_id::encode_object(ObjectKind::Snapshot, snapshot)?;
        self.put(id, ObjectKind::Snapshot, &payload)?;
        Ok(id)
    }

    /// Loads a snapshot by tree id.
    pub fn get_snapshot(&self, id: ObjectId) -> Result<crate::snapshot::DatabaseSnapshot> {
        let payload = self
            .get(id, ObjectKind::Snapshot)?
            .ok_or_else(|| DbvcError::ObjectNotFound(id.as_hex()))?;
        postcard::from_bytes(&payload).map_err(|e| DbvcError::Deserialization(e.to_string()))
    }

    /// Kind of a stored object, after verifying it.
    pub fn kind_of(&self, id: ObjectId) -> Result<Option<ObjectKind>> {
        Ok(self.read_object(id)?.map(|(kind, _)| kind))
    }

    /// Checks if an object exists in the store.
    pub fn exists(&self, id: ObjectId) -> bool {
        self.object_path(id).exists()
    }

    /// Lists all objects in the store.
    ///
    /// Used by garbage collection and verification to enumerate objects.
    pub fn list_all_objects(&self) -> Result<Vec<ObjectInfo>> {
        let mut objects = Vec::new();

        if !self.root.exists() {
            return Ok(objects);
        }

        for shard_entry in fs::read_dir(&self.root)? {
            let shard_path = shard_entry?.path();

            if !shard_path.is_dir() {
                continue;
            }

            for obj_entry in fs::read_dir(&shard_path)? {
                let obj_path = obj_entry?.path();

                // Skip non-files and temp files
                if !obj_path.is_file() || obj_path.extension().is_some() {
                    continue;
                }

                let Some(filename) = obj_path.file_name().and_then(|n| n.to_str()) else {
                    continue;
                };

                let Ok(id) = ObjectId::from_hex(filename) else {
                    continue;
                };

                let metadata = fs::metadata(&obj_path)?;
                objects.push(ObjectInfo {
                    id,
                    size: metadata.len(),
                    modified: metadata.modified().unwrap_or_else(|_| SystemTime::now()),
                });
            }
        }

        objects.sort_by_key(|o| o.id);
        Ok(objects)
    }

    /// Deletes an object from the store.
    ///
    /// Only garbage collection calls this, after reachability analysis.
    pub(crate) fn delete(&self, id: ObjectId) -> Result<()> {
        let path = self.object_path(id);

        if !path.exists() {
            return Err(DbvcError::ObjectNotFound(id.as_hex()));
        }

        fs::remove_file(&path)?;
        Ok(())
    }

    /// Computes the filesystem path for an object.
    pub(crate) fn object_path(&self, id: ObjectId) -> PathBuf {
        self.root.join(id.shard()).join(id.as_hex())
    }

    /// Writes compressed canonical bytes to disk atomically.
    fn write_object(&self, id: ObjectId, canonical: &[u8]) -> Result<()> {
        let dir = self.root.join(id.shard());
        let path = dir.join(id.as_hex());

        fs::create_dir_all(&dir)?;

        let compressed = zstd::encode_all(canonical, COMPRESSION_LEVEL)
            .map_err(|e| DbvcError::Compression(e.to_string()))?;

        // Atomic write: temp file + fsync + rename
        let tmp_path = path.with_extension("tmp");
        {
            let mut file = File::create(&tmp_path)?;
            file.write_all(&compressed)?;
            file.sync_all()?;
        }

        fs::rename(&tmp_path, &path)?;

        #[cfg(unix)]
        {
            if let Ok(dir_file) = File::open(&dir) {
                let _ = dir_file.sync_all();
            }
        }

        Ok(())
    }

    /// Reads and verifies an object from disk.
    fn read_object(&self, id: ObjectId) -> Result<Option<(ObjectKind, Vec<u8>)>> {
        let path = self.object_path(id);

        if !path.exists() {
            return Ok(None);
        }

        let compressed = fs::read(&path)?;

        let canonical = zstd::decode_all(compressed.as_slice())
            .map_err(|e| DbvcError::Compression(e.to_string()))?;

        if canonical.len() < HEADER_LEN {
            return Err(DbvcError::CorruptedObject {
                path,
                reason: "object too small".to_string(),
            });
        }

        if &canonical[..5] != MAGIC {
            return Err(DbvcError::CorruptedObject {
                path,
                reason: "invalid magic bytes".to_string(),
            });
        }

        let Some(kind) = ObjectKind::from_u8(canonical[5]) else {
            return Err(DbvcError::CorruptedObject {
                path,
                reason: format!("unknown kind: {}", canonical[5]),
            });
        };

        let mut len_bytes = [0u8; 8];
        len_bytes.copy_from_slice(&canonical[6..HEADER_LEN]);
        let len = u64::from_le_bytes(len_bytes) as usize;
        let payload = &canonical[HEADER_LEN..];

        if payload.len() != len {
            return Err(DbvcError::CorruptedObject {
                path,
                reason: format!(
                    "length mismatch: header says {}, got {}",
                    len,
                    payload.len()
                ),
            });
        }

        let actual = ObjectId::hash_object(kind, payload);
        if actual != id {
            return Err(DbvcError::HashMismatch {
                expected: id.as_hex(),
                actual: actual.as_hex(),
            });
        }

        Ok(Some((kind, payload.to_vec())))
    }
}
