//! Error types for dbvc_core operations.

use std::path::PathBuf;
use thiserror::Error;

/// Core error type for dbvc_core operations.
#[derive(Error, Debug)]
pub enum DbvcError {
    /// Branch with the given name does not exist.
    #[error("branch not found: {0}")]
    BranchNotFound(String),

    /// Tag with the given name does not exist.
    #[error("tag not found: {0}")]
    TagNotFound(String),

    /// Commit (or revision) could not be resolved.
    #[error("commit not found: {0}")]
    CommitNotFound(String),

    /// Stash entry with the given id does not exist.
    #[error("stash not found: {0}")]
    StashNotFound(String),

    /// Snapshot referenced by a commit is missing from storage.
    #[error("snapshot not found: {0}")]
    SnapshotNotFound(String),

    /// Object with the given ID was not found in the object store.
    #[error("object not found: {0}")]
    ObjectNotFound(String),

    /// A branch with this name already exists.
    #[error("branch already exists: {0}")]
    BranchAlreadyExists(String),

    /// A tag with this name already exists.
    #[error("tag already exists: {0}")]
    TagAlreadyExists(String),

    /// The branch is protected and `force` was not given.
    #[error("branch '{0}' is protected")]
    ProtectedBranch(String),

    /// The operation is not allowed on the checked-out branch.
    #[error("branch '{0}' is the current branch")]
    CurrentBranch(String),

    /// A bisect session is already running.
    #[error("bisect session already active (started at {0})")]
    BisectAlreadyActive(String),

    /// No bisect session is running.
    #[error("no bisect session in progress")]
    NoBisectSession,

    /// The stash stack is empty.
    #[error("no stash entries")]
    EmptyStash,

    /// The branch exists but has no commits yet.
    #[error("branch '{0}' has no commits")]
    NoCommits(String),

    /// A short commit id matches more than one commit.
    #[error("ambiguous revision '{0}'")]
    AmbiguousRevision(String),

    /// Branch or tag name failed validation.
    #[error("invalid name '{name}': {reason}")]
    InvalidName {
        /// The rejected name
        name: String,
        /// Why it was rejected
        reason: String,
    },

    /// A bisect range that does not make sense.
    #[error("invalid bisect range: {0}")]
    InvalidBisectRange(String),

    /// Patch document is malformed or fails validation.
    #[error("invalid patch: {0}")]
    InvalidPatch(String),

    /// A graph walk was cancelled through its token.
    #[error("operation cancelled")]
    Cancelled,

    /// Hash verification failed during object read.
    #[error("hash mismatch: expected {expected}, got {actual}")]
    HashMismatch {
        /// The expected object ID
        expected: String,
        /// The actual computed hash
        actual: String,
    },

    /// The object file is corrupted or has invalid format.
    #[error("corrupted object at {}: {}", path.display(), reason)]
    CorruptedObject {
        /// Path to the corrupted object
        path: PathBuf,
        /// Description of the corruption
        reason: String,
    },

    /// Invalid hex string for ObjectId parsing.
    #[error("invalid hex string: {0}")]
    InvalidHex(String),

    /// Serialization error.
    #[error("serialization error: {0}")]
    Serialization(String),

    /// Deserialization error.
    #[error("deserialization error: {0}")]
    Deserialization(String),

    /// Compression or decompression failed.
    #[error("compression error: {0}")]
    Compression(String),

    /// Invalid ref file content or format.
    #[error("invalid ref at {}: {}", path.display(), reason)]
    InvalidRef {
        /// Path to the invalid ref file
        path: PathBuf,
        /// Description of what's invalid
        reason: String,
    },

    /// I/O error during file operations.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Embedded database backend failure.
    #[error("database error: {0}")]
    Database(String),

    /// Configuration error (loading, parsing, invalid values).
    #[error("configuration error: {0}")]
    ConfigError(String),

    /// The directory does not contain a repository.
    #[error("not a dbvc repository: {}", .0.display())]
    NotARepository(PathBuf),

    /// `init` was called on an existing repository.
    #[error("repository already exists at {}", .0.display())]
    AlreadyInitialized(PathBuf),

    /// Repository is locked by another writer.
    #[error("repository locked by another process")]
    RepositoryLocked,

    /// Repository lock is held by a live process.
    #[error("repository lock held by another process (PID: {pid})")]
    LockHeld {
        /// Process ID holding the lock
        pid: u32,
    },
}

impl DbvcError {
    /// True for the not-found category.
    pub fn is_not_found(&self) -> bool {
        matches!(
            self,
            Self::BranchNotFound(_)
                | Self::TagNotFound(_)
                | Self::CommitNotFound(_)
                | Self::StashNotFound(_)
                | Self::SnapshotNotFound(_)
                | Self::ObjectNotFound(_)
                | Self::NoBisectSession
        )
    }

    /// True for the conflict/policy category.
    pub fn is_conflict(&self) -> bool {
        matches!(
            self,
            Self::BranchAlreadyExists(_)
                | Self::TagAlreadyExists(_)
                | Self::ProtectedBranch(_)
                | Self::CurrentBranch(_)
                | Self::BisectAlreadyActive(_)
                | Self::EmptyStash
                | Self::InvalidName { .. }
                | Self::InvalidBisectRange(_)
                | Self::AmbiguousRevision(_)
        )
    }

    /// True when the storage layer failed (I/O, corruption, locking).
    pub fn is_storage_failure(&self) -> bool {
        !self.is_not_found() && !self.is_conflict() && !matches!(self, Self::Cancelled)
    }

    /// Returns a user-friendly recovery suggestion for the error, if available.
    pub fn recovery_suggestion(&self) -> Option<&'static str> {
        match self {
            Self::CorruptedObject { .. } | Self::HashMismatch { .. } => {
                Some("Run 'dbvc verify' to identify damaged objects.")
            }
            Self::SnapshotNotFound(_) | Self::ObjectNotFound(_) => {
                Some("Repository might be corrupted. Run 'dbvc verify' to check.")
            }
            Self::RepositoryLocked => Some(
                "Wait for the other process to finish, or remove .dbvc/LOCK if the process is dead.",
            ),
            Self::LockHeld { .. } => Some("Another process is writing to this repository."),
            Self::BisectAlreadyActive(_) => {
                Some("Finish the current session or run 'dbvc bisect reset'.")
            }
            Self::NoBisectSession => Some("Start one with 'dbvc bisect start <good> <bad>'."),
            Self::CurrentBranch(_) => Some("Check out another branch first."),
            Self::ProtectedBranch(_) => Some("Pass --force to delete a protected branch."),
            Self::NotARepository(_) => Some("Run 'dbvc init' to create a repository."),
            Self::NoCommits(_) => Some("Create a commit on the branch first."),
            _ => None,
        }
    }
}

/// Convenience Result type for dbvc_core operations.
pub type Result<T> = std::result::Result<T, DbvcError>;
