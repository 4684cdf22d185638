use anyhow::{Context, Result};
use dbvc_core::{DatabaseSnapshot, DbvcRepo};
use std::fs;
use std::path::{Path, PathBuf};
use tempfile::TempDir;

/// An isolated repository directory.
pub struct TestWorkspace {
    dir: TempDir,
}

impl TestWorkspace {
    pub fn empty() -> Result<Self> {
        let dir = TempDir::new().context("Failed to create temp directory")?;
        Ok(Self { dir })
    }

    pub fn path(&self) -> &Path {
        self.dir.path()
    }

    /// Initialize a repository in the workspace.
    pub fn init_repo(&self) -> Result<DbvcRepo> {
        Ok(DbvcRepo::init(self.path())?)
    }

    /// Open the existing repository.
    pub fn open_repo(&self) -> Result<DbvcRepo> {
        Ok(DbvcRepo::open(self.path())?)
    }

    /// Remove the repository's lock file, as left behind by a killed process.
    pub fn remove_lock(&self) -> Result<()> {
        let lock = self.path().join(dbvc_core::REPO_DIR).join("LOCK");
        if lock.exists() {
            fs::remove_file(&lock).context("Failed to remove lock file")?;
        }
        Ok(())
    }
}

/// Load a snapshot document from `tests/fixtures/<name>/snapshot.json`.
pub fn fixture_snapshot(name: &str) -> Result<DatabaseSnapshot> {
    let path = fixtures_dir().join(name).join("snapshot.json");
    let json = fs::read_to_string(&path)
        .with_context(|| format!("Fixture not found: {}", path.display()))?;
    Ok(DatabaseSnapshot::from_json(&json)?)
}

fn fixtures_dir() -> PathBuf {
    PathBuf::from(env!("CARGO_MANIFEST_DIR")).join("fixtures")
}
