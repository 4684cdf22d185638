//! Repository write lock.

use crate::error::{DbvcError, Result};
use fs2::FileExt;
use std::fs::{self, File, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tracing::warn;

/// RAII guard for the repository write lock.
///
/// Mutating repository operations hold one of these for their whole
/// duration. Dropping it releases the lock.
pub struct RepoLock {
    inner: LockInner,
}

enum LockInner {
    /// Exclusive `LOCK` file carrying the owner's PID.
    File {
        /// Wrapped in Option to allow taking ownership in Drop.
        file: Option<File>,
        path: PathBuf,
    },
    /// In-process flag shared by every handle on the same store.
    Flag(Arc<AtomicBool>),
}

impl RepoLock {
    /// Acquires the lock file at `lock_path`, cleaning up stale locks
    /// left by dead processes.
    pub(crate) fn acquire_file(lock_path: &Path) -> Result<Self> {
        acquire_with_retry(lock_path, 0)
    }

    /// Acquires an in-process flag lock.
    pub(crate) fn acquire_flag(flag: &Arc<AtomicBool>) -> Result<Self> {
        if flag
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_err()
        {
            return Err(DbvcError::RepositoryLocked);
        }
        Ok(Self {
            inner: LockInner::Flag(Arc::clone(flag)),
        })
    }
}

impl Drop for RepoLock {
    fn drop(&mut self) {
        match &mut self.inner {
            LockInner::File { file, path } => {
                // Close first so the advisory lock is released
                if let Some(file) = file.take() {
                    drop(file);
                }
                let _ = fs::remove_file(path);
            }
            LockInner::Flag(flag) => flag.store(false, Ordering::Release),
        }
    }
}

fn acquire_with_retry(lock_path: &Path, retry_count: u32) -> Result<RepoLock> {
    if retry_count > 2 {
        return Err(DbvcError::RepositoryLocked);
    }

    match OpenOptions::new()
        .write(true)
        .create_new(true)
        .open(lock_path)
    {
        Ok(file) => claim_new_lock(file, lock_path, |f| f.try_lock_exclusive()),
        Err(e) if e.kind() == std::io::ErrorKind::AlreadyExists => {
            handle_existing_lock(lock_path, retry_count)
        }
        Err(e) => Err(DbvcError::Io(e)),
    }
}

/// Stamps a freshly created lock file with our PID and locks it. On any
/// failure the file is removed so it cannot block later acquires.
fn claim_new_lock(
    mut file: File,
    lock_path: &Path,
    lock: impl FnOnce(&File) -> std::io::Result<()>,
) -> Result<RepoLock> {
    let claimed = writeln!(file, "{}", std::process::id())
        .and_then(|_| file.flush())
        .map_err(DbvcError::Io)
        .and_then(|_| lock(&file).map_err(|_| DbvcError::RepositoryLocked));

    match claimed {
        Ok(()) => Ok(RepoLock {
            inner: LockInner::File {
                file: Some(file),
                path: lock_path.to_path_buf(),
            },
        }),
        Err(e) => {
            drop(file);
            let _ = fs::remove_file(lock_path);
            Err(e)
        }
    }
}

fn handle_existing_lock(lock_path: &Path, retry_count: u32) -> Result<RepoLock> {
    match fs::read_to_string(lock_path) {
        Ok(content) => {
            if let Ok(pid) = content.trim().parse::<u32>() {
                if pid == std::process::id() || is_process_alive(pid) {
                    return Err(DbvcError::LockHeld { pid });
                }

                warn!(pid = pid, "Detected stale lock from dead process, cleaning up");

                if let Err(e) = fs::remove_file(lock_path) {
                    if e.kind() != std::io::ErrorKind::NotFound {
                        return Err(DbvcError::Io(e));
                    }
                }
                return acquire_with_retry(lock_path, retry_count + 1);
            }

            // Another writer may be between create and PID write
            if retry_count == 0 {
                std::thread::sleep(std::time::Duration::from_millis(10));
                return acquire_with_retry(lock_path, retry_count + 1);
            }

            warn!("Lock file has invalid content, attempting cleanup");
            let _ = fs::remove_file(lock_path);
            acquire_with_retry(lock_path, retry_count + 1)
        }
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
            acquire_with_retry(lock_path, retry_count + 1)
        }
        Err(_) => Err(DbvcError::RepositoryLocked),
    }
}

/// Check if a process with the given PID is still alive.
#[cfg(target_os = "linux")]
fn is_process_alive(pid: u32) -> bool {
    // Zombies keep /proc/{pid} but not a readable stat
    Path::new(&format!("/proc/{}/stat", pid)).exists()
}

#[cfg(all(unix, not(target_os = "linux")))]
fn is_process_alive(pid: u32) -> bool {
    std::process::Command::new("kill")
        .args(["-0", &pid.to_string()])
        .output()
        .map(|o| o.status.success())
        .unwrap_or(true)
}

#[cfg(not(unix))]
fn is_process_alive(_pid: u32) -> bool {
    // Stale locks are not auto-cleaned here; remove LOCK by hand
    true
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_file_lock_exclusive() {
        let tmp = TempDir::new().unwrap();
        let path = tmp.path().join("LOCK");

        let guard = RepoLock::acquire_file(&path).unwrap();
        assert!(path.exists());

        let second = RepoLock::acquire_file(&path);
        assert!(matches!(
            second,
            Err(DbvcError::LockHeld { .. }) | Err(DbvcError::RepositoryLocked)
        ));

        drop(guard);
        assert!(!path.exists());
        RepoLock::acquire_file(&path).unwrap();
    }

    #[cfg(target_os = "linux")]
    #[test]
    fn test_stale_lock_cleaned_up() {
        let tmp = TempDir::new().unwrap();
        let path = tmp.path().join("LOCK");
        // PIDs above pid_max never exist
        fs::write(&path, "4294967\n").unwrap();

        let guard = RepoLock::acquire_file(&path).unwrap();
        let content = fs::read_to_string(&path).unwrap();
        assert_eq!(content.trim(), std::process::id().to_string());
        drop(guard);
    }

    #[test]
    fn test_failed_claim_removes_lock_file() {
        let tmp = TempDir::new().unwrap();
        let path = tmp.path().join("LOCK");
        let file = OpenOptions::new()
            .write(true)
            .create_new(true)
            .open(&path)
            .unwrap();

        let result = claim_new_lock(file, &path, |_| {
            Err(std::io::Error::new(std::io::ErrorKind::WouldBlock, "busy"))
        });
        assert!(matches!(result, Err(DbvcError::RepositoryLocked)));
        assert!(!path.exists());

        let guard = RepoLock::acquire_file(&path).unwrap();
        assert!(path.exists());
        drop(guard);
    }

    #[test]
    fn test_flag_lock() {
        let flag = Arc::new(AtomicBool::new(false));
        let guard = RepoLock::acquire_flag(&flag).unwrap();
        assert!(matches!(
            RepoLock::acquire_flag(&flag),
            Err(DbvcError::RepositoryLocked)
        ));
        drop(guard);
        assert!(RepoLock::acquire_flag(&flag).is_ok());
    }
}
