use std::fs::{self, File, OpenOptions};
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::error::{LockError, UtilError};
use crate::Result;

const LOCK_SUFFIX: &str = ".lock";

/// Retry schedule for lock acquisition under contention.
///
/// Backoff is linear: attempt `n` sleeps `n * backoff` before retrying.
#[derive(Debug, Clone, Copy)]
pub struct LockRetry {
    pub attempts: u32,
    pub backoff: Duration,
}

impl Default for LockRetry {
    fn default() -> Self {
        Self {
            attempts: 4,
            backoff: Duration::from_millis(25),
        }
    }
}

/// RAII lock file guard. Creates a `.lock` file on construction,
/// atomically renames on commit, removes on drop if not committed.
///
/// The protocol:
/// - Create `<path>.lock` with O_CREAT|O_EXCL
/// - Write new contents to the lock file
/// - Atomically rename `.lock` to target on commit
/// - Remove `.lock` on drop if not committed (rollback)
pub struct LockFile {
    /// The target file path (without .lock suffix).
    path: PathBuf,
    /// The lock file path (with .lock suffix).
    lock_path: PathBuf,
    /// The open file handle for writing.
    file: Option<File>,
    /// Whether commit() or rollback() has been called.
    committed: bool,
}

impl LockFile {
    /// Acquire a lock on the given path. Creates `path.lock` using O_CREAT|O_EXCL.
    ///
    /// Returns an error if the lock file already exists (another writer holds
    /// the lock) or if the file cannot be created.
    pub fn acquire(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref().to_path_buf();
        let lock_path = PathBuf::from(format!("{}{}", path.display(), LOCK_SUFFIX));

        let file = OpenOptions::new()
            .write(true)
            .create_new(true)
            .open(&lock_path)
            .map_err(|e| {
                if e.kind() == io::ErrorKind::AlreadyExists {
                    UtilError::Lock(LockError::AlreadyLocked {
                        path: lock_path.clone(),
                    })
                } else {
                    UtilError::Lock(LockError::Create {
                        path: lock_path.clone(),
                        source: e,
                    })
                }
            })?;

        Ok(Self {
            path,
            lock_path,
            file: Some(file),
            committed: false,
        })
    }

    /// Acquire with bounded retries and linear backoff.
    ///
    /// Only `AlreadyLocked` is retried; any other failure surfaces
    /// immediately. When every attempt finds the lock held, the result is
    /// `LockError::Timeout`.
    pub fn acquire_with_retry(path: impl AsRef<Path>, retry: LockRetry) -> Result<Self> {
        let path = path.as_ref();
        let mut attempt = 0u32;
        loop {
            match Self::acquire(path) {
                Ok(lock) => return Ok(lock),
                Err(UtilError::Lock(LockError::AlreadyLocked { path: lock_path })) => {
                    attempt += 1;
                    if attempt >= retry.attempts {
                        return Err(UtilError::Lock(LockError::Timeout {
                            path: lock_path,
                            attempts: retry.attempts,
                        }));
                    }
                    std::thread::sleep(retry.backoff * attempt);
                }
                Err(e) => return Err(e),
            }
        }
    }

    /// Try to acquire without blocking. Returns Ok(None) if already locked,
    /// Ok(Some(lockfile)) on success, or Err on other failures.
    pub fn try_acquire(path: impl AsRef<Path>) -> Result<Option<Self>> {
        match Self::acquire(path) {
            Ok(lk) => Ok(Some(lk)),
            Err(UtilError::Lock(LockError::AlreadyLocked { .. })) => Ok(None),
            Err(e) => Err(e),
        }
    }

    /// Get the path of the target file (without .lock).
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Get the path of the lock file (with .lock).
    pub fn lock_path(&self) -> &Path {
        &self.lock_path
    }

    /// Commit: flush, sync, and atomically rename .lock to target.
    pub fn commit(mut self) -> Result<()> {
        if let Some(ref mut file) = self.file {
            file.flush().map_err(|e| {
                UtilError::Lock(LockError::Commit {
                    path: self.lock_path.clone(),
                    source: e,
                })
            })?;
            file.sync_all().map_err(|e| {
                UtilError::Lock(LockError::Commit {
                    path: self.lock_path.clone(),
                    source: e,
                })
            })?;
        }
        // Drop the file handle before rename
        self.file.take();

        fs::rename(&self.lock_path, &self.path).map_err(|e| {
            UtilError::Lock(LockError::Commit {
                path: self.lock_path.clone(),
                source: e,
            })
        })?;

        self.committed = true;
        Ok(())
    }

    /// Rollback: remove the .lock file (also happens on Drop).
    pub fn rollback(mut self) -> Result<()> {
        self.file.take();
        if self.lock_path.exists() {
            fs::remove_file(&self.lock_path)?;
        }
        self.committed = true;
        Ok(())
    }
}

impl Write for LockFile {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.file
            .as_mut()
            .ok_or_else(|| io::Error::other("lock file already closed"))?
            .write(buf)
    }

    fn flush(&mut self) -> io::Result<()> {
        self.file
            .as_mut()
            .ok_or_else(|| io::Error::other("lock file already closed"))?
            .flush()
    }
}

impl Drop for LockFile {
    fn drop(&mut self) {
        if !self.committed {
            self.file.take();
            let _ = fs::remove_file(&self.lock_path);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn acquire_and_commit() {
        let dir = tempfile::tempdir().unwrap();
        let target = dir.path().join("target.txt");
        fs::write(&target, b"old content").unwrap();

        let mut lock = LockFile::acquire(&target).unwrap();
        assert!(lock.lock_path().exists());
        lock.write_all(b"new content").unwrap();
        lock.commit().unwrap();

        assert!(!dir.path().join("target.txt.lock").exists());
        assert_eq!(fs::read_to_string(&target).unwrap(), "new content");
    }

    #[test]
    fn rollback_keeps_original() {
        let dir = tempfile::tempdir().unwrap();
        let target = dir.path().join("target.txt");
        fs::write(&target, b"original").unwrap();

        let mut lock = LockFile::acquire(&target).unwrap();
        lock.write_all(b"discarded").unwrap();
        lock.rollback().unwrap();

        assert_eq!(fs::read_to_string(&target).unwrap(), "original");
        assert!(!dir.path().join("target.txt.lock").exists());
    }

    #[test]
    fn drop_cleans_up() {
        let dir = tempfile::tempdir().unwrap();
        let target = dir.path().join("target.txt");
        fs::write(&target, b"original").unwrap();

        {
            let mut lock = LockFile::acquire(&target).unwrap();
            lock.write_all(b"dropped").unwrap();
        }

        assert!(!dir.path().join("target.txt.lock").exists());
        assert_eq!(fs::read_to_string(&target).unwrap(), "original");
    }

    #[test]
    fn second_acquire_fails() {
        let dir = tempfile::tempdir().unwrap();
        let target = dir.path().join("target.txt");

        let _lock = LockFile::acquire(&target).unwrap();
        match LockFile::acquire(&target) {
            Err(UtilError::Lock(LockError::AlreadyLocked { .. })) => {}
            other => panic!("expected AlreadyLocked, got {:?}", other.map(|_| ())),
        }
    }

    #[test]
    fn try_acquire_returns_none_when_held() {
        let dir = tempfile::tempdir().unwrap();
        let target = dir.path().join("target.txt");

        let _lock = LockFile::acquire(&target).unwrap();
        assert!(LockFile::try_acquire(&target).unwrap().is_none());
    }

    #[test]
    fn retry_times_out_while_held() {
        let dir = tempfile::tempdir().unwrap();
        let target = dir.path().join("target.txt");

        let _held = LockFile::acquire(&target).unwrap();
        let retry = LockRetry {
            attempts: 3,
            backoff: Duration::from_millis(1),
        };
        match LockFile::acquire_with_retry(&target, retry) {
            Err(UtilError::Lock(LockError::Timeout { attempts: 3, .. })) => {}
            other => panic!("expected Timeout, got {:?}", other.map(|_| ())),
        }
    }

    #[test]
    fn retry_succeeds_after_release() {
        let dir = tempfile::tempdir().unwrap();
        let target = dir.path().join("target.txt");

        let held = LockFile::acquire(&target).unwrap();
        let path = target.clone();
        let handle = std::thread::spawn(move || {
            let retry = LockRetry {
                attempts: 50,
                backoff: Duration::from_millis(5),
            };
            LockFile::acquire_with_retry(&path, retry).map(|_| ())
        });

        std::thread::sleep(Duration::from_millis(20));
        held.rollback().unwrap();
        handle.join().unwrap().unwrap();
    }

    #[test]
    fn lock_new_file() {
        let dir = tempfile::tempdir().unwrap();
        let target = dir.path().join("fresh.txt");

        let mut lock = LockFile::acquire(&target).unwrap();
        lock.write_all(b"created via lock").unwrap();
        lock.commit().unwrap();

        assert_eq!(fs::read_to_string(&target).unwrap(), "created via lock");
    }
}
