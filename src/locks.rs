//! Per-jail mutual exclusion
//!
//! Every network mutation on a jail holds that jail's lock for its full
//! duration. Background work uses `try_lock` and skips busy jails instead
//! of queueing behind a mutation.
//!
//! Locks are flock(2) locks on `<data_dir>/locks/<ctid>.lock`, so separate
//! `rigging` processes exclude each other. A lock is released when its file
//! handle is dropped, including when the holder dies.

use crate::error::{Error, Result};
use fs2::FileExt;
use std::fs::{self, File, OpenOptions};
use std::path::{Path, PathBuf};

#[derive(Debug, Clone)]
pub struct JailLocks {
    dir: PathBuf,
}

impl JailLocks {
    /// Locks kept under `<data_dir>/locks`
    pub fn in_dir(data_dir: &Path) -> Self {
        Self {
            dir: data_dir.join("locks"),
        }
    }

    fn path(&self, ctid: u32) -> PathBuf {
        self.dir.join(format!("{}.lock", ctid))
    }

    /// Run `f` while holding the jail's lock, waiting for it if needed
    pub fn lock<T>(&self, ctid: u32, f: impl FnOnce() -> Result<T>) -> Result<T> {
        let _lock = acquire(&self.path(ctid))?;
        f()
    }

    /// Run `f` only if the jail's lock is free right now
    pub fn try_lock<T>(&self, ctid: u32, f: impl FnOnce() -> T) -> Result<Option<T>> {
        let path = self.path(ctid);
        let file = open(&path)?;
        match file.try_lock_exclusive() {
            Ok(()) => Ok(Some(f())),
            Err(e) if e.raw_os_error() == fs2::lock_contended_error().raw_os_error() => Ok(None),
            Err(e) => Err(Error::Lock { path, source: e }),
        }
    }
}

/// Block until `path` is exclusively locked; the lock lives as long as the handle
pub fn acquire(path: &Path) -> Result<File> {
    let file = open(path)?;
    file.lock_exclusive().map_err(|e| Error::Lock {
        path: path.to_path_buf(),
        source: e,
    })?;
    Ok(file)
}

fn open(path: &Path) -> Result<File> {
    let lock_err = |source| Error::Lock {
        path: path.to_path_buf(),
        source,
    };

    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent).map_err(lock_err)?;
    }

    OpenOptions::new()
        .create(true)
        .read(true)
        .write(true)
        .truncate(false)
        .open(path)
        .map_err(lock_err)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::mpsc;
    use std::thread;
    use tempfile::TempDir;

    #[test]
    fn test_try_lock_free() {
        let dir = TempDir::new().unwrap();
        let locks = JailLocks::in_dir(dir.path());
        assert_eq!(locks.try_lock(1, || 7).unwrap(), Some(7));
        assert!(dir.path().join("locks").join("1.lock").is_file());
    }

    #[test]
    fn test_try_lock_skips_held_jail() {
        let dir = TempDir::new().unwrap();
        let locks = JailLocks::in_dir(dir.path());
        let inner = locks.clone();
        let result = locks
            .lock(1, || Ok((inner.try_lock(1, || ())?, inner.try_lock(2, || ())?)))
            .unwrap();
        assert_eq!(result, (None, Some(())));
    }

    #[test]
    fn test_separate_instances_share_locks() {
        let dir = TempDir::new().unwrap();
        let first = JailLocks::in_dir(dir.path());
        let second = JailLocks::in_dir(dir.path());

        let held = first.lock(3, || second.try_lock(3, || ())).unwrap();
        assert_eq!(held, None);
        assert_eq!(second.try_lock(3, || ()).unwrap(), Some(()));
    }

    #[test]
    fn test_lock_waits_for_other_thread() {
        let dir = TempDir::new().unwrap();
        let locks = JailLocks::in_dir(dir.path());
        let (held_tx, held_rx) = mpsc::channel();
        let (release_tx, release_rx) = mpsc::channel::<()>();

        let other = JailLocks::in_dir(dir.path());
        let handle = thread::spawn(move || {
            other.lock(9, || {
                held_tx.send(()).unwrap();
                release_rx.recv().unwrap();
                Ok(())
            })
        });

        held_rx.recv().unwrap();
        assert!(locks.try_lock(9, || ()).unwrap().is_none());
        release_tx.send(()).unwrap();
        handle.join().unwrap().unwrap();

        assert_eq!(locks.lock(9, || Ok("done")).unwrap(), "done");
    }
}
