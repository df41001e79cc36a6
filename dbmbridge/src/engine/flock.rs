//! Advisory locks on store files.
//!
//! Snapshots replace the store file by rename, so the lock lives on a
//! sibling `PATH.lock` file that is never replaced. The lock is held by the
//! open descriptor and released when the [`FileLock`] is dropped.

use std::fs::{File, OpenOptions};
use std::io;
use std::path::{Path, PathBuf};

#[cfg(unix)]
use std::os::unix::io::AsRawFd;

pub(crate) struct FileLock {
    _file: File,
    path: PathBuf,
}

impl FileLock {
    /// Takes an exclusive lock for the store at `store_path`. With `wait`
    /// unset, a lock held elsewhere fails at once with `WouldBlock`.
    pub(crate) fn lock(store_path: &str, wait: bool) -> io::Result<Self> {
        let path = PathBuf::from(format!("{store_path}.lock"));
        let file = OpenOptions::new()
            .create(true)
            .truncate(false)
            .write(true)
            .open(&path)?;
        acquire(&file, wait)?;
        Ok(Self { _file: file, path })
    }

    pub(crate) fn path(&self) -> &Path {
        &self.path
    }
}

#[cfg(unix)]
fn acquire(file: &File, wait: bool) -> io::Result<()> {
    let mut operation = libc::LOCK_EX;
    if !wait {
        operation |= libc::LOCK_NB;
    }
    loop {
        // SAFETY: the descriptor belongs to `file`, which outlives the call.
        let result = unsafe { libc::flock(file.as_raw_fd(), operation) };
        if result == 0 {
            return Ok(());
        }
        let err = io::Error::last_os_error();
        if err.kind() != io::ErrorKind::Interrupted {
            return Err(err);
        }
    }
}

#[cfg(not(unix))]
fn acquire(_file: &File, _wait: bool) -> io::Result<()> {
    Ok(())
}

#[cfg(all(test, unix))]
mod tests {
    use super::*;

    #[test]
    fn second_lock_fails_without_waiting() {
        let dir = tempfile::tempdir().unwrap();
        let store = dir.path().join("casket.tkh");
        let store = store.to_str().unwrap();

        let lock = FileLock::lock(store, false).unwrap();
        assert_eq!(lock.path(), Path::new(&format!("{store}.lock")));
        let err = FileLock::lock(store, false).err().unwrap();
        assert_eq!(err.kind(), io::ErrorKind::WouldBlock);

        drop(lock);
        assert!(FileLock::lock(store, false).is_ok());
    }
}
