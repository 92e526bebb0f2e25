//! Single-instance guard backed by an OS file lock

use std::fs::{File, OpenOptions, TryLockError};
use std::io;
use std::path::{Path, PathBuf};
use tracing::debug;

/// Held for the life of the process; the lock is released when dropped.
#[derive(Debug)]
pub struct InstanceGuard {
    _file: File,
    path: PathBuf,
}

impl InstanceGuard {
    /// Claim `<tmp>/<name>.lock`. `Ok(None)` if another process holds it.
    pub fn acquire(name: &str) -> io::Result<Option<Self>> {
        Self::acquire_at(std::env::temp_dir().join(format!("{}.lock", name)))
    }

    pub fn acquire_at(path: PathBuf) -> io::Result<Option<Self>> {
        let file = OpenOptions::new()
            .create(true)
            .write(true)
            .truncate(false)
            .open(&path)?;

        match file.try_lock() {
            Ok(()) => {
                debug!("Acquired instance lock {:?}", path);
                Ok(Some(Self { _file: file, path }))
            }
            Err(TryLockError::WouldBlock) => Ok(None),
            Err(TryLockError::Error(e)) => Err(e),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_second_claim_is_refused() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("finscope-test.lock");

        let first = InstanceGuard::acquire_at(path.clone()).unwrap();
        assert!(first.is_some());
        assert!(InstanceGuard::acquire_at(path.clone()).unwrap().is_none());

        drop(first);
        assert!(InstanceGuard::acquire_at(path).unwrap().is_some());
    }
}
