//! Exclusive hold on a data directory. Each process keeps the whole store in
//! memory and rewrites the snapshot, so only one may own it at a time.

use std::fs::{self, File, OpenOptions};
use std::io;
use std::path::{Path, PathBuf};

use fd_lock::{RwLock, RwLockWriteGuard};
use harvest_error::SyncError;
use tracing::debug;

const LOCK_FILE: &str = "harvest.lock";

pub struct DataDirLock {
    path: PathBuf,
    file: RwLock<File>,
}

impl DataDirLock {
    /// Open (creating if needed) the lock file inside `dir`.
    pub fn open(dir: &Path) -> Result<Self, SyncError> {
        fs::create_dir_all(dir)
            .map_err(|e| SyncError::store(format!("create {}: {e}", dir.display())))?;
        let path = dir.join(LOCK_FILE);
        let file = OpenOptions::new()
            .create(true)
            .truncate(false)
            .write(true)
            .open(&path)
            .map_err(|e| SyncError::store(format!("open {}: {e}", path.display())))?;
        Ok(Self {
            path,
            file: RwLock::new(file),
        })
    }

    /// Take the lock without waiting. The directory stays owned until the
    /// guard is dropped.
    pub fn try_hold(&mut self) -> Result<RwLockWriteGuard<'_, File>, SyncError> {
        match self.file.try_write() {
            Ok(guard) => {
                debug!(path = %self.path.display(), "data dir locked");
                Ok(guard)
            }
            Err(e) if e.kind() == io::ErrorKind::WouldBlock => Err(SyncError::conflict(format!(
                "{} is held by another harvest process",
                self.path.display()
            ))),
            Err(e) => Err(SyncError::store(format!("lock {}: {e}", self.path.display()))),
        }
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[test]
    fn second_holder_is_refused_until_release() {
        let dir = std::env::temp_dir().join(format!("harvest-lock-{}", std::process::id()));

        let mut first = DataDirLock::open(&dir).unwrap();
        let mut second = DataDirLock::open(&dir).unwrap();

        let held = first.try_hold().unwrap();
        let err = second.try_hold().unwrap_err();
        assert!(matches!(err, SyncError::Conflict(_)), "{err}");

        drop(held);
        assert!(second.try_hold().is_ok());

        let _ = fs::remove_dir_all(&dir);
    }
}
