//! JSON snapshot of the memory store, so a CLI run picks up where the last
//! one stopped.

use std::fs;
use std::path::Path;

use harvest_error::SyncError;
use tracing::{debug, info};

use crate::store::{MemoryStore, State};

impl MemoryStore {
    /// Load the snapshot at `path`, or start empty when there is none.
    pub fn open(path: &Path) -> Result<Self, SyncError> {
        if !path.exists() {
            debug!(path = %path.display(), "no snapshot, starting empty");
            return Ok(Self::new());
        }
        let raw = fs::read_to_string(path)
            .map_err(|e| SyncError::store(format!("read {}: {e}", path.display())))?;
        let state: State = serde_json::from_str(&raw)
            .map_err(|e| SyncError::store(format!("parse {}: {e}", path.display())))?;
        info!(
            path = %path.display(),
            connections = state.connections.len(),
            "loaded snapshot"
        );
        Ok(Self {
            state: std::sync::Mutex::new(state),
        })
    }

    /// Write the whole store to `path` via a temp file and rename.
    pub fn persist(&self, path: &Path) -> Result<(), SyncError> {
        let json = {
            let state = self.lock()?;
            serde_json::to_string_pretty(&*state)
                .map_err(|e| SyncError::store(format!("serialize snapshot: {e}")))?
        };

        if let Some(dir) = path.parent().filter(|d| !d.as_os_str().is_empty()) {
            fs::create_dir_all(dir)
                .map_err(|e| SyncError::store(format!("create {}: {e}", dir.display())))?;
        }
        let tmp = path.with_extension("json.tmp");
        fs::write(&tmp, json)
            .map_err(|e| SyncError::store(format!("write {}: {e}", tmp.display())))?;
        fs::rename(&tmp, path)
            .map_err(|e| SyncError::store(format!("rename {}: {e}", path.display())))?;
        debug!(path = %path.display(), "snapshot saved");
        Ok(())
    }
}
