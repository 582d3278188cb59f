//! Resets and connection teardown.
//!
//! Deletion runs in bounded pages, each tick scheduling the next, the same
//! way the batch driver chains sync ticks.

use harvest_domain::{ConnectionId, ConnectionPatch, SyncStatus, Task};
use harvest_error::SyncError;
use tracing::{debug, error, info, warn};

use crate::engine::SyncEngine;
use crate::state;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DeletionOutcome {
    Aborted,
    Continued { deleted: usize },
    Finished { deleted: usize },
    Failed(SyncError),
}

impl SyncEngine {
    /// Put a stuck or failed connection back to idle. Witnesses are kept and
    /// their count becomes the progress figure.
    pub async fn reset_sync(&self, id: &ConnectionId) -> Result<(), SyncError> {
        let conn = self.connection(id).await?;
        if matches!(conn.status, SyncStatus::Deleting | SyncStatus::Resetting) {
            return Err(SyncError::conflict(format!("connection {id} is {}", conn.status)));
        }
        let synced = self.stores.synced.count_synced(id).await?;
        self.stores
            .connections
            .patch_connection(id, state::soft_reset(synced))
            .await?;
        info!(connection = %id, synced, "sync reset");
        Ok(())
    }

    /// Forget every witness so the next cycle rescans the whole folder.
    pub async fn full_reset(&self, id: &ConnectionId) -> Result<(), SyncError> {
        let conn = self.connection(id).await?;
        match conn.status {
            SyncStatus::Deleting => {
                return Err(SyncError::conflict(format!("connection {id} is being deleted")));
            }
            SyncStatus::Resetting => {
                debug!(connection = %id, "full reset already running, resuming it");
            }
            _ => {
                self.stores
                    .connections
                    .patch_connection(id, state::begin_teardown(SyncStatus::Resetting))
                    .await?;
                info!(connection = %id, "full reset started");
            }
        }
        self.schedule_deletion(id).await
    }

    /// Remove the connection and everything recorded for it.
    pub async fn delete_connection(&self, id: &ConnectionId) -> Result<(), SyncError> {
        let conn = self.connection(id).await?;
        if conn.status != SyncStatus::Deleting {
            self.stores
                .connections
                .patch_connection(id, state::begin_teardown(SyncStatus::Deleting))
                .await?;
            info!(connection = %id, "connection deletion started");
        }
        self.schedule_deletion(id).await
    }

    async fn schedule_deletion(&self, id: &ConnectionId) -> Result<(), SyncError> {
        self.tasks
            .schedule_after(self.config.deletion_delay, Task::DeleteBatch(id.clone()))
            .await
    }

    pub async fn process_deletion_batch(&self, id: &ConnectionId) -> DeletionOutcome {
        let conn = match self.stores.connections.get_connection(id).await {
            Ok(Some(conn)) => conn,
            Ok(None) => {
                debug!(connection = %id, "connection already gone");
                return DeletionOutcome::Aborted;
            }
            Err(e) => {
                error!(connection = %id, %e, "failed to load connection");
                return DeletionOutcome::Failed(e);
            }
        };

        let result = match conn.status {
            SyncStatus::Resetting => self.reset_page(id).await,
            SyncStatus::Deleting => self.delete_page(id).await,
            status => {
                debug!(connection = %id, %status, "no teardown pending");
                return DeletionOutcome::Aborted;
            }
        };

        match result {
            Ok(outcome) => outcome,
            Err(e) if e.is_not_found() => DeletionOutcome::Aborted,
            Err(e) => {
                // Status stays as is so repeating the request resumes.
                error!(connection = %id, %e, "deletion batch failed");
                let patch = ConnectionPatch::new().last_error(Some(e.description()));
                if let Err(write_err) = self.stores.connections.patch_connection(id, patch).await {
                    warn!(connection = %id, %write_err, "failed to record deletion failure");
                }
                DeletionOutcome::Failed(e)
            }
        }
    }

    async fn reset_page(&self, id: &ConnectionId) -> Result<DeletionOutcome, SyncError> {
        let limit = self.config.deletion_page_size;
        let deleted = self.stores.synced.delete_synced_page(id, limit).await?;
        if deleted >= limit {
            self.schedule_deletion(id).await?;
            debug!(connection = %id, deleted, "reset batch done");
            return Ok(DeletionOutcome::Continued { deleted });
        }

        let finished = self
            .stores
            .connections
            .patch_connection_if(id, SyncStatus::Resetting, state::finish_full_reset())
            .await?;
        if finished.is_none() {
            return Ok(DeletionOutcome::Aborted);
        }
        info!(connection = %id, "full reset complete");
        Ok(DeletionOutcome::Finished { deleted })
    }

    async fn delete_page(&self, id: &ConnectionId) -> Result<DeletionOutcome, SyncError> {
        let limit = self.config.deletion_page_size;
        let mut budget = limit;

        budget = budget.saturating_sub(self.stores.synced.delete_synced_page(id, budget).await?);
        if budget > 0 {
            budget = budget.saturating_sub(self.stores.contacts.delete_contacts_page(id, budget).await?);
        }
        if budget > 0 {
            budget = budget.saturating_sub(self.stores.domains.delete_domains_page(id, budget).await?);
        }
        let deleted = limit - budget;

        if budget == 0 {
            self.schedule_deletion(id).await?;
            debug!(connection = %id, deleted, "deletion batch done");
            return Ok(DeletionOutcome::Continued { deleted });
        }

        self.stores.connections.delete_connection(id).await?;
        info!(connection = %id, "connection deleted");
        Ok(DeletionOutcome::Finished { deleted })
    }
}
