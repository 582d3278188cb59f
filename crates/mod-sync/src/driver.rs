use std::collections::HashSet;

use harvest_domain::{Connection, ConnectionId, MessageSender, SyncStatus, Task, UpsertOutcome};
use harvest_error::SyncError;
use tracing::{debug, error, info, warn};

use crate::address::parse_from_header;
use crate::engine::SyncEngine;
use crate::state::{self, BatchOutcome, NextAction};

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StartOutcome {
    Started { total: u64 },
    AlreadyRunning,
}

impl StartOutcome {
    pub fn message(&self) -> String {
        match self {
            Self::Started { total } => {
                format!("Started syncing {total} messages. Processing in background...")
            }
            Self::AlreadyRunning => "Sync already in progress".to_string(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TickOutcome {
    /// The connection is gone or no longer syncing; nothing was written.
    Aborted,
    Continued { processed: u64, new_addresses: u64 },
    Completed { processed: u64, new_addresses: u64 },
    Failed(SyncError),
}

/// Drop witnessed and repeated ids, keep page order, cap at `limit`.
/// The flag reports whether unsynced ids were left behind.
pub fn select_batch(ids: &[String], synced: &HashSet<String>, limit: usize) -> (Vec<String>, bool) {
    let mut seen = HashSet::new();
    let unsynced: Vec<String> = ids
        .iter()
        .filter(|id| !synced.contains(*id) && seen.insert(id.as_str()))
        .cloned()
        .collect();
    let more_in_page = unsynced.len() > limit;
    let mut batch = unsynced;
    batch.truncate(limit);
    (batch, more_in_page)
}

impl SyncEngine {
    /// Begin a cycle unless one is already running for this connection.
    pub async fn start_cycle(&self, id: &ConnectionId) -> Result<StartOutcome, SyncError> {
        let conn = self.connection(id).await?;
        match conn.status {
            SyncStatus::Syncing => {
                info!(connection = %id, "sync already in progress");
                return Ok(StartOutcome::AlreadyRunning);
            }
            SyncStatus::Deleting | SyncStatus::Resetting => {
                return Err(SyncError::conflict(format!(
                    "connection {id} is {}",
                    conn.status
                )));
            }
            SyncStatus::Idle | SyncStatus::Error => {}
        }

        let (total, already_synced) = match self.cycle_inputs(&conn).await {
            Ok(inputs) => inputs,
            Err(e) => {
                self.record_failure(id, conn.status, &e).await;
                return Err(e);
            }
        };

        let patch = state::begin_cycle(total, already_synced, self.now());
        let started = self
            .stores
            .connections
            .patch_connection_if(id, conn.status, patch)
            .await?;
        if started.is_none() {
            info!(connection = %id, "status changed while starting, leaving it to the other cycle");
            return Ok(StartOutcome::AlreadyRunning);
        }

        if let Err(e) = self
            .tasks
            .schedule_after(self.config.first_batch_delay, Task::ProcessBatch(id.clone()))
            .await
        {
            self.record_failure(id, SyncStatus::Syncing, &e).await;
            return Err(e);
        }

        info!(connection = %id, total, already_synced, "sync cycle started");
        Ok(StartOutcome::Started { total })
    }

    async fn cycle_inputs(&self, conn: &Connection) -> Result<(u64, u64), SyncError> {
        let token = self.access_token(conn).await?;
        let total = self
            .providers
            .mailbox
            .folder_total(&token, &conn.folder_id)
            .await?;
        let already_synced = self.stores.synced.count_synced(&conn.id).await?;
        Ok((total, already_synced))
    }

    /// One bounded unit of work. Never returns an error: failures become
    /// the `error` status.
    pub async fn process_batch(&self, id: &ConnectionId) -> TickOutcome {
        let conn = match self.stores.connections.get_connection(id).await {
            Ok(Some(conn)) => conn,
            Ok(None) => {
                warn!(connection = %id, "connection not found, dropping batch");
                return TickOutcome::Aborted;
            }
            Err(e) => {
                error!(connection = %id, %e, "failed to load connection");
                return TickOutcome::Failed(e);
            }
        };

        if !conn.is_syncing() {
            debug!(connection = %id, status = %conn.status, "sync cancelled or finished, dropping batch");
            return TickOutcome::Aborted;
        }

        match self.run_batch(&conn).await {
            Ok(outcome) => outcome,
            Err(e) if !e.is_fatal() => {
                warn!(connection = %id, %e, "connection vanished mid-batch");
                TickOutcome::Aborted
            }
            Err(e) => {
                error!(connection = %id, %e, "batch failed");
                self.record_failure(id, SyncStatus::Syncing, &e).await;
                TickOutcome::Failed(e)
            }
        }
    }

    async fn run_batch(&self, conn: &Connection) -> Result<TickOutcome, SyncError> {
        let token = self.access_token(conn).await?;

        let blocked: HashSet<String> = self
            .stores
            .domains
            .list_domains(&conn.id)
            .await?
            .into_iter()
            .map(|d| d.domain)
            .collect();

        let page = self
            .providers
            .mailbox
            .list_messages(
                &token,
                &conn.folder_id,
                conn.last_sync_at,
                conn.sync_page_token.as_deref(),
            )
            .await?;

        let ids: Vec<String> = page.messages.iter().map(|m| m.id.clone()).collect();
        let synced = if ids.is_empty() {
            HashSet::new()
        } else {
            self.stores.synced.synced_ids(&conn.id, &ids).await?
        };
        let (batch, more_in_page) = select_batch(&ids, &synced, self.config.batch_size);
        debug!(
            connection = %conn.id,
            listed = ids.len(),
            already_synced = synced.len(),
            batch = batch.len(),
            more_in_page,
            "selected batch"
        );

        let mut fetched = Vec::with_capacity(batch.len());
        let mut failed = 0u64;
        let mut new_addresses = 0u64;
        for message_id in batch {
            let sender = match self
                .providers
                .mailbox
                .get_message_sender(&token, &message_id)
                .await
            {
                Ok(sender) => sender,
                Err(e) => {
                    warn!(connection = %conn.id, message_id = %message_id, %e, "skipping message");
                    failed += 1;
                    continue;
                }
            };
            match self.harvest_sender(conn, &blocked, &sender).await {
                Ok(contributed) => {
                    if contributed {
                        new_addresses += 1;
                    }
                    fetched.push(message_id);
                }
                Err(e) => {
                    self.witness(&conn.id, &fetched).await?;
                    return Err(e);
                }
            }
        }
        self.witness(&conn.id, &fetched).await?;

        let outcome = BatchOutcome {
            processed: fetched.len() as u64,
            failed,
            new_addresses,
            more_in_page,
            next_page_token: page.next_page_token,
        };
        let (patch, next) = state::after_batch(conn, &outcome, self.now())?;

        let written = self
            .stores
            .connections
            .patch_connection_if(&conn.id, SyncStatus::Syncing, patch)
            .await?;
        if written.is_none() {
            info!(connection = %conn.id, "sync stopped during batch, not rescheduling");
            return Ok(TickOutcome::Aborted);
        }

        match next {
            NextAction::ScheduleNext => {
                self.tasks
                    .schedule_after(self.config.batch_delay, Task::ProcessBatch(conn.id.clone()))
                    .await?;
                info!(
                    connection = %conn.id,
                    processed = outcome.processed,
                    new_addresses,
                    "batch done, more to sync"
                );
                Ok(TickOutcome::Continued {
                    processed: outcome.processed,
                    new_addresses,
                })
            }
            NextAction::Finish => {
                info!(
                    connection = %conn.id,
                    processed = outcome.processed,
                    new_addresses,
                    "sync cycle complete"
                );
                Ok(TickOutcome::Completed {
                    processed: outcome.processed,
                    new_addresses,
                })
            }
        }
    }

    async fn witness(&self, id: &ConnectionId, fetched: &[String]) -> Result<(), SyncError> {
        if fetched.is_empty() {
            return Ok(());
        }
        self.stores.synced.mark_synced(id, fetched, self.now()).await
    }

    /// Fold one fetched sender into the address book. `Ok(true)` when a
    /// contact was created or incremented, `Ok(false)` when its domain is
    /// blocked.
    async fn harvest_sender(
        &self,
        conn: &Connection,
        blocked: &HashSet<String>,
        sender: &MessageSender,
    ) -> Result<bool, SyncError> {
        let parsed = parse_from_header(&sender.from_header);
        if blocked.contains(parsed.domain()) {
            debug!(
                connection = %conn.id,
                message_id = %sender.id,
                domain = parsed.domain(),
                "sender domain blocked"
            );
            return Ok(false);
        }

        let outcome = self
            .stores
            .contacts
            .upsert_contact(&conn.id, &parsed.email, &parsed.name, sender.timestamp_millis)
            .await?;
        if outcome == UpsertOutcome::Created {
            debug!(connection = %conn.id, email = %parsed.email, "new contact");
        }
        Ok(true)
    }

    /// Stop a running cycle. Returns whether there was one.
    pub async fn cancel_cycle(&self, id: &ConnectionId) -> Result<bool, SyncError> {
        let cancelled = self
            .stores
            .connections
            .patch_connection_if(id, SyncStatus::Syncing, state::cancel())
            .await?
            .is_some();
        if cancelled {
            info!(connection = %id, "sync cancelled");
        }
        Ok(cancelled)
    }

    pub(crate) async fn record_failure(&self, id: &ConnectionId, expected: SyncStatus, err: &SyncError) {
        match self
            .stores
            .connections
            .patch_connection_if(id, expected, state::fail(err))
            .await
        {
            Ok(Some(_)) => warn!(connection = %id, error = %err.to_compact(), "connection moved to error"),
            Ok(None) => debug!(connection = %id, "status changed, failure not recorded"),
            Err(e) => error!(connection = %id, %e, "failed to record sync failure"),
        }
    }
}
