//! Connection state machine.
//!
//! Every status change a cycle makes is computed here as a
//! [`ConnectionPatch`]; callers only decide when to write it. Resume fields
//! (`sync_page_token`, `sync_started_at`) are cleared on every exit from
//! `syncing`, so a non-syncing connection never holds resume state.

use harvest_domain::{Connection, ConnectionPatch, SyncStatus};
use harvest_error::SyncError;

use crate::progress::batch_message;

/// What one tick did, as seen by the state machine.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BatchOutcome {
    /// Messages fetched (and witnessed) this tick.
    pub processed: u64,
    /// Messages whose fetch failed this tick.
    pub failed: u64,
    pub new_addresses: u64,
    /// Unsynced ids were left in the page because of the cap.
    pub more_in_page: bool,
    pub next_page_token: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NextAction {
    ScheduleNext,
    Finish,
}

pub fn begin_cycle(folder_total: u64, already_synced: u64, now: i64) -> ConnectionPatch {
    ConnectionPatch::new()
        .status(SyncStatus::Syncing)
        .total_messages_to_sync(Some(folder_total.max(already_synced)))
        .messages_processed(Some(already_synced))
        .sync_page_token(None)
        .sync_started_at(Some(now))
        .progress_message(Some(format!("Starting sync of {folder_total} messages...")))
        .last_error(None)
}

/// Decide the follow-up of a tick from the record it started with. A capped
/// page in which every fetch failed is an error and never finishes the cycle.
pub fn after_batch(
    conn: &Connection,
    outcome: &BatchOutcome,
    now: i64,
) -> Result<(ConnectionPatch, NextAction), SyncError> {
    if outcome.more_in_page && outcome.processed == 0 {
        return Err(SyncError::provider(format!(
            "{} messages failed in page",
            outcome.failed
        )));
    }

    let processed = conn.messages_processed.unwrap_or(0) + outcome.processed;
    let total = conn.total_messages_to_sync.unwrap_or(0).max(processed);
    let more_in_page = outcome.more_in_page;
    let has_more = more_in_page || outcome.next_page_token.is_some();

    if !has_more {
        let patch = ConnectionPatch::new()
            .status(SyncStatus::Idle)
            .last_sync_at(Some(now))
            .messages_processed(Some(processed))
            .total_messages_to_sync(Some(total))
            .sync_page_token(None)
            .sync_started_at(None)
            .progress_message(None)
            .last_error(None);
        return Ok((patch, NextAction::Finish));
    }

    let token = if more_in_page {
        conn.sync_page_token.clone()
    } else {
        outcome.next_page_token.clone()
    };
    let patch = ConnectionPatch::new()
        .messages_processed(Some(processed))
        .total_messages_to_sync(Some(total))
        .sync_page_token(token)
        .progress_message(Some(batch_message(processed, total, outcome.new_addresses)));
    Ok((patch, NextAction::ScheduleNext))
}

pub fn fail(err: &SyncError) -> ConnectionPatch {
    ConnectionPatch::new()
        .status(SyncStatus::Error)
        .last_error(Some(err.description()))
        .progress_message(None)
        .sync_page_token(None)
        .sync_started_at(None)
}

pub fn cancel() -> ConnectionPatch {
    ConnectionPatch::new()
        .status(SyncStatus::Idle)
        .progress_message(Some("Sync cancelled by user".to_string()))
        .sync_page_token(None)
        .sync_started_at(None)
}

/// Unstick a connection, keeping the witness count as progress.
pub fn soft_reset(synced_count: u64) -> ConnectionPatch {
    ConnectionPatch::new()
        .status(SyncStatus::Idle)
        .messages_processed(Some(synced_count))
        .sync_page_token(None)
        .sync_started_at(None)
        .progress_message(None)
        .last_error(None)
}

pub fn begin_teardown(status: SyncStatus) -> ConnectionPatch {
    let label = match status {
        SyncStatus::Deleting => "Deleting connection data...",
        _ => "Clearing sync history...",
    };
    ConnectionPatch::new()
        .status(status)
        .sync_page_token(None)
        .sync_started_at(None)
        .progress_message(Some(label.to_string()))
}

pub fn finish_full_reset() -> ConnectionPatch {
    ConnectionPatch::new()
        .status(SyncStatus::Idle)
        .sync_page_token(None)
        .sync_started_at(None)
        .messages_processed(None)
        .total_messages_to_sync(None)
        .last_sync_at(None)
        .last_error(None)
        .progress_message(None)
}
