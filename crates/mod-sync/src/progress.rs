use std::fmt;
use std::time::Duration;

use harvest_domain::{Connection, ConnectionId, SyncStatus};
use serde::Serialize;

pub fn percent_complete(processed: u64, total: u64) -> u8 {
    if total == 0 {
        return 0;
    }
    let pct = (processed as f64 / total as f64 * 100.0).round();
    pct.clamp(0.0, 100.0) as u8
}

/// Linear extrapolation of the observed rate. `None` until there is a rate.
pub fn estimated_remaining(processed: u64, total: u64, elapsed: Duration) -> Option<Duration> {
    if processed == 0 || elapsed.is_zero() {
        return None;
    }
    let rate = processed as f64 / elapsed.as_secs_f64();
    let left = total.saturating_sub(processed) as f64;
    Some(Duration::from_secs_f64(left / rate))
}

pub fn elapsed_since(started_at: Option<i64>, now: i64) -> Duration {
    started_at
        .map(|start| Duration::from_millis(now.saturating_sub(start).max(0) as u64))
        .unwrap_or_default()
}

/// Advisory: a cycle that has a total but has not moved for `threshold`.
pub fn is_stuck(conn: &Connection, now: i64, threshold: Duration) -> bool {
    let total = conn.total_messages_to_sync.unwrap_or(0);
    let processed = conn.messages_processed.unwrap_or(0);
    conn.status == SyncStatus::Syncing
        && total > 0
        && processed == 0
        && elapsed_since(conn.sync_started_at, now) > threshold
}

pub fn batch_message(processed: u64, total: u64, new_addresses: u64) -> String {
    let pct = percent_complete(processed, total);
    format!(
        "Syncing... {processed}/{total} ({pct}%) - Found {new_addresses} new addresses this batch"
    )
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SyncProgress {
    pub connection_id: ConnectionId,
    pub status: SyncStatus,
    pub processed: u64,
    pub total: u64,
    pub percent: u8,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub eta_secs: Option<u64>,
    pub stuck: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_error: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_sync_at: Option<i64>,
}

impl SyncProgress {
    pub fn of(conn: &Connection, now: i64, stuck_after: Duration) -> Self {
        let processed = conn.messages_processed.unwrap_or(0);
        let total = conn.total_messages_to_sync.unwrap_or(0);
        let eta = if conn.is_syncing() {
            estimated_remaining(processed, total, elapsed_since(conn.sync_started_at, now))
        } else {
            None
        };
        Self {
            connection_id: conn.id.clone(),
            status: conn.status,
            processed,
            total,
            percent: percent_complete(processed, total),
            eta_secs: eta.map(|d| d.as_secs()),
            stuck: is_stuck(conn, now, stuck_after),
            message: conn.progress_message.clone(),
            last_error: conn.last_error.clone(),
            last_sync_at: conn.last_sync_at,
        }
    }
}

impl fmt::Display for SyncProgress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[{}] {}", self.connection_id, self.status)?;
        if self.total > 0 {
            write!(f, " {}/{} ({}%)", self.processed, self.total, self.percent)?;
        }
        if let Some(eta) = self.eta_secs {
            write!(f, " eta:{}m{:02}s", eta / 60, eta % 60)?;
        }
        if self.stuck {
            write!(f, " STUCK (try `reset`)")?;
        }
        if let Some(ref msg) = self.message {
            write!(f, " | {msg}")?;
        }
        if let Some(ref err) = self.last_error {
            write!(f, " | error: {err}")?;
        }
        Ok(())
    }
}
