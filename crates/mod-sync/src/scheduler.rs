use harvest_domain::{Connection, SyncSchedule, SyncStatus, Task};
use harvest_error::SyncError;
use tracing::{error, info};

use crate::driver::StartOutcome;
use crate::engine::SyncEngine;

/// Whether the sweep should start a new cycle for `conn` at `now`.
pub fn is_due(conn: &Connection, now: i64) -> bool {
    if !conn.is_active || conn.status == SyncStatus::Syncing {
        return false;
    }
    if conn.schedule == SyncSchedule::Manual {
        return false;
    }
    let Some(interval) = conn.schedule.interval() else {
        return false;
    };
    let last = conn.last_sync_at.unwrap_or(0);
    now.saturating_sub(last) >= interval.as_millis() as i64
}

pub fn due_connections(conns: Vec<Connection>, now: i64) -> Vec<Connection> {
    conns.into_iter().filter(|c| is_due(c, now)).collect()
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SweepReport {
    pub due: usize,
    pub started: usize,
    pub already_running: usize,
    pub exported: usize,
    pub failed: usize,
}

impl SyncEngine {
    /// Start a cycle and an export for every due connection. One
    /// connection failing does not stop the sweep.
    pub async fn run_due_syncs(&self) -> Result<SweepReport, SyncError> {
        let all = self.stores.connections.list_connections().await?;
        let due = due_connections(all, self.now());
        let mut report = SweepReport {
            due: due.len(),
            ..SweepReport::default()
        };

        for conn in &due {
            match self.start_cycle(&conn.id).await {
                Ok(StartOutcome::Started { .. }) => report.started += 1,
                Ok(StartOutcome::AlreadyRunning) => report.already_running += 1,
                Err(e) => {
                    error!(connection = %conn.id, %e, "scheduled sync failed");
                    report.failed += 1;
                    continue;
                }
            }

            match self.export_contacts(&conn.id).await {
                Ok(summary) => {
                    report.exported += summary.updated + summary.appended;
                }
                Err(e) => {
                    error!(connection = %conn.id, %e, "scheduled export failed");
                    report.failed += 1;
                }
            }
        }

        info!(
            due = report.due,
            started = report.started,
            failed = report.failed,
            "sweep finished"
        );
        Ok(report)
    }

    /// Re-arm the task chains of connections caught mid-cycle or
    /// mid-teardown, for a runtime whose timers did not survive a restart.
    pub async fn resume_pending(&self) -> Result<usize, SyncError> {
        let mut resumed = 0;
        for conn in self.stores.connections.list_connections().await? {
            let task = match conn.status {
                SyncStatus::Syncing => Task::ProcessBatch(conn.id.clone()),
                SyncStatus::Deleting | SyncStatus::Resetting => Task::DeleteBatch(conn.id.clone()),
                SyncStatus::Idle | SyncStatus::Error => continue,
            };
            self.tasks
                .schedule_after(self.config.first_batch_delay, task)
                .await?;
            info!(connection = %conn.id, status = %conn.status, "resuming pending work");
            resumed += 1;
        }
        Ok(resumed)
    }
}
