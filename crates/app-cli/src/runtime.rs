//! In-process stand-in for a hosted task scheduler: delayed tasks are timers
//! feeding one channel, and a worker runs whatever arrives.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use harvest_domain::{Task, TaskScheduler};
use harvest_error::SyncError;
use harvest_memstore::MemoryStore;
use harvest_sync::SyncEngine;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time::{interval_at, Instant, MissedTickBehavior};
use tracing::{debug, error, info, warn};

pub struct TaskQueue {
    tx: mpsc::UnboundedSender<Task>,
}

impl TaskQueue {
    pub fn new() -> (Self, mpsc::UnboundedReceiver<Task>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Self { tx }, rx)
    }
}

#[async_trait]
impl TaskScheduler for TaskQueue {
    async fn schedule_after(&self, delay: Duration, task: Task) -> Result<(), SyncError> {
        if self.tx.is_closed() {
            return Err(SyncError::internal(format!("task queue closed, dropping {task}")));
        }
        let tx = self.tx.clone();
        tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            if let Err(e) = tx.send(task) {
                warn!(task = %e.0, "worker gone, task dropped");
            }
        });
        Ok(())
    }
}

/// Run every task that comes off the queue. Tasks of different connections
/// run concurrently; one connection's ticks are already chained.
pub fn spawn_worker(engine: Arc<SyncEngine>, mut rx: mpsc::UnboundedReceiver<Task>) -> JoinHandle<()> {
    tokio::spawn(async move {
        while let Some(task) = rx.recv().await {
            let engine = engine.clone();
            tokio::spawn(async move {
                debug!(%task, "running task");
                engine.run_task(task).await;
            });
        }
        debug!("task queue closed, worker stopping");
    })
}

pub fn spawn_sweep(engine: Arc<SyncEngine>) -> JoinHandle<()> {
    let every = engine.config().sweep_interval;
    tokio::spawn(async move {
        let mut ticker = interval_at(Instant::now(), every);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
        info!(interval_secs = every.as_secs(), "sweep scheduled");
        loop {
            ticker.tick().await;
            match engine.run_due_syncs().await {
                Ok(report) => debug!(?report, "sweep done"),
                Err(e) => error!(%e, "sweep failed"),
            }
        }
    })
}

pub fn spawn_snapshots(store: Arc<MemoryStore>, path: PathBuf, every: Duration) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut ticker = interval_at(Instant::now() + every, every);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
        loop {
            ticker.tick().await;
            if let Err(e) = store.persist(&path) {
                error!(%e, path = %path.display(), "snapshot failed");
            }
        }
    })
}
