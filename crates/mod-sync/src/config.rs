use std::time::Duration;

/// Tunables for the batch driver, the deletion batches and the sweep.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SyncConfig {
    /// Most messages fetched in one tick.
    pub batch_size: usize,
    /// Pause between ticks of one connection.
    pub batch_delay: Duration,
    /// Pause between a cycle start and its first tick.
    pub first_batch_delay: Duration,
    /// Most records removed by one deletion tick.
    pub deletion_page_size: usize,
    pub deletion_delay: Duration,
    /// A cycle with no progress for this long is reported as stuck.
    pub stuck_after: Duration,
    pub sweep_interval: Duration,
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            batch_size: 200,
            batch_delay: Duration::from_millis(500),
            first_batch_delay: Duration::from_millis(100),
            deletion_page_size: 500,
            deletion_delay: Duration::from_millis(100),
            stuck_after: Duration::from_secs(2 * 60),
            sweep_interval: Duration::from_secs(15 * 60),
        }
    }
}
