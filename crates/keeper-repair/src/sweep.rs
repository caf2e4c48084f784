//! Periodic integrity sweep over every tracked partition.

use std::sync::Arc;
use std::time::Duration;

use keeper_types::unix_now;
use tracing::{debug, info};

use crate::checker::{CheckReport, ConsistencyChecker};
use crate::partition::PartitionTable;

/// Totals of one sweep across all partitions.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct SweepSummary {
    /// Partitions checked.
    pub partitions: usize,
    /// Partitions with no live replica.
    pub unavailable: usize,
    /// Files compared.
    pub files_checked: usize,
    /// Files skipped as too recently modified.
    pub skipped_recent: usize,
    /// Files skipped for non-extent names.
    pub skipped_malformed: usize,
    /// Warnings raised.
    pub warnings: usize,
    /// Replicas blamed for a bad checksum.
    pub bad_replicas: usize,
}

impl SweepSummary {
    fn absorb(&mut self, report: &CheckReport) {
        self.partitions += 1;
        if report.live_replicas == 0 {
            self.unavailable += 1;
        }
        self.files_checked += report.files_checked;
        self.skipped_recent += report.skipped_recent;
        self.skipped_malformed += report.skipped_malformed;
        self.warnings += report.warnings.len();
        self.bad_replicas += report.bad_replicas().len();
    }
}

/// Runs the [`ConsistencyChecker`] over a [`PartitionTable`].
pub struct IntegritySweeper {
    table: Arc<PartitionTable>,
    checker: Arc<ConsistencyChecker>,
    cluster_id: String,
}

impl IntegritySweeper {
    pub fn new(
        table: Arc<PartitionTable>,
        checker: Arc<ConsistencyChecker>,
        cluster_id: impl Into<String>,
    ) -> Self {
        Self {
            table,
            checker,
            cluster_id: cluster_id.into(),
        }
    }

    /// Sweep all partitions against the wall clock.
    pub fn sweep(&self) -> SweepSummary {
        self.sweep_at(unix_now())
    }

    /// Sweep all partitions as of `now`.
    ///
    /// Partitions are checked one at a time; each check takes only that
    /// partition's lock.
    pub fn sweep_at(&self, now: u64) -> SweepSummary {
        let mut summary = SweepSummary::default();

        for partition in self.table.partitions() {
            let report = self
                .checker
                .check_partition_at(&partition, &self.cluster_id, now);
            summary.absorb(&report);
        }

        if summary.warnings > 0 {
            info!(
                partitions = summary.partitions,
                files_checked = summary.files_checked,
                warnings = summary.warnings,
                bad_replicas = summary.bad_replicas,
                "integrity sweep complete"
            );
        } else {
            debug!(
                partitions = summary.partitions,
                files_checked = summary.files_checked,
                "integrity sweep complete"
            );
        }

        summary
    }

    /// Sweep every `interval` until `shutdown` changes.
    pub async fn run(&self, interval: Duration, mut shutdown: tokio::sync::watch::Receiver<bool>) {
        info!(?interval, "integrity sweeper started");

        let mut ticker = tokio::time::interval(interval);

        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    self.sweep();
                }
                _ = shutdown.changed() => {
                    info!("integrity sweeper shutting down");
                    break;
                }
            }
        }

        info!("integrity sweeper stopped");
    }

    /// Spawn the sweep loop at the checker's configured interval.
    pub fn spawn(self: Arc<Self>) -> SweepHandle {
        let interval = Duration::from_millis(self.checker.config().sweep_interval_ms.max(1));
        let (shutdown_tx, shutdown_rx) = tokio::sync::watch::channel(false);

        let task = tokio::spawn(async move {
            self.run(interval, shutdown_rx).await;
        });

        SweepHandle { shutdown_tx, task }
    }
}

/// Handle to a spawned integrity sweep loop.
pub struct SweepHandle {
    shutdown_tx: tokio::sync::watch::Sender<bool>,
    task: tokio::task::JoinHandle<()>,
}

impl SweepHandle {
    /// Signal the loop to stop.
    pub fn shutdown(&self) {
        let _ = self.shutdown_tx.send(true);
    }

    /// Signal the loop to stop and wait for it to finish.
    pub async fn stop(self) {
        self.shutdown();
        let _ = self.task.await;
    }

    pub fn is_running(&self) -> bool {
        !self.task.is_finished()
    }
}
