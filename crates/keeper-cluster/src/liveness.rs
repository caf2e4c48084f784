//! Heartbeat ingestion and timeout sweeps for metadata nodes.
//!
//! A node is active while heartbeats keep arriving. The background sweep
//! demotes nodes that have been silent for longer than the configured
//! timeout; the next heartbeat promotes them again.

use std::sync::Arc;
use std::time::Duration;

use keeper_types::events::{NodeActivated, NodeInactive};
use keeper_types::{LivenessConfig, MetaNodeHeartbeat, unix_now};
use tracing::{debug, info, warn};

use crate::error::ClusterError;
use crate::state::ClusterState;

/// Tracks node liveness from heartbeats and timeouts.
pub struct LivenessTracker {
    cluster: Arc<ClusterState>,
    config: LivenessConfig,
    /// Threshold stamped onto nodes at heartbeat ingestion.
    node_threshold: f32,
}

impl LivenessTracker {
    pub fn new(cluster: Arc<ClusterState>, config: LivenessConfig, node_threshold: f32) -> Self {
        Self {
            cluster,
            config,
            node_threshold,
        }
    }

    /// Return the shared cluster state.
    pub fn cluster(&self) -> &Arc<ClusterState> {
        &self.cluster
    }

    /// Apply a heartbeat from `addr` using the wall clock.
    pub fn ingest_heartbeat(&self, addr: &str, report: &MetaNodeHeartbeat) -> Result<(), ClusterError> {
        self.ingest_heartbeat_at(addr, report, unix_now())
    }

    /// Apply a heartbeat from `addr` received at `now`.
    pub fn ingest_heartbeat_at(
        &self,
        addr: &str,
        report: &MetaNodeHeartbeat,
        now: u64,
    ) -> Result<(), ClusterError> {
        let node = self.cluster.meta_node(addr)?;
        let activated = node.ingest_heartbeat(report, self.node_threshold, now);

        debug!(%addr, total = report.total, used = report.used, partitions = report.partitions.len(), "heartbeat");
        if activated {
            info!(%addr, "meta node active");
            self.cluster.events().emit(NodeActivated {
                addr: addr.to_string(),
            });
        }
        Ok(())
    }

    /// Demote silent nodes using the wall clock.
    pub fn sweep(&self) -> Vec<String> {
        self.sweep_at(unix_now())
    }

    /// Demote every node silent for longer than the timeout as of `now`.
    ///
    /// Returns the addresses demoted by this sweep.
    pub fn sweep_at(&self, now: u64) -> Vec<String> {
        let mut demoted = Vec::new();

        for node in self.cluster.meta_nodes() {
            if let Some(silent_secs) = node.check_heartbeat_at(now, self.config.node_timeout_secs) {
                warn!(addr = node.addr(), silent_secs, "meta node inactive");
                self.cluster.events().emit(NodeInactive {
                    addr: node.addr().to_string(),
                    silent_secs,
                });
                demoted.push(node.addr().to_string());
            }
        }

        demoted
    }

    /// Sweep every `interval` until `shutdown` changes.
    pub async fn run(&self, interval: Duration, mut shutdown: tokio::sync::watch::Receiver<bool>) {
        info!(?interval, "liveness tracker started");

        let mut ticker = tokio::time::interval(interval);

        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    self.sweep();
                }
                _ = shutdown.changed() => {
                    info!("liveness tracker shutting down");
                    break;
                }
            }
        }

        info!("liveness tracker stopped");
    }

    /// Spawn the sweep loop at the configured interval and return a handle.
    pub fn spawn(self: Arc<Self>) -> LivenessHandle {
        let interval = Duration::from_millis(self.config.sweep_interval_ms.max(1));
        let (shutdown_tx, shutdown_rx) = tokio::sync::watch::channel(false);

        let task = tokio::spawn(async move {
            self.run(interval, shutdown_rx).await;
        });

        LivenessHandle { shutdown_tx, task }
    }
}

/// Handle to a spawned liveness sweep loop.
pub struct LivenessHandle {
    shutdown_tx: tokio::sync::watch::Sender<bool>,
    task: tokio::task::JoinHandle<()>,
}

impl LivenessHandle {
    /// Signal the loop to stop.
    pub fn shutdown(&self) {
        let _ = self.shutdown_tx.send(true);
    }

    /// Signal the loop to stop and wait for it to finish.
    pub async fn stop(self) {
        self.shutdown();
        let _ = self.task.await;
    }

    /// Check whether the loop is still running.
    pub fn is_running(&self) -> bool {
        !self.task.is_finished()
    }
}
