//! Shared test harness for Keeper integration tests.
//!
//! Provides [`TestMaster`]: a master core wired the way the daemon wires it
//! (cluster registry, liveness tracker, partition table, checker, sweeper,
//! one shared event bus) with helpers that feed it heartbeats and replica
//! reports at explicit timestamps.

use std::sync::Arc;

use keeper_cluster::{ClusterState, LivenessTracker, MetaNode};
use keeper_repair::{ConsistencyChecker, DataPartition, IntegritySweeper, PartitionTable};
use keeper_types::events::EventBus;
use keeper_types::{
    MasterConfig, MetaNodeHeartbeat, MetaPartitionReport, PartitionId, ReplicaFileMeta,
};

/// One gibibyte.
pub const GIB: u64 = 1 << 30;

/// Fixed clock origin used by every test.
pub const T0: u64 = 1_700_000_000;

/// Cluster ID stamped on warnings raised through the harness.
pub const CLUSTER_ID: &str = "it-cluster";

/// Address of the `i`-th test node.
pub fn node_addr(i: usize) -> String {
    format!("10.0.0.{}:9021", i + 1)
}

/// Heartbeat with the given memory figures and no hosted partitions.
pub fn heartbeat(total: u64, used: u64) -> MetaNodeHeartbeat {
    MetaNodeHeartbeat {
        total,
        used,
        rack_name: "rack-a".to_string(),
        partitions: Vec::new(),
    }
}

/// Heartbeat reporting `partitions` hosted partitions, the first one led.
pub fn heartbeat_with_partitions(total: u64, used: u64, partitions: usize) -> MetaNodeHeartbeat {
    let mut report = heartbeat(total, used);
    report.partitions = (0..partitions as u64)
        .map(|id| MetaPartitionReport {
            partition_id: PartitionId::new(id),
            is_leader: id == 0,
        })
        .collect();
    report
}

/// A master core with every component sharing one [`EventBus`].
pub struct TestMaster {
    pub config: MasterConfig,
    pub events: EventBus,
    pub cluster: Arc<ClusterState>,
    pub liveness: Arc<LivenessTracker>,
    pub table: Arc<PartitionTable>,
    pub checker: Arc<ConsistencyChecker>,
    pub sweeper: Arc<IntegritySweeper>,
}

impl TestMaster {
    /// A master with default configuration.
    pub fn new() -> Self {
        Self::with_config(MasterConfig::default())
    }

    pub fn with_config(config: MasterConfig) -> Self {
        let events = EventBus::new();
        let cluster = ClusterState::new(CLUSTER_ID, &config, events.clone());
        let liveness = Arc::new(LivenessTracker::new(
            cluster.clone(),
            config.liveness,
            config.capacity.node_threshold,
        ));
        let table = Arc::new(PartitionTable::new());
        let checker = Arc::new(ConsistencyChecker::new(config.checker, events.clone()));
        let sweeper = Arc::new(IntegritySweeper::new(
            table.clone(),
            checker.clone(),
            CLUSTER_ID,
        ));

        Self {
            config,
            events,
            cluster,
            liveness,
            table,
            checker,
            sweeper,
        }
    }

    /// Register a node and deliver its first heartbeat at `now`.
    pub fn add_meta_node(&self, addr: &str, report: &MetaNodeHeartbeat, now: u64) -> Arc<MetaNode> {
        let node = self.cluster.register_meta_node(addr).unwrap();
        self.liveness.ingest_heartbeat_at(addr, report, now).unwrap();
        node
    }

    /// Register `n` nodes with `total` bytes and nothing used, all reporting at `now`.
    pub fn add_meta_nodes(&self, n: usize, total: u64, now: u64) -> Vec<String> {
        (0..n)
            .map(|i| {
                let addr = node_addr(i);
                self.add_meta_node(&addr, &heartbeat(total, 0), now);
                addr
            })
            .collect()
    }

    /// Track a data partition whose replicas all reported at `now`.
    pub fn add_partition(&self, id: u64, hosts: &[String], now: u64) -> Arc<DataPartition> {
        let partition = DataPartition::new(PartitionId::new(id), "vol", hosts.len(), hosts.to_vec());
        for host in hosts {
            partition.record_replica_report(host, now);
        }
        self.table.insert(partition).unwrap()
    }

    /// Record one file as reported by each `(addr, size, crc)` replica.
    pub fn report_file(
        &self,
        partition: &DataPartition,
        name: &str,
        metas: &[(&str, u64, u32)],
        last_modify: u64,
    ) {
        for &(addr, size, crc) in metas {
            partition.record_file_meta(name, ReplicaFileMeta::new(addr, size, crc), last_modify);
        }
    }
}

impl Default for TestMaster {
    fn default() -> Self {
        Self::new()
    }
}
