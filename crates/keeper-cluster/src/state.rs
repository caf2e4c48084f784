//! Cluster state: the meta node registry and write placement.
//!
//! [`ClusterState`] is the shared, read-mostly structure that the liveness
//! tracker and placement logic use to find the metadata nodes of the
//! cluster and pick write targets among them.

use std::collections::HashMap;
use std::sync::Arc;

use keeper_placement::CarryScheduler;
use keeper_types::MasterConfig;
use keeper_types::events::EventBus;
use parking_lot::RwLock;
use tracing::{debug, info};

use crate::capacity::CapacityGate;
use crate::error::ClusterError;
use crate::node::{MetaNode, MetaNodeView};

/// Shared registry of metadata nodes.
///
/// The map lock is only held long enough to clone node handles out; node
/// locks are never taken while it is held.
pub struct ClusterState {
    /// Identifier of this cluster, stamped on emitted warnings.
    cluster_id: String,
    /// Registered meta nodes, keyed by address.
    nodes: RwLock<HashMap<String, Arc<MetaNode>>>,
    /// Bus for node liveness events.
    events: EventBus,
    gate: CapacityGate,
    scheduler: CarryScheduler,
}

impl ClusterState {
    /// Create an empty cluster state.
    pub fn new(cluster_id: impl Into<String>, config: &MasterConfig, events: EventBus) -> Arc<Self> {
        Arc::new(Self {
            cluster_id: cluster_id.into(),
            nodes: RwLock::new(HashMap::new()),
            events,
            gate: CapacityGate::new(config.capacity),
            scheduler: CarryScheduler::new(config.placement.carry_cap),
        })
    }

    /// Return the cluster identifier.
    pub fn cluster_id(&self) -> &str {
        &self.cluster_id
    }

    /// Return the event bus liveness events are published on.
    pub fn events(&self) -> &EventBus {
        &self.events
    }

    pub fn capacity_gate(&self) -> &CapacityGate {
        &self.gate
    }

    pub fn scheduler(&self) -> &CarryScheduler {
        &self.scheduler
    }

    /// Register a new meta node. It starts inactive until its first heartbeat.
    pub fn register_meta_node(&self, addr: impl Into<String>) -> Result<Arc<MetaNode>, ClusterError> {
        let addr = addr.into();
        let mut nodes = self.nodes.write();
        if nodes.contains_key(&addr) {
            return Err(ClusterError::NodeExists(addr));
        }
        let node = Arc::new(MetaNode::new(addr.clone()));
        nodes.insert(addr.clone(), node.clone());
        drop(nodes);

        info!(%addr, "meta node registered");
        Ok(node)
    }

    /// Remove a meta node from the registry.
    pub fn remove_meta_node(&self, addr: &str) -> Result<Arc<MetaNode>, ClusterError> {
        let node = self
            .nodes
            .write()
            .remove(addr)
            .ok_or_else(|| ClusterError::NodeNotFound(addr.to_string()))?;

        info!(%addr, "meta node removed");
        Ok(node)
    }

    /// Look up a meta node by address.
    pub fn meta_node(&self, addr: &str) -> Result<Arc<MetaNode>, ClusterError> {
        self.nodes
            .read()
            .get(addr)
            .cloned()
            .ok_or_else(|| ClusterError::NodeNotFound(addr.to_string()))
    }

    /// Return all registered nodes, ordered by address.
    pub fn meta_nodes(&self) -> Vec<Arc<MetaNode>> {
        let mut nodes: Vec<_> = self.nodes.read().values().cloned().collect();
        nodes.sort_by(|a, b| a.addr().cmp(b.addr()));
        nodes
    }

    /// Return the number of registered nodes.
    pub fn node_count(&self) -> usize {
        self.nodes.read().len()
    }

    /// Return the number of active nodes.
    pub fn active_count(&self) -> usize {
        self.meta_nodes().iter().filter(|n| n.is_active()).count()
    }

    /// Return the nodes that currently pass the [`CapacityGate`].
    pub fn writable_meta_nodes(&self) -> Vec<Arc<MetaNode>> {
        self.meta_nodes()
            .into_iter()
            .filter(|n| self.gate.is_writable(n))
            .collect()
    }

    /// Pick `replica_num` writable hosts for a new metadata partition,
    /// skipping any address in `exclude`.
    pub fn select_meta_hosts(
        &self,
        replica_num: usize,
        exclude: &[String],
    ) -> Result<Vec<String>, ClusterError> {
        let candidates: Vec<Arc<MetaNode>> = self
            .writable_meta_nodes()
            .into_iter()
            .filter(|n| !exclude.iter().any(|e| e == n.addr()))
            .collect();

        let chosen = self.scheduler.select_write_targets(&candidates, replica_num)?;
        let hosts: Vec<String> = chosen.iter().map(|n| n.addr().to_string()).collect();

        debug!(?hosts, candidates = candidates.len(), "selected meta hosts");
        Ok(hosts)
    }

    /// Snapshot every registered node, ordered by address.
    pub fn snapshot(&self) -> Vec<MetaNodeView> {
        self.meta_nodes().iter().map(|n| n.snapshot()).collect()
    }
}

impl std::fmt::Debug for ClusterState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ClusterState")
            .field("cluster_id", &self.cluster_id)
            .field("gate", &self.gate)
            .field("scheduler", &self.scheduler)
            .finish_non_exhaustive()
    }
}
