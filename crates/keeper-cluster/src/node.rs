//! Metadata-service node state.

use std::fmt;

use keeper_placement::{NodeCapacity, Schedulable, capped_carry};
use keeper_types::MetaNodeHeartbeat;
use parking_lot::{RwLock, RwLockReadGuard};
use rand::Rng;
use serde::Serialize;

/// Mutable state of a [`MetaNode`], guarded by the node's lock.
#[derive(Debug, Clone)]
pub(crate) struct MetaNodeState {
    pub(crate) is_active: bool,
    pub(crate) report_time: u64,
    pub(crate) total: u64,
    pub(crate) used: u64,
    pub(crate) max_available: u64,
    pub(crate) ratio: f64,
    pub(crate) threshold: f32,
    pub(crate) partition_count: usize,
    pub(crate) leader_count: usize,
    pub(crate) rack_name: String,
    pub(crate) carry: f64,
    pub(crate) select_count: u64,
}

impl MetaNodeState {
    /// Whether memory usage is above the node's threshold, or above
    /// `default_threshold` if the node has none.
    pub(crate) fn reaches_threshold(&self, default_threshold: f32) -> bool {
        let threshold = if self.threshold <= 0.0 {
            default_threshold
        } else {
            self.threshold
        };
        self.ratio as f32 > threshold
    }

    fn mark_alive(&mut self, now: u64) -> bool {
        let was_inactive = !self.is_active;
        self.report_time = now;
        self.is_active = true;
        was_inactive
    }

    fn apply_metric(&mut self, report: &MetaNodeHeartbeat, threshold: f32) {
        self.total = report.total;
        self.used = report.used;
        self.max_available = report.total.saturating_sub(report.used);
        self.ratio = if report.total == 0 {
            0.0
        } else {
            report.used as f64 / report.total as f64
        };
        self.threshold = threshold;
        self.partition_count = report.partitions.len();
        self.leader_count = report.partitions.iter().filter(|p| p.is_leader).count();
        self.rack_name.clone_from(&report.rack_name);
    }

    fn spend_carry(&mut self) {
        self.select_count += 1;
        self.carry -= 1.0;
    }
}

/// A metadata-service node as seen by the master.
///
/// The address is fixed at registration. Everything else lives behind one
/// `RwLock`: heartbeats and scheduler primitives take it exclusively,
/// writability checks and snapshots take it shared.
pub struct MetaNode {
    addr: String,
    state: RwLock<MetaNodeState>,
}

impl MetaNode {
    /// Create an inactive node that has never reported.
    ///
    /// The initial carry is drawn uniformly from `[0, 1)` so that freshly
    /// registered nodes do not all become available in the same round.
    pub fn new(addr: impl Into<String>) -> Self {
        let carry = rand::rng().random::<f64>();
        Self {
            addr: addr.into(),
            state: RwLock::new(MetaNodeState {
                is_active: false,
                report_time: 0,
                total: 0,
                used: 0,
                max_available: 0,
                ratio: 0.0,
                threshold: 0.0,
                partition_count: 0,
                leader_count: 0,
                rack_name: String::new(),
                carry,
                select_count: 0,
            }),
        }
    }

    /// The node's address.
    pub fn addr(&self) -> &str {
        &self.addr
    }

    /// Whether the node is currently considered alive.
    pub fn is_active(&self) -> bool {
        self.state.read().is_active
    }

    /// Unix time of the last heartbeat (`0` if never).
    pub fn report_time(&self) -> u64 {
        self.state.read().report_time
    }

    /// Number of times the scheduler picked this node.
    pub fn select_count(&self) -> u64 {
        self.state.read().select_count
    }

    pub(crate) fn state(&self) -> RwLockReadGuard<'_, MetaNodeState> {
        self.state.read()
    }

    /// Mark the node alive as of `now`. Returns `true` if it was inactive.
    pub fn set_node_alive_at(&self, now: u64) -> bool {
        self.state.write().mark_alive(now)
    }

    /// Demote the node if it has been silent for longer than `timeout_secs`.
    ///
    /// Returns the silence in seconds if this call made the node inactive.
    pub fn check_heartbeat_at(&self, now: u64, timeout_secs: u64) -> Option<u64> {
        let mut state = self.state.write();
        let silent = now.saturating_sub(state.report_time);
        if silent <= timeout_secs {
            return None;
        }
        let demoted = state.is_active;
        state.is_active = false;
        demoted.then_some(silent)
    }

    /// Refresh capacity metrics from a heartbeat report.
    pub fn update_metric(&self, report: &MetaNodeHeartbeat, threshold: f32) {
        self.state.write().apply_metric(report, threshold);
    }

    /// Apply a heartbeat: mark alive and refresh metrics under one write guard.
    ///
    /// Returns `true` if the node transitioned from inactive to active.
    pub fn ingest_heartbeat(&self, report: &MetaNodeHeartbeat, threshold: f32, now: u64) -> bool {
        let mut state = self.state.write();
        let activated = state.mark_alive(now);
        state.apply_metric(report, threshold);
        activated
    }

    /// Whether memory usage is above the node's threshold.
    pub fn reaches_threshold(&self, default_threshold: f32) -> bool {
        self.state.read().reaches_threshold(default_threshold)
    }

    /// A point-in-time copy of the node's state.
    pub fn snapshot(&self) -> MetaNodeView {
        let state = self.state.read();
        MetaNodeView {
            addr: self.addr.clone(),
            is_active: state.is_active,
            report_time: state.report_time,
            total: state.total,
            used: state.used,
            max_available: state.max_available,
            ratio: state.ratio,
            threshold: state.threshold,
            partition_count: state.partition_count,
            leader_count: state.leader_count,
            rack_name: state.rack_name.clone(),
            carry: state.carry,
            select_count: state.select_count,
        }
    }
}

impl Schedulable for MetaNode {
    fn addr(&self) -> &str {
        &self.addr
    }

    fn carry(&self) -> f64 {
        self.state.read().carry
    }

    fn set_carry(&self, carry: f64) {
        self.state.write().carry = carry;
    }

    fn add_carry(&self, delta: f64, cap: f64) -> f64 {
        let mut state = self.state.write();
        state.carry = capped_carry(state.carry, delta, cap);
        state.carry
    }

    fn select_for_write(&self) {
        self.state.write().spend_carry();
    }

    fn try_select_for_write(&self) -> bool {
        let mut state = self.state.write();
        if state.carry < 1.0 {
            return false;
        }
        state.spend_carry();
        true
    }

    fn capacity(&self) -> NodeCapacity {
        let state = self.state.read();
        NodeCapacity {
            total: state.total,
            max_available: state.max_available,
        }
    }
}

impl fmt::Debug for MetaNode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MetaNode")
            .field("addr", &self.addr)
            .field("state", &*self.state.read())
            .finish()
    }
}

/// Serializable snapshot of a [`MetaNode`].
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct MetaNodeView {
    pub addr: String,
    pub is_active: bool,
    pub report_time: u64,
    pub total: u64,
    pub used: u64,
    pub max_available: u64,
    pub ratio: f64,
    pub threshold: f32,
    pub partition_count: usize,
    pub leader_count: usize,
    pub rack_name: String,
    pub carry: f64,
    pub select_count: u64,
}
