//! Writability predicate for metadata nodes.

use keeper_types::CapacityConfig;

use crate::node::MetaNode;

/// Decides whether a node may accept new placements.
#[derive(Debug, Clone, Copy, Default)]
pub struct CapacityGate {
    config: CapacityConfig,
}

impl CapacityGate {
    pub fn new(config: CapacityConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &CapacityConfig {
        &self.config
    }

    /// A node is writable iff it is active, has more free memory than the
    /// reserved floor, is not above its usage threshold, and hosts fewer
    /// partitions than the per-node limit.
    ///
    /// Evaluated under the node's shared lock on every call.
    pub fn is_writable(&self, node: &MetaNode) -> bool {
        let state = node.state();
        state.is_active
            && state.max_available > self.config.reserved_mem_floor
            && !state.reaches_threshold(self.config.default_threshold)
            && state.partition_count < self.config.max_partitions_per_node
    }
}
