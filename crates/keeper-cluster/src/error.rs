//! Error types for the cluster crate.

use keeper_placement::PlacementError;

/// Errors produced by the node registry and liveness tracking.
#[derive(Debug, thiserror::Error)]
pub enum ClusterError {
    /// The requested node was not found in the cluster state.
    #[error("meta node not found: {0}")]
    NodeNotFound(String),

    /// A node with this address is already registered.
    #[error("meta node already registered: {0}")]
    NodeExists(String),

    /// No placement could be made over the current nodes.
    #[error("placement failed: {0}")]
    Placement(#[from] PlacementError),
}
