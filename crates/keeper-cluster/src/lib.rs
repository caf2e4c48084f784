//! Metadata node registry, liveness and writability.
//!
//! This crate provides:
//!
//! - [`MetaNode`]: a metadata-service node with capacity and scheduling state.
//! - [`ClusterState`]: the shared registry of meta nodes and the entry point
//!   for write placement.
//! - [`LivenessTracker`]: heartbeat ingestion and timeout sweeps.
//! - [`CapacityGate`]: the writability predicate.

mod capacity;
mod error;
pub mod liveness;
mod node;
mod state;


pub use capacity::CapacityGate;
pub use error::ClusterError;
pub use liveness::{LivenessHandle, LivenessTracker};
pub use node::{MetaNode, MetaNodeView};
pub use state::ClusterState;
