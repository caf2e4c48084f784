//! Error types for the repair crate.

use keeper_types::PartitionId;

/// Errors produced by the partition table.
#[derive(Debug, thiserror::Error)]
pub enum RepairError {
    /// No partition with this ID is tracked.
    #[error("data partition not found: {0}")]
    PartitionNotFound(PartitionId),

    /// A partition with this ID is already tracked.
    #[error("data partition already exists: {0}")]
    PartitionExists(PartitionId),
}
