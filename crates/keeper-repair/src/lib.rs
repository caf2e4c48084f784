//! Replica consistency checking for Keeper.
//!
//! This crate provides:
//!
//! - [`DataPartition`] / [`PartitionTable`]: replica sets and per-file
//!   metadata reported by storage nodes.
//! - [`CrcGroup`]: replica metas grouped by checksum, and the majority vote.
//! - [`ConsistencyChecker`]: quorum CRC voting over tiny and normal extents.
//! - [`IntegritySweeper`]: periodic checks over every tracked partition.

pub mod checker;
pub mod crc;
pub mod error;
pub mod partition;
pub mod sweep;

pub use checker::{CheckReport, CheckScope, ConsistencyChecker};
pub use crc::{CrcGroup, CrcVote};
pub use error::RepairError;
pub use partition::{DataPartition, PartitionTable};
pub use sweep::{IntegritySweeper, SweepHandle, SweepSummary};
