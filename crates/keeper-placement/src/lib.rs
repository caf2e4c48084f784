//! Weighted, fairness-preserving write placement.
//!
//! This crate implements carry-credit scheduling: every candidate node holds
//! a floating `carry` credit that is replenished in proportion to its free
//! capacity relative to its peers, and spent (by exactly `1.0`) each time the
//! node is chosen for a write. Over time, selection frequency tracks capacity
//! weight without ever excluding a low-capacity node outright.
//!
//! Node kinds opt in through the [`Schedulable`] capability, so every node
//! type shares one implementation of the algorithm.

mod carry;
mod error;

pub use carry::{CarryScheduler, NodeCapacity, Schedulable, capped_carry};
pub use error::PlacementError;
