//! Error types for placement.

/// Errors produced while choosing write targets.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum PlacementError {
    /// Not enough eligible nodes to satisfy the request.
    #[error("not enough candidate nodes: need {needed}, have {available}")]
    NotEnoughCandidates {
        /// How many targets were requested.
        needed: usize,
        /// How many eligible candidates exist.
        available: usize,
    },

    /// Every candidate reports zero total capacity, so no weight can be derived.
    #[error("candidate nodes report zero total capacity")]
    ZeroCapacity,
}
