//! Carry-credit scheduler implementation.

use std::sync::Arc;

use tracing::debug;

use crate::error::PlacementError;

/// Capacity figures a node exposes to the scheduler.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct NodeCapacity {
    /// Total capacity in bytes.
    pub total: u64,
    /// Capacity still available for new placements, in bytes.
    pub max_available: u64,
}

/// A node that can be chosen as a write target by the [`CarryScheduler`].
///
/// Each method is an atomic operation on the node: implementors guard
/// `carry` and the selection counter with the node's own exclusive lock,
/// so concurrent selections on one node are strictly serialized.
pub trait Schedulable: Send + Sync {
    /// The node's address.
    fn addr(&self) -> &str;

    /// Current carry credit.
    fn carry(&self) -> f64;

    /// Overwrite the carry credit.
    fn set_carry(&self, carry: f64);

    /// Add `delta` to the carry without raising it above `cap`, and return
    /// the new carry. A carry already at or above `cap` is left unchanged.
    fn add_carry(&self, delta: f64, cap: f64) -> f64;

    /// Record that the node was chosen: bump the selection count and spend
    /// exactly `1.0` carry.
    fn select_for_write(&self);

    /// [`select_for_write`](Self::select_for_write) if the node is
    /// carry-available, checked under the same lock. Returns whether the
    /// node was selected.
    fn try_select_for_write(&self) -> bool;

    /// Capacity snapshot used to derive the node's weight.
    fn capacity(&self) -> NodeCapacity;

    /// Whether the node has at least one whole unit of carry to spend.
    fn is_avail_carry_node(&self) -> bool {
        self.carry() >= 1.0
    }
}

/// Apply a capped carry increment. Shared by [`Schedulable`] implementors.
pub fn capped_carry(carry: f64, delta: f64, cap: f64) -> f64 {
    if carry < cap {
        (carry + delta).min(cap)
    } else {
        carry
    }
}

/// A candidate with its weight and a working copy of its carry.
struct WeightedNode<'a, N: ?Sized> {
    index: usize,
    node: &'a Arc<N>,
    weight: f64,
    carry: f64,
}

impl<N: ?Sized> WeightedNode<'_, N> {
    fn score(&self) -> f64 {
        self.weight + self.carry
    }

    /// Replenishment rounds until the node holds a whole unit of carry,
    /// or `None` if it never will.
    fn rounds_to_available(&self) -> Option<f64> {
        if self.carry >= 1.0 {
            return Some(0.0);
        }
        if self.weight <= 0.0 {
            return None;
        }
        let rounds = ((1.0 - self.carry) / self.weight).ceil();
        rounds.is_finite().then_some(rounds)
    }
}

/// Weighted fair selection of write targets.
///
/// Candidates are expected to be pre-filtered for writability. A node's
/// weight is its available capacity divided by the largest total capacity
/// among the candidates, so weights fall in `[0, 1]`.
#[derive(Debug, Clone, Copy)]
pub struct CarryScheduler {
    carry_cap: f64,
}

impl CarryScheduler {
    /// Create a scheduler whose replenishment never raises carry above `carry_cap`.
    ///
    /// The cap is clamped to at least `1.0` so that every weighted node can
    /// eventually become available.
    pub fn new(carry_cap: f64) -> Self {
        Self {
            carry_cap: carry_cap.max(1.0),
        }
    }

    /// The configured carry cap.
    pub fn carry_cap(&self) -> f64 {
        self.carry_cap
    }

    /// Choose a single write target.
    pub fn select_write_target<N>(&self, candidates: &[Arc<N>]) -> Result<Arc<N>, PlacementError>
    where
        N: Schedulable + ?Sized,
    {
        self.select_write_targets(candidates, 1)?
            .pop()
            .ok_or(PlacementError::NotEnoughCandidates {
                needed: 1,
                available: 0,
            })
    }

    /// Choose `count` distinct write targets.
    ///
    /// If fewer than `count` candidates hold a whole unit of carry, every
    /// candidate's carry is replenished by its weight per round, for as many
    /// rounds as it takes until enough do. Only carry-available candidates
    /// are eligible; the ones with the highest `weight + carry` are selected,
    /// each spending one unit of carry.
    ///
    /// A candidate that loses its carry to a concurrent selection before it
    /// can be spent here is skipped and the pass is repeated for the
    /// remaining targets.
    pub fn select_write_targets<N>(
        &self,
        candidates: &[Arc<N>],
        count: usize,
    ) -> Result<Vec<Arc<N>>, PlacementError>
    where
        N: Schedulable + ?Sized,
    {
        if count == 0 {
            return Ok(Vec::new());
        }
        if candidates.len() < count {
            return Err(PlacementError::NotEnoughCandidates {
                needed: count,
                available: candidates.len(),
            });
        }

        let max_total = candidates
            .iter()
            .map(|n| n.capacity().total)
            .max()
            .unwrap_or(0);
        if max_total == 0 {
            return Err(PlacementError::ZeroCapacity);
        }
        let weights: Vec<f64> = candidates
            .iter()
            .map(|n| n.capacity().max_available as f64 / max_total as f64)
            .collect();

        let mut taken = vec![false; candidates.len()];
        let mut chosen: Vec<Arc<N>> = Vec::with_capacity(count);

        while chosen.len() < count {
            let needed = count - chosen.len();
            let mut pool: Vec<WeightedNode<'_, N>> = candidates
                .iter()
                .zip(&weights)
                .enumerate()
                .filter(|(index, _)| !taken[*index])
                .map(|(index, (node, &weight))| WeightedNode {
                    index,
                    node,
                    weight,
                    carry: node.carry(),
                })
                .collect();

            self.replenish(&mut pool, needed)?;

            pool.retain(|w| w.carry >= 1.0);
            pool.sort_by(|a, b| b.score().total_cmp(&a.score()));

            for w in pool.into_iter().take(needed) {
                if !w.node.try_select_for_write() {
                    debug!(addr = w.node.addr(), "carry spent concurrently, retrying");
                    continue;
                }
                debug!(
                    addr = w.node.addr(),
                    weight = w.weight,
                    carry = w.carry,
                    "selected node for write"
                );
                taken[w.index] = true;
                chosen.push(Arc::clone(w.node));
            }
        }

        Ok(chosen)
    }

    /// Make at least `count` nodes of `pool` carry-available.
    ///
    /// Every node gains `weight` carry per round, capped at the carry cap.
    /// The rounds are applied in one step per node through
    /// [`Schedulable::add_carry`], as many as the `count`-th closest node
    /// needs.
    fn replenish<N: Schedulable + ?Sized>(
        &self,
        pool: &mut [WeightedNode<'_, N>],
        count: usize,
    ) -> Result<(), PlacementError> {
        let avail = pool.iter().filter(|w| w.carry >= 1.0).count();
        if avail >= count {
            return Ok(());
        }

        let mut needs: Vec<f64> = pool.iter().filter_map(|w| w.rounds_to_available()).collect();
        if needs.len() < count {
            return Err(PlacementError::NotEnoughCandidates {
                needed: count,
                available: needs.len(),
            });
        }
        needs.sort_by(f64::total_cmp);
        let rounds = needs[count - 1];

        for w in pool.iter_mut() {
            let mut delta = rounds * w.weight;
            // Land exactly on a whole unit despite rounding.
            if w.rounds_to_available().is_some_and(|r| r <= rounds) {
                delta = delta.max(1.0 - w.carry);
            }
            if delta > 0.0 {
                w.carry = w.node.add_carry(delta, self.carry_cap);
            }
        }

        debug!(rounds, count, "replenished carry");
        Ok(())
    }
}

impl Default for CarryScheduler {
    fn default() -> Self {
        Self::new(10.0)
    }
}
