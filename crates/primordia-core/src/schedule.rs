//! Time-slicing schedulers: who executes next, weighted by merit.

use crate::SlicingMethod;
use ordered_float::OrderedFloat;
use rand::{Rng, SeedableRng, rngs::SmallRng};
use std::cmp::Reverse;
use std::collections::BinaryHeap;
use std::fmt;
use tracing::warn;

/// Shared change-list hook: when enabled, every adjust records the cell id
/// so consumers can batch stat updates.
#[derive(Debug, Default)]
struct ChangeLog {
    enabled: bool,
    changes: Vec<usize>,
}

impl ChangeLog {
    fn record(&mut self, cell_id: usize) {
        if self.enabled {
            self.changes.push(cell_id);
        }
    }
}

/// A merit-weighted selector over cell ids.
///
/// `adjust` must be called whenever an occupant is added, removed, or has
/// its merit changed; a zero merit removes the cell from selection. An
/// adjust always takes effect before the next `next_id` call.
pub trait Schedule: Send + fmt::Debug {
    /// Picks the next cell to execute, or `None` when every weight is zero.
    fn next_id(&mut self) -> Option<usize>;

    /// Updates the weight of `cell_id`.
    fn adjust(&mut self, cell_id: usize, merit: f64);

    /// Enables or disables change tracking.
    fn track_changes(&mut self, enabled: bool);

    /// Drains the recorded change list.
    fn take_changes(&mut self) -> Vec<usize>;

    /// Internal consistency check.
    fn check(&self) -> bool;
}

/// Builds the scheduler named by the configuration. An unknown variant
/// cannot reach here (the enum is closed), but the integrated scheduler is
/// the documented default.
pub(crate) fn build_schedule(
    method: SlicingMethod,
    num_cells: usize,
    seed: u64,
) -> Box<dyn Schedule> {
    match method {
        SlicingMethod::Constant => Box::new(ConstSchedule::new(num_cells)),
        SlicingMethod::ProbMerit => Box::new(ProbSchedule::new(num_cells, seed)),
        SlicingMethod::IntegratedMerit => Box::new(IntegratedSchedule::new(num_cells)),
    }
}

/// Round-robin over cells with non-zero weight; empty cells are skipped so
/// every yielded id is executable.
#[derive(Debug)]
pub struct ConstSchedule {
    active: Vec<bool>,
    cursor: usize,
    num_active: usize,
    log: ChangeLog,
}

impl ConstSchedule {
    #[must_use]
    pub fn new(num_cells: usize) -> Self {
        Self {
            active: vec![false; num_cells],
            cursor: 0,
            num_active: 0,
            log: ChangeLog::default(),
        }
    }
}

impl Schedule for ConstSchedule {
    fn next_id(&mut self) -> Option<usize> {
        if self.num_active == 0 {
            return None;
        }
        loop {
            let id = self.cursor;
            self.cursor = (self.cursor + 1) % self.active.len();
            if self.active[id] {
                return Some(id);
            }
        }
    }

    fn adjust(&mut self, cell_id: usize, merit: f64) {
        let active = merit > 0.0;
        if self.active[cell_id] != active {
            self.active[cell_id] = active;
            if active {
                self.num_active += 1;
            } else {
                self.num_active -= 1;
            }
        }
        self.log.record(cell_id);
    }

    fn track_changes(&mut self, enabled: bool) {
        self.log.enabled = enabled;
    }

    fn take_changes(&mut self) -> Vec<usize> {
        std::mem::take(&mut self.log.changes)
    }

    fn check(&self) -> bool {
        self.num_active == self.active.iter().filter(|&&a| a).count()
    }
}

/// Complete binary tree over per-cell weights supporting O(log n) updates
/// and O(log n) weighted sampling.
#[derive(Debug)]
struct WeightedTree {
    /// Subtree sums; leaves start at `capacity`.
    nodes: Vec<f64>,
    capacity: usize,
    num_leaves: usize,
}

impl WeightedTree {
    fn new(num_leaves: usize) -> Self {
        let capacity = num_leaves.next_power_of_two().max(1);
        Self {
            nodes: vec![0.0; capacity * 2],
            capacity,
            num_leaves,
        }
    }

    fn total(&self) -> f64 {
        self.nodes[1]
    }

    fn weight(&self, leaf: usize) -> f64 {
        self.nodes[self.capacity + leaf]
    }

    fn set_weight(&mut self, leaf: usize, weight: f64) {
        let mut index = self.capacity + leaf;
        self.nodes[index] = weight;
        while index > 1 {
            index /= 2;
            self.nodes[index] = self.nodes[index * 2] + self.nodes[index * 2 + 1];
        }
    }

    /// Finds the leaf owning position `target` in the cumulative weight
    /// line. Caller guarantees `target < total()`.
    fn sample(&self, mut target: f64) -> usize {
        let mut index = 1;
        while index < self.capacity {
            let left = self.nodes[index * 2];
            if target < left {
                index *= 2;
            } else {
                target -= left;
                index = index * 2 + 1;
            }
        }
        (index - self.capacity).min(self.num_leaves - 1)
    }
}

/// Picks cell `i` with probability `merit_i / sum(merit)` on every call.
pub struct ProbSchedule {
    weights: WeightedTree,
    rng: SmallRng,
    log: ChangeLog,
}

impl fmt::Debug for ProbSchedule {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ProbSchedule")
            .field("total_weight", &self.weights.total())
            .finish()
    }
}

impl ProbSchedule {
    #[must_use]
    pub fn new(num_cells: usize, seed: u64) -> Self {
        Self {
            weights: WeightedTree::new(num_cells),
            rng: SmallRng::seed_from_u64(seed),
            log: ChangeLog::default(),
        }
    }
}

impl Schedule for ProbSchedule {
    fn next_id(&mut self) -> Option<usize> {
        let total = self.weights.total();
        if total <= 0.0 {
            return None;
        }
        let target = self.rng.random_range(0.0..total);
        Some(self.weights.sample(target))
    }

    fn adjust(&mut self, cell_id: usize, merit: f64) {
        self.weights.set_weight(cell_id, merit.max(0.0));
        self.log.record(cell_id);
    }

    fn track_changes(&mut self, enabled: bool) {
        self.log.enabled = enabled;
    }

    fn take_changes(&mut self) -> Vec<usize> {
        std::mem::take(&mut self.log.changes)
    }

    fn check(&self) -> bool {
        let total = self.weights.total();
        if !total.is_finite() || total < 0.0 {
            warn!(total, "probabilistic schedule weight sum corrupt");
            return false;
        }
        true
    }
}

/// Deterministic stride interleaving: cell `i` re-enters the queue
/// `1 / merit_i` virtual-time units after each execution, so execution
/// frequency is proportional to merit. Ties on the fractional index are
/// broken by ascending cell id, which fixes the canonical order.
#[derive(Debug)]
pub struct IntegratedSchedule {
    merits: Vec<f64>,
    /// Next scheduled fractional index per cell; stale heap entries are
    /// skipped by comparing against this.
    passes: Vec<f64>,
    heap: BinaryHeap<Reverse<(OrderedFloat<f64>, usize)>>,
    /// Virtual position of the most recent pop; re-activated cells join
    /// here rather than at their ancient pass mark.
    now: f64,
    log: ChangeLog,
}

impl IntegratedSchedule {
    #[must_use]
    pub fn new(num_cells: usize) -> Self {
        Self {
            merits: vec![0.0; num_cells],
            passes: vec![0.0; num_cells],
            heap: BinaryHeap::new(),
            now: 0.0,
            log: ChangeLog::default(),
        }
    }
}

impl Schedule for IntegratedSchedule {
    fn next_id(&mut self) -> Option<usize> {
        while let Some(Reverse((pass, cell_id))) = self.heap.pop() {
            let pass = pass.into_inner();
            if self.merits[cell_id] <= 0.0 || (self.passes[cell_id] - pass).abs() > f64::EPSILON {
                continue; // stale entry
            }
            self.now = pass;
            let next = pass + 1.0 / self.merits[cell_id];
            self.passes[cell_id] = next;
            self.heap.push(Reverse((OrderedFloat(next), cell_id)));
            return Some(cell_id);
        }
        None
    }

    fn adjust(&mut self, cell_id: usize, merit: f64) {
        let merit = merit.max(0.0);
        self.merits[cell_id] = merit;
        if merit > 0.0 {
            let pass = self.now + 1.0 / merit;
            self.passes[cell_id] = pass;
            self.heap.push(Reverse((OrderedFloat(pass), cell_id)));
        }
        self.log.record(cell_id);
    }

    fn track_changes(&mut self, enabled: bool) {
        self.log.enabled = enabled;
    }

    fn take_changes(&mut self) -> Vec<usize> {
        std::mem::take(&mut self.log.changes)
    }

    fn check(&self) -> bool {
        // Every active cell must have a live heap entry.
        let live: Vec<bool> = {
            let mut live = vec![false; self.merits.len()];
            for &Reverse((pass, cell_id)) in &self.heap {
                if (self.passes[cell_id] - pass.into_inner()).abs() <= f64::EPSILON {
                    live[cell_id] = true;
                }
            }
            live
        };
        self.merits
            .iter()
            .enumerate()
            .all(|(cell_id, &merit)| merit <= 0.0 || live[cell_id])
    }
}
