//! Aggregate statistics collected by the per-update walks.

use crate::GenotypeId;
use serde::{Deserialize, Serialize};

/// Lightweight running accumulator: count, total, and optional weighting.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq)]
pub struct RunningSum {
    count: f64,
    total: f64,
}

impl RunningSum {
    pub fn clear(&mut self) {
        *self = Self::default();
    }

    pub fn add(&mut self, value: f64) {
        self.count += 1.0;
        self.total += value;
    }

    /// Adds `value` with a weight, e.g. a genotype property counted once
    /// per member organism.
    pub fn add_weighted(&mut self, value: f64, weight: f64) {
        self.count += weight;
        self.total += value * weight;
    }

    #[must_use]
    pub const fn count(&self) -> f64 {
        self.count
    }

    #[must_use]
    pub const fn total(&self) -> f64 {
        self.total
    }

    /// Mean of the accumulated values; zero when nothing was added.
    #[must_use]
    pub fn mean(&self) -> f64 {
        if self.count > 0.0 {
            self.total / self.count
        } else {
            0.0
        }
    }
}

/// Snapshot of the currently dominant genotype.
#[derive(Debug, Clone, PartialEq)]
pub struct DominantSnapshot {
    pub id: GenotypeId,
    pub name: String,
    pub abundance: usize,
    pub merit: f64,
    pub gestation_time: f64,
    pub fitness: f64,
    pub copied_size: f64,
    pub executed_size: f64,
    pub length: usize,
    pub depth: u32,
    pub births: usize,
    pub sequence: String,
}

/// Snapshot of the currently dominant parasite payload.
#[derive(Debug, Clone, PartialEq)]
pub struct DominantParasiteSnapshot {
    pub id: crate::InjectGenotypeId,
    pub abundance: usize,
    pub length: usize,
    pub sequence: String,
}

/// Per-update population statistics. Pure accumulation: the walks in the
/// population façade fill these in, nothing here mutates the world.
#[derive(Debug, Clone, Default)]
pub struct Stats {
    update: i64,
    executed: u64,
    total_births: u64,
    total_deaths: u64,

    // Organism-level sums.
    pub sum_fitness: RunningSum,
    pub sum_gestation: RunningSum,
    pub sum_merit: RunningSum,
    pub sum_age: RunningSum,
    pub sum_generation: RunningSum,
    pub sum_neutral_metric: RunningSum,
    pub sum_lineage_label: RunningSum,
    pub sum_copy_mut_rate: RunningSum,
    pub sum_div_mut_rate: RunningSum,
    pub sum_copied_size: RunningSum,
    pub sum_executed_size: RunningSum,
    pub sum_mem_size: RunningSum,

    // Genotype-level sums.
    pub sum_genotype_age: RunningSum,
    pub sum_abundance: RunningSum,
    pub sum_genotype_depth: RunningSum,
    pub sum_genotype_size: RunningSum,
    pub sum_threshold_age: RunningSum,

    // Extremes over live organisms.
    pub max_merit: f64,
    pub max_fitness: f64,
    pub max_gestation_time: u64,
    pub max_genome_length: usize,
    pub min_merit: f64,
    pub min_fitness: f64,
    pub min_gestation_time: u64,
    pub min_genome_length: usize,

    // Quality counters.
    pub num_breed_true: usize,
    pub num_no_birth: usize,
    pub num_parasites: usize,
    pub num_single_thread: usize,
    pub num_multi_thread: usize,
    pub num_modified: usize,

    /// Shannon entropy over genotype abundances.
    pub entropy: f64,
    /// Entropy restricted to threshold genotypes.
    pub species_entropy: f64,

    /// Organisms whose current task window includes each task.
    pub cur_task_counts: Vec<u64>,
    /// Organisms whose last task window includes each task.
    pub last_task_counts: Vec<u64>,
    /// Total executions of each task across last windows.
    pub task_exe_counts: Vec<u64>,
    /// Total executions of each instruction across last windows.
    pub inst_counts: Vec<u64>,

    /// Genotype occupying each cell; `None` for empty cells.
    pub genotype_map: Vec<Option<GenotypeId>>,

    pub dominant: Option<DominantSnapshot>,
    pub dominant_parasite: Option<DominantParasiteSnapshot>,

    /// Clamped resource levels at the last stats walk.
    pub resource_levels: Vec<f64>,

    pub num_creatures: usize,
    pub num_genotypes: usize,
    pub num_threshold_genotypes: usize,
}

impl Stats {
    /// Builds stats sized for the configured task and instruction sets.
    #[must_use]
    pub fn new(num_tasks: usize, num_instructions: usize, num_cells: usize) -> Self {
        Self {
            cur_task_counts: vec![0; num_tasks],
            last_task_counts: vec![0; num_tasks],
            task_exe_counts: vec![0; num_tasks],
            inst_counts: vec![0; num_instructions],
            genotype_map: vec![None; num_cells],
            ..Self::default()
        }
    }

    /// Current virtual time; advanced by external drivers only.
    #[must_use]
    pub const fn update(&self) -> i64 {
        self.update
    }

    pub fn set_update(&mut self, update: i64) {
        self.update = update;
    }

    #[must_use]
    pub const fn executed(&self) -> u64 {
        self.executed
    }

    pub fn inc_executed(&mut self) {
        self.executed += 1;
    }

    #[must_use]
    pub const fn total_births(&self) -> u64 {
        self.total_births
    }

    pub fn record_birth(&mut self) {
        self.total_births += 1;
    }

    #[must_use]
    pub const fn total_deaths(&self) -> u64 {
        self.total_deaths
    }

    pub fn record_death(&mut self) {
        self.total_deaths += 1;
    }

    /// Resets everything the per-update walks recompute from scratch.
    pub fn clear_update_sums(&mut self) {
        self.sum_fitness.clear();
        self.sum_gestation.clear();
        self.sum_merit.clear();
        self.sum_age.clear();
        self.sum_generation.clear();
        self.sum_neutral_metric.clear();
        self.sum_lineage_label.clear();
        self.sum_copy_mut_rate.clear();
        self.sum_div_mut_rate.clear();
        self.sum_copied_size.clear();
        self.sum_executed_size.clear();
        self.sum_mem_size.clear();
        self.sum_genotype_age.clear();
        self.sum_abundance.clear();
        self.sum_genotype_depth.clear();
        self.sum_genotype_size.clear();
        self.sum_threshold_age.clear();
        self.max_merit = 0.0;
        self.max_fitness = 0.0;
        self.max_gestation_time = 0;
        self.max_genome_length = 0;
        self.min_merit = f64::MAX;
        self.min_fitness = f64::MAX;
        self.min_gestation_time = u64::MAX;
        self.min_genome_length = usize::MAX;
        self.num_breed_true = 0;
        self.num_no_birth = 0;
        self.num_parasites = 0;
        self.num_single_thread = 0;
        self.num_multi_thread = 0;
        self.num_modified = 0;
        self.entropy = 0.0;
        self.species_entropy = 0.0;
        self.cur_task_counts.fill(0);
        self.last_task_counts.fill(0);
        self.task_exe_counts.fill(0);
        self.inst_counts.fill(0);
        self.dominant = None;
        self.dominant_parasite = None;
    }
}
