//! Static configuration for a population and its validation rules.

use crate::{MutationRates, PopulationError, ResourceConfig};
use rand::{SeedableRng, rngs::SmallRng};
use serde::{Deserialize, Serialize};

/// World connectivity at the outer boundary.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "snake_case")]
pub enum WorldGeometry {
    /// Bounded grid: corner cells keep 3 neighbors, edges 5, interior 8.
    Grid,
    /// Torus: every cell keeps 8 neighbors.
    #[default]
    Torus,
}

/// Child-placement policy. The numeric codes partition into local methods
/// (below [`BirthMethod::NUM_LOCAL`]) and global ones.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "snake_case")]
#[repr(u8)]
pub enum BirthMethod {
    /// Among parent and neighbors, the oldest occupant wins.
    #[default]
    Age = 0,
    /// Among parent and neighbors, maximize merit / gestation time.
    Merit = 1,
    /// Uniform over the parent's connection list (plus the parent).
    Random = 2,
    /// Empty neighbors only; collapses to the parent when none exist.
    Empty = 3,
    /// Uniform across the whole grid.
    FullSoupRandom = 4,
    /// Replace the oldest-activated cell (reaper queue).
    FullSoupEldest = 5,
    /// Uniform inside the parent's deme.
    DemeRandom = 6,
    /// The cell the parent currently faces.
    ParentFacing = 7,
    /// `(parent + 1) mod num_cells`.
    NextCell = 8,
}

impl BirthMethod {
    /// Codes below this value choose among the parent's neighborhood.
    pub const NUM_LOCAL: u8 = 4;

    /// Whether this method picks from the parent's connection list.
    #[must_use]
    pub const fn is_local(self) -> bool {
        (self as u8) < Self::NUM_LOCAL
    }

    /// Whether children born under this method rotate to face the parent.
    #[must_use]
    pub const fn faces_parent(self) -> bool {
        self.is_local() || matches!(self, Self::ParentFacing)
    }
}

/// Time-slicing strategy used to pick the next cell to execute.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "snake_case")]
pub enum SlicingMethod {
    /// Round-robin over occupied cells.
    Constant,
    /// Weighted random draw proportional to merit.
    ProbMerit,
    /// Deterministic stride interleaving proportional to merit.
    #[default]
    IntegratedMerit,
}

/// Static configuration consumed when building a [`crate::Population`].
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PopulationConfig {
    /// Width of the world in cells.
    pub world_x: u32,
    /// Height of the world in cells.
    pub world_y: u32,
    /// Boundary connectivity.
    pub geometry: WorldGeometry,
    /// Number of horizontal deme slabs; 0 disables demes.
    pub num_demes: u32,
    /// Child placement policy.
    pub birth_method: BirthMethod,
    /// Whether local placement prefers empty neighbors over scoring.
    pub prefer_empty: bool,
    /// Scheduler variant.
    pub slicing_method: SlicingMethod,
    /// Hard cap on hardware threads per organism (parasite injection).
    pub max_cpu_threads: usize,
    /// Whether lineage membership is tracked in the archive.
    pub log_lineages: bool,
    /// Number of label-keyed market queues.
    pub market_size: usize,
    /// Fold labels into range with `label % market_size` instead of
    /// dropping out-of-range postings.
    pub market_label_modulo: bool,
    /// Number of environment tasks (sizes task-count vectors).
    pub num_tasks: usize,
    /// Number of instructions in the external instruction set (sizes
    /// execution histograms).
    pub num_instructions: usize,
    /// Total-organism count at which a genotype is considered threshold.
    pub genotype_threshold: usize,
    /// Mutation rates seeded into every cell.
    pub cell_mutation_rates: MutationRates,
    /// Diffusing or global resources available to organisms.
    pub resources: Vec<ResourceConfig>,
    /// Optional RNG seed for reproducible runs.
    pub rng_seed: Option<u64>,
}

impl Default for PopulationConfig {
    fn default() -> Self {
        Self {
            world_x: 60,
            world_y: 60,
            geometry: WorldGeometry::Torus,
            num_demes: 0,
            birth_method: BirthMethod::Age,
            prefer_empty: true,
            slicing_method: SlicingMethod::IntegratedMerit,
            max_cpu_threads: 1,
            log_lineages: false,
            market_size: 4_096,
            market_label_modulo: false,
            num_tasks: 9,
            num_instructions: 26,
            genotype_threshold: 3,
            cell_mutation_rates: MutationRates::default(),
            resources: Vec::new(),
            rng_seed: None,
        }
    }
}

impl PopulationConfig {
    /// Number of cells in the world.
    #[must_use]
    pub const fn num_cells(&self) -> usize {
        (self.world_x as usize) * (self.world_y as usize)
    }

    /// Validates the configuration. Deme constraints mirror the startup
    /// checks: the world must divide evenly along Y and the birth method
    /// must be legal for group selection.
    pub fn validate(&self) -> Result<(), PopulationError> {
        if self.world_x == 0 || self.world_y == 0 {
            return Err(PopulationError::InvalidConfig(
                "world dimensions must be non-zero",
            ));
        }
        if self.geometry == WorldGeometry::Torus && (self.world_x < 2 || self.world_y < 2) {
            // Wrapping a 1-wide axis would connect cells to themselves.
            return Err(PopulationError::InvalidConfig(
                "torus geometry requires both dimensions of at least 2",
            ));
        }
        if self.market_size == 0 {
            return Err(PopulationError::InvalidConfig(
                "market_size must be non-zero",
            ));
        }
        if self.max_cpu_threads == 0 {
            return Err(PopulationError::InvalidConfig(
                "max_cpu_threads must be non-zero",
            ));
        }
        if self.num_demes == 0 {
            if self.birth_method == BirthMethod::DemeRandom {
                return Err(PopulationError::InvalidConfig(
                    "deme_random placement requires demes, but demes are off",
                ));
            }
            return Ok(());
        }
        if !self.world_y.is_multiple_of(self.num_demes) {
            return Err(PopulationError::InvalidConfig(
                "world Y size cannot be divided evenly into demes",
            ));
        }
        if matches!(
            self.birth_method,
            BirthMethod::FullSoupEldest | BirthMethod::FullSoupRandom
        ) {
            return Err(PopulationError::InvalidConfig(
                "full-soup placement is illegal when demes are on",
            ));
        }
        Ok(())
    }

    /// Returns the configured RNG, generating a seed from entropy if absent.
    #[must_use]
    pub fn seeded_rng(&self) -> SmallRng {
        match self.rng_seed {
            Some(seed) => SmallRng::seed_from_u64(seed),
            None => {
                let seed: u64 = rand::random();
                SmallRng::seed_from_u64(seed)
            }
        }
    }
}
