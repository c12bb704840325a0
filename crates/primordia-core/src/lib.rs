//! Core types for the primordia digital-evolution workspace.
//!
//! The crate models a toroidal or bounded grid of cells, each optionally
//! hosting a self-replicating digital organism. Virtual time advances in
//! discrete slices: a scheduler hands out cell ids weighted by organism
//! merit, organisms execute through pluggable [`Hardware`], reproduce
//! through a [`BirthChamber`], and compete for cells. Cells are grouped
//! into demes that can be copied, replicated, or divided as higher-level
//! selection units.

pub mod birth;
pub mod classification;
pub mod config;
pub mod deme;
pub mod grid;
pub mod market;
pub mod organism;
pub mod population;
pub mod resources;
pub mod schedule;
pub mod stats;

use serde::{Deserialize, Serialize};
use slotmap::{SecondaryMap, SlotMap, new_key_type};
use std::fmt;
use thiserror::Error;

pub use birth::{BirthChamber, DirectBirthChamber, Offspring};
pub use classification::{Classification, Genotype, GenotypeId, InjectGenotype, InjectGenotypeId};
pub use config::{BirthMethod, PopulationConfig, SlicingMethod, WorldGeometry};
pub use deme::{Deme, DemeCompetition, DemeTrigger};
pub use grid::{Cell, MutationRates};
pub use market::{Market, SaleItem};
pub use organism::{Hardware, HardwareFactory, InertHardware, Organism, Phenotype};
pub use population::Population;
pub use resources::{ResourceConfig, ResourceField, ResourceGeometry, ResourceWindow};
pub use schedule::{ConstSchedule, IntegratedSchedule, ProbSchedule, Schedule};
pub use stats::{DominantParasiteSnapshot, DominantSnapshot, RunningSum, Stats};

new_key_type! {
    /// Stable handle for organisms backed by a generational slot map.
    pub struct OrganismId;

    /// Stable handle for posted market items.
    pub struct SaleId;
}

/// Convenience alias for associating side data with organisms.
pub type OrganismMap<T> = SecondaryMap<OrganismId, T>;

/// Arena owning all live (and deferred-dead) organisms.
pub type OrganismArena = SlotMap<OrganismId, Organism>;

/// Number of environment inputs wired into each cell.
pub const NUM_CELL_INPUTS: usize = 3;

/// An instruction sequence, the heritable identity of an organism.
///
/// Symbols are opaque bytes; the population core never interprets them.
/// The text rendering used by dump files maps each symbol to one character.
#[derive(Clone, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
pub struct Genome(Vec<u8>);

impl Genome {
    #[must_use]
    pub fn new(symbols: Vec<u8>) -> Self {
        Self(symbols)
    }

    /// Parses the single-word text rendering used by dump and clone files.
    #[must_use]
    pub fn from_text(text: &str) -> Self {
        Self(text.as_bytes().to_vec())
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.0.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    #[must_use]
    pub fn symbols(&self) -> &[u8] {
        &self.0
    }

    #[must_use]
    pub fn symbols_mut(&mut self) -> &mut Vec<u8> {
        &mut self.0
    }

    /// Number of positions at which the two sequences differ. Length
    /// differences count one mismatch per missing position.
    #[must_use]
    pub fn hamming_distance(&self, other: &Genome) -> usize {
        let shared = self.0.len().min(other.0.len());
        let mismatched = self.0[..shared]
            .iter()
            .zip(&other.0[..shared])
            .filter(|(a, b)| a != b)
            .count();
        mismatched + self.0.len().abs_diff(other.0.len())
    }
}

impl fmt::Display for Genome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for &symbol in &self.0 {
            write!(f, "{}", symbol as char)?;
        }
        Ok(())
    }
}

impl fmt::Debug for Genome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Genome({self})")
    }
}

/// Code label attached to a hardware thread, used to address parasite
/// injections. Opaque to the population core.
#[derive(Clone, PartialEq, Eq, Hash, Debug, Default, Serialize, Deserialize)]
pub struct CodeLabel(pub Vec<u8>);

/// Errors surfaced by population construction and persistence.
///
/// Recoverable operational outcomes (a suppressed birth, a refused
/// injection, an empty market list) are ordinary return values, not errors.
#[derive(Debug, Error)]
pub enum PopulationError {
    /// Indicates an invalid configuration value.
    #[error("invalid configuration: {0}")]
    InvalidConfig(&'static str),

    /// A cell id outside `[0, width * height)`.
    #[error("cell id {id} out of bounds for {num_cells} cells")]
    BadCell { id: usize, num_cells: usize },

    /// Malformed clone or dump stream.
    #[error("malformed clone data: {0}")]
    CloneFormat(String),

    /// Underlying I/O failure while reading or writing persisted state.
    #[error(transparent)]
    Io(#[from] std::io::Error),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn genome_round_trips_through_text() {
        let genome = Genome::from_text("rucavcc");
        assert_eq!(genome.len(), 7);
        assert_eq!(genome.to_string(), "rucavcc");
    }

    #[test]
    fn hamming_distance_counts_length_difference() {
        let a = Genome::from_text("aaaa");
        let b = Genome::from_text("aaba");
        let c = Genome::from_text("aabaxy");
        assert_eq!(a.hamming_distance(&a), 0);
        assert_eq!(a.hamming_distance(&b), 1);
        assert_eq!(a.hamming_distance(&c), 3);
        assert_eq!(c.hamming_distance(&a), 3);
    }
}
