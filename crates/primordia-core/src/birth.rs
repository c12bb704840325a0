//! The birth chamber seam: where divided genomes become offspring.

use crate::{Genome, Phenotype};

/// One child emitted by the chamber: the genome to instantiate and the
/// merit assigned at birth.
#[derive(Debug, Clone, PartialEq)]
pub struct Offspring {
    pub genome: Genome,
    pub merit: f64,
}

/// Pairs divided genomes into offspring. Sexual recombination and mate
/// pairing live behind this trait; the chamber may buffer a genome and
/// return nothing until a mate arrives.
pub trait BirthChamber: Send {
    /// Submits a divided genome, returning zero or more children to place.
    fn submit_offspring(&mut self, child_genome: Genome, parent: &Phenotype) -> Vec<Offspring>;
}

/// Asexual pass-through chamber: every submission becomes exactly one
/// child carrying the parent's merit.
#[derive(Debug, Default, Clone, Copy)]
pub struct DirectBirthChamber;

impl BirthChamber for DirectBirthChamber {
    fn submit_offspring(&mut self, child_genome: Genome, parent: &Phenotype) -> Vec<Offspring> {
        vec![Offspring {
            genome: child_genome,
            merit: parent.merit(),
        }]
    }
}
