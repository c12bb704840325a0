//! Demes: contiguous sub-grids treated as group-selection units, and the
//! engine that copies, replicates, and divides them.

use crate::{Population, grid::grid_neighbor};
use rand::Rng;
use serde::{Deserialize, Serialize};
use tracing::debug;

/// One horizontal slab of cells evolved together.
#[derive(Debug, Clone)]
pub struct Deme {
    cell_ids: Vec<usize>,
    org_count: usize,
    birth_count: usize,
}

impl Deme {
    #[must_use]
    pub fn new(cell_ids: Vec<usize>) -> Self {
        Self {
            cell_ids,
            org_count: 0,
            birth_count: 0,
        }
    }

    #[must_use]
    pub fn size(&self) -> usize {
        self.cell_ids.len()
    }

    #[must_use]
    pub fn cell_id(&self, offset: usize) -> usize {
        self.cell_ids[offset]
    }

    #[must_use]
    pub fn cell_ids(&self) -> &[usize] {
        &self.cell_ids
    }

    #[must_use]
    pub const fn org_count(&self) -> usize {
        self.org_count
    }

    pub(crate) fn inc_org_count(&mut self) {
        self.org_count += 1;
    }

    pub(crate) fn dec_org_count(&mut self) {
        debug_assert!(self.org_count > 0);
        self.org_count = self.org_count.saturating_sub(1);
    }

    /// Births placed into this deme since the last competition.
    #[must_use]
    pub const fn birth_count(&self) -> usize {
        self.birth_count
    }

    pub(crate) fn inc_birth_count(&mut self) {
        self.birth_count += 1;
    }

    #[must_use]
    pub const fn is_empty(&self) -> bool {
        self.org_count == 0
    }

    #[must_use]
    pub fn is_full(&self) -> bool {
        self.org_count == self.cell_ids.len()
    }

    /// Starts a new competition epoch.
    pub(crate) fn reset(&mut self) {
        self.birth_count = 0;
    }
}

/// How deme fitness is estimated during a competition.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum DemeCompetition {
    /// Constant 1: random deme selection (control).
    Control,
    /// Births since the last competition.
    BirthCount,
    /// Mean current-phenotype fitness of occupants.
    OrganismFitness,
    /// Mean `1 / div_type` of occupants.
    DivType,
    /// Strong rank selection on mean fitness: `2^(-rank)`.
    RankFitness,
    /// Mean life fitness of occupants.
    LifeFitness,
    /// Strong rank selection on mean life fitness.
    RankLifeFitness,
}

/// Which demes qualify for replication.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum DemeTrigger {
    /// Every non-empty deme.
    NonEmpty,
    /// Only completely full demes.
    Full,
    /// Demes whose first and last cells are both occupied.
    Corners,
}

impl Population {
    fn deme_fitness(&self, mode: DemeCompetition) -> Vec<f64> {
        let score_mean = |deme: &Deme, score: &dyn Fn(&crate::Phenotype) -> f64| -> f64 {
            let mut sum = crate::stats::RunningSum::default();
            for &cell_id in deme.cell_ids() {
                if let Some(organism) = self.organism_at(cell_id) {
                    sum.add(score(organism.phenotype()));
                }
            }
            sum.mean()
        };

        let base: Vec<f64> = match mode {
            DemeCompetition::Control => vec![1.0; self.demes.len()],
            DemeCompetition::BirthCount => self
                .demes
                .iter()
                .map(|deme| deme.birth_count() as f64)
                .collect(),
            DemeCompetition::OrganismFitness | DemeCompetition::RankFitness => self
                .demes
                .iter()
                .map(|deme| score_mean(deme, &|p| p.fitness()))
                .collect(),
            DemeCompetition::DivType => self
                .demes
                .iter()
                .map(|deme| score_mean(deme, &|p| 1.0 / p.div_type()))
                .collect(),
            DemeCompetition::LifeFitness | DemeCompetition::RankLifeFitness => self
                .demes
                .iter()
                .map(|deme| score_mean(deme, &|p| p.life_fitness()))
                .collect(),
        };

        match mode {
            DemeCompetition::RankFitness | DemeCompetition::RankLifeFitness => {
                // 1-based ranks; every strictly-better deme raises the rank.
                let ranks: Vec<u32> = base
                    .iter()
                    .map(|&fitness| {
                        1 + base.iter().filter(|&&other| fitness < other).count() as u32
                    })
                    .collect();
                ranks.iter().map(|&rank| 0.5_f64.powi(rank as i32)).collect()
            }
            _ => base,
        }
    }

    /// Probabilistically repopulates the deme array by cloning from
    /// fitness-sampled parents. Every organism begins the new epoch in a
    /// just-injected state, and all deme stats reset to zero.
    pub fn compete_demes(&mut self, mode: DemeCompetition) {
        let num_demes = self.demes.len();
        if num_demes == 0 {
            return;
        }

        let fitness = self.deme_fitness(mode);
        let total_fitness: f64 = fitness.iter().sum();

        // Sample the parent multiset.
        let mut multiplicity = vec![0usize; num_demes];
        for _ in 0..num_demes {
            let winner = if total_fitness > 0.0 {
                let mut choice = self.rng.random_range(0.0..total_fitness);
                let mut pick = num_demes - 1;
                for (deme_id, &deme_fitness) in fitness.iter().enumerate() {
                    if choice < deme_fitness {
                        pick = deme_id;
                        break;
                    }
                    choice -= deme_fitness;
                }
                pick
            } else {
                // Degenerate epoch (every fitness zero): uniform draw.
                self.rng.random_range(0..num_demes)
            };
            multiplicity[winner] += 1;
        }
        debug!(?mode, ?multiplicity, "deme competition sampled");

        // Copy demes until every multiplicity is one.
        let mut seeded = vec![false; num_demes];
        loop {
            let Some(from) = (0..num_demes).find(|&deme_id| multiplicity[deme_id] > 1) else {
                break;
            };
            let to = (0..num_demes)
                .find(|&deme_id| multiplicity[deme_id] == 0)
                .expect("a vacated deme must exist while a parent has multiplicity > 1");
            multiplicity[from] -= 1;
            multiplicity[to] += 1;
            self.copy_deme(from, to);
            seeded[to] = true;
        }

        // Re-inject untouched demes into themselves so every organism
        // starts the epoch freshly cloned.
        for deme_id in 0..num_demes {
            if seeded[deme_id] {
                continue;
            }
            for offset in 0..self.demes[deme_id].size() {
                let cell_id = self.demes[deme_id].cell_id(offset);
                if let Some(occupant) = self.cells[cell_id].occupant() {
                    self.inject_clone(cell_id, occupant);
                }
            }
        }

        for deme in &mut self.demes {
            deme.reset();
        }
    }

    /// Replicates every deme matching `trigger`: one random occupant is
    /// cloned into the center of a random victim deme, the source deme is
    /// wiped and re-seeded from that clone, and both seeds face their
    /// north-west neighbor.
    pub fn replicate_demes(&mut self, trigger: DemeTrigger) {
        let num_demes = self.demes.len();
        if num_demes < 2 {
            return;
        }

        for deme_id in 0..num_demes {
            let qualifies = {
                let deme = &self.demes[deme_id];
                match trigger {
                    DemeTrigger::NonEmpty => !deme.is_empty(),
                    DemeTrigger::Full => deme.is_full(),
                    DemeTrigger::Corners => {
                        let first = deme.cell_id(0);
                        let last = deme.cell_id(deme.size() - 1);
                        self.cells[first].is_occupied() && self.cells[last].is_occupied()
                    }
                }
            };
            if !qualifies {
                continue;
            }

            let source_cell = self.random_occupied_cell(deme_id);

            let mut target_id = deme_id;
            while target_id == deme_id {
                target_id = self.rng.random_range(0..num_demes);
            }

            // Wipe the target, seed its center from the chosen organism.
            for offset in 0..self.demes[target_id].size() {
                let cell_id = self.demes[target_id].cell_id(offset);
                self.kill_organism(cell_id);
            }
            let target_center = self.demes[target_id].cell_id(self.demes[target_id].size() / 2);
            let source_occupant = self.cells[source_cell]
                .occupant()
                .expect("chosen replication source is occupied");
            self.inject_clone(target_center, source_occupant);

            // Wipe the source, seed its center from the fresh clone.
            for offset in 0..self.demes[deme_id].size() {
                let cell_id = self.demes[deme_id].cell_id(offset);
                self.kill_organism(cell_id);
            }
            let source_center = self.demes[deme_id].cell_id(self.demes[deme_id].size() / 2);
            let seed = self.cells[target_center]
                .occupant()
                .expect("target center was just seeded");
            self.inject_clone(source_center, seed);

            let world_x = self.config.world_x;
            let world_y = self.config.world_y;
            let northwest = grid_neighbor(target_center, world_x, world_y, -1, -1);
            self.cells[target_center].rotate_toward(northwest);
            let northwest = grid_neighbor(source_center, world_x, world_y, -1, -1);
            self.cells[source_center].rotate_toward(northwest);
        }
    }

    /// Divides every full deme: the odd-indexed organisms move (as clones)
    /// into the even-indexed cells of a wiped victim deme, and both halves
    /// earn `100 * 2^(collective distinct tasks)` merit.
    pub fn divide_demes(&mut self) {
        let num_demes = self.demes.len();
        if num_demes < 2 {
            return;
        }

        for deme_id in 0..num_demes {
            if !self.demes[deme_id].is_full() {
                continue;
            }

            let mut target_id = deme_id;
            while target_id == deme_id {
                target_id = self.rng.random_range(0..num_demes);
            }

            let deme_size = self.demes[target_id].size();
            for offset in 0..deme_size {
                let cell_id = self.demes[target_id].cell_id(offset);
                self.kill_organism(cell_id);
            }

            let mut task_totals = vec![0u64; self.config.num_tasks];

            let mut position = 0;
            while position + 1 < deme_size {
                let source_cell = self.demes[deme_id].cell_id(position + 1);
                let target_cell = self.demes[target_id].cell_id(position);
                let mover = self.cells[source_cell]
                    .occupant()
                    .expect("full deme has no vacant cells");

                for (task, total) in task_totals.iter_mut().enumerate() {
                    *total += u64::from(self.organisms[mover].phenotype().last_task_count()[task]);
                }

                self.inject_clone(target_cell, mover);
                self.kill_organism(source_cell);
                position += 2;
            }

            let distinct_tasks = task_totals.iter().filter(|&&total| total > 0).count();
            let merit = 100.0 * 2.0_f64.powi(distinct_tasks as i32);

            let mut position = 0;
            while position + 1 < deme_size {
                self.update_merit(self.demes[deme_id].cell_id(position), merit);
                self.update_merit(self.demes[target_id].cell_id(position), merit);
                position += 2;
            }
            debug!(deme_id, target_id, merit, "deme divided");
        }
    }

    /// Re-injects every occupant into its own cell, resetting each
    /// organism as if just injected.
    pub fn reset_demes(&mut self) {
        for deme_id in 0..self.demes.len() {
            for offset in 0..self.demes[deme_id].size() {
                let cell_id = self.demes[deme_id].cell_id(offset);
                if let Some(occupant) = self.cells[cell_id].occupant() {
                    self.inject_clone(cell_id, occupant);
                }
            }
        }
    }

    /// Mirrors deme `from` onto deme `to`, cell by cell, including
    /// emptiness.
    pub fn copy_deme(&mut self, from: usize, to: usize) {
        for offset in 0..self.demes[from].size() {
            let from_cell = self.demes[from].cell_id(offset);
            let to_cell = self.demes[to].cell_id(offset);
            match self.cells[from_cell].occupant() {
                Some(occupant) => self.inject_clone(to_cell, occupant),
                None => self.kill_organism(to_cell),
            }
        }
    }

    /// Clones one random occupant of `from` into a random cell of a wiped
    /// `to`. A target of `None` picks a random deme other than `from`.
    pub fn spawn_deme(&mut self, from: usize, to: Option<usize>) {
        let num_demes = self.demes.len();
        assert!(self.demes[from].org_count() > 0);

        let to = match to {
            Some(to) => to,
            None => {
                let mut candidate = from;
                while candidate == from {
                    candidate = self.rng.random_range(0..num_demes);
                }
                candidate
            }
        };
        assert_ne!(from, to, "a deme cannot spawn into itself");

        let source_cell = self.random_occupied_cell(from);

        for offset in 0..self.demes[to].size() {
            let cell_id = self.demes[to].cell_id(offset);
            self.kill_organism(cell_id);
        }

        let target_cell = self.demes[to].cell_id(self.rng.random_range(0..self.demes[to].size()));
        let occupant = self.cells[source_cell]
            .occupant()
            .expect("chosen spawn source is occupied");
        self.inject_clone(target_cell, occupant);
    }

    /// Uniformly picks an occupied cell of a (non-empty) deme.
    fn random_occupied_cell(&mut self, deme_id: usize) -> usize {
        debug_assert!(!self.demes[deme_id].is_empty());
        loop {
            let offset = self.rng.random_range(0..self.demes[deme_id].size());
            let cell_id = self.demes[deme_id].cell_id(offset);
            if self.cells[cell_id].is_occupied() {
                return cell_id;
            }
        }
    }
}
