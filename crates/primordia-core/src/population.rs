//! The population façade: organism lifecycle, child placement, the step
//! driver, statistics walks, and clone persistence.

use crate::{
    BirthChamber, BirthMethod, Cell, Classification, CodeLabel, Deme, DirectBirthChamber, Genome,
    GenotypeId, HardwareFactory, InjectGenotypeId, Market, Organism, OrganismArena, OrganismId,
    Phenotype, PopulationConfig, PopulationError, ResourceField, Stats,
    birth::Offspring,
    classification::GenotypeRecord,
    grid::{build_cells, cut_deme_walls, grid_neighbor},
    schedule::{Schedule, build_schedule},
    stats::{DominantParasiteSnapshot, DominantSnapshot},
};
use rand::{Rng, rngs::SmallRng};
use std::collections::{BTreeSet, VecDeque};
use std::fmt;
use std::io::Write;
use std::path::Path;
use std::str::FromStr;
use tracing::{debug, info, warn};

/// The world: a grid of cells, the organisms occupying them, and every
/// shared structure they compete through.
///
/// All mutation funnels through this façade on a single logical executor;
/// a running organism re-enters it through its hardware callbacks.
pub struct Population {
    pub(crate) config: PopulationConfig,
    pub(crate) cells: Vec<Cell>,
    pub(crate) organisms: OrganismArena,
    pub(crate) classification: Classification,
    pub(crate) schedule: Box<dyn Schedule>,
    pub(crate) resources: ResourceField,
    pub(crate) market: Market,
    /// Only populated under the replace-oldest birth policy; holds each
    /// occupied cell exactly once, oldest activation at the back.
    pub(crate) reaper_queue: VecDeque<usize>,
    pub(crate) demes: Vec<Deme>,
    pub(crate) num_organisms: usize,
    pub(crate) stats: Stats,
    pub(crate) rng: SmallRng,
    pub(crate) birth_chamber: Box<dyn BirthChamber>,
    pub(crate) hardware_factory: Box<dyn HardwareFactory>,
}

impl fmt::Debug for Population {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Population")
            .field("config", &self.config)
            .field("num_cells", &self.cells.len())
            .field("num_organisms", &self.num_organisms)
            .field("num_demes", &self.demes.len())
            .field("update", &self.stats.update())
            .finish()
    }
}

impl Population {
    /// Builds a world from `config` with the asexual pass-through birth
    /// chamber.
    pub fn new(
        config: PopulationConfig,
        hardware_factory: Box<dyn HardwareFactory>,
    ) -> Result<Self, PopulationError> {
        Self::with_birth_chamber(config, hardware_factory, Box::new(DirectBirthChamber))
    }

    /// Builds a world from `config` with a caller-supplied birth chamber.
    pub fn with_birth_chamber(
        config: PopulationConfig,
        hardware_factory: Box<dyn HardwareFactory>,
        birth_chamber: Box<dyn BirthChamber>,
    ) -> Result<Self, PopulationError> {
        config.validate()?;
        let mut rng = config.seeded_rng();
        let num_cells = config.num_cells();
        info!(
            world_x = config.world_x,
            world_y = config.world_y,
            geometry = ?config.geometry,
            num_cells,
            "building world"
        );

        let cells = build_cells(
            config.world_x,
            config.world_y,
            config.geometry,
            config.cell_mutation_rates,
        );
        let schedule = build_schedule(config.slicing_method, num_cells, rng.random());
        let resources = ResourceField::new(config.resources.clone(), config.world_x, config.world_y);
        let market = Market::new(config.market_size, config.market_label_modulo);
        let stats = Stats::new(config.num_tasks, config.num_instructions, num_cells);
        let classification = Classification::new(config.genotype_threshold, config.log_lineages);

        let mut population = Self {
            cells,
            organisms: OrganismArena::with_key(),
            classification,
            schedule,
            resources,
            market,
            reaper_queue: VecDeque::new(),
            demes: Vec::new(),
            num_organisms: 0,
            stats,
            rng,
            birth_chamber,
            hardware_factory,
            config,
        };
        population.setup_demes();
        Ok(population)
    }

    /// Carves the grid into `num_demes` horizontal slabs and cuts the
    /// cross-wall edges.
    fn setup_demes(&mut self) {
        let num_demes = self.config.num_demes as usize;
        if num_demes == 0 {
            return;
        }
        let deme_size_y = self.config.world_y / self.config.num_demes;
        let deme_size = (self.config.world_x * deme_size_y) as usize;
        for deme_id in 0..num_demes {
            let cell_ids: Vec<usize> = (0..deme_size)
                .map(|offset| deme_id * deme_size + offset)
                .collect();
            for &cell_id in &cell_ids {
                self.cells[cell_id].set_deme_id(deme_id);
            }
            self.demes.push(Deme::new(cell_ids));
        }
        cut_deme_walls(
            &mut self.cells,
            self.config.world_x,
            self.config.world_y,
            deme_size_y,
        );
        debug!(num_demes, deme_size, "demes configured");
    }

    // --- accessors --------------------------------------------------------

    #[must_use]
    pub fn config(&self) -> &PopulationConfig {
        &self.config
    }

    #[must_use]
    pub fn num_cells(&self) -> usize {
        self.cells.len()
    }

    #[must_use]
    pub const fn num_organisms(&self) -> usize {
        self.num_organisms
    }

    #[must_use]
    pub fn num_demes(&self) -> usize {
        self.demes.len()
    }

    #[must_use]
    pub fn cell(&self, cell_id: usize) -> &Cell {
        &self.cells[cell_id]
    }

    #[must_use]
    pub fn deme(&self, deme_id: usize) -> &Deme {
        &self.demes[deme_id]
    }

    #[must_use]
    pub fn organism(&self, id: OrganismId) -> Option<&Organism> {
        self.organisms.get(id)
    }

    pub fn organism_mut(&mut self, id: OrganismId) -> Option<&mut Organism> {
        self.organisms.get_mut(id)
    }

    /// The organism occupying `cell_id`, if any.
    #[must_use]
    pub fn organism_at(&self, cell_id: usize) -> Option<&Organism> {
        self.cells[cell_id]
            .occupant()
            .and_then(|id| self.organisms.get(id))
    }

    pub fn organism_at_mut(&mut self, cell_id: usize) -> Option<&mut Organism> {
        self.cells[cell_id]
            .occupant()
            .and_then(|id| self.organisms.get_mut(id))
    }

    #[must_use]
    pub fn classification(&self) -> &Classification {
        &self.classification
    }

    #[must_use]
    pub fn resources(&self) -> &ResourceField {
        &self.resources
    }

    pub fn resources_mut(&mut self) -> &mut ResourceField {
        &mut self.resources
    }

    #[must_use]
    pub fn market(&self) -> &Market {
        &self.market
    }

    #[must_use]
    pub fn stats(&self) -> &Stats {
        &self.stats
    }

    #[must_use]
    pub fn reaper_queue(&self) -> &VecDeque<usize> {
        &self.reaper_queue
    }

    /// Borrow the population RNG mutably for deterministic sampling.
    pub fn rng(&mut self) -> &mut SmallRng {
        &mut self.rng
    }

    /// Sets the virtual clock. Updates are advanced by external drivers,
    /// never by the core.
    pub fn set_update(&mut self, update: i64) {
        self.stats.set_update(update);
        self.classification.set_update(update);
    }

    /// Enables or disables the scheduler change-list hook.
    pub fn track_schedule_changes(&mut self, enabled: bool) {
        self.schedule.track_changes(enabled);
    }

    /// Drains the cell ids whose scheduler weight changed since the last
    /// drain.
    pub fn take_schedule_changes(&mut self) -> Vec<usize> {
        self.schedule.take_changes()
    }

    /// Asks the scheduler for the next cell to execute.
    pub fn schedule_organism(&mut self) -> Option<usize> {
        self.schedule.next_id()
    }

    // --- step driver ------------------------------------------------------

    /// Executes one hardware step for the occupant of `cell_id`, then
    /// advances the resource field by `step_size`.
    ///
    /// The occupant's running flag is held for the duration of the call;
    /// any kill landing on it meanwhile defers destruction, and the corpse
    /// is collected here after the hardware returns.
    pub fn process_step(&mut self, step_size: f64, cell_id: usize) {
        assert!(step_size > 0.0);
        assert!(cell_id < self.cells.len());

        let org_id = self.cells[cell_id]
            .occupant()
            .expect("unoccupied cell scheduled for execution");
        let mut hardware = {
            let organism = self
                .organisms
                .get_mut(org_id)
                .expect("occupant missing from arena");
            organism.set_running(true);
            organism
                .take_hardware()
                .expect("hardware absent outside a step")
        };

        hardware.single_process(self, org_id);

        if let Some(organism) = self.organisms.get_mut(org_id) {
            organism.set_running(false);
            if organism.phenotype().to_delete() {
                self.organisms.remove(org_id);
            } else {
                organism.put_hardware(hardware);
            }
        }

        self.stats.inc_executed();
        self.resources.update(step_size);
    }

    // --- lifecycle --------------------------------------------------------

    /// Installs `organism` at `cell_id`, killing any prior occupant. The
    /// prior occupant's genotype is pinned across the swap so the archive
    /// cannot prune it mid-replacement.
    pub(crate) fn activate_organism(&mut self, mut organism: Organism, cell_id: usize) -> OrganismId {
        assert!(
            organism.genome().len() > 1,
            "genome too small to activate"
        );

        if organism.genotype().is_none() {
            let genome = organism.genome().clone();
            let genotype = self.classification.get_genotype(&genome, None);
            organism.set_genotype(genotype);
        }
        let new_genotype = organism.genotype().expect("genotype assigned above");

        let old_genotype = self.cells[cell_id]
            .occupant()
            .and_then(|id| self.organisms.get(id))
            .and_then(|occupant| occupant.genotype());
        if let Some(old) = old_genotype {
            self.classification.pin(old);
        }

        self.kill_organism(cell_id);

        organism.set_cell_id(cell_id);
        let merit = organism.phenotype().merit();
        let lineage_label = organism.lineage_label();
        let org_id = self.organisms.insert(organism);
        self.cells[cell_id].insert_organism(org_id);

        let inputs = [self.rng.random(), self.rng.random(), self.rng.random()];
        self.cells[cell_id].set_inputs(inputs);

        self.classification.add_organism(new_genotype);
        if let Some(old) = old_genotype {
            self.classification.unpin(old);
            self.classification.adjust(old);
        }
        self.classification.adjust(new_genotype);

        self.schedule.adjust(cell_id, merit);

        if self.config.birth_method == BirthMethod::FullSoupEldest {
            self.reaper_queue.push_front(cell_id);
        }

        self.num_organisms += 1;
        if !self.demes.is_empty() {
            let deme_id = self.cells[cell_id].deme_id();
            self.demes[deme_id].inc_org_count();
        }
        if self.config.log_lineages {
            self.classification.lineage_add(lineage_label);
        }
        self.stats.record_birth();
        org_id
    }

    /// Kills the occupant of `cell_id`, if any: revokes its market
    /// postings, detaches parasites, and releases its genotype. A running
    /// occupant is marked for deferred deletion instead of being dropped.
    pub fn kill_organism(&mut self, cell_id: usize) {
        let Some(org_id) = self.cells[cell_id].occupant() else {
            return;
        };
        self.stats.record_death();

        let (genotype, lineage_label, sold_items, parasites, running) = {
            let organism = self
                .organisms
                .get_mut(org_id)
                .expect("occupant missing from arena");
            (
                organism.genotype(),
                organism.lineage_label(),
                organism.take_sold_items(),
                organism.take_parasites(),
                organism.is_running(),
            )
        };

        for sale in sold_items {
            self.market.revoke(sale);
        }
        if self.config.log_lineages {
            self.classification.lineage_remove(lineage_label);
        }

        self.num_organisms -= 1;
        if !self.demes.is_empty() {
            let deme_id = self.cells[cell_id].deme_id();
            self.demes[deme_id].dec_org_count();
        }
        if let Some(genotype) = genotype {
            self.classification.remove_organism(genotype);
        }
        for parasite in parasites {
            self.classification.remove_parasite(parasite);
            self.classification.adjust_inject(parasite);
        }

        self.cells[cell_id].remove_organism();
        if running {
            self.organisms[org_id].phenotype_mut().mark_to_delete();
        } else {
            self.organisms.remove(org_id);
        }

        self.schedule.adjust(cell_id, 0.0);
        if self.config.birth_method == BirthMethod::FullSoupEldest {
            self.reaper_queue.retain(|&queued| queued != cell_id);
        }
        if let Some(genotype) = genotype {
            self.classification.adjust(genotype);
        }
    }

    /// Places the children of a divide. Returns whether the parent
    /// survives the process (a child landing on the parent's cell kills
    /// it).
    pub fn activate_offspring(&mut self, child_genome: Genome, parent_id: OrganismId) -> bool {
        let parent_cell = self.organisms[parent_id].cell_id();
        debug_assert!(parent_cell < self.cells.len());

        // The parent resets before entering the chamber so merit flows to
        // the child from the post-divide state.
        let parent_genome = self.organisms[parent_id].genome().clone();
        self.organisms[parent_id]
            .phenotype_mut()
            .divide_reset(parent_genome.len());

        let offspring = {
            let chamber = &mut self.birth_chamber;
            let parent = self.organisms.get(parent_id).expect("parent in arena");
            chamber.submit_offspring(child_genome, parent.phenotype())
        };

        let parent_genotype = self.organisms[parent_id].genotype();
        let parent_label = self.organisms[parent_id].lineage_label();

        let mut children: Vec<Organism> = Vec::with_capacity(offspring.len());
        for Offspring { genome, merit } in offspring {
            let hardware = self.hardware_factory.build(&genome);
            let mut phenotype = Phenotype::new(self.config.num_tasks, self.config.num_instructions);
            phenotype.setup_offspring(self.organisms[parent_id].phenotype(), genome.len());
            phenotype.set_merit(merit);
            phenotype.set_parent_true(genome == parent_genome);

            let genotype = self.classification.get_genotype(&genome, parent_genotype);
            self.classification.pin(genotype);

            let mut child = Organism::new(genome, hardware, phenotype);
            child.set_genotype(genotype);
            child.set_lineage_label(parent_label);
            children.push(child);
        }

        let mut parent_alive = true;
        let mut targets = Vec::with_capacity(children.len());
        for child in &mut children {
            let target = self.position_child(parent_cell, true);
            if target == parent_cell {
                parent_alive = false;
            }
            child.set_mutation_rates(self.cells[target].mutation_rates());
            targets.push(target);
        }

        if parent_alive {
            let merit = self.organisms[parent_id].phenotype().merit();
            self.schedule.adjust(parent_cell, merit);
            // In a local run, face each child toward the parent.
            if self.config.birth_method.faces_parent() {
                for &target in &targets {
                    self.cells[target].rotate_toward(parent_cell);
                }
            }
        }

        if let Some(genotype) = parent_genotype {
            let (gestation, fitness, merit, copied, executed) = {
                let phenotype = self.organisms[parent_id].phenotype();
                (
                    phenotype.gestation_time(),
                    phenotype.fitness(),
                    phenotype.merit(),
                    phenotype.copied_size(),
                    phenotype.executed_size(),
                )
            };
            if let Some(entry) = self.classification.get_mut(genotype) {
                entry.record_birth_stats(gestation, fitness, merit, copied, executed);
            }
        }

        for (child, target) in children.into_iter().zip(targets) {
            let genotype = child.genotype();
            self.activate_organism(child, target);
            if let Some(genotype) = genotype {
                self.classification.unpin(genotype);
                self.classification.adjust(genotype);
            }
        }

        parent_alive
    }

    /// Injects a parasite from a running host into a random neighbor.
    ///
    /// The host's hardware passes its own code label and thread owner:
    /// during a step the host's hardware is out on loan, so the population
    /// cannot read them back through the arena.
    pub fn activate_parasite(
        &mut self,
        parent_id: OrganismId,
        parent_label: &CodeLabel,
        parent_owner: Option<InjectGenotypeId>,
        injected_code: &Genome,
    ) -> bool {
        if injected_code.is_empty() {
            return false;
        }
        let parent_cell = self.organisms[parent_id].cell_id();
        let num_neighbors = self.cells[parent_cell].connections().len();
        if num_neighbors == 0 {
            return false;
        }
        let pick = self.rng.random_range(0..num_neighbors);
        let neighbor = self.cells[parent_cell].connections()[pick];

        let Some(target_id) = self.cells[neighbor].occupant() else {
            return false;
        };
        self.infect(target_id, parent_label, parent_owner, injected_code)
    }

    /// Event-driven parasite injection into a named cell.
    pub fn inject_parasite(&mut self, label: &CodeLabel, injected_code: &Genome, cell_id: usize) -> bool {
        let Some(target_id) = self.cells[cell_id].occupant() else {
            return false;
        };
        self.infect(target_id, label, None, injected_code)
    }

    fn infect(
        &mut self,
        target_id: OrganismId,
        label: &CodeLabel,
        parent_owner: Option<InjectGenotypeId>,
        injected_code: &Genome,
    ) -> bool {
        {
            let target = &self.organisms[target_id];
            let Some(hardware) = target.hardware() else {
                return false;
            };
            if hardware.num_threads() == self.config.max_cpu_threads {
                return false;
            }
        }

        let injected = {
            let target = self.organisms.get_mut(target_id).expect("target in arena");
            let Some(hardware) = target.hardware_mut() else {
                return false;
            };
            hardware.inject_host(label, injected_code)
        };
        if !injected {
            return false;
        }

        // Reuse the parent's inject-genotype when the payload matches it.
        let child_genotype = match parent_owner {
            Some(owner)
                if self
                    .classification
                    .get_inject(owner)
                    .is_some_and(|entry| entry.code() == injected_code) =>
            {
                owner
            }
            other => self.classification.get_inject_genotype(injected_code, other),
        };

        let target = self.organisms.get_mut(target_id).expect("target in arena");
        target.add_parasite(child_genotype);
        target.phenotype_mut().set_modified();
        if let Some(hardware) = target.hardware_mut() {
            hardware.set_thread_owner(child_genotype);
        }
        self.classification.add_parasite(child_genotype);
        self.classification.adjust_inject(child_genotype);
        true
    }

    /// Detonates the occupant of `cell_id`: examines the 5x5 block around
    /// it, kills every occupant whose genotype (distance 0) or genome (more
    /// than `distance` mismatches) differs from the center's, then kills
    /// the center itself.
    pub fn kaboom(&mut self, cell_id: usize, distance: usize) {
        let Some(center_id) = self.cells[cell_id].occupant() else {
            return;
        };
        let center_genome = self.organisms[center_id].genome().clone();
        let center_genotype = self.organisms[center_id].genotype();

        const RADIUS: i32 = 2;
        for dy in -RADIUS..=RADIUS {
            for dx in -RADIUS..=RADIUS {
                let victim_cell =
                    grid_neighbor(cell_id, self.config.world_x, self.config.world_y, dx, dy);
                let Some(victim_id) = self.cells[victim_cell].occupant() else {
                    continue;
                };
                let victim = &self.organisms[victim_id];
                let dies = if distance == 0 {
                    victim.genotype() != center_genotype
                } else {
                    victim.genome().hamming_distance(&center_genome) > distance
                };
                if dies {
                    self.kill_organism(victim_cell);
                }
            }
        }
        self.kill_organism(cell_id);
    }

    // --- child placement --------------------------------------------------

    /// Selects the cell a new child will occupy. `parent_ok` permits the
    /// parent's own cell as a target.
    pub fn position_child(&mut self, parent_cell: usize, parent_ok: bool) -> usize {
        debug_assert!(self.cells[parent_cell].is_occupied());
        let num_cells = self.cells.len();

        match self.config.birth_method {
            BirthMethod::FullSoupRandom => {
                let mut target = self.rng.random_range(0..num_cells);
                while !parent_ok && target == parent_cell {
                    target = self.rng.random_range(0..num_cells);
                }
                return target;
            }
            BirthMethod::FullSoupEldest => {
                let mut target = self.reaper_queue.pop_back().unwrap_or(parent_cell);
                if !parent_ok && target == parent_cell {
                    target = self.reaper_queue.pop_back().unwrap_or(parent_cell);
                    self.reaper_queue.push_back(parent_cell);
                }
                return target;
            }
            BirthMethod::DemeRandom => {
                let deme_id = self.cells[parent_cell].deme_id();
                let deme_size = self.demes[deme_id].size();
                let mut target = self.demes[deme_id].cell_id(self.rng.random_range(0..deme_size));
                while !parent_ok && target == parent_cell {
                    target = self.demes[deme_id].cell_id(self.rng.random_range(0..deme_size));
                }
                self.demes[deme_id].inc_birth_count();
                return target;
            }
            BirthMethod::ParentFacing => {
                return self.cells[parent_cell].faced_cell().unwrap_or(parent_cell);
            }
            BirthMethod::NextCell => {
                return (parent_cell + 1) % num_cells;
            }
            BirthMethod::Age | BirthMethod::Merit | BirthMethod::Random | BirthMethod::Empty => {}
        }

        // Local methods: empty neighbors pre-empt scoring when preferred
        // (the empty policy wants them unconditionally).
        let connections = self.cells[parent_cell].connections().to_vec();
        let use_empties =
            self.config.prefer_empty || self.config.birth_method == BirthMethod::Empty;
        let mut found: Vec<usize> = if use_empties {
            connections
                .iter()
                .copied()
                .filter(|&cell| !self.cells[cell].is_occupied())
                .collect()
        } else {
            Vec::new()
        };

        if found.is_empty() {
            found = match self.config.birth_method {
                BirthMethod::Age => self.position_scored(parent_cell, &connections, parent_ok, |p| {
                    f64::from(p.age())
                }),
                BirthMethod::Merit => {
                    self.position_scored(parent_cell, &connections, parent_ok, Phenotype::merit_ratio)
                }
                BirthMethod::Random => {
                    let mut list = connections.clone();
                    if parent_ok {
                        list.push(parent_cell);
                    }
                    list
                }
                // Nothing in the list if no empty cells were found.
                BirthMethod::Empty => Vec::new(),
                _ => unreachable!("global methods returned above"),
            };
        }

        if !self.demes.is_empty() {
            let deme_id = self.cells[parent_cell].deme_id();
            self.demes[deme_id].inc_birth_count();
        }

        // No possibilities: the birth collapses onto the parent.
        if found.is_empty() {
            return parent_cell;
        }
        found[self.rng.random_range(0..found.len())]
    }

    /// The shared local-placement skeleton: score parent and occupied
    /// neighbors, keep all maxima, tie-break later by random choice.
    fn position_scored(
        &self,
        parent_cell: usize,
        connections: &[usize],
        parent_ok: bool,
        score: impl Fn(&Phenotype) -> f64,
    ) -> Vec<usize> {
        let mut found = vec![parent_cell];
        let mut max_score = if parent_ok {
            self.organism_at(parent_cell)
                .map_or(-1.0, |organism| score(organism.phenotype()))
        } else {
            -1.0
        };

        for &cell in connections {
            let Some(occupant) = self.organism_at(cell) else {
                continue;
            };
            let cur_score = score(occupant.phenotype());
            if cur_score > max_score {
                max_score = cur_score;
                found.clear();
                found.push(cell);
            } else if cur_score == max_score {
                found.push(cell);
            }
        }
        found
    }

    // --- seeding and cloning ----------------------------------------------

    /// Injects a genome into the world, the seeding entry point.
    ///
    /// With `cell_id` of `None`, the replace-oldest policy consumes the
    /// reaper queue, any other policy targets cell 0. An explicit `merit`
    /// overrides the genotype's length-based default. Returns the cell
    /// used.
    pub fn inject(
        &mut self,
        genome: &Genome,
        cell_id: Option<usize>,
        merit: Option<f64>,
        lineage_label: i32,
        neutral_metric: f64,
    ) -> usize {
        let cell_id = cell_id.unwrap_or_else(|| match self.config.birth_method {
            BirthMethod::FullSoupEldest => self.reaper_queue.pop_back().unwrap_or(0),
            _ => 0,
        });
        assert!(cell_id < self.cells.len());

        self.inject_genome(cell_id, genome, lineage_label);

        let organism = self
            .organism_at_mut(cell_id)
            .expect("cell occupied by the injection");
        organism.phenotype_mut().set_neutral_metric(neutral_metric);
        if let Some(merit) = merit {
            organism.phenotype_mut().set_merit(merit);
        }
        let merit = organism.phenotype().merit();
        self.schedule.adjust(cell_id, merit);
        cell_id
    }

    /// Creates and activates an organism from a raw genome.
    pub(crate) fn inject_genome(&mut self, cell_id: usize, genome: &Genome, lineage_label: i32) {
        let genotype = self.classification.get_genotype(genome, None);
        self.inject_genotype(cell_id, genotype, lineage_label);
    }

    /// Creates and activates an organism from an archived genotype.
    pub(crate) fn inject_genotype(&mut self, cell_id: usize, genotype: GenotypeId, lineage_label: i32) {
        assert!(cell_id < self.cells.len());
        let genome = self
            .classification
            .get(genotype)
            .expect("genotype in archive")
            .genome()
            .clone();

        let hardware = self.hardware_factory.build(&genome);
        let mut phenotype = Phenotype::new(self.config.num_tasks, self.config.num_instructions);
        phenotype.setup_inject(genome.len());

        let mut organism = Organism::new(genome, hardware, phenotype);
        organism.set_genotype(genotype);
        organism.set_lineage_label(lineage_label);
        organism.set_mutation_rates(self.cells[cell_id].mutation_rates());
        self.activate_organism(organism, cell_id);
    }

    /// Activates an exact copy of the organism at `source`, as if it were
    /// just injected.
    pub(crate) fn inject_clone(&mut self, cell_id: usize, source: OrganismId) {
        let (genome, genotype, lineage_label, source_phenotype) = {
            let organism = &self.organisms[source];
            (
                organism.genome().clone(),
                organism.genotype(),
                organism.lineage_label(),
                organism.phenotype().clone(),
            )
        };

        let hardware = self.hardware_factory.build(&genome);
        let mut phenotype = Phenotype::new(self.config.num_tasks, self.config.num_instructions);
        phenotype.setup_clone(&source_phenotype);

        let mut organism = Organism::new(genome, hardware, phenotype);
        if let Some(genotype) = genotype {
            organism.set_genotype(genotype);
        }
        organism.set_lineage_label(lineage_label);
        organism.set_mutation_rates(self.cells[cell_id].mutation_rates());
        self.activate_organism(organism, cell_id);
    }

    // --- merit and market -------------------------------------------------

    /// Replaces the merit of the occupant of `cell_id`, recomputing life
    /// fitness and flagging the donor/receiver direction of the change.
    pub fn update_merit(&mut self, cell_id: usize, new_merit: f64) {
        assert!(self.cells[cell_id].is_occupied());
        assert!(new_merit >= 0.0);

        let organism = self
            .organism_at_mut(cell_id)
            .expect("occupied cell has an organism");
        let phenotype = organism.phenotype_mut();
        let old_merit = phenotype.merit();
        phenotype.set_merit(new_merit);
        let gestation = phenotype.gestation_time().max(1);
        phenotype.set_life_fitness(new_merit / gestation as f64);
        if new_merit <= old_merit {
            phenotype.set_donor();
        } else {
            phenotype.set_receiver();
        }
        self.schedule.adjust(cell_id, new_merit);
    }

    /// Posts a good from the occupant of `cell_id`. Returns false when the
    /// cell is empty or the label is out of range.
    pub fn add_sell_value(&mut self, data: i32, label: usize, price: i32, cell_id: usize) -> bool {
        let Some(org_id) = self.cells[cell_id].occupant() else {
            return false;
        };
        let Some(sale) = self.market.post(data, label, price, org_id, cell_id) else {
            return false;
        };
        self.organisms[org_id].add_sold_item(sale);
        true
    }

    /// Buys the head of `market[label]` for the occupant of `cell_id`.
    /// Returns 0 when the list is empty, the head is too expensive, or the
    /// buyer's merit cannot cover the bid; otherwise credits the seller by
    /// `buy_price` and returns the good. The buyer's merit is adjusted by
    /// the caller based on the returned value.
    pub fn buy_value(&mut self, label: usize, buy_price: i32, cell_id: usize) -> i32 {
        let Some(head_price) = self.market.head_price(label) else {
            return 0;
        };
        if head_price > buy_price {
            return 0;
        }
        let Some(buyer) = self.organism_at(cell_id) else {
            return 0;
        };
        if buyer.phenotype().merit() < f64::from(buy_price) {
            return 0;
        }

        let Some((sale_id, item)) = self.market.pop(label) else {
            return 0;
        };
        if let Some(seller) = self.organisms.get_mut(item.seller_org) {
            seller.remove_sold_item(sale_id);
            let seller_merit = seller.phenotype().merit() + f64::from(buy_price);
            self.update_merit(item.seller_cell, seller_merit);
        }
        item.data
    }

    // --- resources --------------------------------------------------------

    /// Adjusts one resource level (organism consumption or release).
    pub fn update_resource(&mut self, id: usize, change: f64) {
        self.resources.modify(id, change);
    }

    /// Adjusts every resource by the matching delta.
    pub fn update_resources(&mut self, changes: &[f64]) {
        self.resources.modify_all(changes);
    }

    /// Adjusts the resource levels seen from one cell.
    pub fn update_cell_resources(&mut self, changes: &[f64], cell_id: usize) {
        assert!(cell_id < self.cells.len());
        self.resources.modify_cell(changes, cell_id);
    }

    /// Overrides one resource level outright.
    pub fn set_resource(&mut self, id: usize, level: f64) {
        self.resources.set(id, level);
    }

    // --- serial transfer --------------------------------------------------

    /// Thins the population down to `transfer_size` survivors by uniform
    /// sampling, optionally first removing organisms whose fitness is zero.
    pub fn serial_transfer(&mut self, transfer_size: usize, ignore_deads: bool) {
        assert!(transfer_size > 0);

        if ignore_deads {
            for cell_id in 0..self.cells.len() {
                let dead = self
                    .organism_at(cell_id)
                    .is_some_and(|organism| organism.phenotype().fitness() == 0.0);
                if dead {
                    self.kill_organism(cell_id);
                }
            }
        }

        if self.num_organisms <= transfer_size {
            return;
        }

        let mut pool: Vec<usize> = (0..self.cells.len())
            .filter(|&cell_id| self.cells[cell_id].is_occupied())
            .collect();
        let removal_size = self.num_organisms - transfer_size;
        for _ in 0..removal_size {
            let pick = self.rng.random_range(0..pool.len());
            self.kill_organism(pool[pick]);
            pool.swap_remove(pick);
        }
    }

    // --- persistence ------------------------------------------------------

    /// Writes the clone snapshot: update, archive counters, per-genotype
    /// records best-first, then the cell-to-genotype layout.
    pub fn save_clone<W: Write>(&self, writer: &mut W) -> Result<(), PopulationError> {
        writeln!(
            writer,
            "{} {} {}",
            self.stats.update(),
            self.classification.next_genotype_id(),
            self.classification.num_genotypes()
        )?;
        for record in self.classification.snapshot_records() {
            let parent = record
                .parent_id
                .map_or(-1, |parent| i64::from(parent.0));
            writeln!(
                writer,
                "{} {} {} {} {} {}",
                record.id, parent, record.depth, record.update_born, record.genome.len(), record.genome
            )?;
        }
        write!(writer, "{}", self.cells.len())?;
        for cell in &self.cells {
            let genotype = cell
                .occupant()
                .and_then(|id| self.organisms.get(id))
                .and_then(|organism| organism.genotype())
                .map_or(-1, |genotype| i64::from(genotype.0));
            write!(writer, " {genotype}")?;
        }
        writeln!(writer)?;
        Ok(())
    }

    /// Restores a clone snapshot into this (equal-dimension) population.
    pub fn load_clone(&mut self, input: &str) -> Result<(), PopulationError> {
        let mut tokens = input.split_whitespace();

        let update: i64 = parse_token(&mut tokens, "update")?;
        let next_id: u32 = parse_token(&mut tokens, "next genotype id")?;
        let num_genotypes: usize = parse_token(&mut tokens, "genotype count")?;
        self.set_update(update);

        for cell_id in 0..self.cells.len() {
            self.kill_organism(cell_id);
        }

        let mut records = Vec::with_capacity(num_genotypes);
        for _ in 0..num_genotypes {
            let id: u32 = parse_token(&mut tokens, "genotype id")?;
            let parent: i64 = parse_token(&mut tokens, "parent id")?;
            let depth: u32 = parse_token(&mut tokens, "depth")?;
            let update_born: i64 = parse_token(&mut tokens, "update born")?;
            let length: usize = parse_token(&mut tokens, "genome length")?;
            let genome = if length == 0 {
                Genome::default()
            } else {
                Genome::from_text(next_token(&mut tokens, "genome")?)
            };
            if genome.len() != length {
                return Err(PopulationError::CloneFormat(format!(
                    "genome length mismatch for genotype {id}: expected {length}, got {}",
                    genome.len()
                )));
            }
            records.push(GenotypeRecord {
                id: GenotypeId(id),
                parent_id: (parent >= 0).then(|| GenotypeId(parent as u32)),
                depth,
                update_born,
                genome,
            });
        }
        self.classification.restore(records, next_id);

        let num_cells: usize = parse_token(&mut tokens, "cell count")?;
        if num_cells != self.cells.len() {
            return Err(PopulationError::CloneFormat(format!(
                "clone has {num_cells} cells, world has {}",
                self.cells.len()
            )));
        }
        for cell_id in 0..num_cells {
            let genotype: i64 = parse_token(&mut tokens, "cell genotype")?;
            if genotype < 0 {
                continue;
            }
            let genotype = GenotypeId(genotype as u32);
            if self.classification.get(genotype).is_none() {
                return Err(PopulationError::CloneFormat(format!(
                    "cell {cell_id} references unknown genotype {genotype}"
                )));
            }
            self.inject_genotype(cell_id, genotype, 0);
        }
        Ok(())
    }

    /// Loads an archive dump: one genotype per line, sorted ascending by
    /// id, parents linked, then organisms injected until the grid fills.
    pub fn load_dump_file(&mut self, path: &Path, update: Option<i64>) -> Result<(), PopulationError> {
        if let Some(update) = update {
            self.set_update(update);
        }
        for cell_id in 0..self.cells.len() {
            self.kill_organism(cell_id);
        }
        info!(path = %path.display(), "loading population dump");

        struct DumpRecord {
            id: u32,
            parent_id: i64,
            num_cpus: usize,
            merit: f64,
        }

        let contents = std::fs::read_to_string(path)?;
        let current_update = self.stats.update();
        let mut records: Vec<DumpRecord> = Vec::new();

        for line in contents.lines() {
            let line = line.trim();
            if line.is_empty() || line.starts_with('#') {
                continue;
            }
            let mut tokens = line.split_whitespace();
            let id: u32 = parse_token(&mut tokens, "id")?;
            let parent_id: i64 = parse_token(&mut tokens, "parent id")?;
            let _parent_dist: i64 = parse_token(&mut tokens, "parent distance")?;
            let num_cpus: usize = parse_token(&mut tokens, "cpu count")?;
            let _total_cpus: usize = parse_token(&mut tokens, "total cpus")?;
            let _length: usize = parse_token(&mut tokens, "length")?;
            let merit: f64 = parse_token(&mut tokens, "merit")?;
            let _gest_time: f64 = parse_token(&mut tokens, "gestation time")?;
            let _fitness: f64 = parse_token(&mut tokens, "fitness")?;
            let mut update_born: i64 = parse_token(&mut tokens, "update born")?;
            let _update_dead: i64 = parse_token(&mut tokens, "update dead")?;
            let _depth: u32 = parse_token(&mut tokens, "depth")?;
            let genome = Genome::from_text(next_token(&mut tokens, "genome")?);

            // Birth times before the current update are clamped to it; the
            // death time has no home here since historic entries are a
            // tally rather than records.
            if current_update > update_born {
                update_born = current_update;
            }

            self.classification.insert_loaded(GenotypeRecord {
                id: GenotypeId(id),
                parent_id: None,
                depth: 0,
                update_born,
                genome,
            });
            records.push(DumpRecord {
                id,
                parent_id,
                num_cpus,
                merit,
            });
        }

        records.sort_by_key(|record| record.id);

        // Link each genotype to the closest earlier record with its
        // parent's id.
        for index in 0..records.len() {
            let parent = records[..index]
                .iter()
                .rev()
                .find(|candidate| i64::from(candidate.id) == records[index].parent_id)
                .map(|candidate| GenotypeId(candidate.id));
            if let Some(entry) = self.classification.get_mut(GenotypeId(records[index].id)) {
                entry.set_parent_id(parent);
            }
        }

        let mut current_cell = 0;
        for record in &records {
            if record.num_cpus == 0 {
                // Historic genotype: straight to the archive tally.
                self.classification.remove(GenotypeId(record.id));
                continue;
            }
            for _ in 0..record.num_cpus {
                if current_cell >= self.cells.len() {
                    warn!(
                        genotype = record.id,
                        "dump holds more organisms than cells; remaining organisms ignored"
                    );
                    return Ok(());
                }
                self.inject_genotype(current_cell, GenotypeId(record.id), 0);
                if record.merit > 0.0 {
                    self.update_merit(current_cell, record.merit);
                }
                current_cell += 1;
            }
        }
        Ok(())
    }

    /// Writes the per-cell memory summary: `id size genome`, or
    /// `id EMPTY` for vacant cells.
    pub fn dump_memory_summary<W: Write>(&self, writer: &mut W) -> Result<(), PopulationError> {
        for (cell_id, cell) in self.cells.iter().enumerate() {
            match cell.occupant().and_then(|id| self.organisms.get(id)) {
                None => writeln!(writer, "{cell_id} EMPTY")?,
                Some(organism) => {
                    let memory = organism
                        .hardware()
                        .map_or_else(|| organism.genome().clone(), |hw| hw.memory().clone());
                    writeln!(writer, "{cell_id} {} {memory}", memory.len())?;
                }
            }
        }
        Ok(())
    }

    // --- statistics -------------------------------------------------------

    /// Runs every per-update statistics walk and refreshes the aggregate
    /// counters.
    pub fn calc_update_stats(&mut self) {
        self.stats.clear_update_sums();
        self.update_organism_stats();
        self.update_genotype_stats();
        self.update_species_stats();
        self.update_dominant_stats();
        self.update_dominant_parasite_stats();
        self.stats.num_creatures = self.num_organisms;
        self.stats.num_genotypes = self.classification.num_genotypes();
        self.stats.num_threshold_genotypes = self.classification.num_threshold_genotypes();
        self.stats.resource_levels = self.resources.levels();
    }

    /// Per-organism sums, extremes, task and instruction histograms, and
    /// the genotype map. Also ages every organism by one update.
    fn update_organism_stats(&mut self) {
        for cell_id in 0..self.cells.len() {
            let Some(org_id) = self.cells[cell_id].occupant() else {
                self.stats.genotype_map[cell_id] = None;
                continue;
            };
            let organism = &self.organisms[org_id];
            let phenotype = organism.phenotype();
            let rates = organism.mutation_rates();

            self.stats.sum_fitness.add(phenotype.fitness());
            self.stats.sum_merit.add(phenotype.merit());
            self.stats.sum_gestation.add(phenotype.gestation_time() as f64);
            self.stats.sum_age.add(f64::from(phenotype.age()));
            self.stats.sum_generation.add(f64::from(phenotype.generation()));
            self.stats.sum_neutral_metric.add(phenotype.neutral_metric());
            self.stats
                .sum_lineage_label
                .add(f64::from(organism.lineage_label()));
            self.stats.sum_copy_mut_rate.add(rates.copy_mut_prob);
            self.stats
                .sum_div_mut_rate
                .add(rates.div_mut_prob / phenotype.div_type());
            self.stats.sum_copied_size.add(phenotype.copied_size() as f64);
            self.stats
                .sum_executed_size
                .add(phenotype.executed_size() as f64);
            self.stats.genotype_map[cell_id] = organism.genotype();

            self.stats.max_merit = self.stats.max_merit.max(phenotype.merit());
            self.stats.max_fitness = self.stats.max_fitness.max(phenotype.fitness());
            self.stats.max_gestation_time =
                self.stats.max_gestation_time.max(phenotype.gestation_time());
            self.stats.max_genome_length =
                self.stats.max_genome_length.max(phenotype.genome_length());
            self.stats.min_merit = self.stats.min_merit.min(phenotype.merit());
            self.stats.min_fitness = self.stats.min_fitness.min(phenotype.fitness());
            self.stats.min_gestation_time =
                self.stats.min_gestation_time.min(phenotype.gestation_time());
            self.stats.min_genome_length =
                self.stats.min_genome_length.min(phenotype.genome_length());

            for (task, &count) in phenotype.cur_task_count().iter().enumerate() {
                if count > 0 {
                    self.stats.cur_task_counts[task] += 1;
                }
            }
            for (task, &count) in phenotype.last_task_count().iter().enumerate() {
                if count > 0 {
                    self.stats.last_task_counts[task] += 1;
                    self.stats.task_exe_counts[task] += u64::from(count);
                }
            }
            for (inst, &count) in phenotype.last_inst_count().iter().enumerate() {
                self.stats.inst_counts[inst] += u64::from(count);
            }

            if phenotype.parent_true() {
                self.stats.num_breed_true += 1;
            }
            if !organism.parasites().is_empty() {
                self.stats.num_parasites += 1;
            }
            if phenotype.num_divides() == 0 {
                self.stats.num_no_birth += 1;
            }
            if phenotype.is_modified() {
                self.stats.num_modified += 1;
            }
            if let Some(hardware) = organism.hardware() {
                if hardware.num_threads() > 1 {
                    self.stats.num_multi_thread += 1;
                } else {
                    self.stats.num_single_thread += 1;
                }
                self.stats.sum_mem_size.add(hardware.memory().len() as f64);
            }

            self.organisms[org_id].phenotype_mut().bump_age();
        }
    }

    /// Genotype-level weighted sums and the abundance entropy.
    fn update_genotype_stats(&mut self) {
        if self.num_organisms == 0 {
            return;
        }
        let update = self.stats.update();
        let threshold = self.classification.threshold();
        let mut entropy = 0.0;
        for genotype in self.classification.iter_best_first() {
            let abundance = genotype.num_organisms();
            if abundance == 0 {
                break;
            }
            let weight = abundance as f64;
            let age = (update - genotype.update_born()) as f64;
            self.stats.sum_genotype_age.add_weighted(age, weight);
            self.stats.sum_abundance.add(weight);
            self.stats
                .sum_genotype_depth
                .add_weighted(f64::from(genotype.depth()), weight);
            self.stats
                .sum_genotype_size
                .add_weighted(genotype.length() as f64, weight);
            if genotype.is_threshold(threshold) {
                self.stats.sum_threshold_age.add_weighted(age, weight);
            }

            let p = weight / self.num_organisms as f64;
            entropy += -(p * p.ln());
        }
        self.stats.entropy = entropy;
    }

    /// Entropy restricted to threshold genotypes, the archive's
    /// species-level grouping.
    fn update_species_stats(&mut self) {
        if self.num_organisms == 0 {
            return;
        }
        let threshold = self.classification.threshold();
        let mut entropy = 0.0;
        for genotype in self.classification.iter_best_first() {
            if genotype.num_organisms() == 0 || !genotype.is_threshold(threshold) {
                continue;
            }
            let p = genotype.num_organisms() as f64 / self.num_organisms as f64;
            entropy += -(p * p.ln());
        }
        self.stats.species_entropy = entropy;
    }

    fn update_dominant_stats(&mut self) {
        let Some(best) = self.classification.best_genotype() else {
            return;
        };
        if best.num_organisms() == 0 {
            return;
        }
        self.stats.dominant = Some(DominantSnapshot {
            id: best.id(),
            name: best.name().to_string(),
            abundance: best.num_organisms(),
            merit: best.merit_sum.mean(),
            gestation_time: best.gestation_sum.mean(),
            fitness: best.fitness_sum.mean(),
            copied_size: best.copied_size_sum.mean(),
            executed_size: best.executed_size_sum.mean(),
            length: best.length(),
            depth: best.depth(),
            births: best.births(),
            sequence: best.genome().to_string(),
        });
    }

    fn update_dominant_parasite_stats(&mut self) {
        let Some(best) = self.classification.best_inject_genotype() else {
            return;
        };
        self.stats.dominant_parasite = Some(DominantParasiteSnapshot {
            id: best.id(),
            abundance: best.num_injected(),
            length: best.length(),
            sequence: best.code().to_string(),
        });
    }

    /// Number of distinct last-task signatures among live organisms.
    #[must_use]
    pub fn phenotype_diversity(&self) -> usize {
        let mut signatures = BTreeSet::new();
        for cell in &self.cells {
            if let Some(organism) = cell.occupant().and_then(|id| self.organisms.get(id)) {
                signatures.insert(organism.phenotype().task_signature());
            }
        }
        signatures.len()
    }

    // --- self checks ------------------------------------------------------

    /// Structural health check over the scheduler, every cell, and the
    /// organism and deme bookkeeping.
    #[must_use]
    pub fn ok(&self) -> bool {
        if !self.schedule.check() {
            return false;
        }
        for (cell_id, cell) in self.cells.iter().enumerate() {
            if !cell.check() || cell.id() != cell_id {
                return false;
            }
        }
        if self.cells.len() != self.config.num_cells() {
            return false;
        }
        let occupied = self.cells.iter().filter(|cell| cell.is_occupied()).count();
        if occupied != self.num_organisms {
            return false;
        }
        for deme in &self.demes {
            let deme_occupied = deme
                .cell_ids()
                .iter()
                .filter(|&&cell_id| self.cells[cell_id].is_occupied())
                .count();
            if deme_occupied != deme.org_count() {
                return false;
            }
        }
        true
    }
}

fn next_token<'a>(
    tokens: &mut impl Iterator<Item = &'a str>,
    what: &str,
) -> Result<&'a str, PopulationError> {
    tokens
        .next()
        .ok_or_else(|| PopulationError::CloneFormat(format!("missing {what}")))
}

fn parse_token<'a, T: FromStr>(
    tokens: &mut impl Iterator<Item = &'a str>,
    what: &str,
) -> Result<T, PopulationError> {
    let token = next_token(tokens, what)?;
    token
        .parse()
        .map_err(|_| PopulationError::CloneFormat(format!("bad {what}: {token:?}")))
}
