//! The genotype archive: canonical, reference-counted identities for
//! genomes and parasite payloads.
//!
//! The archive owns genotype entities by id. The population holds ids and
//! requests transient retention through `pin`/`unpin`, which keeps an
//! entry alive across the window where its last member is being replaced.

use crate::{Genome, stats::RunningSum};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;

/// Archive id of a canonical genome.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize,
)]
pub struct GenotypeId(pub u32);

impl fmt::Display for GenotypeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Archive id of a parasite code payload.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize,
)]
pub struct InjectGenotypeId(pub u32);

impl fmt::Display for InjectGenotypeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// The canonicalized, reference-counted identity of a genome sequence.
#[derive(Debug, Clone)]
pub struct Genotype {
    id: GenotypeId,
    name: String,
    genome: Genome,
    parent_id: Option<GenotypeId>,
    depth: u32,
    num_organisms: usize,
    total_organisms: usize,
    births: usize,
    update_born: i64,
    update_dead: i64,
    /// Retention count; a pinned entry survives a transient empty state.
    defer_adjust: usize,

    // Parent-side accumulators updated on every birth from this genotype.
    pub gestation_sum: RunningSum,
    pub fitness_sum: RunningSum,
    pub merit_sum: RunningSum,
    pub copied_size_sum: RunningSum,
    pub executed_size_sum: RunningSum,
}

impl Genotype {
    fn new(id: GenotypeId, genome: Genome, parent: Option<&Genotype>, update_born: i64) -> Self {
        Self {
            id,
            name: format!("org-{}", id.0),
            genome,
            parent_id: parent.map(|p| p.id),
            depth: parent.map_or(0, |p| p.depth + 1),
            num_organisms: 0,
            total_organisms: 0,
            births: 0,
            update_born,
            update_dead: update_born,
            defer_adjust: 0,
            gestation_sum: RunningSum::default(),
            fitness_sum: RunningSum::default(),
            merit_sum: RunningSum::default(),
            copied_size_sum: RunningSum::default(),
            executed_size_sum: RunningSum::default(),
        }
    }

    #[must_use]
    pub const fn id(&self) -> GenotypeId {
        self.id
    }

    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn set_name(&mut self, name: impl Into<String>) {
        self.name = name.into();
    }

    #[must_use]
    pub fn genome(&self) -> &Genome {
        &self.genome
    }

    #[must_use]
    pub fn length(&self) -> usize {
        self.genome.len()
    }

    #[must_use]
    pub const fn parent_id(&self) -> Option<GenotypeId> {
        self.parent_id
    }

    pub fn set_parent_id(&mut self, parent: Option<GenotypeId>) {
        self.parent_id = parent;
    }

    #[must_use]
    pub const fn depth(&self) -> u32 {
        self.depth
    }

    #[must_use]
    pub const fn num_organisms(&self) -> usize {
        self.num_organisms
    }

    #[must_use]
    pub const fn total_organisms(&self) -> usize {
        self.total_organisms
    }

    #[must_use]
    pub const fn births(&self) -> usize {
        self.births
    }

    #[must_use]
    pub const fn update_born(&self) -> i64 {
        self.update_born
    }

    #[must_use]
    pub const fn update_dead(&self) -> i64 {
        self.update_dead
    }

    #[must_use]
    pub const fn defer_adjust(&self) -> usize {
        self.defer_adjust
    }

    /// Whether this genotype ever grew past the threshold abundance.
    #[must_use]
    pub fn is_threshold(&self, threshold: usize) -> bool {
        self.total_organisms >= threshold
    }

    /// Records the parent-side metrics of one birth.
    pub fn record_birth_stats(
        &mut self,
        gestation_time: u64,
        fitness: f64,
        merit: f64,
        copied_size: usize,
        executed_size: usize,
    ) {
        self.births += 1;
        self.gestation_sum.add(gestation_time as f64);
        self.fitness_sum.add(fitness);
        self.merit_sum.add(merit);
        self.copied_size_sum.add(copied_size as f64);
        self.executed_size_sum.add(executed_size as f64);
    }
}

/// The classification identity of a parasitic code payload.
#[derive(Debug, Clone)]
pub struct InjectGenotype {
    id: InjectGenotypeId,
    code: Genome,
    parent_id: Option<InjectGenotypeId>,
    num_injected: usize,
    total_injected: usize,
    update_born: i64,
}

impl InjectGenotype {
    #[must_use]
    pub const fn id(&self) -> InjectGenotypeId {
        self.id
    }

    #[must_use]
    pub fn code(&self) -> &Genome {
        &self.code
    }

    #[must_use]
    pub fn length(&self) -> usize {
        self.code.len()
    }

    #[must_use]
    pub const fn parent_id(&self) -> Option<InjectGenotypeId> {
        self.parent_id
    }

    #[must_use]
    pub const fn num_injected(&self) -> usize {
        self.num_injected
    }

    #[must_use]
    pub const fn total_injected(&self) -> usize {
        self.total_injected
    }

    #[must_use]
    pub const fn update_born(&self) -> i64 {
        self.update_born
    }
}

/// Flat record used by clone save/load to rebuild the archive.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GenotypeRecord {
    pub id: GenotypeId,
    pub parent_id: Option<GenotypeId>,
    pub depth: u32,
    pub update_born: i64,
    pub genome: Genome,
}

/// Reference-counted archive of genotypes and inject-genotypes.
#[derive(Debug)]
pub struct Classification {
    genotypes: HashMap<GenotypeId, Genotype>,
    by_genome: HashMap<Genome, GenotypeId>,
    next_id: u32,
    inject_genotypes: HashMap<InjectGenotypeId, InjectGenotype>,
    inject_by_code: HashMap<Genome, InjectGenotypeId>,
    next_inject_id: u32,
    /// Entries pruned after their last member died.
    historic: usize,
    threshold: usize,
    current_update: i64,
    /// Live-organism counts per lineage label, kept only when lineage
    /// logging is on.
    lineages: Option<HashMap<i32, usize>>,
}

impl Classification {
    #[must_use]
    pub fn new(threshold: usize, log_lineages: bool) -> Self {
        Self {
            genotypes: HashMap::new(),
            by_genome: HashMap::new(),
            next_id: 0,
            inject_genotypes: HashMap::new(),
            inject_by_code: HashMap::new(),
            next_inject_id: 0,
            historic: 0,
            threshold,
            current_update: 0,
            lineages: log_lineages.then(HashMap::new),
        }
    }

    pub fn set_update(&mut self, update: i64) {
        self.current_update = update;
    }

    #[must_use]
    pub fn num_genotypes(&self) -> usize {
        self.genotypes.len()
    }

    #[must_use]
    pub fn num_threshold_genotypes(&self) -> usize {
        let threshold = self.threshold;
        self.genotypes
            .values()
            .filter(|g| g.is_threshold(threshold))
            .count()
    }

    #[must_use]
    pub const fn historic_count(&self) -> usize {
        self.historic
    }

    #[must_use]
    pub const fn threshold(&self) -> usize {
        self.threshold
    }

    #[must_use]
    pub fn get(&self, id: GenotypeId) -> Option<&Genotype> {
        self.genotypes.get(&id)
    }

    pub fn get_mut(&mut self, id: GenotypeId) -> Option<&mut Genotype> {
        self.genotypes.get_mut(&id)
    }

    /// Returns the genotype for `genome`, creating one (as a child of
    /// `parent`) if the sequence is new to the archive.
    pub fn get_genotype(&mut self, genome: &Genome, parent: Option<GenotypeId>) -> GenotypeId {
        if let Some(&id) = self.by_genome.get(genome) {
            return id;
        }
        let id = GenotypeId(self.next_id);
        self.next_id += 1;
        let parent_entry = parent.and_then(|p| self.genotypes.get(&p));
        let genotype = Genotype::new(id, genome.clone(), parent_entry, self.current_update);
        self.by_genome.insert(genome.clone(), id);
        self.genotypes.insert(id, genotype);
        id
    }

    /// Restores a genotype under a caller-chosen id (dump loading). The
    /// id counter advances past every restored id.
    pub fn insert_loaded(&mut self, record: GenotypeRecord) -> GenotypeId {
        let GenotypeRecord {
            id,
            parent_id,
            depth,
            update_born,
            genome,
        } = record;
        let mut genotype = Genotype::new(id, genome.clone(), None, update_born);
        genotype.parent_id = parent_id;
        genotype.depth = depth;
        self.next_id = self.next_id.max(id.0 + 1);
        self.by_genome.insert(genome, id);
        self.genotypes.insert(id, genotype);
        id
    }

    /// Registers one live organism under `id`.
    pub fn add_organism(&mut self, id: GenotypeId) {
        if let Some(genotype) = self.genotypes.get_mut(&id) {
            genotype.num_organisms += 1;
            genotype.total_organisms += 1;
        }
    }

    /// Removes one live organism from `id`. The entry survives until the
    /// next `adjust` so a replacement can still reference it.
    pub fn remove_organism(&mut self, id: GenotypeId) {
        if let Some(genotype) = self.genotypes.get_mut(&id) {
            debug_assert!(genotype.num_organisms > 0);
            genotype.num_organisms = genotype.num_organisms.saturating_sub(1);
        }
    }

    /// Requests transient retention of `id` across an empty window.
    pub fn pin(&mut self, id: GenotypeId) {
        if let Some(genotype) = self.genotypes.get_mut(&id) {
            genotype.defer_adjust += 1;
        }
    }

    /// Releases one retention request.
    pub fn unpin(&mut self, id: GenotypeId) {
        if let Some(genotype) = self.genotypes.get_mut(&id) {
            genotype.defer_adjust = genotype.defer_adjust.saturating_sub(1);
        }
    }

    /// Re-evaluates an entry after a membership change, pruning it into
    /// the historic tally once no organisms and no pins remain.
    pub fn adjust(&mut self, id: GenotypeId) {
        let prune = match self.genotypes.get_mut(&id) {
            Some(genotype) => {
                if genotype.num_organisms == 0 && genotype.defer_adjust == 0 {
                    genotype.update_dead = self.current_update;
                    true
                } else {
                    false
                }
            }
            None => false,
        };
        if prune {
            self.remove(id);
        }
    }

    /// Drops an entry outright (historic dump records, pruning).
    pub fn remove(&mut self, id: GenotypeId) {
        if let Some(genotype) = self.genotypes.remove(&id) {
            self.by_genome.remove(&genotype.genome);
            self.historic += 1;
        }
    }

    /// Ids ordered best-first: abundance descending, then id ascending.
    #[must_use]
    pub fn best_first(&self) -> Vec<GenotypeId> {
        let mut ids: Vec<GenotypeId> = self.genotypes.keys().copied().collect();
        ids.sort_by_key(|id| {
            let genotype = &self.genotypes[id];
            (std::cmp::Reverse(genotype.num_organisms), id.0)
        });
        ids
    }

    /// The most abundant genotype, if any organisms are alive.
    #[must_use]
    pub fn best_genotype(&self) -> Option<&Genotype> {
        self.best_first()
            .first()
            .and_then(|id| self.genotypes.get(id))
    }

    /// Iterates entries best-first.
    pub fn iter_best_first(&self) -> impl Iterator<Item = &Genotype> {
        self.best_first()
            .into_iter()
            .map(|id| &self.genotypes[&id])
    }

    /// Flat records of every entry, best-first, for clone saving.
    #[must_use]
    pub fn snapshot_records(&self) -> Vec<GenotypeRecord> {
        self.iter_best_first()
            .map(|genotype| GenotypeRecord {
                id: genotype.id,
                parent_id: genotype.parent_id,
                depth: genotype.depth,
                update_born: genotype.update_born,
                genome: genotype.genome.clone(),
            })
            .collect()
    }

    /// Replaces the archive contents from saved records.
    pub fn restore(&mut self, records: Vec<GenotypeRecord>, next_id: u32) {
        self.genotypes.clear();
        self.by_genome.clear();
        self.next_id = next_id;
        for record in records {
            self.insert_loaded(record);
        }
        self.next_id = self.next_id.max(next_id);
    }

    #[must_use]
    pub const fn next_genotype_id(&self) -> u32 {
        self.next_id
    }

    // --- inject genotypes -------------------------------------------------

    #[must_use]
    pub fn num_inject_genotypes(&self) -> usize {
        self.inject_genotypes.len()
    }

    #[must_use]
    pub fn get_inject(&self, id: InjectGenotypeId) -> Option<&InjectGenotype> {
        self.inject_genotypes.get(&id)
    }

    /// Returns the inject-genotype for `code`, creating one if the payload
    /// is new.
    pub fn get_inject_genotype(
        &mut self,
        code: &Genome,
        parent: Option<InjectGenotypeId>,
    ) -> InjectGenotypeId {
        if let Some(&id) = self.inject_by_code.get(code) {
            return id;
        }
        let id = InjectGenotypeId(self.next_inject_id);
        self.next_inject_id += 1;
        self.inject_by_code.insert(code.clone(), id);
        self.inject_genotypes.insert(
            id,
            InjectGenotype {
                id,
                code: code.clone(),
                parent_id: parent,
                num_injected: 0,
                total_injected: 0,
                update_born: self.current_update,
            },
        );
        id
    }

    pub fn add_parasite(&mut self, id: InjectGenotypeId) {
        if let Some(inject) = self.inject_genotypes.get_mut(&id) {
            inject.num_injected += 1;
            inject.total_injected += 1;
        }
    }

    pub fn remove_parasite(&mut self, id: InjectGenotypeId) {
        if let Some(inject) = self.inject_genotypes.get_mut(&id) {
            inject.num_injected = inject.num_injected.saturating_sub(1);
        }
    }

    /// Prunes an inject entry once nothing hosts it.
    pub fn adjust_inject(&mut self, id: InjectGenotypeId) {
        let prune = self
            .inject_genotypes
            .get(&id)
            .is_some_and(|inject| inject.num_injected == 0);
        if prune
            && let Some(inject) = self.inject_genotypes.remove(&id)
        {
            self.inject_by_code.remove(&inject.code);
            self.historic += 1;
        }
    }

    /// The most injected parasite payload, if any.
    #[must_use]
    pub fn best_inject_genotype(&self) -> Option<&InjectGenotype> {
        self.inject_genotypes
            .values()
            .filter(|inject| inject.num_injected > 0)
            .max_by_key(|inject| (inject.num_injected, std::cmp::Reverse(inject.id.0)))
    }

    // --- lineages ---------------------------------------------------------

    /// Registers a live organism under a lineage label.
    pub fn lineage_add(&mut self, label: i32) {
        if let Some(lineages) = &mut self.lineages {
            *lineages.entry(label).or_insert(0) += 1;
        }
    }

    /// Removes a live organism from a lineage label.
    pub fn lineage_remove(&mut self, label: i32) {
        if let Some(lineages) = &mut self.lineages {
            if let Some(count) = lineages.get_mut(&label) {
                *count = count.saturating_sub(1);
                if *count == 0 {
                    lineages.remove(&label);
                }
            }
        }
    }

    #[must_use]
    pub fn num_lineages(&self) -> usize {
        self.lineages.as_ref().map_or(0, HashMap::len)
    }
}
