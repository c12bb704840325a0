//! Headless driver: builds a population from CLI flags, seeds it with a
//! self-copying ancestor (or a saved clone), and runs virtual updates.

use anyhow::{Context, Result, bail};
use clap::{Parser, ValueEnum};
use owo_colors::OwoColorize;
use primordia_core::{
    BirthMethod, CodeLabel, Genome, Hardware, HardwareFactory, InjectGenotypeId, OrganismId,
    Population, PopulationConfig, SlicingMethod, WorldGeometry,
};
use rand::Rng;
use std::fs;
use std::path::PathBuf;
use tracing::{info, warn};

/// Symbol alphabet used for copy mutations.
const ALPHABET: &[u8] = b"abcdefghijklmnopqrstuvwxyz";

#[derive(Parser, Debug)]
#[command(name = "primordia", version, about = "Headless digital-evolution driver")]
struct AppCli {
    /// World width in cells.
    #[arg(long, default_value_t = 20)]
    width: u32,

    /// World height in cells.
    #[arg(long, default_value_t = 20)]
    height: u32,

    /// Boundary connectivity.
    #[arg(long, value_enum, default_value_t = GeometryArg::Torus)]
    geometry: GeometryArg,

    /// Number of horizontal deme slabs (0 disables group selection).
    #[arg(long, default_value_t = 0)]
    demes: u32,

    /// Child placement policy.
    #[arg(long, value_enum, default_value_t = BirthArg::Age)]
    birth_method: BirthArg,

    /// Time-slicing scheduler.
    #[arg(long, value_enum, default_value_t = SlicingArg::IntegratedMerit)]
    scheduler: SlicingArg,

    /// Updates to run.
    #[arg(long, default_value_t = 100)]
    updates: u64,

    /// Average instruction steps per organism per update.
    #[arg(long, default_value_t = 30)]
    steps_per_update: u64,

    /// Ancestor genome symbols; defaults to a 50-symbol self-copier.
    #[arg(long)]
    start_creature: Option<String>,

    /// Seed from a saved clone instead of a start creature.
    #[arg(long, conflicts_with = "start_creature")]
    clone_file: Option<PathBuf>,

    /// Write a clone snapshot here when the run ends.
    #[arg(long)]
    save_clone: Option<PathBuf>,

    /// RNG seed for reproducible runs.
    #[arg(long)]
    seed: Option<u64>,
}

#[derive(Debug, Clone, Copy, ValueEnum)]
enum GeometryArg {
    Grid,
    Torus,
}

impl From<GeometryArg> for WorldGeometry {
    fn from(value: GeometryArg) -> Self {
        match value {
            GeometryArg::Grid => WorldGeometry::Grid,
            GeometryArg::Torus => WorldGeometry::Torus,
        }
    }
}

#[derive(Debug, Clone, Copy, ValueEnum)]
enum BirthArg {
    Age,
    Merit,
    Random,
    Empty,
    FullSoupRandom,
    FullSoupEldest,
    DemeRandom,
    ParentFacing,
    NextCell,
}

impl From<BirthArg> for BirthMethod {
    fn from(value: BirthArg) -> Self {
        match value {
            BirthArg::Age => BirthMethod::Age,
            BirthArg::Merit => BirthMethod::Merit,
            BirthArg::Random => BirthMethod::Random,
            BirthArg::Empty => BirthMethod::Empty,
            BirthArg::FullSoupRandom => BirthMethod::FullSoupRandom,
            BirthArg::FullSoupEldest => BirthMethod::FullSoupEldest,
            BirthArg::DemeRandom => BirthMethod::DemeRandom,
            BirthArg::ParentFacing => BirthMethod::ParentFacing,
            BirthArg::NextCell => BirthMethod::NextCell,
        }
    }
}

#[derive(Debug, Clone, Copy, ValueEnum)]
enum SlicingArg {
    Constant,
    ProbMerit,
    IntegratedMerit,
}

impl From<SlicingArg> for SlicingMethod {
    fn from(value: SlicingArg) -> Self {
        match value {
            SlicingArg::Constant => SlicingMethod::Constant,
            SlicingArg::ProbMerit => SlicingMethod::ProbMerit,
            SlicingArg::IntegratedMerit => SlicingMethod::IntegratedMerit,
        }
    }
}

/// One-symbol-per-step self-copier: after copying its whole image (with
/// per-cell copy mutations) it divides.
struct ReplicatorHardware {
    memory: Genome,
    cursor: usize,
    child_image: Vec<u8>,
}

impl Hardware for ReplicatorHardware {
    fn single_process(&mut self, population: &mut Population, me: OrganismId) {
        let rates = {
            let Some(organism) = population.organism_mut(me) else {
                return;
            };
            organism.phenotype_mut().bump_time_used();
            organism.mutation_rates()
        };

        let mut symbol = self.memory.symbols()[self.cursor];
        if population.rng().random::<f64>() < rates.copy_mut_prob {
            symbol = ALPHABET[population.rng().random_range(0..ALPHABET.len())];
        }
        self.child_image.push(symbol);
        self.cursor += 1;

        if self.cursor == self.memory.len() {
            self.cursor = 0;
            let child_genome = Genome::new(std::mem::take(&mut self.child_image));
            if let Some(organism) = population.organism_mut(me) {
                let length = self.memory.len();
                organism.phenotype_mut().set_copied_size(length);
                organism.phenotype_mut().set_executed_size(length);
            }
            population.activate_offspring(child_genome, me);
        }
    }

    fn memory(&self) -> &Genome {
        &self.memory
    }

    fn code_label(&self) -> CodeLabel {
        CodeLabel::default()
    }

    fn num_threads(&self) -> usize {
        1
    }

    fn thread_owner(&self) -> Option<InjectGenotypeId> {
        None
    }

    fn set_thread_owner(&mut self, _owner: InjectGenotypeId) {}

    fn inject_host(&mut self, _label: &CodeLabel, _code: &Genome) -> bool {
        false
    }
}

struct ReplicatorFactory;

impl HardwareFactory for ReplicatorFactory {
    fn build(&self, genome: &Genome) -> Box<dyn Hardware> {
        Box::new(ReplicatorHardware {
            memory: genome.clone(),
            cursor: 0,
            child_image: Vec::with_capacity(genome.len()),
        })
    }
}

fn build_config(cli: &AppCli) -> PopulationConfig {
    PopulationConfig {
        world_x: cli.width,
        world_y: cli.height,
        geometry: cli.geometry.into(),
        num_demes: cli.demes,
        birth_method: cli.birth_method.into(),
        slicing_method: cli.scheduler.into(),
        rng_seed: cli.seed,
        ..PopulationConfig::default()
    }
}

fn seed_population(population: &mut Population, cli: &AppCli) -> Result<()> {
    if let Some(path) = &cli.clone_file {
        let contents = fs::read_to_string(path)
            .with_context(|| format!("reading clone file {}", path.display()))?;
        population.load_clone(&contents)?;
        info!(organisms = population.num_organisms(), "clone loaded");
        return Ok(());
    }

    let ancestor = match &cli.start_creature {
        Some(symbols) => Genome::from_text(symbols),
        None => Genome::new(vec![b'a'; 50]),
    };
    if ancestor.len() <= 1 {
        bail!("start creature must hold more than one symbol");
    }
    let cell = population.inject(&ancestor, None, None, 0, 0.0);
    info!(cell, length = ancestor.len(), "ancestor injected");
    Ok(())
}

fn run(cli: &AppCli) -> Result<()> {
    let config = build_config(cli);
    let mut population = Population::new(config, Box::new(ReplicatorFactory))?;
    seed_population(&mut population, cli)?;

    for update in 1..=cli.updates {
        population.set_update(update as i64);

        let steps = population.num_organisms() as u64 * cli.steps_per_update;
        if steps == 0 {
            warn!(update, "population extinct, stopping early");
            break;
        }
        let step_size = 1.0 / steps as f64;
        for _ in 0..steps {
            if let Some(cell_id) = population.schedule_organism() {
                population.process_step(step_size, cell_id);
            }
        }

        population.calc_update_stats();
        let stats = population.stats();
        info!(
            update,
            organisms = stats.num_creatures,
            genotypes = stats.num_genotypes,
            mean_fitness = stats.sum_fitness.mean(),
            entropy = stats.entropy,
            "update complete"
        );
        if update.is_multiple_of(10) || update == cli.updates {
            println!(
                "{} {:>6}  {} {:>5}  {} {:>4}  {} {:>8.4}",
                "update".dimmed(),
                update.bold(),
                "orgs".dimmed(),
                stats.num_creatures,
                "genos".dimmed(),
                stats.num_genotypes,
                "entropy".dimmed(),
                stats.entropy,
            );
        }

        debug_assert!(population.ok());
    }

    if let Some(path) = &cli.save_clone {
        let mut buffer = Vec::new();
        population.save_clone(&mut buffer)?;
        fs::write(path, buffer)
            .with_context(|| format!("writing clone file {}", path.display()))?;
        info!(path = %path.display(), "clone saved");
    }
    Ok(())
}

fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_writer(std::io::stderr)
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .try_init();
}

fn main() -> Result<()> {
    let cli = AppCli::parse();
    init_tracing();
    run(&cli)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn cli(args: &[&str]) -> AppCli {
        AppCli::parse_from(std::iter::once("primordia").chain(args.iter().copied()))
    }

    #[test]
    fn replicator_population_grows_under_the_driver() {
        let cli = cli(&["--width", "6", "--height", "6", "--updates", "5", "--seed", "3"]);
        let config = build_config(&cli);
        let mut population = Population::new(config, Box::new(ReplicatorFactory)).expect("world");
        seed_population(&mut population, &cli).expect("seeded");
        assert_eq!(population.num_organisms(), 1);

        for update in 1..=cli.updates {
            population.set_update(update as i64);
            let steps = population.num_organisms() as u64 * cli.steps_per_update;
            let step_size = 1.0 / steps as f64;
            for _ in 0..steps {
                if let Some(cell_id) = population.schedule_organism() {
                    population.process_step(step_size, cell_id);
                }
            }
        }
        assert!(population.num_organisms() > 1, "the ancestor replicated");
        assert!(population.ok());
    }

    #[test]
    fn short_start_creatures_are_rejected() {
        let cli = cli(&["--start-creature", "a"]);
        let config = build_config(&cli);
        let mut population = Population::new(config, Box::new(ReplicatorFactory)).expect("world");
        assert!(seed_population(&mut population, &cli).is_err());
    }

    #[test]
    fn clone_round_trip_through_the_driver() {
        let dir = tempfile::tempdir().expect("tempdir");
        let clone_path = dir.path().join("population.clone");

        let save_cli = cli(&[
            "--width",
            "6",
            "--height",
            "6",
            "--updates",
            "3",
            "--seed",
            "4",
            "--save-clone",
            clone_path.to_str().expect("utf8 path"),
        ]);
        run(&save_cli).expect("seeded run saves");

        let load_cli = cli(&[
            "--width",
            "6",
            "--height",
            "6",
            "--updates",
            "1",
            "--seed",
            "4",
            "--clone-file",
            clone_path.to_str().expect("utf8 path"),
        ]);
        run(&load_cli).expect("clone reloads");
    }
}
