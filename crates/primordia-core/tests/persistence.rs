mod common;

use common::{genome, seeded, world};
use primordia_core::{GenotypeId, PopulationConfig, WorldGeometry};
use std::io::Write as _;

fn persist_config() -> PopulationConfig {
    seeded(
        PopulationConfig {
            world_x: 4,
            world_y: 4,
            geometry: WorldGeometry::Torus,
            ..PopulationConfig::default()
        },
        21,
    )
}

#[test]
fn clone_save_restores_update_archive_and_layout() {
    let mut source = world(persist_config());
    source.set_update(37);
    source.inject(&genome("aaaaaaaa"), Some(0), None, 0, 0.0);
    source.inject(&genome("aaaaaaaa"), Some(5), None, 0, 0.0);
    source.inject(&genome("bbbbbbbb"), Some(9), None, 0, 0.0);

    let mut saved = Vec::new();
    source.save_clone(&mut saved).expect("save");
    let saved = String::from_utf8(saved).expect("utf8");

    let mut restored = world(persist_config());
    restored.load_clone(&saved).expect("load");

    assert_eq!(restored.stats().update(), 37);
    assert_eq!(restored.num_organisms(), 3);
    assert_eq!(
        restored.classification().num_genotypes(),
        source.classification().num_genotypes()
    );

    for cell_id in 0..source.num_cells() {
        let source_genotype = source
            .organism_at(cell_id)
            .and_then(|organism| organism.genotype());
        let restored_genotype = restored
            .organism_at(cell_id)
            .and_then(|organism| organism.genotype());
        assert_eq!(
            source_genotype, restored_genotype,
            "cell {cell_id} genotype mapping diverged"
        );
    }
    for genotype in source.classification().iter_best_first() {
        let twin = restored
            .classification()
            .get(genotype.id())
            .expect("genotype survives the round trip");
        assert_eq!(twin.genome(), genotype.genome());
        assert_eq!(twin.num_organisms(), genotype.num_organisms());
    }
    assert!(restored.ok());
}

#[test]
fn clone_load_rejects_mismatched_dimensions() {
    let mut source = world(persist_config());
    source.inject(&genome("aaaaaaaa"), Some(0), None, 0, 0.0);
    let mut saved = Vec::new();
    source.save_clone(&mut saved).expect("save");

    let mut config = persist_config();
    config.world_x = 5;
    let mut other = world(config);
    assert!(
        other
            .load_clone(&String::from_utf8(saved).expect("utf8"))
            .is_err()
    );
}

#[test]
fn clone_load_replaces_the_previous_population() {
    let mut source = world(persist_config());
    source.inject(&genome("aaaaaaaa"), Some(3), None, 0, 0.0);
    let mut saved = Vec::new();
    source.save_clone(&mut saved).expect("save");

    let mut target = world(persist_config());
    for cell_id in 0..16 {
        target.inject(&genome("cccccccc"), Some(cell_id), None, 0, 0.0);
    }
    target
        .load_clone(&String::from_utf8(saved).expect("utf8"))
        .expect("load");
    assert_eq!(target.num_organisms(), 1);
    assert!(target.cell(3).is_occupied());
    assert!(target.ok());
}

#[test]
fn dump_file_injects_cpus_in_id_order() {
    let mut file = tempfile::NamedTempFile::new().expect("temp file");
    // id parent parent_dist num_cpus total_cpus length merit gest fitness
    // update_born update_dead depth genome
    writeln!(file, "7 2 1 3 5 8 12.5 8 1.5 -10 -5 1 bbbbbbbb").expect("write");
    writeln!(file, "2 -1 0 2 9 8 0 8 1.0 -20 -10 0 aaaaaaaa").expect("write");
    writeln!(file, "9 7 1 0 4 8 3.0 8 1.0 -20 -10 2 dddddddd").expect("write");

    let mut population = world(persist_config());
    population
        .load_dump_file(file.path(), Some(50))
        .expect("load dump");

    // Ascending id order: genotype 2's organisms land first.
    assert_eq!(population.num_organisms(), 5);
    let first = population.organism_at(0).expect("cell 0");
    assert_eq!(first.genotype(), Some(GenotypeId(2)));
    assert_eq!(first.genome().to_string(), "aaaaaaaa");
    let third = population.organism_at(2).expect("cell 2");
    assert_eq!(third.genotype(), Some(GenotypeId(7)));

    // Explicit merit overrides the length default; zero merit does not.
    assert!((third.phenotype().merit() - 12.5).abs() < f64::EPSILON);
    assert!((first.phenotype().merit() - 8.0).abs() < f64::EPSILON);

    // Parent linking and the historic (0-cpu) entry.
    let child = population
        .classification()
        .get(GenotypeId(7))
        .expect("archived");
    assert_eq!(child.parent_id(), Some(GenotypeId(2)));
    assert!(population.classification().get(GenotypeId(9)).is_none());

    // Birth updates older than the current update are clamped to it.
    assert_eq!(child.update_born(), 50);
    assert!(population.ok());
}

#[test]
fn dump_overflow_stops_quietly() {
    let mut file = tempfile::NamedTempFile::new().expect("temp file");
    writeln!(file, "1 -1 0 20 20 8 1.0 8 1.0 0 0 0 aaaaaaaa").expect("write");

    let mut population = world(persist_config());
    population
        .load_dump_file(file.path(), Some(0))
        .expect("overflow is not an error");
    assert_eq!(population.num_organisms(), 16, "grid filled then stopped");
}

#[test]
fn serial_transfer_thins_to_the_requested_size() {
    let mut population = world(persist_config());
    for cell_id in 0..16 {
        population.inject(&genome("abcdefgh"), Some(cell_id), None, 0, 0.0);
    }
    population.serial_transfer(6, false);
    assert_eq!(population.num_organisms(), 6);
    assert!(population.ok());

    // Already small enough: nothing happens.
    population.serial_transfer(10, false);
    assert_eq!(population.num_organisms(), 6);
}

#[test]
fn serial_transfer_can_drop_zero_fitness_organisms_first() {
    let mut population = world(persist_config());
    for cell_id in 0..8 {
        population.inject(&genome("abcdefgh"), Some(cell_id), None, 0, 0.0);
    }
    for cell_id in 0..5 {
        population
            .organism_at_mut(cell_id)
            .expect("occupant")
            .phenotype_mut()
            .set_fitness(0.0);
    }
    population.serial_transfer(6, true);
    assert_eq!(population.num_organisms(), 3, "the dead alone got us below");
    for cell_id in 0..5 {
        assert!(!population.cell(cell_id).is_occupied());
    }
}

#[test]
fn memory_summary_lists_each_cell() {
    let mut population = world(persist_config());
    population.inject(&genome("abcdefgh"), Some(1), None, 0, 0.0);

    let mut dump = Vec::new();
    population.dump_memory_summary(&mut dump).expect("dump");
    let dump = String::from_utf8(dump).expect("utf8");
    let lines: Vec<&str> = dump.lines().collect();
    assert_eq!(lines.len(), 16);
    assert_eq!(lines[0], "0 EMPTY");
    assert_eq!(lines[1], "1 8 abcdefgh");
}

#[test]
fn update_stats_walks_are_read_consistent() {
    let mut population = world(persist_config());
    population.set_update(5);
    population.inject(&genome("aaaaaaaa"), Some(0), Some(4.0), 0, 0.0);
    population.inject(&genome("aaaaaaaa"), Some(1), Some(6.0), 0, 0.0);
    population.inject(&genome("bbbbbbbb"), Some(2), Some(2.0), 0, 0.0);

    population.calc_update_stats();
    let stats = population.stats();

    assert_eq!(stats.num_creatures, 3);
    assert_eq!(stats.num_genotypes, 2);
    assert!((stats.sum_merit.mean() - 4.0).abs() < f64::EPSILON);
    assert!((stats.max_merit - 6.0).abs() < f64::EPSILON);
    assert!((stats.min_merit - 2.0).abs() < f64::EPSILON);
    assert_eq!(stats.genotype_map[0], stats.genotype_map[1]);
    assert_ne!(stats.genotype_map[0], stats.genotype_map[2]);
    assert_eq!(stats.genotype_map[3], None);

    // Two genotypes at abundances 2 and 1: entropy of (2/3, 1/3).
    let expected = -(2.0 / 3.0 * (2.0_f64 / 3.0).ln()) - (1.0 / 3.0 * (1.0_f64 / 3.0).ln());
    assert!((stats.entropy - expected).abs() < 1e-12);

    // The dominant genotype is the more abundant one.
    let dominant = stats.dominant.as_ref().expect("dominant");
    assert_eq!(dominant.abundance, 2);
    assert_eq!(dominant.sequence, "aaaaaaaa");

    // The walk ages organisms by one update.
    assert_eq!(
        population.organism_at(0).expect("occupant").phenotype().age(),
        1
    );
}

#[test]
fn phenotype_diversity_counts_distinct_task_signatures() {
    let mut population = world(persist_config());
    for cell_id in 0..3 {
        population.inject(&genome("abcdefgh"), Some(cell_id), None, 0, 0.0);
    }
    for (cell_id, tasks) in [(0, vec![0]), (1, vec![0]), (2, vec![0, 1])] {
        let organism = population.organism_at_mut(cell_id).expect("occupant");
        for task in tasks {
            organism.phenotype_mut().record_task(task);
        }
        let length = organism.genome().len();
        organism.phenotype_mut().divide_reset(length);
    }
    assert_eq!(population.phenotype_diversity(), 2);
}
