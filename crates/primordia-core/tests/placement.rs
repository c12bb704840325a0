mod common;

use common::{genome, seeded, world};
use primordia_core::{BirthMethod, Population, PopulationConfig, WorldGeometry};

fn config_with(birth_method: BirthMethod) -> PopulationConfig {
    seeded(
        PopulationConfig {
            world_x: 5,
            world_y: 5,
            geometry: WorldGeometry::Torus,
            birth_method,
            ..PopulationConfig::default()
        },
        7,
    )
}

fn fill(population: &mut Population, cells: impl IntoIterator<Item = usize>) {
    for cell_id in cells {
        population.inject(&genome("abcdefgh"), Some(cell_id), Some(1.0), 0, 0.0);
    }
}

#[test]
fn empty_policy_prefers_vacant_neighbors() {
    let mut population = world(config_with(BirthMethod::Empty));
    fill(&mut population, [12, 11]);
    for _ in 0..20 {
        let target = population.position_child(12, true);
        assert_ne!(target, 12, "occupied parent is not an empty candidate");
        assert_ne!(target, 11, "occupied neighbor is not an empty candidate");
        assert!(population.cell(12).connections().contains(&target));
    }
}

#[test]
fn empty_policy_collapses_to_parent_when_saturated() {
    let mut population = world(config_with(BirthMethod::Empty));
    fill(&mut population, 0..25);
    assert_eq!(population.position_child(12, true), 12);
}

#[test]
fn next_cell_wraps_around_the_world() {
    let mut population = world(config_with(BirthMethod::NextCell));
    fill(&mut population, [24, 3]);
    assert_eq!(population.position_child(3, true), 4);
    assert_eq!(population.position_child(24, true), 0);
}

#[test]
fn parent_facing_returns_the_faced_cell() {
    let mut population = world(config_with(BirthMethod::ParentFacing));
    fill(&mut population, [12]);
    let faced = population.cell(12).faced_cell().expect("faced neighbor");
    assert_eq!(population.position_child(12, true), faced);
}

#[test]
fn age_policy_targets_the_oldest_cell() {
    let mut population = world(config_with(BirthMethod::Age));
    fill(&mut population, 0..25);
    // One neighbor of the parent is strictly oldest.
    population
        .organism_at_mut(11)
        .expect("neighbor")
        .phenotype_mut()
        .bump_age();
    for _ in 0..10 {
        assert_eq!(population.position_child(12, true), 11);
    }
}

#[test]
fn age_policy_tie_breaks_among_all_maxima() {
    let mut population = world(config_with(BirthMethod::Age));
    fill(&mut population, 0..25);
    for cell_id in [11, 13] {
        population
            .organism_at_mut(cell_id)
            .expect("neighbor")
            .phenotype_mut()
            .bump_age();
    }
    let mut seen = std::collections::BTreeSet::new();
    for _ in 0..60 {
        seen.insert(population.position_child(12, true));
    }
    assert_eq!(seen.into_iter().collect::<Vec<_>>(), vec![11, 13]);
}

#[test]
fn merit_policy_maximizes_merit_per_gestation() {
    let mut population = world(config_with(BirthMethod::Merit));
    fill(&mut population, 0..25);
    // All organisms share gestation; give one neighbor double merit.
    population.update_merit(13, 16.0);
    for _ in 0..10 {
        assert_eq!(population.position_child(12, true), 13);
    }
}

#[test]
fn random_policy_stays_in_the_neighborhood() {
    let mut population = world(config_with(BirthMethod::Random));
    fill(&mut population, 0..25);
    for _ in 0..40 {
        let target = population.position_child(12, true);
        assert!(target == 12 || population.cell(12).connections().contains(&target));
    }
}

#[test]
fn random_policy_excludes_parent_when_disallowed() {
    let mut population = world(config_with(BirthMethod::Random));
    fill(&mut population, 0..25);
    for _ in 0..40 {
        assert_ne!(population.position_child(12, false), 12);
    }
}

#[test]
fn full_soup_random_resamples_a_disallowed_parent() {
    let mut population = world(config_with(BirthMethod::FullSoupRandom));
    fill(&mut population, [12]);
    for _ in 0..40 {
        assert_ne!(population.position_child(12, false), 12);
    }
}

#[test]
fn deme_random_stays_inside_the_parents_deme() {
    let mut config = config_with(BirthMethod::DemeRandom);
    config.world_y = 6;
    config.num_demes = 3;
    let mut population = world(config);
    // Deme 1 spans cells 10..20.
    fill(&mut population, [12]);
    for _ in 0..40 {
        let target = population.position_child(12, true);
        assert!((10..20).contains(&target));
    }
    assert_eq!(population.deme(1).birth_count(), 40);
    assert_eq!(population.deme(0).birth_count(), 0);
}

#[test]
fn local_births_count_against_the_parents_deme() {
    let mut config = config_with(BirthMethod::Age);
    config.world_y = 6;
    config.num_demes = 2;
    let mut population = world(config);
    fill(&mut population, [2]);
    population.position_child(2, true);
    assert_eq!(population.deme(0).birth_count(), 1);
}

#[test]
fn scoring_skips_empty_neighbors_when_not_preferring_them() {
    let mut config = config_with(BirthMethod::Age);
    config.prefer_empty = false;
    let mut population = world(config);
    fill(&mut population, [12, 11]);
    population
        .organism_at_mut(11)
        .expect("occupant")
        .phenotype_mut()
        .bump_age();
    // Only the parent and cell 11 are occupied; the aged neighbor wins.
    assert_eq!(population.position_child(12, true), 11);
}
