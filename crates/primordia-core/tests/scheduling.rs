mod common;

use common::{CloneHardwareFactory, genome, seeded};
use primordia_core::{
    Population, PopulationConfig, SlicingMethod, WorldGeometry,
};

fn prob_config() -> PopulationConfig {
    seeded(
        PopulationConfig {
            world_x: 4,
            world_y: 4,
            geometry: WorldGeometry::Torus,
            slicing_method: SlicingMethod::ProbMerit,
            ..PopulationConfig::default()
        },
        1,
    )
}

#[test]
fn sole_organism_monopolizes_the_prob_scheduler() {
    let factory = Box::new(CloneHardwareFactory {
        steps_per_divide: u64::MAX,
    });
    let mut population = Population::new(prob_config(), factory).expect("world");
    population.inject(&genome("abcdefgh"), Some(0), Some(1.0), 0, 0.0);

    for _ in 0..100 {
        let cell_id = population.schedule_organism().expect("one occupied cell");
        assert_eq!(cell_id, 0);
        population.process_step(1.0, cell_id);
    }
    assert_eq!(population.stats().executed(), 100);
}

#[test]
fn selection_splits_after_the_first_birth() {
    // One organism of merit 1 divides once; the two equal-merit cells then
    // share the selector roughly half-and-half.
    let factory = Box::new(CloneHardwareFactory { steps_per_divide: 10 });
    let mut population = Population::new(prob_config(), factory).expect("world");
    population.inject(&genome("abcdefgh"), Some(0), Some(1.0), 0, 0.0);

    let mut picks_before_birth = 0;
    while population.num_organisms() == 1 {
        let cell_id = population.schedule_organism().expect("occupied");
        assert_eq!(cell_id, 0, "the only weighted cell wins every draw");
        population.process_step(1.0, cell_id);
        picks_before_birth += 1;
        assert!(picks_before_birth <= 10, "divide fires on the tenth step");
    }
    assert_eq!(population.num_organisms(), 2);

    let occupied: Vec<usize> = (0..population.num_cells())
        .filter(|&cell_id| population.cell(cell_id).is_occupied())
        .collect();
    assert_eq!(occupied.len(), 2);

    let mut counts = [0u32; 2];
    for _ in 0..4_000 {
        let cell_id = population.schedule_organism().expect("occupied");
        let slot = occupied
            .iter()
            .position(|&c| c == cell_id)
            .expect("only occupied cells are schedulable");
        counts[slot] += 1;
    }
    let share = f64::from(counts[0]) / 4_000.0;
    assert!((share - 0.5).abs() < 0.05, "share was {share}");
}

#[test]
fn integrated_scheduler_drives_a_world_deterministically() {
    let config = seeded(
        PopulationConfig {
            world_x: 4,
            world_y: 4,
            geometry: WorldGeometry::Torus,
            slicing_method: SlicingMethod::IntegratedMerit,
            ..PopulationConfig::default()
        },
        9,
    );
    let factory = || Box::new(CloneHardwareFactory { steps_per_divide: 5 });
    let mut population_a = Population::new(config.clone(), factory()).expect("world a");
    let mut population_b = Population::new(config, factory()).expect("world b");

    for population in [&mut population_a, &mut population_b] {
        population.inject(&genome("abcdefgh"), Some(0), Some(1.0), 0, 0.0);
        for _ in 0..200 {
            if let Some(cell_id) = population.schedule_organism() {
                population.process_step(0.5, cell_id);
            }
        }
    }

    assert_eq!(population_a.num_organisms(), population_b.num_organisms());
    for cell_id in 0..population_a.num_cells() {
        assert_eq!(
            population_a.cell(cell_id).is_occupied(),
            population_b.cell(cell_id).is_occupied(),
            "same seed, same occupancy at cell {cell_id}"
        );
    }
    assert!(population_a.ok());
}

#[test]
fn constant_scheduler_round_robins_the_occupied_cells() {
    let config = seeded(
        PopulationConfig {
            world_x: 4,
            world_y: 4,
            geometry: WorldGeometry::Torus,
            slicing_method: SlicingMethod::Constant,
            ..PopulationConfig::default()
        },
        2,
    );
    let factory = Box::new(CloneHardwareFactory {
        steps_per_divide: u64::MAX,
    });
    let mut population = Population::new(config, factory).expect("world");
    for cell_id in [3, 7, 11] {
        population.inject(&genome("abcdefgh"), Some(cell_id), Some(1.0), 0, 0.0);
    }

    let picks: Vec<usize> = (0..6)
        .map(|_| population.schedule_organism().expect("occupied"))
        .collect();
    assert_eq!(picks, vec![3, 7, 11, 3, 7, 11]);
}

#[test]
fn schedule_change_list_batches_adjusts() {
    let mut population = Population::new(
        prob_config(),
        Box::new(CloneHardwareFactory {
            steps_per_divide: u64::MAX,
        }),
    )
    .expect("world");
    population.track_schedule_changes(true);
    population.take_schedule_changes();

    population.inject(&genome("abcdefgh"), Some(6), Some(1.0), 0, 0.0);
    population.kill_organism(6);
    let changes = population.take_schedule_changes();
    assert!(changes.contains(&6));
    assert!(population.take_schedule_changes().is_empty());
}
