mod common;

use common::{genome, seeded, world};
use primordia_core::{PopulationConfig, WorldGeometry};

fn market_config() -> PopulationConfig {
    seeded(
        PopulationConfig {
            world_x: 4,
            world_y: 4,
            geometry: WorldGeometry::Torus,
            market_size: 16,
            ..PopulationConfig::default()
        },
        3,
    )
}

#[test]
fn sale_completes_and_credits_the_seller() {
    let mut population = world(market_config());
    population.inject(&genome("abcdefgh"), Some(5), Some(5.0), 0, 0.0);
    population.inject(&genome("abcdefgh"), Some(9), Some(20.0), 0, 0.0);

    assert!(population.add_sell_value(42, 3, 10, 5));
    assert_eq!(population.market().total_len(), 1);

    let value = population.buy_value(3, 10, 9);
    assert_eq!(value, 42);
    assert!(population.market().is_empty());
    let seller = population.organism_at(5).expect("seller");
    assert!((seller.phenotype().merit() - 15.0).abs() < f64::EPSILON);
    assert!(seller.sold_items().is_empty());

    // Already consumed: the seller's later death changes nothing.
    population.kill_organism(5);
    assert!(population.market().is_empty());
}

#[test]
fn buy_refuses_an_overpriced_head() {
    let mut population = world(market_config());
    population.inject(&genome("abcdefgh"), Some(5), Some(5.0), 0, 0.0);
    population.inject(&genome("abcdefgh"), Some(9), Some(50.0), 0, 0.0);

    assert!(population.add_sell_value(7, 2, 30, 5));
    assert_eq!(population.buy_value(2, 10, 9), 0);
    assert_eq!(population.market().total_len(), 1, "market unchanged");
    let seller = population.organism_at(5).expect("seller");
    assert!((seller.phenotype().merit() - 5.0).abs() < f64::EPSILON);
}

#[test]
fn buy_requires_buyer_merit_to_cover_the_bid() {
    let mut population = world(market_config());
    population.inject(&genome("abcdefgh"), Some(5), Some(5.0), 0, 0.0);
    population.inject(&genome("abcdefgh"), Some(9), Some(3.0), 0, 0.0);

    assert!(population.add_sell_value(7, 2, 1, 5));
    assert_eq!(population.buy_value(2, 4, 9), 0, "merit 3 cannot bid 4");
    assert_eq!(population.market().total_len(), 1);
}

#[test]
fn empty_list_buys_return_zero() {
    let mut population = world(market_config());
    population.inject(&genome("abcdefgh"), Some(9), Some(20.0), 0, 0.0);
    assert_eq!(population.buy_value(6, 10, 9), 0);
}

#[test]
fn seller_death_revokes_every_posting() {
    let mut population = world(market_config());
    population.inject(&genome("abcdefgh"), Some(5), Some(5.0), 0, 0.0);
    population.inject(&genome("abcdefgh"), Some(9), Some(100.0), 0, 0.0);

    assert!(population.add_sell_value(1, 2, 1, 5));
    assert!(population.add_sell_value(2, 2, 1, 5));
    assert!(population.add_sell_value(3, 7, 1, 5));
    assert_eq!(population.market().total_len(), 3);

    population.kill_organism(5);
    assert!(population.market().is_empty());
    assert_eq!(population.buy_value(2, 10, 9), 0);
    assert_eq!(population.buy_value(7, 10, 9), 0);
}

#[test]
fn postings_and_sold_lists_stay_linked() {
    let mut population = world(market_config());
    population.inject(&genome("abcdefgh"), Some(5), Some(5.0), 0, 0.0);
    assert!(population.add_sell_value(1, 2, 1, 5));
    assert!(population.add_sell_value(2, 3, 1, 5));

    let seller = population.organism_at(5).expect("seller");
    assert_eq!(seller.sold_items().len(), 2);
    for &sale in seller.sold_items() {
        assert!(population.market().contains(sale));
    }
}

#[test]
fn out_of_range_label_posts_fail_without_modulo() {
    let mut population = world(market_config());
    population.inject(&genome("abcdefgh"), Some(5), Some(5.0), 0, 0.0);
    assert!(!population.add_sell_value(1, 999, 1, 5));
    assert!(population.market().is_empty());

    let mut config = market_config();
    config.market_label_modulo = true;
    let mut population = world(config);
    population.inject(&genome("abcdefgh"), Some(5), Some(5.0), 0, 0.0);
    population.inject(&genome("abcdefgh"), Some(9), Some(20.0), 0, 0.0);
    assert!(population.add_sell_value(1, 999, 1, 5));
    // 999 % 16 == 7
    assert_eq!(population.buy_value(7, 5, 9), 1);
}
