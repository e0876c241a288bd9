//! Larger closed-simulation runs. Slow; run with `cargo test -- --ignored`.

use dispatch_core::config::SimulationConfig;
use dispatch_core::ecs::{Assignment, Driver, Order, OrderStatus};
use dispatch_core::fixtures::{build_world, spawn_scenario, ScenarioParams};
use dispatch_core::matching::{run_cycle, SimulatedResponder};

#[test]
#[ignore]
fn hundred_orders_twenty_drivers_closed_run() {
    let (mut world, _clock) = build_world(1_000);
    let params = ScenarioParams::default()
        .with_seed(2_024)
        .with_population(100, 20);
    spawn_scenario(&mut world, &params);

    let mut responder = SimulatedResponder::new(SimulationConfig {
        accept_probability: 0.8,
        guarantee_one_acceptance: true,
        seed: 7,
    });
    let summary = run_cycle(&mut world, &mut responder, false).expect("cycle");

    assert!(summary.accepted > 0, "a closed run must confirm something");
    assert!(summary.rounds_run >= 1);

    // Hard invariants hold at any scale.
    let assignments: Vec<Assignment> = {
        let mut query = world.query::<&Assignment>();
        query.iter(&world).cloned().collect()
    };
    let mut per_driver: std::collections::HashMap<_, u32> = std::collections::HashMap::new();
    for assignment in &assignments {
        if assignment.status.is_terminal() {
            continue;
        }
        assert!(
            assignment.estimated_pickup_ms < assignment.estimated_delivery_ms,
            "pickup must precede delivery"
        );
        let order = world.get::<Order>(assignment.order).unwrap();
        assert!(
            !order.rejected_drivers.contains(&assignment.driver),
            "blacklisted pairing survived"
        );
        *per_driver.entry(assignment.driver).or_default() += 1;
    }
    for (driver, live) in per_driver {
        let cap = world.get::<Driver>(driver).unwrap().max_concurrent;
        assert!(live <= cap, "driver {driver:?} carries {live} > cap {cap}");
    }

    // Every order landed in a coherent state.
    let mut orders = world.query::<&Order>();
    for order in orders.iter(&world) {
        assert!(matches!(
            order.status,
            OrderStatus::Assigned | OrderStatus::Pending | OrderStatus::Offered
        ));
    }
}
