//! Run a closed-simulation matching cycle over a seeded scenario and print
//! the resulting routes.
//!
//! Run with: cargo run -p dispatch_core --example closed_run

use dispatch_core::config::SimulationConfig;
use dispatch_core::fixtures::{build_world, spawn_scenario, ScenarioParams};
use dispatch_core::matching::{run_cycle, SimulatedResponder};
use dispatch_core::telemetry::DispatchTelemetry;

fn main() {
    const NUM_ORDERS: usize = 40;
    const NUM_DRIVERS: usize = 8;

    let (mut world, _clock) = build_world(0);
    let params = ScenarioParams::default()
        .with_seed(123)
        .with_population(NUM_ORDERS, NUM_DRIVERS);
    spawn_scenario(&mut world, &params);

    let mut responder = SimulatedResponder::new(SimulationConfig {
        accept_probability: 0.8,
        guarantee_one_acceptance: true,
        seed: 123,
    });
    let summary = run_cycle(&mut world, &mut responder, true).expect("matching cycle");

    println!(
        "--- Closed run ({NUM_ORDERS} orders, {NUM_DRIVERS} drivers, seed 123) ---"
    );
    println!("Rounds: {}", summary.rounds_run);
    println!(
        "Offers: {} created, {} accepted, {} rejected, {} expired",
        summary.offers_created, summary.accepted, summary.rejected, summary.expired
    );
    println!(
        "Total distance: {:.1} km over {} route(s)",
        summary.total_distance_m / 1000.0,
        summary.routes.len()
    );
    println!("Still pending: {}", summary.remaining_pending.len());

    for (i, route) in summary.routes.iter().enumerate() {
        println!(
            "  route {}  driver={}  orders={}  {:.1} km  {:.0} min",
            i + 1,
            route.driver_id,
            route.order_count,
            route.distance_m / 1000.0,
            route.duration_s / 60.0,
        );
    }

    let telemetry = world.resource::<DispatchTelemetry>();
    println!(
        "Telemetry: {} offers created, {} accepted, {} rejected, {} expired across {} round(s)",
        telemetry.offers_created,
        telemetry.offers_accepted,
        telemetry.offers_rejected,
        telemetry.offers_expired,
        telemetry.rounds_run,
    );
}
