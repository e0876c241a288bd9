//! Performance benchmarks for dispatch_core using Criterion.rs.

use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion};

use dispatch_core::config::SimulationConfig;
use dispatch_core::fixtures::{build_world, spawn_scenario, ScenarioParams};
use dispatch_core::matching::{run_cycle, SimulatedResponder};
use dispatch_core::optimize::{savings, MatchContext};
use dispatch_core::snapshots::{matchable_driver_snapshots, pending_order_snapshots};

fn bench_matching_cycle(c: &mut Criterion) {
    let scenarios = vec![("small", 20, 5), ("medium", 60, 12), ("large", 150, 25)];

    let mut group = c.benchmark_group("matching_cycle");
    group.sample_size(10);
    for (name, orders, drivers) in scenarios {
        group.bench_with_input(
            BenchmarkId::from_parameter(name),
            &(orders, drivers),
            |b, &(orders, drivers)| {
                b.iter(|| {
                    let (mut world, _clock) = build_world(0);
                    let params = ScenarioParams::default()
                        .with_seed(42)
                        .with_population(orders, drivers);
                    spawn_scenario(&mut world, &params);
                    let mut responder = SimulatedResponder::new(SimulationConfig {
                        seed: 42,
                        ..Default::default()
                    });
                    black_box(run_cycle(&mut world, &mut responder, false).expect("cycle"));
                });
            },
        );
    }
    group.finish();
}

fn bench_savings_construction(c: &mut Criterion) {
    let (mut world, _clock) = build_world(0);
    let params = ScenarioParams::default()
        .with_seed(7)
        .with_population(80, 15);
    spawn_scenario(&mut world, &params);

    let orders = pending_order_snapshots(&mut world);
    let drivers = matchable_driver_snapshots(&mut world);
    let oracle = world
        .resource::<dispatch_core::distance::DistanceOracleHandle>()
        .0
        .clone();
    let route_config = dispatch_core::config::RouteConfig::default();

    c.bench_function("savings_80_orders_15_drivers", |b| {
        b.iter(|| {
            let ctx = MatchContext {
                orders: &orders,
                oracle: oracle.as_ref(),
                route_config: &route_config,
                depart_at_ms: 0,
            };
            black_box(savings::construct(&ctx, &drivers).expect("solution"));
        });
    });
}

criterion_group!(benches, bench_matching_cycle, bench_savings_construction);
criterion_main!(benches);
