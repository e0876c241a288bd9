//! Seeded fixture scenarios: a fully provisioned world plus reproducible
//! order/driver populations, shared by the integration tests, the load
//! tests and the CLI entry points.

use std::sync::Arc;

use bevy_ecs::prelude::{Entity, World};
use chrono::NaiveDate;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use serde::{Deserialize, Serialize};

use crate::clock::{ClockHandle, ManualClock};
use crate::config::{
    AlnsConfig, DraftConfig, MatchingConfig, OfferConfig, OracleConfig, RegionConfig, RouteConfig,
    SimulationConfig,
};
use crate::distance::{DistanceOracle, DistanceOracleHandle};
use crate::ecs::{Driver, DriverLocation, DriverStatus, Order, OrderLocations};
use crate::geo::GeoPoint;
use crate::matching::MatchQueue;
use crate::optimize::draft::DraftMemory;
use crate::spatial_index::DriverSpatialIndex;
use crate::telemetry::DispatchTelemetry;
use crate::timewindow::{SegmentObservations, TimeWindowOracleHandle};

/// Default bounding box: Berlin, Germany (approx).
const DEFAULT_LAT_MIN: f64 = 52.34;
const DEFAULT_LAT_MAX: f64 = 52.68;
const DEFAULT_LNG_MIN: f64 = 13.08;
const DEFAULT_LNG_MAX: f64 = 13.76;

/// Reproducible scenario parameters.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScenarioParams {
    pub orders: usize,
    pub drivers: usize,
    pub driver_capacity: u32,
    pub seed: u64,
    pub lat_min: f64,
    pub lat_max: f64,
    pub lng_min: f64,
    pub lng_max: f64,
}

impl Default for ScenarioParams {
    fn default() -> Self {
        Self {
            orders: 20,
            drivers: 5,
            driver_capacity: 3,
            seed: 42,
            lat_min: DEFAULT_LAT_MIN,
            lat_max: DEFAULT_LAT_MAX,
            lng_min: DEFAULT_LNG_MIN,
            lng_max: DEFAULT_LNG_MAX,
        }
    }
}

impl ScenarioParams {
    pub fn with_seed(mut self, seed: u64) -> Self {
        self.seed = seed;
        self
    }

    pub fn with_population(mut self, orders: usize, drivers: usize) -> Self {
        self.orders = orders;
        self.drivers = drivers;
        self
    }
}

/// Entities spawned by [`spawn_scenario`].
#[derive(Debug, Clone, Default)]
pub struct FixtureEntities {
    pub orders: Vec<Entity>,
    pub drivers: Vec<Entity>,
}

/// A world with every engine resource registered: manual clock, straight-line
/// distance oracle, default configs, draft memory, telemetry, match queue,
/// spatial index and the heuristic time-window oracle. Returns the manual
/// clock's control side for tests that need to advance time.
pub fn build_world(start_ms: u64) -> (World, Arc<ManualClock>) {
    let mut world = World::new();
    let (clock, control) = ClockHandle::manual(start_ms);
    let oracle = DistanceOracle::haversine(control.clone(), OracleConfig::default());

    world.insert_resource(clock);
    world.insert_resource(DistanceOracleHandle::new(oracle));
    world.insert_resource(OracleConfig::default());
    world.insert_resource(RegionConfig::default());
    world.insert_resource(RouteConfig::default());
    world.insert_resource(AlnsConfig::default());
    world.insert_resource(DraftConfig::default());
    world.insert_resource(OfferConfig::default());
    world.insert_resource(MatchingConfig::default());
    world.insert_resource(SimulationConfig::default());
    world.insert_resource(DraftMemory::default());
    world.insert_resource(DispatchTelemetry::default());
    world.insert_resource(MatchQueue::default());
    world.insert_resource(DriverSpatialIndex::new());
    world.insert_resource(SegmentObservations::default());
    world.insert_resource(TimeWindowOracleHandle::heuristic());
    (world, control)
}

/// Populate a world with a seeded random population of Pending orders and
/// Available drivers inside the scenario bounding box.
pub fn spawn_scenario(world: &mut World, params: &ScenarioParams) -> FixtureEntities {
    let mut rng = StdRng::seed_from_u64(params.seed);
    let now = world.resource::<ClockHandle>().now_ms();
    let requested_date = NaiveDate::from_ymd_opt(2025, 6, 1).expect("valid fixture date");
    let mut entities = FixtureEntities::default();

    let random_point = |rng: &mut StdRng| -> GeoPoint {
        let lat = rng.gen_range(params.lat_min..=params.lat_max);
        let lng = rng.gen_range(params.lng_min..=params.lng_max);
        GeoPoint::new(lat, lng).expect("bbox is inside WGS-84")
    };

    for i in 0..params.orders {
        let pickup = random_point(&mut rng);
        let dropoff = random_point(&mut rng);
        let priority = rng.gen_range(1..=10);
        let order = Order::new(priority, requested_date, now + i as u64);
        let id = world.spawn((order, OrderLocations { pickup, dropoff })).id();
        entities.orders.push(id);
    }

    for i in 0..params.drivers {
        let position = random_point(&mut rng);
        let mut driver = Driver::new(
            format!("driver-{i}"),
            format!("+49-30-{:06}", rng.gen_range(0..1_000_000)),
            "cargo-bike",
        )
        .with_capacity(params.driver_capacity);
        driver.status = DriverStatus::Available;
        let id = world
            .spawn((
                driver,
                DriverLocation {
                    point: position,
                    recorded_at_ms: now,
                    heading_deg: None,
                    speed_kmh: None,
                },
            ))
            .id();
        if let Some(mut index) = world.get_resource_mut::<DriverSpatialIndex>() {
            index.upsert(id, position);
        }
        entities.drivers.push(id);
    }

    entities
}
