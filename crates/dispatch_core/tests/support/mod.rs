#![allow(dead_code)]

use bevy_ecs::prelude::{Entity, World};
use chrono::NaiveDate;

use dispatch_core::ecs::{
    Driver, DriverLocation, DriverStatus, Order, OrderLocations, OrderStatus,
};
use dispatch_core::geo::GeoPoint;
use dispatch_core::optimize::draft::DraftAssignment;
use dispatch_core::spatial_index::DriverSpatialIndex;

pub fn fixture_date() -> NaiveDate {
    NaiveDate::from_ymd_opt(2025, 6, 1).expect("valid date")
}

/// Spawn a Pending order with the given pickup/dropoff `(lat, lng)` pairs.
pub fn spawn_order(
    world: &mut World,
    pickup: (f64, f64),
    dropoff: (f64, f64),
    priority: u8,
) -> Entity {
    let order = Order::new(priority, fixture_date(), 0);
    world
        .spawn((
            order,
            OrderLocations {
                pickup: GeoPoint::new(pickup.0, pickup.1).expect("valid pickup"),
                dropoff: GeoPoint::new(dropoff.0, dropoff.1).expect("valid dropoff"),
            },
        ))
        .id()
}

/// Spawn an Available driver at `(lat, lng)` with the given capacity.
pub fn spawn_driver(world: &mut World, position: (f64, f64), capacity: u32) -> Entity {
    let point = GeoPoint::new(position.0, position.1).expect("valid position");
    let mut driver = Driver::new("fixture", "+49-30-000000", "cargo-bike").with_capacity(capacity);
    driver.status = DriverStatus::Available;
    let id = world
        .spawn((
            driver,
            DriverLocation {
                point,
                recorded_at_ms: 0,
                heading_deg: None,
                speed_kmh: None,
            },
        ))
        .id();
    if let Some(mut index) = world.get_resource_mut::<DriverSpatialIndex>() {
        index.upsert(id, point);
    }
    id
}

/// A hand-built draft placement for direct offer-lifecycle tests.
pub fn draft(
    order: Entity,
    driver: Entity,
    sequence: u32,
    pickup_ms: u64,
    delivery_ms: u64,
) -> DraftAssignment {
    DraftAssignment {
        order,
        driver,
        sequence,
        estimated_pickup_ms: pickup_ms,
        estimated_delivery_ms: delivery_ms,
        pickup_leg_m: 1_000.0,
        delivery_leg_m: 2_000.0,
        pickup_leg_duration_s: 90.0,
    }
}

pub fn order_status(world: &World, order: Entity) -> OrderStatus {
    world.get::<Order>(order).expect("order exists").status
}
