//! Immutable snapshots of matchable state.
//!
//! The optimiser stages (regions, savings, ALNS, drafts) are pure functions;
//! they never touch the `World`. A matching round extracts these snapshots
//! once, fans the work out across the rayon pool, and applies the winning
//! draft back single-threaded.

use std::collections::{HashMap, HashSet};

use bevy_ecs::prelude::{Entity, World};
use log::warn;

use crate::ecs::{Assignment, Driver, DriverLocation, Order, OrderLocations, OrderStatus};
use crate::geo::GeoPoint;

/// A pending order as the optimiser sees it.
#[derive(Debug, Clone)]
pub struct OrderSnapshot {
    pub id: Entity,
    pub pickup: GeoPoint,
    pub dropoff: GeoPoint,
    pub effective_priority: f64,
    pub created_at_ms: u64,
    pub rejected_drivers: HashSet<Entity>,
}

impl OrderSnapshot {
    pub fn accepts_driver(&self, driver: Entity) -> bool {
        !self.rejected_drivers.contains(&driver)
    }
}

/// A matchable driver as the optimiser sees it.
#[derive(Debug, Clone)]
pub struct DriverSnapshot {
    pub id: Entity,
    pub position: GeoPoint,
    pub capacity: u32,
}

/// All Pending orders, sorted by (effective priority desc, createdAt asc,
/// id) — the order in which capacity is handed out.
pub fn pending_order_snapshots(world: &mut World) -> Vec<OrderSnapshot> {
    let mut query = world.query::<(Entity, &Order, &OrderLocations)>();
    let mut snapshots: Vec<OrderSnapshot> = query
        .iter(world)
        .filter(|(_, order, _)| order.status == OrderStatus::Pending)
        .map(|(id, order, locations)| OrderSnapshot {
            id,
            pickup: locations.pickup,
            dropoff: locations.dropoff,
            effective_priority: order.effective_priority(),
            created_at_ms: order.created_at_ms,
            rejected_drivers: order.rejected_drivers.clone(),
        })
        .collect();
    snapshots.sort_by(|a, b| {
        b.effective_priority
            .partial_cmp(&a.effective_priority)
            .unwrap_or(std::cmp::Ordering::Equal)
            .then(a.created_at_ms.cmp(&b.created_at_ms))
            .then(a.id.cmp(&b.id))
    });
    snapshots
}

/// All matchable drivers (Available or EnRoutePickup) with a known
/// location, sorted by id. Capacity is what remains after the driver's
/// live assignments; fully loaded drivers are excluded. Drivers without a
/// reported location are skipped.
pub fn matchable_driver_snapshots(world: &mut World) -> Vec<DriverSnapshot> {
    let live_load: HashMap<Entity, u32> = {
        let mut query = world.query::<&Assignment>();
        let mut load: HashMap<Entity, u32> = HashMap::new();
        for assignment in query.iter(world) {
            if !assignment.status.is_terminal() {
                *load.entry(assignment.driver).or_default() += 1;
            }
        }
        load
    };

    let mut query = world.query::<(Entity, &Driver, Option<&DriverLocation>)>();
    let mut snapshots: Vec<DriverSnapshot> = query
        .iter(world)
        .filter(|(_, driver, _)| driver.status.is_matchable())
        .filter_map(|(id, driver, location)| match location {
            Some(location) => {
                let capacity = driver
                    .max_concurrent
                    .max(1)
                    .saturating_sub(live_load.get(&id).copied().unwrap_or(0));
                (capacity > 0).then_some(DriverSnapshot {
                    id,
                    position: location.point,
                    capacity,
                })
            }
            None => {
                warn!("driver {:?} is matchable but has no reported location", id);
                None
            }
        })
        .collect();
    snapshots.sort_by_key(|d| d.id);
    snapshots
}
