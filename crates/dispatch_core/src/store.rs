//! World-backed store operations: validated entity creation, delivery
//! progress transitions, and the indexed lookups the engine relies on.
//!
//! The persistent store proper is a collaborator behind these functions;
//! everything here operates on the ECS arena with `Entity` handles.

use bevy_ecs::prelude::{Entity, World};
use chrono::NaiveDate;
use log::warn;
use serde::Deserialize;

use crate::clock::ClockHandle;
use crate::distance::DistanceOracleHandle;
use crate::ecs::{
    Assignment, AssignmentStatus, Driver, DriverLocation, Order, OrderLocations, OrderStatus,
    TimeOfDayPreference, DEFAULT_MAX_CONCURRENT,
};
use crate::error::{DispatchError, DispatchResult};
use crate::geo::{GeoPoint, LatLngPayload};
use crate::matching::{enqueue_match, MatchTrigger};
use crate::offers::live_assignment_for_order;
use crate::spatial_index::DriverSpatialIndex;

/// Inbound order payload.
#[derive(Debug, Clone, Deserialize)]
pub struct NewOrder {
    pub pickup: LatLngPayload,
    pub dropoff: LatLngPayload,
    pub base_priority: u8,
    pub requested_date: NaiveDate,
    #[serde(default)]
    pub time_preference: Option<TimeOfDayPreference>,
}

/// Inbound driver payload.
#[derive(Debug, Clone, Deserialize)]
pub struct NewDriver {
    pub name: String,
    pub phone: String,
    pub vehicle_type: String,
    #[serde(default)]
    pub max_concurrent: Option<u32>,
}

/// Create a Pending order and enqueue a matching job on the bounded queue.
/// A full queue skips the job (ingestion never blocks on matching).
pub fn create_order(world: &mut World, payload: NewOrder) -> DispatchResult<Entity> {
    let pickup = GeoPoint::try_from(payload.pickup)?;
    let dropoff = GeoPoint::try_from(payload.dropoff)?;
    let now = world.resource::<ClockHandle>().now_ms();

    let mut order = Order::new(payload.base_priority, payload.requested_date, now);
    order.time_preference = payload.time_preference;
    let id = world.spawn((order, OrderLocations { pickup, dropoff })).id();

    if !enqueue_match(world, MatchTrigger::OrderCreated) {
        warn!("matching queue full; order {id:?} waits for the next cycle");
    }
    Ok(id)
}

/// Register a driver (Offline until a status update says otherwise).
pub fn register_driver(world: &mut World, payload: NewDriver) -> Entity {
    let driver = Driver::new(payload.name, payload.phone, payload.vehicle_type)
        .with_capacity(payload.max_concurrent.unwrap_or(DEFAULT_MAX_CONCURRENT));
    world.spawn(driver).id()
}

/// Record a driver's latest location and keep the spatial index in sync.
pub fn record_driver_location(
    world: &mut World,
    driver_id: Entity,
    point: LatLngPayload,
    heading_deg: Option<f64>,
    speed_kmh: Option<f64>,
) -> DispatchResult<()> {
    let point = GeoPoint::try_from(point)?;
    if world.get::<Driver>(driver_id).is_none() {
        return Err(DispatchError::InvalidState("unknown driver".into()));
    }
    let now = world.resource::<ClockHandle>().now_ms();
    world.entity_mut(driver_id).insert(DriverLocation {
        point,
        recorded_at_ms: now,
        heading_deg,
        speed_kmh,
    });
    if let Some(mut index) = world.get_resource_mut::<DriverSpatialIndex>() {
        index.upsert(driver_id, point);
    }
    Ok(())
}

/// Drivers within `radius_m` of `center`, nearest first. Uses the spatial
/// index for the candidate disk when present, then the exact Haversine
/// filter against each driver's latest location.
pub fn drivers_within(world: &mut World, center: GeoPoint, radius_m: f64) -> Vec<Entity> {
    let candidates: Vec<Entity> = match world.get_resource::<DriverSpatialIndex>() {
        Some(index) => index.candidates_within(center, radius_m),
        None => {
            let mut query = world.query::<(Entity, &Driver)>();
            let mut all: Vec<Entity> = query.iter(world).map(|(id, _)| id).collect();
            all.sort();
            all
        }
    };

    let mut hits: Vec<(u64, Entity)> = candidates
        .into_iter()
        .filter_map(|id| {
            let location = world.get::<DriverLocation>(id)?;
            let distance_m = center.haversine_m(&location.point);
            (distance_m <= radius_m).then_some((distance_m as u64, id))
        })
        .collect();
    hits.sort_unstable();
    hits.into_iter().map(|(_, id)| id).collect()
}

/// Driver marks the order picked up. Requires an Accepted assignment.
pub fn mark_picked_up(world: &mut World, order_id: Entity) -> DispatchResult<()> {
    let order = world
        .get::<Order>(order_id)
        .ok_or_else(|| DispatchError::InvalidState("unknown order".into()))?;
    if !order.status.can_transition(OrderStatus::PickedUp) {
        return Err(DispatchError::InvalidState(format!(
            "order is {:?}, cannot be picked up",
            order.status
        )));
    }
    world
        .get_mut::<Order>(order_id)
        .expect("order checked above")
        .status = OrderStatus::PickedUp;
    Ok(())
}

/// Driver completes the delivery: the order becomes Delivered and the
/// assignment Completed.
pub fn mark_delivered(world: &mut World, order_id: Entity) -> DispatchResult<()> {
    let order = world
        .get::<Order>(order_id)
        .ok_or_else(|| DispatchError::InvalidState("unknown order".into()))?;
    if !order.status.can_transition(OrderStatus::Delivered) {
        return Err(DispatchError::InvalidState(format!(
            "order is {:?}, cannot be delivered",
            order.status
        )));
    }
    let assignment_id = live_assignment_for_order(world, order_id);
    world
        .get_mut::<Order>(order_id)
        .expect("order checked above")
        .status = OrderStatus::Delivered;
    if let Some(assignment_id) = assignment_id {
        if let Some(mut assignment) = world.get_mut::<Assignment>(assignment_id) {
            assignment.status = AssignmentStatus::Completed;
        }
    }
    Ok(())
}

/// Cancel an order from any non-terminal state; a live assignment is
/// cancelled with it.
pub fn cancel_order(world: &mut World, order_id: Entity) -> DispatchResult<()> {
    let order = world
        .get::<Order>(order_id)
        .ok_or_else(|| DispatchError::InvalidState("unknown order".into()))?;
    if !order.status.can_transition(OrderStatus::Cancelled) {
        return Err(DispatchError::InvalidState(format!(
            "order is {:?}, cannot be cancelled",
            order.status
        )));
    }
    let assignment_id = live_assignment_for_order(world, order_id);
    world
        .get_mut::<Order>(order_id)
        .expect("order checked above")
        .status = OrderStatus::Cancelled;
    if let Some(assignment_id) = assignment_id {
        if let Some(mut assignment) = world.get_mut::<Assignment>(assignment_id) {
            assignment.status = AssignmentStatus::Cancelled;
        }
    }
    Ok(())
}

/// Conditional delete of expired distance-cache rows.
pub fn purge_expired_cache(world: &World) -> usize {
    world
        .get_resource::<DistanceOracleHandle>()
        .map(|oracle| oracle.purge_expired())
        .unwrap_or(0)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::ClockHandle;
    use crate::matching::MatchQueue;

    fn world() -> World {
        let mut world = World::new();
        let (clock, _) = ClockHandle::manual(1_000);
        world.insert_resource(clock);
        world.insert_resource(MatchQueue::new(4));
        world.insert_resource(DriverSpatialIndex::new());
        world
    }

    fn payload(lat: f64, lng: f64) -> LatLngPayload {
        LatLngPayload { lat, lng }
    }

    #[test]
    fn create_order_validates_and_enqueues() {
        let mut world = world();
        let order = create_order(
            &mut world,
            NewOrder {
                pickup: payload(52.52, 13.41),
                dropoff: payload(52.49, 13.37),
                base_priority: 5,
                requested_date: NaiveDate::from_ymd_opt(2025, 6, 1).unwrap(),
                time_preference: None,
            },
        )
        .unwrap();
        assert_eq!(
            world.get::<Order>(order).unwrap().status,
            OrderStatus::Pending
        );
        assert_eq!(world.resource::<MatchQueue>().len(), 1);

        let bad = create_order(
            &mut world,
            NewOrder {
                pickup: payload(99.0, 13.41),
                dropoff: payload(52.49, 13.37),
                base_priority: 5,
                requested_date: NaiveDate::from_ymd_opt(2025, 6, 1).unwrap(),
                time_preference: None,
            },
        );
        assert!(matches!(bad, Err(DispatchError::CoordinateOutOfRange(_))));
    }

    #[test]
    fn drivers_within_sorts_by_distance() {
        let mut world = world();
        let near = register_driver(
            &mut world,
            NewDriver {
                name: "near".into(),
                phone: "1".into(),
                vehicle_type: "bike".into(),
                max_concurrent: None,
            },
        );
        let far = register_driver(
            &mut world,
            NewDriver {
                name: "far".into(),
                phone: "2".into(),
                vehicle_type: "van".into(),
                max_concurrent: Some(5),
            },
        );
        record_driver_location(&mut world, near, payload(52.521, 13.411), None, None).unwrap();
        record_driver_location(&mut world, far, payload(52.55, 13.45), None, None).unwrap();

        let center = GeoPoint::new(52.52, 13.41).unwrap();
        let within = drivers_within(&mut world, center, 10_000.0);
        assert_eq!(within, vec![near, far]);
        let tight = drivers_within(&mut world, center, 500.0);
        assert_eq!(tight, vec![near]);
    }

    #[test]
    fn cancel_is_reachable_from_pending_but_not_delivered() {
        let mut world = world();
        let order = create_order(
            &mut world,
            NewOrder {
                pickup: payload(52.52, 13.41),
                dropoff: payload(52.49, 13.37),
                base_priority: 5,
                requested_date: NaiveDate::from_ymd_opt(2025, 6, 1).unwrap(),
                time_preference: None,
            },
        )
        .unwrap();
        cancel_order(&mut world, order).unwrap();
        assert_eq!(
            world.get::<Order>(order).unwrap().status,
            OrderStatus::Cancelled
        );
        // Terminal: cancelling again fails.
        assert!(cancel_order(&mut world, order).is_err());
    }
}
