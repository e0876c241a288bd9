//! Offer lifecycle: the Offered→Accepted/Rejected/Expired state machine.
//!
//! ```text
//!            create_offered              accept
//!   (Pending) ───────────► (Offered) ────────► (Accepted) ─► … ─► (Completed)
//!       ▲                   │  │
//!       │         reject ───┘  │ expire
//!       │         (boost)      ▼
//!       └──────────────────(Expired, treated as reject)
//! ```
//!
//! All mutations run on `&mut World`, so the offer insert and the order
//! status flip are atomic with respect to any reader, and accept/reject on
//! one assignment are serialised: of two concurrent calls exactly one wins
//! and the loser sees `InvalidState`.

use bevy_ecs::prelude::{Entity, World};
use log::{debug, warn};
use serde::Serialize;

use crate::clock::ClockHandle;
use crate::config::{OfferConfig, RouteConfig};
use crate::distance::DistanceOracleHandle;
use crate::ecs::{
    Assignment, AssignmentStatus, Driver, DriverLocation, DriverStatus, Order, OrderLocations,
    OrderStatus, TimeWindow,
};
use crate::error::{DispatchError, DispatchResult};
use crate::geo::LatLngPayload;
use crate::matching::{enqueue_match, MatchTrigger};
use crate::optimize::draft::DraftAssignment;
use crate::routes::{RouteBuilder, StopKind};
use crate::snapshots::OrderSnapshot;
use crate::telemetry::DispatchTelemetry;
use crate::timewindow::{SegmentObservations, TimeWindowOracleHandle};

/// Rejection reason recorded by the expiry sweep.
pub const EXPIRED_REASON: &str = "expired";

/// An entry in a driver's offer inbox.
#[derive(Debug, Clone, Serialize)]
pub struct OfferView {
    pub assignment_id: u64,
    pub order_id: u64,
    pub sequence: u32,
    pub estimated_pickup_ms: u64,
    pub estimated_delivery_ms: u64,
    pub expires_at_ms: u64,
    pub round: u32,
    pub time_window: Option<TimeWindow>,
}

/// One stop of a driver's accepted route, with cumulative progress.
#[derive(Debug, Clone, Serialize)]
pub struct RouteStopView {
    pub order_id: u64,
    pub kind: &'static str,
    pub location: LatLngPayload,
    pub cumulative_distance_m: f64,
    pub cumulative_duration_s: f64,
    pub eta_ms: u64,
}

/// A driver's currently accepted route.
#[derive(Debug, Clone, Serialize)]
pub struct RouteView {
    pub driver_id: u64,
    pub stops: Vec<RouteStopView>,
    pub total_distance_m: f64,
    pub total_duration_s: f64,
}

fn now_ms(world: &World) -> u64 {
    world.resource::<ClockHandle>().now_ms()
}

fn bump_telemetry(world: &mut World, update: impl FnOnce(&mut DispatchTelemetry)) {
    if let Some(mut telemetry) = world.get_resource_mut::<DispatchTelemetry>() {
        update(&mut telemetry);
    }
}

/// Time window for an offer, when a time-window oracle is registered.
fn window_for_offer(world: &World, draft: &DraftAssignment) -> Option<TimeWindow> {
    let oracle = world.get_resource::<TimeWindowOracleHandle>()?.clone();
    let pickup = world.get::<OrderLocations>(draft.order)?.pickup;
    let samples = match (
        world.get_resource::<SegmentObservations>(),
        world.get::<DriverLocation>(draft.driver),
    ) {
        (Some(observations), Some(location)) => {
            observations.samples(location.point, pickup).to_vec()
        }
        _ => Vec::new(),
    };
    Some(oracle.window(
        draft.estimated_pickup_ms,
        draft.pickup_leg_duration_s,
        &samples,
    ))
}

/// Insert an Offered assignment and flip the order to Offered, atomically.
///
/// Preconditions: the order is Pending, the driver is not blacklisted by
/// the order, and no live assignment exists for the order.
pub fn create_offered(
    world: &mut World,
    draft: &DraftAssignment,
    round: u32,
) -> DispatchResult<Entity> {
    let now = now_ms(world);
    let ttl = world
        .get_resource::<OfferConfig>()
        .copied()
        .unwrap_or_default()
        .offer_ttl_ms;

    let order = world
        .get::<Order>(draft.order)
        .ok_or_else(|| DispatchError::InvalidState("unknown order".into()))?;
    if order.status != OrderStatus::Pending {
        return Err(DispatchError::InvalidState(format!(
            "order must be Pending to receive an offer, was {:?}",
            order.status
        )));
    }
    if order.has_rejected(draft.driver) {
        return Err(DispatchError::InvalidState(
            "driver has already rejected this order".into(),
        ));
    }
    if world.get::<Driver>(draft.driver).is_none() {
        return Err(DispatchError::InvalidState("unknown driver".into()));
    }
    if live_assignment_for_order(world, draft.order).is_some() {
        return Err(DispatchError::AlreadyAssigned);
    }

    let time_window = window_for_offer(world, draft);

    // Checks passed: both writes happen back to back under the exclusive
    // world borrow.
    let assignment = world
        .spawn(Assignment {
            order: draft.order,
            driver: draft.driver,
            sequence: draft.sequence,
            estimated_pickup_ms: draft.estimated_pickup_ms,
            estimated_delivery_ms: draft.estimated_delivery_ms,
            status: AssignmentStatus::Offered,
            offer_expires_at_ms: now + ttl,
            offer_round: round,
            responded_at_ms: None,
            rejection_reason: None,
            time_window,
        })
        .id();
    world
        .get_mut::<Order>(draft.order)
        .expect("order checked above")
        .status = OrderStatus::Offered;

    bump_telemetry(world, |t| t.offers_created += 1);
    debug!(
        "offer {:?} created (order {:?} -> driver {:?}, round {round})",
        assignment, draft.order, draft.driver
    );
    Ok(assignment)
}

/// Driver accepts an offer. Fails `Expired` past the expiry, `InvalidState`
/// for anything not currently Offered (accepting twice is a no-op error,
/// not a double accept).
pub fn accept(world: &mut World, assignment_id: Entity) -> DispatchResult<()> {
    let now = now_ms(world);
    let assignment = world
        .get::<Assignment>(assignment_id)
        .ok_or_else(|| DispatchError::InvalidState("unknown assignment".into()))?;
    if assignment.status != AssignmentStatus::Offered {
        return Err(DispatchError::InvalidState(format!(
            "assignment is {:?}, not Offered",
            assignment.status
        )));
    }
    if now > assignment.offer_expires_at_ms {
        return Err(DispatchError::Expired);
    }
    let (order_id, driver_id) = (assignment.order, assignment.driver);

    let mut assignment = world
        .get_mut::<Assignment>(assignment_id)
        .expect("assignment checked above");
    assignment.status = AssignmentStatus::Accepted;
    assignment.responded_at_ms = Some(now);

    if let Some(mut order) = world.get_mut::<Order>(order_id) {
        order.status = OrderStatus::Assigned;
    }
    if let Some(mut driver) = world.get_mut::<Driver>(driver_id) {
        if driver.status == DriverStatus::Available {
            driver.status = DriverStatus::EnRoutePickup;
        }
    }

    bump_telemetry(world, |t| t.offers_accepted += 1);
    Ok(())
}

/// Driver rejects an offer: blacklist the driver on the order, boost its
/// priority, return it to Pending, and enqueue a fresh matching cycle.
pub fn reject(
    world: &mut World,
    assignment_id: Entity,
    reason: Option<String>,
) -> DispatchResult<()> {
    let now = now_ms(world);
    let assignment = world
        .get::<Assignment>(assignment_id)
        .ok_or_else(|| DispatchError::InvalidState("unknown assignment".into()))?;
    if assignment.status != AssignmentStatus::Offered {
        return Err(DispatchError::InvalidState(format!(
            "assignment is {:?}, not Offered",
            assignment.status
        )));
    }
    let (order_id, driver_id) = (assignment.order, assignment.driver);

    let mut assignment = world
        .get_mut::<Assignment>(assignment_id)
        .expect("assignment checked above");
    assignment.status = AssignmentStatus::Rejected;
    assignment.responded_at_ms = Some(now);
    assignment.rejection_reason = reason;

    if let Some(mut order) = world.get_mut::<Order>(order_id) {
        order.record_rejection(driver_id);
        order.status = OrderStatus::Pending;
    }

    bump_telemetry(world, |t| t.offers_rejected += 1);
    if !enqueue_match(world, MatchTrigger::OfferRejected) {
        warn!("matching queue full; rejection of {assignment_id:?} waits for the next cycle");
    }
    Ok(())
}

/// Expiry sweep: every Offered assignment past its expiry becomes Expired
/// and is treated as a reject (blacklist + boost) without the synchronous
/// matching cycle. Idempotent; safe to cancel and rerun.
pub fn expire_stale(world: &mut World) -> Vec<Entity> {
    let now = now_ms(world);
    let stale: Vec<(Entity, Entity, Entity)> = {
        let mut query = world.query::<(Entity, &Assignment)>();
        let mut rows: Vec<_> = query
            .iter(world)
            .filter(|(_, a)| {
                a.status == AssignmentStatus::Offered && a.offer_expires_at_ms < now
            })
            .map(|(id, a)| (id, a.order, a.driver))
            .collect();
        rows.sort_by_key(|(id, _, _)| *id);
        rows
    };

    for &(assignment_id, order_id, driver_id) in &stale {
        let mut assignment = world
            .get_mut::<Assignment>(assignment_id)
            .expect("assignment collected above");
        assignment.status = AssignmentStatus::Expired;
        assignment.responded_at_ms = Some(now);
        assignment.rejection_reason = Some(EXPIRED_REASON.into());

        if let Some(mut order) = world.get_mut::<Order>(order_id) {
            order.record_rejection(driver_id);
            order.status = OrderStatus::Pending;
        }
        bump_telemetry(world, |t| t.offers_expired += 1);
    }
    stale.iter().map(|&(id, _, _)| id).collect()
}

/// Re-offer an order whose latest assignment was Rejected (or Expired) by
/// updating the existing row in place: new driver, new timings, round + 1,
/// expiry reset. No duplicate row is created.
pub fn rebuild_rejected(
    world: &mut World,
    assignment_id: Entity,
    draft: &DraftAssignment,
) -> DispatchResult<()> {
    let now = now_ms(world);
    let ttl = world
        .get_resource::<OfferConfig>()
        .copied()
        .unwrap_or_default()
        .offer_ttl_ms;

    let assignment = world
        .get::<Assignment>(assignment_id)
        .ok_or_else(|| DispatchError::InvalidState("unknown assignment".into()))?;
    if !matches!(
        assignment.status,
        AssignmentStatus::Rejected | AssignmentStatus::Expired
    ) {
        return Err(DispatchError::InvalidState(format!(
            "only Rejected or Expired assignments can be rebuilt, was {:?}",
            assignment.status
        )));
    }
    let order_id = assignment.order;
    let order = world
        .get::<Order>(order_id)
        .ok_or_else(|| DispatchError::InvalidState("unknown order".into()))?;
    if order.status != OrderStatus::Pending {
        return Err(DispatchError::InvalidState(format!(
            "order must be Pending to re-offer, was {:?}",
            order.status
        )));
    }
    if order.has_rejected(draft.driver) {
        return Err(DispatchError::InvalidState(
            "driver has already rejected this order".into(),
        ));
    }

    let time_window = window_for_offer(world, draft);
    let mut assignment = world
        .get_mut::<Assignment>(assignment_id)
        .expect("assignment checked above");
    assignment.driver = draft.driver;
    assignment.sequence = draft.sequence;
    assignment.estimated_pickup_ms = draft.estimated_pickup_ms;
    assignment.estimated_delivery_ms = draft.estimated_delivery_ms;
    assignment.status = AssignmentStatus::Offered;
    assignment.offer_round += 1;
    assignment.offer_expires_at_ms = now + ttl;
    assignment.responded_at_ms = None;
    assignment.rejection_reason = None;
    assignment.time_window = time_window;

    world
        .get_mut::<Order>(order_id)
        .expect("order checked above")
        .status = OrderStatus::Offered;

    bump_telemetry(world, |t| t.offers_created += 1);
    Ok(())
}

/// Discard every pre-existing Offered assignment so an incoming draft can
/// recompute sequences coherently: the rows are despawned and their orders
/// emitted back to Pending. Returns how many were released.
pub fn release_offered(world: &mut World) -> usize {
    let offered: Vec<(Entity, Entity)> = {
        let mut query = world.query::<(Entity, &Assignment)>();
        query
            .iter(world)
            .filter(|(_, a)| a.status == AssignmentStatus::Offered)
            .map(|(id, a)| (id, a.order))
            .collect()
    };
    for &(assignment_id, order_id) in &offered {
        if let Some(mut order) = world.get_mut::<Order>(order_id) {
            if order.status == OrderStatus::Offered {
                order.status = OrderStatus::Pending;
            }
        }
        world.despawn(assignment_id);
    }
    offered.len()
}

/// Testing utility: accept every Offered assignment. Returns the count.
pub fn accept_all(world: &mut World) -> usize {
    let offered = offered_assignments(world);
    let mut accepted = 0;
    for assignment_id in offered {
        if accept(world, assignment_id).is_ok() {
            accepted += 1;
        }
    }
    accepted
}

/// Testing utility: reject every Offered assignment with the given reason.
pub fn reject_all(world: &mut World, reason: Option<&str>) -> usize {
    let offered = offered_assignments(world);
    let mut rejected = 0;
    for assignment_id in offered {
        if reject(world, assignment_id, reason.map(str::to_owned)).is_ok() {
            rejected += 1;
        }
    }
    rejected
}

/// All Offered assignment ids, sorted for deterministic processing.
pub fn offered_assignments(world: &mut World) -> Vec<Entity> {
    let mut query = world.query::<(Entity, &Assignment)>();
    let mut ids: Vec<Entity> = query
        .iter(world)
        .filter(|(_, a)| a.status == AssignmentStatus::Offered)
        .map(|(id, _)| id)
        .collect();
    ids.sort();
    ids
}

/// The order's live (Offered or Accepted) assignment, if any.
pub fn live_assignment_for_order(world: &mut World, order: Entity) -> Option<Entity> {
    let mut query = world.query::<(Entity, &Assignment)>();
    query
        .iter(world)
        .filter(|(_, a)| a.order == order && !a.status.is_terminal())
        .map(|(id, _)| id)
        .min()
}

/// The order's most recent assignment row in Rejected or Expired state,
/// eligible for an in-place rebuild.
pub fn rebuildable_assignment_for_order(world: &mut World, order: Entity) -> Option<Entity> {
    let mut query = world.query::<(Entity, &Assignment)>();
    query
        .iter(world)
        .filter(|(_, a)| {
            a.order == order
                && matches!(
                    a.status,
                    AssignmentStatus::Rejected | AssignmentStatus::Expired
                )
        })
        .max_by_key(|(id, a)| (a.offer_round, *id))
        .map(|(id, _)| id)
}

/// Validated driver status transition; rejects edges outside the graph.
pub fn set_driver_status(
    world: &mut World,
    driver_id: Entity,
    to: DriverStatus,
) -> DispatchResult<()> {
    let driver = world
        .get::<Driver>(driver_id)
        .ok_or_else(|| DispatchError::InvalidState("unknown driver".into()))?;
    let from = driver.status;
    if from == to {
        return Ok(());
    }
    if !from.can_transition(to) {
        return Err(DispatchError::InvalidStatusTransition { from, to });
    }
    world
        .get_mut::<Driver>(driver_id)
        .expect("driver checked above")
        .status = to;
    Ok(())
}

/// The driver's inbox: every Offered assignment addressed to them, ordered
/// by sequence.
pub fn driver_inbox(world: &mut World, driver_id: Entity) -> Vec<OfferView> {
    let mut query = world.query::<(Entity, &Assignment)>();
    let mut offers: Vec<OfferView> = query
        .iter(world)
        .filter(|(_, a)| a.driver == driver_id && a.status == AssignmentStatus::Offered)
        .map(|(id, a)| OfferView {
            assignment_id: id.to_bits(),
            order_id: a.order.to_bits(),
            sequence: a.sequence,
            estimated_pickup_ms: a.estimated_pickup_ms,
            estimated_delivery_ms: a.estimated_delivery_ms,
            expires_at_ms: a.offer_expires_at_ms,
            round: a.offer_round,
            time_window: a.time_window,
        })
        .collect();
    offers.sort_by_key(|o| (o.sequence, o.assignment_id));
    offers
}

/// The driver's currently accepted route as an ordered stop list with
/// cumulative distance, cumulative time and ETA, rebuilt from their latest
/// location with the canonical route builder.
pub fn driver_route(world: &mut World, driver_id: Entity) -> DispatchResult<RouteView> {
    let now = now_ms(world);
    let driver = world
        .get::<Driver>(driver_id)
        .ok_or_else(|| DispatchError::InvalidState("unknown driver".into()))?;
    let capacity = driver.max_concurrent.max(1);
    let start = world
        .get::<DriverLocation>(driver_id)
        .ok_or_else(|| DispatchError::InvalidState("driver has no reported location".into()))?
        .point;

    let accepted_orders: Vec<Entity> = {
        let mut query = world.query::<&Assignment>();
        let mut rows: Vec<(u32, Entity)> = query
            .iter(world)
            .filter(|a| a.driver == driver_id && a.status == AssignmentStatus::Accepted)
            .map(|a| (a.sequence, a.order))
            .collect();
        rows.sort_unstable();
        rows.into_iter().map(|(_, order)| order).collect()
    };

    let mut snapshots: Vec<OrderSnapshot> = Vec::with_capacity(accepted_orders.len());
    for order_id in accepted_orders {
        let locations = world
            .get::<OrderLocations>(order_id)
            .ok_or_else(|| DispatchError::InvalidState("order has no locations".into()))?;
        snapshots.push(OrderSnapshot {
            id: order_id,
            pickup: locations.pickup,
            dropoff: locations.dropoff,
            effective_priority: 0.0,
            created_at_ms: 0,
            rejected_drivers: Default::default(),
        });
    }

    let oracle = world.resource::<DistanceOracleHandle>().clone();
    let route_config = world
        .get_resource::<RouteConfig>()
        .copied()
        .unwrap_or_default();
    let builder = RouteBuilder::new(&oracle, &route_config);
    let route = builder
        .plan(driver_id, start, now, &snapshots, capacity)
        .ok_or(DispatchError::CapacityExceeded {
            load: snapshots.len() as u32,
            capacity,
        })?;

    let mut cumulative_distance_m = 0.0;
    let stops = route
        .stops
        .iter()
        .zip(&route.timings)
        .map(|(stop, timing)| {
            cumulative_distance_m += timing.leg_distance_m;
            RouteStopView {
                order_id: stop.order.to_bits(),
                kind: match stop.kind {
                    StopKind::Pickup => "pickup",
                    StopKind::Delivery => "delivery",
                },
                location: stop.location.into(),
                cumulative_distance_m,
                cumulative_duration_s: (timing.arrival_ms - now) as f64 / 1000.0,
                eta_ms: timing.arrival_ms,
            }
        })
        .collect();

    Ok(RouteView {
        driver_id: driver_id.to_bits(),
        stops,
        total_distance_m: route.total_distance_m,
        total_duration_s: route.total_duration_s,
    })
}
