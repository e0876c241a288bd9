//! Entity Component System: components and state enums for orders, drivers,
//! and assignments.
//!
//! The `bevy_ecs::World` is the engine's arena: orders, drivers and
//! assignments are entities, and all cross-references are `Entity` handles
//! (an [`Assignment`] stores the ids of its order and its driver; joins are
//! lookups, never object graphs).
//!
//! - **Components**: `Order`, `OrderLocations`, `Driver`, `DriverLocation`,
//!   `Assignment`
//! - **State enums**: `OrderStatus`, `DriverStatus`, `AssignmentStatus`
//!
//! Status transitions are validated by `can_transition`; anything outside
//! the allowed graph is an `InvalidStatusTransition`.

use std::collections::HashSet;

use bevy_ecs::prelude::{Component, Entity};
use chrono::NaiveDate;
use serde::{Deserialize, Serialize};

use crate::geo::GeoPoint;

/// Boost applied to the priority multiplier on every rejection or expiry.
pub const REJECTION_PRIORITY_BOOST: f64 = 0.2;

/// Default concurrent-load capacity for a driver.
pub const DEFAULT_MAX_CONCURRENT: u32 = 3;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum OrderStatus {
    Pending,
    Offered,
    Assigned,
    PickedUp,
    Delivered,
    Cancelled,
}

impl OrderStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(self, OrderStatus::Delivered | OrderStatus::Cancelled)
    }

    /// Allowed transitions: Pending→Offered→(Assigned↔Pending)→PickedUp→
    /// Delivered, with Cancelled reachable from any non-terminal state and
    /// Offered released back to Pending when a round is rebuilt.
    pub fn can_transition(&self, to: OrderStatus) -> bool {
        use OrderStatus::*;
        if to == Cancelled {
            return !self.is_terminal();
        }
        matches!(
            (self, to),
            (Pending, Offered)
                | (Offered, Assigned)
                | (Offered, Pending)
                | (Assigned, Pending)
                | (Assigned, PickedUp)
                | (PickedUp, Delivered)
        )
    }
}

/// Requested time-of-day preference on an order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum TimeOfDayPreference {
    Morning,
    Afternoon,
    Evening,
}

/// A delivery order. Spatial data lives in the sibling [`OrderLocations`]
/// component.
#[derive(Debug, Clone, Component)]
pub struct Order {
    pub status: OrderStatus,
    /// Base priority, 1–10.
    pub base_priority: u8,
    /// Monotonically non-decreasing; starts at 1.0, +0.2 per rejection.
    pub priority_multiplier: f64,
    pub rejection_count: u32,
    /// Drivers that have rejected this order. Grows monotonically; no future
    /// offer may name a driver in this set.
    pub rejected_drivers: HashSet<Entity>,
    pub requested_date: NaiveDate,
    pub time_preference: Option<TimeOfDayPreference>,
    pub created_at_ms: u64,
}

impl Order {
    pub fn new(base_priority: u8, requested_date: NaiveDate, created_at_ms: u64) -> Self {
        Self {
            status: OrderStatus::Pending,
            base_priority: base_priority.clamp(1, 10),
            priority_multiplier: 1.0,
            rejection_count: 0,
            rejected_drivers: HashSet::new(),
            requested_date,
            time_preference: None,
            created_at_ms,
        }
    }

    /// Sort key for pending orders: base × multiplier.
    pub fn effective_priority(&self) -> f64 {
        self.base_priority as f64 * self.priority_multiplier
    }

    /// Record a rejection (or expiry) by `driver`: blacklist the driver,
    /// bump the counter and boost the multiplier.
    pub fn record_rejection(&mut self, driver: Entity) {
        self.rejected_drivers.insert(driver);
        self.rejection_count += 1;
        self.priority_multiplier += REJECTION_PRIORITY_BOOST;
    }

    pub fn has_rejected(&self, driver: Entity) -> bool {
        self.rejected_drivers.contains(&driver)
    }
}

/// Pickup and dropoff points of an order.
#[derive(Debug, Clone, Copy, PartialEq, Component)]
pub struct OrderLocations {
    pub pickup: GeoPoint,
    pub dropoff: GeoPoint,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum DriverStatus {
    Offline,
    Available,
    EnRoutePickup,
    AtPickup,
    EnRouteDelivery,
    AtDelivery,
}

impl DriverStatus {
    /// Transition graph: Offline↔Available; Available↔EnRoutePickup;
    /// EnRoutePickup→AtPickup→EnRouteDelivery→AtDelivery→{Available, Offline}.
    pub fn can_transition(&self, to: DriverStatus) -> bool {
        use DriverStatus::*;
        matches!(
            (self, to),
            (Offline, Available)
                | (Available, EnRoutePickup)
                | (Available, Offline)
                | (EnRoutePickup, Available)
                | (EnRoutePickup, AtPickup)
                | (AtPickup, EnRouteDelivery)
                | (EnRouteDelivery, AtDelivery)
                | (AtDelivery, Available)
                | (AtDelivery, Offline)
        )
    }

    /// Drivers in these states are eligible to receive offers.
    pub fn is_matchable(&self) -> bool {
        matches!(self, DriverStatus::Available | DriverStatus::EnRoutePickup)
    }
}

/// A courier. Location lives in the sibling [`DriverLocation`] component.
#[derive(Debug, Clone, Component)]
pub struct Driver {
    pub name: String,
    pub phone: String,
    pub vehicle_type: String,
    /// Maximum number of orders on board at once.
    pub max_concurrent: u32,
    pub status: DriverStatus,
}

impl Driver {
    pub fn new(name: impl Into<String>, phone: impl Into<String>, vehicle_type: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            phone: phone.into(),
            vehicle_type: vehicle_type.into(),
            max_concurrent: DEFAULT_MAX_CONCURRENT,
            status: DriverStatus::Offline,
        }
    }

    pub fn with_capacity(mut self, max_concurrent: u32) -> Self {
        self.max_concurrent = max_concurrent.max(1);
        self
    }
}

/// Latest reported driver position.
#[derive(Debug, Clone, Copy, PartialEq, Component)]
pub struct DriverLocation {
    pub point: GeoPoint,
    pub recorded_at_ms: u64,
    pub heading_deg: Option<f64>,
    pub speed_kmh: Option<f64>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum AssignmentStatus {
    Offered,
    Accepted,
    Rejected,
    Expired,
    Completed,
    Cancelled,
}

impl AssignmentStatus {
    /// Rejected and Expired rows are terminal for invariant purposes; a
    /// re-offer rebuilds the row in place rather than resurrecting it.
    pub fn is_terminal(&self) -> bool {
        !matches!(self, AssignmentStatus::Offered | AssignmentStatus::Accepted)
    }
}

/// How a time window was derived. Written once at assignment creation.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub enum CalculationMethod {
    SimpleHeuristic,
    StochasticSaa {
        sample_count: u32,
        std_dev_s: f64,
        cv: f64,
    },
    DistributionallyRobust,
}

/// Estimated-arrival window attached to an offer.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct TimeWindow {
    pub earliest_ms: u64,
    pub latest_ms: u64,
    pub expected_arrival_ms: u64,
    pub width_ms: u64,
    pub confidence: f64,
    pub violation_probability: f64,
    pub early_penalty: f64,
    pub late_penalty: f64,
    pub method: CalculationMethod,
}

/// A proposed or confirmed (order, driver) pairing. Owned 1:1 by its order
/// while non-terminal and 1:N by its driver.
#[derive(Debug, Clone, Component)]
pub struct Assignment {
    pub order: Entity,
    pub driver: Entity,
    /// 1-based position within the driver's route.
    pub sequence: u32,
    pub estimated_pickup_ms: u64,
    pub estimated_delivery_ms: u64,
    pub status: AssignmentStatus,
    pub offer_expires_at_ms: u64,
    pub offer_round: u32,
    pub responded_at_ms: Option<u64>,
    pub rejection_reason: Option<String>,
    pub time_window: Option<TimeWindow>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn order_status_graph() {
        use OrderStatus::*;
        assert!(Pending.can_transition(Offered));
        assert!(Offered.can_transition(Assigned));
        assert!(Offered.can_transition(Pending));
        assert!(Assigned.can_transition(Pending));
        assert!(Assigned.can_transition(PickedUp));
        assert!(PickedUp.can_transition(Delivered));
        assert!(PickedUp.can_transition(Cancelled));
        assert!(!Delivered.can_transition(Cancelled));
        assert!(!Pending.can_transition(PickedUp));
        assert!(!Delivered.can_transition(Pending));
    }

    #[test]
    fn driver_status_graph() {
        use DriverStatus::*;
        assert!(Offline.can_transition(Available));
        assert!(Available.can_transition(EnRoutePickup));
        assert!(EnRoutePickup.can_transition(Available));
        assert!(AtDelivery.can_transition(Available));
        assert!(AtDelivery.can_transition(Offline));
        assert!(!Offline.can_transition(EnRoutePickup));
        assert!(!Available.can_transition(AtPickup));
        assert!(!AtPickup.can_transition(Available));
    }

    #[test]
    fn rejection_boosts_priority() {
        let date = NaiveDate::from_ymd_opt(2025, 6, 1).unwrap();
        let mut order = Order::new(5, date, 0);
        assert!((order.effective_priority() - 5.0).abs() < 1e-9);

        let driver = Entity::from_raw(7);
        order.record_rejection(driver);
        assert_eq!(order.rejection_count, 1);
        assert!(order.has_rejected(driver));
        assert!((order.priority_multiplier - 1.2).abs() < 1e-9);
        assert!((order.effective_priority() - 6.0).abs() < 1e-9);
    }

    #[test]
    fn base_priority_is_clamped() {
        let date = NaiveDate::from_ymd_opt(2025, 6, 1).unwrap();
        assert_eq!(Order::new(0, date, 0).base_priority, 1);
        assert_eq!(Order::new(99, date, 0).base_priority, 10);
    }
}
