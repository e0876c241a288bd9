//! Optimiser stages: savings construction, ALNS improvement, and the draft
//! orchestrator that validates and selects among candidates.
//!
//! All stages are pure functions over [`MatchContext`] snapshots; nothing in
//! this module touches the `World`.

pub mod alns;
pub mod draft;
pub mod savings;

use std::collections::BTreeSet;

use crate::config::RouteConfig;
use crate::distance::DistanceOracle;
use crate::geo::GeoPoint;
use crate::routes::{RouteBuilder, Stop};
use crate::snapshots::{DriverSnapshot, OrderSnapshot};

/// Immutable inputs shared by every optimiser stage of one run.
pub struct MatchContext<'a> {
    pub orders: &'a [OrderSnapshot],
    pub oracle: &'a DistanceOracle,
    pub route_config: &'a RouteConfig,
    /// Departure time used for the timing walks.
    pub depart_at_ms: u64,
}

impl<'a> MatchContext<'a> {
    pub fn builder(&self) -> RouteBuilder<'_> {
        RouteBuilder::new(self.oracle, self.route_config)
    }

    /// Road distance in metres (cached; straight-line on provider failure).
    pub fn distance_m(&self, from: GeoPoint, to: GeoPoint) -> f64 {
        self.oracle.cost(from, to, self.route_config.profile).0
    }
}

/// One driver's route inside a working solution. `orders` holds indices
/// into `MatchContext::orders`; empty routes stay in the solution so repair
/// operators can use idle drivers.
#[derive(Debug, Clone)]
pub struct RoutePlan {
    pub driver: DriverSnapshot,
    pub orders: Vec<usize>,
    pub stops: Vec<Stop>,
    pub distance_m: f64,
    pub duration_s: f64,
}

impl RoutePlan {
    pub fn empty(driver: DriverSnapshot) -> Self {
        Self {
            driver,
            orders: Vec::new(),
            stops: Vec::new(),
            distance_m: 0.0,
            duration_s: 0.0,
        }
    }

    pub fn is_empty(&self) -> bool {
        self.orders.is_empty()
    }
}

/// A working multi-route solution.
#[derive(Debug, Clone)]
pub struct Solution {
    pub routes: Vec<RoutePlan>,
    pub unassigned: BTreeSet<usize>,
}

impl Solution {
    pub fn total_duration_s(&self) -> f64 {
        self.routes.iter().map(|r| r.duration_s).sum()
    }

    pub fn total_distance_m(&self) -> f64 {
        self.routes.iter().map(|r| r.distance_m).sum()
    }

    pub fn assigned_count(&self) -> usize {
        self.routes.iter().map(|r| r.orders.len()).sum()
    }

    /// Objective: total travel time plus a large penalty per unassigned
    /// order.
    pub fn cost(&self, unassigned_penalty_s: f64) -> f64 {
        self.total_duration_s() + unassigned_penalty_s * self.unassigned.len() as f64
    }

    /// Index of the route currently serving `order_idx`.
    pub fn route_of(&self, order_idx: usize) -> Option<usize> {
        self.routes
            .iter()
            .position(|r| r.orders.contains(&order_idx))
    }
}

/// Build a route plan for `driver` over the given order indices. `None`
/// when the driver is blacklisted by any order or the set is infeasible
/// under the driver's capacity.
///
/// Capacity bounds the route two ways: at most `capacity` orders per route
/// per matching run, and at most `capacity` on board at once within the
/// stop sequence (the latter enforced by the stop builder).
pub fn try_route(
    ctx: &MatchContext<'_>,
    driver: &DriverSnapshot,
    order_idxs: &[usize],
) -> Option<RoutePlan> {
    if order_idxs.len() > driver.capacity as usize {
        return None;
    }
    if order_idxs
        .iter()
        .any(|&i| !ctx.orders[i].accepts_driver(driver.id))
    {
        return None;
    }
    if order_idxs.is_empty() {
        return Some(RoutePlan::empty(driver.clone()));
    }

    let subset: Vec<OrderSnapshot> = order_idxs.iter().map(|&i| ctx.orders[i].clone()).collect();
    let planned = ctx.builder().plan(
        driver.id,
        driver.position,
        ctx.depart_at_ms,
        &subset,
        driver.capacity,
    )?;

    let mut orders = order_idxs.to_vec();
    orders.sort_unstable();
    Some(RoutePlan {
        driver: driver.clone(),
        orders,
        stops: planned.stops,
        distance_m: planned.total_distance_m,
        duration_s: planned.total_duration_s,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::ManualClock;
    use crate::config::OracleConfig;
    use bevy_ecs::prelude::Entity;
    use std::collections::HashSet;
    use std::sync::Arc;

    fn order(raw: u32, pickup_lat: f64, dropoff_lat: f64) -> OrderSnapshot {
        OrderSnapshot {
            id: Entity::from_raw(raw),
            pickup: GeoPoint::new(pickup_lat, 13.4).unwrap(),
            dropoff: GeoPoint::new(dropoff_lat, 13.4).unwrap(),
            effective_priority: 5.0,
            created_at_ms: raw as u64,
            rejected_drivers: HashSet::new(),
        }
    }

    fn driver(raw: u32, capacity: u32) -> DriverSnapshot {
        DriverSnapshot {
            id: Entity::from_raw(raw),
            position: GeoPoint::new(52.49, 13.4).unwrap(),
            capacity,
        }
    }

    #[test]
    fn try_route_refuses_blacklisted_driver() {
        let oracle =
            DistanceOracle::haversine(Arc::new(ManualClock::new(0)), OracleConfig::default());
        let route_config = RouteConfig::default();
        let d = driver(100, 3);
        let mut o = order(1, 52.50, 52.55);
        o.rejected_drivers.insert(d.id);
        let orders = vec![o];
        let ctx = MatchContext {
            orders: &orders,
            oracle: &oracle,
            route_config: &route_config,
            depart_at_ms: 0,
        };
        assert!(try_route(&ctx, &d, &[0]).is_none());
    }

    #[test]
    fn solution_cost_penalises_unassigned() {
        let d = driver(100, 3);
        let mut solution = Solution {
            routes: vec![RoutePlan::empty(d)],
            unassigned: BTreeSet::new(),
        };
        assert_eq!(solution.cost(10_000.0), 0.0);
        solution.unassigned.insert(0);
        assert_eq!(solution.cost(10_000.0), 10_000.0);
    }
}
