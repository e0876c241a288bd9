//! VRPPD stop-sequence builder.
//!
//! Given a start point, a set of orders and a concurrent-load capacity K,
//! produce an ordered stop sequence where every order contributes one pickup
//! and one delivery, the pickup precedes the delivery, and at no prefix does
//! the on-board count exceed K.
//!
//! The builder is a nearest-neighbour greedy with feasibility filtering: at
//! every step the closest feasible stop wins (ties by order id, then pickup
//! before delivery). Tight capacity naturally produces P1-D1-P2-D2 chains;
//! loose capacity over a cluster produces P1-P2-…-D1-D2-… batches. The same
//! routine serves the savings constructor, the ALNS improver and the offer
//! lifecycle's route rebuild.

use std::collections::HashMap;

use bevy_ecs::prelude::Entity;

use crate::clock::ONE_SEC_MS;
use crate::config::RouteConfig;
use crate::distance::DistanceOracle;
use crate::geo::GeoPoint;
use crate::snapshots::OrderSnapshot;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum StopKind {
    Pickup,
    Delivery,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Stop {
    pub order: Entity,
    pub kind: StopKind,
    pub location: GeoPoint,
}

/// Arrival/departure bookkeeping for one stop.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct StopTiming {
    pub arrival_ms: u64,
    pub departure_ms: u64,
    pub leg_distance_m: f64,
    pub leg_duration_s: f64,
}

/// A fully sequenced and timed route for one driver.
#[derive(Debug, Clone)]
pub struct PlannedRoute {
    pub driver: Entity,
    pub start: GeoPoint,
    pub depart_at_ms: u64,
    pub stops: Vec<Stop>,
    pub timings: Vec<StopTiming>,
    pub total_distance_m: f64,
    pub total_duration_s: f64,
}

impl PlannedRoute {
    /// Per-order `(estimated pickup, estimated delivery)` arrival times.
    pub fn order_times(&self) -> HashMap<Entity, (u64, u64)> {
        let mut times: HashMap<Entity, (u64, u64)> = HashMap::new();
        for (stop, timing) in self.stops.iter().zip(&self.timings) {
            let entry = times.entry(stop.order).or_insert((0, 0));
            match stop.kind {
                StopKind::Pickup => entry.0 = timing.arrival_ms,
                StopKind::Delivery => entry.1 = timing.arrival_ms,
            }
        }
        times
    }

    /// Per-order `(pickup leg, delivery leg)` distances in metres.
    pub fn order_leg_distances(&self) -> HashMap<Entity, (f64, f64)> {
        let mut legs: HashMap<Entity, (f64, f64)> = HashMap::new();
        for (stop, timing) in self.stops.iter().zip(&self.timings) {
            let entry = legs.entry(stop.order).or_insert((0.0, 0.0));
            match stop.kind {
                StopKind::Pickup => entry.0 = timing.leg_distance_m,
                StopKind::Delivery => entry.1 = timing.leg_distance_m,
            }
        }
        legs
    }

    /// Maximum concurrent load over the stop sequence.
    pub fn peak_load(&self) -> u32 {
        let mut load = 0i64;
        let mut peak = 0i64;
        for stop in &self.stops {
            match stop.kind {
                StopKind::Pickup => load += 1,
                StopKind::Delivery => load -= 1,
            }
            peak = peak.max(load);
        }
        peak.max(0) as u32
    }
}

pub struct RouteBuilder<'a> {
    oracle: &'a DistanceOracle,
    config: &'a RouteConfig,
}

impl<'a> RouteBuilder<'a> {
    pub fn new(oracle: &'a DistanceOracle, config: &'a RouteConfig) -> Self {
        Self { oracle, config }
    }

    /// Sequence the stops for `orders` starting from `start` under capacity
    /// `capacity`. Returns `None` when no feasible stop remains mid-sequence
    /// (the order set is infeasible for this capacity).
    pub fn sequence(
        &self,
        start: GeoPoint,
        orders: &[OrderSnapshot],
        capacity: u32,
    ) -> Option<Vec<Stop>> {
        let n = orders.len();
        let mut picked = vec![false; n];
        let mut delivered = vec![false; n];
        let mut load: u32 = 0;
        let mut current = start;
        let mut stops: Vec<Stop> = Vec::with_capacity(2 * n);

        while stops.len() < 2 * n {
            let mut best: Option<(f64, Entity, StopKind, usize)> = None;
            for (i, order) in orders.iter().enumerate() {
                let candidate = if !picked[i] {
                    if load >= capacity {
                        continue;
                    }
                    (order.pickup, StopKind::Pickup)
                } else if !delivered[i] {
                    (order.dropoff, StopKind::Delivery)
                } else {
                    continue;
                };
                let (distance_m, _) =
                    self.oracle.cost(current, candidate.0, self.config.profile);
                let key = (distance_m, order.id, candidate.1, i);
                let better = match &best {
                    None => true,
                    Some((d, id, kind, _)) => {
                        (key.0, key.1, key.2) < (*d, *id, *kind)
                    }
                };
                if better {
                    best = Some(key);
                }
            }

            let Some((_, _, kind, idx)) = best else {
                // Nothing feasible mid-sequence: infeasible for this capacity.
                return None;
            };
            match kind {
                StopKind::Pickup => {
                    picked[idx] = true;
                    load += 1;
                    current = orders[idx].pickup;
                }
                StopKind::Delivery => {
                    delivered[idx] = true;
                    load -= 1;
                    current = orders[idx].dropoff;
                }
            }
            stops.push(Stop {
                order: orders[idx].id,
                kind,
                location: current,
            });
        }
        Some(stops)
    }

    /// Sequence and time a route: walk the stops with oracle durations,
    /// adding the configured service time at each stop.
    pub fn plan(
        &self,
        driver: Entity,
        start: GeoPoint,
        depart_at_ms: u64,
        orders: &[OrderSnapshot],
        capacity: u32,
    ) -> Option<PlannedRoute> {
        let stops = self.sequence(start, orders, capacity)?;
        Some(self.time_stops(driver, start, depart_at_ms, stops))
    }

    /// Walk an already sequenced stop list and attach timings.
    pub fn time_stops(
        &self,
        driver: Entity,
        start: GeoPoint,
        depart_at_ms: u64,
        stops: Vec<Stop>,
    ) -> PlannedRoute {
        let mut timings = Vec::with_capacity(stops.len());
        let mut current = start;
        let mut clock_ms = depart_at_ms;
        let mut total_distance_m = 0.0;

        for stop in &stops {
            let (leg_distance_m, leg_duration_s) =
                self.oracle.cost(current, stop.location, self.config.profile);
            let arrival_ms = clock_ms + (leg_duration_s * ONE_SEC_MS as f64) as u64;
            let service_ms = match stop.kind {
                StopKind::Pickup => self.config.pickup_service_ms,
                StopKind::Delivery => self.config.delivery_service_ms,
            };
            let departure_ms = arrival_ms + service_ms;
            timings.push(StopTiming {
                arrival_ms,
                departure_ms,
                leg_distance_m,
                leg_duration_s,
            });
            total_distance_m += leg_distance_m;
            current = stop.location;
            clock_ms = departure_ms;
        }

        let total_duration_s = (clock_ms - depart_at_ms) as f64 / ONE_SEC_MS as f64;
        PlannedRoute {
            driver,
            start,
            depart_at_ms,
            stops,
            timings,
            total_distance_m,
            total_duration_s,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::ManualClock;
    use crate::config::OracleConfig;
    use std::collections::HashSet;
    use std::sync::Arc;

    fn oracle() -> DistanceOracle {
        DistanceOracle::haversine(Arc::new(ManualClock::new(0)), OracleConfig::default())
    }

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

    fn assert_valid_vrppd(stops: &[Stop], capacity: u32) {
        let mut picked: HashSet<Entity> = HashSet::new();
        let mut load = 0u32;
        for stop in stops {
            match stop.kind {
                StopKind::Pickup => {
                    load += 1;
                    assert!(load <= capacity, "load {load} exceeds capacity {capacity}");
                    picked.insert(stop.order);
                }
                StopKind::Delivery => {
                    assert!(picked.contains(&stop.order), "delivery before pickup");
                    load -= 1;
                }
            }
        }
        assert_eq!(load, 0);
    }

    #[test]
    fn capacity_one_forces_strict_alternation() {
        let orders = vec![order(1, 52.50, 52.55), order(2, 52.60, 52.65)];
        let oracle = oracle();
        let config = RouteConfig::default();
        let builder = RouteBuilder::new(&oracle, &config);
        let start = GeoPoint::new(52.49, 13.4).unwrap();

        let stops = builder.sequence(start, &orders, 1).unwrap();
        assert_valid_vrppd(&stops, 1);
        // Strictly P1-D1-P2-D2: nearest pickup first, then its delivery.
        assert_eq!(stops[0].kind, StopKind::Pickup);
        assert_eq!(stops[1].kind, StopKind::Delivery);
        assert_eq!(stops[0].order, stops[1].order);
        assert_eq!(stops[2].kind, StopKind::Pickup);
        assert_eq!(stops[3].kind, StopKind::Delivery);
        assert_eq!(stops[2].order, stops[3].order);
    }

    #[test]
    fn clustered_pickups_batch_under_loose_capacity() {
        // Two pickups adjacent to the start, both dropoffs far north: the
        // greedy picks both parcels before driving out.
        let orders = vec![order(1, 52.500, 52.80), order(2, 52.501, 52.81)];
        let oracle = oracle();
        let config = RouteConfig::default();
        let builder = RouteBuilder::new(&oracle, &config);
        let start = GeoPoint::new(52.499, 13.4).unwrap();

        let stops = builder.sequence(start, &orders, 5).unwrap();
        assert_valid_vrppd(&stops, 5);
        assert_eq!(stops[0].kind, StopKind::Pickup);
        assert_eq!(stops[1].kind, StopKind::Pickup);
        assert_eq!(stops[2].kind, StopKind::Delivery);
        assert_eq!(stops[3].kind, StopKind::Delivery);
    }

    #[test]
    fn zero_capacity_is_infeasible() {
        let orders = vec![order(1, 52.50, 52.55)];
        let oracle = oracle();
        let config = RouteConfig::default();
        let builder = RouteBuilder::new(&oracle, &config);
        let start = GeoPoint::new(52.49, 13.4).unwrap();
        assert!(builder.sequence(start, &orders, 0).is_none());
    }

    #[test]
    fn empty_order_set_is_an_empty_route() {
        let oracle = oracle();
        let config = RouteConfig::default();
        let builder = RouteBuilder::new(&oracle, &config);
        let start = GeoPoint::new(52.49, 13.4).unwrap();
        let route = builder
            .plan(Entity::from_raw(1), start, 0, &[], 3)
            .unwrap();
        assert!(route.stops.is_empty());
        assert_eq!(route.total_distance_m, 0.0);
    }

    #[test]
    fn timing_walk_orders_pickup_before_delivery() {
        let orders = vec![order(1, 52.50, 52.55), order(2, 52.60, 52.65)];
        let oracle = oracle();
        let config = RouteConfig::default();
        let builder = RouteBuilder::new(&oracle, &config);
        let start = GeoPoint::new(52.49, 13.4).unwrap();

        let route = builder
            .plan(Entity::from_raw(9), start, 1_000, &orders, 2)
            .unwrap();
        let times = route.order_times();
        for order in &orders {
            let (pickup_ms, delivery_ms) = times[&order.id];
            assert!(pickup_ms < delivery_ms, "pickup must precede delivery");
        }
        // Arrivals are strictly increasing along the route.
        for pair in route.timings.windows(2) {
            assert!(pair[0].departure_ms <= pair[1].arrival_ms);
            assert!(pair[0].arrival_ms < pair[1].arrival_ms);
        }
        assert!(route.peak_load() <= 2);
    }
}
