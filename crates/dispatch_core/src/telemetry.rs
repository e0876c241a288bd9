//! Telemetry: lifecycle counters and the serialisable summaries returned by
//! the matching endpoints.

use bevy_ecs::prelude::Resource;
use serde::Serialize;

use crate::geo::LatLngPayload;
use crate::routes::{PlannedRoute, StopKind};

/// Engine-wide counters, updated by the offer lifecycle and matching loop
/// when the resource is present.
#[derive(Debug, Default, Clone, Resource)]
pub struct DispatchTelemetry {
    pub offers_created: u64,
    pub offers_accepted: u64,
    pub offers_rejected: u64,
    pub offers_expired: u64,
    pub rounds_run: u64,
    pub cycles_run: u64,
}

/// One stop in a reported route, with cumulative progress and ETA.
#[derive(Debug, Clone, Serialize)]
pub struct StopReport {
    pub order_id: u64,
    pub kind: &'static str,
    pub location: LatLngPayload,
    pub cumulative_distance_m: f64,
    pub cumulative_duration_s: f64,
    pub eta_ms: u64,
}

/// One driver's route in a cycle summary.
#[derive(Debug, Clone, Serialize)]
pub struct RouteReport {
    pub driver_id: u64,
    pub order_count: usize,
    pub distance_m: f64,
    pub duration_s: f64,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub stops: Vec<StopReport>,
}

impl RouteReport {
    /// Build from a planned route; `verbose` includes the per-stop list.
    pub fn from_planned(route: &PlannedRoute, verbose: bool) -> Self {
        let stops = if verbose {
            let mut cumulative_distance_m = 0.0;
            route
                .stops
                .iter()
                .zip(&route.timings)
                .map(|(stop, timing)| {
                    cumulative_distance_m += timing.leg_distance_m;
                    StopReport {
                        order_id: stop.order.to_bits(),
                        kind: match stop.kind {
                            StopKind::Pickup => "pickup",
                            StopKind::Delivery => "delivery",
                        },
                        location: stop.location.into(),
                        cumulative_distance_m,
                        cumulative_duration_s: (timing.arrival_ms - route.depart_at_ms) as f64
                            / 1000.0,
                        eta_ms: timing.arrival_ms,
                    }
                })
                .collect()
        } else {
            Vec::new()
        };
        Self {
            driver_id: route.driver.to_bits(),
            order_count: route.stops.len() / 2,
            distance_m: route.total_distance_m,
            duration_s: route.total_duration_s,
            stops,
        }
    }
}

/// Summary of one matching cycle; the body of `POST /matching/optimize`.
/// An empty route list with status "ok" means nothing could be matched,
/// which is not an error.
#[derive(Debug, Clone, Serialize)]
pub struct CycleSummary {
    pub status: &'static str,
    pub message: String,
    pub rounds_run: u32,
    pub routes: Vec<RouteReport>,
    pub total_distance_m: f64,
    pub offers_created: usize,
    pub accepted: usize,
    pub rejected: usize,
    pub expired: usize,
    /// Orders still Pending when the cycle stopped.
    pub remaining_pending: Vec<u64>,
    pub elapsed_ms: u64,
    pub finished_at_ms: u64,
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::routes::{Stop, StopTiming};
    use bevy_ecs::prelude::Entity;

    #[test]
    fn route_report_counts_orders_and_accumulates_distance() {
        let order = Entity::from_raw(1);
        let p = crate::geo::GeoPoint::new(52.5, 13.4).unwrap();
        let q = crate::geo::GeoPoint::new(52.6, 13.4).unwrap();
        let route = PlannedRoute {
            driver: Entity::from_raw(9),
            start: p,
            depart_at_ms: 0,
            stops: vec![
                Stop { order, kind: StopKind::Pickup, location: p },
                Stop { order, kind: StopKind::Delivery, location: q },
            ],
            timings: vec![
                StopTiming {
                    arrival_ms: 100,
                    departure_ms: 200,
                    leg_distance_m: 10.0,
                    leg_duration_s: 0.1,
                },
                StopTiming {
                    arrival_ms: 300,
                    departure_ms: 400,
                    leg_distance_m: 20.0,
                    leg_duration_s: 0.1,
                },
            ],
            total_distance_m: 30.0,
            total_duration_s: 0.4,
        };

        let terse = RouteReport::from_planned(&route, false);
        assert_eq!(terse.order_count, 1);
        assert!(terse.stops.is_empty());

        let verbose = RouteReport::from_planned(&route, true);
        assert_eq!(verbose.stops.len(), 2);
        assert_eq!(verbose.stops[1].cumulative_distance_m, 30.0);
        let json = serde_json::to_string(&verbose).unwrap();
        assert!(json.contains("\"pickup\""));
    }
}
