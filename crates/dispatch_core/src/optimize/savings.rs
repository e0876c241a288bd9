//! Clarke-Wright-style savings construction.
//!
//! A synthetic depot sits at the centroid of order pickup points. For every
//! ordered pair of orders the saving s(i,j) = d(depot, pickup_i) +
//! d(depot, pickup_j) − d(dropoff_i, pickup_j) measures how much serving j
//! directly after i beats serving both from the depot. Routes are seeded one
//! per driver, orders dealt round-robin (priority first, skipping drivers
//! the order has rejected), then merged along descending savings while the
//! route builder keeps the merge feasible.

use std::collections::BTreeSet;

use log::debug;

use crate::error::{DispatchError, DispatchResult};
use crate::geo::centroid;
use crate::snapshots::DriverSnapshot;

use super::{try_route, MatchContext, RoutePlan, Solution};

/// Merges must beat the separate routes by at least this many metres.
const MERGE_EPSILON_M: f64 = 1e-6;

/// Build an initial feasible multi-route solution.
pub fn construct(ctx: &MatchContext<'_>, drivers: &[DriverSnapshot]) -> DispatchResult<Solution> {
    if ctx.orders.is_empty() {
        return Err(DispatchError::NoOrders);
    }
    if drivers.is_empty() {
        return Err(DispatchError::NoDrivers);
    }

    let pickups: Vec<_> = ctx.orders.iter().map(|o| o.pickup).collect();
    let depot = centroid(&pickups).expect("orders are non-empty");

    // Seed one (empty) route per driver and deal orders round-robin.
    // `ctx.orders` arrives priority-sorted, so high-priority orders are
    // placed while capacity is plentiful.
    let mut routes: Vec<RoutePlan> = drivers.iter().cloned().map(RoutePlan::empty).collect();
    let mut unassigned: BTreeSet<usize> = BTreeSet::new();
    let mut cursor = 0usize;

    for order_idx in 0..ctx.orders.len() {
        let mut placed = false;
        for probe in 0..routes.len() {
            let route_idx = (cursor + probe) % routes.len();
            let driver_id = routes[route_idx].driver.id;
            if !ctx.orders[order_idx].accepts_driver(driver_id) {
                continue;
            }
            let mut candidate_orders = routes[route_idx].orders.clone();
            candidate_orders.push(order_idx);
            if let Some(rebuilt) = try_route(ctx, &routes[route_idx].driver, &candidate_orders) {
                routes[route_idx] = rebuilt;
                cursor = (route_idx + 1) % routes.len();
                placed = true;
                break;
            }
        }
        if !placed {
            unassigned.insert(order_idx);
        }
    }

    // Savings list over ordered pairs of assigned orders.
    let assigned: Vec<usize> = (0..ctx.orders.len())
        .filter(|i| !unassigned.contains(i))
        .collect();
    let mut savings: Vec<(f64, usize, usize)> = Vec::new();
    for &i in &assigned {
        let d_depot_i = ctx.distance_m(depot, ctx.orders[i].pickup);
        for &j in &assigned {
            if i == j {
                continue;
            }
            let d_depot_j = ctx.distance_m(depot, ctx.orders[j].pickup);
            let d_link = ctx.distance_m(ctx.orders[i].dropoff, ctx.orders[j].pickup);
            savings.push((d_depot_i + d_depot_j - d_link, i, j));
        }
    }
    savings.sort_by(|a, b| {
        b.0.partial_cmp(&a.0)
            .unwrap_or(std::cmp::Ordering::Equal)
            .then(a.1.cmp(&b.1))
            .then(a.2.cmp(&b.2))
    });

    // Merge passes: absorb the whole of j's route into i's route when the
    // builder stays feasible, no merged order rejects the receiving driver,
    // and the combined route actually saves distance. Repeat to fixpoint.
    loop {
        let mut merged_any = false;
        for &(saving, i, j) in &savings {
            if saving <= 0.0 {
                break;
            }
            let (Some(ri), Some(rj)) = (route_position(&routes, i), route_position(&routes, j))
            else {
                continue;
            };
            if ri == rj {
                continue;
            }
            let mut combined = routes[ri].orders.clone();
            combined.extend(routes[rj].orders.iter().copied());

            let Some(rebuilt) = try_route(ctx, &routes[ri].driver, &combined) else {
                continue;
            };
            let separate = routes[ri].distance_m + routes[rj].distance_m;
            if rebuilt.distance_m + MERGE_EPSILON_M >= separate {
                continue;
            }
            debug!(
                "savings merge: route {rj} into {ri} ({:.0} m -> {:.0} m)",
                separate, rebuilt.distance_m
            );
            routes[ri] = rebuilt;
            let driver = routes[rj].driver.clone();
            routes[rj] = RoutePlan::empty(driver);
            merged_any = true;
        }
        if !merged_any {
            break;
        }
    }

    Ok(Solution { routes, unassigned })
}

fn route_position(routes: &[RoutePlan], order_idx: usize) -> Option<usize> {
    routes.iter().position(|r| r.orders.contains(&order_idx))
}
