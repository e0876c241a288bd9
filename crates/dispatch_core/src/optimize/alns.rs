//! Adaptive large-neighbourhood search: destroy/repair local search with
//! operator weights learned from success history and simulated-annealing
//! acceptance.
//!
//! Each iteration removes ⌈15%⌉ of the assigned orders with one destroy
//! operator, reinserts the pool (removed plus previously unassigned) with
//! one repair operator, and accepts the result by annealing. Operators that
//! produce a new best get their weights multiplied; everything else decays.
//! Iterations are strictly sequential; the deadline is polled once per
//! iteration, never mid-iteration.

use std::collections::BTreeSet;
use std::time::{Duration, Instant};

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

use crate::config::AlnsConfig;

use super::{try_route, MatchContext, Solution};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum DestroyOp {
    Random,
    Worst,
    Related,
}

const DESTROY_OPS: [DestroyOp; 3] = [DestroyOp::Random, DestroyOp::Worst, DestroyOp::Related];

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum RepairOp {
    Greedy,
    Regret,
}

const REPAIR_OPS: [RepairOp; 2] = [RepairOp::Greedy, RepairOp::Regret];

/// Adaptive operator weights with multiplicative reward/decay.
struct OperatorWeights {
    destroy: [f64; 3],
    repair: [f64; 2],
}

impl OperatorWeights {
    fn seeded() -> Self {
        Self {
            destroy: [1.0, 1.25, 1.5],
            repair: [1.3, 1.5],
        }
    }

    fn pick(weights: &[f64], rng: &mut StdRng) -> usize {
        let total: f64 = weights.iter().sum();
        let mut x = rng.gen::<f64>() * total;
        for (i, w) in weights.iter().enumerate() {
            x -= w;
            if x <= 0.0 {
                return i;
            }
        }
        weights.len() - 1
    }

    fn update(&mut self, destroy: usize, repair: usize, new_best: bool, cfg: &AlnsConfig) {
        let factor = if new_best { cfg.reward } else { cfg.decay };
        self.destroy[destroy] = (self.destroy[destroy] * factor).clamp(0.05, cfg.weight_cap);
        self.repair[repair] = (self.repair[repair] * factor).clamp(0.05, cfg.weight_cap);
    }
}

/// Improve `initial` within the time budget. Returns a solution with equal
/// or lower objective cost.
pub fn improve(ctx: &MatchContext<'_>, initial: Solution, cfg: &AlnsConfig) -> Solution {
    if initial.assigned_count() == 0 && initial.unassigned.is_empty() {
        return initial;
    }

    let deadline = Instant::now() + Duration::from_millis(cfg.time_budget_ms);
    let mut rng = StdRng::seed_from_u64(cfg.seed);
    let mut weights = OperatorWeights::seeded();

    let mut best = initial.clone();
    let mut best_cost = best.cost(cfg.unassigned_penalty_s);
    let mut current = initial;
    let mut current_cost = best_cost;
    let mut temperature = (cfg.initial_temperature_ratio * current_cost).max(1e-6);
    let mut stalled = 0u32;

    while Instant::now() < deadline && stalled < cfg.max_stalled {
        let destroy_idx = OperatorWeights::pick(&weights.destroy, &mut rng);
        let repair_idx = OperatorWeights::pick(&weights.repair, &mut rng);

        let mut candidate = current.clone();
        let mut pool = destroy(ctx, &mut candidate, DESTROY_OPS[destroy_idx], cfg, &mut rng);
        pool.extend(candidate.unassigned.iter().copied());
        candidate.unassigned.clear();
        repair(ctx, &mut candidate, pool, REPAIR_OPS[repair_idx], &mut rng);

        let candidate_cost = candidate.cost(cfg.unassigned_penalty_s);
        let new_best = candidate_cost + 1e-9 < best_cost;
        if new_best {
            best = candidate.clone();
            best_cost = candidate_cost;
            stalled = 0;
        } else {
            stalled += 1;
        }
        weights.update(destroy_idx, repair_idx, new_best, cfg);

        let delta = candidate_cost - current_cost;
        let accept = delta < 0.0 || rng.gen::<f64>() < (-delta / temperature).exp();
        if accept {
            current = candidate;
            current_cost = candidate_cost;
        }
        temperature = (temperature * cfg.cooling).max(1e-9);
    }

    best
}

/// Remove ⌈fraction⌉ of the assigned orders and rebuild the affected
/// routes. Returns the removed order indices.
fn destroy(
    ctx: &MatchContext<'_>,
    solution: &mut Solution,
    op: DestroyOp,
    cfg: &AlnsConfig,
    rng: &mut StdRng,
) -> BTreeSet<usize> {
    let assigned: Vec<usize> = {
        let mut all: Vec<usize> = solution
            .routes
            .iter()
            .flat_map(|r| r.orders.iter().copied())
            .collect();
        all.sort_unstable();
        all
    };
    if assigned.is_empty() {
        return BTreeSet::new();
    }
    let count = ((assigned.len() as f64 * cfg.destroy_fraction).ceil() as usize)
        .clamp(1, assigned.len());

    let removed: BTreeSet<usize> = match op {
        DestroyOp::Random => {
            let mut remaining = assigned.clone();
            let mut removed = BTreeSet::new();
            while removed.len() < count {
                let pick = rng.gen_range(0..remaining.len());
                removed.insert(remaining.swap_remove(pick));
            }
            removed
        }
        DestroyOp::Worst => {
            let mut costed: Vec<(f64, usize)> = assigned
                .iter()
                .map(|&idx| (local_insertion_cost(ctx, solution, idx), idx))
                .collect();
            costed.sort_by(|a, b| {
                b.0.partial_cmp(&a.0)
                    .unwrap_or(std::cmp::Ordering::Equal)
                    .then(a.1.cmp(&b.1))
            });
            costed.into_iter().take(count).map(|(_, idx)| idx).collect()
        }
        DestroyOp::Related => {
            // Straight-line proximity to a random seed order, for speed.
            let seed = assigned[rng.gen_range(0..assigned.len())];
            let seed_pickup = ctx.orders[seed].pickup;
            let mut ranked: Vec<(f64, usize)> = assigned
                .iter()
                .map(|&idx| (seed_pickup.haversine_km(&ctx.orders[idx].pickup), idx))
                .collect();
            ranked.sort_by(|a, b| {
                a.0.partial_cmp(&b.0)
                    .unwrap_or(std::cmp::Ordering::Equal)
                    .then(a.1.cmp(&b.1))
            });
            ranked.into_iter().take(count).map(|(_, idx)| idx).collect()
        }
    };

    for route_idx in 0..solution.routes.len() {
        if !solution.routes[route_idx]
            .orders
            .iter()
            .any(|o| removed.contains(o))
        {
            continue;
        }
        let kept: Vec<usize> = solution.routes[route_idx]
            .orders
            .iter()
            .copied()
            .filter(|o| !removed.contains(o))
            .collect();
        match try_route(ctx, &solution.routes[route_idx].driver, &kept) {
            Some(rebuilt) => solution.routes[route_idx] = rebuilt,
            None => {
                // A subset of a feasible route stays feasible; treat a
                // rebuild failure as the whole route falling back to the pool.
                let driver = solution.routes[route_idx].driver.clone();
                for orphan in kept {
                    solution.unassigned.insert(orphan);
                }
                solution.routes[route_idx] = super::RoutePlan::empty(driver);
            }
        }
    }

    removed
}

/// Cost of keeping `order_idx` where it is: distance from the neighbouring
/// stops to its pickup and delivery stops within the route.
fn local_insertion_cost(ctx: &MatchContext<'_>, solution: &Solution, order_idx: usize) -> f64 {
    let Some(route_idx) = solution.route_of(order_idx) else {
        return 0.0;
    };
    let route = &solution.routes[route_idx];
    let order_id = ctx.orders[order_idx].id;
    let mut cost = 0.0;
    for (pos, stop) in route.stops.iter().enumerate() {
        if stop.order != order_id {
            continue;
        }
        let prev = if pos == 0 {
            route.driver.position
        } else {
            route.stops[pos - 1].location
        };
        cost += ctx.distance_m(prev, stop.location);
        if let Some(next) = route.stops.get(pos + 1) {
            cost += ctx.distance_m(stop.location, next.location);
        }
    }
    cost
}

/// Reinsert the pool into eligible routes (drivers not in the order's
/// rejection set). Orders with no feasible placement become unassigned.
fn repair(
    ctx: &MatchContext<'_>,
    solution: &mut Solution,
    pool: BTreeSet<usize>,
    op: RepairOp,
    _rng: &mut StdRng,
) {
    match op {
        RepairOp::Greedy => {
            for order_idx in pool {
                if !insert_cheapest(ctx, solution, order_idx) {
                    solution.unassigned.insert(order_idx);
                }
            }
        }
        RepairOp::Regret => {
            let mut pending: Vec<usize> = pool.into_iter().collect();
            while !pending.is_empty() {
                // Largest regret (best minus second-best insertion cost)
                // goes first; an order with a single feasible placement is
                // maximally urgent.
                let mut chosen: Option<(f64, usize)> = None; // (regret, order)
                let mut infeasible: Vec<usize> = Vec::new();
                for &order_idx in &pending {
                    let mut deltas = insertion_deltas(ctx, solution, order_idx);
                    deltas.sort_by(|a, b| {
                        a.0.partial_cmp(&b.0).unwrap_or(std::cmp::Ordering::Equal)
                    });
                    let regret = match deltas.len() {
                        0 => {
                            infeasible.push(order_idx);
                            continue;
                        }
                        1 => f64::INFINITY,
                        _ => deltas[1].0 - deltas[0].0,
                    };
                    let better = match chosen {
                        None => true,
                        Some((best_regret, best_order)) => {
                            regret > best_regret
                                || (regret == best_regret && order_idx < best_order)
                        }
                    };
                    if better {
                        chosen = Some((regret, order_idx));
                    }
                }

                for order_idx in infeasible {
                    pending.retain(|&o| o != order_idx);
                    solution.unassigned.insert(order_idx);
                }
                let Some((_, order_idx)) = chosen else {
                    break;
                };
                pending.retain(|&o| o != order_idx);
                if !insert_cheapest(ctx, solution, order_idx) {
                    solution.unassigned.insert(order_idx);
                }
            }
        }
    }
}

/// All feasible `(duration delta, route index)` placements for an order.
fn insertion_deltas(
    ctx: &MatchContext<'_>,
    solution: &Solution,
    order_idx: usize,
) -> Vec<(f64, usize)> {
    let mut deltas = Vec::new();
    for (route_idx, route) in solution.routes.iter().enumerate() {
        if !ctx.orders[order_idx].accepts_driver(route.driver.id) {
            continue;
        }
        let mut candidate = route.orders.clone();
        candidate.push(order_idx);
        if let Some(rebuilt) = try_route(ctx, &route.driver, &candidate) {
            deltas.push((rebuilt.duration_s - route.duration_s, route_idx));
        }
    }
    deltas
}

/// Insert at the cheapest feasible placement; false when none exists.
fn insert_cheapest(ctx: &MatchContext<'_>, solution: &mut Solution, order_idx: usize) -> bool {
    let mut deltas = insertion_deltas(ctx, solution, order_idx);
    deltas.sort_by(|a, b| {
        a.0.partial_cmp(&b.0)
            .unwrap_or(std::cmp::Ordering::Equal)
            .then(a.1.cmp(&b.1))
    });
    let Some(&(_, route_idx)) = deltas.first() else {
        return false;
    };
    let mut candidate = solution.routes[route_idx].orders.clone();
    candidate.push(order_idx);
    match try_route(ctx, &solution.routes[route_idx].driver, &candidate) {
        Some(rebuilt) => {
            solution.routes[route_idx] = rebuilt;
            true
        }
        None => false,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::ManualClock;
    use crate::config::{OracleConfig, RouteConfig};
    use crate::distance::DistanceOracle;
    use crate::geo::GeoPoint;
    use crate::optimize::savings;
    use crate::snapshots::{DriverSnapshot, OrderSnapshot};
    use bevy_ecs::prelude::Entity;
    use std::collections::HashSet;
    use std::sync::Arc;

    fn oracle() -> DistanceOracle {
        DistanceOracle::haversine(Arc::new(ManualClock::new(0)), OracleConfig::default())
    }

    fn order(raw: u32, pickup_lat: f64, dropoff_lat: f64) -> OrderSnapshot {
        OrderSnapshot {
            id: Entity::from_raw(raw),
            pickup: GeoPoint::new(pickup_lat, 0.0).unwrap(),
            dropoff: GeoPoint::new(dropoff_lat, 0.0).unwrap(),
            effective_priority: 5.0,
            created_at_ms: raw as u64,
            rejected_drivers: HashSet::new(),
        }
    }

    fn driver(raw: u32, lat: f64, capacity: u32) -> DriverSnapshot {
        DriverSnapshot {
            id: Entity::from_raw(raw),
            position: GeoPoint::new(lat, 0.0).unwrap(),
            capacity,
        }
    }

    #[test]
    fn improvement_never_worsens_the_objective() {
        let orders = vec![
            order(1, 10.0, 11.0),
            order(2, 10.2, 11.2),
            order(3, 12.0, 13.0),
            order(4, 12.2, 13.2),
        ];
        let drivers = vec![driver(10, 10.0, 3), driver(11, 12.0, 3)];
        let oracle = oracle();
        let route_config = RouteConfig::default();
        let ctx = MatchContext {
            orders: &orders,
            oracle: &oracle,
            route_config: &route_config,
            depart_at_ms: 0,
        };

        let initial = savings::construct(&ctx, &drivers).unwrap();
        let initial_cost = initial.cost(10_000.0);
        let cfg = AlnsConfig {
            time_budget_ms: 500,
            max_stalled: 25,
            seed: 42,
            ..Default::default()
        };
        let improved = improve(&ctx, initial, &cfg);
        assert!(improved.cost(cfg.unassigned_penalty_s) <= initial_cost + 1e-6);
        // No order lost.
        assert_eq!(improved.assigned_count() + improved.unassigned.len(), 4);
    }

    #[test]
    fn rejection_sets_survive_improvement() {
        let d1 = driver(10, 10.0, 3);
        let d2 = driver(11, 10.1, 3);
        let mut o1 = order(1, 10.0, 11.0);
        o1.rejected_drivers.insert(d1.id);
        let orders = vec![o1, order(2, 10.2, 11.2), order(3, 10.4, 11.4)];
        let drivers = vec![d1, d2];
        let oracle = oracle();
        let route_config = RouteConfig::default();
        let ctx = MatchContext {
            orders: &orders,
            oracle: &oracle,
            route_config: &route_config,
            depart_at_ms: 0,
        };

        let initial = savings::construct(&ctx, &drivers).unwrap();
        let cfg = AlnsConfig {
            time_budget_ms: 300,
            max_stalled: 30,
            seed: 7,
            ..Default::default()
        };
        let improved = improve(&ctx, initial, &cfg);
        for route in &improved.routes {
            for &order_idx in &route.orders {
                assert!(orders[order_idx].accepts_driver(route.driver.id));
            }
        }
    }

    #[test]
    fn same_seed_same_result_under_stall_stop() {
        let orders = vec![order(1, 10.0, 11.0), order(2, 10.2, 11.2)];
        let drivers = vec![driver(10, 10.0, 3)];
        let oracle = oracle();
        let route_config = RouteConfig::default();
        let ctx = MatchContext {
            orders: &orders,
            oracle: &oracle,
            route_config: &route_config,
            depart_at_ms: 0,
        };
        // Generous wall budget so the stall criterion binds; the run is then
        // a pure function of the seed.
        let cfg = AlnsConfig {
            time_budget_ms: 60_000,
            max_stalled: 20,
            seed: 99,
            ..Default::default()
        };

        let initial = savings::construct(&ctx, &drivers).unwrap();
        let a = improve(&ctx, initial.clone(), &cfg);
        let b = improve(&ctx, initial, &cfg);
        assert_eq!(a.total_distance_m(), b.total_distance_m());
        assert_eq!(a.unassigned, b.unassigned);
    }
}
