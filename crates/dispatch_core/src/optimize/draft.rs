//! Draft orchestrator: run k candidate constructions, validate the VRPPD,
//! capacity and rejection constraints, and keep the cheapest feasible one.
//!
//! Candidate 0 is pure savings; the rest are savings followed by ALNS with
//! increasing time budgets. Candidates run in parallel on the rayon pool
//! and are reported into [`DraftMemory`], which is cleared at the start of
//! every matching run.

use std::collections::{BTreeSet, HashMap};
use std::time::Instant;

use bevy_ecs::prelude::{Entity, Resource};
use log::debug;
use rayon::prelude::*;

use crate::config::{AlnsConfig, DraftConfig};
use crate::error::{DispatchError, DispatchResult};
use crate::routes::{PlannedRoute, StopKind};
use crate::snapshots::DriverSnapshot;

use super::{alns, savings, MatchContext, Solution};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AlgorithmTag {
    Savings,
    Alns,
}

impl AlgorithmTag {
    pub fn as_str(&self) -> &'static str {
        match self {
            AlgorithmTag::Savings => "savings",
            AlgorithmTag::Alns => "alns",
        }
    }
}

/// Hard constraints checked on every candidate.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum ConstraintKind {
    VrppdTiming,
    Capacity,
    Rejection,
}

/// One (order, driver) placement inside a candidate draft.
#[derive(Debug, Clone)]
pub struct DraftAssignment {
    pub order: Entity,
    pub driver: Entity,
    /// 1-based position within the driver's route, ordered by pickup time.
    pub sequence: u32,
    pub estimated_pickup_ms: u64,
    pub estimated_delivery_ms: u64,
    pub pickup_leg_m: f64,
    pub delivery_leg_m: f64,
    pub pickup_leg_duration_s: f64,
}

/// A candidate solution produced by one construction.
#[derive(Debug, Clone)]
pub struct DraftGroup {
    /// Lexicographically comparable id; the final selection tie-break.
    pub session: String,
    pub algorithm: AlgorithmTag,
    pub assignments: Vec<DraftAssignment>,
    pub routes: Vec<PlannedRoute>,
    pub unassigned: Vec<Entity>,
    pub total_distance_m: f64,
    pub total_duration_s: f64,
    pub computed_in_ms: u64,
    /// Fraction of orders the draft managed to place, 0.0–1.0.
    pub quality_score: f64,
    pub constraints_violated: BTreeSet<ConstraintKind>,
    pub selected: bool,
}

impl DraftGroup {
    pub fn is_feasible(&self) -> bool {
        self.constraints_violated.is_empty()
    }
}

/// Per-run candidate store. Not shared across runs; cleared at run start.
#[derive(Debug, Default, Resource)]
pub struct DraftMemory {
    pub groups: Vec<DraftGroup>,
}

impl DraftMemory {
    pub fn clear(&mut self) {
        self.groups.clear();
    }

    pub fn record(&mut self, group: DraftGroup) {
        self.groups.push(group);
    }

    pub fn selected(&self) -> Option<&DraftGroup> {
        self.groups.iter().find(|g| g.selected)
    }
}

/// Convert a working solution into a draft group with sequences, timing
/// estimates and insertion metadata.
pub fn from_solution(
    ctx: &MatchContext<'_>,
    session: String,
    algorithm: AlgorithmTag,
    solution: &Solution,
    computed_in_ms: u64,
) -> DraftGroup {
    let builder = ctx.builder();
    let mut assignments = Vec::new();
    let mut routes = Vec::new();
    let mut total_distance_m = 0.0;
    let mut total_duration_s = 0.0;

    for plan in solution.routes.iter().filter(|r| !r.is_empty()) {
        let timed = builder.time_stops(
            plan.driver.id,
            plan.driver.position,
            ctx.depart_at_ms,
            plan.stops.clone(),
        );
        let times = timed.order_times();
        let legs = timed.order_leg_distances();

        // Pickup leg durations, keyed by order.
        let mut pickup_durations: HashMap<Entity, f64> = HashMap::new();
        for (stop, timing) in timed.stops.iter().zip(&timed.timings) {
            if stop.kind == StopKind::Pickup {
                pickup_durations.insert(stop.order, timing.leg_duration_s);
            }
        }

        // Sequence numbers follow the pickup order within the route.
        let mut route_orders: Vec<Entity> = times.keys().copied().collect();
        route_orders.sort_by_key(|order| times[order].0);
        for (pos, order) in route_orders.iter().enumerate() {
            let (estimated_pickup_ms, estimated_delivery_ms) = times[order];
            let (pickup_leg_m, delivery_leg_m) = legs.get(order).copied().unwrap_or((0.0, 0.0));
            assignments.push(DraftAssignment {
                order: *order,
                driver: plan.driver.id,
                sequence: (pos + 1) as u32,
                estimated_pickup_ms,
                estimated_delivery_ms,
                pickup_leg_m,
                delivery_leg_m,
                pickup_leg_duration_s: pickup_durations.get(order).copied().unwrap_or(0.0),
            });
        }

        total_distance_m += timed.total_distance_m;
        total_duration_s += timed.total_duration_s;
        routes.push(timed);
    }

    let unassigned: Vec<Entity> = solution
        .unassigned
        .iter()
        .map(|&i| ctx.orders[i].id)
        .collect();
    let total_orders = ctx.orders.len().max(1);
    let quality_score = (total_orders - unassigned.len()) as f64 / total_orders as f64;

    DraftGroup {
        session,
        algorithm,
        assignments,
        routes,
        unassigned,
        total_distance_m,
        total_duration_s,
        computed_in_ms,
        quality_score,
        constraints_violated: BTreeSet::new(),
        selected: false,
    }
}

/// Record every violated hard constraint on the candidate. Violations do
/// not discard the candidate here; selection skips infeasible candidates
/// unless every candidate failed.
pub fn validate(
    ctx: &MatchContext<'_>,
    group: &mut DraftGroup,
    capacities: &HashMap<Entity, u32>,
) {
    let orders_by_id: HashMap<Entity, &crate::snapshots::OrderSnapshot> =
        ctx.orders.iter().map(|o| (o.id, o)).collect();

    // VRPPD timing: pickup strictly precedes delivery, and within a route
    // the sequence order matches strictly increasing pickup times.
    let mut by_driver: HashMap<Entity, Vec<&DraftAssignment>> = HashMap::new();
    for assignment in &group.assignments {
        if assignment.estimated_pickup_ms >= assignment.estimated_delivery_ms {
            group.constraints_violated.insert(ConstraintKind::VrppdTiming);
        }
        by_driver.entry(assignment.driver).or_default().push(assignment);
    }
    for assignments in by_driver.values_mut() {
        assignments.sort_by_key(|a| a.sequence);
        for pair in assignments.windows(2) {
            if pair[0].estimated_pickup_ms >= pair[1].estimated_pickup_ms {
                group.constraints_violated.insert(ConstraintKind::VrppdTiming);
            }
        }
    }

    // Capacity: concurrent load along each route.
    for route in &group.routes {
        let capacity = capacities.get(&route.driver).copied().unwrap_or(1);
        if route.peak_load() > capacity {
            group.constraints_violated.insert(ConstraintKind::Capacity);
        }
    }

    // Rejection: no placement may name a blacklisted driver.
    for assignment in &group.assignments {
        if let Some(order) = orders_by_id.get(&assignment.order) {
            if !order.accepts_driver(assignment.driver) {
                group.constraints_violated.insert(ConstraintKind::Rejection);
            }
        }
    }
}

/// Generate k candidates, validate them all, and mark exactly one winner.
/// Returns the full candidate list (winner flagged `selected`) so the
/// caller can archive it into [`DraftMemory`].
pub fn generate_candidates(
    ctx: &MatchContext<'_>,
    drivers: &[DriverSnapshot],
    draft_config: &DraftConfig,
    alns_config: &AlnsConfig,
    session_prefix: &str,
) -> DispatchResult<Vec<DraftGroup>> {
    if ctx.orders.is_empty() {
        return Err(DispatchError::NoOrders);
    }
    if drivers.is_empty() {
        return Err(DispatchError::NoDrivers);
    }

    let capacities: HashMap<Entity, u32> =
        drivers.iter().map(|d| (d.id, d.capacity)).collect();

    let candidate_count = draft_config.candidates.max(1);
    let specs: Vec<(usize, Option<u64>)> = (0..candidate_count)
        .map(|idx| {
            if idx == 0 {
                (idx, None)
            } else {
                let budget = draft_config
                    .alns_budgets_ms
                    .get(idx - 1)
                    .or(draft_config.alns_budgets_ms.last())
                    .copied()
                    .unwrap_or(alns_config.time_budget_ms);
                (idx, Some(budget))
            }
        })
        .collect();

    let mut groups: Vec<DraftGroup> = specs
        .into_par_iter()
        .map(|(idx, budget)| -> DispatchResult<DraftGroup> {
            let started = Instant::now();
            let constructed = savings::construct(ctx, drivers)?;
            let (solution, tag) = match budget {
                None => (constructed, AlgorithmTag::Savings),
                Some(budget_ms) => {
                    let cfg = AlnsConfig {
                        time_budget_ms: budget_ms,
                        seed: alns_config.seed.wrapping_add(idx as u64),
                        ..*alns_config
                    };
                    (alns::improve(ctx, constructed, &cfg), AlgorithmTag::Alns)
                }
            };
            let computed_in_ms = started.elapsed().as_millis() as u64;
            let session = format!("{session_prefix}-c{idx}");
            let mut group = from_solution(ctx, session, tag, &solution, computed_in_ms);
            validate(ctx, &mut group, &capacities);
            Ok(group)
        })
        .collect::<DispatchResult<Vec<_>>>()?;

    // Cheapest feasible candidate wins: fewest unplaced orders, then total
    // travel time, then distance, then lexicographic session id.
    let winner = groups
        .iter()
        .enumerate()
        .filter(|(_, g)| g.is_feasible())
        .min_by(|(_, a), (_, b)| {
            a.unassigned
                .len()
                .cmp(&b.unassigned.len())
                .then(
                    a.total_duration_s
                        .partial_cmp(&b.total_duration_s)
                        .unwrap_or(std::cmp::Ordering::Equal),
                )
                .then(
                    a.total_distance_m
                        .partial_cmp(&b.total_distance_m)
                        .unwrap_or(std::cmp::Ordering::Equal),
                )
                .then(a.session.cmp(&b.session))
        })
        .map(|(idx, _)| idx);

    let Some(winner) = winner else {
        return Err(DispatchError::NoFeasibleDraft);
    };
    groups[winner].selected = true;
    debug!(
        "draft winner {} ({}, {:.0} s travel, {} unassigned)",
        groups[winner].session,
        groups[winner].algorithm.as_str(),
        groups[winner].total_duration_s,
        groups[winner].unassigned.len()
    );
    Ok(groups)
}

/// The winning candidate out of [`generate_candidates`] output.
pub fn selected(groups: &[DraftGroup]) -> Option<&DraftGroup> {
    groups.iter().find(|g| g.selected)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::ManualClock;
    use crate::config::{OracleConfig, RouteConfig};
    use crate::distance::DistanceOracle;
    use crate::geo::GeoPoint;
    use crate::snapshots::OrderSnapshot;
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

    fn test_configs() -> (DraftConfig, AlnsConfig) {
        (
            DraftConfig {
                candidates: 3,
                alns_budgets_ms: vec![200, 400],
                seed: 1,
            },
            AlnsConfig {
                max_stalled: 20,
                seed: 1,
                ..Default::default()
            },
        )
    }

    #[test]
    fn exactly_one_winner_is_selected() {
        let orders = vec![order(1, 10.0, 11.0), order(2, 12.0, 13.0)];
        let drivers = vec![driver(10, 10.0, 3), driver(11, 12.0, 3)];
        let oracle = oracle();
        let route_config = RouteConfig::default();
        let ctx = MatchContext {
            orders: &orders,
            oracle: &oracle,
            route_config: &route_config,
            depart_at_ms: 0,
        };
        let (draft_config, alns_config) = test_configs();

        let groups =
            generate_candidates(&ctx, &drivers, &draft_config, &alns_config, "run1").unwrap();
        assert_eq!(groups.len(), 3);
        assert_eq!(groups.iter().filter(|g| g.selected).count(), 1);
        assert_eq!(groups[0].algorithm, AlgorithmTag::Savings);
        assert_eq!(groups[1].algorithm, AlgorithmTag::Alns);

        let winner = selected(&groups).unwrap();
        assert!(winner.is_feasible());
        // Both orders placed somewhere.
        assert_eq!(winner.assignments.len(), 2);
        // Sequences are 1-based and per-driver unique.
        for route_driver in winner.assignments.iter().map(|a| a.driver) {
            let mut seqs: Vec<u32> = winner
                .assignments
                .iter()
                .filter(|a| a.driver == route_driver)
                .map(|a| a.sequence)
                .collect();
            seqs.sort_unstable();
            for (i, seq) in seqs.iter().enumerate() {
                assert_eq!(*seq, (i + 1) as u32);
            }
        }
    }

    #[test]
    fn empty_inputs_propagate_input_errors() {
        let oracle = oracle();
        let route_config = RouteConfig::default();
        let orders = vec![order(1, 10.0, 11.0)];
        let (draft_config, alns_config) = test_configs();

        let no_orders = MatchContext {
            orders: &[],
            oracle: &oracle,
            route_config: &route_config,
            depart_at_ms: 0,
        };
        assert_eq!(
            generate_candidates(&no_orders, &[driver(10, 10.0, 3)], &draft_config, &alns_config, "x")
                .unwrap_err(),
            DispatchError::NoOrders
        );

        let no_drivers = MatchContext {
            orders: &orders,
            oracle: &oracle,
            route_config: &route_config,
            depart_at_ms: 0,
        };
        assert_eq!(
            generate_candidates(&no_drivers, &[], &draft_config, &alns_config, "x").unwrap_err(),
            DispatchError::NoDrivers
        );
    }

    #[test]
    fn validate_flags_rejection_pairing() {
        let d = driver(10, 10.0, 3);
        let mut o = order(1, 10.0, 11.0);
        o.rejected_drivers.insert(d.id);
        let orders = vec![o];
        let oracle = oracle();
        let route_config = RouteConfig::default();
        let ctx = MatchContext {
            orders: &orders,
            oracle: &oracle,
            route_config: &route_config,
            depart_at_ms: 0,
        };

        // Hand-build a draft that illegally pairs the order with the driver.
        let mut group = DraftGroup {
            session: "bad-c0".into(),
            algorithm: AlgorithmTag::Savings,
            assignments: vec![DraftAssignment {
                order: orders[0].id,
                driver: d.id,
                sequence: 1,
                estimated_pickup_ms: 1_000,
                estimated_delivery_ms: 2_000,
                pickup_leg_m: 0.0,
                delivery_leg_m: 0.0,
                pickup_leg_duration_s: 0.0,
            }],
            routes: Vec::new(),
            unassigned: Vec::new(),
            total_distance_m: 0.0,
            total_duration_s: 0.0,
            computed_in_ms: 0,
            quality_score: 1.0,
            constraints_violated: BTreeSet::new(),
            selected: false,
        };
        let capacities = HashMap::from([(d.id, 3)]);
        validate(&ctx, &mut group, &capacities);
        assert!(group.constraints_violated.contains(&ConstraintKind::Rejection));
    }

    #[test]
    fn deterministic_given_same_seed() {
        let orders = vec![order(1, 10.0, 11.0), order(2, 10.2, 11.2), order(3, 12.0, 13.0)];
        let drivers = vec![driver(10, 10.0, 3), driver(11, 12.0, 3)];
        let oracle = oracle();
        let route_config = RouteConfig::default();
        let ctx = MatchContext {
            orders: &orders,
            oracle: &oracle,
            route_config: &route_config,
            depart_at_ms: 0,
        };
        // Budgets generous enough that the stall criterion stops ALNS.
        let draft_config = DraftConfig {
            candidates: 2,
            alns_budgets_ms: vec![60_000],
            seed: 5,
        };
        let alns_config = AlnsConfig {
            max_stalled: 15,
            seed: 5,
            ..Default::default()
        };

        let a = generate_candidates(&ctx, &drivers, &draft_config, &alns_config, "g").unwrap();
        let b = generate_candidates(&ctx, &drivers, &draft_config, &alns_config, "g").unwrap();
        let wa = selected(&a).unwrap();
        let wb = selected(&b).unwrap();
        assert_eq!(wa.session, wb.session);
        assert_eq!(wa.total_distance_m, wb.total_distance_m);
        let pairs = |g: &DraftGroup| {
            let mut v: Vec<(Entity, Entity)> =
                g.assignments.iter().map(|a| (a.order, a.driver)).collect();
            v.sort();
            v
        };
        assert_eq!(pairs(wa), pairs(wb));
    }
}
