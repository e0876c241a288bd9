//! Matching loop: the top-level controller.
//!
//! A cycle runs up to `max_rounds` rounds. Each round loads Pending orders
//! and matchable drivers, releases stale Offered rows, partitions the
//! problem into regions, generates candidate drafts per region (in parallel
//! across the rayon pool), materialises the winning draft as offers, lets
//! the responder answer, sweeps expiries, and loops while any order still
//! needs reassignment.
//!
//! Order creation does not run matching inline: it enqueues a job on the
//! bounded [`MatchQueue`]. A full queue skips the enqueue rather than block
//! the ingestion path; at most one cycle drains per [`run_queued`] call.

use std::collections::VecDeque;
use std::time::Instant;

use bevy_ecs::prelude::{Entity, Resource, World};
use log::{info, warn};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use rayon::prelude::*;

use crate::clock::ClockHandle;
use crate::config::{
    AlnsConfig, DraftConfig, MatchingConfig, RegionConfig, RouteConfig, SimulationConfig,
};
use crate::distance::DistanceOracleHandle;
use crate::ecs::{AssignmentStatus, Order, OrderStatus};
use crate::error::DispatchResult;
use crate::offers;
use crate::optimize::draft::{self, DraftGroup, DraftMemory};
use crate::optimize::MatchContext;
use crate::regions::partition;
use crate::routes::PlannedRoute;
use crate::snapshots::{matchable_driver_snapshots, pending_order_snapshots};
use crate::telemetry::{CycleSummary, DispatchTelemetry, RouteReport};

/// Why a matching job was enqueued.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MatchTrigger {
    OrderCreated,
    OfferRejected,
    Manual,
}

#[derive(Debug, Clone, Copy)]
pub struct MatchJob {
    pub trigger: MatchTrigger,
    pub enqueued_at_ms: u64,
}

/// Bounded matching-job queue. Full means skip, never block.
#[derive(Debug, Resource)]
pub struct MatchQueue {
    jobs: VecDeque<MatchJob>,
    capacity: usize,
}

impl MatchQueue {
    pub fn new(capacity: usize) -> Self {
        Self {
            jobs: VecDeque::new(),
            capacity: capacity.max(1),
        }
    }

    pub fn try_enqueue(&mut self, job: MatchJob) -> bool {
        if self.jobs.len() >= self.capacity {
            return false;
        }
        self.jobs.push_back(job);
        true
    }

    pub fn pop(&mut self) -> Option<MatchJob> {
        self.jobs.pop_front()
    }

    pub fn len(&self) -> usize {
        self.jobs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.jobs.is_empty()
    }
}

impl Default for MatchQueue {
    fn default() -> Self {
        Self::new(MatchingConfig::default().queue_capacity)
    }
}

/// Enqueue a matching job; false when the queue is absent or full.
pub fn enqueue_match(world: &mut World, trigger: MatchTrigger) -> bool {
    let now = world.resource::<ClockHandle>().now_ms();
    let Some(mut queue) = world.get_resource_mut::<MatchQueue>() else {
        return false;
    };
    queue.try_enqueue(MatchJob {
        trigger,
        enqueued_at_ms: now,
    })
}

/// How a round's offers get answered before the expiry sweep.
/// `response_window_ms` is the configured wait budget; synchronous
/// responders ignore it, external ones bound their wait with it.
pub trait OfferResponder {
    fn respond(&mut self, world: &mut World, offers: &[Entity], response_window_ms: u64);
}

/// Live mode: responses arrive from outside between cycles; the round
/// makes no synchronous decisions.
#[derive(Debug, Default)]
pub struct NoResponder;

impl OfferResponder for NoResponder {
    fn respond(&mut self, _world: &mut World, _offers: &[Entity], _response_window_ms: u64) {}
}

/// Closed simulation mode: each offer is accepted with the configured
/// probability. When nothing got accepted and the guarantee flag is set,
/// the first offer is force-accepted so a closed run cannot livelock on
/// all-reject rounds.
#[derive(Debug)]
pub struct SimulatedResponder {
    config: SimulationConfig,
    calls: u64,
}

impl SimulatedResponder {
    pub fn new(config: SimulationConfig) -> Self {
        Self { config, calls: 0 }
    }
}

impl OfferResponder for SimulatedResponder {
    fn respond(&mut self, world: &mut World, offers: &[Entity], _response_window_ms: u64) {
        self.calls += 1;
        let mut rng = StdRng::seed_from_u64(self.config.seed.wrapping_add(self.calls));
        let mut decisions: Vec<(Entity, bool)> = offers
            .iter()
            .map(|&offer| (offer, rng.gen::<f64>() < self.config.accept_probability))
            .collect();
        if self.config.guarantee_one_acceptance
            && !decisions.is_empty()
            && decisions.iter().all(|(_, accepted)| !accepted)
        {
            decisions[0].1 = true;
        }
        for (offer, accepted) in decisions {
            let outcome = if accepted {
                offers::accept(world, offer)
            } else {
                offers::reject(world, offer, Some("simulated rejection".into()))
            };
            if let Err(err) = outcome {
                warn!("simulated response for {offer:?} failed: {err}");
            }
        }
    }
}

/// Run one matching cycle. Always returns a summary when the cycle itself
/// completes; a round that matches nothing is a success with an empty route
/// list, not an error.
pub fn run_cycle(
    world: &mut World,
    responder: &mut dyn OfferResponder,
    verbose: bool,
) -> DispatchResult<CycleSummary> {
    let started = Instant::now();
    let clock = world.resource::<ClockHandle>().clone();
    let matching_config = world
        .get_resource::<MatchingConfig>()
        .copied()
        .unwrap_or_default();
    let region_config = world
        .get_resource::<RegionConfig>()
        .copied()
        .unwrap_or_default();
    let route_config = world
        .get_resource::<RouteConfig>()
        .copied()
        .unwrap_or_default();
    let alns_config = world
        .get_resource::<AlnsConfig>()
        .copied()
        .unwrap_or_default();
    let draft_config = world
        .get_resource::<DraftConfig>()
        .cloned()
        .unwrap_or_default();
    let oracle = world.resource::<DistanceOracleHandle>().0.clone();

    // Fresh run, fresh draft memory.
    if let Some(mut memory) = world.get_resource_mut::<DraftMemory>() {
        memory.clear();
    }

    let mut offers_created = 0usize;
    let mut accepted = 0usize;
    let mut rejected = 0usize;
    let mut expired = 0usize;
    let mut rounds_run = 0u32;
    let mut latest_routes: Vec<PlannedRoute> = Vec::new();

    let mut round = 1u32;
    while round <= matching_config.max_rounds {
        // Step 1–2: load the matchable sets; stop when either is empty.
        let orders_probe = pending_order_snapshots(world);
        let drivers = matchable_driver_snapshots(world);
        if orders_probe.is_empty() || drivers.is_empty() {
            break;
        }

        // Step 3: clean slate — stale Offered rows go back to Pending so
        // the incoming draft recomputes sequences coherently.
        offers::release_offered(world);
        let orders = pending_order_snapshots(world);

        // Per-region candidate generation, fanned out over the rayon pool.
        let regions = partition(&orders, &drivers, &region_config);
        let depart_at_ms = clock.now_ms();
        let results: Vec<(usize, DispatchResult<Vec<DraftGroup>>)> = regions
            .par_iter()
            .enumerate()
            .map(|(region_idx, region)| {
                let ctx = MatchContext {
                    orders: &region.orders,
                    oracle: oracle.as_ref(),
                    route_config: &route_config,
                    depart_at_ms,
                };
                let prefix = format!("r{round}-g{region_idx}");
                (
                    region_idx,
                    draft::generate_candidates(
                        &ctx,
                        &region.drivers,
                        &draft_config,
                        &alns_config,
                        &prefix,
                    ),
                )
            })
            .collect();

        // Step 4: materialise every region's winner as offers; a failed
        // region skips (the round proceeds with fewer candidates). Sequence
        // numbers continue after the driver's live assignments so they stay
        // unique per driver over non-terminal orders.
        let sequence_base = live_sequence_base(world);
        let mut round_offers: Vec<Entity> = Vec::new();
        let mut round_routes: Vec<PlannedRoute> = Vec::new();
        for (region_idx, result) in results {
            let groups = match result {
                Ok(groups) => groups,
                Err(err) => {
                    warn!("region {region_idx} produced no draft: {err}");
                    continue;
                }
            };
            let winner = draft::selected(&groups).cloned();
            if let Some(mut memory) = world.get_resource_mut::<DraftMemory>() {
                for group in groups {
                    memory.record(group);
                }
            }
            let Some(winner) = winner else { continue };
            round_routes.extend(winner.routes.iter().cloned());

            for assignment in &winner.assignments {
                let mut assignment = assignment.clone();
                assignment.sequence += sequence_base
                    .get(&assignment.driver)
                    .copied()
                    .unwrap_or(0);
                let result =
                    match offers::rebuildable_assignment_for_order(world, assignment.order) {
                        Some(existing) => offers::rebuild_rejected(world, existing, &assignment)
                            .map(|()| existing),
                        None => offers::create_offered(world, &assignment, round),
                    };
                match result {
                    Ok(offer) => round_offers.push(offer),
                    Err(err) => warn!(
                        "offer for order {:?} not created: {err}",
                        assignment.order
                    ),
                }
            }
        }
        offers_created += round_offers.len();
        if !round_routes.is_empty() {
            latest_routes = round_routes;
        }

        // Step 5: responses (synchronous in closed simulation mode; external
        // responders bound their wait by the configured window).
        responder.respond(world, &round_offers, matching_config.response_window_ms);

        // Step 6: expiry sweep.
        let expired_now = offers::expire_stale(world);
        expired += expired_now.len();

        // Step 7: count outcomes; stop when nothing needs reassignment.
        let mut round_rejected = 0usize;
        for &offer in &round_offers {
            match world.get::<crate::ecs::Assignment>(offer).map(|a| a.status) {
                Some(AssignmentStatus::Accepted) => accepted += 1,
                Some(AssignmentStatus::Rejected) => round_rejected += 1,
                _ => {}
            }
        }
        rejected += round_rejected;
        rounds_run += 1;
        if let Some(mut telemetry) = world.get_resource_mut::<DispatchTelemetry>() {
            telemetry.rounds_run += 1;
        }

        let reassign_needed = round_rejected + expired_now.len();
        info!(
            "round {round}: {} offers, {round_rejected} rejected, {} expired",
            round_offers.len(),
            expired_now.len()
        );
        if reassign_needed == 0 {
            break;
        }
        round += 1;
    }

    if let Some(mut telemetry) = world.get_resource_mut::<DispatchTelemetry>() {
        telemetry.cycles_run += 1;
    }

    let remaining_pending: Vec<u64> = {
        let mut query = world.query::<(Entity, &Order)>();
        let mut ids: Vec<u64> = query
            .iter(world)
            .filter(|(_, order)| order.status == OrderStatus::Pending)
            .map(|(id, _)| id.to_bits())
            .collect();
        ids.sort_unstable();
        ids
    };

    let routes: Vec<RouteReport> = latest_routes
        .iter()
        .map(|route| RouteReport::from_planned(route, verbose))
        .collect();
    let total_distance_m = routes.iter().map(|r| r.distance_m).sum();

    Ok(CycleSummary {
        status: "ok",
        message: format!(
            "{accepted} accepted over {rounds_run} round(s), {} order(s) still pending",
            remaining_pending.len()
        ),
        rounds_run,
        routes,
        total_distance_m,
        offers_created,
        accepted,
        rejected,
        expired,
        remaining_pending,
        elapsed_ms: started.elapsed().as_millis() as u64,
        finished_at_ms: clock.now_ms(),
    })
}

/// Highest live (non-terminal) sequence number per driver; fresh offers
/// continue from there.
fn live_sequence_base(world: &mut World) -> std::collections::HashMap<Entity, u32> {
    let mut query = world.query::<&crate::ecs::Assignment>();
    let mut base: std::collections::HashMap<Entity, u32> = std::collections::HashMap::new();
    for assignment in query.iter(world) {
        if !assignment.status.is_terminal() {
            let entry = base.entry(assignment.driver).or_default();
            *entry = (*entry).max(assignment.sequence);
        }
    }
    base
}

/// Drain at most one queued matching job. Returns `None` when the queue is
/// absent or empty.
pub fn run_queued(
    world: &mut World,
    responder: &mut dyn OfferResponder,
    verbose: bool,
) -> Option<DispatchResult<CycleSummary>> {
    let _job = world.get_resource_mut::<MatchQueue>()?.pop()?;
    Some(run_cycle(world, responder, verbose))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn queue_is_bounded_and_fifo() {
        let mut queue = MatchQueue::new(2);
        assert!(queue.try_enqueue(MatchJob {
            trigger: MatchTrigger::OrderCreated,
            enqueued_at_ms: 1,
        }));
        assert!(queue.try_enqueue(MatchJob {
            trigger: MatchTrigger::OfferRejected,
            enqueued_at_ms: 2,
        }));
        // Full: skip, don't block.
        assert!(!queue.try_enqueue(MatchJob {
            trigger: MatchTrigger::Manual,
            enqueued_at_ms: 3,
        }));
        assert_eq!(queue.len(), 2);
        assert_eq!(queue.pop().unwrap().trigger, MatchTrigger::OrderCreated);
        assert_eq!(queue.pop().unwrap().trigger, MatchTrigger::OfferRejected);
        assert!(queue.pop().is_none());
    }
}
