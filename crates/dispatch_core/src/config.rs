//! Engine configuration resources.
//!
//! Each component reads its own config resource; all carry `Default` impls
//! with the production values and explicit seeds for reproducibility.

use bevy_ecs::prelude::Resource;
use serde::{Deserialize, Serialize};

use crate::clock::{ONE_DAY_MS, ONE_MIN_MS, ONE_SEC_MS};
use crate::distance::provider::RoutingProfile;

/// Distance oracle: cache, provider timeout, and the crow-fly pre-filter.
#[derive(Debug, Clone, Copy, Resource, Serialize, Deserialize)]
pub struct OracleConfig {
    /// Cache entry time-to-live in ms.
    pub cache_ttl_ms: u64,
    /// Maximum number of cached pairs.
    pub cache_capacity: usize,
    /// Per-call provider timeout in ms.
    pub provider_timeout_ms: u64,
    /// Reject pairs beyond this great-circle distance before any external call.
    pub max_crowfly_km: f64,
    /// Maximum points per provider matrix call.
    pub max_matrix_points: usize,
}

impl Default for OracleConfig {
    fn default() -> Self {
        Self {
            cache_ttl_ms: 7 * ONE_DAY_MS,
            cache_capacity: 20_000,
            provider_timeout_ms: 5 * ONE_SEC_MS,
            max_crowfly_km: 100.0,
            max_matrix_points: 25,
        }
    }
}

/// Region partitioner: density clustering on order pickup points.
#[derive(Debug, Clone, Copy, Resource, Serialize, Deserialize)]
pub struct RegionConfig {
    /// Neighbourhood radius for clustering, in km.
    pub max_radius_km: f64,
    /// Minimum neighbours (seed included) to grow a cluster.
    pub min_points_per_region: usize,
}

impl Default for RegionConfig {
    fn default() -> Self {
        Self {
            max_radius_km: 50.0,
            min_points_per_region: 2,
        }
    }
}

/// Route builder: routing profile and per-stop service times.
#[derive(Debug, Clone, Copy, Resource, Serialize, Deserialize)]
pub struct RouteConfig {
    pub profile: RoutingProfile,
    /// Handling time at a pickup stop.
    pub pickup_service_ms: u64,
    /// Handling time at a delivery stop.
    pub delivery_service_ms: u64,
}

impl Default for RouteConfig {
    fn default() -> Self {
        Self {
            profile: RoutingProfile::Driving,
            pickup_service_ms: 5 * ONE_MIN_MS,
            delivery_service_ms: 3 * ONE_MIN_MS,
        }
    }
}

/// Adaptive large-neighbourhood search parameters.
#[derive(Debug, Clone, Copy, Resource, Serialize, Deserialize)]
pub struct AlnsConfig {
    /// Default time budget per run in ms (the orchestrator overrides this
    /// per candidate).
    pub time_budget_ms: u64,
    /// Stop after this many consecutive non-improving iterations.
    pub max_stalled: u32,
    /// Fraction of assigned orders removed per destroy step.
    pub destroy_fraction: f64,
    /// Objective penalty per unassigned order, in seconds.
    pub unassigned_penalty_s: f64,
    /// Initial annealing temperature as a fraction of the starting cost.
    pub initial_temperature_ratio: f64,
    /// Multiplicative cooling per iteration.
    pub cooling: f64,
    /// Weight multiplier for operators that produced a new best.
    pub reward: f64,
    /// Weight multiplier otherwise.
    pub decay: f64,
    /// Upper weight clamp.
    pub weight_cap: f64,
    pub seed: u64,
}

impl Default for AlnsConfig {
    fn default() -> Self {
        Self {
            time_budget_ms: 2 * ONE_SEC_MS,
            max_stalled: 50,
            destroy_fraction: 0.15,
            unassigned_penalty_s: 10_000.0,
            initial_temperature_ratio: 0.05,
            cooling: 0.995,
            reward: 1.5,
            decay: 0.95,
            weight_cap: 5.0,
            seed: 0,
        }
    }
}

/// Draft orchestrator: how many candidates and their ALNS budgets.
#[derive(Debug, Clone, Resource, Serialize, Deserialize)]
pub struct DraftConfig {
    /// Number of candidate drafts per run. The first is pure savings.
    pub candidates: usize,
    /// ALNS budgets (ms) for candidates 2..k.
    pub alns_budgets_ms: Vec<u64>,
    pub seed: u64,
}

impl Default for DraftConfig {
    fn default() -> Self {
        Self {
            candidates: 3,
            alns_budgets_ms: vec![2 * ONE_SEC_MS, 5 * ONE_SEC_MS],
            seed: 0,
        }
    }
}

/// Offer lifecycle timing.
#[derive(Debug, Clone, Copy, Resource, Serialize, Deserialize)]
pub struct OfferConfig {
    /// Offer time-to-live: expiry = now + ttl.
    pub offer_ttl_ms: u64,
}

impl Default for OfferConfig {
    fn default() -> Self {
        Self {
            offer_ttl_ms: 10 * ONE_MIN_MS,
        }
    }
}

/// Matching loop control.
#[derive(Debug, Clone, Copy, Resource, Serialize, Deserialize)]
pub struct MatchingConfig {
    /// Hard cap on rounds per cycle.
    pub max_rounds: u32,
    /// How long a round waits for external responses.
    pub response_window_ms: u64,
    /// Bounded matching-job queue capacity; a full queue skips the enqueue.
    pub queue_capacity: usize,
}

impl Default for MatchingConfig {
    fn default() -> Self {
        Self {
            max_rounds: 5,
            response_window_ms: 3 * ONE_MIN_MS,
            queue_capacity: 8,
        }
    }
}

/// Closed simulation mode: synchronous accept/reject of each offer, used
/// for load testing only.
#[derive(Debug, Clone, Copy, Resource, Serialize, Deserialize)]
pub struct SimulationConfig {
    /// Probability that a simulated driver accepts an offer.
    pub accept_probability: f64,
    /// Force at least one acceptance per round when any offer exists, so a
    /// closed run cannot livelock on all-reject rounds.
    pub guarantee_one_acceptance: bool,
    pub seed: u64,
}

impl Default for SimulationConfig {
    fn default() -> Self {
        Self {
            accept_probability: 0.8,
            guarantee_one_acceptance: true,
            seed: 0,
        }
    }
}
