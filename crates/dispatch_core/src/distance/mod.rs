//! Distance oracle: cached road-network distances and durations.
//!
//! `get` answers a single ordered pair, `matrix` answers all pairs over a
//! point set. Both consult the TTL cache first and only then the routing
//! provider; provider failures are retried once (transient) and otherwise
//! surfaced so that callers can skip the offending pair.
//!
//! The oracle is shared across every matching flow. The get-then-insert
//! pattern on the cache is deliberately racy: duplicate concurrent fills
//! produce one harmless overwrite.

pub mod cache;
pub mod provider;

use std::ops::Deref;
use std::sync::Arc;

use bevy_ecs::prelude::Resource;
use log::{debug, warn};

use crate::clock::Clock;
use crate::config::OracleConfig;
use crate::error::{DispatchError, DispatchResult};
use crate::geo::GeoPoint;

pub use cache::{DistanceCache, DistanceEntry, DistanceKey};
pub use provider::{
    HaversineProvider, MatrixResponse, ProviderError, RouteProvider, RouteSummary, RoutingProfile,
};

/// All-pairs result. Pairs listed in `missing` could not be resolved by the
/// provider and carry the straight-line estimate instead; callers decide
/// whether that is tolerable.
#[derive(Debug, Clone)]
pub struct MatrixResult {
    pub distances_m: Vec<Vec<f64>>,
    pub durations_s: Vec<Vec<f64>>,
    pub missing: Vec<(usize, usize)>,
}

pub struct DistanceOracle {
    provider: Box<dyn RouteProvider>,
    cache: DistanceCache,
    clock: Arc<dyn Clock>,
    config: OracleConfig,
}

impl DistanceOracle {
    pub fn new(
        provider: Box<dyn RouteProvider>,
        clock: Arc<dyn Clock>,
        config: OracleConfig,
    ) -> Self {
        let cache = DistanceCache::new(config.cache_capacity, config.cache_ttl_ms);
        Self {
            provider,
            cache,
            clock,
            config,
        }
    }

    /// Oracle backed by the straight-line provider; deterministic, used by
    /// tests and as an offline fallback.
    pub fn haversine(clock: Arc<dyn Clock>, config: OracleConfig) -> Self {
        Self::new(Box::new(HaversineProvider), clock, config)
    }

    /// `(meters, seconds)` for one ordered pair. Cache first, then the
    /// provider with a single retry on transient failure.
    pub fn get(
        &self,
        from: GeoPoint,
        to: GeoPoint,
        profile: RoutingProfile,
    ) -> DispatchResult<(f64, f64)> {
        if from == to {
            return Ok((0.0, 0.0));
        }
        let now = self.clock.now_ms();
        let key = DistanceKey::canonical(from, to, profile);
        if let Some(entry) = self.cache.get(&key, now) {
            return Ok((entry.distance_m, entry.duration_s));
        }

        let summary = match self.provider.route(from, to, profile) {
            Ok(summary) => summary,
            Err(err) if err.is_transient() => {
                debug!("provider failed transiently ({err}), retrying once");
                self.provider.route(from, to, profile).map_err(DispatchError::from)?
            }
            Err(err) => return Err(err.into()),
        };

        // Best-effort write; a failure inside put is logged, never surfaced.
        self.cache.put(
            key,
            summary.distance_m,
            summary.duration_s,
            summary.geometry.clone(),
            now,
        );
        Ok((summary.distance_m, summary.duration_s))
    }

    /// Deterministic straight-line `(meters, seconds)` estimate.
    pub fn estimate(&self, from: GeoPoint, to: GeoPoint, profile: RoutingProfile) -> (f64, f64) {
        if from == to {
            return (0.0, 0.0);
        }
        HaversineProvider::pair(from, to, profile)
    }

    /// `get` with the straight-line fallback applied on provider failure.
    /// This is the entry point for optimiser hot paths, which must always
    /// obtain *some* cost and keep going.
    pub fn cost(&self, from: GeoPoint, to: GeoPoint, profile: RoutingProfile) -> (f64, f64) {
        match self.get(from, to, profile) {
            Ok(pair) => pair,
            Err(err) => {
                warn!("distance lookup failed ({err}); using straight-line estimate");
                self.estimate(from, to, profile)
            }
        }
    }

    /// All-pairs distances and durations over `points`. Cached pairs are
    /// served locally; the uncached remainder goes to the provider's matrix
    /// API in batches of at most `max_matrix_points`. Unresolvable pairs are
    /// estimate-filled and reported in `missing`.
    pub fn matrix(&self, points: &[GeoPoint], profile: RoutingProfile) -> MatrixResult {
        let n = points.len();
        let now = self.clock.now_ms();
        let mut distances = vec![vec![0.0; n]; n];
        let mut durations = vec![vec![0.0; n]; n];
        let mut uncached: Vec<(usize, usize)> = Vec::new();

        for i in 0..n {
            for j in (i + 1)..n {
                let key = DistanceKey::canonical(points[i], points[j], profile);
                if let Some(entry) = self.cache.get(&key, now) {
                    distances[i][j] = entry.distance_m;
                    distances[j][i] = entry.distance_m;
                    durations[i][j] = entry.duration_s;
                    durations[j][i] = entry.duration_s;
                } else {
                    uncached.push((i, j));
                }
            }
        }

        if uncached.is_empty() {
            return MatrixResult {
                distances_m: distances,
                durations_s: durations,
                missing: Vec::new(),
            };
        }

        // Batch the involved points through the provider matrix API.
        let mut involved: Vec<usize> = uncached
            .iter()
            .flat_map(|&(i, j)| [i, j])
            .collect();
        involved.sort_unstable();
        involved.dedup();

        let mut resolved: std::collections::HashSet<(usize, usize)> =
            std::collections::HashSet::new();
        for chunk in involved.chunks(self.config.max_matrix_points) {
            let chunk_points: Vec<GeoPoint> = chunk.iter().map(|&i| points[i]).collect();
            let response = match self.call_matrix(&chunk_points, profile) {
                Ok(response) => response,
                Err(err) => {
                    warn!("matrix batch failed ({err}); pairs fall back to estimates");
                    continue;
                }
            };
            for (ci, &pi) in chunk.iter().enumerate() {
                for (cj, &pj) in chunk.iter().enumerate() {
                    if ci == cj {
                        continue;
                    }
                    let (Some(d), Some(t)) = (
                        response.distances_m[ci][cj],
                        response.durations_s[ci][cj],
                    ) else {
                        continue;
                    };
                    distances[pi][pj] = d;
                    durations[pi][pj] = t;
                    resolved.insert((pi.min(pj), pi.max(pj)));
                    // Fire-and-forget cache fill for the canonical pair.
                    self.cache.put(
                        DistanceKey::canonical(points[pi], points[pj], profile),
                        d,
                        t,
                        None,
                        now,
                    );
                }
            }
        }

        let mut missing = Vec::new();
        for (i, j) in uncached {
            if resolved.contains(&(i, j)) {
                continue;
            }
            let (d, t) = self.estimate(points[i], points[j], profile);
            distances[i][j] = d;
            distances[j][i] = d;
            durations[i][j] = t;
            durations[j][i] = t;
            missing.push((i, j));
        }

        MatrixResult {
            distances_m: distances,
            durations_s: durations,
            missing,
        }
    }

    fn call_matrix(
        &self,
        points: &[GeoPoint],
        profile: RoutingProfile,
    ) -> Result<MatrixResponse, ProviderError> {
        match self.provider.matrix(points, profile) {
            Ok(response) => Ok(response),
            Err(err) if err.is_transient() => {
                debug!("matrix call failed transiently ({err}), retrying once");
                self.provider.matrix(points, profile)
            }
            Err(err) => Err(err),
        }
    }

    /// Crow-fly pre-filter applied before any external call when selecting
    /// nearby drivers.
    pub fn within_prefilter(&self, a: GeoPoint, b: GeoPoint) -> bool {
        a.haversine_km(&b) <= self.config.max_crowfly_km
    }

    /// Conditional delete of expired cache rows.
    pub fn purge_expired(&self) -> usize {
        self.cache.purge_expired(self.clock.now_ms())
    }

    pub fn cache_len(&self) -> usize {
        self.cache.len()
    }

    pub fn config(&self) -> &OracleConfig {
        &self.config
    }
}

/// Shared oracle handle, stored as an ECS resource.
#[derive(Clone, Resource)]
pub struct DistanceOracleHandle(pub Arc<DistanceOracle>);

impl DistanceOracleHandle {
    pub fn new(oracle: DistanceOracle) -> Self {
        Self(Arc::new(oracle))
    }
}

impl Deref for DistanceOracleHandle {
    type Target = DistanceOracle;

    fn deref(&self) -> &Self::Target {
        self.0.as_ref()
    }
}
