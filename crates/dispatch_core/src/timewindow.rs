//! Time-window oracle: estimated-arrival bounds attached to offers.
//!
//! Two implementations behind one trait: a coefficient-of-variation
//! heuristic and a sample-average-approximation variant that bootstraps
//! historical segment observations. The window is written once at offer
//! creation and never mutated; its bounds feed the driver-facing ETA but do
//! not alter any matching invariant.

use std::collections::HashMap;
use std::ops::Deref;
use std::sync::Arc;

use bevy_ecs::prelude::Resource;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

use crate::clock::ONE_SEC_MS;
use crate::ecs::{CalculationMethod, TimeWindow};
use crate::geo::{canonical_cell_pair, GeoPoint, GridCell};

/// Two-sided z value for a 90% interval.
const Z_90: f64 = 1.645;

/// Append-only store of observed segment travel times, keyed by the same
/// canonical grid-cell pairs as the distance cache.
#[derive(Debug, Default, Resource)]
pub struct SegmentObservations {
    samples: HashMap<(GridCell, GridCell), Vec<f64>>,
}

impl SegmentObservations {
    pub fn record(&mut self, from: GeoPoint, to: GeoPoint, duration_s: f64) {
        if !duration_s.is_finite() || duration_s < 0.0 {
            return;
        }
        self.samples
            .entry(canonical_cell_pair(from, to))
            .or_default()
            .push(duration_s);
    }

    pub fn samples(&self, from: GeoPoint, to: GeoPoint) -> &[f64] {
        self.samples
            .get(&canonical_cell_pair(from, to))
            .map(|v| v.as_slice())
            .unwrap_or(&[])
    }

    pub fn segment_count(&self) -> usize {
        self.samples.len()
    }
}

pub trait TimeWindowOracle: Send + Sync {
    /// Window around `expected_arrival_ms` for a final leg of
    /// `leg_duration_s`, given historical duration samples for that leg
    /// (possibly empty).
    fn window(
        &self,
        expected_arrival_ms: u64,
        leg_duration_s: f64,
        samples: &[f64],
    ) -> TimeWindow;
}

/// Fixed coefficient-of-variation heuristic: width scales with the leg
/// duration, no history required.
#[derive(Debug, Clone, Copy)]
pub struct HeuristicTimeWindows {
    pub cv: f64,
    pub confidence: f64,
}

impl Default for HeuristicTimeWindows {
    fn default() -> Self {
        Self {
            cv: 0.25,
            confidence: 0.9,
        }
    }
}

impl TimeWindowOracle for HeuristicTimeWindows {
    fn window(
        &self,
        expected_arrival_ms: u64,
        leg_duration_s: f64,
        _samples: &[f64],
    ) -> TimeWindow {
        let std_s = self.cv * leg_duration_s.max(0.0);
        let half_ms = (Z_90 * std_s * ONE_SEC_MS as f64) as u64;
        let earliest_ms = expected_arrival_ms.saturating_sub(half_ms);
        let latest_ms = expected_arrival_ms.saturating_add(half_ms);
        TimeWindow {
            earliest_ms,
            latest_ms,
            expected_arrival_ms,
            width_ms: latest_ms - earliest_ms,
            confidence: self.confidence,
            violation_probability: 1.0 - self.confidence,
            early_penalty: 1.0,
            late_penalty: 2.0,
            method: CalculationMethod::SimpleHeuristic,
        }
    }
}

/// Sample-average approximation: bootstrap-resample the observed durations
/// and take the interval quantiles. Falls back to the heuristic when too
/// little history exists.
#[derive(Debug, Clone, Copy)]
pub struct SaaTimeWindows {
    pub sample_count: u32,
    pub confidence: f64,
    /// Below this many observations the heuristic is used instead.
    pub min_observations: usize,
    pub seed: u64,
}

impl Default for SaaTimeWindows {
    fn default() -> Self {
        Self {
            sample_count: 200,
            confidence: 0.9,
            min_observations: 8,
            seed: 0,
        }
    }
}

impl TimeWindowOracle for SaaTimeWindows {
    fn window(
        &self,
        expected_arrival_ms: u64,
        leg_duration_s: f64,
        samples: &[f64],
    ) -> TimeWindow {
        if samples.len() < self.min_observations {
            return HeuristicTimeWindows {
                cv: 0.25,
                confidence: self.confidence,
            }
            .window(expected_arrival_ms, leg_duration_s, samples);
        }

        let mut rng = StdRng::seed_from_u64(self.seed.wrapping_add(samples.len() as u64));
        let mut draws: Vec<f64> = (0..self.sample_count)
            .map(|_| samples[rng.gen_range(0..samples.len())])
            .collect();
        draws.sort_by(|a, b| a.partial_cmp(b).unwrap_or(std::cmp::Ordering::Equal));

        let mean = draws.iter().sum::<f64>() / draws.len() as f64;
        let var = draws.iter().map(|d| (d - mean).powi(2)).sum::<f64>() / draws.len() as f64;
        let std_dev_s = var.sqrt();
        let cv = if mean > 0.0 { std_dev_s / mean } else { 0.0 };

        let tail = (1.0 - self.confidence) / 2.0;
        let lo = quantile(&draws, tail);
        let hi = quantile(&draws, 1.0 - tail);

        // The window shifts the expected arrival by the sampled deviation
        // from the planned leg duration.
        let base_ms = expected_arrival_ms as f64 - leg_duration_s * ONE_SEC_MS as f64;
        let earliest_ms = (base_ms + lo * ONE_SEC_MS as f64).max(0.0) as u64;
        let latest_ms = (base_ms + hi * ONE_SEC_MS as f64).max(0.0) as u64;
        TimeWindow {
            earliest_ms,
            latest_ms: latest_ms.max(earliest_ms),
            expected_arrival_ms,
            width_ms: latest_ms.saturating_sub(earliest_ms),
            confidence: self.confidence,
            violation_probability: 1.0 - self.confidence,
            early_penalty: 1.0,
            late_penalty: 2.0,
            method: CalculationMethod::StochasticSaa {
                sample_count: self.sample_count,
                std_dev_s,
                cv,
            },
        }
    }
}

fn quantile(sorted: &[f64], q: f64) -> f64 {
    if sorted.is_empty() {
        return 0.0;
    }
    let idx = ((sorted.len() - 1) as f64 * q.clamp(0.0, 1.0)).round() as usize;
    sorted[idx]
}

/// Shared time-window oracle handle, stored as an ECS resource.
#[derive(Clone, Resource)]
pub struct TimeWindowOracleHandle(pub Arc<dyn TimeWindowOracle>);

impl TimeWindowOracleHandle {
    pub fn heuristic() -> Self {
        Self(Arc::new(HeuristicTimeWindows::default()))
    }

    pub fn saa(seed: u64) -> Self {
        Self(Arc::new(SaaTimeWindows {
            seed,
            ..Default::default()
        }))
    }
}

impl Deref for TimeWindowOracleHandle {
    type Target = dyn TimeWindowOracle;

    fn deref(&self) -> &Self::Target {
        self.0.as_ref()
    }
}
