//! Time source: millisecond-precision clock handles shared across the engine.
//!
//! All timestamps in the engine are **epoch milliseconds**. Components never
//! read the wall clock directly; they receive a [`ClockHandle`] so that tests
//! and the closed simulation mode can drive time manually.

use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{SystemTime, UNIX_EPOCH};

use bevy_ecs::prelude::Resource;

/// One second in milliseconds.
pub const ONE_SEC_MS: u64 = 1000;
/// One minute in milliseconds.
pub const ONE_MIN_MS: u64 = 60 * ONE_SEC_MS;
/// One hour in milliseconds.
pub const ONE_HOUR_MS: u64 = 60 * ONE_MIN_MS;
/// One day in milliseconds.
pub const ONE_DAY_MS: u64 = 24 * ONE_HOUR_MS;

/// Millisecond time source. Implementations must be cheap to query; the
/// optimiser polls its deadline on every iteration.
pub trait Clock: Send + Sync + fmt::Debug {
    /// Current time in epoch milliseconds.
    fn now_ms(&self) -> u64;
}

/// Wall-clock time source for live operation.
#[derive(Debug, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now_ms(&self) -> u64 {
        SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_millis() as u64)
            .unwrap_or(0)
    }
}

/// Manually advanced time source for tests and the closed simulation mode.
#[derive(Debug, Default)]
pub struct ManualClock {
    now: AtomicU64,
}

impl ManualClock {
    pub fn new(start_ms: u64) -> Self {
        Self {
            now: AtomicU64::new(start_ms),
        }
    }

    /// Advance time by `delta_ms`.
    pub fn advance(&self, delta_ms: u64) {
        self.now.fetch_add(delta_ms, Ordering::SeqCst);
    }

    /// Jump to an absolute timestamp.
    pub fn set(&self, now_ms: u64) {
        self.now.store(now_ms, Ordering::SeqCst);
    }
}

impl Clock for ManualClock {
    fn now_ms(&self) -> u64 {
        self.now.load(Ordering::SeqCst)
    }
}

/// Shared clock handle, stored as an ECS resource and cloned into every
/// component that needs the time (distance oracle, offer lifecycle, matching
/// loop).
#[derive(Clone, Resource)]
pub struct ClockHandle(pub Arc<dyn Clock>);

impl ClockHandle {
    /// Wall-clock handle.
    pub fn system() -> Self {
        Self(Arc::new(SystemClock))
    }

    /// Manually driven handle; the returned `Arc<ManualClock>` is the control
    /// side used to advance time.
    pub fn manual(start_ms: u64) -> (Self, Arc<ManualClock>) {
        let clock = Arc::new(ManualClock::new(start_ms));
        (Self(clock.clone()), clock)
    }

    pub fn now_ms(&self) -> u64 {
        self.0.now_ms()
    }
}

impl fmt::Debug for ClockHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("ClockHandle").field(&self.0.now_ms()).finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn manual_clock_advances() {
        let (handle, control) = ClockHandle::manual(1_000);
        assert_eq!(handle.now_ms(), 1_000);
        control.advance(ONE_MIN_MS);
        assert_eq!(handle.now_ms(), 1_000 + ONE_MIN_MS);
        control.set(5);
        assert_eq!(handle.now_ms(), 5);
    }

    #[test]
    fn system_clock_is_nonzero() {
        assert!(SystemClock.now_ms() > 0);
    }
}
