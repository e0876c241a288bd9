//! Error taxonomy for the dispatch engine.
//!
//! Four groups, handled differently by callers:
//!
//! - **Input** (`NoOrders`, `NoDrivers`, `InvalidCoordinates`,
//!   `CoordinateOutOfRange`): caller bug or empty request; surfaced
//!   synchronously, never retried internally.
//! - **State** (`InvalidState`, `AlreadyAssigned`, `Expired`,
//!   `InvalidStatusTransition`): lifecycle preconditions; surfaced, never
//!   retried.
//! - **Constraint** (`NoFeasibleDraft`, `CapacityExceeded`,
//!   `PrecedenceViolated`): recoverable inside the draft orchestrator (try
//!   the next candidate), terminal in the offer lifecycle.
//! - **External** (`ProviderTimeout`, `ProviderRejected`): transient; the
//!   distance oracle retries once, then the caller skips the pair and logs.

use thiserror::Error;

use crate::ecs::DriverStatus;

#[derive(Debug, Clone, PartialEq, Error)]
pub enum DispatchError {
    #[error("no pending orders to match")]
    NoOrders,

    #[error("no available drivers to match")]
    NoDrivers,

    #[error("invalid coordinates: {0}")]
    InvalidCoordinates(String),

    #[error("coordinate out of range: {0}")]
    CoordinateOutOfRange(String),

    #[error("invalid state: {0}")]
    InvalidState(String),

    #[error("order already has a live assignment")]
    AlreadyAssigned,

    #[error("offer has expired")]
    Expired,

    #[error("invalid driver status transition {from:?} -> {to:?}")]
    InvalidStatusTransition {
        from: DriverStatus,
        to: DriverStatus,
    },

    #[error("no candidate draft satisfied the hard constraints")]
    NoFeasibleDraft,

    #[error("concurrent load {load} exceeds capacity {capacity}")]
    CapacityExceeded { load: u32, capacity: u32 },

    #[error("delivery precedes pickup in the stop sequence")]
    PrecedenceViolated,

    #[error("routing provider timed out")]
    ProviderTimeout,

    #[error("routing provider rejected the request: {0}")]
    ProviderRejected(String),

    #[error("persistence failure: {0}")]
    Persistence(String),
}

impl DispatchError {
    /// Transient failures may be retried or skipped; everything else is
    /// deterministic and must surface.
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            DispatchError::ProviderTimeout | DispatchError::ProviderRejected(_)
        )
    }

    /// Caller-input errors (4xx-equivalent).
    pub fn is_input(&self) -> bool {
        matches!(
            self,
            DispatchError::NoOrders
                | DispatchError::NoDrivers
                | DispatchError::InvalidCoordinates(_)
                | DispatchError::CoordinateOutOfRange(_)
        )
    }

    /// Lifecycle-state violations; never retried.
    pub fn is_state(&self) -> bool {
        matches!(
            self,
            DispatchError::InvalidState(_)
                | DispatchError::AlreadyAssigned
                | DispatchError::Expired
                | DispatchError::InvalidStatusTransition { .. }
        )
    }
}

pub type DispatchResult<T> = Result<T, DispatchError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn classification() {
        assert!(DispatchError::ProviderTimeout.is_transient());
        assert!(DispatchError::NoOrders.is_input());
        assert!(DispatchError::Expired.is_state());
        assert!(!DispatchError::NoFeasibleDraft.is_transient());
    }
}
