//! # Delivery Dispatch Core
//!
//! The matching and assignment engine for a last-mile delivery platform.
//!
//! ## Overview
//!
//! Given a pool of pending orders and available drivers, the engine
//! produces near-optimal pickup-and-delivery routes, proposes them as
//! offers that drivers accept or reject, and iterates with priority boosts
//! and per-order driver blacklists until every order is confirmed,
//! terminally unassignable, or cancelled.
//!
//! - **Distance Oracle**: cached road-network distances with a TTL cache
//!   and a crow-fly pre-filter
//! - **Region Partitioner**: density clustering for independent,
//!   parallelisable matching
//! - **Route Builder**: VRPPD stop sequencing under concurrent-load
//!   capacity
//! - **Optimiser**: Clarke-Wright savings construction followed by
//!   adaptive large-neighbourhood search
//! - **Offer Lifecycle**: the Offered→Accepted/Rejected/Expired state
//!   machine with expiry sweeps and priority-boosted retries
//! - **Matching Loop**: the round-based controller tying it all together
//!
//! ## Key Concepts
//!
//! - **ECS storage**: orders, drivers and assignments are entities in a
//!   `bevy_ecs::World`; cross-references are `Entity` handles
//! - **Deterministic**: every stochastic choice runs on a seeded RNG, so
//!   identical inputs and seeds reproduce identical drafts
//! - **Injected dependencies**: components receive the clock, the distance
//!   oracle and the store as handles; tests stub all three
//!
//! ## Example
//!
//! ```rust,no_run
//! use dispatch_core::fixtures::{build_world, spawn_scenario, ScenarioParams};
//! use dispatch_core::matching::{run_cycle, SimulatedResponder};
//! use dispatch_core::config::SimulationConfig;
//!
//! let (mut world, _clock) = build_world(0);
//! spawn_scenario(&mut world, &ScenarioParams::default());
//!
//! let mut responder = SimulatedResponder::new(SimulationConfig::default());
//! let summary = run_cycle(&mut world, &mut responder, false).expect("cycle");
//! println!("{} accepted", summary.accepted);
//! ```

pub mod clock;
pub mod config;
pub mod distance;
pub mod ecs;
pub mod error;
pub mod geo;
pub mod matching;
pub mod offers;
pub mod optimize;
pub mod regions;
pub mod routes;
pub mod snapshots;
pub mod spatial_index;
pub mod store;
pub mod telemetry;
pub mod timewindow;

#[cfg(feature = "fixtures")]
pub mod fixtures;
