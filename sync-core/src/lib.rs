//! # sync-core
//!
//! Pure logic for replica-sync (no I/O, instant tests).
//!
//! This crate holds the values and state machines the sync engine is built
//! from, without any async runtime, network or disk access.
//!
//! ## Design Philosophy
//!
//! All modules in this crate are **pure** - they take input and produce output
//! without side effects. This enables:
//! - Instant unit tests (no mocks, no async)
//! - Deterministic behavior (same input → same output)
//! - Easy reasoning about state transitions
//!
//! The actual orchestration (spawning runs, building peers, awaiting
//! checkpoints) is performed by `sync-engine`, which interprets the actions
//! produced by these state machines.

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod events;
pub mod state;
pub mod status;
pub mod step;

pub use events::{Listener, Listeners, Subscription};
pub use state::{RunAction, RunEvent, RunPhase};
pub use status::{EngineStatus, PeerStatus};
pub use step::{EngineStep, PeerStep};
