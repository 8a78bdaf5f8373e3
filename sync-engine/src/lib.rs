//! # sync-engine
//!
//! Orchestration layer for replica-sync.
//!
//! This is the library applications use to keep one shared document
//! converging between a durable local replica and any number of remote
//! replicas.
//!
//! ## Features
//!
//! - **Local-first startup**: remote peers are only built once the local
//!   replica has loaded
//! - **Status aggregation**: one snapshot of every peer, pushed to listeners
//! - **Abortable waits**: wait for sync or load under a caller's [`AbortToken`]
//! - **Peer abstraction**: pluggable peers behind [`PeerFactory`] (mock included)
//! - **Pure State Machine**: uses sync-core for the run lifecycle
//!
//! ## Example
//!
//! ```ignore
//! use replica_sync_engine::{EngineConfig, SyncEngine};
//!
//! let engine = SyncEngine::new(EngineConfig::default(), factory, doc, local, remotes);
//! engine.start();
//!
//! // Usable once every replica has loaded the root document
//! engine.wait_for_loaded_root_doc(None).await?;
//!
//! // Flush local writes before going away
//! engine.stop_gracefully().await;
//! ```

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod abort;
pub mod config;
pub mod engine;
pub mod error;
pub mod peer;

pub use abort::{AbortReason, AbortToken};
pub use config::{ConfigError, EngineConfig};
pub use engine::SyncEngine;
pub use error::EngineError;
pub use peer::{MockPeer, MockPeerFactory, Peer, PeerError, PeerFactory, PeerRole};
pub use replica_sync_core::{
    EngineStatus, EngineStep, Listener, PeerStatus, PeerStep, Subscription,
};
