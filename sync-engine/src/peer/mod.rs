//! Peer abstraction for replica-sync.
//!
//! A peer synchronizes the shared document against one storage endpoint.
//! Its internals (delta exchange, retries, storage I/O) live outside the
//! engine; the engine only needs the narrow surface of the [`Peer`] trait:
//!
//! - `status()` / `on_status_change()` to aggregate progress
//! - `wait_for_loaded()` to gate remote startup on the local load
//! - `stop()` to tear the peer down when a run unwinds
//!
//! Peers are built through a [`PeerFactory`], which receives the document
//! and storage untouched from the engine.
//!
//! # Example
//!
//! ```ignore
//! let factory = MockPeerFactory::new();
//! let engine = SyncEngine::new(EngineConfig::default(), factory, doc, local, remotes);
//! engine.start();
//! ```

mod mock;

pub use mock::{MockPeer, MockPeerFactory};

use async_trait::async_trait;
use replica_sync_core::{Listener, PeerStatus, Subscription};
use std::fmt;
use std::sync::Arc;
use thiserror::Error;

use crate::abort::{AbortReason, AbortToken};

/// Which slot of the engine a peer fills.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum PeerRole {
    /// The durable local replica.
    Local,
    /// A remote replica, by index into the engine's remote storages.
    Remote(usize),
}

impl fmt::Display for PeerRole {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Local => f.write_str("local"),
            Self::Remote(index) => write!(f, "remote-{index}"),
        }
    }
}

/// Peer errors.
#[derive(Debug, Error)]
pub enum PeerError {
    /// The factory could not build a peer.
    #[error("failed to create {role} peer: {reason}")]
    CreateFailed {
        /// Slot the peer was meant to fill.
        role: PeerRole,
        /// Error message describing the failure.
        reason: String,
    },
}

/// One document synchronizing against one storage.
///
/// Implementations report transient storage failures as
/// [`PeerStep::Retrying`](replica_sync_core::PeerStep::Retrying) and retry on
/// their own schedule; the engine has no retry policy.
#[async_trait]
pub trait Peer: Send + Sync {
    /// The slot this peer fills.
    fn role(&self) -> PeerRole;

    /// Current status.
    fn status(&self) -> PeerStatus;

    /// Register a listener for status changes.
    ///
    /// The listener stays registered until the subscription is dropped.
    fn on_status_change(&self, listener: Listener<PeerStatus>) -> Subscription;

    /// Wait until the peer is past its load checkpoint.
    ///
    /// Fails with the token's reason if `abort` fires first.
    async fn wait_for_loaded(&self, abort: &AbortToken) -> Result<(), AbortReason>;

    /// Stop syncing and release storage resources. Idempotent.
    fn stop(&self);
}

/// Builds peers for the engine.
pub trait PeerFactory: Send + Sync + 'static {
    /// The shared document type.
    type Document: Send + Sync + 'static;
    /// The storage endpoint type, opaque to the engine.
    type Storage: Send + Sync + 'static;
    /// The peer type produced.
    type Peer: Peer + 'static;

    /// Build a peer for `role` over `doc` and `storage`.
    fn create_peer(
        &self,
        role: PeerRole,
        doc: &Arc<Self::Document>,
        storage: &Arc<Self::Storage>,
    ) -> Result<Self::Peer, PeerError>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn role_display() {
        assert_eq!(PeerRole::Local.to_string(), "local");
        assert_eq!(PeerRole::Remote(2).to_string(), "remote-2");
    }

    #[test]
    fn create_failed_message_names_role() {
        let err = PeerError::CreateFailed {
            role: PeerRole::Remote(0),
            reason: "endpoint unreachable".to_string(),
        };
        assert_eq!(
            err.to_string(),
            "failed to create remote-0 peer: endpoint unreachable"
        );
    }
}
