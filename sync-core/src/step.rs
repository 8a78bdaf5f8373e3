//! Step values for peers and for the engine as a whole.
//!
//! Peer steps are totally ordered so that "how far along" questions reduce
//! to comparisons. The engine only relies on three facts about them: which
//! step is the early root-document load, which is retrying, and which is the
//! terminal synced step.

use serde::{Deserialize, Serialize};

/// Progress of a single peer, in lifecycle order.
///
/// `Retrying` sorts below `LoadingRootDoc`: a peer recovering from a
/// transient failure has not passed its load checkpoint.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PeerStep {
    /// Peer is not running.
    Stopped = 0,
    /// Peer hit a transient failure and is recovering.
    Retrying = 1,
    /// Peer is loading the shared root structure of the document.
    LoadingRootDoc = 2,
    /// Root structure is usable; peer is exchanging updates.
    Syncing = 3,
    /// Peer has converged with its storage.
    Synced = 4,
}

impl PeerStep {
    /// Check if the peer has passed its load checkpoint.
    pub fn is_past_root_load(self) -> bool {
        self > Self::LoadingRootDoc
    }

    /// Check if the peer is recovering from a transient failure.
    pub fn is_retrying(self) -> bool {
        self == Self::Retrying
    }

    /// Check if the peer reached the terminal synced step.
    pub fn is_synced(self) -> bool {
        self == Self::Synced
    }
}

/// Aggregate step of the whole engine.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EngineStep {
    /// No run is active and no peers exist.
    Stopped,
    /// A run is active and at least one peer slot is missing or not synced.
    Syncing,
    /// Every peer slot is populated and synced.
    Synced,
}
