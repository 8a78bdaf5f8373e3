//! Peer and engine status snapshots.
//!
//! [`EngineStatus::from_peers`] is the single aggregation rule: it turns the
//! current peer slots into the snapshot the engine publishes. Everything here
//! is a plain value; the engine decides when to recompute and where to send
//! the result.

use serde::{Deserialize, Serialize};

use crate::step::{EngineStep, PeerStep};

/// Status reported by one peer.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PeerStatus {
    /// Current step of the peer.
    pub step: PeerStep,
    /// Documents the peer is responsible for.
    pub total_docs: u32,
    /// Documents whose initial load has finished.
    pub loaded_docs: u32,
    /// Updates received from storage but not yet applied.
    pub pending_pull_updates: u32,
    /// Local updates not yet written to storage.
    pub pending_push_updates: u32,
}

impl PeerStatus {
    /// Create a status at the given step with all counters at zero.
    pub fn new(step: PeerStep) -> Self {
        Self {
            step,
            total_docs: 0,
            loaded_docs: 0,
            pending_pull_updates: 0,
            pending_push_updates: 0,
        }
    }
}

impl Default for PeerStatus {
    fn default() -> Self {
        Self::new(PeerStep::Stopped)
    }
}

/// Aggregate status of the engine.
///
/// `remotes` keeps the order of the remote storages the engine was built
/// with, and its length never changes; a `None` entry is a peer that does
/// not exist yet (or no longer exists).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EngineStatus {
    /// Aggregate step.
    pub step: EngineStep,
    /// Status of the local peer, if it exists.
    pub local: Option<PeerStatus>,
    /// Status of each remote peer, in storage order.
    pub remotes: Vec<Option<PeerStatus>>,
    /// True if any present peer is retrying.
    pub retrying: bool,
}

impl EngineStatus {
    /// The snapshot of a stopped engine with `remote_count` remote slots.
    pub fn stopped(remote_count: usize) -> Self {
        Self {
            step: EngineStep::Stopped,
            local: None,
            remotes: vec![None; remote_count],
            retrying: false,
        }
    }

    /// Aggregate peer slots into an engine status.
    ///
    /// The result is `Synced` only when the local slot and every remote slot
    /// are present and synced; any running state short of that is `Syncing`.
    pub fn from_peers(local: Option<PeerStatus>, remotes: Vec<Option<PeerStatus>>) -> Self {
        let all_synced = std::iter::once(&local)
            .chain(remotes.iter())
            .all(|slot| slot.as_ref().is_some_and(|peer| peer.step.is_synced()));
        let retrying = std::iter::once(&local)
            .chain(remotes.iter())
            .flatten()
            .any(|peer| peer.step.is_retrying());

        Self {
            step: if all_synced {
                EngineStep::Synced
            } else {
                EngineStep::Syncing
            },
            local,
            remotes,
            retrying,
        }
    }

    /// Iterate over every slot, local first.
    pub fn slots(&self) -> impl Iterator<Item = Option<&PeerStatus>> {
        std::iter::once(self.local.as_ref()).chain(self.remotes.iter().map(Option::as_ref))
    }

    /// Check if the engine has fully converged.
    pub fn is_synced(&self) -> bool {
        self.step == EngineStep::Synced
    }

    /// Check if the document's root structure is usable.
    ///
    /// Weaker than [`is_synced`](Self::is_synced): every slot must be present
    /// and past its root load, but peers may still be reconciling.
    pub fn is_root_doc_loaded(&self) -> bool {
        self.slots()
            .all(|slot| slot.is_some_and(|peer| peer.step.is_past_root_load()))
    }

    /// Check if the engine can stop without dropping local writes.
    pub fn can_graceful_stop(&self) -> bool {
        self.local
            .as_ref()
            .is_some_and(|local| local.pending_push_updates == 0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn peer(step: PeerStep) -> Option<PeerStatus> {
        Some(PeerStatus::new(step))
    }

    #[test]
    fn stopped_snapshot_has_all_slots_absent() {
        let status = EngineStatus::stopped(3);
        assert_eq!(status.step, EngineStep::Stopped);
        assert!(status.local.is_none());
        assert_eq!(status.remotes, vec![None, None, None]);
        assert!(!status.retrying);
    }

    #[test]
    fn local_only_synced_is_synced() {
        let status = EngineStatus::from_peers(peer(PeerStep::Synced), vec![]);
        assert_eq!(status.step, EngineStep::Synced);
        assert!(!status.retrying);
    }

    #[test]
    fn missing_local_is_syncing() {
        let status = EngineStatus::from_peers(None, vec![]);
        assert_eq!(status.step, EngineStep::Syncing);
    }

    #[test]
    fn missing_remote_blocks_synced() {
        let status = EngineStatus::from_peers(peer(PeerStep::Synced), vec![None]);
        assert_eq!(status.step, EngineStep::Syncing);
    }

    #[test]
    fn synced_requires_every_remote_synced() {
        for remote_count in 0..4 {
            let all = vec![peer(PeerStep::Synced); remote_count];
            let status = EngineStatus::from_peers(peer(PeerStep::Synced), all.clone());
            assert_eq!(status.step, EngineStep::Synced, "{remote_count} remotes");

            for lagging in 0..remote_count {
                let mut remotes = all.clone();
                remotes[lagging] = peer(PeerStep::Syncing);
                let status = EngineStatus::from_peers(peer(PeerStep::Synced), remotes);
                assert_eq!(status.step, EngineStep::Syncing);
            }
        }
    }

    #[test]
    fn local_not_synced_blocks_synced() {
        let status = EngineStatus::from_peers(
            peer(PeerStep::Syncing),
            vec![peer(PeerStep::Synced), peer(PeerStep::Synced)],
        );
        assert_eq!(status.step, EngineStep::Syncing);
    }

    #[test]
    fn retrying_reflects_any_present_peer() {
        let status = EngineStatus::from_peers(
            peer(PeerStep::Synced),
            vec![None, peer(PeerStep::Retrying)],
        );
        assert!(status.retrying);
        assert_eq!(status.step, EngineStep::Syncing);

        let status = EngineStatus::from_peers(peer(PeerStep::Retrying), vec![]);
        assert!(status.retrying);

        let status = EngineStatus::from_peers(None, vec![None, None]);
        assert!(!status.retrying);
    }

    #[test]
    fn root_doc_loaded_needs_every_slot_past_root_load() {
        let loaded = EngineStatus::from_peers(
            peer(PeerStep::Syncing),
            vec![peer(PeerStep::Synced), peer(PeerStep::Syncing)],
        );
        assert!(loaded.is_root_doc_loaded());
        assert!(!loaded.is_synced());

        let still_loading = EngineStatus::from_peers(
            peer(PeerStep::Syncing),
            vec![peer(PeerStep::LoadingRootDoc)],
        );
        assert!(!still_loading.is_root_doc_loaded());

        let retrying = EngineStatus::from_peers(peer(PeerStep::Retrying), vec![]);
        assert!(!retrying.is_root_doc_loaded());

        let missing = EngineStatus::from_peers(peer(PeerStep::Synced), vec![None]);
        assert!(!missing.is_root_doc_loaded());

        assert!(!EngineStatus::stopped(0).is_root_doc_loaded());
    }

    #[test]
    fn graceful_stop_waits_for_local_pushes() {
        let mut local = PeerStatus::new(PeerStep::Syncing);
        local.pending_push_updates = 2;
        let busy = EngineStatus::from_peers(Some(local.clone()), vec![]);
        assert!(!busy.can_graceful_stop());

        local.pending_push_updates = 0;
        let idle = EngineStatus::from_peers(Some(local), vec![None]);
        assert!(idle.can_graceful_stop());

        assert!(!EngineStatus::stopped(1).can_graceful_stop());
    }

    #[test]
    fn status_serializes_with_snake_case_steps() {
        let status = EngineStatus::from_peers(peer(PeerStep::LoadingRootDoc), vec![None]);
        let json = serde_json::to_value(&status).unwrap();

        assert_eq!(json["step"], "syncing");
        assert_eq!(json["local"]["step"], "loading_root_doc");
        assert!(json["remotes"][0].is_null());
        assert_eq!(json["retrying"], false);
    }
}
