//! Error types for sync-engine.
//!
//! `EngineError` never crosses the public API: it is what a sync run returns
//! to the spawn boundary, where anything other than a manual stop is logged.
//! Wait operations fail with a bare [`AbortReason`].

use thiserror::Error;

use crate::abort::AbortReason;
use crate::peer::PeerError;

/// Errors that end a sync run.
#[derive(Debug, Error)]
pub enum EngineError {
    /// The run's token was aborted.
    #[error("sync run aborted: {0}")]
    Aborted(#[from] AbortReason),

    /// A peer could not be built.
    #[error("peer error: {0}")]
    Peer(#[from] PeerError),
}

impl EngineError {
    /// Check if this is the manual-stop sentinel, i.e. normal termination.
    pub fn is_manual_stop(&self) -> bool {
        matches!(self, Self::Aborted(AbortReason::ManualStop))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::peer::PeerRole;

    #[test]
    fn manual_stop_is_recognized() {
        let err: EngineError = AbortReason::ManualStop.into();
        assert!(err.is_manual_stop());
        assert_eq!(err.to_string(), "sync run aborted: manually stopped");
    }

    #[test]
    fn other_aborts_are_not_manual_stop() {
        let err: EngineError = AbortReason::cancelled("host shutdown").into();
        assert!(!err.is_manual_stop());
    }

    #[test]
    fn peer_error_maps_correctly() {
        let err: EngineError = PeerError::CreateFailed {
            role: PeerRole::Local,
            reason: "disk full".to_string(),
        }
        .into();
        assert!(matches!(err, EngineError::Peer(_)));
        assert!(!err.is_manual_stop());
        assert!(err.to_string().contains("disk full"));
    }
}
