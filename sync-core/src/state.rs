//! Run lifecycle state machine for the sync engine.
//!
//! This module provides a pure, side-effect-free state machine for the
//! engine's start/stop lifecycle. The state machine takes events as input
//! and produces a new phase plus a list of actions to execute.
//!
//! The actual work (aborting tokens, spawning the run, building peers) is
//! performed by sync-engine, not by this module.

/// Engine run phase - NO I/O, just state transitions.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum RunPhase {
    /// No run is active.
    #[default]
    Stopped,
    /// A run is active and waiting for the local peer's load checkpoint.
    LoadingLocal,
    /// Local peer is loaded and remote peers are converging.
    Converging,
}

impl RunPhase {
    /// Create a state machine in the Stopped phase.
    pub fn new() -> Self {
        Self::Stopped
    }

    /// Process an event and return the new phase plus actions to execute.
    ///
    /// The caller (sync-engine) is responsible for executing the returned
    /// actions in order.
    pub fn on_event(self, event: RunEvent) -> (Self, Vec<RunAction>) {
        match (self, event) {
            (Self::Stopped, RunEvent::StartRequested) => {
                (Self::LoadingLocal, vec![RunAction::SpawnRun])
            }
            // Restart: the old run must be gone before the new one spawns
            (Self::LoadingLocal | Self::Converging, RunEvent::StartRequested) => (
                Self::LoadingLocal,
                vec![
                    RunAction::AbortRun,
                    RunAction::ResetStatus,
                    RunAction::SpawnRun,
                ],
            ),

            (Self::LoadingLocal, RunEvent::LocalLoaded) => {
                (Self::Converging, vec![RunAction::ConstructRemotes])
            }

            (Self::LoadingLocal | Self::Converging, RunEvent::StopRequested) => (
                Self::Stopped,
                vec![RunAction::AbortRun, RunAction::ResetStatus],
            ),
            // Nothing to reset, but a stray token may still be live
            (Self::Stopped, RunEvent::StopRequested) => (Self::Stopped, vec![RunAction::AbortRun]),

            (Self::LoadingLocal | Self::Converging, RunEvent::RunFailed) => (
                Self::Stopped,
                vec![RunAction::AbortRun, RunAction::ResetStatus],
            ),

            // Invalid transitions - stay in current phase
            (phase, _) => (phase, vec![]),
        }
    }

    /// Check if a run is active.
    pub fn is_running(&self) -> bool {
        !matches!(self, Self::Stopped)
    }
}

/// Events that can occur in the engine lifecycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunEvent {
    /// Owner called start.
    StartRequested,
    /// Local peer passed its load checkpoint.
    LocalLoaded,
    /// Owner called stop.
    StopRequested,
    /// The active run ended with an unexpected fault.
    RunFailed,
}

/// Actions to be executed by sync-engine.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunAction {
    /// Abort the active run's token with the manual-stop reason.
    AbortRun,
    /// Publish the all-absent stopped status.
    ResetStatus,
    /// Allocate a fresh token and spawn the orchestration procedure.
    SpawnRun,
    /// Build one remote peer per remote storage.
    ConstructRemotes,
}
