//! Abort tokens carrying a reason.
//!
//! [`AbortToken`] is a cheap-to-clone, one-shot signal: the first call to
//! [`abort`](AbortToken::abort) records a reason and wakes every task
//! awaiting [`aborted`](AbortToken::aborted). The engine owns one token per
//! run; callers pass their own tokens into wait operations.

use std::sync::{Arc, OnceLock};
use thiserror::Error;
use tokio_util::sync::CancellationToken;

/// Why a token was aborted.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum AbortReason {
    /// The engine was stopped on purpose. Never surfaced as a failure.
    #[error("manually stopped")]
    ManualStop,

    /// Cancelled by a caller.
    #[error("cancelled: {0}")]
    Cancelled(String),
}

impl AbortReason {
    /// Build a caller cancellation reason.
    pub fn cancelled(reason: impl Into<String>) -> Self {
        Self::Cancelled(reason.into())
    }
}

/// Shareable abort signal.
#[derive(Debug, Clone, Default)]
pub struct AbortToken {
    cancel: CancellationToken,
    reason: Arc<OnceLock<AbortReason>>,
}

impl AbortToken {
    /// Create a token that has not been aborted.
    pub fn new() -> Self {
        Self::default()
    }

    /// Abort with `reason`.
    ///
    /// Returns `true` if this call aborted the token, `false` if it was
    /// already aborted (the original reason is kept).
    pub fn abort(&self, reason: AbortReason) -> bool {
        // Reason first: anyone woken by the cancel must be able to read it
        let first = self.reason.set(reason).is_ok();
        self.cancel.cancel();
        first
    }

    /// Check if the token has been aborted.
    pub fn is_aborted(&self) -> bool {
        self.reason.get().is_some()
    }

    /// The abort reason, once aborted.
    pub fn reason(&self) -> Option<AbortReason> {
        self.reason.get().cloned()
    }

    /// Fail with the abort reason if the token has been aborted.
    pub fn check(&self) -> Result<(), AbortReason> {
        match self.reason.get() {
            Some(reason) => Err(reason.clone()),
            None => Ok(()),
        }
    }

    /// Wait until the token is aborted and return the reason.
    ///
    /// Resolves immediately if it already is.
    pub async fn aborted(&self) -> AbortReason {
        self.cancel.cancelled().await;
        self.reason
            .get()
            .cloned()
            .unwrap_or_else(|| AbortReason::cancelled("aborted"))
    }
}
