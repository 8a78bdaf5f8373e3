//! Mock peers for testing.
//!
//! Lets tests drive peer steps by hand, inject construction failures and
//! inspect which peers the engine built and stopped.

use super::{Peer, PeerError, PeerFactory, PeerRole};
use crate::abort::{AbortReason, AbortToken};
use async_trait::async_trait;
use parking_lot::Mutex;
use replica_sync_core::{Listener, Listeners, PeerStatus, PeerStep, Subscription};
use std::collections::HashMap;
use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::sync::watch;

/// Mock peer for testing.
///
/// Clones share state, so a test can keep a handle to a peer the engine owns.
#[derive(Clone)]
pub struct MockPeer {
    inner: Arc<MockPeerInner>,
}

struct MockPeerInner {
    role: PeerRole,
    storage: String,
    status: watch::Sender<PeerStatus>,
    listeners: Listeners<PeerStatus>,
    stopped: AtomicBool,
}

impl MockPeer {
    /// Create a mock peer at `step` for the named storage.
    pub fn new(role: PeerRole, storage: &str, step: PeerStep) -> Self {
        let (status, _) = watch::channel(PeerStatus::new(step));
        Self {
            inner: Arc::new(MockPeerInner {
                role,
                storage: storage.to_string(),
                status,
                listeners: Listeners::new(),
                stopped: AtomicBool::new(false),
            }),
        }
    }

    /// Name of the storage this peer was built over.
    pub fn storage(&self) -> &str {
        &self.inner.storage
    }

    /// Replace the status and notify listeners.
    pub fn set_status(&self, status: PeerStatus) {
        self.inner.status.send_replace(status.clone());
        self.inner.listeners.emit(&status);
    }

    /// Move to `step`, keeping the counters.
    pub fn set_step(&self, step: PeerStep) {
        let mut status = self.status();
        status.step = step;
        self.set_status(status);
    }

    /// Set the number of local updates not yet pushed.
    pub fn set_pending_push_updates(&self, pending: u32) {
        let mut status = self.status();
        status.pending_push_updates = pending;
        self.set_status(status);
    }

    /// Check if `stop()` was called.
    pub fn is_stopped(&self) -> bool {
        self.inner.stopped.load(Ordering::SeqCst)
    }

    /// Number of status listeners currently registered.
    pub fn listener_count(&self) -> usize {
        self.inner.listeners.len()
    }
}

impl fmt::Debug for MockPeer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MockPeer")
            .field("role", &self.inner.role)
            .field("storage", &self.inner.storage)
            .field("step", &self.inner.status.borrow().step)
            .field("stopped", &self.is_stopped())
            .finish()
    }
}

#[async_trait]
impl Peer for MockPeer {
    fn role(&self) -> PeerRole {
        self.inner.role
    }

    fn status(&self) -> PeerStatus {
        self.inner.status.borrow().clone()
    }

    fn on_status_change(&self, listener: Listener<PeerStatus>) -> Subscription {
        self.inner.listeners.subscribe(listener)
    }

    async fn wait_for_loaded(&self, abort: &AbortToken) -> Result<(), AbortReason> {
        abort.check()?;
        let mut updates = self.inner.status.subscribe();
        let loaded = async {
            updates
                .wait_for(|status| status.step.is_past_root_load())
                .await
                .map(|_| ())
        };

        tokio::select! {
            reason = abort.aborted() => Err(reason),
            result = loaded => match result {
                Ok(()) => Ok(()),
                // Sender lives as long as self, so this only waits for the abort
                Err(_) => Err(abort.aborted().await),
            },
        }
    }

    fn stop(&self) {
        if !self.inner.stopped.swap(true, Ordering::SeqCst) {
            self.set_step(PeerStep::Stopped);
        }
    }
}

/// Mock factory that records every peer it builds.
///
/// Documents and storages are plain names.
#[derive(Debug, Default)]
pub struct MockPeerFactory {
    inner: Arc<Mutex<MockPeerFactoryInner>>,
}

#[derive(Debug, Default)]
struct MockPeerFactoryInner {
    initial_step: Option<PeerStep>,
    created: Vec<MockPeer>,
    fail_create: HashMap<PeerRole, String>,
}

impl MockPeerFactory {
    /// Create a factory whose peers start at `LoadingRootDoc`.
    pub fn new() -> Self {
        Self::default()
    }

    /// Start every new peer at `step` instead.
    pub fn with_initial_step(self, step: PeerStep) -> Self {
        self.inner.lock().initial_step = Some(step);
        self
    }

    /// Cause the next creation of a peer for `role` to fail with `error`.
    pub fn fail_next_create(&self, role: PeerRole, error: &str) {
        self.inner
            .lock()
            .fail_create
            .insert(role, error.to_string());
    }

    /// Every peer built so far, in creation order.
    pub fn created(&self) -> Vec<MockPeer> {
        self.inner.lock().created.clone()
    }

    /// The most recently built peer for `role`.
    pub fn peer(&self, role: PeerRole) -> Option<MockPeer> {
        self.inner
            .lock()
            .created
            .iter()
            .rev()
            .find(|peer| peer.role() == role)
            .cloned()
    }
}

impl Clone for MockPeerFactory {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl PeerFactory for MockPeerFactory {
    type Document = String;
    type Storage = String;
    type Peer = MockPeer;

    fn create_peer(
        &self,
        role: PeerRole,
        _doc: &Arc<String>,
        storage: &Arc<String>,
    ) -> Result<MockPeer, PeerError> {
        let mut inner = self.inner.lock();

        // Check for forced failure
        if let Some(reason) = inner.fail_create.remove(&role) {
            return Err(PeerError::CreateFailed { role, reason });
        }

        let step = inner.initial_step.unwrap_or(PeerStep::LoadingRootDoc);
        let peer = MockPeer::new(role, storage, step);
        inner.created.push(peer.clone());
        Ok(peer)
    }
}
