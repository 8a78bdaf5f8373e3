//! SyncEngine - the main interface for replica-sync.
//!
//! This module provides [`SyncEngine`], which keeps one shared document
//! converging between a durable local replica and any number of remote
//! replicas.
//!
//! # Architecture
//!
//! SyncEngine uses a pure state machine (from sync-core) for its lifecycle
//! and interprets the actions to spawn and abort sync runs. Each run builds
//! the peers it needs and tears them down when its token is aborted.
//!
//! ```text
//! Application → SyncEngine → PeerFactory → Peer → Storage
//!                   ↓
//!              sync-core (lifecycle state machine, status aggregation)
//! ```
//!
//! A run always builds the local peer first and only builds remote peers
//! once the local peer is past its load checkpoint, so remote state is never
//! merged into a half-loaded document.
//!
//! # Example
//!
//! ```ignore
//! use replica_sync_engine::{EngineConfig, MockPeerFactory, SyncEngine};
//!
//! let engine = SyncEngine::new(EngineConfig::default(), factory, doc, local, remotes);
//! engine.start();
//! engine.wait_for_loaded_root_doc(None).await?;
//! // ... the document is usable; remotes keep converging in the background
//! engine.stop_gracefully().await;
//! ```

use parking_lot::{Mutex, ReentrantMutex};
use replica_sync_core::{EngineStatus, Listeners, PeerStatus, RunAction, RunEvent, RunPhase, Subscription};
use std::fmt;
use std::future;
use std::sync::Arc;
use tokio::runtime::Handle;
use tokio::sync::oneshot;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn, Instrument};

use crate::abort::{AbortReason, AbortToken};
use crate::config::EngineConfig;
use crate::error::EngineError;
use crate::peer::{Peer, PeerFactory, PeerRole};

/// Orchestrates the local and remote peers of one document.
///
/// Clones are handles to the same engine.
pub struct SyncEngine<F: PeerFactory> {
    shared: Arc<Shared<F>>,
}

struct Shared<F: PeerFactory> {
    config: EngineConfig,
    factory: F,
    doc: Arc<F::Document>,
    local: Arc<F::Storage>,
    remotes: Vec<Arc<F::Storage>>,
    status: Mutex<EngineStatus>,
    listeners: Listeners<EngineStatus>,
    /// Serializes fan-out across threads; reentrant so listeners may stop.
    emitting: ReentrantMutex<()>,
    lifecycle: Mutex<Lifecycle>,
}

#[derive(Default)]
struct Lifecycle {
    phase: RunPhase,
    run: Option<ActiveRun>,
    /// Aborted runs that may still be unwinding.
    retired: Vec<JoinHandle<()>>,
}

struct ActiveRun {
    abort: AbortToken,
    task: JoinHandle<()>,
}

impl Lifecycle {
    fn retire_run(&mut self) {
        self.retired.retain(|task| !task.is_finished());
        if let Some(run) = self.run.take() {
            run.abort.abort(AbortReason::ManualStop);
            self.retired.push(run.task);
        }
    }
}

impl<F: PeerFactory> SyncEngine<F> {
    /// Create a stopped engine.
    ///
    /// `remotes` fixes the order of `EngineStatus::remotes` for the engine's
    /// lifetime.
    pub fn new(
        config: EngineConfig,
        factory: F,
        doc: Arc<F::Document>,
        local: Arc<F::Storage>,
        remotes: Vec<Arc<F::Storage>>,
    ) -> Self {
        let status = EngineStatus::stopped(remotes.len());
        Self {
            shared: Arc::new(Shared {
                config,
                factory,
                doc,
                local,
                remotes,
                status: Mutex::new(status),
                listeners: Listeners::new(),
                emitting: ReentrantMutex::new(()),
                lifecycle: Mutex::new(Lifecycle::default()),
            }),
        }
    }

    /// The engine configuration.
    pub fn config(&self) -> &EngineConfig {
        &self.shared.config
    }

    /// Current aggregate status.
    pub fn status(&self) -> EngineStatus {
        self.shared.status.lock().clone()
    }

    /// Register a listener for status changes.
    ///
    /// Listeners run synchronously on the task that produced the change and
    /// may call back into the engine, including `start()` and `stop()`.
    pub fn on_status_change(
        &self,
        listener: impl Fn(&EngineStatus) + Send + Sync + 'static,
    ) -> Subscription {
        self.shared.listeners.subscribe(listener)
    }

    /// Check if a sync run is active.
    pub fn is_running(&self) -> bool {
        self.shared.lifecycle.lock().phase.is_running()
    }

    /// Start syncing. Restarts if a run is already active.
    ///
    /// Outside a tokio runtime this logs an error and leaves the engine
    /// stopped.
    pub fn start(&self) {
        info!(engine = %self.shared.config.label, "starting sync engine");
        self.shared.handle(RunEvent::StartRequested);
    }

    /// Stop syncing.
    ///
    /// The status is reset before this returns; peers are torn down as the
    /// run unwinds in the background. Use [`shutdown`](Self::shutdown) to wait
    /// for that.
    pub fn stop(&self) {
        info!(engine = %self.shared.config.label, "stopping sync engine");
        self.shared.handle(RunEvent::StopRequested);
    }

    /// Stop syncing and wait until every run has torn down its peers.
    pub async fn shutdown(&self) {
        self.stop();
        let retired = std::mem::take(&mut self.shared.lifecycle.lock().retired);
        for task in retired {
            if let Err(err) = task.await {
                warn!(%err, "sync run task did not finish cleanly");
            }
        }
    }

    /// Wait until every peer is synced.
    ///
    /// Fails with the reason of `abort` if it fires first. Without a token
    /// this only returns once the engine converges.
    pub async fn wait_for_synced(&self, abort: Option<&AbortToken>) -> Result<(), AbortReason> {
        self.wait_for_status(abort, EngineStatus::is_synced).await
    }

    /// Wait until every peer exists and is past its root document load.
    ///
    /// Returns before full convergence; the document is usable but peers may
    /// still be reconciling.
    pub async fn wait_for_loaded_root_doc(
        &self,
        abort: Option<&AbortToken>,
    ) -> Result<(), AbortReason> {
        self.wait_for_status(abort, EngineStatus::is_root_doc_loaded)
            .await
    }

    /// Check if the local peer has no unpushed updates.
    pub fn can_graceful_stop(&self) -> bool {
        self.shared.status.lock().can_graceful_stop()
    }

    /// Wait until the local peer has pushed everything, then stop.
    pub async fn wait_for_graceful_stop(
        &self,
        abort: Option<&AbortToken>,
    ) -> Result<(), AbortReason> {
        self.wait_for_status(abort, EngineStatus::can_graceful_stop)
            .await?;
        self.stop();
        Ok(())
    }

    /// Stop once local updates are pushed, or after the configured timeout.
    ///
    /// Returns `false` if the timeout elapsed with updates still pending.
    /// A stopped engine has nothing to flush and returns `true` at once.
    pub async fn stop_gracefully(&self) -> bool {
        if !self.is_running() {
            return true;
        }

        let timeout = self.shared.config.graceful_stop_timeout();
        let graceful = tokio::time::timeout(
            timeout,
            self.wait_for_status(None, EngineStatus::can_graceful_stop),
        )
        .await
        .is_ok();

        if !graceful {
            warn!(?timeout, "graceful stop timed out with pending local updates");
        }
        self.stop();
        graceful
    }

    async fn wait_for_status(
        &self,
        abort: Option<&AbortToken>,
        predicate: fn(&EngineStatus) -> bool,
    ) -> Result<(), AbortReason> {
        if let Some(abort) = abort {
            abort.check()?;
        }

        // Subscribe before checking so a change in between is not missed
        let (tx, rx) = oneshot::channel();
        let tx = Mutex::new(Some(tx));
        let _subscription = self.on_status_change(move |status| {
            if predicate(status) {
                if let Some(tx) = tx.lock().take() {
                    let _ = tx.send(());
                }
            }
        });

        if predicate(&self.status()) {
            return Ok(());
        }

        let matched = async {
            if rx.await.is_err() {
                future::pending::<()>().await;
            }
        };

        match abort {
            Some(abort) => tokio::select! {
                () = matched => Ok(()),
                reason = abort.aborted() => Err(reason),
            },
            None => {
                matched.await;
                Ok(())
            }
        }
    }
}

impl<F: PeerFactory> Clone for SyncEngine<F> {
    fn clone(&self) -> Self {
        Self {
            shared: Arc::clone(&self.shared),
        }
    }
}

impl<F: PeerFactory> fmt::Debug for SyncEngine<F> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SyncEngine")
            .field("label", &self.shared.config.label)
            .field("remotes", &self.shared.remotes.len())
            .field("status", &self.status())
            .finish()
    }
}

impl<F: PeerFactory> Shared<F> {
    /// Apply an owner event (start/stop).
    fn handle(self: &Arc<Self>, event: RunEvent) {
        let reset = {
            let mut lifecycle = self.lifecycle.lock();
            let (_, reset) = self.apply(&mut lifecycle, event);
            reset
        };
        self.emit_reset(reset);
    }

    /// Apply an event raised by the run owning `abort`.
    ///
    /// Fails if that run was aborted, so a replaced run cannot move the
    /// lifecycle of its successor.
    fn handle_for_run(
        self: &Arc<Self>,
        abort: &AbortToken,
        event: RunEvent,
    ) -> Result<Vec<RunAction>, AbortReason> {
        let (pending, reset) = {
            let mut lifecycle = self.lifecycle.lock();
            abort.check()?;
            self.apply(&mut lifecycle, event)
        };
        self.emit_reset(reset);
        Ok(pending)
    }

    /// Run the lifecycle machine and execute the engine-level actions.
    ///
    /// Returns the actions left for the run, and the stopped status to emit
    /// once the lifecycle lock is released.
    fn apply(
        self: &Arc<Self>,
        lifecycle: &mut Lifecycle,
        event: RunEvent,
    ) -> (Vec<RunAction>, Option<EngineStatus>) {
        let (phase, actions) = lifecycle.phase.on_event(event);
        lifecycle.phase = phase;

        let mut pending = Vec::new();
        let mut reset = None;
        for action in actions {
            match action {
                RunAction::AbortRun => lifecycle.retire_run(),
                RunAction::ResetStatus => reset = self.reset_status(),
                RunAction::SpawnRun => match self.spawn_run() {
                    Some(run) => lifecycle.run = Some(run),
                    None => lifecycle.phase = RunPhase::Stopped,
                },
                RunAction::ConstructRemotes => pending.push(action),
            }
        }
        (pending, reset)
    }

    fn spawn_run(self: &Arc<Self>) -> Option<ActiveRun> {
        let runtime = match Handle::try_current() {
            Ok(runtime) => runtime,
            Err(err) => {
                error!(%err, "cannot start sync run outside a tokio runtime");
                return None;
            }
        };

        let abort = AbortToken::new();
        let span = tracing::info_span!("sync_engine", engine = %self.config.label);
        let task = runtime.spawn(Arc::clone(self).run(abort.clone()).instrument(span));
        Some(ActiveRun { abort, task })
    }

    async fn run(self: Arc<Self>, abort: AbortToken) {
        debug!("sync run started");
        match self.orchestrate(&abort).await {
            Ok(()) => debug!("sync run stopped"),
            Err(err) => {
                // Should not happen: peers report storage failures as Retrying
                error!(%err, "sync run failed unexpectedly");
                if let Err(reason) = self.handle_for_run(&abort, RunEvent::RunFailed) {
                    debug!(%reason, "failed run was already replaced");
                }
            }
        }
    }

    async fn orchestrate(self: &Arc<Self>, abort: &AbortToken) -> Result<(), EngineError> {
        let mut peers = RunPeers::new(self, abort.clone());
        let result = peers.sync().await;
        drop(peers);

        match result {
            Err(err) if err.is_manual_stop() => Ok(()),
            other => other,
        }
    }

    /// Record and emit a recomputed status, unless `abort` already fired.
    ///
    /// Listeners are skipped from the moment `abort` fires, including when an
    /// earlier listener in the same fan-out stops the engine.
    fn publish(&self, abort: &AbortToken, status: EngineStatus) {
        let _emitting = self.emitting.lock();
        {
            let mut current = self.status.lock();
            // stop() aborts before it resets, so this check cannot go stale
            if abort.is_aborted() {
                return;
            }
            *current = status.clone();
        }

        debug!(step = ?status.step, retrying = status.retrying, "sync status changed");
        self.listeners
            .emit_while(&status, || !abort.is_aborted());
    }

    /// Reset to the stopped snapshot. Returns it if the status changed.
    fn reset_status(&self) -> Option<EngineStatus> {
        let stopped = EngineStatus::stopped(self.remotes.len());
        let mut current = self.status.lock();
        if *current == stopped {
            return None;
        }
        *current = stopped.clone();
        Some(stopped)
    }

    fn emit_reset(&self, reset: Option<EngineStatus>) {
        if let Some(status) = reset {
            debug!("sync status reset");
            let _emitting = self.emitting.lock();
            self.listeners.emit(&status);
        }
    }
}

/// Peer slots of one run, shared with the status listeners of its peers.
struct PeerSlots<P> {
    local: Option<Arc<P>>,
    remotes: Vec<Option<Arc<P>>>,
}

impl<P: Peer> PeerSlots<P> {
    fn status(&self) -> EngineStatus {
        let status_of = |slot: &Option<Arc<P>>| -> Option<PeerStatus> {
            slot.as_ref().map(|peer| peer.status())
        };
        EngineStatus::from_peers(
            status_of(&self.local),
            self.remotes.iter().map(status_of).collect(),
        )
    }
}

/// Everything one run builds. Dropping it removes the run's subscriptions
/// and stops its peers, however the run ends.
struct RunPeers<F: PeerFactory> {
    shared: Arc<Shared<F>>,
    abort: AbortToken,
    slots: Arc<Mutex<PeerSlots<F::Peer>>>,
    subscriptions: Vec<Subscription>,
}

impl<F: PeerFactory> RunPeers<F> {
    fn new(shared: &Arc<Shared<F>>, abort: AbortToken) -> Self {
        let slots = PeerSlots {
            local: None,
            remotes: (0..shared.remotes.len()).map(|_| None).collect(),
        };
        Self {
            shared: Arc::clone(shared),
            abort,
            slots: Arc::new(Mutex::new(slots)),
            subscriptions: Vec::new(),
        }
    }

    /// Drive the run until its token is aborted. Never returns `Ok`.
    async fn sync(&mut self) -> Result<(), EngineError> {
        let local = self.connect(PeerRole::Local)?;
        self.slots.lock().local = Some(Arc::clone(&local));
        self.refresh();

        local.wait_for_loaded(&self.abort).await?;
        debug!("local peer loaded");

        for action in self.shared.handle_for_run(&self.abort, RunEvent::LocalLoaded)? {
            if action == RunAction::ConstructRemotes {
                self.connect_remotes()?;
            }
        }

        Err(self.abort.aborted().await.into())
    }

    fn connect_remotes(&mut self) -> Result<(), EngineError> {
        for index in 0..self.shared.remotes.len() {
            let peer = self.connect(PeerRole::Remote(index))?;
            self.slots.lock().remotes[index] = Some(peer);
        }
        self.refresh();
        Ok(())
    }

    /// Build the peer for `role` and subscribe to its status.
    fn connect(&mut self, role: PeerRole) -> Result<Arc<F::Peer>, EngineError> {
        self.abort.check()?;

        let storage = match role {
            PeerRole::Local => &self.shared.local,
            PeerRole::Remote(index) => &self.shared.remotes[index],
        };
        let peer = Arc::new(self.shared.factory.create_peer(role, &self.shared.doc, storage)?);
        debug!(%role, "peer created");

        let shared = Arc::downgrade(&self.shared);
        let slots = Arc::clone(&self.slots);
        let abort = self.abort.clone();
        let subscription = peer.on_status_change(Box::new(move |_: &PeerStatus| {
            if abort.is_aborted() {
                return;
            }
            if let Some(shared) = shared.upgrade() {
                let status = slots.lock().status();
                shared.publish(&abort, status);
            }
        }));
        self.subscriptions.push(subscription);

        Ok(peer)
    }

    fn refresh(&self) {
        let status = self.slots.lock().status();
        self.shared.publish(&self.abort, status);
    }
}

impl<F: PeerFactory> Drop for RunPeers<F> {
    fn drop(&mut self) {
        self.subscriptions.clear();

        let (local, remotes) = {
            let mut slots = self.slots.lock();
            (slots.local.take(), std::mem::take(&mut slots.remotes))
        };
        for peer in local.into_iter().chain(remotes.into_iter().flatten()) {
            debug!(role = %peer.role(), "stopping peer");
            peer.stop();
        }
    }
}
