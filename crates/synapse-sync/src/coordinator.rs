//! The synchronization coordinator — the adapter's public object.
//!
//! Owns the lifecycle state machine, wires store change events to outbound
//! pushes and inbound receipts to store mutation, serializes transport
//! access behind the gate, and tears everything down best-effort on
//! shutdown. One coordinator per transport adapter; coordinators for
//! different platforms share no mutable state.

use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use synapse_core::{Result, SyncError};
use synapse_settings::SyncSettings;
use synapse_store::ContextStore;
use synapse_transport::{SubscriptionHandle, SubscriptionScope, TransportAdapter};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, instrument, warn};

use crate::gate::TransportGate;
use crate::metrics::SyncMetrics;
use crate::reconcile::{SyncContext, spawn_loop};
use crate::state::{LifecycleState, SyncStatus};

/// Synchronization coordinator over one transport adapter.
pub struct SyncCoordinator {
    ctx: Arc<SyncContext>,
    settings: SyncSettings,
    state: Mutex<LifecycleState>,
    cancel: Mutex<CancellationToken>,
    tasks: Mutex<Vec<JoinHandle<()>>>,
    subscriptions: Mutex<Vec<SubscriptionHandle>>,
}

impl SyncCoordinator {
    /// Build a coordinator. Nothing runs until [`initialize`](Self::initialize).
    #[must_use]
    pub fn new(
        store: Arc<dyn ContextStore>,
        adapter: Arc<dyn TransportAdapter>,
        settings: SyncSettings,
    ) -> Self {
        let origin = format!("synapse-sync/{}", adapter.kind().as_str());
        let ctx = Arc::new(SyncContext {
            store,
            gate: Arc::new(TransportGate::new(Duration::from_millis(
                settings.lock_timeout_ms,
            ))),
            metrics: Arc::new(SyncMetrics::new()),
            origin,
            min_confidence: settings.push_min_confidence,
            batch_limit: settings.push_batch_limit,
            adapter,
        });
        Self {
            ctx,
            settings,
            state: Mutex::new(LifecycleState::Uninitialized),
            cancel: Mutex::new(CancellationToken::new()),
            tasks: Mutex::new(Vec::new()),
            subscriptions: Mutex::new(Vec::new()),
        }
    }

    /// Bring the coordinator up: register listen scopes, run the initial
    /// reconciliation pass, start the loop and the store listener.
    ///
    /// Resolves successfully even when the preferred transport is absent —
    /// the adapter's fallback serves the contract and status reports
    /// degraded. Only an initial pass that cannot complete at all (e.g. a
    /// broken store dependency) surfaces as an error.
    #[instrument(skip(self), fields(transport = self.ctx.adapter.kind().as_str()))]
    pub async fn initialize(&self) -> Result<()> {
        {
            let mut state = self.state.lock();
            match *state {
                LifecycleState::Uninitialized | LifecycleState::Stopped => {
                    *state = LifecycleState::Initializing;
                }
                actual => {
                    return Err(SyncError::InvalidState {
                        expected: "uninitialized",
                        actual: actual.as_str(),
                    });
                }
            }
        }
        let cancel = CancellationToken::new();
        *self.cancel.lock() = cancel.clone();

        self.register_scopes().await;

        // Ready only after the first reconciliation pass succeeds.
        if let Err(e) = self.ctx.initial_pass().await {
            *self.state.lock() = LifecycleState::Stopped;
            return Err(SyncError::Init(format!("initial reconciliation failed: {e}")));
        }

        let period = Duration::from_millis(self.settings.reconcile_interval_ms);
        let loop_task = spawn_loop(Arc::clone(&self.ctx), period, cancel.clone());
        let listener_task = spawn_store_listener(Arc::clone(&self.ctx), cancel);
        self.tasks.lock().extend([loop_task, listener_task]);

        let state = if self.ctx.adapter.is_native() {
            LifecycleState::Ready
        } else {
            LifecycleState::Degraded
        };
        *self.state.lock() = state;
        info!(state = state.as_str(), "context sync initialized");
        Ok(())
    }

    /// Register the configured listen scopes. Failures are logged and
    /// counted, never fatal — the reconciliation loop still covers the gap.
    async fn register_scopes(&self) {
        let mut scopes = Vec::new();
        if self.settings.system_wide {
            scopes.push(SubscriptionScope::SystemWide);
        }
        if self.settings.per_app {
            for app in self.settings.explicit_apps() {
                scopes.push(SubscriptionScope::App(app.to_string()));
            }
        }
        for scope in scopes {
            let guard = match self.ctx.gate.acquire().await {
                Ok(guard) => guard,
                Err(e) => {
                    self.ctx.metrics.record_error();
                    warn!(error = %e, "transport gate unavailable during subscribe");
                    continue;
                }
            };
            self.ctx.metrics.record_call();
            match self.ctx.adapter.subscribe(scope.clone()).await {
                Ok(handle) => {
                    debug!(token = %handle.token, "listen scope registered");
                    self.subscriptions.lock().push(handle);
                }
                Err(e) => {
                    self.ctx.metrics.record_error();
                    warn!(?scope, error = %e, "failed to register listen scope");
                }
            }
            drop(guard);
        }
    }

    /// Tear down: stop scheduling ticks (the in-flight tick finishes),
    /// revoke subscriptions, kill helpers. Best-effort, log-and-continue,
    /// always completes.
    #[instrument(skip(self), fields(transport = self.ctx.adapter.kind().as_str()))]
    pub async fn shutdown(&self) {
        {
            let mut state = self.state.lock();
            if !state.is_active() && *state != LifecycleState::Initializing {
                *state = LifecycleState::Stopped;
                return;
            }
            *state = LifecycleState::ShuttingDown;
        }

        self.cancel.lock().cancel();
        let tasks: Vec<JoinHandle<()>> = self.tasks.lock().drain(..).collect();
        for task in tasks {
            if let Err(e) = task.await {
                warn!(error = %e, "sync task panicked during shutdown");
            }
        }

        let handles: Vec<SubscriptionHandle> = self.subscriptions.lock().drain(..).collect();
        for handle in handles {
            match self.ctx.gate.acquire().await {
                Ok(_guard) => {
                    self.ctx.metrics.record_call();
                    if let Err(e) = self.ctx.adapter.unsubscribe(handle.clone()).await {
                        self.ctx.metrics.record_error();
                        warn!(token = %handle.token, error = %e, "unsubscribe failed during shutdown");
                    }
                }
                Err(e) => warn!(error = %e, "transport gate unavailable during shutdown"),
            }
        }

        self.ctx.adapter.shutdown().await;
        *self.state.lock() = LifecycleState::Stopped;
        info!("context sync stopped");
    }

    /// Current status: lifecycle, transport mode, open subscriptions,
    /// counters.
    #[must_use]
    pub fn status(&self) -> SyncStatus {
        let state = *self.state.lock();
        SyncStatus {
            initialized: state.is_active(),
            state,
            degraded: state == LifecycleState::Degraded,
            subscriptions: self.ctx.adapter.subscription_count(),
            metrics: self
                .ctx
                .metrics
                .snapshot(self.ctx.adapter.helper_relaunches()),
        }
    }
}

/// Spawn the store change listener: the event-driven half of the outbound
/// path. A first-class task handle, revoked at shutdown alongside the loop.
fn spawn_store_listener(ctx: Arc<SyncContext>, cancel: CancellationToken) -> JoinHandle<()> {
    let mut rx = ctx.store.subscribe();
    tokio::spawn(async move {
        loop {
            tokio::select! {
                () = cancel.cancelled() => break,
                event = rx.recv() => match event {
                    Ok(event) => ctx.handle_store_event(event).await,
                    Err(tokio::sync::broadcast::error::RecvError::Lagged(missed)) => {
                        warn!(missed, "store listener lagged; reconciliation will cover the gap");
                    }
                    Err(tokio::sync::broadcast::error::RecvError::Closed) => break,
                },
            }
        }
        debug!("store listener stopped");
    })
}
