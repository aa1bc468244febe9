//! Event dispatch core.
//!
//! Adapters enqueue canonical events onto one bounded queue; a fixed pool
//! of worker tasks pulls from it, calls the backend under a per-event
//! deadline, degrades the resulting intent for the originating surface and
//! hands it back to the adapter that produced the event. Enqueue never
//! blocks: a full queue drops the event and counts it.

use std::collections::BTreeMap;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, PoisonError, RwLock, Weak};
use std::time::Duration;

use async_channel::{Receiver, Sender, TrySendError};
use serde::Serialize;
use tokio::sync::oneshot;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;
use uip_backend::BackendClient;
use uip_protocol::{degrade_intent, CanonicalInteractionEvent, InteractionIntent};

use crate::{EventHandler, FrontEndAdapter, GatewayError, SessionRegistry};

#[derive(Debug, Clone)]
/// Public struct `GatewayConfig` used by the dispatch core.
pub struct GatewayConfig {
    pub worker_count: usize,
    pub queue_capacity: usize,
    pub dispatch_timeout: Duration,
    pub session_ttl: Duration,
    pub cleanup_interval: Duration,
    pub shutdown_timeout: Duration,
}

impl Default for GatewayConfig {
    fn default() -> Self {
        Self {
            worker_count: 10,
            queue_capacity: 1_000,
            dispatch_timeout: Duration::from_secs(30),
            session_ttl: Duration::from_secs(24 * 60 * 60),
            cleanup_interval: Duration::from_secs(5 * 60),
            shutdown_timeout: Duration::from_secs(10),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
/// Result of a non-blocking enqueue.
pub enum EnqueueOutcome {
    Queued,
    DroppedFull,
    DroppedClosed,
    Rejected,
}

#[derive(Debug, Default)]
struct GatewayStats {
    queued: AtomicU64,
    dropped: AtomicU64,
    processed: AtomicU64,
    fallback_intents: AtomicU64,
    undeliverable: AtomicU64,
}

#[derive(Debug, Clone, Copy, Serialize, PartialEq, Eq, Default)]
#[serde(rename_all = "camelCase")]
pub struct GatewayStatsSnapshot {
    pub queued: u64,
    pub dropped: u64,
    pub processed: u64,
    pub fallback_intents: u64,
    pub undeliverable: u64,
    pub queue_depth: usize,
    pub active_sessions: usize,
}

#[derive(Default)]
struct DispatchRuntime {
    workers: Vec<JoinHandle<()>>,
    sweeper_shutdown: Option<oneshot::Sender<()>>,
    sweeper: Option<JoinHandle<()>>,
}

struct GatewayInner {
    config: GatewayConfig,
    backend: Arc<dyn BackendClient>,
    adapters: RwLock<BTreeMap<String, Arc<dyn FrontEndAdapter>>>,
    sessions: SessionRegistry,
    stats: GatewayStats,
    sender: Sender<CanonicalInteractionEvent>,
    receiver: Receiver<CanonicalInteractionEvent>,
    root: CancellationToken,
    started: AtomicBool,
    stopped: AtomicBool,
    runtime: Mutex<DispatchRuntime>,
}

#[derive(Clone)]
/// Public struct `Gateway` owning the queue, workers and session registry.
pub struct Gateway {
    inner: Arc<GatewayInner>,
}

impl Gateway {
    pub fn new(config: GatewayConfig, backend: Arc<dyn BackendClient>) -> Self {
        let (sender, receiver) = async_channel::bounded(config.queue_capacity.max(1));
        Self {
            inner: Arc::new(GatewayInner {
                sessions: SessionRegistry::new(config.session_ttl),
                config,
                backend,
                adapters: RwLock::new(BTreeMap::new()),
                stats: GatewayStats::default(),
                sender,
                receiver,
                root: CancellationToken::new(),
                started: AtomicBool::new(false),
                stopped: AtomicBool::new(false),
                runtime: Mutex::new(DispatchRuntime::default()),
            }),
        }
    }

    pub fn config(&self) -> &GatewayConfig {
        &self.inner.config
    }

    pub fn backend(&self) -> &Arc<dyn BackendClient> {
        &self.inner.backend
    }

    pub fn sessions(&self) -> &SessionRegistry {
        &self.inner.sessions
    }

    pub fn is_running(&self) -> bool {
        self.inner.started.load(Ordering::SeqCst) && !self.inner.stopped.load(Ordering::SeqCst)
    }

    /// Adds an adapter and wires its events into the queue. Only allowed
    /// before [`Gateway::start`].
    pub fn register_adapter(&self, adapter: Arc<dyn FrontEndAdapter>) -> Result<(), GatewayError> {
        if self.inner.started.load(Ordering::SeqCst) {
            return Err(GatewayError::RegistrationClosed);
        }
        let name = adapter.name().to_string();
        {
            let mut adapters = self
                .inner
                .adapters
                .write()
                .unwrap_or_else(PoisonError::into_inner);
            if adapters.contains_key(&name) {
                return Err(GatewayError::AdapterAlreadyRegistered(name));
            }
            adapters.insert(name.clone(), adapter.clone());
        }

        let weak: Weak<GatewayInner> = Arc::downgrade(&self.inner);
        let adapter_name = name.clone();
        let handler: EventHandler = Arc::new(move |mut event: CanonicalInteractionEvent| {
            event.meta.adapter_name = adapter_name.clone();
            match weak.upgrade() {
                Some(inner) => {
                    inner.enqueue(event);
                }
                None => {
                    tracing::debug!(adapter = %adapter_name, "event received after gateway was dropped");
                }
            }
        });
        adapter.on_event(handler);
        tracing::info!(adapter = %name, "adapter registered");
        Ok(())
    }

    /// Removes an adapter. Intents still in flight for it become
    /// undeliverable.
    pub fn unregister_adapter(&self, name: &str) -> Option<Arc<dyn FrontEndAdapter>> {
        let removed = self
            .inner
            .adapters
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(name);
        if removed.is_some() {
            tracing::info!(adapter = %name, "adapter unregistered");
        }
        removed
    }

    pub fn adapter(&self, name: &str) -> Option<Arc<dyn FrontEndAdapter>> {
        self.inner.adapter(name)
    }

    pub fn adapter_names(&self) -> Vec<String> {
        self.inner
            .adapters
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .keys()
            .cloned()
            .collect()
    }

    /// Non-blocking enqueue; see [`EnqueueOutcome`].
    pub fn submit(&self, event: CanonicalInteractionEvent) -> EnqueueOutcome {
        self.inner.enqueue(event)
    }

    pub fn stats(&self) -> GatewayStatsSnapshot {
        let stats = &self.inner.stats;
        GatewayStatsSnapshot {
            queued: stats.queued.load(Ordering::Relaxed),
            dropped: stats.dropped.load(Ordering::Relaxed),
            processed: stats.processed.load(Ordering::Relaxed),
            fallback_intents: stats.fallback_intents.load(Ordering::Relaxed),
            undeliverable: stats.undeliverable.load(Ordering::Relaxed),
            queue_depth: self.inner.receiver.len(),
            active_sessions: self.inner.sessions.len(),
        }
    }

    /// Starts every adapter, the worker pool and the session sweeper.
    pub async fn start(&self) -> Result<(), GatewayError> {
        if self.inner.stopped.load(Ordering::SeqCst) {
            return Err(GatewayError::Stopped);
        }
        if self.inner.started.swap(true, Ordering::SeqCst) {
            return Err(GatewayError::AlreadyStarted);
        }

        let adapters: Vec<Arc<dyn FrontEndAdapter>> = self
            .inner
            .adapters
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .values()
            .cloned()
            .collect();
        for adapter in adapters {
            adapter.start(self.inner.root.child_token()).await.map_err(|error| {
                GatewayError::AdapterStart {
                    name: adapter.name().to_string(),
                    message: error.to_string(),
                }
            })?;
        }

        let worker_count = self.inner.config.worker_count.max(1);
        let workers = (0..worker_count)
            .map(|worker_id| {
                let inner = Arc::clone(&self.inner);
                tokio::spawn(async move { inner.run_worker(worker_id).await })
            })
            .collect::<Vec<_>>();

        let (sweeper_shutdown, shutdown_rx) = oneshot::channel();
        let sweeper = {
            let inner = Arc::clone(&self.inner);
            tokio::spawn(async move { inner.run_session_sweeper(shutdown_rx).await })
        };

        let mut runtime = self
            .inner
            .runtime
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        runtime.workers = workers;
        runtime.sweeper_shutdown = Some(sweeper_shutdown);
        runtime.sweeper = Some(sweeper);
        tracing::info!(
            workers = worker_count,
            queue_capacity = self.inner.config.queue_capacity,
            "gateway started"
        );
        Ok(())
    }

    /// Closes the queue, lets workers drain for up to the shutdown timeout,
    /// stops adapters and closes the backend client.
    pub async fn stop(&self) -> Result<(), GatewayError> {
        if !self.inner.started.load(Ordering::SeqCst) {
            return Err(GatewayError::NotStarted);
        }
        if self.inner.stopped.swap(true, Ordering::SeqCst) {
            return Ok(());
        }
        self.inner.sender.close();

        let (mut workers, sweeper_shutdown, sweeper) = {
            let mut runtime = self
                .inner
                .runtime
                .lock()
                .unwrap_or_else(PoisonError::into_inner);
            (
                std::mem::take(&mut runtime.workers),
                runtime.sweeper_shutdown.take(),
                runtime.sweeper.take(),
            )
        };

        let shutdown_timeout = self.inner.config.shutdown_timeout;
        let drained = tokio::time::timeout(shutdown_timeout, async {
            for worker in workers.iter_mut() {
                let _ = worker.await;
            }
        })
        .await;
        if drained.is_err() {
            tracing::warn!(
                shutdown_timeout_ms = shutdown_timeout.as_millis() as u64,
                remaining_events = self.inner.receiver.len(),
                "workers did not drain before shutdown timeout, cancelling in-flight events"
            );
            self.inner.root.cancel();
            for worker in &workers {
                worker.abort();
            }
        }

        if let Some(shutdown_tx) = sweeper_shutdown {
            let _ = shutdown_tx.send(());
        }
        if let Some(sweeper) = sweeper {
            let _ = sweeper.await;
        }

        let adapters: Vec<Arc<dyn FrontEndAdapter>> = self
            .inner
            .adapters
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .values()
            .cloned()
            .collect();
        for adapter in adapters {
            if let Err(error) = adapter.stop().await {
                tracing::warn!(adapter = %adapter.name(), error = %error, "adapter stop failed");
            }
        }

        self.inner.backend.close().await;
        self.inner.root.cancel();
        tracing::info!(stats = ?self.stats(), "gateway stopped");
        Ok(())
    }
}

impl GatewayInner {
    fn adapter(&self, name: &str) -> Option<Arc<dyn FrontEndAdapter>> {
        self.adapters
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(name)
            .cloned()
    }

    fn enqueue(&self, event: CanonicalInteractionEvent) -> EnqueueOutcome {
        if let Err(error) = event.validate() {
            tracing::warn!(error = %error, adapter = %event.meta.adapter_name, "rejected invalid event");
            return EnqueueOutcome::Rejected;
        }
        match self.sender.try_send(event) {
            Ok(()) => {
                self.stats.queued.fetch_add(1, Ordering::Relaxed);
                EnqueueOutcome::Queued
            }
            Err(TrySendError::Full(event)) => {
                self.stats.dropped.fetch_add(1, Ordering::Relaxed);
                tracing::warn!(
                    interaction_id = %event.interaction_id,
                    session_id = %event.session_id(),
                    capacity = self.config.queue_capacity,
                    "event queue full, dropping event"
                );
                EnqueueOutcome::DroppedFull
            }
            Err(TrySendError::Closed(event)) => {
                self.stats.dropped.fetch_add(1, Ordering::Relaxed);
                tracing::warn!(
                    interaction_id = %event.interaction_id,
                    "gateway is shutting down, dropping event"
                );
                EnqueueOutcome::DroppedClosed
            }
        }
    }

    async fn run_worker(self: Arc<Self>, worker_id: usize) {
        tracing::debug!(worker_id, "dispatch worker started");
        while let Ok(event) = self.receiver.recv().await {
            self.process(event).await;
        }
        tracing::debug!(worker_id, "dispatch worker exited");
    }

    async fn run_session_sweeper(self: Arc<Self>, mut shutdown_rx: oneshot::Receiver<()>) {
        let mut interval = tokio::time::interval(self.config.cleanup_interval.max(Duration::from_millis(1)));
        interval.set_missed_tick_behavior(MissedTickBehavior::Skip);
        interval.tick().await;
        loop {
            tokio::select! {
                _ = &mut shutdown_rx => break,
                _ = interval.tick() => {
                    let removed = self.sessions.sweep_expired();
                    if removed > 0 {
                        tracing::info!(removed, remaining = self.sessions.len(), "expired sessions swept");
                    }
                    let purged = self.backend.purge_expired();
                    if purged > 0 {
                        tracing::debug!(purged, "expired correlation entries purged");
                    }
                }
            }
        }
    }

    async fn resolve_intent(&self, event: &CanonicalInteractionEvent) -> InteractionIntent {
        let cancel = self.root.child_token();
        let result = tokio::time::timeout(
            self.config.dispatch_timeout,
            self.backend.process_event(event, &cancel),
        )
        .await;
        cancel.cancel();
        let error = match result {
            Ok(Ok(intent)) => return intent,
            Ok(Err(error)) => error.to_string(),
            Err(_) => format!(
                "dispatch deadline of {}ms exceeded",
                self.config.dispatch_timeout.as_millis()
            ),
        };
        self.stats.fallback_intents.fetch_add(1, Ordering::Relaxed);
        tracing::error!(
            interaction_id = %event.interaction_id,
            session_id = %event.session_id(),
            error = %error,
            "backend processing failed, sending fallback intent"
        );
        InteractionIntent::processing_error(event)
    }

    async fn process(&self, event: CanonicalInteractionEvent) {
        self.sessions.touch(&event);
        tracing::debug!(
            interaction_id = %event.interaction_id,
            session_id = %event.session_id(),
            adapter = %event.meta.adapter_name,
            "dispatching event"
        );

        let intent = self.resolve_intent(&event).await;
        let intent = degrade_intent(&event.capabilities, intent);

        match self.adapter(&event.meta.adapter_name) {
            Some(adapter) => {
                if let Err(error) = adapter.send_intent(&intent).await {
                    self.stats.undeliverable.fetch_add(1, Ordering::Relaxed);
                    tracing::warn!(
                        adapter = %event.meta.adapter_name,
                        intent_id = %intent.intent_id,
                        error = %error,
                        "adapter failed to deliver intent"
                    );
                }
            }
            None => {
                self.stats.undeliverable.fetch_add(1, Ordering::Relaxed);
                tracing::warn!(
                    adapter = %event.meta.adapter_name,
                    intent_id = %intent.intent_id,
                    "originating adapter is no longer registered, dropping intent"
                );
            }
        }
        self.stats.processed.fetch_add(1, Ordering::Relaxed);
    }
}
