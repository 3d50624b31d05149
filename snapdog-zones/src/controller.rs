//! Zone controller
//!
//! Wires the collaborators, the zone registry, the topology reconciler and
//! the notification dispatcher together, and runs the startup sequence:
//!
//! 1. fingerprint gate decides whether persisted state applies
//! 2. client assignments are restored or reset to their defaults
//! 3. zones are created, continuing from restored snapshots
//! 4. the reconciler loop starts
//! 5. zones that were playing resume after a settle delay

use std::collections::HashMap;
use std::future::Future;
use std::sync::Arc;

use parking_lot::Mutex;
use state_store::SnapshotStore;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use crate::config::SnapDogConfig;
use crate::error::{ConfigError, Result, ZoneError};
use crate::fingerprint::{FingerprintGate, StartupDecision};
use crate::memory::{InMemoryClientDirectory, InMemoryStateStore};
use crate::model::{ClientId, ClientIndex, ClientState, ZoneIndex, ZoneState};
use crate::notify::{LogPublisher, NotificationDispatcher};
use crate::reconciler::{PassReport, TopologyReconciler, ZoneSyncOutcome};
use crate::registry::ZoneRegistry;
use crate::services::{
    cancellable, AudioGroupBackend, ClientDirectory, EventPublisher, MediaPlayer,
    PersistentStateStore, PlaylistCatalog, ServiceResult,
};
use crate::zone::{clamp_volume, ZoneContext, ZoneStateMachine};

/// Builder for [`ZoneController`]
///
/// The audio backend, media player and playlist catalog are required.
/// Without a client directory the configured clients are served from
/// memory; without a state store nothing survives a restart; without a
/// publisher state changes are only logged.
pub struct ZoneControllerBuilder {
    config: SnapDogConfig,
    backend: Option<Arc<dyn AudioGroupBackend>>,
    player: Option<Arc<dyn MediaPlayer>>,
    catalog: Option<Arc<dyn PlaylistCatalog>>,
    clients: Option<Arc<dyn ClientDirectory>>,
    store: Option<Arc<dyn PersistentStateStore>>,
    publisher: Option<Arc<dyn EventPublisher>>,
}

impl ZoneControllerBuilder {
    pub fn new(config: SnapDogConfig) -> Self {
        Self {
            config,
            backend: None,
            player: None,
            catalog: None,
            clients: None,
            store: None,
            publisher: None,
        }
    }

    pub fn backend(mut self, backend: Arc<dyn AudioGroupBackend>) -> Self {
        self.backend = Some(backend);
        self
    }

    pub fn player(mut self, player: Arc<dyn MediaPlayer>) -> Self {
        self.player = Some(player);
        self
    }

    pub fn catalog(mut self, catalog: Arc<dyn PlaylistCatalog>) -> Self {
        self.catalog = Some(catalog);
        self
    }

    pub fn client_directory(mut self, clients: Arc<dyn ClientDirectory>) -> Self {
        self.clients = Some(clients);
        self
    }

    pub fn state_store(mut self, store: Arc<dyn PersistentStateStore>) -> Self {
        self.store = Some(store);
        self
    }

    pub fn publisher(mut self, publisher: Arc<dyn EventPublisher>) -> Self {
        self.publisher = Some(publisher);
        self
    }

    /// Validate the configuration and assemble the controller
    ///
    /// Spawns the notification dispatcher, so this must run inside a Tokio
    /// runtime. Nothing else starts until [`ZoneController::start`].
    pub fn build(self) -> std::result::Result<ZoneController, ConfigError> {
        self.config.validate()?;

        let backend = self
            .backend
            .ok_or_else(|| ConfigError::Invalid("audio backend is required".to_string()))?;
        let player = self
            .player
            .ok_or_else(|| ConfigError::Invalid("media player is required".to_string()))?;
        let catalog = self
            .catalog
            .ok_or_else(|| ConfigError::Invalid("playlist catalog is required".to_string()))?;
        let clients = self.clients.unwrap_or_else(|| {
            Arc::new(InMemoryClientDirectory::from_config(&self.config)) as Arc<dyn ClientDirectory>
        });
        let store = self
            .store
            .unwrap_or_else(|| Arc::new(InMemoryStateStore::new()) as Arc<dyn PersistentStateStore>);
        let publisher = self
            .publisher
            .unwrap_or_else(|| Arc::new(LogPublisher) as Arc<dyn EventPublisher>);

        let cancel = CancellationToken::new();
        let (notifier, dispatcher) = NotificationDispatcher::spawn(
            publisher,
            Some(Arc::clone(&store)),
            self.config.playback.notification_buffer,
        );

        let states = SnapshotStore::new();
        let ctx = ZoneContext {
            player,
            catalog,
            backend: Arc::clone(&backend),
            clients: Arc::clone(&clients),
            states: states.clone(),
            notifier,
            playback: self.config.playback.clone(),
            cancel: cancel.child_token(),
        };
        let registry = Arc::new(ZoneRegistry::new(self.config.zones.clone(), ctx));
        let reconciler = TopologyReconciler::new(
            Arc::clone(&registry),
            Arc::clone(&backend),
            Arc::clone(&clients),
            self.config.reconciler.clone(),
            cancel.child_token(),
        );

        Ok(ZoneController {
            config: self.config,
            registry,
            reconciler,
            backend,
            clients,
            store,
            states,
            dispatcher,
            cancel,
            resume_task: Mutex::new(None),
        })
    }
}

/// Entry point for adapters: zone lookup, commands, bulk queries and
/// reconciliation triggers
pub struct ZoneController {
    config: SnapDogConfig,
    registry: Arc<ZoneRegistry>,
    reconciler: TopologyReconciler,
    backend: Arc<dyn AudioGroupBackend>,
    clients: Arc<dyn ClientDirectory>,
    store: Arc<dyn PersistentStateStore>,
    states: SnapshotStore<ZoneIndex, ZoneState>,
    dispatcher: NotificationDispatcher,
    cancel: CancellationToken,
    resume_task: Mutex<Option<JoinHandle<()>>>,
}

impl ZoneController {
    pub fn builder(config: SnapDogConfig) -> ZoneControllerBuilder {
        ZoneControllerBuilder::new(config)
    }

    /// Run the startup sequence
    ///
    /// Never fails: an unusable state store only means starting fresh.
    pub async fn start(&self) -> StartupDecision {
        let gate = FingerprintGate::new(Arc::clone(&self.store), self.cancel.child_token());
        let decision = gate.evaluate(&self.config).await;

        self.restore_clients(&decision).await;
        let registered = self
            .registry
            .initialize_with(decision.restored_zones().to_vec())
            .await;
        self.reconciler.start();
        self.schedule_resume(decision.zones_to_resume());

        tracing::info!(
            "Zone controller started with {} zones ({})",
            registered,
            match &decision {
                StartupDecision::FirstRun => "first run",
                StartupDecision::Restore { .. } => "state restored",
                StartupDecision::Discard { .. } => "configuration changed",
                StartupDecision::StoreUnavailable => "store unavailable",
            }
        );
        decision
    }

    pub fn config(&self) -> &SnapDogConfig {
        &self.config
    }

    // ---- zones ----

    pub async fn zone(&self, index: ZoneIndex) -> Result<ZoneStateMachine> {
        self.registry.get(index).await
    }

    pub async fn zone_exists(&self, index: ZoneIndex) -> bool {
        self.registry.zone_exists(index).await
    }

    pub async fn zone_indices(&self) -> Vec<ZoneIndex> {
        self.registry.indices().await
    }

    /// Live state of one zone
    pub async fn get_zone_state(&self, index: ZoneIndex) -> Result<ZoneState> {
        self.zone(index).await?.get_state().await
    }

    /// Live state of every zone that could report
    pub async fn get_all_zone_states(&self) -> Vec<ZoneState> {
        self.registry.get_all_states().await
    }

    /// Last known snapshot of a zone, without asking the player
    pub fn cached_zone_state(&self, index: ZoneIndex) -> Option<ZoneState> {
        self.states.get(&index)
    }

    // ---- clients ----

    pub async fn client_state(&self, index: ClientIndex) -> Result<ClientState> {
        self.call(self.clients.client(index))
            .await?
            .ok_or(ZoneError::ClientNotFound(index))
    }

    pub async fn all_client_states(&self) -> Result<Vec<ClientState>> {
        self.call(self.clients.all_clients()).await
    }

    /// Move a client to another zone and regroup the backend
    pub async fn assign_client(&self, client: ClientIndex, zone: ZoneIndex) -> Result<()> {
        if !self.registry.zone_exists(zone).await {
            return Err(ZoneError::ZoneNotFound(zone));
        }
        let mut state = self.client_state(client).await?;
        if state.zone_index == zone {
            return Ok(());
        }

        let previous = state.zone_index;
        state.zone_index = zone;
        self.save_client(state).await?;
        tracing::info!("{} moved from {} to {}", client, previous, zone);

        if !self.reconciler.trigger_immediate_regrouping() {
            tracing::debug!("Regrouping for {} folded into the running pass", client);
        }
        Ok(())
    }

    pub async fn set_client_volume(&self, client: ClientIndex, volume: i32) -> Result<()> {
        let volume = clamp_volume(volume);
        let mut state = self.client_state(client).await?;
        let id = backend_id(&state)?;
        self.call(self.backend.set_client_volume(&id, volume)).await?;
        state.volume = volume;
        self.save_client(state).await
    }

    pub async fn set_client_mute(&self, client: ClientIndex, mute: bool) -> Result<()> {
        let mut state = self.client_state(client).await?;
        let id = backend_id(&state)?;
        self.call(self.backend.set_client_mute(&id, mute)).await?;
        state.mute = mute;
        self.save_client(state).await
    }

    pub async fn set_client_latency(&self, client: ClientIndex, latency_ms: i32) -> Result<()> {
        if latency_ms < 0 {
            return Err(ZoneError::InvalidArgument(format!(
                "latency must not be negative, got {} ms",
                latency_ms
            )));
        }
        let mut state = self.client_state(client).await?;
        let id = backend_id(&state)?;
        self.call(self.backend.set_client_latency(&id, latency_ms))
            .await?;
        state.latency_ms = latency_ms;
        self.save_client(state).await
    }

    // ---- reconciliation ----

    pub fn reconciler(&self) -> &TopologyReconciler {
        &self.reconciler
    }

    pub async fn ensure_all_zones_converged(&self) -> PassReport {
        self.reconciler.ensure_all_zones_converged().await
    }

    pub async fn synchronize_zone(&self, index: ZoneIndex) -> Result<ZoneSyncOutcome> {
        self.reconciler.synchronize_zone(index).await
    }

    pub fn trigger_immediate_regrouping(&self) -> bool {
        self.reconciler.trigger_immediate_regrouping()
    }

    // ---- lifecycle ----

    /// Wait until restored playback has been resumed
    pub async fn wait_for_resume(&self) {
        let task = self.resume_task.lock().take();
        if let Some(task) = task {
            if let Err(e) = task.await {
                if !e.is_cancelled() {
                    tracing::warn!("Playback resume task failed: {}", e);
                }
            }
        }
    }

    /// Stop the reconciler, every zone and then the dispatcher
    ///
    /// Queued notifications are delivered before this returns.
    pub async fn shutdown(&self) {
        if let Some(task) = self.resume_task.lock().take() {
            task.abort();
        }
        self.reconciler.shutdown().await;
        self.registry.shutdown().await;
        self.dispatcher.shutdown().await;
        self.cancel.cancel();
        tracing::info!("Zone controller shut down");
    }

    // ---- internals ----

    async fn call<T>(&self, call: impl Future<Output = ServiceResult<T>>) -> Result<T> {
        cancellable(&self.cancel, call).await.map_err(ZoneError::from)
    }

    /// Store in the directory, then persist; persistence failures are logged
    async fn save_client(&self, state: ClientState) -> Result<()> {
        self.call(self.clients.save_client(state.clone())).await?;
        if let Err(e) = cancellable(&self.cancel, self.store.save_client_state(&state)).await {
            tracing::warn!("Failed to persist {}: {}", state.index, e);
        }
        Ok(())
    }

    /// Bring the directory in line with the startup decision
    ///
    /// Restored clients keep their saved assignment and settings; everyone
    /// else returns to their configured default zone. Identity reported by
    /// the backend is never discarded.
    async fn restore_clients(&self, decision: &StartupDecision) {
        let restored: HashMap<ClientIndex, &ClientState> = decision
            .restored_clients()
            .iter()
            .map(|c| (c.index, c))
            .collect();
        let zone_count = self.config.zones.len();

        for (position, config) in self.config.clients.iter().enumerate() {
            let index = ClientIndex::from_position(position);
            let existing = match self.call(self.clients.client(index)).await {
                Ok(existing) => existing,
                Err(e) => {
                    tracing::warn!("Failed to read {} from the directory: {}", index, e);
                    None
                }
            };

            let mut state = ClientState::from_config(index, config);
            if let Some(existing) = existing {
                state.backend_client_id = existing.backend_client_id;
                state.connected = existing.connected;
            }
            if let Some(saved) = restored.get(&index) {
                if (1..=zone_count).contains(&saved.zone_index.get()) {
                    state.zone_index = saved.zone_index;
                }
                state.volume = saved.volume.min(100);
                state.mute = saved.mute;
                state.latency_ms = saved.latency_ms;
                if state.backend_client_id.is_none() {
                    state.backend_client_id = saved.backend_client_id.clone();
                }
            }

            if let Err(e) = self.save_client(state).await {
                tracing::warn!("Failed to restore {}: {}", index, e);
            }
        }
    }

    fn schedule_resume(&self, zones: Vec<ZoneIndex>) {
        if zones.is_empty() {
            return;
        }

        let registry = Arc::clone(&self.registry);
        let cancel = self.cancel.child_token();
        let delay = self.config.playback.resume_delay();
        tracing::info!("Resuming playback of {} zones in {:?}", zones.len(), delay);

        let task = tokio::spawn(async move {
            tokio::select! {
                _ = cancel.cancelled() => return,
                _ = tokio::time::sleep(delay) => {}
            }
            for index in zones {
                let result = match registry.get(index).await {
                    Ok(zone) => zone.play().await,
                    Err(e) => Err(e),
                };
                if let Err(e) = result {
                    tracing::warn!("Failed to resume playback of {}: {}", index, e);
                }
            }
        });
        *self.resume_task.lock() = Some(task);
    }
}

fn backend_id(state: &ClientState) -> Result<ClientId> {
    state.backend_id().cloned().ok_or_else(|| {
        ZoneError::InvalidArgument(format!("{} is not known to the audio backend yet", state.index))
    })
}
