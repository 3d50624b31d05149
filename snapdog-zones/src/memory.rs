//! In-memory collaborator implementations
//!
//! Backed by [`state_store::SnapshotStore`]. Useful for embedding without a
//! durable store and as the default wiring in tests.

use std::sync::atomic::{AtomicBool, Ordering};

use async_trait::async_trait;
use parking_lot::RwLock;
use state_store::SnapshotStore;

use crate::config::SnapDogConfig;
use crate::error::ServiceError;
use crate::fingerprint::ConfigurationFingerprint;
use crate::model::{ClientIndex, ClientState, ZoneIndex, ZoneState};
use crate::services::{ClientDirectory, PersistentStateStore, ServiceResult};

/// Client registry keyed by client index
#[derive(Debug, Clone, Default)]
pub struct InMemoryClientDirectory {
    clients: SnapshotStore<ClientIndex, ClientState>,
}

impl InMemoryClientDirectory {
    pub fn new() -> Self {
        Self::default()
    }

    /// Directory seeded with every configured client at its default zone
    pub fn from_config(config: &SnapDogConfig) -> Self {
        let directory = Self::new();
        for (position, client) in config.clients.iter().enumerate() {
            let index = ClientIndex::from_position(position);
            directory
                .clients
                .set(index, ClientState::from_config(index, client));
        }
        directory
    }

    /// Insert or replace a client
    pub fn insert(&self, client: ClientState) {
        self.clients.set(client.index, client);
    }

    pub fn get(&self, index: ClientIndex) -> Option<ClientState> {
        self.clients.get(&index)
    }

    pub fn len(&self) -> usize {
        self.clients.len()
    }

    pub fn is_empty(&self) -> bool {
        self.clients.is_empty()
    }

    fn sorted(&self) -> Vec<ClientState> {
        let mut clients = self.clients.values();
        clients.sort_by_key(|c| c.index);
        clients
    }
}

#[async_trait]
impl ClientDirectory for InMemoryClientDirectory {
    async fn all_clients(&self) -> ServiceResult<Vec<ClientState>> {
        Ok(self.sorted())
    }

    async fn clients_by_zone(&self, zone: ZoneIndex) -> ServiceResult<Vec<ClientState>> {
        Ok(self
            .sorted()
            .into_iter()
            .filter(|c| c.zone_index == zone)
            .collect())
    }

    async fn client(&self, index: ClientIndex) -> ServiceResult<Option<ClientState>> {
        Ok(self.clients.get(&index))
    }

    async fn save_client(&self, client: ClientState) -> ServiceResult<()> {
        self.insert(client);
        Ok(())
    }
}

/// Volatile state store; survives only as long as the process
///
/// The health flag can be flipped to simulate an unreachable store.
#[derive(Debug)]
pub struct InMemoryStateStore {
    zones: SnapshotStore<ZoneIndex, ZoneState>,
    clients: SnapshotStore<ClientIndex, ClientState>,
    fingerprint: RwLock<Option<ConfigurationFingerprint>>,
    healthy: AtomicBool,
}

impl Default for InMemoryStateStore {
    fn default() -> Self {
        Self {
            zones: SnapshotStore::new(),
            clients: SnapshotStore::new(),
            fingerprint: RwLock::new(None),
            healthy: AtomicBool::new(true),
        }
    }
}

impl InMemoryStateStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set_healthy(&self, healthy: bool) {
        self.healthy.store(healthy, Ordering::SeqCst);
    }

    pub fn zone_state(&self, index: ZoneIndex) -> Option<ZoneState> {
        self.zones.get(&index)
    }

    pub fn client_state(&self, index: ClientIndex) -> Option<ClientState> {
        self.clients.get(&index)
    }

    pub fn stored_fingerprint(&self) -> Option<ConfigurationFingerprint> {
        self.fingerprint.read().clone()
    }

    fn ensure_healthy(&self) -> ServiceResult<()> {
        if self.healthy.load(Ordering::SeqCst) {
            Ok(())
        } else {
            Err(ServiceError::Store("store is unavailable".to_string()))
        }
    }
}

#[async_trait]
impl PersistentStateStore for InMemoryStateStore {
    async fn load_zone_states(&self) -> ServiceResult<Vec<ZoneState>> {
        self.ensure_healthy()?;
        let mut zones = self.zones.values();
        zones.sort_by_key(|z| z.index);
        Ok(zones)
    }

    async fn load_client_states(&self) -> ServiceResult<Vec<ClientState>> {
        self.ensure_healthy()?;
        let mut clients = self.clients.values();
        clients.sort_by_key(|c| c.index);
        Ok(clients)
    }

    async fn save_zone_state(&self, state: &ZoneState) -> ServiceResult<()> {
        self.ensure_healthy()?;
        self.zones.set(state.index, state.clone());
        Ok(())
    }

    async fn save_client_state(&self, state: &ClientState) -> ServiceResult<()> {
        self.ensure_healthy()?;
        self.clients.set(state.index, state.clone());
        Ok(())
    }

    async fn fingerprint(&self) -> ServiceResult<Option<ConfigurationFingerprint>> {
        self.ensure_healthy()?;
        Ok(self.fingerprint.read().clone())
    }

    async fn save_fingerprint(&self, fingerprint: &ConfigurationFingerprint) -> ServiceResult<()> {
        self.ensure_healthy()?;
        *self.fingerprint.write() = Some(fingerprint.clone());
        Ok(())
    }

    async fn clear_all_state(&self) -> ServiceResult<()> {
        self.ensure_healthy()?;
        self.zones.clear();
        self.clients.clear();
        *self.fingerprint.write() = None;
        Ok(())
    }

    async fn is_healthy(&self) -> bool {
        self.healthy.load(Ordering::SeqCst)
    }
}
