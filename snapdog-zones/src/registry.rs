//! Zone registry
//!
//! Owns the mapping from zone index to [`ZoneStateMachine`]. Initialization
//! runs once, guarded by a single lock, and tolerates individual zones
//! failing to construct.

use std::collections::HashMap;

use dashmap::DashMap;
use futures::future::join_all;

use crate::config::ZoneConfig;
use crate::error::{Result, ZoneError};
use crate::model::{ZoneIndex, ZoneState};
use crate::zone::{ZoneContext, ZoneStateMachine};

/// Lookup and bulk access for all configured zones
pub struct ZoneRegistry {
    configs: Vec<ZoneConfig>,
    ctx: ZoneContext,
    zones: DashMap<ZoneIndex, ZoneStateMachine>,
    initialized: tokio::sync::Mutex<bool>,
}

impl ZoneRegistry {
    pub fn new(configs: Vec<ZoneConfig>, ctx: ZoneContext) -> Self {
        Self {
            configs,
            ctx,
            zones: DashMap::new(),
            initialized: tokio::sync::Mutex::new(false),
        }
    }

    /// Create every configured zone with fresh state
    pub async fn initialize(&self) -> usize {
        self.initialize_with(Vec::new()).await
    }

    /// Create every configured zone, continuing from persisted snapshots
    ///
    /// Zones are created in configuration order with 1-based indices. A
    /// zone that fails to construct is logged and skipped; its siblings
    /// still register. Later calls are no-ops. Returns the number of
    /// registered zones.
    pub async fn initialize_with(&self, persisted: Vec<ZoneState>) -> usize {
        let mut initialized = self.initialized.lock().await;
        if *initialized {
            return self.zones.len();
        }

        let mut persisted: HashMap<ZoneIndex, ZoneState> =
            persisted.into_iter().map(|s| (s.index, s)).collect();

        for (position, config) in self.configs.iter().enumerate() {
            let index = ZoneIndex::from_position(position);
            let restored = persisted.remove(&index);
            let fresh = restored.is_none();

            let zone = match ZoneStateMachine::new(index, config, restored, self.ctx.clone()) {
                Ok(zone) => zone,
                Err(e) => {
                    tracing::error!("Failed to initialize {} ('{}'): {}", index, config.name, e);
                    continue;
                }
            };

            if fresh {
                if let Err(e) = zone.preload_default_playlist().await {
                    tracing::warn!("Failed to preload playlist for {}: {}", index, e);
                }
            }
            self.zones.insert(index, zone);
            tracing::debug!("Registered {} ('{}')", index, config.name);
        }

        if !persisted.is_empty() {
            tracing::debug!(
                "Ignored {} persisted zone states without a configured zone",
                persisted.len()
            );
        }

        *initialized = true;
        tracing::info!(
            "Zone registry initialized with {}/{} zones",
            self.zones.len(),
            self.configs.len()
        );
        self.zones.len()
    }

    async fn ensure_initialized(&self) {
        if !*self.initialized.lock().await {
            self.initialize().await;
        }
    }

    /// Look up a zone, initializing the registry on first use
    pub async fn get(&self, index: ZoneIndex) -> Result<ZoneStateMachine> {
        self.ensure_initialized().await;
        self.zones
            .get(&index)
            .map(|zone| zone.value().clone())
            .ok_or(ZoneError::ZoneNotFound(index))
    }

    pub async fn zone_exists(&self, index: ZoneIndex) -> bool {
        self.ensure_initialized().await;
        self.zones.contains_key(&index)
    }

    /// All registered zones in index order
    pub async fn zones(&self) -> Vec<ZoneStateMachine> {
        self.ensure_initialized().await;
        let mut zones: Vec<ZoneStateMachine> =
            self.zones.iter().map(|entry| entry.value().clone()).collect();
        zones.sort_by_key(|zone| zone.index());
        zones
    }

    pub async fn indices(&self) -> Vec<ZoneIndex> {
        self.zones().await.iter().map(|zone| zone.index()).collect()
    }

    /// Refreshed state of every zone, fetched concurrently
    ///
    /// A zone that fails to report is left out rather than failing the
    /// whole request.
    pub async fn get_all_states(&self) -> Vec<ZoneState> {
        let zones = self.zones().await;
        let results = join_all(zones.iter().map(|zone| zone.get_state())).await;

        zones
            .iter()
            .zip(results)
            .filter_map(|(zone, result)| match result {
                Ok(state) => Some(state),
                Err(e) => {
                    tracing::warn!("Failed to read state of {}: {}", zone.index(), e);
                    None
                }
            })
            .collect()
    }

    pub fn len(&self) -> usize {
        self.zones.len()
    }

    pub fn is_empty(&self) -> bool {
        self.zones.is_empty()
    }

    /// Shut every zone down, waiting for their trackers to stop
    pub async fn shutdown(&self) {
        let zones: Vec<ZoneStateMachine> =
            self.zones.iter().map(|entry| entry.value().clone()).collect();
        join_all(zones.iter().map(|zone| zone.shutdown())).await;
    }
}
