//! Configuration fingerprint and the startup restore gate
//!
//! Persisted zone and client state is only meaningful for the configuration
//! that produced it. On startup the active configuration is hashed and
//! compared with the last persisted fingerprint:
//!
//! ```text
//! no fingerprint      → persist it, start from defaults   (FirstRun)
//! same hash           → restore persisted state verbatim  (Restore)
//! different hash      → clear state, persist new hash     (Discard)
//! store unhealthy     → skip restoration entirely         (StoreUnavailable)
//! ```

use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use tokio_util::sync::CancellationToken;

use crate::config::SnapDogConfig;
use crate::model::{ClientState, PlaybackState, ZoneIndex, ZoneState};
use crate::services::{cancellable, PersistentStateStore};

/// Hash of the declarative zone/client configuration
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConfigurationFingerprint {
    /// Hex SHA-256 over the ordered configuration entries
    pub hash: String,
    pub created_at: DateTime<Utc>,
    pub zone_count: usize,
    pub client_count: usize,
    pub zone_names: Vec<String>,
    pub client_names: Vec<String>,
}

impl ConfigurationFingerprint {
    /// Fingerprint the zones (name, sink) and clients (name, MAC, default zone)
    ///
    /// Order-sensitive: reordering zones changes every index, so it must
    /// change the hash too.
    pub fn compute(config: &SnapDogConfig) -> Self {
        let mut hasher = Sha256::new();
        hasher.update((config.zones.len() as u64).to_le_bytes());
        for zone in &config.zones {
            hash_field(&mut hasher, &zone.name);
            hash_field(&mut hasher, &zone.sink);
        }
        hasher.update((config.clients.len() as u64).to_le_bytes());
        for client in &config.clients {
            hash_field(&mut hasher, &client.name);
            hash_field(&mut hasher, &client.mac);
            hasher.update((client.default_zone as u64).to_le_bytes());
        }

        Self {
            hash: hex::encode(hasher.finalize()),
            created_at: Utc::now(),
            zone_count: config.zones.len(),
            client_count: config.clients.len(),
            zone_names: config.zones.iter().map(|z| z.name.clone()).collect(),
            client_names: config.clients.iter().map(|c| c.name.clone()).collect(),
        }
    }

    pub fn matches(&self, other: &ConfigurationFingerprint) -> bool {
        self.hash == other.hash
    }
}

/// Length-prefixed so no two field sequences share an encoding
fn hash_field(hasher: &mut Sha256, value: &str) {
    hasher.update((value.len() as u64).to_le_bytes());
    hasher.update(value.as_bytes());
}

/// What startup should do with persisted state
#[derive(Debug, Clone, PartialEq)]
pub enum StartupDecision {
    /// No fingerprint was stored; start from defaults
    FirstRun,
    /// Configuration unchanged; restore these states verbatim
    Restore {
        zones: Vec<ZoneState>,
        clients: Vec<ClientState>,
    },
    /// Configuration changed; persisted state was discarded
    Discard {
        previous_hash: String,
    },
    /// The store is unusable; start from defaults without touching it
    StoreUnavailable,
}

impl StartupDecision {
    pub fn restored_zones(&self) -> &[ZoneState] {
        match self {
            StartupDecision::Restore { zones, .. } => zones,
            _ => &[],
        }
    }

    pub fn restored_clients(&self) -> &[ClientState] {
        match self {
            StartupDecision::Restore { clients, .. } => clients,
            _ => &[],
        }
    }

    /// Zones whose restored state was playing, in index order
    pub fn zones_to_resume(&self) -> Vec<ZoneIndex> {
        let mut zones: Vec<ZoneIndex> = self
            .restored_zones()
            .iter()
            .filter(|z| z.playback_state == PlaybackState::Playing)
            .map(|z| z.index)
            .collect();
        zones.sort();
        zones
    }
}

/// Decides whether persisted state survives a restart
pub struct FingerprintGate {
    store: Arc<dyn PersistentStateStore>,
    cancel: CancellationToken,
}

impl FingerprintGate {
    pub fn new(store: Arc<dyn PersistentStateStore>, cancel: CancellationToken) -> Self {
        Self { store, cancel }
    }

    /// Compare the active configuration with the persisted fingerprint
    ///
    /// Never fails: any store problem degrades to starting from defaults.
    pub async fn evaluate(&self, config: &SnapDogConfig) -> StartupDecision {
        if !self.store.is_healthy().await {
            tracing::warn!("Persistent state store is unhealthy, skipping state restoration");
            return StartupDecision::StoreUnavailable;
        }

        let current = ConfigurationFingerprint::compute(config);
        let previous = match cancellable(&self.cancel, self.store.fingerprint()).await {
            Ok(previous) => previous,
            Err(e) => {
                tracing::warn!("Failed to read configuration fingerprint: {}", e);
                return StartupDecision::StoreUnavailable;
            }
        };

        match previous {
            None => {
                tracing::info!(
                    "No configuration fingerprint found, first run with {} zones and {} clients",
                    current.zone_count,
                    current.client_count
                );
                self.persist(&current).await;
                StartupDecision::FirstRun
            }
            Some(previous) if previous.matches(&current) => self.restore().await,
            Some(previous) => {
                tracing::info!(
                    "Configuration changed ({} -> {}), discarding persisted state",
                    short_hash(&previous.hash),
                    short_hash(&current.hash)
                );
                if let Err(e) = cancellable(&self.cancel, self.store.clear_all_state()).await {
                    tracing::warn!("Failed to clear persisted state: {}", e);
                }
                self.persist(&current).await;
                StartupDecision::Discard {
                    previous_hash: previous.hash,
                }
            }
        }
    }

    async fn restore(&self) -> StartupDecision {
        let zones = cancellable(&self.cancel, self.store.load_zone_states()).await;
        let clients = cancellable(&self.cancel, self.store.load_client_states()).await;

        match (zones, clients) {
            (Ok(zones), Ok(clients)) => {
                tracing::info!(
                    "Configuration unchanged, restoring {} zone and {} client states",
                    zones.len(),
                    clients.len()
                );
                StartupDecision::Restore { zones, clients }
            }
            (Err(e), _) | (_, Err(e)) => {
                tracing::warn!("Failed to load persisted state, starting fresh: {}", e);
                StartupDecision::StoreUnavailable
            }
        }
    }

    async fn persist(&self, fingerprint: &ConfigurationFingerprint) {
        if let Err(e) = cancellable(&self.cancel, self.store.save_fingerprint(fingerprint)).await {
            tracing::warn!("Failed to persist configuration fingerprint: {}", e);
        }
    }
}

fn short_hash(hash: &str) -> &str {
    hash.get(..12).unwrap_or(hash)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{ClientConfig, ZoneConfig};
    use proptest::prelude::*;

    fn config(zones: &[&str], clients: &[(&str, usize)]) -> SnapDogConfig {
        SnapDogConfig::new(
            zones
                .iter()
                .enumerate()
                .map(|(i, name)| ZoneConfig {
                    name: name.to_string(),
                    sink: format!("/snapsinks/zone{}", i + 1),
                })
                .collect(),
            clients
                .iter()
                .enumerate()
                .map(|(i, (name, zone))| ClientConfig {
                    name: name.to_string(),
                    mac: format!("02:42:ac:11:00:{:02x}", i),
                    default_zone: *zone,
                })
                .collect(),
        )
    }

    #[test]
    fn test_fingerprint_is_deterministic() {
        let a = ConfigurationFingerprint::compute(&config(&["Living", "Kitchen"], &[("Sofa", 1)]));
        let b = ConfigurationFingerprint::compute(&config(&["Living", "Kitchen"], &[("Sofa", 1)]));
        assert!(a.matches(&b));
        assert_eq!(a.hash.len(), 64);
        assert_eq!(a.zone_names, vec!["Living", "Kitchen"]);
        assert_eq!(a.client_count, 1);
    }

    #[test]
    fn test_fingerprint_is_order_sensitive() {
        let a = ConfigurationFingerprint::compute(&config(&["Living", "Kitchen"], &[]));
        let b = ConfigurationFingerprint::compute(&config(&["Kitchen", "Living"], &[]));
        assert!(!a.matches(&b));
    }

    #[test]
    fn test_fingerprint_tracks_client_default_zone() {
        let a = ConfigurationFingerprint::compute(&config(&["A", "B"], &[("Sofa", 1)]));
        let b = ConfigurationFingerprint::compute(&config(&["A", "B"], &[("Sofa", 2)]));
        assert!(!a.matches(&b));
    }

    #[test]
    fn test_fields_cannot_bleed_into_each_other() {
        let mut a = config(&["A"], &[]);
        a.zones[0].name = "A\tB".to_string();
        a.zones[0].sink = "C".to_string();
        let mut b = config(&["A"], &[]);
        b.zones[0].sink = "B\tC".to_string();

        let a = ConfigurationFingerprint::compute(&a);
        let b = ConfigurationFingerprint::compute(&b);
        assert!(!a.matches(&b));
    }

    #[test]
    fn test_zone_and_client_lists_do_not_overlap() {
        let a = ConfigurationFingerprint::compute(&config(&["A", "B"], &[]));
        let b = ConfigurationFingerprint::compute(&config(&["A"], &[("B", 1)]));
        assert!(!a.matches(&b));
    }

    proptest! {
        #[test]
        fn prop_renaming_a_zone_changes_hash(
            name in "[A-Za-z ]{1,16}",
            suffix in "[A-Za-z]{1,4}",
        ) {
            let before = ConfigurationFingerprint::compute(&config(&[name.as_str()], &[]));
            let renamed_name = format!("{}{}", name, suffix);
            let renamed = ConfigurationFingerprint::compute(&config(&[renamed_name.as_str()], &[]));
            prop_assert!(!before.matches(&renamed));
        }
    }

    #[test]
    fn test_zones_to_resume_only_playing() {
        let mut playing = ZoneState::initial(ZoneIndex::new(2), "B");
        playing.playback_state = PlaybackState::Playing;
        let paused = {
            let mut z = ZoneState::initial(ZoneIndex::new(1), "A");
            z.playback_state = PlaybackState::Paused;
            z
        };
        let decision = StartupDecision::Restore {
            zones: vec![playing, paused],
            clients: vec![],
        };
        assert_eq!(decision.zones_to_resume(), vec![ZoneIndex::new(2)]);
        assert!(StartupDecision::FirstRun.zones_to_resume().is_empty());
    }
}
