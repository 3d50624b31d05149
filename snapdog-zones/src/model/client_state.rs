//! Client state snapshot

use serde::{Deserialize, Serialize};

use super::{ClientId, ClientIndex, ZoneIndex};
use crate::config::ClientConfig;

/// State of one physical playback endpoint
///
/// Owned by the client directory; the reconciler only reads it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ClientState {
    pub index: ClientIndex,
    /// Configured display name
    pub name: String,
    pub mac: String,
    /// Zone the client is currently assigned to
    pub zone_index: ZoneIndex,
    /// Identity in the synchronization backend, unknown until reported
    pub backend_client_id: Option<ClientId>,
    pub connected: bool,
    pub volume: u8,
    pub mute: bool,
    pub latency_ms: i32,
}

impl ClientState {
    /// Initial state from configuration, assigned to its default zone
    pub fn from_config(index: ClientIndex, config: &ClientConfig) -> Self {
        Self {
            index,
            name: config.name.clone(),
            mac: config.mac.clone(),
            zone_index: ZoneIndex::new(config.default_zone),
            backend_client_id: None,
            connected: false,
            volume: 100,
            mute: false,
            latency_ms: 0,
        }
    }

    /// Backend identity, if one has been reported and is non-empty
    pub fn backend_id(&self) -> Option<&ClientId> {
        self.backend_client_id
            .as_ref()
            .filter(|id| !id.as_str().is_empty())
    }
}
