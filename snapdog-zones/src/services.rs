//! Collaborator interfaces consumed by the zone core
//!
//! Every external system the core talks to sits behind one of these traits.
//! Implementations are resolved once and passed in as `Arc<dyn Trait>`;
//! the core never retries a failed call, it reports it.

use std::future::Future;

use async_trait::async_trait;
use tokio::sync::broadcast;
use tokio_util::sync::CancellationToken;

use crate::error::ServiceError;
use crate::fingerprint::ConfigurationFingerprint;
use crate::model::{
    ClientId, ClientIndex, ClientState, GroupId, PlayerEvent, PlayerStatus, PlaylistInfo,
    PlaylistTracks, StreamId, Topology, TrackInfo, ZoneIndex, ZoneState, ZoneStateChanged,
};

/// Result type for collaborator calls
pub type ServiceResult<T> = std::result::Result<T, ServiceError>;

/// The audio synchronization backend that owns group topology
#[async_trait]
pub trait AudioGroupBackend: Send + Sync {
    /// Full current topology: every group with members, stream and name
    async fn topology(&self) -> ServiceResult<Topology>;

    async fn set_group_stream(&self, group: &GroupId, stream: &StreamId) -> ServiceResult<()>;

    async fn set_group_name(&self, group: &GroupId, name: &str) -> ServiceResult<()>;

    /// Overwrite the group's membership with exactly `clients`
    async fn set_group_clients(&self, group: &GroupId, clients: &[ClientId]) -> ServiceResult<()>;

    async fn set_client_name(&self, client: &ClientId, name: &str) -> ServiceResult<()>;

    async fn set_group_mute(&self, group: &GroupId, mute: bool) -> ServiceResult<()>;

    async fn set_client_volume(&self, client: &ClientId, volume: u8) -> ServiceResult<()>;

    async fn set_client_mute(&self, client: &ClientId, mute: bool) -> ServiceResult<()>;

    async fn set_client_latency(&self, client: &ClientId, latency_ms: i32) -> ServiceResult<()>;
}

/// The media player rendering each zone's stream
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait MediaPlayer: Send + Sync {
    async fn play(&self, zone: ZoneIndex, track: &TrackInfo) -> ServiceResult<()>;

    async fn pause(&self, zone: ZoneIndex) -> ServiceResult<()>;

    async fn stop(&self, zone: ZoneIndex) -> ServiceResult<()>;

    async fn seek_to_position(&self, zone: ZoneIndex, position_ms: u64) -> ServiceResult<()>;

    async fn seek_to_progress(&self, zone: ZoneIndex, progress: f64) -> ServiceResult<()>;

    /// Live status of the zone's player
    async fn status(&self, zone: ZoneIndex) -> ServiceResult<PlayerStatus>;

    /// Position and state change events for one zone
    ///
    /// Dropping the receiver unsubscribes.
    fn subscribe(&self, zone: ZoneIndex) -> broadcast::Receiver<PlayerEvent>;
}

/// Catalog of playlists and their tracks
#[async_trait]
pub trait PlaylistCatalog: Send + Sync {
    async fn playlists(&self) -> ServiceResult<Vec<PlaylistInfo>>;

    /// Playlist by 1-based catalog index
    async fn playlist(&self, index: usize) -> ServiceResult<PlaylistTracks>;
}

/// Registry of physical clients and their zone assignments
#[async_trait]
pub trait ClientDirectory: Send + Sync {
    async fn all_clients(&self) -> ServiceResult<Vec<ClientState>>;

    async fn clients_by_zone(&self, zone: ZoneIndex) -> ServiceResult<Vec<ClientState>>;

    async fn client(&self, index: ClientIndex) -> ServiceResult<Option<ClientState>>;

    /// Store the latest state of a client
    async fn save_client(&self, client: ClientState) -> ServiceResult<()>;
}

/// Durable storage for zone/client state and the configuration fingerprint
#[async_trait]
pub trait PersistentStateStore: Send + Sync {
    async fn load_zone_states(&self) -> ServiceResult<Vec<ZoneState>>;

    async fn load_client_states(&self) -> ServiceResult<Vec<ClientState>>;

    async fn save_zone_state(&self, state: &ZoneState) -> ServiceResult<()>;

    async fn save_client_state(&self, state: &ClientState) -> ServiceResult<()>;

    async fn fingerprint(&self) -> ServiceResult<Option<ConfigurationFingerprint>>;

    async fn save_fingerprint(&self, fingerprint: &ConfigurationFingerprint) -> ServiceResult<()>;

    async fn clear_all_state(&self) -> ServiceResult<()>;

    async fn is_healthy(&self) -> bool;
}

/// Downstream consumer of zone state changes (push layer, adapters)
#[async_trait]
pub trait EventPublisher: Send + Sync {
    async fn publish(&self, event: ZoneStateChanged) -> ServiceResult<()>;
}

/// Race a collaborator call against a cancellation token
///
/// Resolves to `ServiceError::Cancelled` as soon as the token fires; the
/// abandoned call is dropped.
pub async fn cancellable<T, F>(token: &CancellationToken, call: F) -> ServiceResult<T>
where
    F: Future<Output = ServiceResult<T>>,
{
    tokio::select! {
        biased;
        _ = token.cancelled() => Err(ServiceError::Cancelled),
        result = call => result,
    }
}
