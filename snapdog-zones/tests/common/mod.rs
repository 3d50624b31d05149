//! In-memory collaborators for integration tests.
//!
//! These fakes stand in for the audio backend, media player and playlist
//! catalog. Each one records the calls it receives and can be switched into
//! failure modes to exercise error paths.

#![allow(dead_code)]

use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use snapdog_zones::{
    AudioGroupBackend, BackendGroup, ClientConfig, ClientId, ClientIndex, ClientState,
    EventPublisher, GroupId, InMemoryClientDirectory, InMemoryStateStore, MediaPlayer,
    PlaybackConfig, PlayerEvent, PlayerStatus, PlaylistCatalog, PlaylistInfo, PlaylistTracks,
    ServiceError, ServiceResult, SnapDogConfig, StreamId, Topology, TrackInfo, ZoneConfig,
    ZoneContext, ZoneController, ZoneIndex, ZoneNotifier, ZoneStateChanged,
};
use state_store::SnapshotStore;
use tokio::sync::broadcast;
use tokio_util::sync::CancellationToken;

/// A mutating call received by [`FakeBackend`]
#[derive(Debug, Clone, PartialEq)]
pub enum BackendCall {
    SetGroupStream(GroupId, StreamId),
    SetGroupName(GroupId, String),
    SetGroupClients(GroupId, Vec<ClientId>),
    SetClientName(ClientId, String),
    SetGroupMute(GroupId, bool),
    SetClientVolume(ClientId, u8),
    SetClientMute(ClientId, bool),
    SetClientLatency(ClientId, i32),
}

/// Audio backend that keeps its topology in memory.
///
/// Group calls are applied to the held topology so a following pass sees
/// their effect. Clients evicted from a group land in a fresh group of
/// their own on the default stream, the way a real server reassigns them.
#[derive(Clone, Default)]
pub struct FakeBackend {
    topology: Arc<Mutex<Topology>>,
    calls: Arc<Mutex<Vec<BackendCall>>>,
    topology_fetches: Arc<AtomicU32>,
    fail_topology: Arc<AtomicBool>,
    failing_groups: Arc<Mutex<HashSet<GroupId>>>,
    failing_clients: Arc<Mutex<HashSet<ClientId>>>,
    delay: Arc<Mutex<Duration>>,
}

impl FakeBackend {
    pub fn new(groups: Vec<BackendGroup>) -> Self {
        let backend = Self::default();
        *backend.topology.lock().unwrap() = Topology::new(groups);
        backend
    }

    /// Current topology as the backend holds it
    pub fn topology_now(&self) -> Topology {
        self.topology.lock().unwrap().clone()
    }

    pub fn group(&self, id: &str) -> Option<BackendGroup> {
        self.topology_now().group(&GroupId::new(id)).cloned()
    }

    pub fn calls(&self) -> Vec<BackendCall> {
        self.calls.lock().unwrap().clone()
    }

    pub fn clear_calls(&self) {
        self.calls.lock().unwrap().clear();
    }

    pub fn topology_fetches(&self) -> u32 {
        self.topology_fetches.load(Ordering::SeqCst)
    }

    /// Make `topology()` fail, as if the backend were unreachable
    pub fn set_unreachable(&self, unreachable: bool) {
        self.fail_topology.store(unreachable, Ordering::SeqCst);
    }

    /// Make every call that targets this group fail
    pub fn fail_group(&self, id: &str) {
        self.failing_groups.lock().unwrap().insert(GroupId::new(id));
    }

    /// Make every call that targets this client fail
    pub fn fail_client(&self, id: &str) {
        self.failing_clients.lock().unwrap().insert(ClientId::new(id));
    }

    /// Delay applied to every call before it completes
    pub fn set_delay(&self, delay: Duration) {
        *self.delay.lock().unwrap() = delay;
    }

    async fn pause(&self) {
        let delay = *self.delay.lock().unwrap();
        if !delay.is_zero() {
            tokio::time::sleep(delay).await;
        }
    }

    async fn record(&self, call: BackendCall) -> ServiceResult<()> {
        self.calls.lock().unwrap().push(call.clone());
        self.pause().await;

        let failing = match &call {
            BackendCall::SetGroupStream(group, _)
            | BackendCall::SetGroupName(group, _)
            | BackendCall::SetGroupClients(group, _)
            | BackendCall::SetGroupMute(group, _) => {
                self.failing_groups.lock().unwrap().contains(group)
            }
            BackendCall::SetClientName(client, _)
            | BackendCall::SetClientVolume(client, _)
            | BackendCall::SetClientMute(client, _)
            | BackendCall::SetClientLatency(client, _) => {
                self.failing_clients.lock().unwrap().contains(client)
            }
        };
        if failing {
            return Err(ServiceError::Backend(format!("rejected {:?}", call)));
        }

        let mut topology = self.topology.lock().unwrap();
        match &call {
            BackendCall::SetGroupStream(group, stream) => topology.set_stream(group, stream),
            BackendCall::SetGroupName(group, name) => topology.set_name(group, name),
            BackendCall::SetGroupClients(group, clients) => {
                let evicted: Vec<_> = topology
                    .group(group)
                    .map(|g| {
                        g.members
                            .iter()
                            .filter(|m| !clients.contains(&m.id))
                            .cloned()
                            .collect()
                    })
                    .unwrap_or_default();
                topology.set_clients(group, clients);
                for member in evicted {
                    topology.groups.push(
                        BackendGroup::new(format!("orphan-{}", member.id), "default", "")
                            .with_member(member.id.clone(), member.name.clone()),
                    );
                }
            }
            BackendCall::SetClientName(client, name) => topology.set_client_name(client, name),
            BackendCall::SetGroupMute(group, mute) => {
                if let Some(g) = topology.groups.iter_mut().find(|g| &g.id == group) {
                    g.muted = *mute;
                }
            }
            _ => {}
        }
        Ok(())
    }
}

#[async_trait]
impl AudioGroupBackend for FakeBackend {
    async fn topology(&self) -> ServiceResult<Topology> {
        self.topology_fetches.fetch_add(1, Ordering::SeqCst);
        self.pause().await;
        if self.fail_topology.load(Ordering::SeqCst) {
            return Err(ServiceError::Backend("connection refused".to_string()));
        }
        Ok(self.topology_now())
    }

    async fn set_group_stream(&self, group: &GroupId, stream: &StreamId) -> ServiceResult<()> {
        self.record(BackendCall::SetGroupStream(group.clone(), stream.clone()))
            .await
    }

    async fn set_group_name(&self, group: &GroupId, name: &str) -> ServiceResult<()> {
        self.record(BackendCall::SetGroupName(group.clone(), name.to_string()))
            .await
    }

    async fn set_group_clients(&self, group: &GroupId, clients: &[ClientId]) -> ServiceResult<()> {
        self.record(BackendCall::SetGroupClients(group.clone(), clients.to_vec()))
            .await
    }

    async fn set_client_name(&self, client: &ClientId, name: &str) -> ServiceResult<()> {
        self.record(BackendCall::SetClientName(client.clone(), name.to_string()))
            .await
    }

    async fn set_group_mute(&self, group: &GroupId, mute: bool) -> ServiceResult<()> {
        self.record(BackendCall::SetGroupMute(group.clone(), mute)).await
    }

    async fn set_client_volume(&self, client: &ClientId, volume: u8) -> ServiceResult<()> {
        self.record(BackendCall::SetClientVolume(client.clone(), volume))
            .await
    }

    async fn set_client_mute(&self, client: &ClientId, mute: bool) -> ServiceResult<()> {
        self.record(BackendCall::SetClientMute(client.clone(), mute)).await
    }

    async fn set_client_latency(&self, client: &ClientId, latency_ms: i32) -> ServiceResult<()> {
        self.record(BackendCall::SetClientLatency(client.clone(), latency_ms))
            .await
    }
}

/// Media player that records commands and serves scripted status.
#[derive(Clone)]
pub struct FakePlayer {
    plays: Arc<Mutex<Vec<(ZoneIndex, TrackInfo)>>>,
    pauses: Arc<AtomicU32>,
    stops: Arc<AtomicU32>,
    status: Arc<Mutex<HashMap<ZoneIndex, PlayerStatus>>>,
    failing_status: Arc<Mutex<HashSet<ZoneIndex>>>,
    fail_commands: Arc<AtomicBool>,
    events: broadcast::Sender<PlayerEvent>,
}

impl Default for FakePlayer {
    fn default() -> Self {
        let (events, _) = broadcast::channel(64);
        Self {
            plays: Arc::new(Mutex::new(Vec::new())),
            pauses: Arc::new(AtomicU32::new(0)),
            stops: Arc::new(AtomicU32::new(0)),
            status: Arc::new(Mutex::new(HashMap::new())),
            failing_status: Arc::new(Mutex::new(HashSet::new())),
            fail_commands: Arc::new(AtomicBool::new(false)),
            events,
        }
    }
}

impl FakePlayer {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn plays(&self) -> Vec<(ZoneIndex, TrackInfo)> {
        self.plays.lock().unwrap().clone()
    }

    pub fn played_zones(&self) -> Vec<ZoneIndex> {
        self.plays().into_iter().map(|(zone, _)| zone).collect()
    }

    pub fn pause_count(&self) -> u32 {
        self.pauses.load(Ordering::SeqCst)
    }

    pub fn stop_count(&self) -> u32 {
        self.stops.load(Ordering::SeqCst)
    }

    pub fn set_status(&self, zone: ZoneIndex, status: PlayerStatus) {
        self.status.lock().unwrap().insert(zone, status);
    }

    /// Make `status()` fail for one zone
    pub fn fail_status_for(&self, zone: ZoneIndex) {
        self.failing_status.lock().unwrap().insert(zone);
    }

    /// Make play, pause, stop and seek fail
    pub fn set_failing(&self, failing: bool) {
        self.fail_commands.store(failing, Ordering::SeqCst);
    }

    /// Push an event to every subscriber
    pub fn emit(&self, event: PlayerEvent) {
        let _ = self.events.send(event);
    }

    fn check(&self) -> ServiceResult<()> {
        if self.fail_commands.load(Ordering::SeqCst) {
            Err(ServiceError::Player("player offline".to_string()))
        } else {
            Ok(())
        }
    }
}

#[async_trait]
impl MediaPlayer for FakePlayer {
    async fn play(&self, zone: ZoneIndex, track: &TrackInfo) -> ServiceResult<()> {
        self.check()?;
        self.plays.lock().unwrap().push((zone, track.clone()));
        Ok(())
    }

    async fn pause(&self, _zone: ZoneIndex) -> ServiceResult<()> {
        self.check()?;
        self.pauses.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    async fn stop(&self, _zone: ZoneIndex) -> ServiceResult<()> {
        self.check()?;
        self.stops.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    async fn seek_to_position(&self, _zone: ZoneIndex, _position_ms: u64) -> ServiceResult<()> {
        self.check()
    }

    async fn seek_to_progress(&self, _zone: ZoneIndex, _progress: f64) -> ServiceResult<()> {
        self.check()
    }

    async fn status(&self, zone: ZoneIndex) -> ServiceResult<PlayerStatus> {
        if self.failing_status.lock().unwrap().contains(&zone) {
            return Err(ServiceError::Player(format!("no status for {}", zone)));
        }
        Ok(self
            .status
            .lock()
            .unwrap()
            .get(&zone)
            .cloned()
            .unwrap_or_default())
    }

    fn subscribe(&self, _zone: ZoneIndex) -> broadcast::Receiver<PlayerEvent> {
        self.events.subscribe()
    }
}

/// Playlist catalog with generated playlists.
#[derive(Clone, Default)]
pub struct FakeCatalog {
    playlists: Arc<Vec<PlaylistTracks>>,
    requests: Arc<Mutex<Vec<usize>>>,
    failing: Arc<AtomicBool>,
}

impl FakeCatalog {
    /// `sizes[i]` is the track count of playlist `i + 1`
    pub fn with_playlists(sizes: &[usize]) -> Self {
        let playlists = sizes
            .iter()
            .enumerate()
            .map(|(position, &count)| {
                let index = position + 1;
                PlaylistTracks {
                    info: PlaylistInfo {
                        id: format!("pl-{}", index),
                        source: "radio".to_string(),
                        index,
                        name: format!("Playlist {}", index),
                        track_count: count,
                    },
                    tracks: (1..=count)
                        .map(|track| TrackInfo {
                            source: "radio".to_string(),
                            index: track,
                            title: format!("Track {}.{}", index, track),
                            url: format!("http://radio.local/{}/{}", index, track),
                            duration_ms: Some(180_000),
                            ..Default::default()
                        })
                        .collect(),
                }
            })
            .collect();

        Self {
            playlists: Arc::new(playlists),
            ..Default::default()
        }
    }

    /// Playlist indices requested through `playlist()`
    pub fn requests(&self) -> Vec<usize> {
        self.requests.lock().unwrap().clone()
    }

    pub fn set_failing(&self, failing: bool) {
        self.failing.store(failing, Ordering::SeqCst);
    }
}

#[async_trait]
impl PlaylistCatalog for FakeCatalog {
    async fn playlists(&self) -> ServiceResult<Vec<PlaylistInfo>> {
        if self.failing.load(Ordering::SeqCst) {
            return Err(ServiceError::Catalog("catalog offline".to_string()));
        }
        Ok(self.playlists.iter().map(|p| p.info.clone()).collect())
    }

    async fn playlist(&self, index: usize) -> ServiceResult<PlaylistTracks> {
        self.requests.lock().unwrap().push(index);
        if self.failing.load(Ordering::SeqCst) {
            return Err(ServiceError::Catalog("catalog offline".to_string()));
        }
        index
            .checked_sub(1)
            .and_then(|position| self.playlists.get(position))
            .cloned()
            .ok_or_else(|| ServiceError::Catalog(format!("no playlist {}", index)))
    }
}

/// Publisher that keeps every event it receives.
#[derive(Clone, Default)]
pub struct RecordingPublisher {
    events: Arc<Mutex<Vec<ZoneStateChanged>>>,
}

impl RecordingPublisher {
    pub fn events(&self) -> Vec<ZoneStateChanged> {
        self.events.lock().unwrap().clone()
    }

    pub fn events_for(&self, zone: ZoneIndex) -> Vec<ZoneStateChanged> {
        self.events()
            .into_iter()
            .filter(|e| e.zone_index == zone)
            .collect()
    }
}

#[async_trait]
impl EventPublisher for RecordingPublisher {
    async fn publish(&self, event: ZoneStateChanged) -> ServiceResult<()> {
        self.events.lock().unwrap().push(event);
        Ok(())
    }
}

// ============================================================================
// Fixtures
// ============================================================================

pub fn zone_config(name: &str, position: usize) -> ZoneConfig {
    ZoneConfig {
        name: name.to_string(),
        sink: format!("/snapsinks/zone{}", position),
    }
}

/// Configuration with the given zones and `(client name, default zone)` pairs
pub fn config(zones: &[&str], clients: &[(&str, usize)]) -> SnapDogConfig {
    let zones = zones
        .iter()
        .enumerate()
        .map(|(position, name)| zone_config(name, position + 1))
        .collect();
    let clients = clients
        .iter()
        .enumerate()
        .map(|(position, (name, zone))| ClientConfig {
            name: name.to_string(),
            mac: format!("02:42:ac:11:00:{:02x}", position + 1),
            default_zone: *zone,
        })
        .collect();
    SnapDogConfig::new(zones, clients)
}

/// A connected client with a backend identity
pub fn client(index: usize, backend_id: &str, name: &str, zone: usize) -> ClientState {
    ClientState {
        index: ClientIndex::new(index),
        name: name.to_string(),
        mac: format!("02:42:ac:11:00:{:02x}", index),
        zone_index: ZoneIndex::new(zone),
        backend_client_id: Some(ClientId::new(backend_id)),
        connected: true,
        volume: 100,
        mute: false,
        latency_ms: 0,
    }
}

pub fn directory(clients: Vec<ClientState>) -> Arc<InMemoryClientDirectory> {
    let directory = InMemoryClientDirectory::new();
    for client in clients {
        directory.insert(client);
    }
    Arc::new(directory)
}

/// The full set of collaborators behind one zone setup
#[derive(Clone)]
pub struct Fixture {
    pub backend: FakeBackend,
    pub player: FakePlayer,
    pub catalog: FakeCatalog,
    pub clients: Arc<InMemoryClientDirectory>,
    pub store: Arc<InMemoryStateStore>,
    pub publisher: RecordingPublisher,
}

impl Fixture {
    pub fn new(backend: FakeBackend, clients: Vec<ClientState>) -> Self {
        Self {
            backend,
            player: FakePlayer::new(),
            catalog: FakeCatalog::with_playlists(&[3, 2]),
            clients: directory(clients),
            store: Arc::new(InMemoryStateStore::new()),
            publisher: RecordingPublisher::default(),
        }
    }

    /// Zone context wired to the fakes, with notifications discarded
    pub fn context(&self, cancel: &CancellationToken) -> ZoneContext {
        ZoneContext {
            player: Arc::new(self.player.clone()),
            catalog: Arc::new(self.catalog.clone()),
            backend: Arc::new(self.backend.clone()),
            clients: self.clients.clone(),
            states: SnapshotStore::new(),
            notifier: ZoneNotifier::detached(),
            playback: PlaybackConfig::default(),
            cancel: cancel.child_token(),
        }
    }

    /// Controller wired to the fakes; must run inside a Tokio runtime
    pub fn controller(&self, config: SnapDogConfig) -> ZoneController {
        ZoneController::builder(config)
            .backend(Arc::new(self.backend.clone()))
            .player(Arc::new(self.player.clone()))
            .catalog(Arc::new(self.catalog.clone()))
            .client_directory(self.clients.clone())
            .state_store(self.store.clone())
            .publisher(Arc::new(self.publisher.clone()))
            .build()
            .expect("valid test configuration")
    }
}
