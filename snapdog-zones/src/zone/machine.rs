//! Per-zone playback state machine
//!
//! Every mutating operation follows the same shape:
//!
//! 1. take the zone's operation lock
//! 2. read the current snapshot to decide what to do
//! 3. call the external collaborator (player, backend, catalog)
//! 4. on success, apply the command's edit to the live snapshot under its
//!    write lock and write the result to the state store
//! 5. release the lock, then hand a notification to the dispatcher
//!
//! A failed collaborator call returns before step 4, so the snapshot is
//! never partially mutated. The position tracker writes into the same
//! snapshot without the operation lock; edits only touch the fields their
//! command owns, so observations merged during step 3 survive.

use std::fmt;
use std::future::Future;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use chrono::{DateTime, Utc};
use futures::future::join_all;
use parking_lot::{Mutex, RwLock};
use state_store::SnapshotStore;
use tokio::sync::MutexGuard;
use tokio_util::sync::CancellationToken;

use super::position::PositionTracker;
use crate::config::{PlaybackConfig, ZoneConfig};
use crate::error::{Result, ServiceError, ZoneError};
use crate::model::{
    ClientId, ClientIndex, GroupId, PlaybackState, PlaylistInfo, PlaylistTracks, PositionUpdate,
    StreamId, TrackInfo, ZoneIndex, ZoneState, ZoneStateChanged,
};
use crate::notify::ZoneNotifier;
use crate::services::{
    cancellable, AudioGroupBackend, ClientDirectory, MediaPlayer, PlaylistCatalog, ServiceResult,
};

/// Collaborators shared by every zone
#[derive(Clone)]
pub struct ZoneContext {
    pub player: Arc<dyn MediaPlayer>,
    pub catalog: Arc<dyn PlaylistCatalog>,
    pub backend: Arc<dyn AudioGroupBackend>,
    pub clients: Arc<dyn ClientDirectory>,
    /// Latest snapshot per zone, readable without touching the zone
    pub states: SnapshotStore<ZoneIndex, ZoneState>,
    pub notifier: ZoneNotifier,
    pub playback: PlaybackConfig,
    /// Parent of every zone's cancellation token
    pub cancel: CancellationToken,
}

/// How a playlist is picked from the catalog
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PlaylistSelector {
    /// 1-based catalog index
    Index(usize),
    /// Case-insensitive playlist name
    Name(String),
}

impl PlaylistSelector {
    fn matches(&self, playlist: &PlaylistInfo) -> bool {
        match self {
            PlaylistSelector::Index(index) => playlist.index == *index,
            PlaylistSelector::Name(name) => playlist.name.eq_ignore_ascii_case(name.trim()),
        }
    }
}

impl fmt::Display for PlaylistSelector {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PlaylistSelector::Index(index) => write!(f, "{}", index),
            PlaylistSelector::Name(name) => write!(f, "'{}'", name),
        }
    }
}

impl From<usize> for PlaylistSelector {
    fn from(index: usize) -> Self {
        PlaylistSelector::Index(index)
    }
}

impl From<&str> for PlaylistSelector {
    fn from(name: &str) -> Self {
        PlaylistSelector::Name(name.to_string())
    }
}

/// Clamp a requested volume into 0..=100
pub fn clamp_volume(volume: i32) -> u8 {
    volume.clamp(0, 100) as u8
}

#[derive(Debug, Clone, Copy)]
enum ZoneFlag {
    TrackRepeat,
    PlaylistRepeat,
    PlaylistShuffle,
}

impl ZoneFlag {
    fn get(self, state: &ZoneState) -> bool {
        match self {
            ZoneFlag::TrackRepeat => state.track_repeat,
            ZoneFlag::PlaylistRepeat => state.playlist_repeat,
            ZoneFlag::PlaylistShuffle => state.playlist_shuffle,
        }
    }

    fn field(self, state: &mut ZoneState) -> &mut bool {
        match self {
            ZoneFlag::TrackRepeat => &mut state.track_repeat,
            ZoneFlag::PlaylistRepeat => &mut state.playlist_repeat,
            ZoneFlag::PlaylistShuffle => &mut state.playlist_shuffle,
        }
    }
}

pub(super) struct ZoneInner {
    index: ZoneIndex,
    name: String,
    ctx: ZoneContext,
    cancel: CancellationToken,
    op_lock: tokio::sync::Mutex<()>,
    snapshot: RwLock<ZoneState>,
    last_observed: Mutex<Option<DateTime<Utc>>>,
    tracker: Mutex<Option<PositionTracker>>,
    disposed: AtomicBool,
}

impl ZoneInner {
    fn snapshot(&self) -> ZoneState {
        self.snapshot.read().clone()
    }

    fn publish(&self, state: ZoneState) {
        self.ctx.notifier.notify(ZoneStateChanged {
            zone_index: self.index,
            state,
        });
    }

    /// Merge a position observation, newest observation wins
    ///
    /// Returns the merged snapshot, or `None` if the observation was older
    /// than one already applied or there was nothing to update.
    fn apply_position(&self, update: &PositionUpdate, only_while_playing: bool) -> Option<ZoneState> {
        let mut last = self.last_observed.lock();
        if last.is_some_and(|previous| update.observed_at < previous) {
            return None;
        }

        let mut snapshot = self.snapshot.write();
        if only_while_playing && !snapshot.playback_state.is_playing() {
            return None;
        }
        let track = snapshot.track.as_mut()?;
        if let Some(position_ms) = update.position_ms {
            track.position_ms = position_ms;
        }
        if let Some(duration_ms) = update.duration_ms {
            track.duration_ms = Some(duration_ms);
        }
        if let Some(progress) = update.progress {
            track.progress = progress.clamp(0.0, 1.0);
        }
        if let Some(is_playing) = update.is_playing {
            track.is_playing = is_playing;
        }
        snapshot.timestamp_utc = Utc::now();
        *last = Some(update.observed_at);

        let state = snapshot.clone();
        drop(snapshot);
        drop(last);

        self.ctx.states.set(self.index, state.clone());
        Some(state)
    }

    pub(super) fn observe(&self, update: &PositionUpdate, only_while_playing: bool) {
        if let Some(state) = self.apply_position(update, only_while_playing) {
            self.publish(state);
        }
    }

    /// Timer tick: re-read the live player status and merge it
    pub(super) async fn refresh_from_player(&self, cancel: &CancellationToken) {
        match cancellable(cancel, self.ctx.player.status(self.index)).await {
            Ok(status) => {
                if cancel.is_cancelled() {
                    return;
                }
                self.observe(&PositionUpdate::from_status(&status, Utc::now()), true);
            }
            Err(ServiceError::Cancelled) => {}
            Err(e) => tracing::debug!("Position refresh for {} failed: {}", self.index, e),
        }
    }
}

impl Drop for ZoneInner {
    fn drop(&mut self) {
        self.cancel.cancel();
    }
}

/// One logical zone's playback, volume and playlist state
///
/// Cheap to clone; clones share the same zone. Mutations on one zone are
/// serialized, mutations on different zones run concurrently.
#[derive(Clone)]
pub struct ZoneStateMachine {
    inner: Arc<ZoneInner>,
}

impl ZoneStateMachine {
    /// Create a zone from its configuration
    ///
    /// `restored` is a persisted snapshot to continue from; it is repaired
    /// against the configuration first. Without one the zone starts
    /// stopped with no track.
    pub fn new(
        index: ZoneIndex,
        config: &ZoneConfig,
        restored: Option<ZoneState>,
        ctx: ZoneContext,
    ) -> Result<Self> {
        if index.position().is_none() {
            return Err(ZoneError::InvalidZoneConfig {
                zone: index,
                reason: "zone indices start at 1".to_string(),
            });
        }
        if config.name.trim().is_empty() {
            return Err(ZoneError::InvalidZoneConfig {
                zone: index,
                reason: "zone name is empty".to_string(),
            });
        }
        if config.sink.trim().is_empty() {
            return Err(ZoneError::InvalidZoneConfig {
                zone: index,
                reason: format!("zone '{}' has no sink path", config.name),
            });
        }

        let state = match restored {
            Some(state) => state.normalized(index, &config.name),
            None => ZoneState::initial(index, config.name.clone()),
        };
        ctx.states.set(index, state.clone());

        let cancel = ctx.cancel.child_token();
        Ok(Self {
            inner: Arc::new(ZoneInner {
                index,
                name: config.name.clone(),
                ctx,
                cancel,
                op_lock: tokio::sync::Mutex::new(()),
                snapshot: RwLock::new(state),
                last_observed: Mutex::new(None),
                tracker: Mutex::new(None),
                disposed: AtomicBool::new(false),
            }),
        })
    }

    pub fn index(&self) -> ZoneIndex {
        self.inner.index
    }

    pub fn name(&self) -> &str {
        &self.inner.name
    }

    /// The stream this zone's group must carry; fixed for the zone's lifetime
    pub fn stream_id(&self) -> StreamId {
        StreamId::for_zone(self.inner.index)
    }

    /// Current snapshot without refreshing live fields
    pub fn snapshot(&self) -> ZoneState {
        self.inner.snapshot()
    }

    pub fn group_id(&self) -> Option<GroupId> {
        self.inner.snapshot.read().group_id.clone()
    }

    pub fn playback_state(&self) -> PlaybackState {
        self.inner.snapshot.read().playback_state
    }

    /// Whether the position tracker is currently running
    pub fn is_tracking(&self) -> bool {
        self.inner
            .tracker
            .lock()
            .as_ref()
            .is_some_and(|tracker| tracker.is_running())
    }

    pub fn is_disposed(&self) -> bool {
        self.inner.disposed.load(Ordering::SeqCst)
    }

    // ---- playback ----

    /// Start playing the current track
    pub async fn play(&self) -> Result<()> {
        let guard = self.lock().await?;
        let track = self.current_track()?;
        self.start_playback(guard, track, |_| {}).await
    }

    /// Play a track of the selected playlist by 1-based index
    pub async fn play_track(&self, index: usize) -> Result<()> {
        let guard = self.lock().await?;
        let state = self.inner.snapshot();
        let (playlist, tracks) = self.selected_playlist(&state).await?;
        let track = tracks
            .track(index)
            .ok_or(ZoneError::TrackNotFound { playlist, track: index })?;
        self.start_playback(guard, track, |_| {}).await
    }

    /// Play an arbitrary URL
    pub async fn play_url(&self, url: &str) -> Result<()> {
        let track = TrackInfo::from_url(url.trim());
        if track.is_sentinel() {
            return Err(ZoneError::NoTrackAvailable);
        }
        let guard = self.lock().await?;
        self.start_playback(guard, track, |_| {}).await
    }

    pub async fn pause(&self) -> Result<()> {
        let guard = self.lock().await?;
        self.call(self.inner.ctx.player.pause(self.inner.index)).await?;
        self.stop_tracker();

        self.commit(guard, |state| {
            state.playback_state = PlaybackState::Paused;
            if let Some(track) = state.track.as_mut() {
                track.is_playing = false;
            }
        });
        tracing::info!("{} paused", self.inner.index);
        Ok(())
    }

    pub async fn stop(&self) -> Result<()> {
        let guard = self.lock().await?;
        self.call(self.inner.ctx.player.stop(self.inner.index)).await?;
        self.stop_tracker();

        self.commit(guard, |state| {
            state.playback_state = PlaybackState::Stopped;
            if let Some(track) = state.track.as_mut() {
                track.rewind();
            }
        });
        tracing::info!("{} stopped", self.inner.index);
        Ok(())
    }

    // ---- volume & mute ----

    /// Set the zone volume, clamped to 0..=100
    pub async fn set_volume(&self, volume: i32) -> Result<()> {
        let guard = self.lock().await?;
        self.apply_volume(guard, clamp_volume(volume)).await
    }

    /// Raise the volume by the configured step
    pub async fn volume_up(&self) -> Result<u8> {
        self.volume_up_by(self.inner.ctx.playback.volume_step).await
    }

    pub async fn volume_up_by(&self, step: u8) -> Result<u8> {
        let guard = self.lock().await?;
        let state = self.inner.snapshot();
        let target = clamp_volume(i32::from(state.volume) + i32::from(step));
        self.apply_volume(guard, target).await?;
        Ok(target)
    }

    /// Lower the volume by the configured step
    pub async fn volume_down(&self) -> Result<u8> {
        self.volume_down_by(self.inner.ctx.playback.volume_step).await
    }

    pub async fn volume_down_by(&self, step: u8) -> Result<u8> {
        let guard = self.lock().await?;
        let state = self.inner.snapshot();
        let target = clamp_volume(i32::from(state.volume) - i32::from(step));
        self.apply_volume(guard, target).await?;
        Ok(target)
    }

    pub async fn set_mute(&self, mute: bool) -> Result<()> {
        let guard = self.lock().await?;
        self.apply_mute(guard, mute).await
    }

    /// Flip mute, returning the new value
    pub async fn toggle_mute(&self) -> Result<bool> {
        let guard = self.lock().await?;
        let state = self.inner.snapshot();
        let mute = !state.mute;
        self.apply_mute(guard, mute).await?;
        Ok(mute)
    }

    // ---- tracks ----

    /// Select a track of the current playlist by 1-based index
    ///
    /// While playing, the new track starts immediately.
    pub async fn set_track(&self, index: usize) -> Result<()> {
        let guard = self.lock().await?;
        let state = self.inner.snapshot();
        let (playlist, tracks) = self.selected_playlist(&state).await?;
        let track = tracks
            .track(index)
            .ok_or(ZoneError::TrackNotFound { playlist, track: index })?;
        self.change_track(guard, state.playback_state, track).await
    }

    /// Advance to the next track
    ///
    /// Past the last track this wraps to track 1 when playlist repeat is
    /// on, and fails with `TrackNotFound` otherwise.
    pub async fn next_track(&self) -> Result<()> {
        let guard = self.lock().await?;
        let state = self.inner.snapshot();
        let (playlist, tracks) = self.selected_playlist(&state).await?;

        let current = state.track.as_ref().map_or(0, |t| t.index);
        let mut target = current + 1;
        if target > tracks.tracks.len() && state.playlist_repeat {
            target = 1;
        }
        let track = tracks
            .track(target)
            .ok_or(ZoneError::TrackNotFound { playlist, track: target })?;
        self.change_track(guard, state.playback_state, track).await
    }

    /// Go back one track, staying on track 1 at the start
    pub async fn previous_track(&self) -> Result<()> {
        let guard = self.lock().await?;
        let state = self.inner.snapshot();
        let (playlist, tracks) = self.selected_playlist(&state).await?;

        let current = state.track.as_ref().map_or(1, |t| t.index);
        let target = current.saturating_sub(1).max(1);
        let track = tracks
            .track(target)
            .ok_or(ZoneError::TrackNotFound { playlist, track: target })?;
        self.change_track(guard, state.playback_state, track).await
    }

    // ---- seeking ----

    /// Seek within the current track
    ///
    /// Only reads the current track; the zone lock is not held while the
    /// player seeks.
    pub async fn seek_to_position(&self, position_ms: u64) -> Result<()> {
        self.ensure_live()?;
        let track = self.current_track()?;
        self.call(
            self.inner
                .ctx
                .player
                .seek_to_position(self.inner.index, position_ms),
        )
        .await?;

        let progress = track
            .duration_ms
            .filter(|duration| *duration > 0)
            .map(|duration| position_ms as f64 / duration as f64);
        self.inner.observe(
            &PositionUpdate {
                observed_at: Utc::now(),
                is_playing: None,
                position_ms: Some(position_ms),
                duration_ms: None,
                progress,
            },
            false,
        );
        Ok(())
    }

    /// Seek to a fraction of the current track, `progress` in 0.0..=1.0
    pub async fn seek_to_progress(&self, progress: f64) -> Result<()> {
        if !(0.0..=1.0).contains(&progress) {
            return Err(ZoneError::InvalidArgument(format!(
                "progress {} is outside 0.0..=1.0",
                progress
            )));
        }
        self.ensure_live()?;
        let track = self.current_track()?;
        self.call(
            self.inner
                .ctx
                .player
                .seek_to_progress(self.inner.index, progress),
        )
        .await?;

        let position_ms = track
            .duration_ms
            .map(|duration| (duration as f64 * progress).round() as u64);
        self.inner.observe(
            &PositionUpdate {
                observed_at: Utc::now(),
                is_playing: None,
                position_ms,
                duration_ms: None,
                progress: Some(progress),
            },
            false,
        );
        Ok(())
    }

    // ---- playlists ----

    /// Select a playlist and load its first track
    pub async fn set_playlist(&self, selector: impl Into<PlaylistSelector>) -> Result<()> {
        let selector = selector.into();
        let guard = self.lock().await?;
        let state = self.inner.snapshot();
        let playlists = self.call(self.inner.ctx.catalog.playlists()).await?;
        let info = playlists
            .into_iter()
            .find(|p| selector.matches(p))
            .ok_or_else(|| ZoneError::PlaylistNotFound(selector.to_string()))?;
        self.change_playlist(guard, state.playback_state, info).await
    }

    /// Select the playlist after the current one
    pub async fn next_playlist(&self) -> Result<()> {
        let guard = self.lock().await?;
        let state = self.inner.snapshot();
        let current = state.playlist.as_ref().map_or(0, |p| p.index);
        let playlists = self.call(self.inner.ctx.catalog.playlists()).await?;
        let info = playlists
            .into_iter()
            .filter(|p| p.index > current)
            .min_by_key(|p| p.index)
            .ok_or_else(|| ZoneError::PlaylistNotFound(format!("after {}", current)))?;
        self.change_playlist(guard, state.playback_state, info).await
    }

    /// Select the playlist before the current one, staying on playlist 1
    pub async fn previous_playlist(&self) -> Result<()> {
        let guard = self.lock().await?;
        let state = self.inner.snapshot();
        let current = state.playlist.as_ref().map_or(1, |p| p.index);
        let target = current.saturating_sub(1).max(1);
        let playlists = self.call(self.inner.ctx.catalog.playlists()).await?;
        let info = playlists
            .into_iter()
            .find(|p| p.index == target)
            .ok_or_else(|| ZoneError::PlaylistNotFound(target.to_string()))?;
        self.change_playlist(guard, state.playback_state, info).await
    }

    /// Load playlist 1 and its first track into a zone that has no playlist
    ///
    /// Catalog failures are tolerated; the zone simply keeps no track.
    pub async fn preload_default_playlist(&self) -> Result<bool> {
        let guard = self.lock().await?;
        if self.inner.snapshot.read().playlist.is_some() {
            return Ok(false);
        }

        let tracks = match self.call(self.inner.ctx.catalog.playlist(1)).await {
            Ok(tracks) => tracks,
            Err(e) => {
                tracing::debug!("No default playlist for {}: {}", self.inner.index, e);
                return Ok(false);
            }
        };

        let track = tracks.track(1).unwrap_or_else(TrackInfo::none);
        let playlist = PlaylistInfo {
            index: 1,
            track_count: tracks.tracks.len(),
            ..tracks.info
        };
        self.commit(guard, |state| {
            state.track = Some(track);
            state.playlist = Some(playlist);
        });
        Ok(true)
    }

    // ---- repeat & shuffle ----

    pub async fn set_track_repeat(&self, enabled: bool) -> Result<()> {
        self.update_flag(ZoneFlag::TrackRepeat, Some(enabled)).await.map(|_| ())
    }

    pub async fn toggle_track_repeat(&self) -> Result<bool> {
        self.update_flag(ZoneFlag::TrackRepeat, None).await
    }

    pub async fn set_playlist_repeat(&self, enabled: bool) -> Result<()> {
        self.update_flag(ZoneFlag::PlaylistRepeat, Some(enabled)).await.map(|_| ())
    }

    pub async fn toggle_playlist_repeat(&self) -> Result<bool> {
        self.update_flag(ZoneFlag::PlaylistRepeat, None).await
    }

    pub async fn set_playlist_shuffle(&self, enabled: bool) -> Result<()> {
        self.update_flag(ZoneFlag::PlaylistShuffle, Some(enabled)).await.map(|_| ())
    }

    pub async fn toggle_playlist_shuffle(&self) -> Result<bool> {
        self.update_flag(ZoneFlag::PlaylistShuffle, None).await
    }

    // ---- topology ----

    /// Record the backend group this zone maps to
    ///
    /// Returns whether the value changed. Unchanged values are not
    /// republished.
    pub async fn set_group_id(&self, group: Option<GroupId>) -> Result<bool> {
        let guard = self.lock().await?;
        if self.inner.snapshot.read().group_id == group {
            return Ok(false);
        }
        tracing::debug!(
            "{} mapped to group {}",
            self.inner.index,
            group.as_ref().map_or("<none>", |g| g.as_str())
        );
        self.commit(guard, |state| state.group_id = group);
        Ok(true)
    }

    // ---- reads ----

    /// Snapshot with live player fields and current client assignments
    ///
    /// Refreshes position, progress and the playing flag from the player.
    /// Volume, mute and the playback state are never touched here.
    pub async fn get_state(&self) -> Result<ZoneState> {
        self.ensure_live()?;
        let status = self.call(self.inner.ctx.player.status(self.inner.index)).await?;
        let members = self
            .call(self.inner.ctx.clients.clients_by_zone(self.inner.index))
            .await?;

        self.inner
            .apply_position(&PositionUpdate::from_status(&status, Utc::now()), false);

        let mut clients: Vec<ClientIndex> = members.iter().map(|c| c.index).collect();
        clients.sort();

        let state = {
            let mut snapshot = self.inner.snapshot.write();
            snapshot.clients = clients;
            snapshot.timestamp_utc = Utc::now();
            snapshot.clone()
        };
        self.inner.ctx.states.set(self.inner.index, state.clone());
        Ok(state)
    }

    // ---- lifecycle ----

    /// Stop the position tracker and refuse further commands
    ///
    /// Waits for the tracker task to exit so nothing fires into the zone
    /// after this returns.
    pub async fn shutdown(&self) {
        if self.inner.disposed.swap(true, Ordering::SeqCst) {
            return;
        }
        self.inner.cancel.cancel();

        let tracker = self.inner.tracker.lock().take();
        if let Some(tracker) = tracker {
            tracker.shutdown().await;
        }
        tracing::debug!("{} shut down", self.inner.index);
    }

    // ---- internals ----

    fn ensure_live(&self) -> Result<()> {
        if self.inner.disposed.load(Ordering::SeqCst) || self.inner.cancel.is_cancelled() {
            Err(ZoneError::Disposed)
        } else {
            Ok(())
        }
    }

    async fn lock(&self) -> Result<MutexGuard<'_, ()>> {
        self.ensure_live()?;
        let guard = tokio::select! {
            biased;
            _ = self.inner.cancel.cancelled() => return Err(ZoneError::Disposed),
            guard = self.inner.op_lock.lock() => guard,
        };
        self.ensure_live()?;
        Ok(guard)
    }

    async fn call<T>(&self, call: impl Future<Output = ServiceResult<T>>) -> Result<T> {
        cancellable(&self.inner.cancel, call)
            .await
            .map_err(ZoneError::from)
    }

    /// Apply an edit to the live snapshot and mirror it into the store
    ///
    /// The edit runs under the snapshot's write lock against the current
    /// value, so position fields merged by the tracker in the meantime are
    /// kept unless the edit itself overwrites them.
    fn replace(&self, edit: impl FnOnce(&mut ZoneState)) -> ZoneState {
        let state = {
            let mut snapshot = self.inner.snapshot.write();
            edit(&mut *snapshot);
            snapshot.timestamp_utc = Utc::now();
            snapshot.clone()
        };
        self.inner.ctx.states.set(self.inner.index, state.clone());
        state
    }

    /// Apply an edit, release the lock, then notify
    fn commit(&self, guard: MutexGuard<'_, ()>, edit: impl FnOnce(&mut ZoneState)) {
        let state = self.replace(edit);
        drop(guard);
        self.inner.publish(state);
    }

    fn current_track(&self) -> Result<TrackInfo> {
        self.inner
            .snapshot
            .read()
            .track
            .clone()
            .filter(|track| !track.is_sentinel())
            .ok_or(ZoneError::NoTrackAvailable)
    }

    async fn selected_playlist(&self, state: &ZoneState) -> Result<(usize, PlaylistTracks)> {
        let playlist = state
            .playlist
            .as_ref()
            .map(|p| p.index)
            .ok_or(ZoneError::NoPlaylistSelected)?;
        let tracks = self.call(self.inner.ctx.catalog.playlist(playlist)).await?;
        Ok((playlist, tracks))
    }

    /// Play `track`; `edit` carries any other field the command changes
    async fn start_playback(
        &self,
        guard: MutexGuard<'_, ()>,
        mut track: TrackInfo,
        edit: impl FnOnce(&mut ZoneState),
    ) -> Result<()> {
        self.call(self.inner.ctx.player.play(self.inner.index, &track))
            .await?;

        tracing::info!(
            "{} playing '{}' ({})",
            self.inner.index,
            track.title,
            track.url
        );
        track.is_playing = true;
        let state = self.replace(|state| {
            edit(state);
            state.track = Some(track);
            state.playback_state = PlaybackState::Playing;
        });
        self.start_tracker();
        drop(guard);
        self.inner.publish(state);
        Ok(())
    }

    async fn change_track(
        &self,
        guard: MutexGuard<'_, ()>,
        playback_state: PlaybackState,
        track: TrackInfo,
    ) -> Result<()> {
        if playback_state.is_playing() {
            return self.start_playback(guard, track, |_| {}).await;
        }
        self.commit(guard, |state| state.track = Some(track));
        Ok(())
    }

    async fn change_playlist(
        &self,
        guard: MutexGuard<'_, ()>,
        playback_state: PlaybackState,
        info: PlaylistInfo,
    ) -> Result<()> {
        let tracks = self.call(self.inner.ctx.catalog.playlist(info.index)).await?;
        let track = tracks.track(1).unwrap_or_else(TrackInfo::none);
        let playlist = PlaylistInfo {
            track_count: tracks.tracks.len(),
            ..info
        };

        let mut stopped = false;
        if playback_state.is_playing() {
            if !track.is_sentinel() {
                return self
                    .start_playback(guard, track, |state| state.playlist = Some(playlist))
                    .await;
            }
            // An empty playlist cannot keep playing
            self.call(self.inner.ctx.player.stop(self.inner.index)).await?;
            self.stop_tracker();
            stopped = true;
        }

        self.commit(guard, |state| {
            state.playlist = Some(playlist);
            state.track = Some(track);
            if stopped {
                state.playback_state = PlaybackState::Stopped;
            }
        });
        Ok(())
    }

    async fn apply_volume(&self, guard: MutexGuard<'_, ()>, volume: u8) -> Result<()> {
        let grouped = self.inner.snapshot.read().group_id.is_some();
        if grouped {
            let members = self
                .call(self.inner.ctx.clients.clients_by_zone(self.inner.index))
                .await?;
            let ids: Vec<ClientId> = members
                .iter()
                .filter_map(|client| client.backend_id().cloned())
                .collect();

            let backend = &self.inner.ctx.backend;
            let results = join_all(ids.iter().map(|id| {
                cancellable(&self.inner.cancel, backend.set_client_volume(id, volume))
            }))
            .await;

            if self.inner.cancel.is_cancelled() {
                return Err(ZoneError::Disposed);
            }
            let failed: Vec<ClientId> = ids
                .into_iter()
                .zip(results)
                .filter(|(_, result)| result.is_err())
                .map(|(id, _)| id)
                .collect();
            if !failed.is_empty() {
                tracing::warn!(
                    "{} volume {} did not reach {} client(s)",
                    self.inner.index,
                    volume,
                    failed.len()
                );
                return Err(ZoneError::VolumePropagation { failed });
            }
        }

        self.commit(guard, |state| state.volume = volume);
        Ok(())
    }

    async fn apply_mute(&self, guard: MutexGuard<'_, ()>, mute: bool) -> Result<()> {
        let group = self.group_id();
        if let Some(group) = group.as_ref() {
            self.call(self.inner.ctx.backend.set_group_mute(group, mute))
                .await?;
        }
        self.commit(guard, |state| state.mute = mute);
        Ok(())
    }

    async fn update_flag(&self, flag: ZoneFlag, value: Option<bool>) -> Result<bool> {
        let guard = self.lock().await?;
        let current = flag.get(&self.inner.snapshot.read());
        let next = value.unwrap_or(!current);
        if current == next {
            return Ok(next);
        }
        tracing::debug!("{} {:?} = {}", self.inner.index, flag, next);
        self.commit(guard, |state| *flag.field(state) = next);
        Ok(next)
    }

    fn start_tracker(&self) {
        let events = self.inner.ctx.player.subscribe(self.inner.index);
        let tracker = PositionTracker::spawn(
            Arc::downgrade(&self.inner),
            self.inner.index,
            events,
            self.inner.ctx.playback.position_refresh(),
            &self.inner.cancel,
        );
        if let Some(previous) = self.inner.tracker.lock().replace(tracker) {
            previous.stop();
        }
    }

    fn stop_tracker(&self) {
        if let Some(tracker) = self.inner.tracker.lock().take() {
            tracker.stop();
        }
    }
}

impl fmt::Debug for ZoneStateMachine {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ZoneStateMachine")
            .field("index", &self.inner.index)
            .field("name", &self.inner.name)
            .field("playback_state", &self.playback_state())
            .field("disposed", &self.is_disposed())
            .finish()
    }
}
