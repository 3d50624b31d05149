//! Zone state snapshot

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::{ClientIndex, GroupId, PlaybackState, PlaylistInfo, StreamId, TrackInfo, ZoneIndex};

/// Snapshot of one logical zone
///
/// Owned by its `ZoneStateMachine` while mutating; everyone else sees
/// immutable clones.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ZoneState {
    /// Stable 1-based identity
    pub index: ZoneIndex,
    pub name: String,
    pub playback_state: PlaybackState,
    /// 0..=100
    pub volume: u8,
    pub mute: bool,
    pub track_repeat: bool,
    pub playlist_repeat: bool,
    pub playlist_shuffle: bool,
    pub track: Option<TrackInfo>,
    pub playlist: Option<PlaylistInfo>,
    /// Backend group this zone maps to, unknown until first reconciliation
    pub group_id: Option<GroupId>,
    pub stream_id: StreamId,
    /// Clients assigned to this zone, read from the client directory
    pub clients: Vec<ClientIndex>,
    pub timestamp_utc: DateTime<Utc>,
}

/// Volume a freshly created zone starts with
pub const DEFAULT_ZONE_VOLUME: u8 = 50;

impl ZoneState {
    /// Fresh "stopped, no track" state
    pub fn initial(index: ZoneIndex, name: impl Into<String>) -> Self {
        Self {
            index,
            name: name.into(),
            playback_state: PlaybackState::Stopped,
            volume: DEFAULT_ZONE_VOLUME,
            mute: false,
            track_repeat: false,
            playlist_repeat: false,
            playlist_shuffle: false,
            track: None,
            playlist: None,
            group_id: None,
            stream_id: StreamId::for_zone(index),
            clients: Vec::new(),
            timestamp_utc: Utc::now(),
        }
    }

    /// Whether the current track can be played
    pub fn has_playable_track(&self) -> bool {
        self.track.as_ref().is_some_and(|t| !t.is_sentinel())
    }

    /// Repair a snapshot loaded from storage
    ///
    /// Identity fields are forced back to what the configuration dictates,
    /// volume is clamped, and a `Playing` state without a playable track
    /// falls back to `Stopped`.
    pub fn normalized(mut self, index: ZoneIndex, name: &str) -> Self {
        self.index = index;
        self.name = name.to_string();
        self.stream_id = StreamId::for_zone(index);
        self.volume = self.volume.min(100);
        if self.playback_state.is_playing() && !self.has_playable_track() {
            self.playback_state = PlaybackState::Stopped;
        }
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_initial_state() {
        let state = ZoneState::initial(ZoneIndex::new(2), "Kitchen");
        assert_eq!(state.playback_state, PlaybackState::Stopped);
        assert_eq!(state.stream_id.as_str(), "Zone2");
        assert!(state.track.is_none());
        assert!(state.group_id.is_none());
        assert!(!state.has_playable_track());
    }

    #[test]
    fn test_normalized_repairs_playing_without_track() {
        let mut state = ZoneState::initial(ZoneIndex::new(1), "Old");
        state.playback_state = PlaybackState::Playing;
        state.track = Some(TrackInfo::none());
        state.volume = 180;
        state.stream_id = StreamId::new("Other");

        let state = state.normalized(ZoneIndex::new(1), "Living Room");
        assert_eq!(state.playback_state, PlaybackState::Stopped);
        assert_eq!(state.volume, 100);
        assert_eq!(state.name, "Living Room");
        assert_eq!(state.stream_id.as_str(), "Zone1");
    }

    #[test]
    fn test_normalized_keeps_valid_playing_state() {
        let mut state = ZoneState::initial(ZoneIndex::new(1), "Office");
        state.playback_state = PlaybackState::Playing;
        state.track = Some(TrackInfo::from_url("http://radio"));

        let state = state.normalized(ZoneIndex::new(1), "Office");
        assert_eq!(state.playback_state, PlaybackState::Playing);
    }
}
