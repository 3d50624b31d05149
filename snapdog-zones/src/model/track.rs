//! Track and playlist descriptors

use serde::{Deserialize, Serialize};

/// Source tag of the "no track" sentinel
pub const NO_TRACK_SOURCE: &str = "none";

/// URL carried by the "no track" sentinel
pub const NO_TRACK_URL: &str = "none://";

/// Information about the current track of a zone
///
/// `position_ms`, `progress` and `is_playing` are transient: they are
/// refreshed from the media player and never drive persistent decisions.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct TrackInfo {
    /// Where the track comes from (playlist source, "url", ...)
    pub source: String,
    /// 1-based index within its playlist (0 when not from a playlist)
    pub index: usize,
    pub title: String,
    pub artist: String,
    pub album: String,
    /// Playable URL
    pub url: String,
    pub position_ms: u64,
    pub duration_ms: Option<u64>,
    /// Progress through the track in [0, 1]
    pub progress: f64,
    pub is_playing: bool,
}

impl TrackInfo {
    /// The "no track" sentinel; play is disallowed while it is selected
    pub fn none() -> Self {
        Self {
            source: NO_TRACK_SOURCE.to_string(),
            title: "No Track".to_string(),
            url: NO_TRACK_URL.to_string(),
            ..Default::default()
        }
    }

    /// Ad-hoc track for a direct URL
    pub fn from_url(url: impl Into<String>) -> Self {
        let url = url.into();
        Self {
            source: "url".to_string(),
            title: url.clone(),
            url,
            ..Default::default()
        }
    }

    /// Whether this is the sentinel or carries no playable URL
    pub fn is_sentinel(&self) -> bool {
        self.source == NO_TRACK_SOURCE || self.url.trim().is_empty() || self.url == NO_TRACK_URL
    }

    /// Reset the transient playback fields to the start of the track
    pub fn rewind(&mut self) {
        self.position_ms = 0;
        self.progress = 0.0;
        self.is_playing = false;
    }
}

/// Information about a playlist in the catalog
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct PlaylistInfo {
    pub id: String,
    pub source: String,
    /// 1-based index in the catalog
    pub index: usize,
    pub name: String,
    pub track_count: usize,
}

/// A playlist together with its tracks
#[derive(Debug, Clone, PartialEq, Default)]
pub struct PlaylistTracks {
    pub info: PlaylistInfo,
    pub tracks: Vec<TrackInfo>,
}

impl PlaylistTracks {
    /// Track at a 1-based index, with its `index` field normalised
    pub fn track(&self, index: usize) -> Option<TrackInfo> {
        let position = index.checked_sub(1)?;
        self.tracks.get(position).map(|track| {
            let mut track = track.clone();
            track.index = index;
            track.rewind();
            track
        })
    }
}
