//! Live media player status and events

use chrono::{DateTime, Utc};

use super::ZoneIndex;

/// Live position of the track a player is rendering
#[derive(Debug, Clone, PartialEq, Default)]
pub struct PlayerTrackStatus {
    pub position_ms: u64,
    pub duration_ms: Option<u64>,
    pub progress: f64,
    pub title: String,
}

/// Live status of the player for one zone
#[derive(Debug, Clone, PartialEq, Default)]
pub struct PlayerStatus {
    pub is_playing: bool,
    pub current_track: Option<PlayerTrackStatus>,
}

/// Events pushed by the media player between status polls
#[derive(Debug, Clone, PartialEq)]
pub enum PlayerEvent {
    PositionChanged {
        zone: ZoneIndex,
        position_ms: u64,
        duration_ms: Option<u64>,
        progress: f64,
        observed_at: DateTime<Utc>,
    },
    StateChanged {
        zone: ZoneIndex,
        is_playing: bool,
        observed_at: DateTime<Utc>,
    },
}

impl PlayerEvent {
    pub fn zone(&self) -> ZoneIndex {
        match self {
            PlayerEvent::PositionChanged { zone, .. } | PlayerEvent::StateChanged { zone, .. } => *zone,
        }
    }
}

/// One observation of a zone's transient playback fields
///
/// Timer ticks and player events both produce these; the newest
/// observation wins when they are merged into the zone snapshot.
#[derive(Debug, Clone, PartialEq)]
pub struct PositionUpdate {
    pub observed_at: DateTime<Utc>,
    pub is_playing: Option<bool>,
    pub position_ms: Option<u64>,
    pub duration_ms: Option<u64>,
    pub progress: Option<f64>,
}

impl PositionUpdate {
    pub fn from_status(status: &PlayerStatus, observed_at: DateTime<Utc>) -> Self {
        let track = status.current_track.as_ref();
        Self {
            observed_at,
            is_playing: Some(status.is_playing),
            position_ms: track.map(|t| t.position_ms),
            duration_ms: track.and_then(|t| t.duration_ms),
            progress: track.map(|t| t.progress),
        }
    }

    pub fn from_event(event: &PlayerEvent) -> Self {
        match event {
            PlayerEvent::PositionChanged {
                position_ms,
                duration_ms,
                progress,
                observed_at,
                ..
            } => Self {
                observed_at: *observed_at,
                is_playing: None,
                position_ms: Some(*position_ms),
                duration_ms: *duration_ms,
                progress: Some(*progress),
            },
            PlayerEvent::StateChanged {
                is_playing,
                observed_at,
                ..
            } => Self {
                observed_at: *observed_at,
                is_playing: Some(*is_playing),
                position_ms: None,
                duration_ms: None,
                progress: None,
            },
        }
    }
}
