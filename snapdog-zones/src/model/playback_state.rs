//! Playback state enumeration

use serde::{Deserialize, Serialize};

/// Playback state of a zone
///
/// Cycles `Stopped → Playing → Paused → Stopped`; track and playlist
/// changes while playing are `Playing → Playing` self-transitions.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum PlaybackState {
    /// Nothing is playing
    #[default]
    Stopped,
    /// Currently playing audio
    Playing,
    /// Playback is paused
    Paused,
}

impl PlaybackState {
    pub fn is_playing(self) -> bool {
        self == PlaybackState::Playing
    }
}

impl std::fmt::Display for PlaybackState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            PlaybackState::Stopped => write!(f, "stopped"),
            PlaybackState::Playing => write!(f, "playing"),
            PlaybackState::Paused => write!(f, "paused"),
        }
    }
}
