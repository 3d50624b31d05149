//! Model types for snapdog-zones

mod client_state;
mod ids;
mod playback_state;
mod player;
mod topology;
mod track;
mod zone_state;

pub use client_state::ClientState;
pub use ids::{ClientId, ClientIndex, GroupId, StreamId, ZoneIndex};
pub use playback_state::PlaybackState;
pub use player::{PlayerEvent, PlayerStatus, PlayerTrackStatus, PositionUpdate};
pub use topology::{BackendGroup, BackendMember, Topology};
pub use track::{PlaylistInfo, PlaylistTracks, TrackInfo, NO_TRACK_SOURCE, NO_TRACK_URL};
pub use zone_state::{ZoneState, DEFAULT_ZONE_VOLUME};

/// Published after every successful zone mutation
#[derive(Debug, Clone, PartialEq)]
pub struct ZoneStateChanged {
    pub zone_index: ZoneIndex,
    pub state: ZoneState,
}
