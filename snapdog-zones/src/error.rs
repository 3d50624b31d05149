//! Error types for the snapdog-zones crate.

use crate::model::{ClientId, ClientIndex, ZoneIndex};

/// Failures reported by external collaborators.
///
/// Returned unchanged to command callers; this layer never retries.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ServiceError {
    /// The audio synchronization backend rejected or failed a call
    #[error("audio backend error: {0}")]
    Backend(String),

    /// The media player failed
    #[error("media player error: {0}")]
    Player(String),

    /// The playlist catalog failed
    #[error("playlist catalog error: {0}")]
    Catalog(String),

    /// The client directory failed
    #[error("client directory error: {0}")]
    Directory(String),

    /// The persistent state store failed
    #[error("state store error: {0}")]
    Store(String),

    /// Publishing a notification failed
    #[error("publish error: {0}")]
    Publish(String),

    /// The call was abandoned because the component is shutting down
    #[error("operation cancelled")]
    Cancelled,
}

/// Command-level failures of zone operations.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum ZoneError {
    /// The current track is the "no track" sentinel or has no URL
    #[error("no track available to play")]
    NoTrackAvailable,

    /// A track operation needs a selected playlist
    #[error("no playlist selected")]
    NoPlaylistSelected,

    /// The requested track does not exist in the playlist
    #[error("track {track} not found in playlist {playlist}")]
    TrackNotFound {
        /// 1-based playlist index
        playlist: usize,
        /// 1-based track index
        track: usize,
    },

    /// The requested playlist does not exist in the catalog
    #[error("playlist not found: {0}")]
    PlaylistNotFound(String),

    /// No zone is registered under this index
    #[error("{0} not found")]
    ZoneNotFound(ZoneIndex),

    /// No client is known under this index
    #[error("{0} not found")]
    ClientNotFound(ClientIndex),

    /// An argument is outside its accepted range
    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    /// The zone configuration cannot produce a zone
    #[error("invalid configuration for {zone}: {reason}")]
    InvalidZoneConfig {
        zone: ZoneIndex,
        reason: String,
    },

    /// Group volume reached only some clients
    ///
    /// Per-client volume writes are not atomic across a group; the zone
    /// keeps its previous volume and these clients did not take the change.
    #[error("volume not applied to clients: {}", format_clients(.failed))]
    VolumePropagation {
        failed: Vec<ClientId>,
    },

    /// The zone has been shut down
    #[error("zone has been shut down")]
    Disposed,

    /// An external collaborator failed
    #[error(transparent)]
    Service(#[from] ServiceError),
}

impl ZoneError {
    /// Validation errors are caller mistakes or missing selections,
    /// as opposed to collaborator failures.
    pub fn is_validation(&self) -> bool {
        matches!(
            self,
            ZoneError::NoTrackAvailable
                | ZoneError::NoPlaylistSelected
                | ZoneError::TrackNotFound { .. }
                | ZoneError::PlaylistNotFound(_)
                | ZoneError::ZoneNotFound(_)
                | ZoneError::ClientNotFound(_)
                | ZoneError::InvalidArgument(_)
                | ZoneError::InvalidZoneConfig { .. }
        )
    }
}

fn format_clients(clients: &[ClientId]) -> String {
    clients
        .iter()
        .map(|c| c.as_str())
        .collect::<Vec<_>>()
        .join(", ")
}

/// Failures inside a reconciliation pass.
///
/// These are logged and retried on the next pass, never raised to a caller.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum ReconcileError {
    /// The backend topology could not be fetched
    #[error("audio backend unreachable: {0}")]
    BackendUnavailable(ServiceError),

    /// The client directory could not be read
    #[error("client directory unavailable: {0}")]
    DirectoryUnavailable(ServiceError),

    /// The backend reports no groups to repurpose
    #[error("no backend groups available for {0}")]
    NoGroupsAvailable(ZoneIndex),

    /// A corrective call for a zone failed
    #[error("correcting {zone} failed: {source}")]
    Correction {
        zone: ZoneIndex,
        source: ServiceError,
    },
}

/// Failures while loading or validating configuration.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("failed to read configuration: {0}")]
    Io(#[from] std::io::Error),

    #[error("failed to parse configuration: {0}")]
    Parse(#[from] serde_json::Error),

    #[error("invalid configuration: {0}")]
    Invalid(String),
}

/// Convenience type alias for zone command results.
pub type Result<T> = std::result::Result<T, ZoneError>;
