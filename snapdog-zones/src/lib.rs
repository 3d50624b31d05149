//! SnapDog Zones
//!
//! Zone state machines and topology reconciliation for a multi-room audio
//! controller built on a synchronized-audio backend.
//!
//! # Features
//!
//! - **Per-zone state machines**: playback, volume and playlist commands,
//!   serialized per zone and concurrent across zones
//! - **Self-healing topology**: a reconciler that converges backend groups,
//!   streams and names onto the zone model with the fewest backend calls
//! - **Single-flight regrouping**: overlapping triggers collapse into one pass
//! - **Restart safety**: persisted state is restored only when the
//!   configuration fingerprint still matches
//!
//! # Architecture
//!
//! ```text
//! command ─► ZoneStateMachine ─► SnapshotStore ─► ZoneNotifier ─► dispatcher
//!                 │                                                 │
//!                 ▼                                          publisher + store
//!            MediaPlayer
//!
//! timer / trigger ─► TopologyReconciler ─► AudioGroupBackend
//!                         ▲
//!                  ClientDirectory
//! ```
//!
//! # Quick Start
//!
//! ```rust,ignore
//! use std::sync::Arc;
//! use snapdog_zones::{SnapDogConfig, ZoneController, ZoneIndex};
//!
//! let config = SnapDogConfig::from_file("snapdog.json")?;
//! let controller = ZoneController::builder(config)
//!     .backend(Arc::new(my_backend))
//!     .player(Arc::new(my_player))
//!     .catalog(Arc::new(my_catalog))
//!     .build()?;
//!
//! controller.start().await;
//!
//! let zone = controller.zone(ZoneIndex::new(1)).await?;
//! zone.set_volume(35).await?;
//! zone.play().await?;
//!
//! controller.shutdown().await;
//! ```

// Core modules
pub mod config;
pub mod error;
pub mod model;
pub mod services;

// Zone runtime
pub mod notify;
pub mod registry;
pub mod zone;

// Topology convergence
pub mod reconciler;

// Startup restoration
pub mod fingerprint;

// Wiring
pub mod controller;

// In-memory collaborators
pub mod memory;

// Logging infrastructure
pub mod logging;

// ============================================================================
// Re-exports
// ============================================================================

pub use config::{ClientConfig, PlaybackConfig, ReconcilerConfig, SnapDogConfig, ZoneConfig};
pub use controller::{ZoneController, ZoneControllerBuilder};
pub use error::{ConfigError, ReconcileError, Result, ServiceError, ZoneError};
pub use fingerprint::{ConfigurationFingerprint, FingerprintGate, StartupDecision};
pub use logging::{init_logging, init_logging_from_env, LoggingError, LoggingMode};
pub use memory::{InMemoryClientDirectory, InMemoryStateStore};
pub use model::{
    BackendGroup, BackendMember, ClientId, ClientIndex, ClientState, GroupId, PlaybackState,
    PlayerEvent, PlayerStatus, PlayerTrackStatus, PlaylistInfo, PlaylistTracks, PositionUpdate,
    StreamId, Topology, TrackInfo, ZoneIndex, ZoneState, ZoneStateChanged, DEFAULT_ZONE_VOLUME,
    NO_TRACK_URL,
};
pub use notify::{LogPublisher, NotificationDispatcher, ZoneNotifier};
pub use reconciler::{PassReport, TopologyReconciler, ZoneSyncOutcome};
pub use registry::ZoneRegistry;
pub use services::{
    cancellable, AudioGroupBackend, ClientDirectory, EventPublisher, MediaPlayer,
    PersistentStateStore, PlaylistCatalog, ServiceResult,
};
pub use zone::{PlaylistSelector, ZoneContext, ZoneStateMachine};

/// Prelude for convenient imports
pub mod prelude {
    pub use crate::config::SnapDogConfig;
    pub use crate::controller::ZoneController;
    pub use crate::error::{Result, ZoneError};
    pub use crate::model::{ClientIndex, PlaybackState, ZoneIndex, ZoneState};
    pub use crate::services::{
        AudioGroupBackend, ClientDirectory, EventPublisher, MediaPlayer, PersistentStateStore,
        PlaylistCatalog,
    };
    pub use crate::zone::{PlaylistSelector, ZoneStateMachine};
}
