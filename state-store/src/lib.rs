//! In-memory snapshot store
//!
//! A small, type-safe store that keeps the latest snapshot per key with
//! get/set semantics only. Used for the per-zone and per-client state maps.
//!
//! # Features
//!
//! - **Whole-value snapshots**: readers never observe partial updates
//! - **Change detection**: `set` reports whether the value actually changed
//! - **Generic keys**: any hashable type works as a key
//!
//! # Quick Start
//!
//! ```rust
//! use state_store::SnapshotStore;
//!
//! #[derive(Clone, PartialEq, Debug)]
//! struct ZoneName(String);
//!
//! let store = SnapshotStore::<u32, ZoneName>::new();
//! store.set(1, ZoneName("Kitchen".to_string()));
//!
//! assert_eq!(store.get(&1), Some(ZoneName("Kitchen".to_string())));
//! ```

pub mod store;

pub use store::SnapshotStore;

/// Prelude for convenient imports
pub mod prelude {
    pub use crate::store::SnapshotStore;
}
