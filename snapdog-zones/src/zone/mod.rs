//! Zone state machines
//!
//! One [`ZoneStateMachine`] per configured zone, plus the position tracker
//! that keeps a playing zone's position fresh.

mod machine;
mod position;

pub use machine::{clamp_volume, PlaylistSelector, ZoneContext, ZoneStateMachine};
