//! Identity types for zones, clients, groups and streams

use serde::{Deserialize, Serialize};
use std::fmt;

/// Macro to generate common string ID type implementations
macro_rules! impl_string_id {
    ($name:ident) => {
        impl $name {
            pub fn new(id: impl Into<String>) -> Self {
                Self(id.into())
            }

            pub fn as_str(&self) -> &str {
                &self.0
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(f, "{}", self.0)
            }
        }

        impl From<&str> for $name {
            fn from(s: &str) -> Self {
                $name::new(s)
            }
        }

        impl From<String> for $name {
            fn from(s: String) -> Self {
                $name::new(s)
            }
        }
    };
}

/// Macro to generate 1-based index type implementations
macro_rules! impl_index {
    ($name:ident, $label:literal) => {
        impl $name {
            pub const fn new(index: usize) -> Self {
                Self(index)
            }

            pub const fn get(self) -> usize {
                self.0
            }

            /// Build the index for a 0-based position in configuration order
            pub const fn from_position(position: usize) -> Self {
                Self(position + 1)
            }

            /// 0-based position in configuration order, `None` for index 0
            pub fn position(self) -> Option<usize> {
                self.0.checked_sub(1)
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(f, concat!($label, " {}"), self.0)
            }
        }

        impl From<usize> for $name {
            fn from(index: usize) -> Self {
                $name::new(index)
            }
        }
    };
}

/// 1-based zone index, matching configuration order
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ZoneIndex(usize);

impl_index!(ZoneIndex, "zone");

/// 1-based client index, matching configuration order
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ClientIndex(usize);

impl_index!(ClientIndex, "client");

/// Identifier of a group in the audio synchronization backend
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct GroupId(String);

impl_string_id!(GroupId);

/// Identity of a client in the audio synchronization backend
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ClientId(String);

impl_string_id!(ClientId);

/// Name of an audio stream a group can be tuned to
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct StreamId(String);

impl_string_id!(StreamId);

impl StreamId {
    /// The fixed stream a zone carries
    ///
    /// Pure function of the zone index; never chosen at runtime.
    pub fn for_zone(zone: ZoneIndex) -> Self {
        Self(format!("Zone{}", zone.get()))
    }
}
