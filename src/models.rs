//! Core data types for Device Stager.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;

/// Serial number sent to the remote service when the device does not report one.
pub const UNKNOWN_SERIAL: &str = "UNKNOWN_SN";

/// A physical device as reported by the discovery step.
///
/// Immutable once bound. A reconnect produces a fresh value, possibly with the
/// same identifier.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Device {
    /// Opaque unique identifier (UDID)
    pub identifier: String,

    /// Display name set by the owner
    pub name: String,

    /// Product type, e.g. "iPhone14,2"
    pub product_type: String,

    /// Hardware model, e.g. "D63AP"
    pub hardware_model: String,

    /// Serial number, when the listing carried one
    pub serial_number: Option<String>,

    /// Every other scalar the listing reported, keyed by its original field name
    pub attributes: BTreeMap<String, String>,
}

impl Device {
    /// Serial number or the `UNKNOWN_SN` sentinel.
    pub fn serial_or_sentinel(&self) -> &str {
        self.serial_number.as_deref().unwrap_or(UNKNOWN_SERIAL)
    }

    pub fn attribute(&self, key: &str) -> Option<&str> {
        self.attributes.get(key).map(String::as_str)
    }
}

impl fmt::Display for Device {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = if self.name.is_empty() { "<unnamed>" } else { &self.name };
        let product = if self.product_type.is_empty() {
            "unknown product"
        } else {
            &self.product_type
        };
        write!(f, "{} ({})", name, product)
    }
}

/// Device-side paths the sequence writes to and polls.
///
/// The primary artifact and its auxiliary companions are always cleaned as a unit.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StagingPlan {
    /// Push target for the downloaded payload
    pub primary_artifact: String,

    /// Companion files removed together with the primary artifact
    pub auxiliary_artifacts: Vec<String>,

    /// Appears once the on-device process has picked the payload up
    pub metadata_marker: String,

    /// Appears once the on-device process reached its final checkpoint
    pub trigger_marker: String,
}

impl StagingPlan {
    /// Primary artifact followed by its auxiliaries, in cleanup order.
    pub fn artifact_paths(&self) -> impl Iterator<Item = &str> {
        std::iter::once(self.primary_artifact.as_str())
            .chain(self.auxiliary_artifacts.iter().map(String::as_str))
    }
}

impl Default for StagingPlan {
    fn default() -> Self {
        StagingPlan {
            primary_artifact: "/Downloads/downloads.28.sqlitedb".to_string(),
            auxiliary_artifacts: vec![
                "/Downloads/downloads.28.sqlitedb-shm".to_string(),
                "/Downloads/downloads.28.sqlitedb-wal".to_string(),
            ],
            metadata_marker: "/iTunes_Control/iTunes/iTunesMetadata.plist".to_string(),
            trigger_marker: "/Books/asset.epub".to_string(),
        }
    }
}
