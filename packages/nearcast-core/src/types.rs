//! Shared domain types: identifiers, tracks, and geographic points.

use serde::{Deserialize, Serialize};

use crate::error::{NearcastError, NearcastResult};

/// Identifier of a user (listener or broadcaster).
pub type UserId = u64;

/// Identifier of a broadcast row, distinct from its owner's user id.
pub type BroadcastId = u64;

/// Stable external track identifier (catalog key).
pub type TrackId = u64;

/// Visibility radius in meters.
pub type RadiusMeter = u32;

// ─────────────────────────────────────────────────────────────────────────────
// Tracks
// ─────────────────────────────────────────────────────────────────────────────

/// Track description as sent by a client.
///
/// `track_id` is optional on the wire so that a missing id can be reported
/// as `InvalidTrack` instead of a generic deserialization failure.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TrackDescriptor {
    #[serde(default)]
    pub track_id: Option<TrackId>,
    #[serde(default)]
    pub title: Option<String>,
    #[serde(default)]
    pub artist: Option<String>,
    #[serde(default)]
    pub artwork_url: Option<String>,
    #[serde(default)]
    pub preview_url: Option<String>,
}

impl TrackDescriptor {
    /// Creates a descriptor carrying only a track id.
    pub fn with_id(track_id: TrackId) -> Self {
        Self {
            track_id: Some(track_id),
            ..Default::default()
        }
    }
}

/// Catalog-resolved track reference.
///
/// Two references denote the same track iff their `track_id`s are equal;
/// display fields are snapshots and do not take part in equality.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TrackRef {
    pub track_id: TrackId,
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub title: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub artist: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub artwork_url: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub preview_url: Option<String>,
}

impl TrackRef {
    /// Creates a reference with no display metadata.
    pub fn bare(track_id: TrackId) -> Self {
        Self {
            track_id,
            title: None,
            artist: None,
            artwork_url: None,
            preview_url: None,
        }
    }

    /// Builds a reference from a descriptor.
    ///
    /// # Errors
    ///
    /// Returns `InvalidTrack` if the descriptor has no track id.
    pub fn from_descriptor(descriptor: &TrackDescriptor) -> NearcastResult<Self> {
        let track_id = descriptor
            .track_id
            .ok_or_else(|| NearcastError::InvalidTrack("music.trackId is required".into()))?;
        Ok(Self {
            track_id,
            title: descriptor.title.clone(),
            artist: descriptor.artist.clone(),
            artwork_url: descriptor.artwork_url.clone(),
            preview_url: descriptor.preview_url.clone(),
        })
    }

    /// Returns true if both references denote the same catalog track.
    pub fn same_track(&self, other: &TrackRef) -> bool {
        self.track_id == other.track_id
    }
}

impl PartialEq for TrackRef {
    fn eq(&self, other: &Self) -> bool {
        self.same_track(other)
    }
}

impl Eq for TrackRef {}

// ─────────────────────────────────────────────────────────────────────────────
// Geography
// ─────────────────────────────────────────────────────────────────────────────

/// A WGS84 coordinate in decimal degrees.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct GeoPoint {
    pub lat: f64,
    pub lon: f64,
}

impl GeoPoint {
    /// Creates a validated point.
    ///
    /// # Errors
    ///
    /// Returns `InvalidRequest` for non-finite or out-of-range coordinates.
    pub fn new(lat: f64, lon: f64) -> NearcastResult<Self> {
        if !lat.is_finite() || !(-90.0..=90.0).contains(&lat) {
            return Err(NearcastError::InvalidRequest(format!(
                "latitude out of range: {}",
                lat
            )));
        }
        if !lon.is_finite() || !(-180.0..=180.0).contains(&lon) {
            return Err(NearcastError::InvalidRequest(format!(
                "longitude out of range: {}",
                lon
            )));
        }
        Ok(Self { lat, lon })
    }
}
