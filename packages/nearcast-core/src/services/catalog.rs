//! Track catalog contract and its in-memory implementation.

use async_trait::async_trait;
use dashmap::DashMap;

use crate::error::NearcastResult;
use crate::types::{TrackDescriptor, TrackId, TrackRef};

/// Resolves client track descriptors to catalog references.
#[async_trait]
pub trait TrackCatalog: Send + Sync {
    /// Returns the catalog entry for the descriptor's track id, creating it
    /// from the descriptor on first sight.
    ///
    /// # Errors
    ///
    /// `InvalidTrack` if the descriptor carries no track id.
    async fn find_or_create(&self, descriptor: &TrackDescriptor) -> NearcastResult<TrackRef>;
}

/// Catalog held in memory; the first descriptor seen for an id wins.
#[derive(Default)]
pub struct InMemoryTrackCatalog {
    tracks: DashMap<TrackId, TrackRef>,
}

impl InMemoryTrackCatalog {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl TrackCatalog for InMemoryTrackCatalog {
    async fn find_or_create(&self, descriptor: &TrackDescriptor) -> NearcastResult<TrackRef> {
        let candidate = TrackRef::from_descriptor(descriptor).inspect_err(|_| {
            log::warn!("[Catalog] Track descriptor without trackId");
        })?;
        let entry = self.tracks.entry(candidate.track_id).or_insert_with(|| {
            log::info!("[Catalog] Created track {}", candidate.track_id);
            candidate.clone()
        });
        Ok(entry.value().clone())
    }
}
