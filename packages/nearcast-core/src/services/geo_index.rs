//! Ephemeral geospatial index of active broadcasters.
//!
//! Only users with an active broadcast are indexed; callers check activity
//! before calling [`GeoIndex::upsert`]. Each position is stored as a single
//! `Copy` value, so a concurrent reader sees either the old or the new point,
//! never a mix of the two.

use dashmap::DashMap;

use crate::types::{GeoPoint, RadiusMeter, UserId};
use crate::utils::haversine_meters;

/// Concurrent map of user id to last known position.
#[derive(Debug, Default)]
pub struct GeoIndex {
    positions: DashMap<UserId, GeoPoint>,
}

impl GeoIndex {
    /// Creates an empty index.
    pub fn new() -> Self {
        Self::default()
    }

    /// Inserts or overwrites a user's position.
    pub fn upsert(&self, user_id: UserId, point: GeoPoint) {
        self.positions.insert(user_id, point);
    }

    /// Returns the last stored position, if any.
    #[must_use]
    pub fn position_of(&self, user_id: UserId) -> Option<GeoPoint> {
        self.positions.get(&user_id).map(|r| *r.value())
    }

    /// Logically removes a user from the index.
    ///
    /// Returns the removed position.
    pub fn remove(&self, user_id: UserId) -> Option<GeoPoint> {
        self.positions.remove(&user_id).map(|(_, point)| point)
    }

    /// Returns the ids of all indexed users within `radius` meters of `origin`.
    ///
    /// Results are ordered nearest first, with ties broken by user id so the
    /// order is deterministic. `exclude` is never part of the result.
    #[must_use]
    pub fn within_radius(
        &self,
        origin: GeoPoint,
        radius: RadiusMeter,
        exclude: UserId,
    ) -> Vec<UserId> {
        let radius = f64::from(radius);
        let mut hits: Vec<(f64, UserId)> = self
            .positions
            .iter()
            .filter(|r| *r.key() != exclude)
            .filter_map(|r| {
                let distance = haversine_meters(origin, *r.value());
                (distance <= radius).then_some((distance, *r.key()))
            })
            .collect();

        hits.sort_by(|a, b| a.0.total_cmp(&b.0).then(a.1.cmp(&b.1)));
        hits.into_iter().map(|(_, id)| id).collect()
    }

    /// Number of indexed users.
    #[must_use]
    pub fn len(&self) -> usize {
        self.positions.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.positions.is_empty()
    }
}
