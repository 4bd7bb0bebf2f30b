//! Durable per-broadcaster state with commit-gated side effects.
//!
//! Every mutation runs under that broadcaster's exclusive async lock:
//!
//! 1. clone the committed state into a draft and mutate the draft
//! 2. write the draft through the [`BroadcastJournal`]
//! 3. install the draft and update the [`GeoIndex`]
//! 4. run the caller's [`PostCommit`] actions with the outcome
//!
//! A journal failure returns before step 3, so the committed state, the
//! index, and any listeners are left untouched. Post-commit actions run while
//! the lock is still held, which keeps deliveries for one broadcaster in
//! commit order.

use std::collections::BTreeMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use tokio::sync::Mutex;

use crate::error::{BroadcastKey, NearcastError, NearcastResult};
use crate::services::geo_index::GeoIndex;
use crate::services::journal::BroadcastJournal;
use crate::services::post_commit::PostCommit;
use crate::state::{InactiveLikePolicy, RadiusPolicy};
use crate::types::{BroadcastId, GeoPoint, RadiusMeter, TrackId, TrackRef, UserId};
use crate::utils::now_millis;

// ─────────────────────────────────────────────────────────────────────────────
// Persisted State
// ─────────────────────────────────────────────────────────────────────────────

/// The broadcast row of one user.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BroadcastRecord {
    pub broadcast_id: BroadcastId,
    pub sender_id: UserId,
    pub active: bool,
    /// Set if and only if `active`.
    pub current_track: Option<TrackRef>,
    pub like_count: u32,
    pub radius_meter: RadiusMeter,
    /// Unix millis of the last committed mutation.
    pub updated_at: u64,
}

/// Likes received while a particular track was playing.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TrackLikeCount {
    pub track: TrackRef,
    pub like_count: u32,
}

/// Everything persisted for one broadcaster.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BroadcasterState {
    pub record: BroadcastRecord,
    #[serde(default)]
    pub track_likes: BTreeMap<TrackId, TrackLikeCount>,
}

/// Top-tracks statistics for one broadcaster.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TrackStats {
    pub total_tracks: usize,
    pub total_likes: u64,
    /// Highest like count first; ties by track id.
    pub tracks: Vec<TrackLikeCount>,
}

// ─────────────────────────────────────────────────────────────────────────────
// Mutation Outcomes
// ─────────────────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq)]
pub struct TurnOnOutcome {
    pub broadcast_id: BroadcastId,
    pub sender_id: UserId,
    pub radius_meter: RadiusMeter,
    pub position: GeoPoint,
    pub track: TrackRef,
}

#[derive(Debug, Clone, PartialEq)]
pub struct TurnOffOutcome {
    pub broadcast_id: BroadcastId,
    pub sender_id: UserId,
    /// Radius in effect before deactivation.
    pub old_radius: RadiusMeter,
    /// Position removed from the index; `None` if the broadcast was not live.
    pub last_position: Option<GeoPoint>,
    pub was_active: bool,
}

#[derive(Debug, Clone, PartialEq)]
pub struct LikeOutcome {
    pub broadcast_id: BroadcastId,
    pub sender_id: UserId,
    pub old_radius: RadiusMeter,
    pub new_radius: RadiusMeter,
    pub like_count: u32,
    pub active: bool,
    /// Current track at the time of the like, for `broadcast.on` payloads.
    pub track: Option<TrackRef>,
    /// Sender position captured once, right after commit.
    pub position: Option<GeoPoint>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct RelocateOutcome {
    pub sender_id: UserId,
    pub old_position: Option<GeoPoint>,
    pub new_position: GeoPoint,
    pub radius_meter: RadiusMeter,
    pub track: TrackRef,
}

#[derive(Debug, Clone, PartialEq)]
pub struct ChangeTrackOutcome {
    pub sender_id: UserId,
    pub track: TrackRef,
}

// ─────────────────────────────────────────────────────────────────────────────
// Store
// ─────────────────────────────────────────────────────────────────────────────

type Slot = Arc<Mutex<Option<BroadcasterState>>>;

/// Durable broadcaster state, one exclusive slot per sender.
pub struct BroadcastStore {
    slots: DashMap<UserId, Slot>,
    /// Secondary index: broadcast id -> sender id.
    by_id: DashMap<BroadcastId, UserId>,
    next_broadcast_id: AtomicU64,
    journal: Arc<dyn BroadcastJournal>,
    geo: Arc<GeoIndex>,
    radius_policy: RadiusPolicy,
    inactive_like_policy: InactiveLikePolicy,
}

impl BroadcastStore {
    pub fn new(
        journal: Arc<dyn BroadcastJournal>,
        geo: Arc<GeoIndex>,
        radius_policy: RadiusPolicy,
        inactive_like_policy: InactiveLikePolicy,
    ) -> Self {
        Self {
            slots: DashMap::new(),
            by_id: DashMap::new(),
            next_broadcast_id: AtomicU64::new(1),
            journal,
            geo,
            radius_policy,
            inactive_like_policy,
        }
    }

    /// Loads committed state from the journal.
    ///
    /// Positions are not persisted, so previously active broadcasts come
    /// back active but invisible until their owner refreshes location or
    /// turns on again.
    pub fn restore(&self) -> NearcastResult<usize> {
        let states = self.journal.load_all()?;
        let count = states.len();
        let mut max_id = 0;
        for state in states {
            let sender_id = state.record.sender_id;
            let broadcast_id = state.record.broadcast_id;
            max_id = max_id.max(broadcast_id);
            self.by_id.insert(broadcast_id, sender_id);
            self.slots
                .insert(sender_id, Arc::new(Mutex::new(Some(state))));
        }
        self.next_broadcast_id.fetch_max(max_id + 1, Ordering::SeqCst);
        if count > 0 {
            log::info!(
                "[BroadcastStore] Restored {} broadcaster(s), next id {}",
                count,
                max_id + 1
            );
        }
        Ok(count)
    }

    pub fn radius_policy(&self) -> &RadiusPolicy {
        &self.radius_policy
    }

    fn slot(&self, sender_id: UserId) -> Option<Slot> {
        self.slots.get(&sender_id).map(|r| Arc::clone(r.value()))
    }

    fn slot_or_create(&self, sender_id: UserId) -> Slot {
        Arc::clone(self.slots.entry(sender_id).or_default().value())
    }

    /// Activates (or re-activates) a broadcast.
    ///
    /// Creates the row on first use. The radius is recomputed from the
    /// existing like count.
    pub async fn turn_on(
        &self,
        sender_id: UserId,
        position: GeoPoint,
        track: TrackRef,
        after: PostCommit<TurnOnOutcome>,
    ) -> NearcastResult<TurnOnOutcome> {
        let slot = self.slot_or_create(sender_id);
        let mut committed = slot.lock().await;

        let mut draft = match committed.as_ref() {
            Some(state) => state.clone(),
            None => BroadcasterState {
                record: BroadcastRecord {
                    broadcast_id: self.next_broadcast_id.fetch_add(1, Ordering::SeqCst),
                    sender_id,
                    active: false,
                    current_track: None,
                    like_count: 0,
                    radius_meter: self.radius_policy.base_radius(),
                    updated_at: 0,
                },
                track_likes: BTreeMap::new(),
            },
        };
        let is_new = committed.is_none();

        let record = &mut draft.record;
        record.active = true;
        record.current_track = Some(track.clone());
        record.radius_meter = self.radius_policy.radius_for(record.like_count);
        record.updated_at = now_millis();

        self.journal.commit(&draft).await?;

        let outcome = TurnOnOutcome {
            broadcast_id: draft.record.broadcast_id,
            sender_id,
            radius_meter: draft.record.radius_meter,
            position,
            track,
        };
        if is_new {
            self.by_id.insert(outcome.broadcast_id, sender_id);
        }
        *committed = Some(draft);
        self.geo.upsert(sender_id, position);

        log::info!(
            "[BroadcastStore] Sender {} on: broadcast {} track {} radius {}m",
            sender_id,
            outcome.broadcast_id,
            outcome.track.track_id,
            outcome.radius_meter
        );
        after.run(outcome.clone()).await;
        Ok(outcome)
    }

    /// Deactivates a broadcast.
    ///
    /// Like count and radius are kept. Turning off an inactive broadcast
    /// succeeds with no position.
    pub async fn turn_off(
        &self,
        sender_id: UserId,
        after: PostCommit<TurnOffOutcome>,
    ) -> NearcastResult<TurnOffOutcome> {
        let not_found = || NearcastError::BroadcastNotFound(BroadcastKey::Sender(sender_id));
        let slot = self.slot(sender_id).ok_or_else(not_found)?;
        let mut committed = slot.lock().await;
        let current = committed.as_ref().ok_or_else(not_found)?;

        let was_active = current.record.active;
        let mut draft = current.clone();
        draft.record.active = false;
        draft.record.current_track = None;
        draft.record.updated_at = now_millis();

        self.journal.commit(&draft).await?;

        let outcome = TurnOffOutcome {
            broadcast_id: draft.record.broadcast_id,
            sender_id,
            old_radius: draft.record.radius_meter,
            last_position: self.geo.remove(sender_id),
            was_active,
        };
        *committed = Some(draft);

        log::info!(
            "[BroadcastStore] Sender {} off: broadcast {} (was active: {})",
            sender_id,
            outcome.broadcast_id,
            was_active
        );
        after.run(outcome.clone()).await;
        Ok(outcome)
    }

    /// Replaces the current track of an active broadcast.
    ///
    /// Returns `Ok(false)` without committing if the track is unchanged.
    pub async fn change_track(
        &self,
        sender_id: UserId,
        track: TrackRef,
        after: PostCommit<ChangeTrackOutcome>,
    ) -> NearcastResult<bool> {
        let slot = self
            .slot(sender_id)
            .ok_or(NearcastError::NotActive(sender_id))?;
        let mut committed = slot.lock().await;
        let current = committed
            .as_ref()
            .filter(|s| s.record.active)
            .ok_or(NearcastError::NotActive(sender_id))?;

        if current.record.current_track.as_ref() == Some(&track) {
            log::debug!(
                "[BroadcastStore] Sender {} already plays track {}",
                sender_id,
                track.track_id
            );
            return Ok(false);
        }

        let mut draft = current.clone();
        draft.record.current_track = Some(track.clone());
        draft.record.updated_at = now_millis();

        self.journal.commit(&draft).await?;
        *committed = Some(draft);

        log::info!(
            "[BroadcastStore] Sender {} changed track to {}",
            sender_id,
            track.track_id
        );
        after.run(ChangeTrackOutcome { sender_id, track }).await;
        Ok(true)
    }

    /// Records one like.
    ///
    /// Increments the like count by exactly one and recomputes the radius.
    /// While active, the current track's counter is incremented too.
    pub async fn like(
        &self,
        broadcast_id: BroadcastId,
        after: PostCommit<LikeOutcome>,
    ) -> NearcastResult<LikeOutcome> {
        let not_found = || NearcastError::BroadcastNotFound(BroadcastKey::Id(broadcast_id));
        let sender_id = self
            .by_id
            .get(&broadcast_id)
            .map(|r| *r.value())
            .ok_or_else(not_found)?;
        let slot = self.slot(sender_id).ok_or_else(not_found)?;
        let mut committed = slot.lock().await;
        let current = committed.as_ref().ok_or_else(not_found)?;

        let active = current.record.active;
        if !active && self.inactive_like_policy == InactiveLikePolicy::Reject {
            return Err(NearcastError::NotActive(sender_id));
        }

        let mut draft = current.clone();
        let old_radius = draft.record.radius_meter;
        draft.record.like_count = draft.record.like_count.saturating_add(1);
        draft.record.radius_meter = self.radius_policy.radius_for(draft.record.like_count);
        draft.record.updated_at = now_millis();
        if let Some(track) = draft.record.current_track.clone() {
            draft
                .track_likes
                .entry(track.track_id)
                .and_modify(|t| {
                    t.like_count = t.like_count.saturating_add(1);
                    t.track = track.clone();
                })
                .or_insert(TrackLikeCount {
                    track,
                    like_count: 1,
                });
        }

        self.journal.commit(&draft).await?;

        let outcome = LikeOutcome {
            broadcast_id,
            sender_id,
            old_radius,
            new_radius: draft.record.radius_meter,
            like_count: draft.record.like_count,
            active,
            track: draft.record.current_track.clone(),
            position: self.geo.position_of(sender_id),
        };
        *committed = Some(draft);

        log::debug!(
            "[BroadcastStore] Broadcast {} liked: {} like(s), radius {}m -> {}m",
            broadcast_id,
            outcome.like_count,
            old_radius,
            outcome.new_radius
        );
        after.run(outcome.clone()).await;
        Ok(outcome)
    }

    /// Moves an active broadcaster.
    ///
    /// Nothing durable changes; the lock only orders the move against other
    /// mutations of the same broadcaster.
    pub async fn relocate(
        &self,
        sender_id: UserId,
        position: GeoPoint,
        after: PostCommit<RelocateOutcome>,
    ) -> NearcastResult<RelocateOutcome> {
        let slot = self
            .slot(sender_id)
            .ok_or(NearcastError::NotActive(sender_id))?;
        let committed = slot.lock().await;
        let current = committed
            .as_ref()
            .filter(|s| s.record.active)
            .ok_or(NearcastError::NotActive(sender_id))?;
        let track = current
            .record
            .current_track
            .clone()
            .ok_or(NearcastError::NotActive(sender_id))?;

        let outcome = RelocateOutcome {
            sender_id,
            old_position: self.geo.position_of(sender_id),
            new_position: position,
            radius_meter: current.record.radius_meter,
            track,
        };
        self.geo.upsert(sender_id, position);

        after.run(outcome.clone()).await;
        Ok(outcome)
    }

    /// Committed state of a sender, if they ever broadcast.
    pub async fn snapshot(&self, sender_id: UserId) -> Option<BroadcasterState> {
        let slot = self.slot(sender_id)?;
        let committed = slot.lock().await;
        committed.clone()
    }

    /// Sender owning a broadcast id.
    pub fn resolve(&self, broadcast_id: BroadcastId) -> Option<UserId> {
        self.by_id.get(&broadcast_id).map(|r| *r.value())
    }

    /// Whether the sender currently broadcasts.
    pub async fn is_active(&self, sender_id: UserId) -> bool {
        self.snapshot(sender_id)
            .await
            .is_some_and(|s| s.record.active)
    }

    /// Per-track like statistics, highest first.
    pub async fn track_stats(&self, sender_id: UserId) -> TrackStats {
        let mut tracks: Vec<TrackLikeCount> = self
            .snapshot(sender_id)
            .await
            .map(|s| s.track_likes.into_values().collect())
            .unwrap_or_default();
        tracks.sort_by(|a, b| {
            b.like_count
                .cmp(&a.like_count)
                .then(a.track.track_id.cmp(&b.track.track_id))
        });
        TrackStats {
            total_tracks: tracks.len(),
            total_likes: tracks.iter().map(|t| u64::from(t.like_count)).sum(),
            tracks,
        }
    }
}
