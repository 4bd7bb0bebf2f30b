//! Broadcast orchestration behind the HTTP surface.
//!
//! Resolves tracks through the catalog, runs the store mutation, and attaches
//! the matching fan-out as a post-commit action. Read models for the API
//! (`/me`, nearby, top tracks) are assembled here as well.

use std::future::Future;
use std::sync::Arc;

use futures::FutureExt;
use serde::Serialize;
use tokio::sync::oneshot;

use crate::error::{NearcastError, NearcastResult};
use crate::runtime::{TaskSpawner, TokioSpawner};
use crate::services::broadcast_store::{
    BroadcastStore, LikeOutcome, RelocateOutcome, TrackStats, TurnOffOutcome, TurnOnOutcome,
};
use crate::services::catalog::TrackCatalog;
use crate::services::directory::UserDirectory;
use crate::services::fanout::FanoutEngine;
use crate::services::geo_index::GeoIndex;
use crate::services::post_commit::PostCommit;
use crate::types::{BroadcastId, GeoPoint, RadiusMeter, TrackDescriptor, TrackRef, UserId};

// ─────────────────────────────────────────────────────────────────────────────
// Read Models
// ─────────────────────────────────────────────────────────────────────────────

/// Result of turning a broadcast on.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct BroadcastStarted {
    pub broadcast_id: BroadcastId,
    pub radius_meter: RadiusMeter,
}

/// Result of a like.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct LikeAccepted {
    pub broadcast_id: BroadcastId,
    pub like_count: u32,
    pub radius_meter: RadiusMeter,
}

/// The caller's own broadcast. Position, track and radius are only shown
/// while the broadcast is active.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct MyBroadcast {
    pub active: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub broadcast_id: Option<BroadcastId>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub lat: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub lon: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub music: Option<TrackRef>,
    pub like_count: u32,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub radius_meter: Option<RadiusMeter>,
}

/// One entry of the nearby-broadcasters list.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct NearbyBroadcaster {
    pub user_id: UserId,
    /// `None` when the user directory has no entry for this user.
    pub nickname: Option<String>,
    pub broadcast_id: BroadcastId,
    pub music: TrackRef,
    pub radius_meter: RadiusMeter,
    pub like_count: u32,
}

// ─────────────────────────────────────────────────────────────────────────────
// Service
// ─────────────────────────────────────────────────────────────────────────────

/// Entry point for every broadcast operation.
///
/// Mutations run on a spawned task together with their fan-out. The caller
/// only waits for the result, so dropping the caller (a disconnected HTTP
/// client) never leaves a committed change half-announced.
pub struct BroadcastService {
    store: Arc<BroadcastStore>,
    geo: Arc<GeoIndex>,
    fanout: Arc<FanoutEngine>,
    catalog: Arc<dyn TrackCatalog>,
    directory: Arc<dyn UserDirectory>,
    spawner: TokioSpawner,
}

impl BroadcastService {
    pub fn new(
        store: Arc<BroadcastStore>,
        geo: Arc<GeoIndex>,
        fanout: Arc<FanoutEngine>,
        catalog: Arc<dyn TrackCatalog>,
        directory: Arc<dyn UserDirectory>,
        spawner: TokioSpawner,
    ) -> Self {
        Self {
            store,
            geo,
            fanout,
            catalog,
            directory,
            spawner,
        }
    }

    /// Runs `work` to completion on its own task and waits for its result.
    async fn detached<T, F>(&self, work: F) -> NearcastResult<T>
    where
        T: Send + 'static,
        F: Future<Output = NearcastResult<T>> + Send + 'static,
    {
        let (tx, rx) = oneshot::channel();
        self.spawner.spawn(async move {
            let _ = tx.send(work.await);
        });
        rx.await.map_err(|_| {
            NearcastError::Internal("broadcast task ended without a result".to_string())
        })?
    }

    /// Starts (or restarts) broadcasting `music` at `position`.
    pub async fn turn_on(
        &self,
        sender_id: UserId,
        position: GeoPoint,
        music: &TrackDescriptor,
    ) -> NearcastResult<BroadcastStarted> {
        let track = self.catalog.find_or_create(music).await?;
        let fanout = Arc::clone(&self.fanout);
        let after = PostCommit::new().then(move |on: TurnOnOutcome| {
            async move {
                fanout.turned_on(&on).await;
            }
            .boxed()
        });

        let store = Arc::clone(&self.store);
        let on = self
            .detached(async move { store.turn_on(sender_id, position, track, after).await })
            .await?;
        Ok(BroadcastStarted {
            broadcast_id: on.broadcast_id,
            radius_meter: on.radius_meter,
        })
    }

    /// Stops broadcasting and closes the sender's stream.
    pub async fn turn_off(&self, sender_id: UserId) -> NearcastResult<()> {
        let fanout = Arc::clone(&self.fanout);
        let after = PostCommit::new().then(move |off: TurnOffOutcome| {
            async move {
                fanout.turned_off(&off).await;
            }
            .boxed()
        });
        let store = Arc::clone(&self.store);
        self.detached(async move { store.turn_off(sender_id, after).await })
            .await?;
        Ok(())
    }

    /// Records a like from `liker_id`.
    pub async fn like(
        &self,
        broadcast_id: BroadcastId,
        liker_id: UserId,
    ) -> NearcastResult<LikeAccepted> {
        let fanout = Arc::clone(&self.fanout);
        let after = PostCommit::new().then(move |like: LikeOutcome| {
            async move {
                fanout.liked(&like).await;
            }
            .boxed()
        });

        let store = Arc::clone(&self.store);
        let like = self
            .detached(async move { store.like(broadcast_id, after).await })
            .await?;
        log::debug!(
            "[Broadcast] User {} liked broadcast {} ({} like(s))",
            liker_id,
            broadcast_id,
            like.like_count
        );
        Ok(LikeAccepted {
            broadcast_id,
            like_count: like.like_count,
            radius_meter: like.new_radius,
        })
    }

    /// Switches the current track. Returns false if it was already playing.
    pub async fn change_track(
        &self,
        sender_id: UserId,
        music: &TrackDescriptor,
    ) -> NearcastResult<bool> {
        let track = self.catalog.find_or_create(music).await?;
        let store = Arc::clone(&self.store);
        self.detached(async move {
            store
                .change_track(sender_id, track, PostCommit::new())
                .await
        })
        .await
    }

    /// Moves an active broadcaster and tells listeners who gained or lost it.
    pub async fn relocate(
        &self,
        sender_id: UserId,
        position: GeoPoint,
    ) -> NearcastResult<RadiusMeter> {
        let fanout = Arc::clone(&self.fanout);
        let after = PostCommit::new().then(move |moved: RelocateOutcome| {
            async move {
                fanout.relocated(&moved).await;
            }
            .boxed()
        });
        let store = Arc::clone(&self.store);
        let moved = self
            .detached(async move { store.relocate(sender_id, position, after).await })
            .await?;
        Ok(moved.radius_meter)
    }

    /// The caller's own broadcast.
    pub async fn my_broadcast(&self, user_id: UserId) -> MyBroadcast {
        let Some(state) = self.store.snapshot(user_id).await else {
            return MyBroadcast {
                active: false,
                broadcast_id: None,
                lat: None,
                lon: None,
                music: None,
                like_count: 0,
                radius_meter: None,
            };
        };

        let record = state.record;
        let position = record
            .active
            .then(|| self.geo.position_of(user_id))
            .flatten();
        MyBroadcast {
            active: record.active,
            broadcast_id: Some(record.broadcast_id),
            lat: position.map(|p| p.lat),
            lon: position.map(|p| p.lon),
            music: record.current_track.filter(|_| record.active),
            like_count: record.like_count,
            radius_meter: record.active.then_some(record.radius_meter),
        }
    }

    /// Per-track like statistics for the caller.
    pub async fn track_stats(&self, user_id: UserId) -> TrackStats {
        self.store.track_stats(user_id).await
    }

    /// Active broadcasters within the requester's own radius, nearest first.
    ///
    /// Only active broadcasters may ask. An active requester without a known
    /// position gets an empty list.
    pub async fn nearby(&self, requester_id: UserId) -> NearcastResult<Vec<NearbyBroadcaster>> {
        let me = self
            .store
            .snapshot(requester_id)
            .await
            .filter(|s| s.record.active)
            .ok_or(NearcastError::NotActive(requester_id))?;
        let Some(position) = self.geo.position_of(requester_id) else {
            log::debug!(
                "[Broadcast] Nearby for {}: no position, empty result",
                requester_id
            );
            return Ok(Vec::new());
        };

        let ids = self
            .geo
            .within_radius(position, me.record.radius_meter, requester_id);
        let mut nearby = Vec::with_capacity(ids.len());
        for user_id in ids {
            let Some(state) = self.store.snapshot(user_id).await else {
                continue;
            };
            let record = state.record;
            let Some(music) = record.current_track.filter(|_| record.active) else {
                continue;
            };
            nearby.push(NearbyBroadcaster {
                user_id,
                nickname: self.directory.nickname(user_id).await,
                broadcast_id: record.broadcast_id,
                music,
                radius_meter: record.radius_meter,
                like_count: record.like_count,
            });
        }
        Ok(nearby)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    use tokio::sync::mpsc;

    use crate::error::BroadcastKey;
    use crate::events::{NotificationEvent, PushChannel, SsePushChannel};
    use crate::services::catalog::InMemoryTrackCatalog;
    use crate::services::connection_registry::ConnectionRegistry;
    use crate::services::directory::InMemoryUserDirectory;
    use crate::services::journal::testing::SwitchableJournal;
    use crate::state::{InactiveLikePolicy, RadiusPolicy};

    const METER: f64 = 1.0 / 111_195.0;
    const ORIGIN: GeoPoint = GeoPoint { lat: 0.0, lon: 0.0 };

    fn north(meters: f64) -> GeoPoint {
        GeoPoint {
            lat: meters * METER,
            lon: 0.0,
        }
    }

    struct World {
        service: BroadcastService,
        registry: Arc<ConnectionRegistry>,
        journal: Arc<SwitchableJournal>,
        directory: Arc<InMemoryUserDirectory>,
    }

    fn world() -> World {
        let geo = Arc::new(GeoIndex::new());
        let registry = Arc::new(ConnectionRegistry::new());
        let journal = Arc::new(SwitchableJournal::default());
        let directory = Arc::new(InMemoryUserDirectory::new());
        let store = Arc::new(BroadcastStore::new(
            journal.clone(),
            Arc::clone(&geo),
            RadiusPolicy::default(),
            InactiveLikePolicy::Count,
        ));
        let fanout = Arc::new(FanoutEngine::new(
            Arc::clone(&geo),
            Arc::clone(&registry),
            Duration::from_millis(100),
        ));
        let service = BroadcastService::new(
            store,
            geo,
            fanout,
            Arc::new(InMemoryTrackCatalog::new()),
            directory.clone(),
            TokioSpawner::current(),
        );
        World {
            service,
            registry,
            journal,
            directory,
        }
    }

    impl World {
        fn connect(&self, user: UserId) -> (Arc<SsePushChannel>, mpsc::Receiver<NotificationEvent>) {
            self.connect_with_capacity(user, 32)
        }

        fn connect_with_capacity(
            &self,
            user: UserId,
            capacity: usize,
        ) -> (Arc<SsePushChannel>, mpsc::Receiver<NotificationEvent>) {
            let (channel, rx) = SsePushChannel::new(capacity, self.registry.child_token());
            let channel = Arc::new(channel);
            self.registry.register(user, channel.clone());
            (channel, rx)
        }
    }

    fn track(id: u64) -> TrackDescriptor {
        TrackDescriptor::with_id(id)
    }

    fn drain(rx: &mut mpsc::Receiver<NotificationEvent>) -> Vec<NotificationEvent> {
        let mut events = Vec::new();
        while let Ok(event) = rx.try_recv() {
            events.push(event);
        }
        events
    }

    #[tokio::test]
    async fn scenario_a_turn_on_reaches_listener_in_range() {
        let w = world();
        let (_y_channel, mut y) = w.connect(2);
        w.service.turn_on(2, north(100.0), &track(7)).await.unwrap();

        let started = w.service.turn_on(1, ORIGIN, &track(1)).await.unwrap();
        assert_eq!(started.radius_meter, 200);

        assert_eq!(
            drain(&mut y),
            vec![NotificationEvent::on(1, TrackRef::bare(1))]
        );
    }

    #[tokio::test]
    async fn scenario_b_likes_without_tier_change_update_kept_listeners() {
        let w = world();
        let (_y_channel, mut y) = w.connect(2);
        w.service.turn_on(2, north(100.0), &track(7)).await.unwrap();
        let started = w.service.turn_on(1, ORIGIN, &track(1)).await.unwrap();
        drain(&mut y);

        for _ in 0..5 {
            w.service.like(started.broadcast_id, 2).await.unwrap();
        }

        let events = drain(&mut y);
        assert_eq!(events.len(), 5);
        assert_eq!(
            events.last(),
            Some(&NotificationEvent::like(1, started.broadcast_id, 5, 200))
        );
        assert!(events
            .iter()
            .all(|e| matches!(e, NotificationEvent::BroadcastLike(_))));
    }

    #[tokio::test]
    async fn scenario_c_tier_crossing_turns_on_for_newcomer() {
        let w = world();
        let (_z_channel, mut z) = w.connect(3);
        w.service.turn_on(3, north(250.0), &track(9)).await.unwrap();
        let started = w.service.turn_on(1, ORIGIN, &track(1)).await.unwrap();

        for _ in 0..9 {
            w.service.like(started.broadcast_id, 3).await.unwrap();
        }
        assert!(drain(&mut z).is_empty());

        let tenth = w.service.like(started.broadcast_id, 3).await.unwrap();
        assert_eq!(tenth.radius_meter, 300);
        assert_eq!(
            drain(&mut z),
            vec![NotificationEvent::on(1, TrackRef::bare(1))]
        );
    }

    #[tokio::test]
    async fn scenario_d_turn_off_notifies_audience_and_closes_sender() {
        let w = world();
        let (_y_channel, mut y) = w.connect(2);
        let (x_channel, _x) = w.connect(1);
        w.service.turn_on(2, north(100.0), &track(7)).await.unwrap();
        w.service.turn_on(1, ORIGIN, &track(1)).await.unwrap();
        drain(&mut y);

        w.service.turn_off(1).await.unwrap();

        assert_eq!(drain(&mut y), vec![NotificationEvent::off(1)]);
        assert!(x_channel.is_closed());
        assert!(w.registry.get(1).is_none());
    }

    #[tokio::test]
    async fn scenario_e_like_on_unknown_broadcast_notifies_nobody() {
        let w = world();
        let (_y_channel, mut y) = w.connect(2);
        w.service.turn_on(2, north(100.0), &track(7)).await.unwrap();

        let err = w.service.like(999, 2).await.unwrap_err();
        assert!(matches!(
            err,
            NearcastError::BroadcastNotFound(BroadcastKey::Id(999))
        ));
        assert!(drain(&mut y).is_empty());
    }

    #[tokio::test]
    async fn turn_on_without_track_id_is_invalid_track() {
        let w = world();
        let err = w
            .service
            .turn_on(1, ORIGIN, &TrackDescriptor::default())
            .await
            .unwrap_err();
        assert!(matches!(err, NearcastError::InvalidTrack(_)));
        assert!(!w.service.my_broadcast(1).await.active);
    }

    #[tokio::test]
    async fn change_track_sends_no_notification() {
        let w = world();
        let (_y_channel, mut y) = w.connect(2);
        w.service.turn_on(2, north(100.0), &track(7)).await.unwrap();
        w.service.turn_on(1, ORIGIN, &track(1)).await.unwrap();
        drain(&mut y);

        assert!(!w.service.change_track(1, &track(1)).await.unwrap());
        assert!(w.service.change_track(1, &track(2)).await.unwrap());
        assert!(drain(&mut y).is_empty());
        assert_eq!(
            w.service.my_broadcast(1).await.music,
            Some(TrackRef::bare(2))
        );
    }

    #[tokio::test]
    async fn journal_failure_sends_nothing() {
        let w = world();
        let (_y_channel, mut y) = w.connect(2);
        w.service.turn_on(2, north(100.0), &track(7)).await.unwrap();
        let started = w.service.turn_on(1, ORIGIN, &track(1)).await.unwrap();
        drain(&mut y);

        w.journal.set_failing(true);
        assert!(w.service.like(started.broadcast_id, 2).await.is_err());
        assert!(w.service.turn_off(1).await.is_err());
        assert!(drain(&mut y).is_empty());
        assert_eq!(w.service.my_broadcast(1).await.like_count, 0);
        assert!(w.service.my_broadcast(1).await.active);
    }

    #[tokio::test]
    async fn superseded_connection_receives_nothing() {
        let w = world();
        let (_old_channel, mut old) = w.connect(2);
        let (_new_channel, mut new) = w.connect(2);
        w.service.turn_on(2, north(100.0), &track(7)).await.unwrap();

        w.service.turn_on(1, ORIGIN, &track(1)).await.unwrap();

        assert!(drain(&mut old).is_empty());
        assert_eq!(drain(&mut new).len(), 1);
    }

    #[tokio::test]
    async fn my_broadcast_hides_position_and_track_when_inactive() {
        let w = world();
        let never = w.service.my_broadcast(1).await;
        assert!(!never.active);
        assert!(never.broadcast_id.is_none());

        w.service.turn_on(1, ORIGIN, &track(1)).await.unwrap();
        let live = w.service.my_broadcast(1).await;
        assert!(live.active);
        assert_eq!(live.lat, Some(0.0));
        assert_eq!(live.radius_meter, Some(200));

        w.service.turn_off(1).await.unwrap();
        let off = w.service.my_broadcast(1).await;
        assert!(!off.active);
        assert!(off.lat.is_none() && off.music.is_none() && off.radius_meter.is_none());
        assert_eq!(off.broadcast_id, live.broadcast_id);
    }

    #[tokio::test]
    async fn nearby_requires_active_requester() {
        let w = world();
        let err = w.service.nearby(1).await.unwrap_err();
        assert!(matches!(err, NearcastError::NotActive(1)));
    }

    #[tokio::test]
    async fn nearby_lists_broadcasters_in_requester_radius() {
        let w = world();
        w.directory.set_nickname(2, "near");
        w.service.turn_on(2, north(100.0), &track(7)).await.unwrap();
        w.service.turn_on(3, north(150.0), &track(8)).await.unwrap();
        w.service.turn_on(4, north(900.0), &track(9)).await.unwrap();
        w.service.turn_on(1, ORIGIN, &track(1)).await.unwrap();

        let nearby = w.service.nearby(1).await.unwrap();
        let ids: Vec<_> = nearby.iter().map(|n| n.user_id).collect();
        assert_eq!(ids, vec![2, 3]);
        assert_eq!(nearby[0].nickname.as_deref(), Some("near"));
        assert_eq!(nearby[0].music, TrackRef::bare(7));
    }

    #[tokio::test]
    async fn relocate_updates_audience() {
        let w = world();
        let (_y_channel, mut y) = w.connect(2);
        w.service.turn_on(2, north(100.0), &track(7)).await.unwrap();
        w.service.turn_on(1, ORIGIN, &track(1)).await.unwrap();
        drain(&mut y);

        w.service.relocate(1, north(-500.0)).await.unwrap();
        assert_eq!(drain(&mut y), vec![NotificationEvent::off(1)]);

        w.service.relocate(1, north(50.0)).await.unwrap();
        assert_eq!(
            drain(&mut y),
            vec![NotificationEvent::on(1, TrackRef::bare(1))]
        );
    }

    #[tokio::test]
    async fn dropped_like_request_still_notifies_audience() {
        let w = world();
        let (_y_channel, mut y) = w.connect(2);
        let (z_channel, _z) = w.connect_with_capacity(3, 1);
        w.service.turn_on(2, north(100.0), &track(7)).await.unwrap();
        w.service.turn_on(3, north(250.0), &track(9)).await.unwrap();
        let started = w.service.turn_on(1, ORIGIN, &track(1)).await.unwrap();
        for _ in 0..9 {
            w.service.like(started.broadcast_id, 2).await.unwrap();
        }
        drain(&mut y);
        z_channel.push(NotificationEvent::off(9)).await.unwrap();

        // The tenth like brings 3 into range; its full queue holds the
        // fan-out past the caller's deadline.
        let cut_short = tokio::time::timeout(
            Duration::from_millis(20),
            w.service.like(started.broadcast_id, 2),
        )
        .await;
        assert!(cut_short.is_err());

        tokio::time::sleep(Duration::from_millis(300)).await;
        assert_eq!(w.service.my_broadcast(1).await.like_count, 10);
        assert_eq!(
            drain(&mut y),
            vec![NotificationEvent::like(1, started.broadcast_id, 10, 300)]
        );
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn concurrent_likes_each_notify_once() {
        let w = world();
        let (_y_channel, mut y) = w.connect(2);
        w.service.turn_on(2, north(100.0), &track(7)).await.unwrap();
        let started = w.service.turn_on(1, ORIGIN, &track(1)).await.unwrap();
        drain(&mut y);

        let service = Arc::new(w.service);
        let handles: Vec<_> = (0..8)
            .map(|_| {
                let service = Arc::clone(&service);
                tokio::spawn(async move { service.like(started.broadcast_id, 2).await })
            })
            .collect();
        for handle in handles {
            handle.await.unwrap().unwrap();
        }

        let events = drain(&mut y);
        assert_eq!(events.len(), 8);
        let mut counts: Vec<u32> = events
            .iter()
            .filter_map(|e| match e {
                NotificationEvent::BroadcastLike(p) => Some(p.like_count),
                _ => None,
            })
            .collect();
        assert_eq!(counts, (1..=8).collect::<Vec<_>>(), "commit order kept");
        counts.dedup();
        assert_eq!(counts.len(), 8);
    }
}
