//! Differential targeting and delivery of broadcast events.
//!
//! The engine answers two questions for every committed transition: who must
//! hear about it, and what each of them must hear. Audiences are computed
//! from the [`GeoIndex`]; a radius or position change is turned into an
//! [`AudienceDiff`] so that newcomers get `broadcast.on`, users now out of
//! range get `broadcast.off`, and everyone else only gets an update.
//!
//! Delivery runs concurrently across targets. Each send is bounded by the
//! configured timeout; a failed or timed-out send deregisters that exact
//! connection and never affects the other targets or the committed state.

use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;

use futures::future::join_all;
use serde::Serialize;

use crate::error::DeliveryError;
use crate::events::NotificationEvent;
use crate::services::broadcast_store::{LikeOutcome, RelocateOutcome, TurnOffOutcome, TurnOnOutcome};
use crate::services::connection_registry::ConnectionRegistry;
use crate::services::geo_index::GeoIndex;
use crate::types::{GeoPoint, RadiusMeter, UserId};

// ─────────────────────────────────────────────────────────────────────────────
// Audience Diff
// ─────────────────────────────────────────────────────────────────────────────

/// Partition of two audiences.
///
/// `joined` and `kept` keep the order of the new audience, `left` the order
/// of the old one (nearest first in both cases).
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct AudienceDiff {
    /// In the new audience only.
    pub joined: Vec<UserId>,
    /// In the old audience only.
    pub left: Vec<UserId>,
    /// In both.
    pub kept: Vec<UserId>,
}

impl AudienceDiff {
    pub fn between(old: &[UserId], new: &[UserId]) -> Self {
        let old_set: HashSet<UserId> = old.iter().copied().collect();
        let new_set: HashSet<UserId> = new.iter().copied().collect();

        let (kept, joined) = new.iter().copied().partition(|id| old_set.contains(id));
        let left = old
            .iter()
            .copied()
            .filter(|id| !new_set.contains(id))
            .collect();

        Self { joined, left, kept }
    }

    /// Everyone is kept; used when the audience is known not to change.
    pub fn unchanged(audience: Vec<UserId>) -> Self {
        Self {
            kept: audience,
            ..Default::default()
        }
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Delivery Report
// ─────────────────────────────────────────────────────────────────────────────

/// Per-fan-out delivery counters.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DeliveryReport {
    pub delivered: usize,
    pub no_channel: usize,
    pub failed: usize,
    pub skipped_self: usize,
}

impl DeliveryReport {
    pub fn merge(self, other: DeliveryReport) -> Self {
        Self {
            delivered: self.delivered + other.delivered,
            no_channel: self.no_channel + other.no_channel,
            failed: self.failed + other.failed,
            skipped_self: self.skipped_self + other.skipped_self,
        }
    }

    pub fn attempted(&self) -> usize {
        self.delivered + self.no_channel + self.failed + self.skipped_self
    }
}

enum TargetResult {
    Delivered,
    NoChannel,
    Failed,
    SkippedSelf,
}

// ─────────────────────────────────────────────────────────────────────────────
// Engine
// ─────────────────────────────────────────────────────────────────────────────

/// Computes audiences and delivers events to their live connections.
pub struct FanoutEngine {
    geo: Arc<GeoIndex>,
    registry: Arc<ConnectionRegistry>,
    send_timeout: Duration,
}

impl FanoutEngine {
    pub fn new(geo: Arc<GeoIndex>, registry: Arc<ConnectionRegistry>, send_timeout: Duration) -> Self {
        Self {
            geo,
            registry,
            send_timeout,
        }
    }

    /// Users within `radius` of `position`, nearest first, sender excluded.
    pub fn audience(&self, sender_id: UserId, position: GeoPoint, radius: RadiusMeter) -> Vec<UserId> {
        self.geo.within_radius(position, radius, sender_id)
    }

    /// Audience change caused by a like, or `None` if nobody is to be told.
    ///
    /// Uses the single position captured with the outcome. With an unchanged
    /// radius the index is queried once and everyone is kept.
    pub fn like_diff(&self, like: &LikeOutcome) -> Option<AudienceDiff> {
        if !like.active {
            return None;
        }
        let position = like.position?;
        if like.old_radius == like.new_radius {
            return Some(AudienceDiff::unchanged(self.audience(
                like.sender_id,
                position,
                like.new_radius,
            )));
        }
        let old = self.audience(like.sender_id, position, like.old_radius);
        let new = self.audience(like.sender_id, position, like.new_radius);
        Some(AudienceDiff::between(&old, &new))
    }

    /// Audience change caused by a move at constant radius.
    pub fn relocate_diff(&self, relocate: &RelocateOutcome) -> AudienceDiff {
        let old = relocate
            .old_position
            .map(|p| self.audience(relocate.sender_id, p, relocate.radius_meter))
            .unwrap_or_default();
        let new = self.audience(
            relocate.sender_id,
            relocate.new_position,
            relocate.radius_meter,
        );
        AudienceDiff::between(&old, &new)
    }

    /// Announces a broadcast to everyone in range.
    pub async fn turned_on(&self, on: &TurnOnOutcome) -> DeliveryReport {
        let targets = self.audience(on.sender_id, on.position, on.radius_meter);
        self.deliver(
            on.sender_id,
            &targets,
            NotificationEvent::on(on.sender_id, on.track.clone()),
        )
        .await
    }

    /// Withdraws a broadcast from its last audience, then closes the
    /// sender's own stream.
    pub async fn turned_off(&self, off: &TurnOffOutcome) -> DeliveryReport {
        let report = match off.last_position {
            Some(position) => {
                let targets = self.audience(off.sender_id, position, off.old_radius);
                self.deliver(off.sender_id, &targets, NotificationEvent::off(off.sender_id))
                    .await
            }
            None => DeliveryReport::default(),
        };
        self.registry.close(off.sender_id);
        report
    }

    /// Applies a like: joined get `on`, left get `off`, kept get `like`.
    pub async fn liked(&self, like: &LikeOutcome) -> DeliveryReport {
        let Some(diff) = self.like_diff(like) else {
            return DeliveryReport::default();
        };

        let sender_id = like.sender_id;
        let mut batches = Vec::with_capacity(3);
        if let Some(track) = like.track.clone() {
            batches.push((diff.joined.as_slice(), NotificationEvent::on(sender_id, track)));
        }
        batches.push((diff.left.as_slice(), NotificationEvent::off(sender_id)));
        batches.push((
            diff.kept.as_slice(),
            NotificationEvent::like(sender_id, like.broadcast_id, like.like_count, like.new_radius),
        ));
        self.deliver_batches(sender_id, &batches).await
    }

    /// Applies a move: joined get `on`, left get `off`, kept get nothing.
    pub async fn relocated(&self, relocate: &RelocateOutcome) -> DeliveryReport {
        let diff = self.relocate_diff(relocate);
        let sender_id = relocate.sender_id;
        let batches = [
            (
                diff.joined.as_slice(),
                NotificationEvent::on(sender_id, relocate.track.clone()),
            ),
            (diff.left.as_slice(), NotificationEvent::off(sender_id)),
        ];
        self.deliver_batches(sender_id, &batches).await
    }

    /// Sends one event to every target concurrently.
    pub async fn deliver(
        &self,
        sender_id: UserId,
        targets: &[UserId],
        event: NotificationEvent,
    ) -> DeliveryReport {
        self.deliver_batches(sender_id, &[(targets, event)]).await
    }

    /// Sends each batch's event to that batch's targets.
    ///
    /// Every send across all batches runs concurrently. Batches must not
    /// share targets.
    async fn deliver_batches(
        &self,
        sender_id: UserId,
        batches: &[(&[UserId], NotificationEvent)],
    ) -> DeliveryReport {
        let mut names = Vec::with_capacity(batches.len());
        for (targets, event) in batches.iter().filter(|(targets, _)| !targets.is_empty()) {
            log::debug!(
                "[Fanout] Sending {} from {} to {} target(s) (registry: {})",
                event.name(),
                sender_id,
                targets.len(),
                self.registry.size()
            );
            names.push(event.name());
        }
        if names.is_empty() {
            return DeliveryReport::default();
        }
        let name = names.join("+");

        let results = join_all(batches.iter().flat_map(|(targets, event)| {
            targets
                .iter()
                .map(move |&target| self.deliver_one(sender_id, target, event))
        }))
        .await;

        let mut report = DeliveryReport::default();
        for result in results {
            match result {
                TargetResult::Delivered => report.delivered += 1,
                TargetResult::NoChannel => report.no_channel += 1,
                TargetResult::Failed => report.failed += 1,
                TargetResult::SkippedSelf => report.skipped_self += 1,
            }
        }

        log::info!(
            "[Fanout] {} from {}: delivered={} no_channel={} failed={} skipped_self={}",
            name,
            sender_id,
            report.delivered,
            report.no_channel,
            report.failed,
            report.skipped_self
        );
        report
    }

    async fn deliver_one(
        &self,
        sender_id: UserId,
        target: UserId,
        event: &NotificationEvent,
    ) -> TargetResult {
        if target == sender_id {
            return TargetResult::SkippedSelf;
        }
        let Some((connection_id, channel)) = self.registry.get(target) else {
            tracing::debug!(target_user = target, event = event.name(), "no live connection");
            return TargetResult::NoChannel;
        };

        let sent = match tokio::time::timeout(self.send_timeout, channel.push(event.clone())).await {
            Ok(result) => result,
            Err(_) => Err(DeliveryError::Timeout(self.send_timeout.as_millis() as u64)),
        };

        match sent {
            Ok(()) => {
                tracing::debug!(target_user = target, event = event.name(), "delivered");
                TargetResult::Delivered
            }
            Err(e) => {
                log::warn!(
                    "[Fanout] {} to user {} failed: {}; dropping connection #{}",
                    event.name(),
                    target,
                    e,
                    connection_id
                );
                self.registry.remove_if(target, connection_id);
                TargetResult::Failed
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::events::{PushChannel, SsePushChannel};
    use crate::types::TrackRef;
    use async_trait::async_trait;
    use tokio::sync::mpsc;

    const METER: f64 = 1.0 / 111_195.0;
    const ORIGIN: GeoPoint = GeoPoint { lat: 0.0, lon: 0.0 };

    fn north(meters: f64) -> GeoPoint {
        GeoPoint {
            lat: meters * METER,
            lon: 0.0,
        }
    }

    struct Harness {
        geo: Arc<GeoIndex>,
        registry: Arc<ConnectionRegistry>,
        engine: FanoutEngine,
    }

    fn harness() -> Harness {
        let geo = Arc::new(GeoIndex::new());
        let registry = Arc::new(ConnectionRegistry::new());
        let engine = FanoutEngine::new(
            Arc::clone(&geo),
            Arc::clone(&registry),
            Duration::from_millis(50),
        );
        Harness {
            geo,
            registry,
            engine,
        }
    }

    impl Harness {
        fn connect(&self, user: UserId) -> mpsc::Receiver<NotificationEvent> {
            let (channel, rx) = SsePushChannel::new(8, self.registry.child_token());
            self.registry.register(user, Arc::new(channel));
            rx
        }
    }

    /// Channel whose every push fails.
    struct BrokenChannel;

    #[async_trait]
    impl PushChannel for BrokenChannel {
        async fn push(&self, _event: NotificationEvent) -> Result<(), DeliveryError> {
            Err(DeliveryError::ChannelUnavailable)
        }
        fn close(&self) {}
        fn is_closed(&self) -> bool {
            false
        }
    }

    fn like(old_radius: u32, new_radius: u32, like_count: u32) -> LikeOutcome {
        LikeOutcome {
            broadcast_id: 100,
            sender_id: 1,
            old_radius,
            new_radius,
            like_count,
            active: true,
            track: Some(TrackRef::bare(42)),
            position: Some(ORIGIN),
        }
    }

    #[test]
    fn diff_partitions_both_audiences() {
        let old = vec![2, 3, 4];
        let new = vec![3, 5, 4, 6];
        let diff = AudienceDiff::between(&old, &new);

        assert_eq!(diff.joined, vec![5, 6]);
        assert_eq!(diff.left, vec![2]);
        assert_eq!(diff.kept, vec![3, 4]);

        let joined: HashSet<_> = diff.joined.iter().collect();
        let left: HashSet<_> = diff.left.iter().collect();
        assert!(joined.is_disjoint(&left));

        let mut joined_kept: Vec<_> = diff.joined.iter().chain(&diff.kept).copied().collect();
        let mut new_sorted = new.clone();
        joined_kept.sort_unstable();
        new_sorted.sort_unstable();
        assert_eq!(joined_kept, new_sorted);

        let mut left_kept: Vec<_> = diff.left.iter().chain(&diff.kept).copied().collect();
        let mut old_sorted = old.clone();
        left_kept.sort_unstable();
        old_sorted.sort_unstable();
        assert_eq!(left_kept, old_sorted);
    }

    #[test]
    fn like_diff_with_growing_radius_reports_joined() {
        let h = harness();
        h.geo.upsert(1, ORIGIN);
        h.geo.upsert(2, north(150.0));
        h.geo.upsert(3, north(250.0));
        h.geo.upsert(4, north(900.0));

        let diff = h.engine.like_diff(&like(200, 300, 10)).unwrap();
        assert_eq!(diff.kept, vec![2]);
        assert_eq!(diff.joined, vec![3]);
        assert!(diff.left.is_empty());
        assert!(!diff.kept.contains(&1) && !diff.joined.contains(&1));
    }

    #[test]
    fn like_diff_with_equal_radius_keeps_everyone() {
        let h = harness();
        h.geo.upsert(1, ORIGIN);
        h.geo.upsert(2, north(50.0));
        h.geo.upsert(3, north(100.0));

        let diff = h.engine.like_diff(&like(200, 200, 3)).unwrap();
        assert_eq!(diff, AudienceDiff::unchanged(vec![2, 3]));
    }

    #[test]
    fn like_diff_is_empty_without_position_or_when_inactive() {
        let h = harness();
        let mut outcome = like(200, 300, 10);
        outcome.position = None;
        assert!(h.engine.like_diff(&outcome).is_none());

        let mut outcome = like(200, 300, 10);
        outcome.active = false;
        assert!(h.engine.like_diff(&outcome).is_none());
    }

    #[tokio::test]
    async fn liked_sends_on_to_joined_and_like_to_kept() {
        let h = harness();
        h.geo.upsert(1, ORIGIN);
        h.geo.upsert(2, north(150.0));
        h.geo.upsert(3, north(250.0));
        let mut rx2 = h.connect(2);
        let mut rx3 = h.connect(3);

        let report = h.engine.liked(&like(200, 300, 10)).await;
        assert_eq!(report.delivered, 2);

        assert_eq!(
            rx2.recv().await,
            Some(NotificationEvent::like(1, 100, 10, 300))
        );
        assert_eq!(
            rx3.recv().await,
            Some(NotificationEvent::on(1, TrackRef::bare(42)))
        );
    }

    #[tokio::test]
    async fn deliver_counts_missing_channels_and_self() {
        let h = harness();
        let mut rx = h.connect(2);

        let report = h
            .engine
            .deliver(1, &[1, 2, 3], NotificationEvent::off(1))
            .await;
        assert_eq!(
            report,
            DeliveryReport {
                delivered: 1,
                no_channel: 1,
                failed: 0,
                skipped_self: 1,
            }
        );
        assert_eq!(report.attempted(), 3);
        assert_eq!(rx.recv().await, Some(NotificationEvent::off(1)));
    }

    #[tokio::test]
    async fn failing_channel_is_deregistered_without_affecting_others() {
        let h = harness();
        let mut healthy = h.connect(2);
        h.registry.register(3, Arc::new(BrokenChannel));

        let report = h
            .engine
            .deliver(1, &[2, 3], NotificationEvent::off(1))
            .await;
        assert_eq!(report.delivered, 1);
        assert_eq!(report.failed, 1);
        assert!(h.registry.get(3).is_none());
        assert!(h.registry.get(2).is_some());
        assert_eq!(healthy.recv().await, Some(NotificationEvent::off(1)));
    }

    #[tokio::test(start_paused = true)]
    async fn full_channel_times_out_and_is_deregistered() {
        let h = harness();
        let (channel, _rx) = SsePushChannel::new(1, h.registry.child_token());
        let channel = Arc::new(channel);
        channel.push(NotificationEvent::off(9)).await.unwrap();
        h.registry.register(2, channel);

        let report = h
            .engine
            .deliver(1, &[2], NotificationEvent::off(1))
            .await;
        assert_eq!(report.failed, 1);
        assert!(h.registry.get(2).is_none());
    }

    #[tokio::test(start_paused = true)]
    async fn slow_newcomer_does_not_delay_kept_listeners() {
        let h = harness();
        h.geo.upsert(2, north(100.0));
        h.geo.upsert(3, north(250.0));
        let mut kept = h.connect(2);
        let (channel, _full) = SsePushChannel::new(1, h.registry.child_token());
        let channel = Arc::new(channel);
        channel.push(NotificationEvent::off(9)).await.unwrap();
        h.registry.register(3, channel);

        let start = tokio::time::Instant::now();
        let liked = like(200, 300, 10);
        let (report, (event, waited)) = tokio::join!(h.engine.liked(&liked), async {
            let event = kept.recv().await;
            (event, start.elapsed())
        });

        assert_eq!(event, Some(NotificationEvent::like(1, 100, 10, 300)));
        assert!(waited < Duration::from_millis(50), "kept listener waited {:?}", waited);
        assert_eq!(report.delivered, 1);
        assert_eq!(report.failed, 1);
        assert!(h.registry.get(3).is_none());
    }

    #[tokio::test]
    async fn turned_off_notifies_last_audience_and_closes_sender() {
        let h = harness();
        h.geo.upsert(2, north(100.0));
        let mut listener = h.connect(2);
        let sender_stream = h.connect(1);

        let report = h
            .engine
            .turned_off(&TurnOffOutcome {
                broadcast_id: 100,
                sender_id: 1,
                old_radius: 200,
                last_position: Some(ORIGIN),
                was_active: true,
            })
            .await;

        assert_eq!(report.delivered, 1);
        assert_eq!(listener.recv().await, Some(NotificationEvent::off(1)));
        assert!(h.registry.get(1).is_none());
        drop(sender_stream);
    }

    #[tokio::test]
    async fn relocated_notifies_only_audience_changes() {
        let h = harness();
        // 2 stays in range, 3 falls out, 4 comes into range.
        h.geo.upsert(2, north(100.0));
        h.geo.upsert(3, north(-150.0));
        h.geo.upsert(4, north(300.0));
        let mut rx2 = h.connect(2);
        let mut rx3 = h.connect(3);
        let mut rx4 = h.connect(4);

        let outcome = RelocateOutcome {
            sender_id: 1,
            old_position: Some(ORIGIN),
            new_position: north(150.0),
            radius_meter: 200,
            track: TrackRef::bare(42),
        };
        let report = h.engine.relocated(&outcome).await;

        assert_eq!(report.delivered, 2);
        assert_eq!(rx3.recv().await, Some(NotificationEvent::off(1)));
        assert_eq!(
            rx4.recv().await,
            Some(NotificationEvent::on(1, TrackRef::bare(42)))
        );
        assert!(rx2.try_recv().is_err());
    }
}
