//! Event system for real-time client notification.
//!
//! This module provides:
//! - [`NotificationEvent`], the events pushed to a user's live stream
//! - [`PushChannel`] trait, the per-user delivery target
//! - [`SsePushChannel`], the bounded channel drained by the SSE endpoint
//!
//! Events carry their SSE event name; the JSON payload is the event body
//! without an envelope, so clients dispatch on the event name alone.

mod channel;

pub use channel::{PushChannel, SsePushChannel};

use serde::Serialize;

use crate::protocol_constants::{
    EVENT_BROADCAST_LIKE, EVENT_BROADCAST_OFF, EVENT_BROADCAST_ON, EVENT_INIT,
};
use crate::types::{BroadcastId, RadiusMeter, TrackRef, UserId};

/// Events pushed to connected clients.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(untagged)]
pub enum NotificationEvent {
    /// Stream handshake, sent once when the stream opens.
    Init,

    /// A broadcaster became visible to the recipient.
    BroadcastOn(BroadcastOnPayload),

    /// A broadcaster stopped being visible to the recipient.
    BroadcastOff(BroadcastOffPayload),

    /// A visible broadcaster's like count or radius changed.
    BroadcastLike(BroadcastLikePayload),
}

/// Body of a `broadcast.on` event.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct BroadcastOnPayload {
    pub sender_id: UserId,
    pub music: TrackRef,
}

/// Body of a `broadcast.off` event.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct BroadcastOffPayload {
    pub sender_id: UserId,
}

/// Body of a `broadcast.like` event.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct BroadcastLikePayload {
    pub sender_id: UserId,
    pub broadcast_id: BroadcastId,
    pub like_count: u32,
    pub radius_meter: RadiusMeter,
}

impl NotificationEvent {
    pub fn on(sender_id: UserId, music: TrackRef) -> Self {
        Self::BroadcastOn(BroadcastOnPayload { sender_id, music })
    }

    pub fn off(sender_id: UserId) -> Self {
        Self::BroadcastOff(BroadcastOffPayload { sender_id })
    }

    pub fn like(
        sender_id: UserId,
        broadcast_id: BroadcastId,
        like_count: u32,
        radius_meter: RadiusMeter,
    ) -> Self {
        Self::BroadcastLike(BroadcastLikePayload {
            sender_id,
            broadcast_id,
            like_count,
            radius_meter,
        })
    }

    /// SSE event name for this event.
    #[must_use]
    pub fn name(&self) -> &'static str {
        match self {
            Self::Init => EVENT_INIT,
            Self::BroadcastOn(_) => EVENT_BROADCAST_ON,
            Self::BroadcastOff(_) => EVENT_BROADCAST_OFF,
            Self::BroadcastLike(_) => EVENT_BROADCAST_LIKE,
        }
    }
}
