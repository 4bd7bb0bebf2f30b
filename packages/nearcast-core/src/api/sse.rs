//! Server-sent event stream for a user's notifications.

use std::convert::Infallible;
use std::sync::Arc;

use axum::extract::State;
use axum::response::sse::{Event, KeepAlive, Sse};
use futures::Stream;

use crate::api::auth::AuthUser;
use crate::api::AppState;
use crate::events::{NotificationEvent, SsePushChannel};
use crate::protocol_constants::EVENT_INIT_DATA;
use crate::services::connection_registry::RegistrationGuard;

/// Encodes one notification as an SSE frame.
pub fn encode_event(event: &NotificationEvent) -> Result<Event, serde_json::Error> {
    let frame = Event::default().event(event.name());
    match event {
        NotificationEvent::Init => Ok(frame.data(EVENT_INIT_DATA)),
        other => Ok(frame.data(serde_json::to_string(other)?)),
    }
}

/// GET /api/sse/stream
///
/// Registers the caller's live channel, replacing any previous one, and
/// sends `init` before anything else. The registration is removed when the
/// stream is dropped, unless a newer connection has replaced it.
pub async fn subscribe(
    State(state): State<AppState>,
    AuthUser(user_id): AuthUser,
) -> Sse<impl Stream<Item = Result<Event, Infallible>>> {
    let delivery = &state.config.delivery;
    let (channel, mut rx) =
        SsePushChannel::new(delivery.channel_capacity, state.registry.child_token());
    let cancel = channel.cancel_token().clone();
    let connection_id = state.registry.register(user_id, Arc::new(channel));
    let guard = RegistrationGuard::new(Arc::clone(&state.registry), user_id, connection_id);

    let stream = async_stream::stream! {
        let _guard = guard;
        if let Ok(init) = encode_event(&NotificationEvent::Init) {
            yield Ok(init);
        }

        loop {
            let next = tokio::select! {
                _ = cancel.cancelled() => None,
                event = rx.recv() => event,
            };
            let Some(event) = next else {
                break;
            };
            match encode_event(&event) {
                Ok(frame) => yield Ok(frame),
                Err(e) => log::warn!("[SSE] Failed to encode {} for user {}: {}", event.name(), user_id, e),
            }
        }
        log::debug!("[SSE] Stream #{} for user {} ended", connection_id, user_id);
    };

    Sse::new(stream).keep_alive(KeepAlive::new().interval(delivery.keepalive()))
}
