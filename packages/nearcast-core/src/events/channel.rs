//! Per-user outbound push channels.

use async_trait::async_trait;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use super::NotificationEvent;
use crate::error::DeliveryError;

/// A user's live outbound channel.
///
/// `push` may wait while the channel is full; callers bound the wait with a
/// timeout. Implementations must be cheap to clone behind an `Arc`.
#[async_trait]
pub trait PushChannel: Send + Sync {
    /// Queues one event for the client.
    async fn push(&self, event: NotificationEvent) -> Result<(), DeliveryError>;

    /// Signals the consuming stream to complete.
    fn close(&self);

    /// Returns true once the channel can no longer deliver.
    fn is_closed(&self) -> bool;
}

/// Bounded mpsc sender drained by an SSE response stream.
///
/// The receiver half is handed to the stream; the cancellation token ends
/// the stream on explicit close or server shutdown.
pub struct SsePushChannel {
    tx: mpsc::Sender<NotificationEvent>,
    cancel: CancellationToken,
}

impl SsePushChannel {
    /// Creates a channel and returns it with the receiver the stream drains.
    ///
    /// `capacity` must be non-zero; [`DeliveryConfig::validate`](crate::state::DeliveryConfig::validate)
    /// enforces this at startup.
    pub fn new(
        capacity: usize,
        cancel: CancellationToken,
    ) -> (Self, mpsc::Receiver<NotificationEvent>) {
        let (tx, rx) = mpsc::channel(capacity);
        (Self { tx, cancel }, rx)
    }

    /// Token cancelled when this channel is closed.
    pub fn cancel_token(&self) -> &CancellationToken {
        &self.cancel
    }
}

#[async_trait]
impl PushChannel for SsePushChannel {
    async fn push(&self, event: NotificationEvent) -> Result<(), DeliveryError> {
        if self.cancel.is_cancelled() {
            return Err(DeliveryError::ChannelUnavailable);
        }
        self.tx
            .send(event)
            .await
            .map_err(|_| DeliveryError::ChannelUnavailable)
    }

    fn close(&self) {
        self.cancel.cancel();
    }

    fn is_closed(&self) -> bool {
        self.cancel.is_cancelled() || self.tx.is_closed()
    }
}
