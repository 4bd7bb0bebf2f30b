//! Registry of each user's single live push channel.
//!
//! - `ConnectionRegistry`: user id to current channel, last writer wins
//! - `RegistrationGuard`: RAII guard that removes the entry when a stream ends
//!
//! Every registration gets a connection id. Removal paths that originate
//! from a specific stream (teardown, delivery failure) go through
//! [`ConnectionRegistry::remove_if`], so a superseded stream can never
//! evict the connection that replaced it.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use dashmap::DashMap;
use parking_lot::RwLock;
use tokio_util::sync::CancellationToken;

use crate::events::PushChannel;
use crate::types::UserId;

/// Identifier of one registration.
pub type ConnectionId = u64;

struct Registration {
    connection_id: ConnectionId,
    channel: Arc<dyn PushChannel>,
}

/// Concurrent map of user id to live push channel.
pub struct ConnectionRegistry {
    connections: DashMap<UserId, Registration>,
    next_id: AtomicU64,
    /// Parent of every channel token; cancelled by [`close_all`](Self::close_all).
    global_cancel: RwLock<CancellationToken>,
}

impl ConnectionRegistry {
    pub fn new() -> Self {
        Self {
            connections: DashMap::new(),
            next_id: AtomicU64::new(1),
            global_cancel: RwLock::new(CancellationToken::new()),
        }
    }

    /// Returns a token for a new channel, cancelled on [`close_all`](Self::close_all).
    pub fn child_token(&self) -> CancellationToken {
        self.global_cancel.read().child_token()
    }

    /// Installs `channel` as the user's current connection.
    ///
    /// A previous channel is replaced but not closed; its stream ends when
    /// the client goes away or the sweeper finds it closed.
    pub fn register(&self, user_id: UserId, channel: Arc<dyn PushChannel>) -> ConnectionId {
        let connection_id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let replaced = self
            .connections
            .insert(
                user_id,
                Registration {
                    connection_id,
                    channel,
                },
            )
            .is_some();

        log::info!(
            "[Registry] User {} connected as #{}{} (total: {})",
            user_id,
            connection_id,
            if replaced { ", replacing previous" } else { "" },
            self.connections.len()
        );
        connection_id
    }

    /// Returns the user's current channel.
    #[must_use]
    pub fn get(&self, user_id: UserId) -> Option<(ConnectionId, Arc<dyn PushChannel>)> {
        self.connections
            .get(&user_id)
            .map(|r| (r.connection_id, Arc::clone(&r.channel)))
    }

    /// Removes the user's entry, whatever connection it holds.
    pub fn remove(&self, user_id: UserId) -> bool {
        self.connections.remove(&user_id).is_some()
    }

    /// Removes the user's entry only if it is still `connection_id`.
    pub fn remove_if(&self, user_id: UserId, connection_id: ConnectionId) -> bool {
        let removed = self
            .connections
            .remove_if(&user_id, |_, r| r.connection_id == connection_id)
            .is_some();
        if removed {
            log::debug!(
                "[Registry] Connection #{} of user {} removed (remaining: {})",
                connection_id,
                user_id,
                self.connections.len()
            );
        }
        removed
    }

    /// Removes the user's entry and tells its stream to complete.
    pub fn close(&self, user_id: UserId) -> bool {
        match self.connections.remove(&user_id) {
            Some((_, registration)) => {
                registration.channel.close();
                log::info!(
                    "[Registry] Closed connection #{} of user {}",
                    registration.connection_id,
                    user_id
                );
                true
            }
            None => false,
        }
    }

    /// Drops entries whose channel can no longer deliver.
    ///
    /// Returns the number of entries removed.
    pub fn sweep(&self) -> usize {
        let before = self.connections.len();
        self.connections.retain(|_, r| !r.channel.is_closed());
        let swept = before.saturating_sub(self.connections.len());
        if swept > 0 {
            log::info!(
                "[Registry] Swept {} closed connection(s) (remaining: {})",
                swept,
                self.connections.len()
            );
        }
        swept
    }

    /// Closes every live stream and clears the registry.
    ///
    /// A fresh parent token is installed so new connections are still accepted.
    pub fn close_all(&self) -> usize {
        let count = self.connections.len();
        {
            let mut guard = self.global_cancel.write();
            guard.cancel();
            *guard = CancellationToken::new();
        }
        self.connections.clear();
        if count > 0 {
            log::info!("[Registry] Force-closed {} connection(s)", count);
        }
        count
    }

    /// Number of registered users.
    #[must_use]
    pub fn size(&self) -> usize {
        self.connections.len()
    }
}

impl Default for ConnectionRegistry {
    fn default() -> Self {
        Self::new()
    }
}

/// Removes a registration when the owning stream is dropped.
pub struct RegistrationGuard {
    registry: Arc<ConnectionRegistry>,
    user_id: UserId,
    connection_id: ConnectionId,
}

impl RegistrationGuard {
    pub fn new(
        registry: Arc<ConnectionRegistry>,
        user_id: UserId,
        connection_id: ConnectionId,
    ) -> Self {
        Self {
            registry,
            user_id,
            connection_id,
        }
    }

    pub fn connection_id(&self) -> ConnectionId {
        self.connection_id
    }
}

impl Drop for RegistrationGuard {
    fn drop(&mut self) {
        self.registry.remove_if(self.user_id, self.connection_id);
    }
}
