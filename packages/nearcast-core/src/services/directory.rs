//! User directory contract used to decorate nearby results.

use async_trait::async_trait;
use dashmap::DashMap;

use crate::types::UserId;

/// Read-only view of user profiles.
#[async_trait]
pub trait UserDirectory: Send + Sync {
    async fn nickname(&self, user_id: UserId) -> Option<String>;
}

/// Directory held in memory, filled by the embedding application.
#[derive(Default)]
pub struct InMemoryUserDirectory {
    nicknames: DashMap<UserId, String>,
}

impl InMemoryUserDirectory {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set_nickname(&self, user_id: UserId, nickname: impl Into<String>) {
        self.nicknames.insert(user_id, nickname.into());
    }
}

#[async_trait]
impl UserDirectory for InMemoryUserDirectory {
    async fn nickname(&self, user_id: UserId) -> Option<String> {
        self.nicknames.get(&user_id).map(|r| r.value().clone())
    }
}
