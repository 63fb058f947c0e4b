//! Durable key-value store boundary.
//!
//! Every cache in this crate persists through this trait: an async,
//! string-keyed, string-valued store that is crash-safe at single-key-write
//! granularity and offers no multi-key transactions. On device this is the
//! platform's app storage; in tests it is [`MemoryStore`].

use std::collections::HashMap;

use async_trait::async_trait;
use thiserror::Error;

/// Store keys. The exact strings are load-bearing: they must match what
/// already sits in users' on-device storage.
pub mod keys {
    pub const USER: &str = "user";
    pub const USERS: &str = "users";
    pub const USAGE_COUNT: &str = "usageCount";
    pub const IS_PREMIUM: &str = "isPremium";
    pub const SUCCESSFUL_SAVES: &str = "successful_saves_count";
    pub const RATING_REQUESTED: &str = "rating_requested";
    pub const GENERATION_HISTORY: &str = "generationHistory";
    pub const SAVED_BODY_MODELS: &str = "savedBodyModels";
    pub const BODY_IMAGE: &str = "body_image";
    pub const GARMENT_IMAGE: &str = "garment_image";
    pub const RESULT_IMAGE: &str = "result_image";
    pub const GARMENT_DESCRIPTION: &str = "garment_description";
    pub const CATEGORY: &str = "category";
    pub const USER_PROFILE: &str = "user_profile";
    pub const PROFILES_CACHE: &str = "profiles_cache";
    pub const FRIENDS: &str = "friends";
    pub const FRIEND_REQUESTS: &str = "friend_requests";
    pub const MESSAGES: &str = "messages";
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum StoreError {
    #[error("storage backend error: {0}")]
    Backend(String),

    #[error("storage unavailable: {0}")]
    Unavailable(String),
}

/// Async persistent store consumed by every cache.
#[async_trait]
pub trait KeyValue: Send + Sync {
    async fn get(&self, key: &str) -> Result<Option<String>, StoreError>;
    async fn set(&self, key: &str, value: &str) -> Result<(), StoreError>;
    async fn remove(&self, key: &str) -> Result<(), StoreError>;
}

/// In-memory store for tests and ephemeral sessions.
#[derive(Debug, Default)]
pub struct MemoryStore {
    entries: std::sync::Mutex<HashMap<String, String>>,
}

impl MemoryStore {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Snapshot of the raw entries, for assertions.
    #[must_use]
    pub fn dump(&self) -> HashMap<String, String> {
        crate::lock(&self.entries).clone()
    }
}

#[async_trait]
impl KeyValue for MemoryStore {
    async fn get(&self, key: &str) -> Result<Option<String>, StoreError> {
        Ok(crate::lock(&self.entries).get(key).cloned())
    }

    async fn set(&self, key: &str, value: &str) -> Result<(), StoreError> {
        crate::lock(&self.entries).insert(key.to_owned(), value.to_owned());
        Ok(())
    }

    async fn remove(&self, key: &str) -> Result<(), StoreError> {
        crate::lock(&self.entries).remove(key);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn memory_store_round_trip() {
        let store = MemoryStore::new();

        assert_eq!(store.get("missing").await.unwrap(), None);

        store.set("k", "v1").await.unwrap();
        assert_eq!(store.get("k").await.unwrap().as_deref(), Some("v1"));

        store.set("k", "v2").await.unwrap();
        assert_eq!(store.get("k").await.unwrap().as_deref(), Some("v2"));

        store.remove("k").await.unwrap();
        assert_eq!(store.get("k").await.unwrap(), None);
    }

    #[tokio::test]
    async fn remove_is_idempotent() {
        let store = MemoryStore::new();
        store.remove("never-written").await.unwrap();
        assert!(store.dump().is_empty());
    }
}
