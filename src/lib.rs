#![forbid(unsafe_code)]
#![deny(clippy::all)]
#![warn(clippy::pedantic)]
#![allow(clippy::module_name_repetitions)]

//! Shared state core for the try-on app.
//!
//! Every screen reads from and mutates a small set of write-through reactive
//! caches: in-memory values that notify subscribers synchronously and mirror
//! themselves to a durable key-value store in the background. Startup
//! hydrates each cache from the store before the first render.

pub mod cache;
pub mod generation;
pub mod kv;
pub mod photo;
pub mod profile;
pub mod session;
pub mod social;
#[cfg(not(target_arch = "wasm32"))]
pub mod sqlite;
pub mod usage;
pub mod wardrobe;

use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

pub use cache::{CacheCell, JsonRecord, KeySnapshot, StorageLayout, SubscriberId, WriteOp};
pub use generation::{
    GenerationError, InlineImage, TryOnOutcome, TryOnRequest, TryOnService, TRY_ON_PROMPT,
};
pub use kv::{keys, KeyValue, MemoryStore, StoreError};
pub use photo::{PhotoCache, PhotoState};
pub use profile::{Outfit, ProfileCache, ProfileRecord, ProfileState};
pub use session::{login, register, AuthError, Session, SessionCache, StoredCredentials};
pub use social::{Friend, FriendRequest, Message, SocialCache, SocialState};
#[cfg(not(target_arch = "wasm32"))]
pub use sqlite::SqliteStore;
pub use usage::{UsageCache, UsageState, FREE_GENERATION_LIMIT, RATING_PROMPT_THRESHOLD};
pub use wardrobe::{BodyModel, GeneratedImage, WardrobeCache, WardrobeState};

/// Recover the guard even if a panicking thread poisoned the lock; the
/// protected state is a plain value and stays valid.
pub(crate) fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

#[must_use]
pub fn now_ms() -> u64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or(0)
}

#[must_use]
pub fn new_id() -> String {
    uuid::Uuid::new_v4().to_string()
}

/// Every cache, built over one shared store. Constructed once at process
/// start and handed to consumers; tests build one over a [`MemoryStore`].
pub struct Caches {
    pub session: SessionCache,
    pub photo: PhotoCache,
    pub profile: ProfileCache,
    pub social: SocialCache,
    pub wardrobe: WardrobeCache,
    pub usage: UsageCache,
}

impl Caches {
    /// Must be called within a tokio runtime; each cache spawns its writer
    /// task here.
    #[must_use]
    pub fn new(store: Arc<dyn KeyValue>) -> Self {
        Self {
            session: SessionCache::new(Arc::clone(&store)),
            photo: PhotoCache::new(Arc::clone(&store)),
            profile: ProfileCache::new(Arc::clone(&store)),
            social: SocialCache::new(Arc::clone(&store)),
            wardrobe: WardrobeCache::new(Arc::clone(&store)),
            usage: UsageCache::new(store),
        }
    }

    /// Load every cache from storage. Call once at app launch, before the
    /// first meaningful read.
    pub async fn hydrate_all(&self) {
        self.session.hydrate().await;
        self.photo.hydrate().await;
        self.profile.hydrate().await;
        self.social.hydrate().await;
        self.wardrobe.hydrate().await;
        self.usage.hydrate().await;
    }

    /// Drain every pending write. A shutdown/test aid.
    pub async fn flush_all(&self) {
        self.session.flush().await;
        self.photo.flush().await;
        self.profile.flush().await;
        self.social.flush().await;
        self.wardrobe.flush().await;
        self.usage.flush().await;
    }
}
