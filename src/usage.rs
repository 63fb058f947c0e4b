//! Generation metering, premium flag, and rating-prompt bookkeeping.
//!
//! Each field lives under its own key as a bare JSON scalar, so the persisted
//! forms stay the plain `"5"` / `"true"` strings already on disk.

use std::sync::Arc;

use crate::cache::{push_json, CacheCell, KeySnapshot, StorageLayout, SubscriberId, WriteOp};
use crate::kv::{keys, KeyValue, StoreError};

/// Free-tier ceiling on try-on generations.
pub const FREE_GENERATION_LIMIT: u32 = 50;

/// Successful saves before the store-review prompt fires (once, ever).
pub const RATING_PROMPT_THRESHOLD: u32 = 3;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct UsageState {
    pub generation_count: u32,
    pub is_premium: bool,
    pub successful_saves: u32,
    pub rating_requested: bool,
}

const USAGE_KEYS: [&str; 4] = [
    keys::USAGE_COUNT,
    keys::IS_PREMIUM,
    keys::SUCCESSFUL_SAVES,
    keys::RATING_REQUESTED,
];

struct UsageLayout;

impl StorageLayout<UsageState> for UsageLayout {
    fn keys(&self) -> &[&'static str] {
        &USAGE_KEYS
    }

    fn load(&self, snapshot: &KeySnapshot) -> UsageState {
        UsageState {
            generation_count: snapshot.json_or_default(keys::USAGE_COUNT),
            is_premium: snapshot.json_or_default(keys::IS_PREMIUM),
            successful_saves: snapshot.json_or_default(keys::SUCCESSFUL_SAVES),
            rating_requested: snapshot.json_or_default(keys::RATING_REQUESTED),
        }
    }

    fn writes(&self, previous: Option<&UsageState>, value: &UsageState) -> Vec<WriteOp> {
        let mut ops = Vec::new();
        if previous.map(|p| p.generation_count) != Some(value.generation_count) {
            push_json(&mut ops, keys::USAGE_COUNT, &value.generation_count);
        }
        if previous.map(|p| p.is_premium) != Some(value.is_premium) {
            push_json(&mut ops, keys::IS_PREMIUM, &value.is_premium);
        }
        if previous.map(|p| p.successful_saves) != Some(value.successful_saves) {
            push_json(&mut ops, keys::SUCCESSFUL_SAVES, &value.successful_saves);
        }
        if previous.map(|p| p.rating_requested) != Some(value.rating_requested) {
            push_json(&mut ops, keys::RATING_REQUESTED, &value.rating_requested);
        }
        ops
    }
}

pub struct UsageCache {
    cell: CacheCell<UsageState>,
}

impl UsageCache {
    #[must_use]
    pub fn new(store: Arc<dyn KeyValue>) -> Self {
        Self {
            cell: CacheCell::new(store, UsageLayout),
        }
    }

    pub async fn hydrate(&self) {
        self.cell.hydrate().await;
    }

    pub async fn flush(&self) {
        self.cell.flush().await;
    }

    #[must_use]
    pub fn state(&self) -> UsageState {
        self.cell.get()
    }

    /// Count a generation attempt; returns the new total.
    pub fn record_generation(&self) -> u32 {
        self.cell.set(|mut state| {
            state.generation_count = state.generation_count.saturating_add(1);
            state
        });
        self.cell.get().generation_count
    }

    /// Premium users generate freely; everyone else is capped.
    #[must_use]
    pub fn can_generate(&self) -> bool {
        let state = self.cell.get();
        state.is_premium || state.generation_count < FREE_GENERATION_LIMIT
    }

    #[must_use]
    pub fn remaining_free_generations(&self) -> u32 {
        FREE_GENERATION_LIMIT.saturating_sub(self.cell.get().generation_count)
    }

    pub fn set_premium(&self, premium: bool) {
        self.cell.set(|mut state| {
            state.is_premium = premium;
            state
        });
    }

    /// Count a successful save. Returns true exactly when the rating prompt
    /// should be shown: threshold reached and never asked before. Callers
    /// confirm the prompt actually ran via [`Self::mark_rating_requested`].
    pub fn record_successful_save(&self) -> bool {
        self.cell.set(|mut state| {
            state.successful_saves = state.successful_saves.saturating_add(1);
            state
        });
        let state = self.cell.get();
        !state.rating_requested && state.successful_saves >= RATING_PROMPT_THRESHOLD
    }

    pub fn mark_rating_requested(&self) {
        self.cell.set(|mut state| {
            state.rating_requested = true;
            state
        });
    }

    pub fn subscribe(&self, listener: impl FnMut(&UsageState) + Send + 'static) -> SubscriberId {
        self.cell.subscribe(listener)
    }

    pub fn unsubscribe(&self, id: SubscriberId) {
        self.cell.unsubscribe(id);
    }

    #[must_use]
    pub fn last_write_error(&self) -> Option<StoreError> {
        self.cell.last_write_error()
    }
}
