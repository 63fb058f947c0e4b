//! Own profile, saved outfits, and the snapshot cache of other profiles.

use std::collections::HashMap;
use std::sync::Arc;

use serde::{Deserialize, Serialize};

use crate::cache::{push_json, CacheCell, KeySnapshot, StorageLayout, SubscriberId, WriteOp};
use crate::kv::{keys, KeyValue, StoreError};

/// One saved outfit. `shared_with` is duplicate-free in append order.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Outfit {
    pub id: String,
    pub name: String,
    #[serde(rename = "imageUrl")]
    pub image_uri: String,
    pub description: String,
    #[serde(rename = "createdAt")]
    pub created_at_ms: u64,
    pub is_public: bool,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub shared_with: Vec<String>,
}

impl Outfit {
    #[must_use]
    pub fn new(
        name: impl Into<String>,
        image_uri: impl Into<String>,
        description: impl Into<String>,
    ) -> Self {
        Self {
            id: crate::new_id(),
            name: name.into(),
            image_uri: image_uri.into(),
            description: description.into(),
            created_at_ms: crate::now_ms(),
            is_public: false,
            shared_with: Vec::new(),
        }
    }
}

/// A user's profile. The public-outfit count is derived from `saved_outfits`;
/// it is written out for readers of the persisted record but recomputed on
/// every load, so a stale stored count can never drift into memory.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(from = "ProfileRecordWire", into = "ProfileRecordWire")]
pub struct ProfileRecord {
    pub user_id: String,
    pub display_name: String,
    pub bio: String,
    pub profile_picture: Option<String>,
    pub saved_outfits: Vec<Outfit>,
    pub received_outfits: Vec<Outfit>,
}

impl ProfileRecord {
    #[must_use]
    pub fn new(user_id: impl Into<String>, display_name: impl Into<String>) -> Self {
        Self {
            user_id: user_id.into(),
            display_name: display_name.into(),
            ..Self::default()
        }
    }

    #[must_use]
    pub fn public_outfit_count(&self) -> usize {
        self.saved_outfits.iter().filter(|o| o.is_public).count()
    }
}

#[derive(Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ProfileRecordWire {
    user_id: String,
    display_name: String,
    bio: String,
    profile_picture: Option<String>,
    saved_outfits: Vec<Outfit>,
    public_outfit_count: usize,
    #[serde(default)]
    received_outfits: Vec<Outfit>,
}

impl From<ProfileRecordWire> for ProfileRecord {
    fn from(wire: ProfileRecordWire) -> Self {
        Self {
            user_id: wire.user_id,
            display_name: wire.display_name,
            bio: wire.bio,
            profile_picture: wire.profile_picture,
            saved_outfits: wire.saved_outfits,
            received_outfits: wire.received_outfits,
        }
    }
}

impl From<ProfileRecord> for ProfileRecordWire {
    fn from(record: ProfileRecord) -> Self {
        let public_outfit_count = record.public_outfit_count();
        Self {
            user_id: record.user_id,
            display_name: record.display_name,
            bio: record.bio,
            profile_picture: record.profile_picture,
            saved_outfits: record.saved_outfits,
            public_outfit_count,
            received_outfits: record.received_outfits,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ProfileState {
    pub my_profile: Option<ProfileRecord>,
    /// Snapshots of other users' profiles for cross-screen handoff. A cache
    /// of convenience, not a source of truth: no TTL, cleared only explicitly.
    pub cached_profiles: HashMap<String, ProfileRecord>,
}

const PROFILE_KEYS: [&str; 2] = [keys::USER_PROFILE, keys::PROFILES_CACHE];

struct ProfileLayout;

impl StorageLayout<ProfileState> for ProfileLayout {
    fn keys(&self) -> &[&'static str] {
        &PROFILE_KEYS
    }

    fn load(&self, snapshot: &KeySnapshot) -> ProfileState {
        ProfileState {
            my_profile: snapshot.json_or_default(keys::USER_PROFILE),
            cached_profiles: snapshot.json_or_default(keys::PROFILES_CACHE),
        }
    }

    fn writes(&self, previous: Option<&ProfileState>, value: &ProfileState) -> Vec<WriteOp> {
        let mut ops = Vec::new();
        if previous.map(|p| &p.my_profile) != Some(&value.my_profile) {
            match &value.my_profile {
                Some(profile) => push_json(&mut ops, keys::USER_PROFILE, profile),
                None => ops.push(WriteOp::Delete {
                    key: keys::USER_PROFILE,
                }),
            }
        }
        if previous.map(|p| &p.cached_profiles) != Some(&value.cached_profiles) {
            push_json(&mut ops, keys::PROFILES_CACHE, &value.cached_profiles);
        }
        ops
    }
}

pub struct ProfileCache {
    cell: CacheCell<ProfileState>,
}

impl ProfileCache {
    #[must_use]
    pub fn new(store: Arc<dyn KeyValue>) -> Self {
        Self {
            cell: CacheCell::new(store, ProfileLayout),
        }
    }

    pub async fn hydrate(&self) {
        self.cell.hydrate().await;
    }

    pub async fn flush(&self) {
        self.cell.flush().await;
    }

    #[must_use]
    pub fn state(&self) -> ProfileState {
        self.cell.get()
    }

    #[must_use]
    pub fn my_profile(&self) -> Option<ProfileRecord> {
        self.cell.get().my_profile
    }

    pub fn set_my_profile(&self, profile: ProfileRecord) {
        self.cell.set(|mut state| {
            state.my_profile = Some(profile);
            state
        });
    }

    /// Apply an edit to the loaded profile. Silently ignored when none is
    /// loaded; callers establish the profile via `set_my_profile` first.
    pub fn edit_my_profile(&self, edit: impl FnOnce(&mut ProfileRecord)) {
        if self.cell.get().my_profile.is_none() {
            return;
        }
        self.cell.set(|mut state| {
            if let Some(profile) = state.my_profile.as_mut() {
                edit(profile);
            }
            state
        });
    }

    pub fn add_outfit(&self, outfit: Outfit) {
        self.edit_my_profile(|profile| profile.saved_outfits.push(outfit));
    }

    pub fn remove_outfit(&self, outfit_id: &str) {
        self.edit_my_profile(|profile| profile.saved_outfits.retain(|o| o.id != outfit_id));
    }

    /// Edit a saved outfit in place; no-op when the id is unknown.
    pub fn edit_outfit(&self, outfit_id: &str, edit: impl FnOnce(&mut Outfit)) {
        self.edit_my_profile(|profile| {
            if let Some(outfit) = profile.saved_outfits.iter_mut().find(|o| o.id == outfit_id) {
                edit(outfit);
            }
        });
    }

    pub fn toggle_outfit_visibility(&self, outfit_id: &str) {
        self.edit_outfit(outfit_id, |outfit| outfit.is_public = !outfit.is_public);
    }

    /// Idempotent: sharing twice with the same friend leaves one entry.
    pub fn share_outfit_with_friend(&self, outfit_id: &str, friend_id: &str) {
        self.edit_outfit(outfit_id, |outfit| {
            if !outfit.shared_with.iter().any(|id| id == friend_id) {
                outfit.shared_with.push(friend_id.to_owned());
            }
        });
    }

    /// Record an outfit another user shared with us; duplicates by id are
    /// dropped.
    pub fn add_received_outfit(&self, outfit: Outfit) {
        self.edit_my_profile(|profile| {
            if !profile.received_outfits.iter().any(|o| o.id == outfit.id) {
                profile.received_outfits.push(outfit);
            }
        });
    }

    pub fn cache_profile(&self, user_id: &str, profile: ProfileRecord) {
        self.cell.set(|mut state| {
            state.cached_profiles.insert(user_id.to_owned(), profile);
            state
        });
    }

    #[must_use]
    pub fn cached_profile(&self, user_id: &str) -> Option<ProfileRecord> {
        self.cell.get().cached_profiles.get(user_id).cloned()
    }

    pub fn clear_cached_profile(&self, user_id: &str) {
        self.cell.set(|mut state| {
            state.cached_profiles.remove(user_id);
            state
        });
    }

    pub fn subscribe(&self, listener: impl FnMut(&ProfileState) + Send + 'static) -> SubscriberId {
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
