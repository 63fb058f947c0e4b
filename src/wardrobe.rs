//! Generation history and saved body models.
//!
//! Entries reference images by local URI only; the files themselves belong to
//! the capture and generation collaborators.

use std::sync::Arc;

use serde::{Deserialize, Serialize};

use crate::cache::{push_json, CacheCell, KeySnapshot, StorageLayout, SubscriberId, WriteOp};
use crate::kv::{keys, KeyValue, StoreError};

/// One completed try-on, newest first in the history.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GeneratedImage {
    pub id: String,
    pub uri: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub thumbnail: Option<String>,
    pub title: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(rename = "createdAt")]
    pub created_at_ms: u64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub body_image_uri: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub garment_image_uri: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub prompt: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub model_info: Option<BodyModel>,
}

impl GeneratedImage {
    #[must_use]
    pub fn new(uri: impl Into<String>, title: impl Into<String>) -> Self {
        Self {
            id: crate::new_id(),
            uri: uri.into(),
            thumbnail: None,
            title: title.into(),
            description: None,
            created_at_ms: crate::now_ms(),
            body_image_uri: None,
            garment_image_uri: None,
            prompt: None,
            model_info: None,
        }
    }
}

/// A reusable body model. `settings` is an opaque blob owned by whoever
/// produced it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BodyModel {
    pub id: String,
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(default)]
    pub settings: serde_json::Value,
    #[serde(rename = "createdAt")]
    pub created_at_ms: u64,
}

impl BodyModel {
    #[must_use]
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            id: crate::new_id(),
            name: name.into(),
            description: None,
            settings: serde_json::Value::Null,
            created_at_ms: crate::now_ms(),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct WardrobeState {
    pub history: Vec<GeneratedImage>,
    pub models: Vec<BodyModel>,
}

const WARDROBE_KEYS: [&str; 2] = [keys::GENERATION_HISTORY, keys::SAVED_BODY_MODELS];

struct WardrobeLayout;

impl StorageLayout<WardrobeState> for WardrobeLayout {
    fn keys(&self) -> &[&'static str] {
        &WARDROBE_KEYS
    }

    fn load(&self, snapshot: &KeySnapshot) -> WardrobeState {
        WardrobeState {
            history: snapshot.json_or_default(keys::GENERATION_HISTORY),
            models: snapshot.json_or_default(keys::SAVED_BODY_MODELS),
        }
    }

    fn writes(&self, previous: Option<&WardrobeState>, value: &WardrobeState) -> Vec<WriteOp> {
        let mut ops = Vec::new();
        if previous.map(|p| &p.history) != Some(&value.history) {
            push_json(&mut ops, keys::GENERATION_HISTORY, &value.history);
        }
        if previous.map(|p| &p.models) != Some(&value.models) {
            push_json(&mut ops, keys::SAVED_BODY_MODELS, &value.models);
        }
        ops
    }
}

pub struct WardrobeCache {
    cell: CacheCell<WardrobeState>,
}

impl WardrobeCache {
    #[must_use]
    pub fn new(store: Arc<dyn KeyValue>) -> Self {
        Self {
            cell: CacheCell::new(store, WardrobeLayout),
        }
    }

    pub async fn hydrate(&self) {
        self.cell.hydrate().await;
    }

    pub async fn flush(&self) {
        self.cell.flush().await;
    }

    #[must_use]
    pub fn history(&self) -> Vec<GeneratedImage> {
        self.cell.get().history
    }

    #[must_use]
    pub fn models(&self) -> Vec<BodyModel> {
        self.cell.get().models
    }

    /// Upsert by id; a new entry goes to the front (newest first).
    pub fn record_generation(&self, image: GeneratedImage) {
        self.cell.set(|mut state| {
            if let Some(existing) = state.history.iter_mut().find(|g| g.id == image.id) {
                *existing = image;
            } else {
                state.history.insert(0, image);
            }
            state
        });
    }

    pub fn remove_generation(&self, id: &str) {
        self.cell.set(|mut state| {
            state.history.retain(|g| g.id != id);
            state
        });
    }

    /// Upsert by id; a new model appends in save order.
    pub fn save_model(&self, model: BodyModel) {
        self.cell.set(|mut state| {
            if let Some(existing) = state.models.iter_mut().find(|m| m.id == model.id) {
                *existing = model;
            } else {
                state.models.push(model);
            }
            state
        });
    }

    pub fn remove_model(&self, id: &str) {
        self.cell.set(|mut state| {
            state.models.retain(|m| m.id != id);
            state
        });
    }

    pub fn subscribe(&self, listener: impl FnMut(&WardrobeState) + Send + 'static) -> SubscriberId {
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

#[cfg(test)]
mod tests {
    use super::*;
    use crate::kv::MemoryStore;

    fn generated(id: &str, title: &str) -> GeneratedImage {
        GeneratedImage {
            id: id.into(),
            created_at_ms: 1,
            ..GeneratedImage::new(format!("file:///gen/{id}.jpg"), title)
        }
    }

    fn cache() -> WardrobeCache {
        WardrobeCache::new(Arc::new(MemoryStore::new()) as Arc<dyn KeyValue>)
    }

    #[tokio::test]
    async fn new_generations_go_to_the_front() {
        let cache = cache();
        cache.record_generation(generated("g1", "first"));
        cache.record_generation(generated("g2", "second"));

        let history = cache.history();
        assert_eq!(history[0].id, "g2");
        assert_eq!(history[1].id, "g1");
    }

    #[tokio::test]
    async fn recording_an_existing_id_updates_in_place() {
        let cache = cache();
        cache.record_generation(generated("g1", "first"));
        cache.record_generation(generated("g2", "second"));
        cache.record_generation(generated("g1", "renamed"));

        let history = cache.history();
        assert_eq!(history.len(), 2);
        assert_eq!(history[1].title, "renamed");
    }

    #[tokio::test]
    async fn remove_generation_by_id() {
        let cache = cache();
        cache.record_generation(generated("g1", "t"));
        cache.remove_generation("g1");
        assert!(cache.history().is_empty());
    }

    #[tokio::test]
    async fn models_upsert_in_save_order() {
        let cache = cache();
        let mut model = BodyModel::new("studio");
        model.id = "m1".into();
        cache.save_model(model.clone());

        model.name = "studio v2".into();
        cache.save_model(model);

        let models = cache.models();
        assert_eq!(models.len(), 1);
        assert_eq!(models[0].name, "studio v2");
    }

    #[tokio::test]
    async fn history_round_trips_through_the_store() {
        let store = Arc::new(MemoryStore::new());
        let cache = WardrobeCache::new(Arc::clone(&store) as Arc<dyn KeyValue>);

        let mut image = generated("g1", "look");
        image.prompt = Some("summer outfit".into());
        image.model_info = Some(BodyModel {
            settings: serde_json::json!({"pose": "standing"}),
            ..BodyModel::new("studio")
        });
        cache.record_generation(image);
        cache.flush().await;

        let restarted = WardrobeCache::new(Arc::clone(&store) as Arc<dyn KeyValue>);
        restarted.hydrate().await;

        assert_eq!(restarted.history(), cache.history());
        assert_eq!(
            restarted.history()[0].model_info.as_ref().unwrap().settings["pose"],
            "standing"
        );
    }
}
