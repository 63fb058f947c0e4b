//! Try-on photo pipeline scratch state.
//!
//! Image fields are opaque local file URIs; the cache never owns the files
//! they point at. Each field persists under its own key as a raw string (no
//! JSON quoting), matching what the app has always written: unset images and
//! empty text clear their key instead of storing a marker.

use std::sync::Arc;

use crate::cache::{CacheCell, KeySnapshot, StorageLayout, SubscriberId, WriteOp};
use crate::kv::{keys, KeyValue, StoreError};

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PhotoState {
    pub body_image: Option<String>,
    pub garment_image: Option<String>,
    pub result_image: Option<String>,
    pub garment_description: String,
    pub category: String,
}

const PHOTO_KEYS: [&str; 5] = [
    keys::BODY_IMAGE,
    keys::GARMENT_IMAGE,
    keys::RESULT_IMAGE,
    keys::GARMENT_DESCRIPTION,
    keys::CATEGORY,
];

struct PhotoLayout;

impl StorageLayout<PhotoState> for PhotoLayout {
    fn keys(&self) -> &[&'static str] {
        &PHOTO_KEYS
    }

    fn load(&self, snapshot: &KeySnapshot) -> PhotoState {
        PhotoState {
            body_image: snapshot.raw(keys::BODY_IMAGE).map(str::to_owned),
            garment_image: snapshot.raw(keys::GARMENT_IMAGE).map(str::to_owned),
            result_image: snapshot.raw(keys::RESULT_IMAGE).map(str::to_owned),
            garment_description: snapshot
                .raw(keys::GARMENT_DESCRIPTION)
                .unwrap_or_default()
                .to_owned(),
            category: snapshot.raw(keys::CATEGORY).unwrap_or_default().to_owned(),
        }
    }

    fn writes(&self, previous: Option<&PhotoState>, value: &PhotoState) -> Vec<WriteOp> {
        let mut ops = Vec::new();
        image_field(
            &mut ops,
            keys::BODY_IMAGE,
            previous.map(|p| &p.body_image),
            &value.body_image,
        );
        image_field(
            &mut ops,
            keys::GARMENT_IMAGE,
            previous.map(|p| &p.garment_image),
            &value.garment_image,
        );
        image_field(
            &mut ops,
            keys::RESULT_IMAGE,
            previous.map(|p| &p.result_image),
            &value.result_image,
        );
        text_field(
            &mut ops,
            keys::GARMENT_DESCRIPTION,
            previous.map(|p| p.garment_description.as_str()),
            &value.garment_description,
        );
        text_field(
            &mut ops,
            keys::CATEGORY,
            previous.map(|p| p.category.as_str()),
            &value.category,
        );
        ops
    }
}

fn image_field(
    ops: &mut Vec<WriteOp>,
    key: &'static str,
    previous: Option<&Option<String>>,
    value: &Option<String>,
) {
    if previous.is_some_and(|p| p == value) {
        return;
    }
    match value {
        Some(uri) => ops.push(WriteOp::Put {
            key,
            value: uri.clone(),
        }),
        None => ops.push(WriteOp::Delete { key }),
    }
}

fn text_field(ops: &mut Vec<WriteOp>, key: &'static str, previous: Option<&str>, value: &str) {
    if previous.is_some_and(|p| p == value) {
        return;
    }
    if value.is_empty() {
        ops.push(WriteOp::Delete { key });
    } else {
        ops.push(WriteOp::Put {
            key,
            value: value.to_owned(),
        });
    }
}

pub struct PhotoCache {
    cell: CacheCell<PhotoState>,
}

impl PhotoCache {
    #[must_use]
    pub fn new(store: Arc<dyn KeyValue>) -> Self {
        Self {
            cell: CacheCell::new(store, PhotoLayout),
        }
    }

    pub async fn hydrate(&self) {
        self.cell.hydrate().await;
    }

    pub async fn flush(&self) {
        self.cell.flush().await;
    }

    #[must_use]
    pub fn state(&self) -> PhotoState {
        self.cell.get()
    }

    pub fn set_body_image(&self, uri: Option<String>) {
        self.cell.set(|mut state| {
            state.body_image = uri;
            state
        });
    }

    pub fn set_garment_image(&self, uri: Option<String>) {
        self.cell.set(|mut state| {
            state.garment_image = uri;
            state
        });
    }

    pub fn set_result_image(&self, uri: Option<String>) {
        self.cell.set(|mut state| {
            state.result_image = uri;
            state
        });
    }

    pub fn set_garment_description(&self, description: impl Into<String>) {
        let description = description.into();
        self.cell.set(|mut state| {
            state.garment_description = description;
            state
        });
    }

    pub fn set_category(&self, category: impl Into<String>) {
        let category = category.into();
        self.cell.set(|mut state| {
            state.category = category;
            state
        });
    }

    /// Clear the whole pipeline in one transition: subscribers observe a
    /// single change and the storage batch is enqueued as one unit.
    pub fn reset(&self) {
        self.cell.set(|_| PhotoState::default());
    }

    pub fn subscribe(&self, listener: impl FnMut(&PhotoState) + Send + 'static) -> SubscriberId {
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
