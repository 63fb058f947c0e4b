//! Write-through reactive state container.
//!
//! One [`CacheCell`] owns one in-memory value. Reads and mutations are
//! synchronous; every mutation notifies subscribers in registration order and
//! enqueues a storage batch on a writer task that applies batches in enqueue
//! order. Hydration rebuilds the value from storage, substituting the type
//! default for anything missing or malformed.
//!
//! Persistence is best-effort by design: a failed write never rolls back the
//! in-memory value and never reaches the caller. Failures are logged and the
//! most recent one is observable through [`CacheCell::last_write_error`].

use std::collections::HashMap;
use std::marker::PhantomData;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};

use serde::de::DeserializeOwned;
use serde::Serialize;
use tokio::sync::{mpsc, oneshot, watch};

use crate::kv::{KeyValue, StoreError};
use crate::lock;

/// A single store write produced by a layout.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WriteOp {
    Put { key: &'static str, value: String },
    Delete { key: &'static str },
}

impl WriteOp {
    #[must_use]
    pub const fn key(&self) -> &'static str {
        match self {
            Self::Put { key, .. } | Self::Delete { key } => key,
        }
    }
}

/// Serialize `value` as a JSON write, or log and skip.
pub(crate) fn push_json<T: Serialize>(ops: &mut Vec<WriteOp>, key: &'static str, value: &T) {
    match serde_json::to_string(value) {
        Ok(json) => ops.push(WriteOp::Put { key, value: json }),
        Err(err) => tracing::warn!(key, error = %err, "serialization failed, skipping write"),
    }
}

/// Raw view of the keys a cache occupies, prefetched for hydration.
pub struct KeySnapshot {
    entries: HashMap<&'static str, String>,
}

impl KeySnapshot {
    pub(crate) async fn fetch(store: &dyn KeyValue, keys: &[&'static str]) -> Self {
        let mut entries = HashMap::new();
        for key in keys {
            match store.get(key).await {
                Ok(Some(value)) => {
                    entries.insert(*key, value);
                }
                Ok(None) => {}
                Err(err) => {
                    tracing::warn!(key, error = %err, "hydration read failed, treating key as absent");
                }
            }
        }
        Self { entries }
    }

    #[must_use]
    pub fn raw(&self, key: &str) -> Option<&str> {
        self.entries.get(key).map(String::as_str)
    }

    /// Parse a JSON record, falling back to the type default when the key is
    /// absent or its contents don't parse.
    #[must_use]
    pub fn json_or_default<T: Default + DeserializeOwned>(&self, key: &str) -> T {
        match self.entries.get(key) {
            None => T::default(),
            Some(raw) => serde_json::from_str(raw).unwrap_or_else(|err| {
                tracing::warn!(key, error = %err, "discarding malformed record");
                T::default()
            }),
        }
    }
}

/// Maps a cache value onto its store keys.
///
/// Multi-key caches project each part of the value onto its own key; `writes`
/// receives the pre-mutation value so layouts emit ops only for keys whose
/// projection actually changed.
pub trait StorageLayout<T>: Send + Sync + 'static {
    /// Every key this cache occupies.
    fn keys(&self) -> &[&'static str];

    /// Rebuild the value from a key snapshot, defaulting whatever is missing.
    fn load(&self, snapshot: &KeySnapshot) -> T;

    /// Writes needed to bring storage in line with `value`. `previous` is
    /// `None` only when no prior value is available for diffing.
    fn writes(&self, previous: Option<&T>, value: &T) -> Vec<WriteOp>;
}

/// Layout for caches stored as one JSON record under one key.
pub struct JsonRecord<T> {
    keys: [&'static str; 1],
    _marker: PhantomData<fn() -> T>,
}

impl<T> JsonRecord<T> {
    #[must_use]
    pub const fn new(key: &'static str) -> Self {
        Self {
            keys: [key],
            _marker: PhantomData,
        }
    }

    const fn key(&self) -> &'static str {
        self.keys[0]
    }
}

impl<T> StorageLayout<T> for JsonRecord<T>
where
    T: Default + Clone + PartialEq + Serialize + DeserializeOwned + Send + Sync + 'static,
{
    fn keys(&self) -> &[&'static str] {
        &self.keys
    }

    fn load(&self, snapshot: &KeySnapshot) -> T {
        snapshot.json_or_default(self.key())
    }

    fn writes(&self, previous: Option<&T>, value: &T) -> Vec<WriteOp> {
        if previous.is_some_and(|p| p == value) {
            return Vec::new();
        }
        let mut ops = Vec::new();
        push_json(&mut ops, self.key(), value);
        ops
    }
}

/// Handle returned by [`CacheCell::subscribe`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SubscriberId(u64);

type Subscriber<T> = Box<dyn FnMut(&T) + Send>;

enum Command {
    Apply(Vec<WriteOp>),
    Flush(oneshot::Sender<()>),
}

/// Generic write-through reactive container.
pub struct CacheCell<T> {
    value: Mutex<T>,
    subscribers: Mutex<Vec<(SubscriberId, Subscriber<T>)>>,
    next_subscriber: AtomicU64,
    layout: Box<dyn StorageLayout<T>>,
    store: Arc<dyn KeyValue>,
    writer: mpsc::UnboundedSender<Command>,
    write_error: watch::Receiver<Option<StoreError>>,
}

impl<T: Clone + Default + Send + 'static> CacheCell<T> {
    /// Spawns the writer task; must be called within a tokio runtime.
    #[must_use]
    pub fn new(store: Arc<dyn KeyValue>, layout: impl StorageLayout<T>) -> Self {
        let (writer, commands) = mpsc::unbounded_channel();
        let (err_tx, err_rx) = watch::channel(None);
        tokio::spawn(run_writer(Arc::clone(&store), commands, err_tx));
        Self {
            value: Mutex::new(T::default()),
            subscribers: Mutex::new(Vec::new()),
            next_subscriber: AtomicU64::new(0),
            layout: Box::new(layout),
            store,
            writer,
            write_error: err_rx,
        }
    }

    /// Current in-memory value. Never blocks on I/O, never fails.
    #[must_use]
    pub fn get(&self) -> T {
        lock(&self.value).clone()
    }

    /// Replace the value with `updater` applied to the current value, notify
    /// subscribers with the result, then enqueue the write-through batch.
    pub fn set(&self, updater: impl FnOnce(T) -> T) {
        let (previous, next) = {
            let mut value = lock(&self.value);
            let previous = value.clone();
            *value = updater(previous.clone());
            (previous, value.clone())
        };
        self.notify(&next);
        self.enqueue(self.layout.writes(Some(&previous), &next));
    }

    /// Register a listener invoked synchronously, in registration order, after
    /// every mutation and hydration. The listener always observes the value it
    /// was notified for, never a stale one.
    pub fn subscribe(&self, listener: impl FnMut(&T) + Send + 'static) -> SubscriberId {
        let id = SubscriberId(self.next_subscriber.fetch_add(1, Ordering::Relaxed));
        lock(&self.subscribers).push((id, Box::new(listener)));
        id
    }

    pub fn unsubscribe(&self, id: SubscriberId) {
        lock(&self.subscribers).retain(|(subscriber, _)| *subscriber != id);
    }

    /// Rebuild the value from storage, substituting defaults for missing or
    /// malformed data, then notify subscribers. Never fails. Calling it again
    /// re-hydrates; a `set` racing a hydrate is last-finisher-wins.
    pub async fn hydrate(&self) {
        let snapshot = KeySnapshot::fetch(self.store.as_ref(), self.layout.keys()).await;
        let next = {
            let mut value = lock(&self.value);
            *value = self.layout.load(&snapshot);
            value.clone()
        };
        self.notify(&next);
    }

    /// Wait until every write enqueued so far has been applied to the store.
    /// A shutdown/test aid, not part of the mutation path.
    pub async fn flush(&self) {
        let (ack, done) = oneshot::channel();
        if self.writer.send(Command::Flush(ack)).is_ok() {
            let _ = done.await;
        }
    }

    /// Most recent write-through failure, if any. Failed writes keep the
    /// in-memory value; this slot exists so tests and diagnostics can observe
    /// the swallowed error.
    #[must_use]
    pub fn last_write_error(&self) -> Option<StoreError> {
        self.write_error.borrow().clone()
    }

    fn notify(&self, value: &T) {
        let mut subscribers = lock(&self.subscribers);
        for (_, listener) in subscribers.iter_mut() {
            listener(value);
        }
    }

    fn enqueue(&self, ops: Vec<WriteOp>) {
        if ops.is_empty() {
            return;
        }
        // Send fails only after runtime shutdown, which also drops the store.
        let _ = self.writer.send(Command::Apply(ops));
    }
}

async fn run_writer(
    store: Arc<dyn KeyValue>,
    mut commands: mpsc::UnboundedReceiver<Command>,
    errors: watch::Sender<Option<StoreError>>,
) {
    while let Some(command) = commands.recv().await {
        match command {
            Command::Apply(ops) => {
                for op in ops {
                    let outcome = match &op {
                        WriteOp::Put { key, value } => store.set(key, value).await,
                        WriteOp::Delete { key } => store.remove(key).await,
                    };
                    if let Err(err) = outcome {
                        tracing::warn!(
                            key = op.key(),
                            error = %err,
                            "write-through failed, keeping in-memory value"
                        );
                        let _ = errors.send(Some(err));
                    }
                }
            }
            Command::Flush(ack) => {
                let _ = ack.send(());
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::kv::MemoryStore;
    use async_trait::async_trait;
    use serde::Deserialize;

    #[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
    struct Counter {
        count: i64,
        label: String,
    }

    fn cell(store: Arc<dyn KeyValue>) -> CacheCell<Counter> {
        CacheCell::new(store, JsonRecord::new("counter"))
    }

    #[tokio::test]
    async fn get_after_sets_equals_fold_of_updaters() {
        let store: Arc<dyn KeyValue> = Arc::new(MemoryStore::new());
        let cell = cell(store);

        cell.set(|mut c| {
            c.count += 1;
            c
        });
        cell.set(|mut c| {
            c.count *= 10;
            c
        });
        cell.set(|mut c| {
            c.label = format!("n={}", c.count);
            c
        });

        let expected = Counter {
            count: 10,
            label: "n=10".into(),
        };
        assert_eq!(cell.get(), expected);
    }

    #[tokio::test]
    async fn subscribers_run_in_registration_order_and_see_new_value() {
        let store: Arc<dyn KeyValue> = Arc::new(MemoryStore::new());
        let cell = cell(store);

        let seen = Arc::new(Mutex::new(Vec::new()));

        let first = Arc::clone(&seen);
        cell.subscribe(move |c: &Counter| lock(&first).push(("first", c.count)));
        let second = Arc::clone(&seen);
        cell.subscribe(move |c: &Counter| lock(&second).push(("second", c.count)));

        cell.set(|mut c| {
            c.count = 7;
            c
        });

        assert_eq!(*lock(&seen), vec![("first", 7), ("second", 7)]);
    }

    #[tokio::test]
    async fn unsubscribe_stops_notifications() {
        let store: Arc<dyn KeyValue> = Arc::new(MemoryStore::new());
        let cell = cell(store);

        let calls = Arc::new(Mutex::new(0u32));
        let counter = Arc::clone(&calls);
        let id = cell.subscribe(move |_: &Counter| *lock(&counter) += 1);

        cell.set(|c| c);
        cell.unsubscribe(id);
        cell.set(|c| c);

        assert_eq!(*lock(&calls), 1);
    }

    #[tokio::test]
    async fn writes_reach_the_store_in_mutation_order() {
        let store = Arc::new(MemoryStore::new());
        let cell = cell(Arc::clone(&store) as Arc<dyn KeyValue>);

        for n in 1..=5 {
            cell.set(move |mut c| {
                c.count = n;
                c
            });
        }
        cell.flush().await;

        let raw = store.dump().remove("counter").expect("record written");
        let persisted: Counter = serde_json::from_str(&raw).unwrap();
        assert_eq!(persisted.count, 5);
    }

    #[tokio::test]
    async fn hydrate_from_empty_store_yields_default() {
        let store: Arc<dyn KeyValue> = Arc::new(MemoryStore::new());
        let cell = cell(store);

        cell.hydrate().await;
        assert_eq!(cell.get(), Counter::default());
    }

    #[tokio::test]
    async fn hydrate_ignores_malformed_record() {
        let store = Arc::new(MemoryStore::new());
        store.set("counter", "{not json").await.unwrap();

        let cell = cell(Arc::clone(&store) as Arc<dyn KeyValue>);
        cell.hydrate().await;
        assert_eq!(cell.get(), Counter::default());
    }

    #[tokio::test]
    async fn hydrate_replaces_value_and_notifies() {
        let store = Arc::new(MemoryStore::new());
        store
            .set("counter", r#"{"count":42,"label":"persisted"}"#)
            .await
            .unwrap();

        let cell = cell(Arc::clone(&store) as Arc<dyn KeyValue>);
        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&seen);
        cell.subscribe(move |c: &Counter| lock(&sink).push(c.count));

        cell.hydrate().await;

        assert_eq!(cell.get().count, 42);
        assert_eq!(*lock(&seen), vec![42]);
    }

    #[tokio::test]
    async fn set_before_hydrate_does_not_crash() {
        let store: Arc<dyn KeyValue> = Arc::new(MemoryStore::new());
        let cell = cell(store);

        cell.set(|mut c| {
            c.count = 1;
            c
        });
        cell.hydrate().await;

        // Empty store: hydration lands on the default, last finisher wins.
        assert_eq!(cell.get(), Counter::default());
    }

    #[tokio::test]
    async fn unchanged_value_writes_nothing() {
        let store = Arc::new(MemoryStore::new());
        let cell = cell(Arc::clone(&store) as Arc<dyn KeyValue>);

        cell.set(|c| c);
        cell.flush().await;

        assert!(store.dump().is_empty());
    }

    struct FailingStore;

    #[async_trait]
    impl KeyValue for FailingStore {
        async fn get(&self, _key: &str) -> Result<Option<String>, StoreError> {
            Err(StoreError::Unavailable("disk gone".into()))
        }

        async fn set(&self, _key: &str, _value: &str) -> Result<(), StoreError> {
            Err(StoreError::Unavailable("disk gone".into()))
        }

        async fn remove(&self, _key: &str) -> Result<(), StoreError> {
            Err(StoreError::Unavailable("disk gone".into()))
        }
    }

    #[tokio::test]
    async fn write_failure_keeps_memory_and_is_observable() {
        let cell: CacheCell<Counter> =
            CacheCell::new(Arc::new(FailingStore), JsonRecord::new("counter"));

        cell.set(|mut c| {
            c.count = 9;
            c
        });
        cell.flush().await;

        assert_eq!(cell.get().count, 9);
        assert_eq!(
            cell.last_write_error(),
            Some(StoreError::Unavailable("disk gone".into()))
        );
    }

    #[tokio::test]
    async fn hydrate_survives_store_read_failure() {
        let cell: CacheCell<Counter> =
            CacheCell::new(Arc::new(FailingStore), JsonRecord::new("counter"));

        cell.hydrate().await;
        assert_eq!(cell.get(), Counter::default());
    }
}
