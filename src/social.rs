//! Friends, friend requests, and per-friend message logs.
//!
//! A friend request is Pending while it sits in `friend_requests`; accepting
//! or rejecting it removes it for good, and only acceptance also appends a
//! friend. Both happen as one state transition, so observers never see a
//! request and its friend coexist or both be missing.

use std::collections::HashMap;
use std::sync::Arc;

use serde::{Deserialize, Serialize};

use crate::cache::{push_json, CacheCell, KeySnapshot, StorageLayout, SubscriberId, WriteOp};
use crate::kv::{keys, KeyValue, StoreError};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Friend {
    pub id: String,
    pub name: String,
    pub email: String,
    pub profile_picture: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub is_request_pending: Option<bool>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FriendRequest {
    pub id: String,
    pub sender_id: String,
    pub sender_name: String,
    pub sender_email: String,
    pub sender_profile_picture: Option<String>,
    #[serde(rename = "timestamp")]
    pub timestamp_ms: u64,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Message {
    pub id: String,
    pub sender_id: String,
    pub receiver_id: String,
    pub content: String,
    #[serde(
        rename = "imageUrl",
        default,
        skip_serializing_if = "Option::is_none"
    )]
    pub image_uri: Option<String>,
    #[serde(rename = "timestamp")]
    pub timestamp_ms: u64,
    pub is_read: bool,
}

impl Message {
    #[must_use]
    pub fn new(
        sender_id: impl Into<String>,
        receiver_id: impl Into<String>,
        content: impl Into<String>,
    ) -> Self {
        Self {
            id: crate::new_id(),
            sender_id: sender_id.into(),
            receiver_id: receiver_id.into(),
            content: content.into(),
            image_uri: None,
            timestamp_ms: crate::now_ms(),
            is_read: false,
        }
    }

    #[must_use]
    pub fn with_image(mut self, uri: impl Into<String>) -> Self {
        self.image_uri = Some(uri.into());
        self
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SocialState {
    pub friends: Vec<Friend>,
    pub friend_requests: Vec<FriendRequest>,
    /// friendId -> chronological message log.
    pub messages: HashMap<String, Vec<Message>>,
}

const SOCIAL_KEYS: [&str; 3] = [keys::FRIENDS, keys::FRIEND_REQUESTS, keys::MESSAGES];

struct SocialLayout;

impl StorageLayout<SocialState> for SocialLayout {
    fn keys(&self) -> &[&'static str] {
        &SOCIAL_KEYS
    }

    fn load(&self, snapshot: &KeySnapshot) -> SocialState {
        SocialState {
            friends: snapshot.json_or_default(keys::FRIENDS),
            friend_requests: snapshot.json_or_default(keys::FRIEND_REQUESTS),
            messages: snapshot.json_or_default(keys::MESSAGES),
        }
    }

    fn writes(&self, previous: Option<&SocialState>, value: &SocialState) -> Vec<WriteOp> {
        let mut ops = Vec::new();
        if previous.map(|p| &p.friends) != Some(&value.friends) {
            push_json(&mut ops, keys::FRIENDS, &value.friends);
        }
        if previous.map(|p| &p.friend_requests) != Some(&value.friend_requests) {
            push_json(&mut ops, keys::FRIEND_REQUESTS, &value.friend_requests);
        }
        if previous.map(|p| &p.messages) != Some(&value.messages) {
            push_json(&mut ops, keys::MESSAGES, &value.messages);
        }
        ops
    }
}

pub struct SocialCache {
    cell: CacheCell<SocialState>,
}

impl SocialCache {
    #[must_use]
    pub fn new(store: Arc<dyn KeyValue>) -> Self {
        Self {
            cell: CacheCell::new(store, SocialLayout),
        }
    }

    pub async fn hydrate(&self) {
        self.cell.hydrate().await;
    }

    pub async fn flush(&self) {
        self.cell.flush().await;
    }

    #[must_use]
    pub fn state(&self) -> SocialState {
        self.cell.get()
    }

    pub fn add_friend(&self, friend: Friend) {
        self.cell.set(|mut state| {
            state.friends.push(friend);
            state
        });
    }

    /// Remove the friend and drop their message log in the same transition;
    /// no log may outlive its friend.
    pub fn remove_friend(&self, friend_id: &str) {
        self.cell.set(|mut state| {
            state.friends.retain(|f| f.id != friend_id);
            state.messages.remove(friend_id);
            state
        });
    }

    pub fn add_friend_request(&self, request: FriendRequest) {
        self.cell.set(|mut state| {
            state.friend_requests.push(request);
            state
        });
    }

    pub fn remove_friend_request(&self, request_id: &str) {
        self.cell.set(|mut state| {
            state.friend_requests.retain(|r| r.id != request_id);
            state
        });
    }

    /// Accept: the request disappears and the friend appears in one
    /// transition.
    pub fn accept_friend_request(&self, request_id: &str, friend: Friend) {
        self.cell.set(|mut state| {
            state.friend_requests.retain(|r| r.id != request_id);
            state.friends.push(friend);
            state
        });
    }

    pub fn reject_friend_request(&self, request_id: &str) {
        self.remove_friend_request(request_id);
    }

    pub fn send_message(&self, friend_id: &str, message: Message) {
        self.cell.set(|mut state| {
            state
                .messages
                .entry(friend_id.to_owned())
                .or_default()
                .push(message);
            state
        });
    }

    /// Mark the whole log read. When the log is absent or empty nothing
    /// changes, so no write is enqueued.
    pub fn mark_messages_as_read(&self, friend_id: &str) {
        let state = self.cell.get();
        if state.messages.get(friend_id).map_or(true, Vec::is_empty) {
            return;
        }
        self.cell.set(|mut state| {
            if let Some(log) = state.messages.get_mut(friend_id) {
                for message in log {
                    message.is_read = true;
                }
            }
            state
        });
    }

    /// Messages from this friend that the local user hasn't read. Our own
    /// sent messages never count.
    #[must_use]
    pub fn unread_count(&self, friend_id: &str) -> usize {
        self.cell.get().messages.get(friend_id).map_or(0, |log| {
            log.iter()
                .filter(|m| !m.is_read && m.sender_id == friend_id)
                .count()
        })
    }

    #[must_use]
    pub fn total_unread_count(&self) -> usize {
        self.cell
            .get()
            .messages
            .iter()
            .map(|(friend_id, log)| {
                log.iter()
                    .filter(|m| !m.is_read && &m.sender_id == friend_id)
                    .count()
            })
            .sum()
    }

    pub fn subscribe(&self, listener: impl FnMut(&SocialState) + Send + 'static) -> SubscriberId {
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

    fn friend(id: &str) -> Friend {
        Friend {
            id: id.into(),
            name: format!("Friend {id}"),
            email: format!("{id}@example.com"),
            profile_picture: None,
            is_request_pending: None,
        }
    }

    fn request(id: &str, sender: &str) -> FriendRequest {
        FriendRequest {
            id: id.into(),
            sender_id: sender.into(),
            sender_name: sender.into(),
            sender_email: format!("{sender}@example.com"),
            sender_profile_picture: None,
            timestamp_ms: 1,
        }
    }

    fn incoming(from: &str) -> Message {
        Message {
            is_read: false,
            ..Message::new(from, "me", "hi")
        }
    }

    fn cache() -> SocialCache {
        SocialCache::new(Arc::new(MemoryStore::new()) as Arc<dyn KeyValue>)
    }

    #[tokio::test]
    async fn accept_removes_request_and_adds_friend_atomically() {
        let cache = cache();
        cache.add_friend_request(request("req1", "f1"));

        let transitions = Arc::new(std::sync::Mutex::new(Vec::new()));
        let sink = Arc::clone(&transitions);
        cache.subscribe(move |state: &SocialState| {
            crate::lock(&sink).push((state.friend_requests.len(), state.friends.len()));
        });

        cache.accept_friend_request("req1", friend("f1"));

        let state = cache.state();
        assert!(state.friend_requests.is_empty());
        assert_eq!(state.friends.len(), 1);
        // The subscriber saw exactly one transition with both changes applied.
        assert_eq!(*crate::lock(&transitions), vec![(0, 1)]);
    }

    #[tokio::test]
    async fn reject_removes_request_without_adding_a_friend() {
        let cache = cache();
        cache.add_friend_request(request("req1", "f1"));

        cache.reject_friend_request("req1");

        let state = cache.state();
        assert!(state.friend_requests.is_empty());
        assert!(state.friends.is_empty());
    }

    #[tokio::test]
    async fn remove_friend_drops_their_message_log() {
        let cache = cache();
        cache.add_friend(friend("f1"));
        cache.send_message("f1", incoming("f1"));

        cache.remove_friend("f1");

        let state = cache.state();
        assert!(state.friends.is_empty());
        assert!(!state.messages.contains_key("f1"));
    }

    #[tokio::test]
    async fn unread_counts_only_messages_from_the_friend() {
        let cache = cache();
        cache.add_friend(friend("f1"));

        cache.send_message("f1", incoming("f1"));
        cache.send_message("f1", Message::new("me", "f1", "reply"));

        assert_eq!(cache.unread_count("f1"), 1);
        assert_eq!(cache.total_unread_count(), 1);

        cache.mark_messages_as_read("f1");
        assert_eq!(cache.unread_count("f1"), 0);
        assert_eq!(cache.total_unread_count(), 0);
    }

    #[tokio::test]
    async fn mark_read_on_absent_log_writes_nothing() {
        let store = Arc::new(MemoryStore::new());
        let cache = SocialCache::new(Arc::clone(&store) as Arc<dyn KeyValue>);

        cache.mark_messages_as_read("nobody");
        cache.flush().await;

        assert!(store.dump().is_empty());
    }

    #[tokio::test]
    async fn message_log_appends_in_order() {
        let cache = cache();
        cache.send_message("f1", Message::new("f1", "me", "first"));
        cache.send_message("f1", Message::new("f1", "me", "second"));

        let state = cache.state();
        let log = &state.messages["f1"];
        assert_eq!(log[0].content, "first");
        assert_eq!(log[1].content, "second");
    }

    #[tokio::test]
    async fn persisted_social_state_round_trips() {
        let store = Arc::new(MemoryStore::new());
        let cache = SocialCache::new(Arc::clone(&store) as Arc<dyn KeyValue>);

        cache.add_friend(friend("f1"));
        cache.add_friend_request(request("req2", "f2"));
        cache.send_message("f1", incoming("f1").with_image("file:///pic.jpg"));
        cache.flush().await;

        let restarted = SocialCache::new(Arc::clone(&store) as Arc<dyn KeyValue>);
        restarted.hydrate().await;

        assert_eq!(restarted.state(), cache.state());
    }
}
