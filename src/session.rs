//! Signed-in identity and the on-device credential registry.

use std::collections::HashMap;
use std::sync::Arc;

use secrecy::{ExposeSecret, SecretString};
use serde::{Deserialize, Serialize, Serializer};
use thiserror::Error;

use crate::cache::{CacheCell, KeySnapshot, StorageLayout, SubscriberId, WriteOp};
use crate::kv::{keys, KeyValue, StoreError};

/// The signed-in user. At most one exists; it is created by sign-in/sign-up
/// and destroyed by sign-out.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Session {
    pub id: String,
    pub email: Option<String>,
    #[serde(default, rename = "name")]
    pub display_name: Option<String>,
}

const SESSION_KEYS: [&str; 1] = [keys::USER];

struct SessionLayout;

impl StorageLayout<Option<Session>> for SessionLayout {
    fn keys(&self) -> &[&'static str] {
        &SESSION_KEYS
    }

    fn load(&self, snapshot: &KeySnapshot) -> Option<Session> {
        snapshot.json_or_default(keys::USER)
    }

    fn writes(&self, previous: Option<&Option<Session>>, value: &Option<Session>) -> Vec<WriteOp> {
        if previous.is_some_and(|p| p == value) {
            return Vec::new();
        }
        match value {
            // Sign-out removes the key outright; a stale session record left
            // in the store would outlive the sign-out.
            None => vec![WriteOp::Delete { key: keys::USER }],
            Some(session) => {
                let mut ops = Vec::new();
                crate::cache::push_json(&mut ops, keys::USER, session);
                ops
            }
        }
    }
}

pub struct SessionCache {
    cell: CacheCell<Option<Session>>,
}

impl SessionCache {
    #[must_use]
    pub fn new(store: Arc<dyn KeyValue>) -> Self {
        Self {
            cell: CacheCell::new(store, SessionLayout),
        }
    }

    pub async fn hydrate(&self) {
        self.cell.hydrate().await;
    }

    pub async fn flush(&self) {
        self.cell.flush().await;
    }

    #[must_use]
    pub fn current(&self) -> Option<Session> {
        self.cell.get()
    }

    #[must_use]
    pub fn is_authenticated(&self) -> bool {
        self.cell.get().is_some()
    }

    pub fn sign_in(&self, session: Session) {
        self.cell.set(|_| Some(session));
    }

    pub fn sign_out(&self) {
        self.cell.set(|_| None);
    }

    pub fn subscribe(
        &self,
        listener: impl FnMut(&Option<Session>) + Send + 'static,
    ) -> SubscriberId {
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

/// One account in the registry under the `users` key.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StoredCredentials {
    pub email: String,
    #[serde(serialize_with = "expose_password")]
    pub password: SecretString,
    #[serde(default)]
    pub name: Option<String>,
}

fn expose_password<S: Serializer>(
    password: &SecretString,
    serializer: S,
) -> Result<S::Ok, S::Error> {
    serializer.serialize_str(password.expose_secret())
}

#[derive(Debug, Error)]
pub enum AuthError {
    #[error("an account with this email already exists")]
    EmailTaken,

    #[error("invalid email or password")]
    InvalidCredentials,

    #[error(transparent)]
    Store(#[from] StoreError),
}

type Registry = HashMap<String, StoredCredentials>;

/// An unreadable or corrupt registry degrades to empty rather than blocking
/// sign-up.
async fn load_registry(store: &dyn KeyValue) -> Registry {
    match store.get(keys::USERS).await {
        Ok(Some(raw)) => serde_json::from_str(&raw).unwrap_or_else(|err| {
            tracing::warn!(error = %err, "discarding malformed credential registry");
            Registry::new()
        }),
        Ok(None) => Registry::new(),
        Err(err) => {
            tracing::warn!(error = %err, "credential registry unreadable");
            Registry::new()
        }
    }
}

/// Create an account and return its session.
pub async fn register(
    store: &dyn KeyValue,
    email: &str,
    password: &str,
    name: Option<&str>,
) -> Result<Session, AuthError> {
    let mut registry = load_registry(store).await;
    if registry.contains_key(email) {
        return Err(AuthError::EmailTaken);
    }
    registry.insert(
        email.to_owned(),
        StoredCredentials {
            email: email.to_owned(),
            password: SecretString::new(password.to_owned()),
            name: name.map(str::to_owned),
        },
    );
    let json =
        serde_json::to_string(&registry).map_err(|err| StoreError::Backend(err.to_string()))?;
    store.set(keys::USERS, &json).await?;
    Ok(Session {
        id: email.to_owned(),
        email: Some(email.to_owned()),
        display_name: name.map(str::to_owned),
    })
}

/// Check credentials against the registry and return the matching session.
pub async fn login(store: &dyn KeyValue, email: &str, password: &str) -> Result<Session, AuthError> {
    let registry = load_registry(store).await;
    let account = registry.get(email).ok_or(AuthError::InvalidCredentials)?;
    if account.password.expose_secret() != password {
        return Err(AuthError::InvalidCredentials);
    }
    Ok(Session {
        id: email.to_owned(),
        email: Some(email.to_owned()),
        display_name: account.name.clone(),
    })
}
