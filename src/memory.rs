// src/memory.rs
//! In-memory emulation of the remote platform.
//!
//! Documents, generated ids, server-assigned timestamps, live snapshot
//! subscriptions and registered accounts, all backed by `tokio::sync`
//! primitives. This is the backend the tests and the demo binary run
//! against; it is a stand-in, not a store.

use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tokio::sync::{broadcast, mpsc, RwLock};
use tokio_stream::wrappers::UnboundedReceiverStream;
use uuid::Uuid;

use crate::auth::{AuthError, MIN_PASSWORD_LEN};
use crate::gateway::{
    AuthState, CollectionPath, Document, GatewayError, RemoteGateway, Snapshot, SnapshotOrder,
    Subscription, SERVER_TIMESTAMP,
};

#[derive(Clone)]
pub struct MemoryGateway {
    inner: Arc<Inner>,
}

struct Inner {
    accounts: RwLock<HashMap<String, Account>>,
    docs: RwLock<HashMap<CollectionPath, BTreeMap<String, Document>>>,
    /// Fires with the path of every changed collection.
    changes: broadcast::Sender<CollectionPath>,
    auth_tx: broadcast::Sender<AuthState>,
    auth_now: RwLock<AuthState>,
}

struct Account {
    uid: String,
    password: String,
}

impl MemoryGateway {
    pub fn new() -> Self {
        let (changes, _) = broadcast::channel(64);
        let (auth_tx, _) = broadcast::channel(16);
        Self {
            inner: Arc::new(Inner {
                accounts: RwLock::new(HashMap::new()),
                docs: RwLock::new(HashMap::new()),
                changes,
                auth_tx,
                auth_now: RwLock::new(AuthState::SignedOut),
            }),
        }
    }
}

impl Default for MemoryGateway {
    fn default() -> Self {
        Self::new()
    }
}

impl Inner {
    async fn snapshot(&self, path: &CollectionPath, order: SnapshotOrder) -> Snapshot {
        let docs = self.docs.read().await;
        let mut snap: Snapshot = docs
            .get(path)
            .map(|collection| {
                collection
                    .iter()
                    .map(|(id, doc)| (id.clone(), doc.clone()))
                    .collect()
            })
            .unwrap_or_default();
        if order == SnapshotOrder::TimestampAscending {
            snap.sort_by_key(|(_, doc)| doc_timestamp(doc));
        }
        snap
    }

    fn notify(&self, path: &CollectionPath) {
        // No receivers is fine; nobody is subscribed yet.
        let _ = self.changes.send(path.clone());
    }

    async fn set_auth(&self, state: AuthState) {
        *self.auth_now.write().await = state.clone();
        let _ = self.auth_tx.send(state);
    }
}

fn doc_timestamp(doc: &Document) -> DateTime<Utc> {
    doc.get("timestamp")
        .and_then(serde_json::Value::as_str)
        .and_then(|s| DateTime::parse_from_rfc3339(s).ok())
        .map(|t| t.with_timezone(&Utc))
        .unwrap_or(DateTime::UNIX_EPOCH)
}

/// Commit-time resolution of the server-timestamp sentinel.
fn resolve_server_timestamps(fields: &mut Document) {
    let now = serde_json::Value::String(Utc::now().to_rfc3339());
    for value in fields.values_mut() {
        if value.as_str() == Some(SERVER_TIMESTAMP) {
            *value = now.clone();
        }
    }
}

#[async_trait]
impl RemoteGateway for MemoryGateway {
    fn auth_changes(&self) -> Subscription<AuthState> {
        let inner = self.inner.clone();
        let mut rx = self.inner.auth_tx.subscribe();
        let stream = async_stream::stream! {
            // Bind before yielding so the read guard drops before the
            // suspension point; holding it across the yield deadlocks
            // any subsequent `set_auth`.
            let current = inner.auth_now.read().await.clone();
            yield current;
            loop {
                match rx.recv().await {
                    Ok(state) => yield state,
                    Err(broadcast::error::RecvError::Lagged(_)) => {
                        let current = inner.auth_now.read().await.clone();
                        yield current;
                    }
                    Err(broadcast::error::RecvError::Closed) => break,
                }
            }
        };
        Subscription::new(stream)
    }

    async fn sign_up(&self, email: &str, password: &str) -> Result<String, AuthError> {
        if !email.contains('@') {
            return Err(AuthError::InvalidEmail);
        }
        if password.len() < MIN_PASSWORD_LEN {
            return Err(AuthError::WeakPassword);
        }
        let mut accounts = self.inner.accounts.write().await;
        if accounts.contains_key(email) {
            return Err(AuthError::EmailInUse);
        }
        let uid = Uuid::new_v4().to_string();
        accounts.insert(
            email.to_owned(),
            Account {
                uid: uid.clone(),
                password: password.to_owned(),
            },
        );
        drop(accounts);
        self.inner.set_auth(AuthState::SignedIn(uid.clone())).await;
        Ok(uid)
    }

    async fn sign_in(&self, email: &str, password: &str) -> Result<String, AuthError> {
        let accounts = self.inner.accounts.read().await;
        let uid = match accounts.get(email) {
            Some(account) if account.password == password => account.uid.clone(),
            _ => return Err(AuthError::InvalidCredentials),
        };
        drop(accounts);
        self.inner.set_auth(AuthState::SignedIn(uid.clone())).await;
        Ok(uid)
    }

    async fn sign_out(&self) -> Result<(), AuthError> {
        self.inner.set_auth(AuthState::SignedOut).await;
        Ok(())
    }

    async fn fetch_all(&self, path: &CollectionPath) -> Result<Snapshot, GatewayError> {
        Ok(self.inner.snapshot(path, SnapshotOrder::Unordered).await)
    }

    async fn fetch_one(&self, path: &CollectionPath, id: &str) -> Result<Document, GatewayError> {
        let docs = self.inner.docs.read().await;
        docs.get(path)
            .and_then(|collection| collection.get(id))
            .cloned()
            .ok_or_else(|| GatewayError::NotFound {
                path: path.clone(),
                id: id.to_owned(),
            })
    }

    async fn create(
        &self,
        path: &CollectionPath,
        mut fields: Document,
    ) -> Result<String, GatewayError> {
        resolve_server_timestamps(&mut fields);
        let id = Uuid::new_v4().to_string();
        let mut docs = self.inner.docs.write().await;
        docs.entry(path.clone())
            .or_default()
            .insert(id.clone(), fields);
        drop(docs);
        self.inner.notify(path);
        Ok(id)
    }

    async fn set(
        &self,
        path: &CollectionPath,
        id: &str,
        mut fields: Document,
    ) -> Result<(), GatewayError> {
        resolve_server_timestamps(&mut fields);
        let mut docs = self.inner.docs.write().await;
        docs.entry(path.clone())
            .or_default()
            .insert(id.to_owned(), fields);
        drop(docs);
        self.inner.notify(path);
        Ok(())
    }

    async fn update(
        &self,
        path: &CollectionPath,
        id: &str,
        mut fields: Document,
    ) -> Result<(), GatewayError> {
        resolve_server_timestamps(&mut fields);
        let mut docs = self.inner.docs.write().await;
        let doc = docs
            .get_mut(path)
            .and_then(|collection| collection.get_mut(id))
            .ok_or_else(|| GatewayError::NotFound {
                path: path.clone(),
                id: id.to_owned(),
            })?;
        for (key, value) in fields {
            doc.insert(key, value);
        }
        drop(docs);
        self.inner.notify(path);
        Ok(())
    }

    fn subscribe(&self, path: &CollectionPath, order: SnapshotOrder) -> Subscription<Snapshot> {
        let inner = self.inner.clone();
        let path = path.clone();
        let mut changes = self.inner.changes.subscribe();
        let (tx, rx) = mpsc::unbounded_channel();
        let task = tokio::spawn(async move {
            if tx.send(inner.snapshot(&path, order).await).is_err() {
                return;
            }
            loop {
                match changes.recv().await {
                    Ok(changed) if changed != path => continue,
                    Err(broadcast::error::RecvError::Closed) => break,
                    // A matching change, or lag: either way re-send the
                    // full current snapshot.
                    _ => {}
                }
                if tx.send(inner.snapshot(&path, order).await).is_err() {
                    break;
                }
            }
        });
        Subscription::with_task(UnboundedReceiverStream::new(rx), task)
    }
}
