// src/gateway.rs
//! The seam to the remote platform: documents, live subscriptions, auth.
//!
//! Everything the rest of the crate knows about the backend goes through
//! [`RemoteGateway`]. Raw records are untyped field maps; the mapper in
//! `models` is the only place that turns them into domain types.

use std::fmt;
use std::pin::Pin;
use std::task::{Context, Poll};

use async_trait::async_trait;
use futures::StreamExt;
use futures_util::Stream;
use serde_json::{Map, Value};
use thiserror::Error;
use tokio::task::JoinHandle;

use crate::auth::AuthError;

/// A raw backend record: field name to value, id carried separately.
pub type Document = Map<String, Value>;

/// One full collection snapshot: `(document id, document)` pairs.
pub type Snapshot = Vec<(String, Document)>;

/// Write-time placeholder resolved to the backend's clock at commit,
/// never the caller's clock.
pub const SERVER_TIMESTAMP: &str = "__server_timestamp__";

/// The sentinel value to put in a field that should receive the
/// backend's commit timestamp.
pub fn server_timestamp() -> Value {
    Value::String(SERVER_TIMESTAMP.to_owned())
}

/// Named collections owned by the backend.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum CollectionPath {
    Users,
    Conversations,
    /// Messages live under their owning conversation.
    Messages { conversation_id: String },
}

impl fmt::Display for CollectionPath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CollectionPath::Users => write!(f, "users"),
            CollectionPath::Conversations => write!(f, "conversations"),
            CollectionPath::Messages { conversation_id } => {
                write!(f, "conversations/{conversation_id}/messages")
            }
        }
    }
}

/// Ordering a live subscription can ask the backend for.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SnapshotOrder {
    #[default]
    Unordered,
    TimestampAscending,
}

/// Identity-changed events from the auth client.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AuthState {
    SignedIn(String),
    SignedOut,
}

#[derive(Debug, Error)]
pub enum GatewayError {
    #[error("no document {id} in {path}")]
    NotFound { path: CollectionPath, id: String },
    #[error("not signed in")]
    Unauthenticated,
    #[error("backend unavailable: {0}")]
    Unavailable(String),
}

/// A live feed with explicit teardown.
///
/// Dropping the handle cancels the feed as well; `cancel` exists so that
/// teardown reads as a deliberate lifecycle event at the call site.
pub struct Subscription<T> {
    stream: Pin<Box<dyn Stream<Item = T> + Send>>,
    task: Option<JoinHandle<()>>,
}

impl<T> Subscription<T> {
    pub fn new(stream: impl Stream<Item = T> + Send + 'static) -> Self {
        Self {
            stream: Box::pin(stream),
            task: None,
        }
    }

    /// A subscription backed by a feeder task; cancelling aborts the task.
    pub fn with_task(stream: impl Stream<Item = T> + Send + 'static, task: JoinHandle<()>) -> Self {
        Self {
            stream: Box::pin(stream),
            task: Some(task),
        }
    }

    pub async fn next(&mut self) -> Option<T> {
        StreamExt::next(self).await
    }

    /// Tears the feed down. No further items are delivered.
    pub fn cancel(self) {}
}

impl<T> Stream for Subscription<T> {
    type Item = T;

    fn poll_next(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<T>> {
        self.get_mut().stream.as_mut().poll_next(cx)
    }
}

impl<T> Drop for Subscription<T> {
    fn drop(&mut self) {
        if let Some(task) = &self.task {
            task.abort();
        }
    }
}

/// The external platform, as consumed by this crate.
///
/// Reads and writes are asynchronous and fallible; subscriptions deliver the
/// full current snapshot on every change, starting with one promptly after
/// subscribing.
#[async_trait]
pub trait RemoteGateway: Send + Sync {
    /// Stream of identity-changed events, current state first.
    fn auth_changes(&self) -> Subscription<AuthState>;

    async fn sign_up(&self, email: &str, password: &str) -> Result<String, AuthError>;
    async fn sign_in(&self, email: &str, password: &str) -> Result<String, AuthError>;
    async fn sign_out(&self) -> Result<(), AuthError>;

    async fn fetch_all(&self, path: &CollectionPath) -> Result<Snapshot, GatewayError>;
    async fn fetch_one(&self, path: &CollectionPath, id: &str) -> Result<Document, GatewayError>;

    /// Create a document with a backend-generated id.
    async fn create(&self, path: &CollectionPath, fields: Document) -> Result<String, GatewayError>;

    /// Create or replace a document under a caller-chosen id.
    async fn set(&self, path: &CollectionPath, id: &str, fields: Document)
        -> Result<(), GatewayError>;

    /// Partial field update of an existing document.
    async fn update(
        &self,
        path: &CollectionPath,
        id: &str,
        fields: Document,
    ) -> Result<(), GatewayError>;

    fn subscribe(&self, path: &CollectionPath, order: SnapshotOrder) -> Subscription<Snapshot>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn collection_paths_render_like_the_backend_names_them() {
        assert_eq!(CollectionPath::Users.to_string(), "users");
        assert_eq!(CollectionPath::Conversations.to_string(), "conversations");
        assert_eq!(
            CollectionPath::Messages {
                conversation_id: "c1".into()
            }
            .to_string(),
            "conversations/c1/messages"
        );
    }

    #[test]
    fn server_timestamp_is_the_reserved_sentinel() {
        assert_eq!(server_timestamp(), Value::String(SERVER_TIMESTAMP.into()));
    }
}
