// src/controller.rs
//! The synchronization controller: a live local mirror of the remote
//! collections plus the intent handling around it.
//!
//! The controller runs as a single task owning all mutable state. Views get
//! read-only [`ChatState`] snapshots through a `watch` channel and submit
//! [`ChatIntent`]s through the handle; nothing else mutates the mirror.
//! Three live subscriptions feed it: all users, all conversations, and the
//! active conversation's messages. Each snapshot replaces its local list
//! atomically, so consumers never observe a partial merge.

use std::sync::Arc;

use chrono::Utc;
use serde_json::{json, Value};
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tracing::{debug, error, warn};

use crate::gateway::{
    server_timestamp, CollectionPath, Document, GatewayError, RemoteGateway, Snapshot,
    SnapshotOrder, Subscription,
};
use crate::messages::ChatIntent;
use crate::models::{Conversation, Message, User};

/// Everything a chat view needs to render, cloned out per update.
#[derive(Debug, Clone, PartialEq)]
pub struct ChatState {
    /// Every registered user except the current identity.
    pub users: Vec<User>,
    /// True until the users subscription delivers its first snapshot.
    pub loading_users: bool,
    /// Conversations involving the current identity, most recent first.
    pub conversations: Vec<Conversation>,
    pub selected_user: Option<User>,
    pub selected_conv: Option<Conversation>,
    /// Messages of the active conversation, timestamp ascending.
    pub messages: Vec<Message>,
    /// The current identity's own user record.
    pub profile: Option<User>,
    /// Transient message from the last failed user-initiated write.
    pub last_error: Option<String>,
}

impl Default for ChatState {
    fn default() -> Self {
        Self {
            users: Vec::new(),
            loading_users: true,
            conversations: Vec::new(),
            selected_user: None,
            selected_conv: None,
            messages: Vec::new(),
            profile: None,
            last_error: None,
        }
    }
}

/// The view's end of a running controller.
pub struct ChatHandle {
    intents: mpsc::UnboundedSender<ChatIntent>,
    state: watch::Receiver<ChatState>,
    task: JoinHandle<()>,
}

impl ChatHandle {
    pub fn send(&self, intent: ChatIntent) {
        // A closed channel means the controller already tore down; the
        // intent is moot then.
        let _ = self.intents.send(intent);
    }

    /// The current state snapshot.
    pub fn state(&self) -> ChatState {
        self.state.borrow().clone()
    }

    /// A receiver that observes every published state change.
    pub fn watch(&self) -> watch::Receiver<ChatState> {
        self.state.clone()
    }

    /// Signs the session out and waits for teardown to finish.
    pub async fn shutdown(self) {
        let _ = self.intents.send(ChatIntent::SignOut);
        let _ = self.task.await;
    }
}

/// The session-owned actor. Created on sign-in, torn down on sign-out.
pub struct ChatController {
    gateway: Arc<dyn RemoteGateway>,
    me: String,
    state: ChatState,
    state_tx: watch::Sender<ChatState>,
    intents: mpsc::UnboundedReceiver<ChatIntent>,
    users_sub: Option<Subscription<Snapshot>>,
    convs_sub: Option<Subscription<Snapshot>>,
    messages_sub: Option<Subscription<Snapshot>>,
}

impl ChatController {
    /// Starts the controller for a signed-in identity.
    pub fn spawn(gateway: Arc<dyn RemoteGateway>, identity: impl Into<String>) -> ChatHandle {
        let me = identity.into();
        let (intent_tx, intent_rx) = mpsc::unbounded_channel();
        let (state_tx, state_rx) = watch::channel(ChatState::default());

        let task = tokio::spawn(async move {
            let mut controller = ChatController {
                gateway,
                me,
                state: ChatState::default(),
                state_tx,
                intents: intent_rx,
                users_sub: None,
                convs_sub: None,
                messages_sub: None,
            };
            controller.run().await;
        });

        ChatHandle {
            intents: intent_tx,
            state: state_rx,
            task,
        }
    }

    async fn run(&mut self) {
        self.set_presence(true).await;
        self.users_sub = Some(
            self.gateway
                .subscribe(&CollectionPath::Users, SnapshotOrder::Unordered),
        );
        self.convs_sub = Some(
            self.gateway
                .subscribe(&CollectionPath::Conversations, SnapshotOrder::Unordered),
        );

        loop {
            tokio::select! {
                intent = self.intents.recv() => match intent {
                    Some(ChatIntent::SignOut) | None => break,
                    Some(intent) => self.handle(intent).await,
                },
                snap = next_snapshot(&mut self.users_sub) => match snap {
                    Some(snap) => self.on_users(snap),
                    None => warn!("users subscription ended"),
                },
                snap = next_snapshot(&mut self.convs_sub) => match snap {
                    Some(snap) => self.on_conversations(snap),
                    None => warn!("conversations subscription ended"),
                },
                snap = next_snapshot(&mut self.messages_sub) => match snap {
                    Some(snap) => self.on_messages(snap),
                    None => debug!("message subscription ended"),
                },
            }
        }

        self.teardown().await;
    }

    async fn handle(&mut self, intent: ChatIntent) {
        match intent {
            ChatIntent::SelectUser(user_id) => self.select_user(&user_id).await,
            ChatIntent::SendMessage(text) => self.send_message(&text).await,
            ChatIntent::GoBack => self.go_back(),
            ChatIntent::SaveProfile {
                firstname,
                lastname,
                profilepic,
            } => self.save_profile(&firstname, &lastname, &profilepic).await,
            ChatIntent::VisibilityChanged(visible) => self.set_presence(visible).await,
            ChatIntent::ClearError => {
                self.state.last_error = None;
                self.publish();
            }
            // Handled in the run loop before dispatch.
            ChatIntent::SignOut => {}
        }
    }

    fn on_users(&mut self, snap: Snapshot) {
        let all: Vec<User> = snap
            .iter()
            .map(|(id, doc)| User::from_doc(id, doc))
            .collect();
        self.state.profile = all.iter().find(|u| u.id == self.me).cloned();
        self.state.users = all.into_iter().filter(|u| u.id != self.me).collect();
        self.state.loading_users = false;
        self.publish();
    }

    fn on_conversations(&mut self, snap: Snapshot) {
        let mut convs: Vec<Conversation> = snap
            .iter()
            .map(|(id, doc)| Conversation::from_doc(id, doc))
            .filter(|c| c.involves(&self.me))
            .collect();
        convs.sort_by(|a, b| b.timestamp.cmp(&a.timestamp));

        // Keep the active conversation's preview in step with the mirror.
        if let Some(active) = &self.state.selected_conv {
            if let Some(fresh) = convs.iter().find(|c| c.id == active.id) {
                self.state.selected_conv = Some(fresh.clone());
            }
        }
        self.state.conversations = convs;
        self.publish();
    }

    fn on_messages(&mut self, snap: Snapshot) {
        let Some(conv) = self.state.selected_conv.clone() else {
            return;
        };
        let messages: Vec<Message> = snap
            .iter()
            .map(|(id, doc)| Message::from_doc(id, doc))
            .collect();
        let unread: Vec<String> = messages
            .iter()
            .filter(|m| m.sender_id != self.me && !m.checked)
            .map(|m| m.id.clone())
            .collect();
        self.state.messages = messages;
        self.publish();

        // Viewing is the read receipt: flip the flag remotely, fire and
        // forget. The next snapshot reflects it.
        let path = CollectionPath::Messages {
            conversation_id: conv.id,
        };
        for message_id in unread {
            let gateway = self.gateway.clone();
            let path = path.clone();
            tokio::spawn(async move {
                let mut fields = Document::new();
                fields.insert("checked".into(), Value::Bool(true));
                if let Err(err) = gateway.update(&path, &message_id, fields).await {
                    warn!(%err, message = %message_id, "read receipt update failed");
                }
            });
        }
    }

    async fn select_user(&mut self, user_id: &str) {
        if user_id == self.me {
            debug!("ignoring attempt to message yourself");
            return;
        }
        let user = match self.state.users.iter().find(|u| u.id == user_id).cloned() {
            Some(user) => user,
            // The users snapshot may not have arrived yet; resolve the id
            // against the store directly instead of dropping the intent.
            None => match self.gateway.fetch_one(&CollectionPath::Users, user_id).await {
                Ok(doc) => User::from_doc(user_id, &doc),
                Err(err) => {
                    warn!(%err, user = user_id, "select intent for unknown user id");
                    self.state.last_error = Some("That user is not available.".into());
                    self.publish();
                    return;
                }
            },
        };
        self.state.selected_user = Some(user);

        let conv = match self
            .state
            .conversations
            .iter()
            .find(|c| c.involves(user_id))
        {
            Some(existing) => Some(existing.clone()),
            None => self.create_conversation(user_id).await,
        };

        self.state.selected_conv = conv.clone();
        self.state.messages.clear();
        // Old feed down before the new one can deliver, so a stale
        // conversation's messages never render under the new header.
        if let Some(sub) = self.messages_sub.take() {
            sub.cancel();
        }
        if let Some(conv) = &conv {
            self.messages_sub = Some(self.gateway.subscribe(
                &CollectionPath::Messages {
                    conversation_id: conv.id.clone(),
                },
                SnapshotOrder::TimestampAscending,
            ));
        }
        self.publish();
    }

    async fn create_conversation(&mut self, other: &str) -> Option<Conversation> {
        let id = conversation_id(&self.me, other);

        // The local mirror can lag the store, so a pair document may exist
        // even when the conversations list has no entry for it yet. Adopt
        // the stored document instead of resetting its preview fields.
        match self.gateway.fetch_one(&CollectionPath::Conversations, &id).await {
            Ok(doc) => {
                let conv = Conversation::from_doc(&id, &doc);
                if !self.state.conversations.iter().any(|c| c.id == id) {
                    self.state.conversations.push(conv.clone());
                }
                return Some(conv);
            }
            Err(GatewayError::NotFound { .. }) => {}
            Err(err) => {
                error!(%err, other, "conversation lookup failed");
                self.state.last_error =
                    Some("Could not start the conversation. Please try again.".into());
                return None;
            }
        }

        let mut fields = Document::new();
        fields.insert("participants".into(), json!([self.me, other]));
        fields.insert("lastMessage".into(), Value::String(String::new()));
        fields.insert("senderId".into(), Value::String(self.me.clone()));
        fields.insert("checked".into(), Value::Bool(false));
        fields.insert("timestamp".into(), server_timestamp());

        match self
            .gateway
            .set(&CollectionPath::Conversations, &id, fields)
            .await
        {
            Ok(()) => {
                let conv = Conversation {
                    id,
                    participants: vec![self.me.clone(), other.to_owned()],
                    last_message: String::new(),
                    timestamp: Utc::now(),
                    sender_id: self.me.clone(),
                    checked: false,
                };
                // Optimistic append; the live subscription confirms it.
                self.state.conversations.push(conv.clone());
                Some(conv)
            }
            Err(err) => {
                error!(%err, other, "conversation create failed");
                self.state.last_error =
                    Some("Could not start the conversation. Please try again.".into());
                None
            }
        }
    }

    async fn send_message(&mut self, text: &str) {
        let text = text.trim();
        if text.is_empty() {
            debug!("ignoring empty message");
            return;
        }
        let Some(conv) = self.state.selected_conv.clone() else {
            debug!("send with no active conversation");
            return;
        };

        let path = CollectionPath::Messages {
            conversation_id: conv.id.clone(),
        };
        let mut fields = Document::new();
        fields.insert("senderId".into(), Value::String(self.me.clone()));
        fields.insert("text".into(), Value::String(text.to_owned()));
        fields.insert("timestamp".into(), server_timestamp());
        fields.insert("checked".into(), Value::Bool(false));

        let message_id = match self.gateway.create(&path, fields).await {
            Ok(id) => id,
            Err(err) => {
                error!(%err, conversation = %conv.id, "message send failed");
                self.state.last_error =
                    Some("Could not send the message. Please try again.".into());
                self.publish();
                return;
            }
        };

        let mut patch = Document::new();
        patch.insert("lastMessage".into(), Value::String(text.to_owned()));
        patch.insert("timestamp".into(), server_timestamp());
        patch.insert("senderId".into(), Value::String(self.me.clone()));
        if let Err(err) = self
            .gateway
            .update(&CollectionPath::Conversations, &conv.id, patch)
            .await
        {
            error!(%err, conversation = %conv.id, "conversation preview update failed");
            self.state.last_error = Some("Could not send the message. Please try again.".into());
            self.publish();
            return;
        }
        self.state.last_error = None;

        if self.messages_sub.is_none() {
            // No live feed to reflect the write, so merge a local copy
            // right away. Keyed by the returned id, a later snapshot of
            // the same document supersedes rather than duplicates it.
            if !self.state.messages.iter().any(|m| m.id == message_id) {
                self.state.messages.push(Message {
                    id: message_id,
                    sender_id: self.me.clone(),
                    text: text.to_owned(),
                    timestamp: Utc::now(),
                    checked: false,
                });
                self.state.messages.sort_by(|a, b| a.timestamp.cmp(&b.timestamp));
            }
            if let Some(local) = self
                .state
                .conversations
                .iter_mut()
                .find(|c| c.id == conv.id)
            {
                local.last_message = text.to_owned();
                local.timestamp = Utc::now();
                local.sender_id = self.me.clone();
            }
            self.state
                .conversations
                .sort_by(|a, b| b.timestamp.cmp(&a.timestamp));
        }
        self.publish();
    }

    fn go_back(&mut self) {
        self.state.selected_user = None;
        self.state.selected_conv = None;
        self.state.messages.clear();
        // Stops further read-receipt side effects for the conversation,
        // even if messages keep arriving remotely.
        if let Some(sub) = self.messages_sub.take() {
            sub.cancel();
        }
        self.publish();
    }

    async fn save_profile(&mut self, firstname: &str, lastname: &str, profilepic: &str) {
        let mut fields = Document::new();
        fields.insert("firstname".into(), Value::String(firstname.trim().to_owned()));
        fields.insert("lastname".into(), Value::String(lastname.trim().to_owned()));
        fields.insert(
            "profilepic".into(),
            Value::String(profilepic.trim().to_owned()),
        );
        match self
            .gateway
            .update(&CollectionPath::Users, &self.me, fields)
            .await
        {
            Ok(()) => self.state.last_error = None,
            Err(err) => {
                error!(%err, "profile update failed");
                self.state.last_error = Some("Failed to save changes. Please try again.".into());
            }
        }
        self.publish();
    }

    /// Best-effort presence write; failures are logged, never surfaced.
    async fn set_presence(&mut self, online: bool) {
        let mut fields = Document::new();
        fields.insert("checked".into(), Value::Bool(online));
        fields.insert("lastseen".into(), server_timestamp());
        if let Err(err) = self
            .gateway
            .update(&CollectionPath::Users, &self.me, fields)
            .await
        {
            warn!(%err, online, "presence update failed");
        }
    }

    async fn teardown(&mut self) {
        if let Some(sub) = self.users_sub.take() {
            sub.cancel();
        }
        if let Some(sub) = self.convs_sub.take() {
            sub.cancel();
        }
        if let Some(sub) = self.messages_sub.take() {
            sub.cancel();
        }
        self.set_presence(false).await;

        self.state = ChatState {
            loading_users: false,
            ..ChatState::default()
        };
        self.publish();
    }

    fn publish(&self) {
        let _ = self.state_tx.send(self.state.clone());
    }
}

/// Conversations are keyed by the unordered participant pair, which makes
/// lazy creation idempotent when both sides select each other at once.
fn conversation_id(a: &str, b: &str) -> String {
    if a <= b {
        format!("{a}_{b}")
    } else {
        format!("{b}_{a}")
    }
}

async fn next_snapshot(sub: &mut Option<Subscription<Snapshot>>) -> Option<Snapshot> {
    match sub.as_mut() {
        Some(live) => {
            let snap = live.next().await;
            if snap.is_none() {
                // Feed ended without cancellation; keep the last-known
                // state and stop polling this slot.
                *sub = None;
            }
            snap
        }
        None => std::future::pending().await,
    }
}
