// src/models.rs
//! Domain records and the mapper from raw backend documents.
//!
//! The `from_doc` constructors are the single boundary where untyped records
//! become typed ones. They are total: a missing or mis-typed field degrades
//! to a default instead of erroring, so no downstream code ever re-interprets
//! a raw document.

use chrono::{DateTime, Utc};
use serde_json::Value;

use crate::gateway::Document;

/// A registered person.
#[derive(Debug, Clone, PartialEq)]
pub struct User {
    pub id: String,
    pub name: String,
    pub lastname: String,
    pub lastseen: Option<DateTime<Utc>>,
    pub profilepic: String,
    /// Presence flag, true = online.
    pub checked: bool,
}

impl User {
    pub fn from_doc(id: &str, doc: &Document) -> Self {
        Self {
            id: id.to_owned(),
            name: str_field(doc, "firstname"),
            lastname: str_field(doc, "lastname"),
            lastseen: time_field(doc, "lastseen"),
            profilepic: str_field(doc, "profilepic"),
            checked: bool_field(doc, "checked"),
        }
    }

    pub fn display_name(&self) -> String {
        format!("{} {}", self.name, self.lastname).trim().to_owned()
    }
}

/// A one-to-one conversation between exactly two users.
#[derive(Debug, Clone, PartialEq)]
pub struct Conversation {
    pub id: String,
    /// The two participant ids, as stored. Order carries no meaning for
    /// membership tests.
    pub participants: Vec<String>,
    /// Denormalized preview of the most recent message.
    pub last_message: String,
    pub timestamp: DateTime<Utc>,
    /// Who sent the last message; drives the receipt icon.
    pub sender_id: String,
    /// Whether the preview has been seen.
    pub checked: bool,
}

impl Conversation {
    pub fn from_doc(id: &str, doc: &Document) -> Self {
        Self {
            id: id.to_owned(),
            participants: list_field(doc, "participants"),
            last_message: str_field(doc, "lastMessage"),
            timestamp: time_field(doc, "timestamp").unwrap_or_else(Utc::now),
            sender_id: str_field(doc, "senderId"),
            checked: bool_field(doc, "checked"),
        }
    }

    pub fn involves(&self, user_id: &str) -> bool {
        self.participants.iter().any(|p| p == user_id)
    }

    /// The participant that is not `me`, when there is one.
    pub fn other_participant(&self, me: &str) -> Option<&str> {
        self.participants
            .iter()
            .map(String::as_str)
            .find(|p| *p != me)
    }
}

/// A single text message, owned by exactly one conversation.
#[derive(Debug, Clone, PartialEq)]
pub struct Message {
    pub id: String,
    pub sender_id: String,
    pub text: String,
    pub timestamp: DateTime<Utc>,
    /// Read flag, flipped by the recipient viewing the conversation.
    pub checked: bool,
}

impl Message {
    pub fn from_doc(id: &str, doc: &Document) -> Self {
        Self {
            id: id.to_owned(),
            sender_id: str_field(doc, "senderId"),
            text: str_field(doc, "text"),
            timestamp: time_field(doc, "timestamp").unwrap_or_else(Utc::now),
            checked: bool_field(doc, "checked"),
        }
    }
}

fn str_field(doc: &Document, key: &str) -> String {
    doc.get(key)
        .and_then(Value::as_str)
        .unwrap_or_default()
        .to_owned()
}

fn bool_field(doc: &Document, key: &str) -> bool {
    doc.get(key).and_then(Value::as_bool).unwrap_or(false)
}

fn time_field(doc: &Document, key: &str) -> Option<DateTime<Utc>> {
    doc.get(key)
        .and_then(Value::as_str)
        .and_then(|s| DateTime::parse_from_rfc3339(s).ok())
        .map(|t| t.with_timezone(&Utc))
}

fn list_field(doc: &Document, key: &str) -> Vec<String> {
    doc.get(key)
        .and_then(Value::as_array)
        .map(|items| {
            items
                .iter()
                .filter_map(Value::as_str)
                .map(str::to_owned)
                .collect()
        })
        .unwrap_or_default()
}
