// src/lib.rs
//! duochat: the synchronization core of a one-to-one messaging app.
//!
//! Persistence, authentication and real-time delivery belong to an external
//! platform reached through the [`gateway::RemoteGateway`] seam. This crate
//! keeps a typed local mirror of that platform's collections (`controller`),
//! maps its raw documents into domain records (`models`), and ships an
//! in-memory emulation of the platform (`memory`) for tests and the demo.

pub mod auth;
pub mod controller;
pub mod gateway;
pub mod memory;
pub mod messages;
pub mod models;

pub use auth::{AuthError, Registration};
pub use controller::{ChatController, ChatHandle, ChatState};
pub use gateway::{
    AuthState, CollectionPath, Document, GatewayError, RemoteGateway, Snapshot, SnapshotOrder,
    Subscription,
};
pub use messages::ChatIntent;
pub use models::{Conversation, Message, User};
