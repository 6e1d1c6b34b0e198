// src/demo.rs
//! Scripted two-account demo against the in-memory gateway.
//!
//! Registers two users, runs both controllers through a short exchange and
//! prints the resulting state transitions. Ctrl-C tears the sessions down
//! gracefully (presence offline, subscriptions cancelled).

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{mpsc, watch};
use tokio::time::timeout;
use tracing::info;

use duochat::auth::{self, Registration};
use duochat::controller::{ChatController, ChatHandle, ChatState};
use duochat::gateway::RemoteGateway;
use duochat::memory::MemoryGateway;
use duochat::messages::ChatIntent;

fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info,duochat=debug")),
        )
        .init();

    let (shutdown_tx, shutdown_rx) = mpsc::unbounded_channel();
    ctrlc::set_handler(move || {
        let _ = shutdown_tx.send(());
    })
    .ok(); // Ignore error if already set

    let runtime = tokio::runtime::Runtime::new().expect("tokio runtime");
    runtime.block_on(run(shutdown_rx));
}

async fn run(mut shutdown: mpsc::UnboundedReceiver<()>) {
    tokio::select! {
        _ = script() => info!("demo finished"),
        _ = shutdown.recv() => info!("interrupted, shutting down"),
    }
}

async fn script() {
    let gateway = MemoryGateway::new();
    let shared: Arc<dyn RemoteGateway> = Arc::new(gateway.clone());

    let mut auth_events = gateway.auth_changes();
    tokio::spawn(async move {
        while let Some(state) = auth_events.next().await {
            info!(?state, "auth state changed");
        }
    });

    let alice = auth::register(
        &gateway,
        &Registration {
            firstname: "Alice".into(),
            lastname: "Turing".into(),
            email: "alice@example.com".into(),
            password: "machine".into(),
        },
    )
    .await
    .expect("register alice");
    let bob = auth::register(
        &gateway,
        &Registration {
            firstname: "Bob".into(),
            lastname: "Church".into(),
            email: "bob@example.com".into(),
            password: "lambda!".into(),
        },
    )
    .await
    .expect("register bob");
    info!(%alice, %bob, "accounts registered");

    let alice_session = ChatController::spawn(shared.clone(), alice.clone());
    let bob_session = ChatController::spawn(shared, bob.clone());

    let mut alice_state = alice_session.watch();
    let mut bob_state = bob_session.watch();
    wait_for(&mut alice_state, |s| !s.loading_users && s.users.len() == 1).await;
    wait_for(&mut bob_state, |s| !s.loading_users && s.users.len() == 1).await;

    alice_session.send(ChatIntent::SelectUser(bob.clone()));
    wait_for(&mut alice_state, |s| s.selected_conv.is_some()).await;
    alice_session.send(ChatIntent::SendMessage("hi bob".into()));

    bob_session.send(ChatIntent::SelectUser(alice.clone()));
    wait_for(&mut bob_state, |s| {
        s.messages.iter().any(|m| m.text == "hi bob")
    })
    .await;
    bob_session.send(ChatIntent::SendMessage("hey alice".into()));

    let transcript = wait_for(&mut alice_state, |s| {
        s.messages.iter().any(|m| m.text == "hey alice")
    })
    .await;
    for message in &transcript.messages {
        let who = if message.sender_id == alice { "alice" } else { "bob" };
        info!(from = who, text = %message.text, read = message.checked, "message");
    }

    print_sessions(&alice_session, &bob_session);
    alice_session.shutdown().await;
    bob_session.shutdown().await;
}

fn print_sessions(alice: &ChatHandle, bob: &ChatHandle) {
    for (name, handle) in [("alice", alice), ("bob", bob)] {
        let state = handle.state();
        info!(
            session = name,
            conversations = state.conversations.len(),
            preview = %state
                .conversations
                .first()
                .map(|c| c.last_message.clone())
                .unwrap_or_default(),
            "session state"
        );
    }
}

async fn wait_for(
    rx: &mut watch::Receiver<ChatState>,
    mut pred: impl FnMut(&ChatState) -> bool,
) -> ChatState {
    timeout(Duration::from_secs(5), async {
        loop {
            let state = rx.borrow_and_update().clone();
            if pred(&state) {
                return state;
            }
            rx.changed().await.expect("controller gone");
        }
    })
    .await
    .expect("demo step timed out")
}
