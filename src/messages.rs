// src/messages.rs
//! Intents the presentation layer sends to the controller.

/// All requests a chat view can make. State only ever changes through these;
/// the view itself holds nothing but input-field ephemera.
#[derive(Debug, Clone)]
pub enum ChatIntent {
    /// Open (or lazily create) the conversation with this user.
    SelectUser(String),
    /// Send the given text into the active conversation.
    SendMessage(String),
    /// Leave the active conversation, keep the list subscriptions.
    GoBack,
    /// Edit the current user's own profile document.
    SaveProfile {
        firstname: String,
        lastname: String,
        profilepic: String,
    },
    /// The page became visible (true) or hidden (false); presence follows.
    VisibilityChanged(bool),
    /// Dismiss the transient error message.
    ClearError,
    /// End the session: tear down subscriptions, go offline.
    SignOut,
}
