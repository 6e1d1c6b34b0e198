// src/auth.rs
//! Credential validation and the user-facing auth error surface.
//!
//! Validation failures are rejected synchronously, before any remote call.
//! Backend failures come back as the same [`AuthError`] taxonomy so the
//! presentation layer only ever shows one short message per failure.

use serde_json::Value;
use thiserror::Error;
use tracing::error;

use crate::gateway::{server_timestamp, CollectionPath, Document, RemoteGateway};

/// Avatar assigned to freshly registered accounts.
pub const DEFAULT_AVATAR: &str = "https://static.vecteezy.com/system/resources/thumbnails/009/292/244/small_2x/default-avatar-icon-of-social-media-user-vector.jpg";

pub const MIN_PASSWORD_LEN: usize = 6;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum AuthError {
    #[error("All fields need to be filled.")]
    MissingFields,
    #[error("Password needs to be 6 or more letters")]
    WeakPassword,
    #[error("This email is already registered.")]
    EmailInUse,
    #[error("The email address is not valid.")]
    InvalidEmail,
    #[error("Email or password is incorrect.")]
    InvalidCredentials,
    #[error("Something went wrong. Please try again.")]
    Other,
}

/// What the registration form submits.
#[derive(Debug, Clone)]
pub struct Registration {
    pub firstname: String,
    pub lastname: String,
    pub email: String,
    pub password: String,
}

impl Registration {
    pub fn validate(&self) -> Result<(), AuthError> {
        let fields = [&self.firstname, &self.lastname, &self.email, &self.password];
        if fields.iter().any(|f| f.trim().is_empty()) {
            return Err(AuthError::MissingFields);
        }
        if self.password.len() < MIN_PASSWORD_LEN {
            return Err(AuthError::WeakPassword);
        }
        Ok(())
    }
}

/// Creates the account and its `users/{uid}` profile document.
pub async fn register(gateway: &dyn RemoteGateway, reg: &Registration) -> Result<String, AuthError> {
    reg.validate()?;
    let uid = gateway.sign_up(reg.email.trim(), &reg.password).await?;

    let mut profile = Document::new();
    profile.insert("firstname".into(), Value::String(reg.firstname.clone()));
    profile.insert("lastname".into(), Value::String(reg.lastname.clone()));
    profile.insert("email".into(), Value::String(reg.email.trim().to_owned()));
    profile.insert("lastseen".into(), server_timestamp());
    profile.insert("profilepic".into(), Value::String(DEFAULT_AVATAR.to_owned()));
    profile.insert("checked".into(), Value::Bool(false));

    gateway
        .set(&CollectionPath::Users, &uid, profile)
        .await
        .map_err(|err| {
            error!(%err, %uid, "profile document write failed after sign-up");
            AuthError::Other
        })?;
    Ok(uid)
}

/// Signs an existing account in, yielding its identity.
pub async fn login(
    gateway: &dyn RemoteGateway,
    email: &str,
    password: &str,
) -> Result<String, AuthError> {
    if email.trim().is_empty() || password.is_empty() {
        return Err(AuthError::MissingFields);
    }
    gateway.sign_in(email.trim(), password).await
}
