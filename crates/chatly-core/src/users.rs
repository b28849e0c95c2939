//! User directory: registration, lookup, search and profile edits.

use chatly_shared::constants::SEARCH_LIMIT;
use chatly_shared::{Presence, UserId};
use chatly_store::{Store, User};
use serde::Deserialize;
use tracing::{info, warn};

use crate::error::{CoreError, Result};

/// Partial profile edit.  `None` fields are left untouched.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProfileUpdate {
    pub full_name: Option<String>,
    pub image: Option<String>,
}

#[derive(Clone)]
pub struct UserDirectory {
    store: Store,
}

impl UserDirectory {
    pub fn new(store: Store) -> Self {
        Self { store }
    }

    /// Create the profile for a freshly authenticated user.  The username
    /// is the lowercased local part of the email and must be unique.
    pub async fn register(&self, id: UserId, email: &str, full_name: &str) -> Result<User> {
        let email = email.trim().to_string();
        let username = username_from_email(&email)?;
        let full_name = full_name.trim().to_string();

        let user = self
            .store
            .write(move |b| -> Result<User> {
                let reader = b.reader();
                if reader.find_user(&id)?.is_some() {
                    return Err(CoreError::Conflict(format!("user {id} already registered")));
                }
                if reader.user_by_username(&username)?.is_some() {
                    return Err(CoreError::Conflict(format!(
                        "username {username} is taken"
                    )));
                }
                let now = b.now();
                let user = User {
                    id,
                    email,
                    username,
                    full_name,
                    image: None,
                    presence: Presence::Online,
                    last_seen: now,
                    created_at: now,
                };
                b.insert_user(&user)?;
                Ok(user)
            })
            .await?;
        info!(user = %user.id, username = %user.username, "user registered");
        Ok(user)
    }

    pub async fn get(&self, id: &UserId) -> Result<User> {
        let id = id.clone();
        self.store
            .read(move |r| -> Result<User> {
                r.find_user(&id)?
                    .ok_or_else(|| CoreError::NotFound(format!("user {id}")))
            })
            .await
    }

    /// Username prefix search.  Degrades to an empty list on store failure.
    pub async fn search(&self, prefix: &str) -> Vec<User> {
        let prefix = prefix.trim().to_lowercase();
        if prefix.is_empty() {
            return Vec::new();
        }
        let result: Result<Vec<User>> = self
            .store
            .read(move |r| Ok(r.search_users(&prefix, SEARCH_LIMIT)?))
            .await;
        result.unwrap_or_else(|e| {
            warn!(error = %e, "user search failed");
            Vec::new()
        })
    }

    pub async fn update_profile(&self, id: &UserId, update: ProfileUpdate) -> Result<User> {
        if let Some(name) = &update.full_name {
            if name.trim().is_empty() {
                return Err(CoreError::InvalidArgument("full name is empty".into()));
            }
        }
        let id = id.clone();
        self.store
            .write(move |b| -> Result<User> {
                let mut user = b
                    .reader()
                    .find_user(&id)?
                    .ok_or_else(|| CoreError::NotFound(format!("user {id}")))?;
                if let Some(name) = update.full_name {
                    user.full_name = name.trim().to_string();
                }
                if let Some(image) = update.image {
                    user.image = Some(image).filter(|s| !s.is_empty());
                }
                b.update_profile(&user.id, &user.full_name, user.image.as_deref())?;
                Ok(user)
            })
            .await
    }

    pub async fn set_presence(&self, id: &UserId, presence: Presence) -> Result<()> {
        let id = id.clone();
        self.store
            .write(move |b| -> Result<()> {
                if b.set_presence(&id, presence)? {
                    Ok(())
                } else {
                    Err(CoreError::NotFound(format!("user {id}")))
                }
            })
            .await
    }
}

fn username_from_email(email: &str) -> Result<String> {
    match email.split_once('@') {
        Some((local, domain)) if !local.is_empty() && !domain.is_empty() => {
            Ok(local.to_lowercase())
        }
        _ => Err(CoreError::InvalidArgument(format!("malformed email {email:?}"))),
    }
}
