use std::sync::Arc;

use tracing::{info, warn};

use crate::auth::profile::Profile;
use crate::error::{IdentityError, StoreError, UniqueKey};
use crate::users::repo::UserStore;
use crate::users::repo_types::User;
use crate::users::token::generate_token;

/// Creates local user records for provider-authenticated profiles.
#[derive(Clone)]
pub struct Provisioner {
    store: Arc<dyn UserStore>,
}

impl Provisioner {
    pub fn new(store: Arc<dyn UserStore>) -> Self {
        Self { store }
    }

    /// Creates the user for `profile` with a fresh token.
    ///
    /// If a user with that email already exists, or another request creates one
    /// first and the store rejects this write, the existing record is returned.
    pub async fn provision(&self, profile: &Profile) -> Result<User, IdentityError> {
        if let Some(existing) = self.store.find_by_email(&profile.email).await? {
            return Ok(existing);
        }

        let user = User {
            id: None,
            name: Some(profile.name.clone()).filter(|n| !n.is_empty()),
            email: Some(profile.email.clone()),
            token: Some(generate_token()?),
        };

        match self.store.save(user).await {
            Ok(saved) => {
                info!(user_id = ?saved.id, email = %profile.email, "user provisioned");
                Ok(saved)
            }
            Err(StoreError::Conflict(UniqueKey::Email)) => {
                warn!(email = %profile.email, "user provisioned concurrently, using stored record");
                self.store
                    .find_by_email(&profile.email)
                    .await?
                    .ok_or(IdentityError::Store(StoreError::Conflict(UniqueKey::Email)))
            }
            Err(e) => Err(e.into()),
        }
    }

    /// Replaces the user's bearer token and persists it.
    pub async fn regenerate_token(&self, mut user: User) -> Result<User, IdentityError> {
        user.token = Some(generate_token()?);
        let saved = self.store.save(user).await?;
        info!(user_id = ?saved.id, "token regenerated");
        Ok(saved)
    }
}
