use std::collections::HashMap;

use async_trait::async_trait;
use parking_lot::RwLock;
use tracing::debug;
use uuid::Uuid;

use crate::error::{StoreError, UniqueKey};
use crate::users::repo::UserStore;
use crate::users::repo_types::User;

#[derive(Default)]
struct Indexes {
    by_id: HashMap<Uuid, User>,
    by_email: HashMap<String, Uuid>,
    by_token: HashMap<String, Uuid>,
}

/// In-process store. All three indexes sit behind one lock, so a save is
/// observed either entirely or not at all.
#[derive(Default)]
pub struct MemoryUserStore {
    inner: RwLock<Indexes>,
}

impl MemoryUserStore {
    pub fn new() -> Self {
        Self::default()
    }

    #[cfg(test)]
    pub fn len(&self) -> usize {
        self.inner.read().by_id.len()
    }

    fn lookup(&self, index: impl Fn(&Indexes) -> Option<Uuid>) -> Option<User> {
        let guard = self.inner.read();
        index(&*guard).and_then(|id| guard.by_id.get(&id).cloned())
    }
}

#[async_trait]
impl UserStore for MemoryUserStore {
    async fn find_by_id(&self, id: Uuid) -> Result<Option<User>, StoreError> {
        Ok(self.inner.read().by_id.get(&id).cloned())
    }

    async fn find_by_email(&self, email: &str) -> Result<Option<User>, StoreError> {
        Ok(self.lookup(|ix| ix.by_email.get(email).copied()))
    }

    async fn find_by_token(&self, token: &str) -> Result<Option<User>, StoreError> {
        Ok(self.lookup(|ix| ix.by_token.get(token).copied()))
    }

    async fn save(&self, mut user: User) -> Result<User, StoreError> {
        let id = *user.id.get_or_insert_with(Uuid::new_v4);
        let mut ix = self.inner.write();

        if let Some(email) = user.email_key() {
            if ix.by_email.get(email).is_some_and(|owner| *owner != id) {
                return Err(StoreError::Conflict(UniqueKey::Email));
            }
        }
        if let Some(token) = user.token_key() {
            if ix.by_token.get(token).is_some_and(|owner| *owner != id) {
                return Err(StoreError::Conflict(UniqueKey::Token));
            }
        }

        // Drop index entries of the previous version so a replaced token stops resolving.
        if let Some(previous) = ix.by_id.get(&id).cloned() {
            if let Some(email) = previous.email_key() {
                ix.by_email.remove(email);
            }
            if let Some(token) = previous.token_key() {
                ix.by_token.remove(token);
            }
        }

        if let Some(email) = user.email_key() {
            ix.by_email.insert(email.to_string(), id);
        }
        if let Some(token) = user.token_key() {
            ix.by_token.insert(token.to_string(), id);
        }
        ix.by_id.insert(id, user.clone());

        debug!(user_id = %id, "user saved");
        Ok(user)
    }

    async fn close(&self) -> Result<(), StoreError> {
        Ok(())
    }
}
