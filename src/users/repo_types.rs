use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use uuid::Uuid;

/// User record. Only `id` is guaranteed once the record has been saved.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize, FromRow)]
pub struct User {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub id: Option<Uuid>, // assigned by the store on first save
    #[serde(skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub email: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub token: Option<String>, // current bearer credential
}

impl User {
    #[cfg(test)]
    pub fn is_saved(&self) -> bool {
        self.id.is_some()
    }

    /// Non-empty email, the key used to deduplicate session users.
    pub fn email_key(&self) -> Option<&str> {
        self.email.as_deref().filter(|e| !e.is_empty())
    }

    pub fn token_key(&self) -> Option<&str> {
        self.token.as_deref().filter(|t| !t.is_empty())
    }
}
