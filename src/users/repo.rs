use async_trait::async_trait;
use sqlx::{postgres::PgPoolOptions, PgPool};
use tracing::{debug, warn};
use uuid::Uuid;

use crate::error::{StoreError, UniqueKey};
use crate::users::repo_types::User;

/// Persistent user storage with three independent point lookups.
///
/// Lookups return `Ok(None)` when nothing matches; an `Err` always means the
/// backend failed. `save` upserts by id, assigning a fresh id when the record
/// has none, and must update the email and token indexes in the same atomic
/// step as the id write. A write that would give a second user the same
/// non-empty email or token fails with [`StoreError::Conflict`].
#[async_trait]
pub trait UserStore: Send + Sync {
    async fn find_by_id(&self, id: Uuid) -> Result<Option<User>, StoreError>;
    async fn find_by_email(&self, email: &str) -> Result<Option<User>, StoreError>;
    async fn find_by_token(&self, token: &str) -> Result<Option<User>, StoreError>;
    async fn save(&self, user: User) -> Result<User, StoreError>;
    async fn close(&self) -> Result<(), StoreError>;
}

#[derive(Clone)]
pub struct PgUserStore {
    db: PgPool,
}

impl PgUserStore {
    pub async fn connect(database_url: &str) -> Result<Self, StoreError> {
        let db = PgPoolOptions::new()
            .max_connections(10)
            .connect(database_url)
            .await?;
        Ok(Self { db })
    }

    pub async fn migrate(&self) -> Result<(), StoreError> {
        sqlx::migrate!("./migrations")
            .run(&self.db)
            .await
            .map_err(|e| StoreError::Database(e.into()))
    }
}

#[async_trait]
impl UserStore for PgUserStore {
    async fn find_by_id(&self, id: Uuid) -> Result<Option<User>, StoreError> {
        let user = sqlx::query_as::<_, User>(
            r#"
            SELECT id, name, email, token
            FROM users
            WHERE id = $1
            "#,
        )
        .bind(id)
        .fetch_optional(&self.db)
        .await?;
        Ok(user)
    }

    async fn find_by_email(&self, email: &str) -> Result<Option<User>, StoreError> {
        if email.is_empty() {
            return Ok(None);
        }
        let user = sqlx::query_as::<_, User>(
            r#"
            SELECT id, name, email, token
            FROM users
            WHERE email = $1
            "#,
        )
        .bind(email)
        .fetch_optional(&self.db)
        .await?;
        Ok(user)
    }

    async fn find_by_token(&self, token: &str) -> Result<Option<User>, StoreError> {
        if token.is_empty() {
            return Ok(None);
        }
        let user = sqlx::query_as::<_, User>(
            r#"
            SELECT id, name, email, token
            FROM users
            WHERE token = $1
            "#,
        )
        .bind(token)
        .fetch_optional(&self.db)
        .await?;
        Ok(user)
    }

    async fn save(&self, user: User) -> Result<User, StoreError> {
        // One row carries every index, so the unique constraints make the
        // id/email/token update atomic.
        let id = user.id.unwrap_or_else(Uuid::new_v4);
        let saved = sqlx::query_as::<_, User>(
            r#"
            INSERT INTO users (id, name, email, token)
            VALUES ($1, $2, $3, $4)
            ON CONFLICT (id) DO UPDATE
               SET name = EXCLUDED.name,
                   email = EXCLUDED.email,
                   token = EXCLUDED.token
            RETURNING id, name, email, token
            "#,
        )
        .bind(id)
        .bind(user.name.as_deref().filter(|n| !n.is_empty()))
        .bind(user.email_key())
        .bind(user.token_key())
        .fetch_one(&self.db)
        .await
        .map_err(map_unique_violation)?;

        debug!(user_id = %id, "user saved");
        Ok(saved)
    }

    async fn close(&self) -> Result<(), StoreError> {
        self.db.close().await;
        Ok(())
    }
}

fn map_unique_violation(err: sqlx::Error) -> StoreError {
    if let sqlx::Error::Database(db) = &err {
        if db.is_unique_violation() {
            let key = match db.constraint() {
                Some(c) if c.contains("token") => Some(UniqueKey::Token),
                Some(c) if c.contains("email") => Some(UniqueKey::Email),
                _ => None,
            };
            if let Some(key) = key {
                warn!(%key, "unique constraint rejected user write");
                return StoreError::Conflict(key);
            }
        }
    }
    StoreError::Database(err)
}
