use std::collections::HashMap;
use std::sync::Arc;

use axum_extra::extract::cookie::{Cookie, SameSite};
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use time::{Duration, OffsetDateTime};
use tracing::debug;

use crate::auth::profile::Profile;
use crate::error::TokenError;
use crate::users::token::generate_token;

pub const SESSION_COOKIE: &str = "salsaflow_session";

/// OAuth token obtained from the provider login flow.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProviderCredential {
    pub access_token: String,
    pub expires_at: Option<OffsetDateTime>,
}

impl ProviderCredential {
    pub fn new(access_token: impl Into<String>, expires_at: Option<OffsetDateTime>) -> Self {
        Self {
            access_token: access_token.into(),
            expires_at,
        }
    }

    pub fn is_valid(&self) -> bool {
        !self.access_token.is_empty()
            && self
                .expires_at
                .map_or(true, |exp| exp > OffsetDateTime::now_utc())
    }
}

/// State carried between the login redirect and the provider callback.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PendingLogin {
    pub csrf_state: String,
    pub pkce_verifier: String,
    pub next: String,
}

#[derive(Debug, Clone)]
struct SessionData {
    credential: Option<ProviderCredential>,
    profile: Option<Profile>,
    pending_login: Option<PendingLogin>,
    expires_at: OffsetDateTime,
}

/// Server-side session storage keyed by the id in the session cookie.
pub struct SessionStore {
    ttl: Duration,
    sessions: RwLock<HashMap<String, SessionData>>,
}

impl SessionStore {
    pub fn new(ttl_minutes: i64) -> Arc<Self> {
        Arc::new(Self {
            ttl: Duration::minutes(ttl_minutes),
            sessions: RwLock::new(HashMap::new()),
        })
    }

    pub fn create(self: &Arc<Self>) -> Result<Session, TokenError> {
        let id = generate_token()?;
        let now = OffsetDateTime::now_utc();
        let data = SessionData {
            credential: None,
            profile: None,
            pending_login: None,
            expires_at: now + self.ttl,
        };

        let mut map = self.sessions.write();
        let before = map.len();
        map.retain(|_, d| d.expires_at > now);
        if map.len() < before {
            debug!(swept = before - map.len(), "expired sessions swept");
        }
        map.insert(id.clone(), data);
        drop(map);

        debug!("session created");
        Ok(Session {
            id,
            store: Arc::clone(self),
        })
    }

    /// Moves the session's state under a fresh id and forgets the old one.
    /// Called when the session changes privilege, so a planted id stays anonymous.
    pub fn renew(self: &Arc<Self>, session: &Session) -> Result<Session, TokenError> {
        let id = generate_token()?;
        let expires_at = OffsetDateTime::now_utc() + self.ttl;

        let mut map = self.sessions.write();
        let data = match map.remove(session.id()) {
            Some(old) => SessionData {
                pending_login: None,
                expires_at,
                ..old
            },
            None => SessionData {
                credential: None,
                profile: None,
                pending_login: None,
                expires_at,
            },
        };
        map.insert(id.clone(), data);
        drop(map);

        debug!("session id renewed");
        Ok(Session {
            id,
            store: Arc::clone(self),
        })
    }

    /// Returns the live session for `id`; expired sessions are dropped on access.
    pub fn load(self: &Arc<Self>, id: &str) -> Option<Session> {
        let now = OffsetDateTime::now_utc();
        let alive = {
            let map = self.sessions.read();
            map.get(id).map(|data| data.expires_at > now)
        };
        match alive {
            Some(true) => Some(Session {
                id: id.to_string(),
                store: Arc::clone(self),
            }),
            Some(false) => {
                self.sessions.write().remove(id);
                debug!("expired session dropped");
                None
            }
            None => None,
        }
    }

    pub fn destroy(&self, id: &str) -> bool {
        self.sessions.write().remove(id).is_some()
    }

    #[cfg(test)]
    pub fn len(&self) -> usize {
        self.sessions.read().len()
    }

    fn read<R>(&self, id: &str, f: impl FnOnce(&SessionData) -> R) -> Option<R> {
        self.sessions.read().get(id).map(f)
    }

    fn update<R>(&self, id: &str, f: impl FnOnce(&mut SessionData) -> R) -> Option<R> {
        self.sessions.write().get_mut(id).map(f)
    }
}

/// Handle to one browser session with typed accessors.
///
/// Writes to a session destroyed in the meantime are silently dropped.
#[derive(Clone)]
pub struct Session {
    id: String,
    store: Arc<SessionStore>,
}

impl std::fmt::Debug for Session {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Session").finish_non_exhaustive()
    }
}

impl Session {
    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn credential(&self) -> Option<ProviderCredential> {
        self.store
            .read(&self.id, |d| d.credential.clone())
            .flatten()
    }

    pub fn set_credential(&self, credential: Option<ProviderCredential>) {
        self.store.update(&self.id, |d| d.credential = credential);
    }

    pub fn profile(&self) -> Option<Profile> {
        self.store.read(&self.id, |d| d.profile.clone()).flatten()
    }

    pub fn set_profile(&self, profile: Profile) {
        self.store.update(&self.id, |d| d.profile = Some(profile));
    }

    pub fn clear_profile(&self) {
        self.store.update(&self.id, |d| d.profile = None);
    }

    pub fn begin_login(&self, pending: PendingLogin) {
        self.store
            .update(&self.id, |d| d.pending_login = Some(pending));
    }

    pub fn take_pending_login(&self) -> Option<PendingLogin> {
        self.store
            .update(&self.id, |d| d.pending_login.take())
            .flatten()
    }
}

pub fn session_cookie(id: &str, secure: bool) -> Cookie<'static> {
    Cookie::build((SESSION_COOKIE, id.to_string()))
        .path("/")
        .http_only(true)
        .same_site(SameSite::Lax)
        .secure(secure)
        .build()
}

pub fn removal_cookie() -> Cookie<'static> {
    Cookie::build(SESSION_COOKIE).path("/").build()
}
