//! Identity resolution: decides who is making a request.
//!
//! Two credential channels are reconciled against the user store. The
//! bearer token header is always tried first and a match ends resolution.
//! Otherwise the provider credential held in the browser session is used:
//! the cached session profile is consulted, the profile is fetched from the
//! provider when needed, and the local user is looked up by email and,
//! depending on the caller, provisioned on first contact.

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use tracing::{debug, warn};

use crate::auth::profile::{Profile, ProfileFetcher};
use crate::auth::session::Session;
use crate::error::IdentityError;
use crate::users::repo::UserStore;
use crate::users::repo_types::User;
use crate::users::services::Provisioner;

/// Header carrying the raw hex bearer token.
pub const TOKEN_HEADER: &str = "X-SalsaFlow-Token";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Mode {
    /// Programmatic caller. Provisions only when the policy allows it.
    Api,
    /// Browser page. Always provisions on first contact.
    Page,
}

/// Outcome of a resolution. None of these is an error.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Identity {
    User(User),
    /// Authenticated by the provider, but no local user exists yet.
    Unprovisioned(Profile),
    Anonymous,
}

impl Identity {
    pub fn user(&self) -> Option<&User> {
        match self {
            Identity::User(user) => Some(user),
            _ => None,
        }
    }
}

/// Everything a request presents to identify itself.
#[derive(Debug, Clone, Default)]
pub struct Credentials {
    pub bearer_token: Option<String>,
    pub session: Option<Session>,
}

impl Credentials {
    /// Normalizes the raw header value; blank means no token.
    pub fn new(bearer_token: Option<&str>, session: Option<Session>) -> Self {
        let bearer_token = bearer_token
            .map(str::trim)
            .filter(|t| !t.is_empty())
            .map(str::to_string);
        Self {
            bearer_token,
            session,
        }
    }
}

#[derive(Debug, Clone, Copy)]
pub struct ResolverPolicy {
    pub api_auto_provision: bool,
    pub fetch_timeout: Duration,
    pub store_timeout: Duration,
}

impl Default for ResolverPolicy {
    fn default() -> Self {
        Self {
            api_auto_provision: false,
            fetch_timeout: Duration::from_secs(10),
            store_timeout: Duration::from_secs(5),
        }
    }
}

pub struct IdentityResolver {
    store: Arc<dyn UserStore>,
    fetcher: Arc<dyn ProfileFetcher>,
    provisioner: Provisioner,
    policy: ResolverPolicy,
}

impl IdentityResolver {
    pub fn new(
        store: Arc<dyn UserStore>,
        fetcher: Arc<dyn ProfileFetcher>,
        policy: ResolverPolicy,
    ) -> Self {
        Self {
            provisioner: Provisioner::new(store.clone()),
            store,
            fetcher,
            policy,
        }
    }

    pub async fn resolve(
        &self,
        credentials: &Credentials,
        mode: Mode,
    ) -> Result<Identity, IdentityError> {
        let provision = match mode {
            Mode::Page => true,
            Mode::Api => self.policy.api_auto_provision,
        };
        self.resolve_with(credentials, provision).await
    }

    #[allow(dead_code)]
    pub async fn resolve_provisioning(
        &self,
        credentials: &Credentials,
    ) -> Result<Identity, IdentityError> {
        self.resolve_with(credentials, true).await
    }

    /// Never creates a user; a provider-authenticated stranger comes back as
    /// [`Identity::Unprovisioned`].
    pub async fn resolve_without_provisioning(
        &self,
        credentials: &Credentials,
    ) -> Result<Identity, IdentityError> {
        self.resolve_with(credentials, false).await
    }

    async fn resolve_with(
        &self,
        credentials: &Credentials,
        provision: bool,
    ) -> Result<Identity, IdentityError> {
        if let Some(token) = credentials.bearer_token.as_deref() {
            let found = self
                .store_op("find user by token", self.store.find_by_token(token))
                .await?;
            if let Some(user) = found {
                debug!(user_id = ?user.id, "resolved by token");
                return Ok(Identity::User(user));
            }
            debug!("token did not match any user");
        }

        let Some(session) = credentials.session.as_ref() else {
            return Ok(Identity::Anonymous);
        };

        let credential = match session.credential() {
            Some(credential) if credential.is_valid() => credential,
            _ => {
                session.clear_profile();
                return Ok(Identity::Anonymous);
            }
        };

        if let Some(cached) = session.profile() {
            let found = self
                .store_op("find user by email", self.store.find_by_email(&cached.email))
                .await?;
            if let Some(user) = found {
                debug!(user_id = ?user.id, "resolved by cached profile");
                return Ok(Identity::User(user));
            }
            debug!(email = %cached.email, "cached profile has no user yet");
        }

        let profile = within(
            self.policy.fetch_timeout,
            "profile fetch",
            self.fetcher.fetch(&credential),
        )
        .await?;
        session.set_profile(profile.clone());

        let found = self
            .store_op("find user by email", self.store.find_by_email(&profile.email))
            .await?;
        if let Some(user) = found {
            debug!(user_id = ?user.id, "resolved by fetched profile");
            return Ok(Identity::User(user));
        }

        if !provision {
            debug!(email = %profile.email, "provider identity without local user");
            return Ok(Identity::Unprovisioned(profile));
        }

        let user = self
            .store_op("provision user", self.provisioner.provision(&profile))
            .await?;
        Ok(Identity::User(user))
    }

    pub async fn find_user(&self, id: uuid::Uuid) -> Result<Option<User>, IdentityError> {
        self.store_op("find user by id", self.store.find_by_id(id))
            .await
    }

    pub async fn regenerate_token(&self, user: User) -> Result<User, IdentityError> {
        self.store_op("regenerate token", self.provisioner.regenerate_token(user))
            .await
    }

    async fn store_op<T, E, F>(&self, op: &'static str, fut: F) -> Result<T, IdentityError>
    where
        F: Future<Output = Result<T, E>>,
        IdentityError: From<E>,
    {
        within(self.policy.store_timeout, op, fut).await
    }
}

async fn within<T, E, F>(limit: Duration, op: &'static str, fut: F) -> Result<T, IdentityError>
where
    F: Future<Output = Result<T, E>>,
    IdentityError: From<E>,
{
    match tokio::time::timeout(limit, fut).await {
        Ok(result) => result.map_err(IdentityError::from),
        Err(_) => {
            warn!(op, timeout_ms = limit.as_millis() as u64, "operation timed out");
            Err(IdentityError::Timeout(op))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::auth::profile::testing::StubFetcher;
    use crate::auth::session::{ProviderCredential, SessionStore};
    use crate::error::{FetchError, StoreError};
    use crate::users::memory::testing::CountingStore;
    use async_trait::async_trait;
    use time::OffsetDateTime;

    struct Harness {
        store: Arc<CountingStore>,
        fetcher: Arc<StubFetcher>,
        sessions: Arc<SessionStore>,
        resolver: IdentityResolver,
    }

    fn harness_with(fetcher: StubFetcher, policy: ResolverPolicy) -> Harness {
        let store = Arc::new(CountingStore::default());
        let fetcher = Arc::new(fetcher);
        let resolver = IdentityResolver::new(store.clone(), fetcher.clone(), policy);
        Harness {
            store,
            fetcher,
            sessions: SessionStore::new(60),
            resolver,
        }
    }

    fn harness() -> Harness {
        harness_with(
            StubFetcher::returning("Ada", "ada@example.com"),
            ResolverPolicy::default(),
        )
    }

    fn live_session(h: &Harness) -> Session {
        let session = h.sessions.create().unwrap();
        session.set_credential(Some(ProviderCredential::new(
            "provider-token",
            Some(OffsetDateTime::now_utc() + time::Duration::hours(1)),
        )));
        session
    }

    fn expired_session(h: &Harness) -> Session {
        let session = h.sessions.create().unwrap();
        session.set_credential(Some(ProviderCredential::new(
            "provider-token",
            Some(OffsetDateTime::now_utc() - time::Duration::minutes(1)),
        )));
        session
    }

    async fn seed(h: &Harness, email: &str, token: &str) -> User {
        h.store
            .inner
            .save(User {
                name: None,
                email: Some(email.into()),
                token: Some(token.into()),
                id: None,
            })
            .await
            .unwrap()
    }

    #[tokio::test]
    async fn token_match_short_circuits_the_session_channel() {
        let h = harness();
        let u1 = seed(&h, "u1@example.com", "abc123").await;
        seed(&h, "ada@example.com", "other").await;
        let session = live_session(&h);
        session.set_profile(Profile {
            name: "Ada".into(),
            email: "ada@example.com".into(),
        });

        let creds = Credentials::new(Some("abc123"), Some(session));
        let identity = h.resolver.resolve(&creds, Mode::Api).await.unwrap();

        assert_eq!(identity, Identity::User(u1));
        assert_eq!(h.fetcher.calls(), 0);
        assert_eq!(h.store.saves(), 0);
    }

    #[tokio::test]
    async fn no_credentials_means_anonymous_without_side_effects() {
        let h = harness();

        let none = Credentials::new(None, None);
        assert_eq!(h.resolver.resolve(&none, Mode::Page).await.unwrap(), Identity::Anonymous);

        let blank = Credentials::new(Some("   "), Some(h.sessions.create().unwrap()));
        assert_eq!(h.resolver.resolve(&blank, Mode::Page).await.unwrap(), Identity::Anonymous);

        assert_eq!(h.fetcher.calls(), 0);
        assert_eq!(h.store.saves(), 0);
    }

    #[tokio::test]
    async fn unknown_token_and_dead_credential_is_anonymous() {
        let h = harness();
        let session = expired_session(&h);
        session.set_profile(Profile {
            name: "Ada".into(),
            email: "ada@example.com".into(),
        });

        let creds = Credentials::new(Some("doesnotexist"), Some(session.clone()));
        let identity = h.resolver.resolve(&creds, Mode::Page).await.unwrap();

        assert_eq!(identity, Identity::Anonymous);
        assert_eq!(session.profile(), None, "stale profile must be cleared");
        assert_eq!(h.fetcher.calls(), 0);
        assert_eq!(h.store.saves(), 0);
    }

    #[tokio::test]
    async fn first_contact_provisions_and_follow_up_reuses_cache() {
        let h = harness();
        let session = live_session(&h);
        let creds = Credentials::new(None, Some(session.clone()));

        let first = h.resolver.resolve(&creds, Mode::Page).await.unwrap();
        let user = first.user().cloned().expect("user provisioned");
        assert_eq!(user.email.as_deref(), Some("ada@example.com"));
        let token = user.token.clone().unwrap();
        assert_eq!(token.len(), 32);
        assert!(token.chars().all(|c| c.is_ascii_hexdigit() && !c.is_ascii_uppercase()));
        assert_eq!(h.store.inner.len(), 1);

        let second = h.resolver.resolve(&creds, Mode::Page).await.unwrap();
        assert_eq!(second.user().and_then(|u| u.id), user.id);
        assert_eq!(h.fetcher.calls(), 1);
        assert_eq!(h.store.saves(), 1);
    }

    #[tokio::test]
    async fn existing_user_is_found_with_a_single_fetch() {
        let h = harness();
        let ada = seed(&h, "ada@example.com", "t0").await;
        let creds = Credentials::new(None, Some(live_session(&h)));

        let a = h.resolver.resolve(&creds, Mode::Page).await.unwrap();
        let b = h.resolver.resolve(&creds, Mode::Page).await.unwrap();

        assert_eq!(a, Identity::User(ada.clone()));
        assert_eq!(b, Identity::User(ada));
        assert_eq!(h.fetcher.calls(), 1);
        assert_eq!(h.store.saves(), 0);
    }

    #[tokio::test]
    async fn api_mode_reports_unprovisioned_without_policy() {
        let h = harness();
        let session = live_session(&h);
        let creds = Credentials::new(None, Some(session.clone()));

        let identity = h.resolver.resolve(&creds, Mode::Api).await.unwrap();
        assert_eq!(
            identity,
            Identity::Unprovisioned(Profile {
                name: "Ada".into(),
                email: "ada@example.com".into(),
            })
        );
        assert_eq!(h.store.saves(), 0);
        assert!(session.profile().is_some(), "fetched profile is cached");
    }

    #[tokio::test]
    async fn api_mode_provisions_when_policy_allows() {
        let h = harness_with(
            StubFetcher::returning("Ada", "ada@example.com"),
            ResolverPolicy {
                api_auto_provision: true,
                ..ResolverPolicy::default()
            },
        );
        let creds = Credentials::new(None, Some(live_session(&h)));

        let identity = h.resolver.resolve(&creds, Mode::Api).await.unwrap();
        assert!(identity.user().is_some());
        assert_eq!(h.store.saves(), 1);
    }

    #[tokio::test]
    async fn explicit_variants_ignore_the_mode_policy() {
        let h = harness();
        let creds = Credentials::new(None, Some(live_session(&h)));

        let held = h.resolver.resolve_without_provisioning(&creds).await.unwrap();
        assert!(matches!(held, Identity::Unprovisioned(_)));

        let created = h.resolver.resolve_provisioning(&creds).await.unwrap();
        assert!(created.user().is_some());
        assert_eq!(h.store.saves(), 1);
    }

    #[tokio::test]
    async fn fetch_failure_propagates_and_caches_nothing() {
        let h = harness_with(StubFetcher::failing(), ResolverPolicy::default());
        let session = live_session(&h);
        let creds = Credentials::new(None, Some(session.clone()));

        let err = h.resolver.resolve(&creds, Mode::Page).await.unwrap_err();
        assert!(matches!(err, IdentityError::Upstream(FetchError::Status(500))));
        assert_eq!(session.profile(), None);
        assert_eq!(h.store.saves(), 0);
    }

    struct SlowFetcher;

    #[async_trait]
    impl ProfileFetcher for SlowFetcher {
        async fn fetch(&self, _credential: &ProviderCredential) -> Result<Profile, FetchError> {
            tokio::time::sleep(Duration::from_secs(5)).await;
            Err(FetchError::MissingEmail)
        }
    }

    #[tokio::test]
    async fn slow_fetch_times_out_as_retryable() {
        let store = Arc::new(CountingStore::default());
        let resolver = IdentityResolver::new(
            store,
            Arc::new(SlowFetcher),
            ResolverPolicy {
                fetch_timeout: Duration::from_millis(20),
                ..ResolverPolicy::default()
            },
        );
        let sessions = SessionStore::new(60);
        let session = sessions.create().unwrap();
        session.set_credential(Some(ProviderCredential::new("provider-token", None)));

        let err = resolver
            .resolve(&Credentials::new(None, Some(session)), Mode::Page)
            .await
            .unwrap_err();
        assert!(matches!(err, IdentityError::Timeout("profile fetch")));
        assert!(err.is_retryable());
    }

    struct SlowStore;

    #[async_trait]
    impl UserStore for SlowStore {
        async fn find_by_id(&self, _id: uuid::Uuid) -> Result<Option<User>, StoreError> {
            Ok(None)
        }

        async fn find_by_email(&self, _email: &str) -> Result<Option<User>, StoreError> {
            Ok(None)
        }

        async fn find_by_token(&self, _token: &str) -> Result<Option<User>, StoreError> {
            tokio::time::sleep(Duration::from_secs(5)).await;
            Ok(None)
        }

        async fn save(&self, user: User) -> Result<User, StoreError> {
            Ok(user)
        }

        async fn close(&self) -> Result<(), StoreError> {
            Ok(())
        }
    }

    #[tokio::test]
    async fn slow_store_times_out_as_retryable() {
        let fetcher = Arc::new(StubFetcher::returning("Ada", "ada@example.com"));
        let resolver = IdentityResolver::new(
            Arc::new(SlowStore),
            fetcher.clone(),
            ResolverPolicy {
                store_timeout: Duration::from_millis(20),
                ..ResolverPolicy::default()
            },
        );

        let err = resolver
            .resolve(&Credentials::new(Some("abc123"), None), Mode::Api)
            .await
            .unwrap_err();
        assert!(matches!(err, IdentityError::Timeout("find user by token")));
        assert!(err.is_retryable());
        assert_eq!(fetcher.calls(), 0);
    }
}
