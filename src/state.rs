use std::sync::Arc;

use anyhow::Context;
use tracing::info;

use crate::auth::identity::{IdentityResolver, ResolverPolicy};
use crate::auth::oauth::{AuthPaths, OAuthError, OAuthFlow};
use crate::auth::profile::{HttpProfileFetcher, ProfileFetcher};
use crate::auth::session::SessionStore;
use crate::config::AppConfig;
use crate::users::memory::MemoryUserStore;
use crate::users::repo::{PgUserStore, UserStore};

#[derive(Clone)]
pub struct AppState {
    pub config: Arc<AppConfig>,
    pub store: Arc<dyn UserStore>,
    pub sessions: Arc<SessionStore>,
    pub resolver: Arc<IdentityResolver>,
    pub oauth: Arc<OAuthFlow>,
}

impl AppState {
    pub async fn init() -> anyhow::Result<Self> {
        let config = AppConfig::from_env().context("load configuration")?;
        let store = open_store(&config.database_url).await?;
        let fetcher = Arc::new(
            HttpProfileFetcher::new(config.oauth.userinfo_url.clone())
                .context("build profile fetcher")?,
        );
        Self::from_parts(config, store, fetcher).context("build oauth2 client")
    }

    pub fn from_parts(
        config: AppConfig,
        store: Arc<dyn UserStore>,
        fetcher: Arc<dyn ProfileFetcher>,
    ) -> Result<Self, OAuthError> {
        let policy = ResolverPolicy {
            api_auto_provision: config.api_auto_provision,
            fetch_timeout: config.fetch_timeout,
            store_timeout: config.store_timeout,
        };
        let resolver = Arc::new(IdentityResolver::new(store.clone(), fetcher, policy));
        let oauth = Arc::new(OAuthFlow::new(&config.oauth, AuthPaths::default())?);
        let sessions = SessionStore::new(config.session_ttl_minutes);

        Ok(Self {
            config: Arc::new(config),
            store,
            sessions,
            resolver,
            oauth,
        })
    }
}

/// `memory://` keeps users in process; anything else is a PostgreSQL URL.
async fn open_store(database_url: &str) -> anyhow::Result<Arc<dyn UserStore>> {
    if database_url.starts_with("memory:") {
        info!("using in-memory user store");
        return Ok(Arc::new(MemoryUserStore::new()));
    }

    let store = PgUserStore::connect(database_url)
        .await
        .context("connect to database")?;
    store.migrate().await.context("run migrations")?;
    info!("using postgres user store");
    Ok(Arc::new(store))
}

#[cfg(test)]
impl AppState {
    pub fn fake() -> Self {
        use crate::auth::profile::testing::StubFetcher;

        Self::fake_with(
            Arc::new(MemoryUserStore::new()),
            Arc::new(StubFetcher::returning("Ada", "ada@example.com")),
            false,
        )
    }

    pub fn fake_with(
        store: Arc<dyn UserStore>,
        fetcher: Arc<dyn ProfileFetcher>,
        api_auto_provision: bool,
    ) -> Self {
        let lookup = |name: &str| -> Option<String> {
            let value = match name {
                "DATABASE_URL" => "memory://",
                "OAUTH2_CLIENT_ID" => "test-client",
                "OAUTH2_CLIENT_SECRET" => "test-secret",
                "OAUTH2_REDIRECT_URL" => "http://localhost:8080/auth/google/callback",
                "ROOT_DIR" => ".",
                "API_AUTO_PROVISION" if api_auto_provision => "true",
                _ => return None,
            };
            Some(value.to_string())
        };
        let config = AppConfig::from_lookup(lookup).expect("test config is complete");
        Self::from_parts(config, store, fetcher).expect("test oauth2 client builds")
    }
}
