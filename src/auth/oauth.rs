use oauth2::{
    basic::BasicClient, AuthUrl, AuthorizationCode, ClientId, ClientSecret, CsrfToken,
    EndpointNotSet, EndpointSet, PkceCodeChallenge, PkceCodeVerifier, RedirectUrl, Scope,
    TokenResponse, TokenUrl,
};
use thiserror::Error;
use time::OffsetDateTime;
use tracing::{debug, error};

use crate::auth::session::{PendingLogin, ProviderCredential};
use crate::config::OAuthConfig;

type ProviderClient =
    BasicClient<EndpointSet, EndpointNotSet, EndpointNotSet, EndpointNotSet, EndpointSet>;

#[derive(Debug, Error)]
pub enum OAuthError {
    #[error("invalid oauth2 url: {0}")]
    InvalidUrl(#[from] oauth2::url::ParseError),

    #[error("http client: {0}")]
    Http(#[from] reqwest::Error),

    #[error("code exchange failed: {0}")]
    Exchange(String),
}

/// Route paths of the provider login flow, fixed when the router is built.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AuthPaths {
    pub login: String,
    pub logout: String,
    pub callback: String,
    pub error: String,
}

impl Default for AuthPaths {
    fn default() -> Self {
        Self {
            login: "/auth/google/login".into(),
            logout: "/auth/google/logout".into(),
            callback: "/auth/google/callback".into(),
            error: "/auth/google/error".into(),
        }
    }
}

pub struct OAuthFlow {
    client: ProviderClient,
    http: reqwest::Client,
    scopes: Vec<String>,
    paths: AuthPaths,
}

impl OAuthFlow {
    pub fn new(config: &OAuthConfig, paths: AuthPaths) -> Result<Self, OAuthError> {
        let client = BasicClient::new(ClientId::new(config.client_id.clone()))
            .set_client_secret(ClientSecret::new(config.client_secret.clone()))
            .set_auth_uri(AuthUrl::new(config.auth_url.clone())?)
            .set_token_uri(TokenUrl::new(config.token_url.clone())?)
            .set_redirect_uri(RedirectUrl::new(config.redirect_url.clone())?);

        let http = reqwest::ClientBuilder::new()
            // Following redirects opens the client up to SSRF.
            .redirect(reqwest::redirect::Policy::none())
            .build()?;

        Ok(Self {
            client,
            http,
            scopes: config.scopes.clone(),
            paths,
        })
    }

    pub fn paths(&self) -> &AuthPaths {
        &self.paths
    }

    /// Builds the provider redirect plus the state the callback must verify.
    pub fn begin(&self, next: String) -> (String, PendingLogin) {
        let (pkce_challenge, pkce_verifier) = PkceCodeChallenge::new_random_sha256();
        let (auth_url, csrf_state) = self
            .client
            .authorize_url(CsrfToken::new_random)
            .add_scopes(self.scopes.iter().map(|s| Scope::new(s.clone())))
            .set_pkce_challenge(pkce_challenge)
            .url();

        let pending = PendingLogin {
            csrf_state: csrf_state.secret().to_string(),
            pkce_verifier: pkce_verifier.secret().to_string(),
            next,
        };
        (auth_url.to_string(), pending)
    }

    pub async fn exchange(
        &self,
        code: String,
        pkce_verifier: String,
    ) -> Result<ProviderCredential, OAuthError> {
        let token = self
            .client
            .exchange_code(AuthorizationCode::new(code))
            .set_pkce_verifier(PkceCodeVerifier::new(pkce_verifier))
            .request_async(&self.http)
            .await
            .map_err(|e| {
                error!(error = %e, "oauth2 code exchange failed");
                OAuthError::Exchange(e.to_string())
            })?;

        let expires_at = token.expires_in().map(|ttl| OffsetDateTime::now_utc() + ttl);
        debug!(expires_at = ?expires_at, "provider credential issued");
        Ok(ProviderCredential::new(
            token.access_token().secret().clone(),
            expires_at,
        ))
    }
}

/// Accepts only local absolute paths as redirect targets.
pub(crate) fn safe_next(next: Option<&str>, fallback: &str) -> String {
    match next {
        Some(n) if n.starts_with('/') && !n.starts_with("//") && !n.contains('\\') => n.to_string(),
        _ => fallback.to_string(),
    }
}
