use std::convert::Infallible;

use axum::{
    async_trait,
    extract::FromRequestParts,
    http::{request::Parts, StatusCode},
};
use axum_extra::extract::CookieJar;
use tracing::debug;

use super::identity::{Credentials, Identity, Mode, TOKEN_HEADER};
use super::session::SESSION_COOKIE;
use crate::error::{forbidden, reject};
use crate::state::AppState;
use crate::users::repo_types::User;

/// Bearer token header plus the live session named by the session cookie.
pub struct RequestCredentials(pub Credentials);

#[async_trait]
impl FromRequestParts<AppState> for RequestCredentials {
    type Rejection = Infallible;

    async fn from_request_parts(
        parts: &mut Parts,
        state: &AppState,
    ) -> Result<Self, Self::Rejection> {
        // A header that is not valid visible ASCII cannot be a hex token.
        let token = parts
            .headers
            .get(TOKEN_HEADER)
            .and_then(|h| h.to_str().ok());

        let jar = CookieJar::from_headers(&parts.headers);
        let session = jar
            .get(SESSION_COOKIE)
            .and_then(|c| state.sessions.load(c.value()));

        Ok(RequestCredentials(Credentials::new(token, session)))
    }
}

/// Resolves the caller in API mode, rejecting anyone who is not a known user.
pub struct ApiUser(pub User);

#[async_trait]
impl FromRequestParts<AppState> for ApiUser {
    type Rejection = (StatusCode, String);

    async fn from_request_parts(
        parts: &mut Parts,
        state: &AppState,
    ) -> Result<Self, Self::Rejection> {
        let credentials = match RequestCredentials::from_request_parts(parts, state).await {
            Ok(RequestCredentials(credentials)) => credentials,
            Err(never) => match never {},
        };

        match state.resolver.resolve(&credentials, Mode::Api).await {
            Ok(Identity::User(user)) => Ok(ApiUser(user)),
            Ok(other) => {
                let unprovisioned = matches!(other, Identity::Unprovisioned(_));
                debug!(unprovisioned, "api request without a known user");
                Err(forbidden())
            }
            Err(e) => Err(reject(e)),
        }
    }
}
