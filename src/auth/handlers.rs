use axum::{
    extract::{Query, State},
    http::StatusCode,
    response::Redirect,
    routing::get,
    Router,
};
use axum_extra::extract::CookieJar;
use serde::Deserialize;
use tracing::{error, info, instrument, warn};

use crate::{
    auth::{
        oauth::{safe_next, AuthPaths},
        session::{removal_cookie, session_cookie, SESSION_COOKIE},
    },
    state::AppState,
};

#[derive(Debug, Deserialize)]
pub struct NextParam {
    pub next: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct CallbackParams {
    pub code: Option<String>,
    pub state: Option<String>,
    pub error: Option<String>,
}

pub fn auth_routes(paths: &AuthPaths) -> Router<AppState> {
    Router::new()
        .route(&paths.login, get(login))
        .route(&paths.callback, get(callback))
        .route(&paths.logout, get(logout))
        .route(&paths.error, get(login_failed))
}

/// Starts the provider login, creating a session when the browser has none.
#[instrument(skip(state, jar))]
pub async fn login(
    State(state): State<AppState>,
    jar: CookieJar,
    Query(params): Query<NextParam>,
) -> Result<(CookieJar, Redirect), (StatusCode, String)> {
    let existing = jar
        .get(SESSION_COOKIE)
        .and_then(|c| state.sessions.load(c.value()));
    let session = match existing {
        Some(session) => session,
        None => state.sessions.create().map_err(|e| {
            error!(error = %e, "session creation failed");
            (StatusCode::INTERNAL_SERVER_ERROR, "Internal Server Error".into())
        })?,
    };

    let next = safe_next(params.next.as_deref(), "/");
    let (auth_url, pending) = state.oauth.begin(next);
    session.begin_login(pending);

    let jar = jar.add(session_cookie(session.id(), state.config.production));
    Ok((jar, Redirect::to(&auth_url)))
}

/// Finishes the provider login and stores the fresh credential in the session.
#[instrument(skip(state, jar, params))]
pub async fn callback(
    State(state): State<AppState>,
    jar: CookieJar,
    Query(params): Query<CallbackParams>,
) -> Result<(CookieJar, Redirect), (StatusCode, String)> {
    let paths = state.oauth.paths();
    if let Some(reason) = params.error.as_deref() {
        warn!(%reason, "identity provider reported a login error");
        return Ok((jar, Redirect::to(&paths.error)));
    }

    let session = jar
        .get(SESSION_COOKIE)
        .and_then(|c| state.sessions.load(c.value()))
        .ok_or((StatusCode::UNAUTHORIZED, "Missing login session".to_string()))?;

    let pending = session
        .take_pending_login()
        .ok_or((StatusCode::BAD_REQUEST, "No login in progress".to_string()))?;

    let (Some(code), Some(csrf_state)) = (params.code, params.state) else {
        return Err((StatusCode::BAD_REQUEST, "Missing code or state".into()));
    };
    if csrf_state != pending.csrf_state {
        warn!("oauth2 state mismatch");
        return Err((StatusCode::BAD_REQUEST, "Invalid state".into()));
    }

    let credential = state
        .oauth
        .exchange(code, pending.pkce_verifier)
        .await
        .map_err(|e| {
            error!(error = %e, "login callback failed");
            (StatusCode::INTERNAL_SERVER_ERROR, "Internal Server Error".to_string())
        })?;

    let session = state.sessions.renew(&session).map_err(|e| {
        error!(error = %e, "session renewal failed");
        (StatusCode::INTERNAL_SERVER_ERROR, "Internal Server Error".to_string())
    })?;
    // The cached profile belonged to the previous credential.
    session.clear_profile();
    session.set_credential(Some(credential));

    info!("provider login completed");
    let jar = jar.add(session_cookie(session.id(), state.config.production));
    Ok((jar, Redirect::to(&pending.next)))
}

#[instrument(skip(state, jar))]
pub async fn logout(
    State(state): State<AppState>,
    jar: CookieJar,
    Query(params): Query<NextParam>,
) -> (CookieJar, Redirect) {
    if let Some(cookie) = jar.get(SESSION_COOKIE) {
        if state.sessions.destroy(cookie.value()) {
            info!("session closed");
        }
    }
    let next = safe_next(params.next.as_deref(), "/login");
    (jar.remove(removal_cookie()), Redirect::to(&next))
}

pub async fn login_failed() -> (StatusCode, &'static str) {
    (StatusCode::UNAUTHORIZED, "Authentication failed")
}
