use axum::{
    extract::{Query, State},
    http::StatusCode,
    response::Redirect,
    routing::get,
    Router,
};
use oauth2::url::form_urlencoded;
use tracing::{debug, instrument};

use crate::{
    auth::{
        extractors::RequestCredentials,
        handlers::NextParam,
        identity::{Identity, Mode},
        oauth::safe_next,
    },
    error::reject,
    state::AppState,
};

pub fn router() -> Router<AppState> {
    Router::new()
        .route("/", get(home))
        .route("/login", get(login_page))
}

/// Landing page. Signed-in visitors go to their profile, everyone else to login.
#[instrument(skip_all)]
pub async fn home(
    State(state): State<AppState>,
    RequestCredentials(credentials): RequestCredentials,
) -> Result<Redirect, (StatusCode, String)> {
    let identity = state
        .resolver
        .resolve(&credentials, Mode::Page)
        .await
        .map_err(reject)?;

    match identity {
        Identity::User(_) => Ok(Redirect::to("/me")),
        other => {
            debug!(anonymous = matches!(other, Identity::Anonymous), "landing without a user");
            Ok(Redirect::to("/login?next=/"))
        }
    }
}

/// Sends visitors without a local user through the provider login, keeping `next`.
#[instrument(skip(state, credentials))]
pub async fn login_page(
    State(state): State<AppState>,
    RequestCredentials(credentials): RequestCredentials,
    Query(params): Query<NextParam>,
) -> Result<Redirect, (StatusCode, String)> {
    let next = safe_next(params.next.as_deref(), "/");

    // Only looks; the landing page provisions.
    let identity = state
        .resolver
        .resolve_without_provisioning(&credentials)
        .await
        .map_err(reject)?;
    match identity {
        Identity::User(_) => return Ok(Redirect::to(&next)),
        Identity::Unprovisioned(_) => return Ok(Redirect::to("/")),
        Identity::Anonymous => {}
    }

    let login = &state.oauth.paths().login;
    let encoded: String = form_urlencoded::byte_serialize(next.as_bytes()).collect();
    Ok(Redirect::to(&format!("{login}?next={encoded}")))
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use axum::{body::Body, http::Request, response::Response};
    use tower::ServiceExt;

    use super::*;
    use crate::app::build_app;
    use crate::auth::profile::testing::StubFetcher;
    use crate::auth::session::{ProviderCredential, SESSION_COOKIE};
    use crate::users::memory::MemoryUserStore;
    use crate::users::repo::UserStore;

    fn location(res: &Response) -> &str {
        res.headers()
            .get("location")
            .and_then(|v| v.to_str().ok())
            .unwrap_or_default()
    }

    async fn send(state: &AppState, uri: &str, session_id: Option<&str>) -> Response {
        let mut req = Request::get(uri);
        if let Some(id) = session_id {
            req = req.header("cookie", format!("{SESSION_COOKIE}={id}"));
        }
        build_app(state.clone())
            .oneshot(req.body(Body::empty()).unwrap())
            .await
            .unwrap()
    }

    #[tokio::test]
    async fn anonymous_visitor_is_sent_to_login() {
        let state = AppState::fake();

        let res = send(&state, "/", None).await;
        assert_eq!(res.status(), StatusCode::SEE_OTHER);
        assert_eq!(location(&res), "/login?next=/");

        let res = send(&state, "/login", None).await;
        assert_eq!(location(&res), "/auth/google/login?next=%2F");
    }

    #[tokio::test]
    async fn login_page_keeps_the_requested_destination() {
        let state = AppState::fake();

        let res = send(&state, "/login?next=/me", None).await;
        assert_eq!(res.status(), StatusCode::SEE_OTHER);
        assert_eq!(location(&res), "/auth/google/login?next=%2Fme");

        let res = send(&state, "/login?next=https://evil.example", None).await;
        assert_eq!(location(&res), "/auth/google/login?next=%2F");
    }

    #[tokio::test]
    async fn first_page_visit_provisions_the_user() {
        let store = Arc::new(MemoryUserStore::new());
        let fetcher = Arc::new(StubFetcher::returning("Ada", "ada@example.com"));
        let state = AppState::fake_with(store.clone(), fetcher.clone(), false);

        let session = state.sessions.create().unwrap();
        session.set_credential(Some(ProviderCredential::new("live", None)));

        let res = send(&state, "/", Some(session.id())).await;
        assert_eq!(location(&res), "/me");

        let user = store.find_by_email("ada@example.com").await.unwrap();
        assert!(user.and_then(|u| u.token).is_some());

        let res = send(&state, "/login?next=/me", Some(session.id())).await;
        assert_eq!(location(&res), "/me");
        assert_eq!(fetcher.calls(), 1);
    }
}
