use axum::{
    extract::{Path, State},
    http::StatusCode,
    routing::get,
    Json, Router,
};
use tracing::{error, instrument, warn};
use uuid::Uuid;

use crate::{
    auth::extractors::ApiUser,
    error::{forbidden, reject},
    state::AppState,
    users::repo_types::User,
};

use super::dto::TokenResponse;

pub fn me_routes() -> Router<AppState> {
    Router::new().route("/me", get(me))
}

pub fn token_routes() -> Router<AppState> {
    Router::new().route("/users/:user_id/generateToken", get(generate_token))
}

#[instrument(skip_all)]
pub async fn me(ApiUser(user): ApiUser) -> Json<User> {
    Json(user)
}

/// Issues a new token for the caller. Only the user named in the path may ask.
#[instrument(skip(state, caller))]
pub async fn generate_token(
    State(state): State<AppState>,
    ApiUser(caller): ApiUser,
    Path(user_id): Path<String>,
) -> Result<Json<TokenResponse>, (StatusCode, String)> {
    let not_found = || (StatusCode::NOT_FOUND, "User not found".to_string());

    let id = Uuid::parse_str(&user_id).map_err(|_| not_found())?;
    let target = state
        .resolver
        .find_user(id)
        .await
        .map_err(reject)?
        .ok_or_else(not_found)?;

    if caller.id != target.id {
        warn!(caller = ?caller.id, %id, "token requested for another user");
        return Err(forbidden());
    }

    let saved = state.resolver.regenerate_token(target).await.map_err(reject)?;
    let token = saved.token.ok_or_else(|| {
        error!(%id, "saved user has no token");
        (StatusCode::INTERNAL_SERVER_ERROR, "Internal Server Error".to_string())
    })?;

    Ok(Json(TokenResponse { token }))
}
