use crate::state::AppState;
use axum::Router;

pub(crate) mod extractors;
pub mod handlers;
pub mod identity;
pub mod oauth;
pub mod profile;
pub mod session;

pub fn router(paths: &oauth::AuthPaths) -> Router<AppState> {
    handlers::auth_routes(paths)
}
