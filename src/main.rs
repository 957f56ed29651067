use std::net::SocketAddr;

mod app;
mod auth;
mod config;
mod error;
mod pages;
mod state;
mod users;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();

    let env_filter = std::env::var("RUST_LOG")
        .unwrap_or_else(|_| "salsaflow_server=debug,axum=info,tower_http=info".to_string());
    let json_logs = std::env::var("LOG_FORMAT")
        .map(|v| v == "json")
        .unwrap_or(false);

    if json_logs {
        tracing_subscriber::fmt()
            .with_env_filter(env_filter)
            .with_target(false)
            .json()
            .init();
    } else {
        tracing_subscriber::fmt().with_env_filter(env_filter).init();
    }

    let app_state = state::AppState::init().await?;
    let addr: SocketAddr = app_state.config.listen_addr().parse()?;
    let store = app_state.store.clone();

    let result = app::serve(app::build_app(app_state), addr).await;
    if let Err(e) = store.close().await {
        tracing::warn!(error = %e, "closing user store failed");
    }
    result
}
