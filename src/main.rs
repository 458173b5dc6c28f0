use std::sync::Arc;

use axum::Router;
use tokio::net::TcpListener;
use tower_http::cors::{Any, CorsLayer};
use tracing::info;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use courier_session::api::{self, AppState};
use courier_session::auth::{LogNotifier, SessionAuthority, TokenCodec};
use courier_session::cache::MemoryCache;
use courier_session::config::Config;
use courier_session::db::DBLayer;
use courier_session::repository::CredentialStore;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // -----------------------------
    // Logging
    // -----------------------------
    tracing_subscriber::registry()
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with(tracing_subscriber::fmt::layer())
        .init();

    let config = Config::from_env()?;

    // -----------------------------
    // Shared state / Dependencies
    // -----------------------------
    let db = DBLayer::new(&config.db_path)?;
    let store = Arc::new(CredentialStore::new(
        db,
        Arc::new(MemoryCache::new()),
        config.invalidation,
    ));
    let authority = Arc::new(SessionAuthority::new(
        store.clone(),
        TokenCodec::new(&config.tokens),
        Arc::new(LogNotifier),
        config.verification_code_ttl,
    ));

    let state = AppState {
        authority,
        access_token: config.access_token.as_deref().map(Arc::from),
    };

    // -----------------------------
    // Routers
    // -----------------------------
    let app = Router::new()
        .merge(api::router())
        .layer(
            CorsLayer::new()
                .allow_origin(Any)
                .allow_headers(Any)
                .allow_methods(Any),
        )
        .with_state(state);

    info!(
        addr = %config.bind_addr,
        db = %config.db_path,
        invalidation = ?config.invalidation,
        "session service listening"
    );

    let listener = TcpListener::bind(config.bind_addr.as_str()).await?;
    axum::serve(listener, app.into_make_service())
        .with_graceful_shutdown(async {
            let _ = tokio::signal::ctrl_c().await;
            info!("shutting down");
        })
        .await?;

    store.worker().flush().await;
    Ok(())
}
