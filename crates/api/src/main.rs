//! Ping API server binary entrypoint.

use std::sync::Arc;

use tower_http::cors::CorsLayer;
use tower_http::limit::RequestBodyLimitLayer;
use tower_http::trace::TraceLayer;
use tracing_subscriber::EnvFilter;

use ping_common::config::AppConfig;
use ping_engine::store::NotificationStore;
use ping_poller::poller::{Poller, PollerConfig};
use ping_poller::source;

use ping_api::routes::create_router;
use ping_api::state::AppState;

/// Request bodies are short JSON objects.
const MAX_BODY_BYTES: usize = 16 * 1024;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Initialize tracing
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| {
            EnvFilter::new("ping_api=debug,ping_poller=info,ping_engine=info,tower_http=debug")
        }))
        .init();

    tracing::info!("Starting Ping API server...");

    let config = AppConfig::from_env()?;

    let store = Arc::new(
        NotificationStore::new(&config.notifications_path, config.store_policy)
            .with_dedup_window(config.dedup_window),
    );
    let source = source::from_config(&config)?;
    let mut poller = Poller::new(source, store, PollerConfig::from_config(&config));

    // The display layer can retry through POST /api/poller/start.
    if let Err(e) = poller.start().await {
        tracing::error!(error = %e, "Inbox poller did not start, serving without it");
    }

    let addr = config.api_addr.clone();
    let state = AppState::new(poller, config);
    let poller = Arc::clone(&state.poller);

    let app = create_router(state)
        .layer(RequestBodyLimitLayer::new(MAX_BODY_BYTES))
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive());

    let listener = tokio::net::TcpListener::bind(&addr).await?;
    tracing::info!("API server listening on {}", addr);

    axum::serve(listener, app)
        .with_graceful_shutdown(async {
            if tokio::signal::ctrl_c().await.is_ok() {
                tracing::info!("Received shutdown signal, stopping gracefully...");
            }
        })
        .await?;

    poller.lock().await.stop().await;
    tracing::info!("Ping API server stopped.");
    Ok(())
}
