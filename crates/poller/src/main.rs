use std::sync::Arc;

use ping_common::config::AppConfig;
use ping_engine::store::NotificationStore;
use ping_poller::poller::{Poller, PollerConfig};
use ping_poller::source;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "ping_poller=info,ping_engine=info".into()),
        )
        .json()
        .init();

    tracing::info!("Ping inbox poller starting...");

    let config = AppConfig::from_env()?;

    let store = Arc::new(
        NotificationStore::new(&config.notifications_path, config.store_policy)
            .with_dedup_window(config.dedup_window),
    );
    tracing::info!(
        path = %config.notifications_path.display(),
        policy = %config.store_policy,
        "Notification store ready"
    );

    let source = source::from_config(&config)?;
    let mut poller = Poller::new(source, store, PollerConfig::from_config(&config));

    poller.start().await?;

    tokio::signal::ctrl_c().await?;
    tracing::info!("Received shutdown signal, stopping gracefully...");

    poller.stop().await;
    tracing::info!("Ping inbox poller stopped.");
    Ok(())
}
