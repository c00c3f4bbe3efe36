//! Shared application state for the Axum API server.

use std::sync::Arc;

use tokio::sync::{Mutex, watch};

use ping_common::config::AppConfig;
use ping_engine::store::NotificationStore;
use ping_poller::poller::{Poller, PollerState};

/// Application state shared across all route handlers via Axum `State`.
#[derive(Clone)]
pub struct AppState {
    /// Held for the whole of a start, stop or forced check.
    pub poller: Arc<Mutex<Poller>>,
    pub poller_state: watch::Receiver<PollerState>,
    pub store: Arc<NotificationStore>,
    pub config: AppConfig,
}

impl AppState {
    pub fn new(poller: Poller, config: AppConfig) -> Self {
        Self {
            poller_state: poller.subscribe(),
            store: Arc::clone(poller.store()),
            poller: Arc::new(Mutex::new(poller)),
            config,
        }
    }
}
