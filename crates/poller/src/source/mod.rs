//! Inbox source seam.
//!
//! A source hands out sessions; a session returns the most recent items of the
//! mailbox, newest-first. The poller re-acquires a session when the current one
//! stops working.

pub mod fixture;
pub mod gmail;

use std::sync::Arc;

use anyhow::bail;
use async_trait::async_trait;
use thiserror::Error;

use ping_common::config::{AppConfig, SourceKind};
use ping_common::types::Item;

pub use fixture::FixtureSource;
pub use gmail::{GmailSource, TokenSource};

#[derive(Debug, Clone, Error)]
pub enum SourceError {
    /// Session invalid or expired.
    #[error("authentication failed: {0}")]
    Auth(String),

    /// Network failure or rate limiting; retried on the next tick.
    #[error("transient source failure: {0}")]
    Transient(String),

    /// The source answered with something the client does not understand.
    #[error("source protocol error: {0}")]
    Protocol(String),
}

impl SourceError {
    /// Whether the session should be re-acquired before the next fetch.
    pub fn requires_reconnect(&self) -> bool {
        matches!(self, SourceError::Auth(_) | SourceError::Protocol(_))
    }
}

/// Factory for inbox sessions.
#[async_trait]
pub trait InboxSource: Send + Sync {
    /// Short name used in logs.
    fn name(&self) -> &str;

    /// Acquire a new session.
    async fn connect(&self) -> Result<Box<dyn InboxSession>, SourceError>;
}

/// An authenticated view of one mailbox.
#[async_trait]
pub trait InboxSession: Send + Sync {
    /// Fetch up to `max_results` most recent items, newest-first.
    async fn fetch_recent(&self, max_results: usize) -> Result<Vec<Item>, SourceError>;
}

/// Build the configured inbox source.
pub fn from_config(config: &AppConfig) -> anyhow::Result<Arc<dyn InboxSource>> {
    match config.source {
        SourceKind::Fixture => Ok(Arc::new(FixtureSource::new(&config.fixture_path))),
        SourceKind::Gmail => {
            let token = if let Some(token) = &config.gmail_access_token {
                TokenSource::Static(token.clone())
            } else if let Some(path) = &config.gmail_token_file {
                TokenSource::File(path.clone())
            } else {
                bail!("gmail source needs GMAIL_ACCESS_TOKEN or GMAIL_TOKEN_FILE");
            };
            Ok(Arc::new(GmailSource::new(&config.gmail_api_url, token)?))
        }
    }
}
