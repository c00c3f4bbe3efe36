//! Inbox snapshot read from a local JSON file.
//!
//! The file holds an array of items, newest-first, and is re-read on every
//! fetch, so editing it simulates mail arriving. Used for local development of
//! the display layer and in tests.

use std::io::ErrorKind;
use std::path::PathBuf;
use std::sync::Arc;

use async_trait::async_trait;

use ping_common::types::Item;

use super::{InboxSession, InboxSource, SourceError};

pub struct FixtureSource {
    path: Arc<PathBuf>,
}

impl FixtureSource {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: Arc::new(path.into()),
        }
    }
}

#[async_trait]
impl InboxSource for FixtureSource {
    fn name(&self) -> &str {
        "fixture"
    }

    async fn connect(&self) -> Result<Box<dyn InboxSession>, SourceError> {
        if !tokio::fs::try_exists(self.path.as_ref())
            .await
            .unwrap_or(false)
        {
            return Err(SourceError::Auth(format!(
                "inbox snapshot {} does not exist",
                self.path.display()
            )));
        }

        Ok(Box::new(FixtureSession {
            path: Arc::clone(&self.path),
        }))
    }
}

struct FixtureSession {
    path: Arc<PathBuf>,
}

#[async_trait]
impl InboxSession for FixtureSession {
    async fn fetch_recent(&self, max_results: usize) -> Result<Vec<Item>, SourceError> {
        let raw = match tokio::fs::read_to_string(self.path.as_ref()).await {
            Ok(raw) => raw,
            Err(e) if e.kind() == ErrorKind::NotFound => {
                return Err(SourceError::Auth(format!(
                    "inbox snapshot {} disappeared",
                    self.path.display()
                )));
            }
            Err(e) => return Err(SourceError::Transient(e.to_string())),
        };

        let mut items: Vec<Item> = serde_json::from_str(&raw)
            .map_err(|e| SourceError::Protocol(format!("malformed inbox snapshot: {e}")))?;
        items.truncate(max_results);
        Ok(items)
    }
}
