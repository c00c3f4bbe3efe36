//! Gmail REST adapter.
//!
//! Uses three endpoints of the Gmail v1 API:
//! - `GET users/me/profile` to validate a token when a session is acquired
//! - `GET users/me/messages?labelIds=INBOX&maxResults=N` to list message ids, newest-first
//! - `GET users/me/messages/{id}?format=metadata` for `From`, `Subject` and `internalDate`
//!
//! Obtaining the token is not this module's job. It is either given directly or
//! read from a JSON file on every connect, so an external refresher can rotate it.

use std::path::PathBuf;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use reqwest::{RequestBuilder, Response, StatusCode};
use serde::Deserialize;

use ping_common::types::Item;

use super::{InboxSession, InboxSource, SourceError};

const REQUEST_TIMEOUT: Duration = Duration::from_secs(15);

/// Where the bearer token comes from.
#[derive(Debug, Clone)]
pub enum TokenSource {
    Static(String),
    /// JSON file containing `{"access_token": "..."}`.
    File(PathBuf),
}

#[derive(Debug, Deserialize)]
struct TokenFile {
    access_token: String,
}

#[derive(Debug, Deserialize)]
struct MessageList {
    #[serde(default)]
    messages: Vec<MessageRef>,
}

#[derive(Debug, Deserialize)]
struct MessageRef {
    id: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct MessageMetadata {
    id: String,
    internal_date: Option<String>,
    payload: Option<MessagePayload>,
}

#[derive(Debug, Default, Deserialize)]
struct MessagePayload {
    #[serde(default)]
    headers: Vec<Header>,
}

#[derive(Debug, Deserialize)]
struct Header {
    name: String,
    value: String,
}

pub struct GmailSource {
    client: reqwest::Client,
    base_url: String,
    token: TokenSource,
}

impl GmailSource {
    pub fn new(base_url: impl Into<String>, token: TokenSource) -> anyhow::Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(REQUEST_TIMEOUT)
            .build()?;

        Ok(Self {
            client,
            base_url: base_url.into().trim_end_matches('/').to_string(),
            token,
        })
    }

    async fn access_token(&self) -> Result<String, SourceError> {
        match &self.token {
            TokenSource::Static(token) => Ok(token.clone()),
            TokenSource::File(path) => {
                let raw = tokio::fs::read_to_string(path).await.map_err(|e| {
                    SourceError::Auth(format!("cannot read token file {}: {e}", path.display()))
                })?;
                let file: TokenFile = serde_json::from_str(&raw).map_err(|e| {
                    SourceError::Auth(format!("invalid token file {}: {e}", path.display()))
                })?;
                Ok(file.access_token)
            }
        }
    }
}

#[async_trait]
impl InboxSource for GmailSource {
    fn name(&self) -> &str {
        "gmail"
    }

    async fn connect(&self) -> Result<Box<dyn InboxSession>, SourceError> {
        let token = self.access_token().await?;

        let profile = self
            .client
            .get(format!("{}/users/me/profile", self.base_url))
            .bearer_auth(&token);
        send(profile).await?;

        tracing::debug!(base_url = %self.base_url, "Gmail session established");
        Ok(Box::new(GmailSession {
            client: self.client.clone(),
            base_url: self.base_url.clone(),
            token,
        }))
    }
}

struct GmailSession {
    client: reqwest::Client,
    base_url: String,
    token: String,
}

impl GmailSession {
    /// `None` when the message was deleted after it was listed.
    async fn fetch_metadata(&self, id: &str) -> Result<Option<MessageMetadata>, SourceError> {
        let request = self
            .client
            .get(format!("{}/users/me/messages/{}", self.base_url, id))
            .bearer_auth(&self.token)
            .query(&[
                ("format", "metadata"),
                ("metadataHeaders", "From"),
                ("metadataHeaders", "Subject"),
            ]);

        let response = request
            .send()
            .await
            .map_err(|e| SourceError::Transient(e.to_string()))?;
        if response.status() == StatusCode::NOT_FOUND {
            tracing::debug!(id, "Message gone before its metadata was fetched, skipping");
            return Ok(None);
        }

        decode(check(response).await?).await.map(Some)
    }
}

#[async_trait]
impl InboxSession for GmailSession {
    async fn fetch_recent(&self, max_results: usize) -> Result<Vec<Item>, SourceError> {
        let request = self
            .client
            .get(format!("{}/users/me/messages", self.base_url))
            .bearer_auth(&self.token)
            .query(&[
                ("labelIds", "INBOX".to_string()),
                ("maxResults", max_results.to_string()),
            ]);
        let list: MessageList = decode(send(request).await?).await?;

        let mut items = Vec::with_capacity(list.messages.len());
        for message in list.messages.iter().take(max_results) {
            if let Some(metadata) = self.fetch_metadata(&message.id).await? {
                items.push(to_item(metadata));
            }
        }
        Ok(items)
    }
}

async fn send(request: RequestBuilder) -> Result<Response, SourceError> {
    let response = request
        .send()
        .await
        .map_err(|e| SourceError::Transient(e.to_string()))?;
    check(response).await
}

async fn check(response: Response) -> Result<Response, SourceError> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }

    let body = response.text().await.unwrap_or_default();
    Err(classify_status(status, &body))
}

async fn decode<T: serde::de::DeserializeOwned>(response: Response) -> Result<T, SourceError> {
    response
        .json()
        .await
        .map_err(|e| SourceError::Protocol(format!("unexpected Gmail response: {e}")))
}

fn classify_status(status: StatusCode, body: &str) -> SourceError {
    let detail = format!("HTTP {}: {}", status.as_u16(), body.trim());
    match status.as_u16() {
        401 | 403 => SourceError::Auth(detail),
        408 | 429 | 500..=599 => SourceError::Transient(detail),
        _ => SourceError::Protocol(detail),
    }
}

fn to_item(metadata: MessageMetadata) -> Item {
    let headers = metadata.payload.unwrap_or_default().headers;
    let header = |name: &str| {
        headers
            .iter()
            .find(|h| h.name.eq_ignore_ascii_case(name))
            .map(|h| h.value.clone())
            .unwrap_or_default()
    };

    let received_at = metadata
        .internal_date
        .as_deref()
        .and_then(|ms| ms.parse::<i64>().ok())
        .and_then(DateTime::from_timestamp_millis)
        .unwrap_or_else(Utc::now);

    Item {
        sender: header("From"),
        subject: header("Subject"),
        id: metadata.id,
        received_at,
    }
}
