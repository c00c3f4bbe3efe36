use std::path::PathBuf;

use crate::types::StorePolicy;

/// Which inbox source the poller talks to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SourceKind {
    /// Gmail REST API with a bearer token.
    Gmail,
    /// Inbox snapshot read from a local JSON file.
    Fixture,
}

impl std::fmt::Display for SourceKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            SourceKind::Gmail => write!(f, "gmail"),
            SourceKind::Fixture => write!(f, "fixture"),
        }
    }
}

impl std::str::FromStr for SourceKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "gmail" => Ok(SourceKind::Gmail),
            "fixture" => Ok(SourceKind::Fixture),
            other => Err(format!("unknown source '{other}'")),
        }
    }
}

/// Global application configuration loaded from environment variables.
#[derive(Debug, Clone)]
pub struct AppConfig {
    /// Path of the notifications document shared with the display layer
    pub notifications_path: PathBuf,

    /// Seconds between poll cycle starts (default: 60)
    pub poll_interval_secs: u64,

    /// Number of most recent inbox items fetched per cycle (default: 10)
    pub fetch_max_results: usize,

    /// How long `stop` waits for the in-flight cycle (default: 1000)
    pub stop_timeout_ms: u64,

    /// Session re-acquisition attempts after an auth failure (default: 3)
    pub reconnect_max_attempts: u32,

    /// Delay before the second reconnect attempt, doubled after each failure (default: 500)
    pub reconnect_initial_delay_ms: u64,

    /// Upper bound for the reconnect delay (default: 8000)
    pub reconnect_max_delay_ms: u64,

    /// How new records are merged into the document (default: append)
    pub store_policy: StorePolicy,

    /// Keep at most this many records after each commit (default: unlimited)
    pub store_retention: Option<usize>,

    /// How many head records a commit checks for duplicate ids (default: 50)
    pub dedup_window: usize,

    /// Inbox source (default: gmail)
    pub source: SourceKind,

    /// Inbox snapshot used by the fixture source
    pub fixture_path: PathBuf,

    /// Gmail REST API base URL
    pub gmail_api_url: String,

    /// Static Gmail access token
    pub gmail_access_token: Option<String>,

    /// JSON file holding `{"access_token": "..."}`, re-read on every connect
    pub gmail_token_file: Option<PathBuf>,

    /// Bind address of the control API (default: 127.0.0.1:3000)
    pub api_addr: String,
}

impl AppConfig {
    /// Load configuration from environment variables.
    pub fn from_env() -> anyhow::Result<Self> {
        dotenvy::dotenv().ok();

        Self {
            notifications_path: std::env::var("PING_NOTIFICATIONS_PATH")
                .unwrap_or_else(|_| "assets/notifications.json".to_string())
                .into(),
            poll_interval_secs: parse_var("PING_POLL_INTERVAL_SECS", "60")?,
            fetch_max_results: parse_var("PING_FETCH_MAX_RESULTS", "10")?,
            stop_timeout_ms: parse_var("PING_STOP_TIMEOUT_MS", "1000")?,
            reconnect_max_attempts: parse_var("PING_RECONNECT_MAX_ATTEMPTS", "3")?,
            reconnect_initial_delay_ms: parse_var("PING_RECONNECT_INITIAL_DELAY_MS", "500")?,
            reconnect_max_delay_ms: parse_var("PING_RECONNECT_MAX_DELAY_MS", "8000")?,
            store_policy: parse_var("PING_STORE_POLICY", "append")?,
            store_retention: std::env::var("PING_STORE_RETENTION")
                .ok()
                .map(|v| {
                    v.parse()
                        .map_err(|_| anyhow::anyhow!("PING_STORE_RETENTION must be a valid usize"))
                })
                .transpose()?,
            dedup_window: parse_var("PING_DEDUP_WINDOW", "50")?,
            source: parse_var("PING_SOURCE", "gmail")?,
            fixture_path: std::env::var("PING_FIXTURE_PATH")
                .unwrap_or_else(|_| "assets/inbox.json".to_string())
                .into(),
            gmail_api_url: std::env::var("GMAIL_API_URL")
                .unwrap_or_else(|_| "https://gmail.googleapis.com/gmail/v1".to_string()),
            gmail_access_token: std::env::var("GMAIL_ACCESS_TOKEN").ok(),
            gmail_token_file: std::env::var("GMAIL_TOKEN_FILE").ok().map(PathBuf::from),
            api_addr: std::env::var("PING_API_ADDR")
                .unwrap_or_else(|_| "127.0.0.1:3000".to_string()),
        }
        .validate()
    }

    /// Reject settings the poller cannot run with.
    pub fn validate(self) -> anyhow::Result<Self> {
        if self.poll_interval_secs == 0 {
            anyhow::bail!("PING_POLL_INTERVAL_SECS must be at least 1");
        }
        if self.fetch_max_results == 0 {
            anyhow::bail!("PING_FETCH_MAX_RESULTS must be at least 1");
        }
        Ok(self)
    }
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            notifications_path: PathBuf::from("assets/notifications.json"),
            poll_interval_secs: 60,
            fetch_max_results: 10,
            stop_timeout_ms: 1000,
            reconnect_max_attempts: 3,
            reconnect_initial_delay_ms: 500,
            reconnect_max_delay_ms: 8000,
            store_policy: StorePolicy::AppendOnly,
            store_retention: None,
            dedup_window: 50,
            source: SourceKind::Gmail,
            fixture_path: PathBuf::from("assets/inbox.json"),
            gmail_api_url: "https://gmail.googleapis.com/gmail/v1".to_string(),
            gmail_access_token: None,
            gmail_token_file: None,
            api_addr: "127.0.0.1:3000".to_string(),
        }
    }
}

/// Read `key` (or `default` when unset) and parse it.
fn parse_var<T>(key: &str, default: &str) -> anyhow::Result<T>
where
    T: std::str::FromStr,
    T::Err: std::fmt::Display,
{
    let raw = std::env::var(key).unwrap_or_else(|_| default.to_string());
    raw.parse()
        .map_err(|e| anyhow::anyhow!("{} has an invalid value '{}': {}", key, raw, e))
}
