use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// A single message summary returned by the inbox source for one poll.
///
/// Batches are ordered newest-first and never contain two items with the
/// same `id`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Item {
    pub id: String,
    pub sender: String,
    pub subject: String,
    pub received_at: DateTime<Utc>,
}

/// Kinds of records shown by the display layer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum NotificationKind {
    Email,
    System,
    Task,
}

impl std::fmt::Display for NotificationKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            NotificationKind::Email => write!(f, "email"),
            NotificationKind::System => write!(f, "system"),
            NotificationKind::Task => write!(f, "task"),
        }
    }
}

impl std::str::FromStr for NotificationKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "email" => Ok(NotificationKind::Email),
            "system" => Ok(NotificationKind::System),
            "task" => Ok(NotificationKind::Task),
            other => Err(format!("unknown notification kind '{other}'")),
        }
    }
}

/// A persisted, user-facing notification.
///
/// Field names match the JSON document read by the display layer:
/// `type`, `sender`, `subject` or `message`, `timestamp`, `id`, `read`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NotificationRecord {
    #[serde(rename = "type")]
    pub kind: NotificationKind,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sender: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub subject: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
    #[serde(with = "timestamp")]
    pub timestamp: DateTime<Utc>,
    /// Source identifier. For email records this is the inbox item id.
    pub id: String,
    #[serde(default)]
    pub read: bool,
}

impl NotificationRecord {
    /// Raise an internal record (`system` or `task`) with a fresh id.
    pub fn internal(kind: NotificationKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            sender: None,
            subject: None,
            message: Some(message.into()),
            timestamp: Utc::now(),
            id: format!("{}-{}", kind, Uuid::new_v4().simple()),
            read: false,
        }
    }

    /// Text shown as the record's headline: subject for email, message otherwise.
    pub fn headline(&self) -> &str {
        self.subject
            .as_deref()
            .or(self.message.as_deref())
            .unwrap_or_default()
    }
}

/// How the notification store combines a new batch with what is already on disk.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum StorePolicy {
    /// Prepend new records and keep the full history.
    #[default]
    AppendOnly,
    /// New records of this kind supersede every existing record of the same kind.
    ReplaceByKind(NotificationKind),
}

impl std::fmt::Display for StorePolicy {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            StorePolicy::AppendOnly => write!(f, "append"),
            StorePolicy::ReplaceByKind(kind) => write!(f, "replace-{}", kind),
        }
    }
}

impl std::str::FromStr for StorePolicy {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let s = s.trim().to_ascii_lowercase();
        if s == "append" || s == "append-only" {
            return Ok(StorePolicy::AppendOnly);
        }
        match s.strip_prefix("replace-") {
            Some(kind) => Ok(StorePolicy::ReplaceByKind(kind.parse()?)),
            None => Err(format!(
                "unknown store policy '{s}' (expected 'append' or 'replace-<kind>')"
            )),
        }
    }
}

/// ISO-8601 timestamps. Written as RFC 3339 UTC; on read, values without an
/// offset are taken as UTC.
mod timestamp {
    use chrono::{DateTime, NaiveDateTime, SecondsFormat, Utc};
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S>(value: &DateTime<Utc>, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.serialize_str(&value.to_rfc3339_opts(SecondsFormat::Millis, true))
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<DateTime<Utc>, D::Error>
    where
        D: Deserializer<'de>,
    {
        let raw = String::deserialize(deserializer)?;
        parse(&raw).ok_or_else(|| serde::de::Error::custom(format!("invalid timestamp '{raw}'")))
    }

    fn parse(raw: &str) -> Option<DateTime<Utc>> {
        if let Ok(dt) = DateTime::parse_from_rfc3339(raw) {
            return Some(dt.with_timezone(&Utc));
        }
        NaiveDateTime::parse_from_str(raw, "%Y-%m-%dT%H:%M:%S%.f")
            .ok()
            .map(|naive| naive.and_utc())
    }
}
