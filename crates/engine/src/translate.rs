//! Item → notification translation.
//!
//! Turns a new inbox item into the record shown by the display layer:
//! 1. Reduces the raw `From` header to a display name
//! 2. Fills in placeholders for missing sender or subject
//! 3. Keeps the item id as the record id so later commits can dedupe on it

use ping_common::types::{Item, NotificationKind, NotificationRecord};

const UNKNOWN_SENDER: &str = "Unknown sender";
const NO_SUBJECT: &str = "(No subject)";

/// Translate a new inbox item into an unread email notification.
pub fn email_record(item: &Item) -> NotificationRecord {
    let subject = item.subject.trim();

    NotificationRecord {
        kind: NotificationKind::Email,
        sender: Some(display_sender(&item.sender)),
        subject: Some(if subject.is_empty() {
            NO_SUBJECT.to_string()
        } else {
            subject.to_string()
        }),
        message: None,
        timestamp: item.received_at,
        id: item.id.clone(),
        read: false,
    }
}

/// Translate a batch, keeping its newest-first order.
pub fn email_records(items: &[Item]) -> Vec<NotificationRecord> {
    items.iter().map(email_record).collect()
}

/// Reduce an RFC 5322 `From` value to something short enough for a bubble.
///
/// `"Alice Smith" <alice@example.com>` → `Alice Smith`,
/// `<alice@example.com>` → `alice@example.com`.
pub fn display_sender(raw: &str) -> String {
    let raw = raw.trim();

    let name = match raw.find('<') {
        Some(start) => {
            let name = raw[..start].trim().trim_matches('"').trim();
            if name.is_empty() {
                raw[start + 1..].trim_end_matches('>').trim()
            } else {
                name
            }
        }
        None => raw,
    };

    if name.is_empty() {
        UNKNOWN_SENDER.to_string()
    } else {
        name.to_string()
    }
}
