//! Inbox diffing and the notification document.

pub mod cursor;
pub mod diff;
pub mod store;
pub mod translate;
