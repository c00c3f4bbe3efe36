//! Diff engine: decides which items of a batch are new since the cursor.
//!
//! Batches arrive newest-first. Items are scanned from the head until the
//! cursor id is met; everything before it is new. The cursor always moves to
//! the head of the batch, so a cursor item that disappeared upstream makes the
//! whole batch count as new.

use ping_common::types::Item;

/// Result of one diff pass.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DiffOutcome {
    /// New items, newest-first.
    pub new_items: Vec<Item>,
    /// Cursor to store once the new items are committed.
    pub next_cursor: Option<String>,
}

/// Compute the new items of `batch` relative to `cursor`.
///
/// - `cursor == None`: baseline, nothing is new, cursor moves to `batch[0]`.
/// - empty batch: nothing is new, cursor unchanged.
/// - cursor not in batch: the whole batch is new.
pub fn compute_new(batch: &[Item], cursor: Option<&str>) -> DiffOutcome {
    let Some(head) = batch.first() else {
        return DiffOutcome {
            new_items: Vec::new(),
            next_cursor: cursor.map(str::to_string),
        };
    };

    let new_items = match cursor {
        None => Vec::new(),
        Some(cursor) => batch
            .iter()
            .take_while(|item| item.id != cursor)
            .cloned()
            .collect(),
    };

    DiffOutcome {
        new_items,
        next_cursor: Some(head.id.clone()),
    }
}
