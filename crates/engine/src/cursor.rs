/// Identifier boundary marking what the poller has already processed.
///
/// Unset on first run; the first successful cycle only records a baseline.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Cursor {
    last_seen: Option<String>,
}

impl Cursor {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn at(id: impl Into<String>) -> Self {
        Self {
            last_seen: Some(id.into()),
        }
    }

    /// Id of the newest item already processed.
    pub fn current(&self) -> Option<&str> {
        self.last_seen.as_deref()
    }

    /// True until a baseline has been established.
    pub fn is_baseline(&self) -> bool {
        self.last_seen.is_none()
    }

    /// Move to the diff's next cursor. `None` leaves the cursor where it is.
    pub fn advance(&mut self, next: Option<String>) {
        if let Some(next) = next {
            self.last_seen = Some(next);
        }
    }

    /// Forget the boundary so the next cycle records a fresh baseline.
    pub fn reset(&mut self) {
        self.last_seen = None;
    }
}
