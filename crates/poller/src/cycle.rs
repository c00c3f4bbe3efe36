//! One poll cycle: fetch → diff → commit → advance cursor.
//!
//! `InboxPoll` owns everything a cycle mutates (session and cursor), so the
//! loop task that owns it is the only writer. The cursor only advances after
//! the store commit succeeded; any failure leaves both cursor and document as
//! they were before the cycle.

use std::sync::Arc;

use thiserror::Error;
use tokio::sync::watch;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

use ping_engine::cursor::Cursor;
use ping_engine::diff;
use ping_engine::store::{NotificationStore, StoreError};
use ping_engine::translate;

use crate::poller::{PollerConfig, PollerState};
use crate::reconnect::ReconnectPolicy;
use crate::source::{InboxSession, InboxSource, SourceError};

/// What a successful cycle did.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CycleReport {
    /// Items returned by the source.
    pub fetched: usize,
    /// Items the diff reported as new.
    pub new_items: usize,
    /// Whether the store was rewritten.
    pub committed: bool,
    /// Whether this cycle only recorded the baseline cursor.
    pub baseline: bool,
}

#[derive(Debug, Error)]
pub enum CycleError {
    #[error("fetch failed, retrying next tick: {0}")]
    Transient(#[source] SourceError),

    #[error("session failed (reconnected: {reconnected}): {source}")]
    Reconnect {
        source: SourceError,
        reconnected: bool,
    },

    #[error("cycle abandoned: {0}")]
    Store(#[from] StoreError),
}

/// Session, cursor and store handle of a running poller.
pub struct InboxPoll {
    source: Arc<dyn InboxSource>,
    session: Box<dyn InboxSession>,
    store: Arc<NotificationStore>,
    cursor: Cursor,
    max_results: usize,
    retention: Option<usize>,
    reconnect: ReconnectPolicy,
    state: Arc<watch::Sender<PollerState>>,
    cycles: u64,
}

impl InboxPoll {
    /// Acquire a session from `source`. Fails with the source's error.
    pub async fn connect(
        source: Arc<dyn InboxSource>,
        store: Arc<NotificationStore>,
        config: &PollerConfig,
    ) -> Result<Self, SourceError> {
        let session = source.connect().await?;

        Ok(Self {
            source,
            session,
            store,
            cursor: Cursor::new(),
            max_results: config.max_results,
            retention: config.retention,
            reconnect: config.reconnect,
            state: Arc::new(watch::Sender::new(PollerState::Running)),
            cycles: 0,
        })
    }

    /// Publish `Reconnecting`/`Running` transitions on `state`.
    pub(crate) fn with_state(mut self, state: Arc<watch::Sender<PollerState>>) -> Self {
        self.state = state;
        self
    }

    pub fn cursor(&self) -> &Cursor {
        &self.cursor
    }

    pub fn reset_cursor(&mut self) {
        self.cursor.reset();
    }

    /// Run one cycle and log its outcome.
    pub async fn run_cycle(
        &mut self,
        cancel: &CancellationToken,
    ) -> Result<CycleReport, CycleError> {
        self.cycles += 1;
        let cycle = self.cycles;
        let started = Instant::now();

        let result = self.poll_once(cancel).await;
        let elapsed_ms = started.elapsed().as_millis() as u64;

        match &result {
            Ok(report) if report.baseline => {
                tracing::info!(
                    cycle,
                    fetched = report.fetched,
                    cursor = ?self.cursor.current(),
                    elapsed_ms,
                    "Baseline established"
                );
            }
            Ok(report) if report.new_items > 0 => {
                tracing::info!(
                    cycle,
                    new_items = report.new_items,
                    committed = report.committed,
                    elapsed_ms,
                    "New inbox items"
                );
            }
            Ok(_) => tracing::debug!(cycle, elapsed_ms, "No new inbox items"),
            Err(e @ CycleError::Transient(_)) => {
                tracing::warn!(cycle, error = %e, "Poll cycle skipped");
            }
            Err(e) => tracing::error!(cycle, error = %e, "Poll cycle abandoned"),
        }

        result
    }

    async fn poll_once(&mut self, cancel: &CancellationToken) -> Result<CycleReport, CycleError> {
        let batch = match self.session.fetch_recent(self.max_results).await {
            Ok(batch) => batch,
            Err(e) if e.requires_reconnect() => {
                let reconnected = self.reconnect(cancel).await;
                return Err(CycleError::Reconnect {
                    source: e,
                    reconnected,
                });
            }
            Err(e) => return Err(CycleError::Transient(e)),
        };

        let baseline = self.cursor.is_baseline();
        let outcome = diff::compute_new(&batch, self.cursor.current());
        let committed = self
            .store
            .commit(translate::email_records(&outcome.new_items))
            .await?;

        if committed
            && let Some(keep) = self.retention
            && let Err(e) = self.store.prune(keep).await
        {
            tracing::warn!(error = %e, keep, "Retention pruning failed");
        }

        let report = CycleReport {
            fetched: batch.len(),
            new_items: outcome.new_items.len(),
            committed,
            baseline,
        };
        self.cursor.advance(outcome.next_cursor);
        Ok(report)
    }

    /// Re-acquire the session with bounded exponential backoff. Keeps the
    /// stale session when every attempt fails.
    async fn reconnect(&mut self, cancel: &CancellationToken) -> bool {
        self.publish(PollerState::Reconnecting, cancel);
        let policy = self.reconnect;
        let mut reconnected = false;

        for attempt in 1..=policy.max_attempts {
            match self.source.connect().await {
                Ok(session) => {
                    self.session = session;
                    reconnected = true;
                    tracing::info!(attempt, source = self.source.name(), "Inbox session re-acquired");
                    break;
                }
                Err(e) => tracing::warn!(
                    attempt,
                    max_attempts = policy.max_attempts,
                    error = %e,
                    "Reconnect attempt failed"
                ),
            }

            if attempt < policy.max_attempts {
                tokio::select! {
                    _ = cancel.cancelled() => break,
                    _ = tokio::time::sleep(policy.delay_after(attempt)) => {}
                }
            }
        }

        if !reconnected {
            tracing::error!(
                source = self.source.name(),
                "Could not re-acquire inbox session, keeping the stale one"
            );
        }
        self.publish(PollerState::Running, cancel);
        reconnected
    }

    /// State changes are dropped once a stop was requested.
    fn publish(&self, state: PollerState, cancel: &CancellationToken) {
        if !cancel.is_cancelled() {
            self.state.send_replace(state);
        }
    }
}
