use std::sync::Arc;
use std::time::Duration;

use serde::Serialize;
use thiserror::Error;
use tokio::sync::{mpsc, oneshot, watch};
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

use ping_common::config::AppConfig;
use ping_common::error::AppError;
use ping_engine::store::NotificationStore;

use crate::cycle::InboxPoll;
use crate::reconnect::ReconnectPolicy;
use crate::source::{InboxSource, SourceError};

/// Forced checks queued while a cycle is in flight.
const COMMAND_BUFFER: usize = 4;

/// Lifecycle of a [`Poller`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum PollerState {
    Idle,
    Starting,
    Running,
    /// Re-acquiring the inbox session; only entered from `Running`.
    Reconnecting,
    Stopping,
    Stopped,
}

impl std::fmt::Display for PollerState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            PollerState::Idle => write!(f, "idle"),
            PollerState::Starting => write!(f, "starting"),
            PollerState::Running => write!(f, "running"),
            PollerState::Reconnecting => write!(f, "reconnecting"),
            PollerState::Stopping => write!(f, "stopping"),
            PollerState::Stopped => write!(f, "stopped"),
        }
    }
}

#[derive(Debug, Error)]
pub enum PollerError {
    #[error("could not start inbox poller: {0}")]
    StartupFailure(#[source] SourceError),

    #[error("inbox poller is already running")]
    AlreadyRunning,
}

impl From<PollerError> for AppError {
    fn from(e: PollerError) -> Self {
        match e {
            PollerError::StartupFailure(_) => AppError::Source(e.to_string()),
            PollerError::AlreadyRunning => AppError::Conflict(e.to_string()),
        }
    }
}

/// Scheduling and fetch settings.
#[derive(Debug, Clone)]
pub struct PollerConfig {
    /// Time between the starts of two scheduled cycles.
    pub interval: Duration,
    /// Items requested from the source per cycle.
    pub max_results: usize,
    /// How long `stop` waits for the in-flight cycle.
    pub stop_timeout: Duration,
    pub reconnect: ReconnectPolicy,
    /// Keep at most this many records after each commit.
    pub retention: Option<usize>,
}

impl PollerConfig {
    pub fn from_config(config: &AppConfig) -> Self {
        Self {
            interval: Duration::from_secs(config.poll_interval_secs),
            max_results: config.fetch_max_results,
            stop_timeout: Duration::from_millis(config.stop_timeout_ms),
            reconnect: ReconnectPolicy::from_config(config),
            retention: config.store_retention,
        }
    }
}

impl Default for PollerConfig {
    fn default() -> Self {
        Self::from_config(&AppConfig::default())
    }
}

enum Command {
    ForceCheck(oneshot::Sender<bool>),
}

struct RunningLoop {
    cancel: CancellationToken,
    commands: mpsc::Sender<Command>,
    task: JoinHandle<()>,
}

/// Inbox poller that periodically turns new mail into notifications.
///
/// The poller owns its background task. Every cycle, scheduled or forced,
/// runs on that task, so cycles never overlap and the cursor is never shared.
pub struct Poller {
    source: Arc<dyn InboxSource>,
    store: Arc<NotificationStore>,
    config: PollerConfig,
    state: Arc<watch::Sender<PollerState>>,
    running: Option<RunningLoop>,
    /// Loop task left behind by a `stop` that timed out.
    detached: Option<JoinHandle<()>>,
}

impl Poller {
    pub fn new(
        source: Arc<dyn InboxSource>,
        store: Arc<NotificationStore>,
        config: PollerConfig,
    ) -> Self {
        Self {
            source,
            store,
            config,
            state: Arc::new(watch::Sender::new(PollerState::Idle)),
            running: None,
            detached: None,
        }
    }

    pub fn state(&self) -> PollerState {
        *self.state.borrow()
    }

    /// Watch state transitions, including those made by the background task.
    pub fn subscribe(&self) -> watch::Receiver<PollerState> {
        self.state.subscribe()
    }

    pub fn store(&self) -> &Arc<NotificationStore> {
        &self.store
    }

    pub fn config(&self) -> &PollerConfig {
        &self.config
    }

    pub fn source_name(&self) -> &str {
        self.source.name()
    }

    /// Whether the loop task is alive.
    pub fn is_running(&self) -> bool {
        self.running
            .as_ref()
            .is_some_and(|running| !running.task.is_finished())
    }

    /// Acquire a session and spawn the polling loop.
    ///
    /// The first cycle runs immediately. If no session can be acquired the
    /// poller ends up `Stopped` and the error is returned; there is no retry,
    /// the caller may call `start` again. A loop detached by a timed-out
    /// `stop` counts as running until its last cycle finishes.
    pub async fn start(&mut self) -> Result<(), PollerError> {
        let detached_alive = self.detached.as_ref().is_some_and(|task| !task.is_finished());
        if self.is_running() || detached_alive {
            return Err(PollerError::AlreadyRunning);
        }
        self.running = None;
        self.detached = None;

        self.state.send_replace(PollerState::Starting);
        tracing::info!(source = self.source.name(), "Starting inbox poller");

        let poll = match InboxPoll::connect(
            Arc::clone(&self.source),
            Arc::clone(&self.store),
            &self.config,
        )
        .await
        {
            Ok(poll) => poll.with_state(Arc::clone(&self.state)),
            Err(e) => {
                tracing::error!(
                    source = self.source.name(),
                    error = %e,
                    "Could not acquire inbox session"
                );
                self.state.send_replace(PollerState::Stopped);
                return Err(PollerError::StartupFailure(e));
            }
        };

        let cancel = CancellationToken::new();
        let (commands_tx, commands_rx) = mpsc::channel(COMMAND_BUFFER);

        self.state.send_replace(PollerState::Running);
        let task = tokio::spawn(run_loop(
            poll,
            self.config.interval,
            cancel.clone(),
            commands_rx,
        ));

        self.running = Some(RunningLoop {
            cancel,
            commands: commands_tx,
            task,
        });
        Ok(())
    }

    /// Ask the loop to stop and wait for the in-flight cycle, at most
    /// `stop_timeout`. The poller is `Stopped` afterwards either way; a cycle
    /// still running is left to finish and the loop exits right after it.
    pub async fn stop(&mut self) {
        let Some(mut running) = self.running.take() else {
            return;
        };

        self.state.send_replace(PollerState::Stopping);
        running.cancel.cancel();

        match tokio::time::timeout(self.config.stop_timeout, &mut running.task).await {
            Ok(Ok(())) => tracing::info!("Inbox poller stopped"),
            Ok(Err(e)) => tracing::error!(error = %e, "Inbox poller task failed"),
            Err(_) => {
                tracing::warn!(
                    timeout_ms = self.config.stop_timeout.as_millis() as u64,
                    "Poll cycle still in flight after stop timeout, detaching"
                );
                self.detached = Some(running.task);
            }
        }

        self.state.send_replace(PollerState::Stopped);
    }

    /// Reset the cursor and run a cycle now, outside the schedule.
    ///
    /// The forced cycle re-baselines: mail that arrived since the previous
    /// cycle becomes the new cursor and is never notified. The cycle is
    /// queued behind any cycle already in flight. Returns whether it
    /// completed successfully; `false` when the poller is not running.
    pub async fn force_check(&self) -> bool {
        let Some(running) = &self.running else {
            return false;
        };

        let (reply_tx, reply_rx) = oneshot::channel();
        if running
            .commands
            .send(Command::ForceCheck(reply_tx))
            .await
            .is_err()
        {
            return false;
        }
        reply_rx.await.unwrap_or(false)
    }
}

impl Drop for Poller {
    fn drop(&mut self) {
        if let Some(running) = &self.running {
            running.cancel.cancel();
        }
    }
}

/// Run a cycle now, then one every `interval` measured from the previous
/// cycle's start. A cycle that overran the interval is followed immediately.
/// Cancellation is only observed between cycles.
async fn run_loop(
    mut poll: InboxPoll,
    interval: Duration,
    cancel: CancellationToken,
    mut commands: mpsc::Receiver<Command>,
) {
    tracing::info!(
        interval_ms = interval.as_millis() as u64,
        "Inbox poller running"
    );

    let mut next_cycle = Instant::now();

    loop {
        tokio::select! {
            biased;
            _ = cancel.cancelled() => break,
            Some(command) = commands.recv() => {
                match command {
                    Command::ForceCheck(reply) => {
                        tracing::info!("Forced inbox check");
                        poll.reset_cursor();
                        let ok = poll.run_cycle(&cancel).await.is_ok();
                        let _ = reply.send(ok);
                    }
                }
                continue;
            }
            _ = tokio::time::sleep_until(next_cycle) => {}
        }

        let started = Instant::now();
        let _ = poll.run_cycle(&cancel).await;
        next_cycle = started + interval;
    }

    tracing::info!("Inbox poller loop exited");
}
