//! Poll cycle and scheduler tests against a scripted inbox source.
//!
//! Scheduler tests run with paused time. After the baseline cycle the scripted
//! inbox never changes, so those cycles commit nothing and never touch the
//! filesystem.

use std::collections::VecDeque;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use chrono::{TimeZone, Utc};
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

use ping_common::types::{Item, StorePolicy};
use ping_engine::store::NotificationStore;
use ping_poller::cycle::{CycleError, InboxPoll};
use ping_poller::poller::{Poller, PollerConfig, PollerError, PollerState};
use ping_poller::reconnect::ReconnectPolicy;
use ping_poller::source::{InboxSession, InboxSource, SourceError};

#[derive(Default)]
struct Script {
    /// Results handed out by `fetch_recent`, in order.
    batches: VecDeque<Result<Vec<Item>, SourceError>>,
    /// Returned once `batches` is drained.
    steady: Vec<Item>,
    /// Results handed out by `connect`, in order. Succeeds once drained.
    connects: VecDeque<Result<(), SourceError>>,
    fetch_delay: Duration,
    sessions: usize,
    /// Session number and start time of every fetch.
    fetches: Vec<(usize, Instant)>,
}

#[derive(Clone, Default)]
struct ScriptedSource {
    script: Arc<Mutex<Script>>,
}

impl ScriptedSource {
    fn steady(items: Vec<Item>) -> Self {
        let source = Self::default();
        source.script.lock().unwrap().steady = items;
        source
    }

    fn with_fetch_delay(self, delay: Duration) -> Self {
        self.script.lock().unwrap().fetch_delay = delay;
        self
    }

    fn push_batch(&self, batch: Result<Vec<Item>, SourceError>) {
        self.script.lock().unwrap().batches.push_back(batch);
    }

    fn push_connect(&self, result: Result<(), SourceError>) {
        self.script.lock().unwrap().connects.push_back(result);
    }

    fn sessions(&self) -> usize {
        self.script.lock().unwrap().sessions
    }

    fn fetches(&self) -> Vec<(usize, Instant)> {
        self.script.lock().unwrap().fetches.clone()
    }
}

#[async_trait]
impl InboxSource for ScriptedSource {
    fn name(&self) -> &str {
        "scripted"
    }

    async fn connect(&self) -> Result<Box<dyn InboxSession>, SourceError> {
        let mut script = self.script.lock().unwrap();
        script.connects.pop_front().unwrap_or(Ok(()))?;
        script.sessions += 1;

        Ok(Box::new(ScriptedSession {
            number: script.sessions,
            script: Arc::clone(&self.script),
        }))
    }
}

struct ScriptedSession {
    number: usize,
    script: Arc<Mutex<Script>>,
}

#[async_trait]
impl InboxSession for ScriptedSession {
    async fn fetch_recent(&self, max_results: usize) -> Result<Vec<Item>, SourceError> {
        let (result, delay) = {
            let mut script = self.script.lock().unwrap();
            script.fetches.push((self.number, Instant::now()));
            let result = match script.batches.pop_front() {
                Some(result) => result,
                None => Ok(script.steady.clone()),
            };
            (result, script.fetch_delay)
        };

        if !delay.is_zero() {
            tokio::time::sleep(delay).await;
        }
        result.map(|mut items| {
            items.truncate(max_results);
            items
        })
    }
}

fn item(id: &str, minute: u32) -> Item {
    Item {
        id: id.to_string(),
        sender: format!("\"Sender {id}\" <{id}@example.com>"),
        subject: format!("Subject {id}"),
        received_at: Utc.with_ymd_and_hms(2025, 3, 1, 10, minute, 0).unwrap(),
    }
}

fn config(interval_secs: u64) -> PollerConfig {
    PollerConfig {
        interval: Duration::from_secs(interval_secs),
        max_results: 10,
        stop_timeout: Duration::from_secs(1),
        reconnect: ReconnectPolicy::single_attempt(),
        retention: None,
    }
}

fn store_in(dir: &tempfile::TempDir) -> Arc<NotificationStore> {
    Arc::new(NotificationStore::new(
        dir.path().join("notifications.json"),
        StorePolicy::AppendOnly,
    ))
}

async fn connect(
    source: &ScriptedSource,
    store: Arc<NotificationStore>,
    config: &PollerConfig,
) -> InboxPoll {
    InboxPoll::connect(Arc::new(source.clone()), store, config)
        .await
        .unwrap()
}

fn gaps(fetches: &[(usize, Instant)]) -> Vec<Duration> {
    fetches.windows(2).map(|w| w[1].1 - w[0].1).collect()
}

// ── Poll cycle ──────────────────────────────────────────────────────────────

#[tokio::test]
async fn test_first_cycle_records_baseline_only() {
    let dir = tempfile::tempdir().unwrap();
    let store = store_in(&dir);
    let source = ScriptedSource::steady(vec![item("m2", 1), item("m1", 0)]);
    let mut poll = connect(&source, Arc::clone(&store), &config(60)).await;

    let report = poll.run_cycle(&CancellationToken::new()).await.unwrap();

    assert!(report.baseline);
    assert_eq!(report.fetched, 2);
    assert_eq!(report.new_items, 0);
    assert!(!report.committed);
    assert_eq!(poll.cursor().current(), Some("m2"));
    assert!(!store.path().exists());
}

#[tokio::test]
async fn test_new_items_are_committed_once() {
    let dir = tempfile::tempdir().unwrap();
    let store = store_in(&dir);
    let source = ScriptedSource::steady(vec![item("m3", 3), item("m2", 2), item("m1", 1)]);
    source.push_batch(Ok(vec![item("m1", 1)]));
    let mut poll = connect(&source, Arc::clone(&store), &config(60)).await;
    let cancel = CancellationToken::new();

    poll.run_cycle(&cancel).await.unwrap();
    assert_eq!(poll.cursor().current(), Some("m1"));

    let report = poll.run_cycle(&cancel).await.unwrap();
    assert_eq!(report.new_items, 2);
    assert!(report.committed);
    assert_eq!(poll.cursor().current(), Some("m3"));

    let records = store.load().await.unwrap();
    let ids: Vec<&str> = records.iter().map(|r| r.id.as_str()).collect();
    assert_eq!(ids, vec!["m3", "m2"]);
    assert_eq!(records[0].sender.as_deref(), Some("Sender m3"));
    assert!(records.iter().all(|r| !r.read));

    let report = poll.run_cycle(&cancel).await.unwrap();
    assert_eq!(report.new_items, 0);
    assert!(!report.committed);
    assert_eq!(store.load().await.unwrap().len(), 2);
}

#[tokio::test]
async fn test_empty_batch_keeps_cursor() {
    let dir = tempfile::tempdir().unwrap();
    let store = store_in(&dir);
    let source = ScriptedSource::steady(vec![item("m2", 2), item("m1", 1)]);
    source.push_batch(Ok(vec![item("m1", 1)]));
    source.push_batch(Ok(vec![]));
    let mut poll = connect(&source, Arc::clone(&store), &config(60)).await;
    let cancel = CancellationToken::new();

    poll.run_cycle(&cancel).await.unwrap();
    let report = poll.run_cycle(&cancel).await.unwrap();
    assert_eq!(report.fetched, 0);
    assert_eq!(poll.cursor().current(), Some("m1"));

    let report = poll.run_cycle(&cancel).await.unwrap();
    assert_eq!(report.new_items, 1);
    assert_eq!(store.load().await.unwrap()[0].id, "m2");
}

#[tokio::test]
async fn test_transient_failure_skips_cycle() {
    let dir = tempfile::tempdir().unwrap();
    let store = store_in(&dir);
    let source = ScriptedSource::steady(vec![item("m2", 2), item("m1", 1)]);
    source.push_batch(Ok(vec![item("m1", 1)]));
    source.push_batch(Err(SourceError::Transient("rate limited".into())));
    let mut poll = connect(&source, Arc::clone(&store), &config(60)).await;
    let cancel = CancellationToken::new();

    poll.run_cycle(&cancel).await.unwrap();
    let err = poll.run_cycle(&cancel).await.unwrap_err();
    assert!(matches!(err, CycleError::Transient(_)));
    assert_eq!(poll.cursor().current(), Some("m1"));
    assert_eq!(source.sessions(), 1);

    // The item missed during the failed cycle is still reported once.
    let report = poll.run_cycle(&cancel).await.unwrap();
    assert_eq!(report.new_items, 1);
    assert_eq!(store.load().await.unwrap().len(), 1);
}

#[tokio::test]
async fn test_auth_failure_reacquires_session() {
    let dir = tempfile::tempdir().unwrap();
    let source = ScriptedSource::steady(vec![item("m1", 1)]);
    source.push_batch(Ok(vec![item("m1", 1)]));
    source.push_batch(Err(SourceError::Auth("token expired".into())));
    let mut poll = connect(&source, store_in(&dir), &config(60)).await;
    let cancel = CancellationToken::new();

    poll.run_cycle(&cancel).await.unwrap();
    let err = poll.run_cycle(&cancel).await.unwrap_err();
    assert!(matches!(
        err,
        CycleError::Reconnect {
            source: SourceError::Auth(_),
            reconnected: true
        }
    ));
    assert_eq!(source.sessions(), 2);
    assert_eq!(poll.cursor().current(), Some("m1"));

    poll.run_cycle(&cancel).await.unwrap();
    let fetches = source.fetches();
    assert_eq!(fetches.last().unwrap().0, 2);
}

#[tokio::test(start_paused = true)]
async fn test_failed_reconnect_keeps_stale_session() {
    let dir = tempfile::tempdir().unwrap();
    let source = ScriptedSource::steady(vec![item("m1", 1)]);
    source.push_batch(Ok(vec![item("m1", 1)]));
    source.push_batch(Err(SourceError::Protocol("garbled".into())));

    let mut config = config(60);
    config.reconnect = ReconnectPolicy::new(
        3,
        Duration::from_millis(500),
        Duration::from_millis(800),
    );
    let mut poll = connect(&source, store_in(&dir), &config).await;
    for _ in 0..3 {
        source.push_connect(Err(SourceError::Auth("still down".into())));
    }
    let cancel = CancellationToken::new();

    poll.run_cycle(&cancel).await.unwrap();
    let started = Instant::now();
    let err = poll.run_cycle(&cancel).await.unwrap_err();

    assert!(matches!(
        err,
        CycleError::Reconnect {
            reconnected: false,
            ..
        }
    ));
    // Two backoff waits between three attempts: 500ms then 800ms (capped).
    assert_eq!(started.elapsed(), Duration::from_millis(1300));
    assert_eq!(source.sessions(), 1);

    poll.run_cycle(&cancel).await.unwrap();
    assert_eq!(source.fetches().last().unwrap().0, 1);
}

#[tokio::test]
async fn test_store_failure_leaves_cursor() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("notifications.json");
    std::fs::create_dir(&path).unwrap();
    let store = Arc::new(NotificationStore::new(&path, StorePolicy::AppendOnly));

    let source = ScriptedSource::steady(vec![item("m2", 2), item("m1", 1)]);
    source.push_batch(Ok(vec![item("m1", 1)]));
    let mut poll = connect(&source, store, &config(60)).await;
    let cancel = CancellationToken::new();

    poll.run_cycle(&cancel).await.unwrap();
    let err = poll.run_cycle(&cancel).await.unwrap_err();
    assert!(matches!(err, CycleError::Store(_)));
    assert_eq!(poll.cursor().current(), Some("m1"));
}

#[tokio::test]
async fn test_retention_prunes_after_commit() {
    let dir = tempfile::tempdir().unwrap();
    let store = store_in(&dir);
    let source = ScriptedSource::steady(vec![item("m4", 4), item("m3", 3), item("m2", 2)]);
    source.push_batch(Ok(vec![item("m1", 1)]));

    let mut config = config(60);
    config.retention = Some(2);
    let mut poll = connect(&source, Arc::clone(&store), &config).await;
    let cancel = CancellationToken::new();

    poll.run_cycle(&cancel).await.unwrap();
    poll.run_cycle(&cancel).await.unwrap();

    let ids: Vec<String> = store.load().await.unwrap().into_iter().map(|r| r.id).collect();
    assert_eq!(ids, vec!["m4", "m3"]);
}

// ── Scheduler ───────────────────────────────────────────────────────────────

fn poller(source: &ScriptedSource, config: PollerConfig) -> (Poller, tempfile::TempDir) {
    let dir = tempfile::tempdir().unwrap();
    let poller = Poller::new(Arc::new(source.clone()), store_in(&dir), config);
    (poller, dir)
}

#[tokio::test(start_paused = true)]
async fn test_cycles_start_on_fixed_interval() {
    let source = ScriptedSource::steady(vec![item("m1", 1)]).with_fetch_delay(Duration::from_secs(3));
    let (mut poller, _dir) = poller(&source, config(10));

    let started = Instant::now();
    poller.start().await.unwrap();
    tokio::time::sleep(Duration::from_secs(35)).await;
    poller.stop().await;

    let fetches = source.fetches();
    assert_eq!(fetches.len(), 4);
    assert_eq!(fetches[0].1, started);
    assert!(gaps(&fetches).iter().all(|g| *g == Duration::from_secs(10)));
}

#[tokio::test(start_paused = true)]
async fn test_overrunning_cycle_is_followed_immediately() {
    let source = ScriptedSource::steady(vec![item("m1", 1)]).with_fetch_delay(Duration::from_secs(5));
    let mut config = config(2);
    config.stop_timeout = Duration::from_secs(10);
    let (mut poller, _dir) = poller(&source, config);

    poller.start().await.unwrap();
    tokio::time::sleep(Duration::from_secs(12)).await;
    poller.stop().await;

    let fetches = source.fetches();
    assert_eq!(fetches.len(), 3);
    assert!(gaps(&fetches).iter().all(|g| *g == Duration::from_secs(5)));
}

#[tokio::test(start_paused = true)]
async fn test_stop_waits_for_in_flight_cycle() {
    let source =
        ScriptedSource::steady(vec![item("m1", 1)]).with_fetch_delay(Duration::from_millis(500));
    let (mut poller, _dir) = poller(&source, config(60));

    poller.start().await.unwrap();
    tokio::time::sleep(Duration::from_millis(100)).await;

    let stop_called = Instant::now();
    poller.stop().await;

    assert_eq!(stop_called.elapsed(), Duration::from_millis(400));
    assert_eq!(poller.state(), PollerState::Stopped);
    assert_eq!(source.fetches().len(), 1);
}

#[tokio::test(start_paused = true)]
async fn test_stop_is_bounded_by_timeout() {
    let source = ScriptedSource::steady(vec![item("m1", 1)]).with_fetch_delay(Duration::from_secs(30));
    let (mut poller, _dir) = poller(&source, config(60));

    poller.start().await.unwrap();
    tokio::time::sleep(Duration::from_millis(100)).await;

    let stop_called = Instant::now();
    poller.stop().await;

    assert_eq!(stop_called.elapsed(), Duration::from_secs(1));
    assert_eq!(poller.state(), PollerState::Stopped);
}

#[tokio::test(start_paused = true)]
async fn test_restart_waits_for_detached_cycle() {
    let source = ScriptedSource::steady(vec![item("m1", 1)]).with_fetch_delay(Duration::from_secs(30));
    let (mut poller, _dir) = poller(&source, config(60));

    poller.start().await.unwrap();
    tokio::time::sleep(Duration::from_millis(100)).await;
    poller.stop().await;

    // The first cycle is still fetching.
    assert!(matches!(
        poller.start().await,
        Err(PollerError::AlreadyRunning)
    ));
    assert_eq!(source.sessions(), 1);
    assert_eq!(poller.state(), PollerState::Stopped);

    tokio::time::sleep(Duration::from_secs(30)).await;
    poller.start().await.unwrap();
    assert_eq!(source.sessions(), 2);
    assert_eq!(poller.state(), PollerState::Running);
    poller.stop().await;
}

#[tokio::test(start_paused = true)]
async fn test_no_cycle_after_stop() {
    let source = ScriptedSource::steady(vec![item("m1", 1)]);
    let (mut poller, _dir) = poller(&source, config(10));

    poller.start().await.unwrap();
    tokio::time::sleep(Duration::from_secs(15)).await;
    poller.stop().await;
    tokio::time::sleep(Duration::from_secs(60)).await;

    assert_eq!(source.fetches().len(), 2);
}

#[tokio::test(start_paused = true)]
async fn test_startup_failure_leaves_poller_stopped() {
    let source = ScriptedSource::steady(vec![item("m1", 1)]);
    source.push_connect(Err(SourceError::Auth("no credentials".into())));
    let (mut poller, _dir) = poller(&source, config(60));
    assert_eq!(poller.state(), PollerState::Idle);

    let err = poller.start().await.unwrap_err();
    assert!(matches!(
        err,
        PollerError::StartupFailure(SourceError::Auth(_))
    ));
    assert_eq!(poller.state(), PollerState::Stopped);

    tokio::time::sleep(Duration::from_secs(120)).await;
    assert!(source.fetches().is_empty());

    // A later start may succeed.
    poller.start().await.unwrap();
    assert_eq!(poller.state(), PollerState::Running);
    poller.stop().await;
}

#[tokio::test(start_paused = true)]
async fn test_start_twice_is_rejected() {
    let source = ScriptedSource::steady(vec![item("m1", 1)]);
    let (mut poller, _dir) = poller(&source, config(60));

    poller.start().await.unwrap();
    assert!(matches!(
        poller.start().await,
        Err(PollerError::AlreadyRunning)
    ));
    assert_eq!(source.sessions(), 1);
    poller.stop().await;
}

#[tokio::test(start_paused = true)]
async fn test_reconnecting_state_is_published() {
    let source = ScriptedSource::steady(vec![item("m1", 1)]);
    source.push_batch(Err(SourceError::Auth("expired".into())));

    let mut config = config(60);
    config.reconnect = ReconnectPolicy::new(3, Duration::from_secs(1), Duration::from_secs(1));
    let (mut poller, _dir) = poller(&source, config);

    poller.start().await.unwrap();
    source.push_connect(Err(SourceError::Auth("still expired".into())));
    source.push_connect(Err(SourceError::Auth("still expired".into())));
    let mut states = poller.subscribe();

    tokio::time::sleep(Duration::from_millis(500)).await;
    assert_eq!(poller.state(), PollerState::Reconnecting);

    tokio::time::sleep(Duration::from_secs(2)).await;
    assert_eq!(poller.state(), PollerState::Running);
    assert!(states.has_changed().unwrap());
    assert_eq!(source.sessions(), 2);

    poller.stop().await;
    assert_eq!(*states.borrow_and_update(), PollerState::Stopped);
}

#[tokio::test(start_paused = true)]
async fn test_force_check_resets_cursor() {
    let dir = tempfile::tempdir().unwrap();
    let store = store_in(&dir);
    let source = ScriptedSource::steady(vec![item("m2", 2), item("m1", 1)]);
    source.push_batch(Ok(vec![item("m1", 1)]));
    let mut poller = Poller::new(Arc::new(source.clone()), Arc::clone(&store), config(60));

    assert!(!poller.force_check().await);

    poller.start().await.unwrap();
    tokio::time::sleep(Duration::from_secs(1)).await;
    assert_eq!(source.fetches().len(), 1);

    // m2 arrived since the baseline, but the forced cycle re-baselines.
    assert!(poller.force_check().await);
    assert_eq!(source.fetches().len(), 2);
    assert!(!store.path().exists());

    // m2 is now the cursor, so the next cycle has nothing new either.
    tokio::time::sleep(Duration::from_secs(60)).await;
    assert_eq!(source.fetches().len(), 3);
    assert!(!store.path().exists());

    poller.stop().await;
    assert!(!poller.force_check().await);
}
