//! Shared polling coordinator.
//!
//! One scheduling loop per process multiplexes every UI consumer over the
//! same fetch cycle: topics with at least one subscriber are fetched each
//! tick, diffed against the cached snapshot, and subscribers are notified
//! only of material changes. Cache entries are immutable `Arc`s replaced
//! wholesale, so concurrent readers never observe a torn update.
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;
use tokio::sync::{mpsc, watch};

use crate::config::ConfigError;
use crate::error::SyncError;
use crate::model::{GameKind, Match, MatchId, MatchStatus, UserId};
use crate::MatchRepository;

/// Poll loop tuning, JSON-deserializable with field defaults.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct PollConfig {
    /// Scheduled tick interval.
    #[serde(default = "PollConfig::default_interval_ms")]
    pub interval_ms: u64,
    /// Upper bound on one fetch; expiry counts as a transient failure.
    #[serde(default = "PollConfig::default_fetch_timeout_ms")]
    pub fetch_timeout_ms: u64,
}

impl PollConfig {
    const fn default_interval_ms() -> u64 {
        4_000
    }

    const fn default_fetch_timeout_ms() -> u64 {
        2_500
    }

    /// Validate interval bounds.
    ///
    /// # Errors
    ///
    /// Returns `ConfigError` when either duration is outside its plausible
    /// range.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if !(250..=120_000).contains(&self.interval_ms) {
            return Err(ConfigError::RangeViolation {
                field: "poll.interval_ms",
                min: 250,
                max: 120_000,
                value: self.interval_ms,
            });
        }
        if !(100..=60_000).contains(&self.fetch_timeout_ms) {
            return Err(ConfigError::RangeViolation {
                field: "poll.fetch_timeout_ms",
                min: 100,
                max: 60_000,
                value: self.fetch_timeout_ms,
            });
        }
        Ok(())
    }
}

impl Default for PollConfig {
    fn default() -> Self {
        Self {
            interval_ms: Self::default_interval_ms(),
            fetch_timeout_ms: Self::default_fetch_timeout_ms(),
        }
    }
}

/// One polling subscription unit: a match, or a named sync resource.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Topic {
    Match(MatchId),
    Resource(String),
}

impl fmt::Display for Topic {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Match(id) => write!(f, "match/{id}"),
            Self::Resource(name) => write!(f, "resource/{name}"),
        }
    }
}

/// The diffable material view of one topic's state.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TopicSnapshot {
    pub status: MatchStatus,
    pub turn_holder: Option<UserId>,
    pub turn_number: u32,
    pub progress_percent: u8,
    /// Locked cells (Linked) or found words (Word Search).
    pub item_count: u32,
}

impl TopicSnapshot {
    #[must_use]
    pub fn from_match(record: &Match) -> Self {
        let item_count = match record.game_kind {
            GameKind::Linked => record.locked_cell_count,
            GameKind::WordSearch => record.total_words_found,
        };
        Self {
            status: record.status,
            turn_holder: record.current_turn.clone(),
            turn_number: record.turn_number,
            progress_percent: record.progress_percent(),
            item_count,
        }
    }
}

/// What changed between two observed snapshots.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChangeKind {
    /// First observation of a topic; everything is new.
    Initial,
    TurnHolder,
    Status,
    Counts,
}

/// Delivered to every subscriber of a topic on material change.
#[derive(Debug, Clone)]
pub struct ChangeEvent {
    pub topic: Topic,
    pub changes: Vec<ChangeKind>,
    pub snapshot: Arc<TopicSnapshot>,
}

/// Handle returned by `subscribe`. Events arrive on `events`; hand the
/// subscription back to `unsubscribe` when the consumer goes away.
pub struct Subscription {
    pub topic: Topic,
    id: u64,
    pub events: mpsc::UnboundedReceiver<ChangeEvent>,
}

/// Authoritative-state fetcher behind the coordinator. Implementations wrap
/// the remote match store.
#[async_trait::async_trait]
pub trait SnapshotSource: Send + Sync {
    /// Fetch the current state of one topic.
    ///
    /// # Errors
    ///
    /// Returns an error when the backend is unreachable or the topic has no
    /// source.
    async fn fetch(&self, topic: &Topic) -> Result<TopicSnapshot, SyncError>;
}

/// `SnapshotSource` over the match repository, for match topics.
pub struct MatchSnapshotSource {
    matches: Arc<dyn MatchRepository>,
}

impl MatchSnapshotSource {
    #[must_use]
    pub fn new(matches: Arc<dyn MatchRepository>) -> Self {
        Self { matches }
    }
}

#[async_trait::async_trait]
impl SnapshotSource for MatchSnapshotSource {
    async fn fetch(&self, topic: &Topic) -> Result<TopicSnapshot, SyncError> {
        match topic {
            Topic::Match(id) => {
                let record = self
                    .matches
                    .fetch(id)
                    .await?
                    .ok_or_else(|| SyncError::UnknownMatch(id.clone()))?;
                Ok(TopicSnapshot::from_match(&record))
            }
            Topic::Resource(name) => Err(SyncError::Storage(format!(
                "no snapshot source for resource topic {name}"
            ))),
        }
    }
}

struct TopicEntry {
    subscribers: HashMap<u64, mpsc::UnboundedSender<ChangeEvent>>,
    cache: Option<Arc<TopicSnapshot>>,
    /// Bumped on every completed fetch; lets a waiter that lost the
    /// single-flight race reuse the fresh result instead of refetching.
    generation: u64,
    fetch_lock: Arc<tokio::sync::Mutex<()>>,
}

impl Default for TopicEntry {
    fn default() -> Self {
        Self {
            subscribers: HashMap::new(),
            cache: None,
            generation: 0,
            fetch_lock: Arc::new(tokio::sync::Mutex::new(())),
        }
    }
}

/// Process-wide polling coordinator. Construct one at the composition root
/// and pass it to consumers; the scheduling loop (`run`) is the only writer
/// of cache entries.
pub struct PollCoordinator {
    source: Arc<dyn SnapshotSource>,
    config: PollConfig,
    next_subscriber_id: AtomicU64,
    topics: Mutex<HashMap<Topic, TopicEntry>>,
}

impl PollCoordinator {
    #[must_use]
    pub fn new(source: Arc<dyn SnapshotSource>, config: PollConfig) -> Self {
        Self {
            source,
            config,
            next_subscriber_id: AtomicU64::new(1),
            topics: Mutex::new(HashMap::new()),
        }
    }

    fn topics_lock(&self) -> std::sync::MutexGuard<'_, HashMap<Topic, TopicEntry>> {
        self.topics.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Register interest in a topic. The loop polls only topics with at
    /// least one live subscription.
    pub fn subscribe(&self, topic: Topic) -> Subscription {
        let id = self.next_subscriber_id.fetch_add(1, Ordering::Relaxed);
        let (tx, rx) = mpsc::unbounded_channel();
        let mut map = self.topics_lock();
        map.entry(topic.clone()).or_default().subscribers.insert(id, tx);
        Subscription {
            topic,
            id,
            events: rx,
        }
    }

    /// Drop a subscription. An in-flight fetch for the topic still
    /// completes (other subscribers may be waiting on it); only future
    /// scheduling stops once the count reaches zero. The cached snapshot is
    /// kept warm for late re-subscribers.
    pub fn unsubscribe(&self, subscription: Subscription) {
        let mut map = self.topics_lock();
        if let Some(entry) = map.get_mut(&subscription.topic) {
            entry.subscribers.remove(&subscription.id);
        }
    }

    /// Last observed snapshot, for immediate rendering before the next poll.
    #[must_use]
    pub fn cached_state(&self, topic: &Topic) -> Option<Arc<TopicSnapshot>> {
        self.topics_lock().get(topic).and_then(|e| e.cache.clone())
    }

    /// Live subscription count for a topic.
    #[must_use]
    pub fn subscriber_count(&self, topic: &Topic) -> usize {
        self.topics_lock()
            .get(topic)
            .map_or(0, |e| e.subscribers.len())
    }

    fn subscribed_topics(&self) -> Vec<Topic> {
        self.topics_lock()
            .iter()
            .filter(|(_, entry)| !entry.subscribers.is_empty())
            .map(|(topic, _)| topic.clone())
            .collect()
    }

    /// Force an immediate fetch+diff+notify cycle for one topic, bypassing
    /// the schedule. Overlapping calls for the same topic collapse into one
    /// in-flight fetch whose result all waiters share.
    ///
    /// # Errors
    ///
    /// Returns `SyncError::Transient` on timeout, or whatever the source
    /// fails with.
    pub async fn poll_now(&self, topic: &Topic) -> Result<Arc<TopicSnapshot>, SyncError> {
        let (lock, seen_generation) = {
            let mut map = self.topics_lock();
            let entry = map.entry(topic.clone()).or_default();
            (entry.fetch_lock.clone(), entry.generation)
        };

        let _guard = lock.lock().await;
        {
            let map = self.topics_lock();
            if let Some(entry) = map.get(topic) {
                if entry.generation != seen_generation {
                    // Another fetch completed while we waited on the lock.
                    if let Some(cache) = entry.cache.clone() {
                        return Ok(cache);
                    }
                }
            }
        }

        let fetched = tokio::time::timeout(
            Duration::from_millis(self.config.fetch_timeout_ms),
            self.source.fetch(topic),
        )
        .await
        .map_err(|_| SyncError::Transient(format!("fetch for {topic} timed out")))??;
        let snapshot = Arc::new(fetched);

        let mut map = self.topics_lock();
        let entry = map.entry(topic.clone()).or_default();
        let changes = Self::diff(entry.cache.as_deref(), &snapshot);
        entry.cache = Some(snapshot.clone());
        entry.generation += 1;
        if !changes.is_empty() {
            let event = ChangeEvent {
                topic: topic.clone(),
                changes,
                snapshot: snapshot.clone(),
            };
            entry
                .subscribers
                .retain(|_, tx| tx.send(event.clone()).is_ok());
        }
        Ok(snapshot)
    }

    fn diff(previous: Option<&TopicSnapshot>, current: &TopicSnapshot) -> Vec<ChangeKind> {
        let Some(prev) = previous else {
            return vec![ChangeKind::Initial];
        };
        let mut changes = Vec::new();
        if prev.turn_holder != current.turn_holder {
            changes.push(ChangeKind::TurnHolder);
        }
        if prev.status != current.status {
            changes.push(ChangeKind::Status);
        }
        if prev.item_count != current.item_count
            || prev.progress_percent != current.progress_percent
            || prev.turn_number != current.turn_number
        {
            changes.push(ChangeKind::Counts);
        }
        changes
    }

    /// The scheduling loop. Runs until `shutdown` flips to true or its
    /// sender is dropped. Failed polls are logged and swallowed: a stale
    /// cache keeps rendering, and other topics keep polling.
    pub async fn run(self: Arc<Self>, mut shutdown: watch::Receiver<bool>) {
        let mut ticker = tokio::time::interval(Duration::from_millis(self.config.interval_ms));
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    for topic in self.subscribed_topics() {
                        if let Err(err) = self.poll_now(&topic).await {
                            log::warn!("poll for {topic} failed, cache stays stale: {err}");
                        }
                    }
                }
                changed = shutdown.changed() => {
                    if changed.is_err() || *shutdown.borrow() {
                        break;
                    }
                }
            }
        }
        log::debug!("poll loop stopped");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicUsize;

    fn snapshot(turn_number: u32, item_count: u32) -> TopicSnapshot {
        TopicSnapshot {
            status: MatchStatus::Active,
            turn_holder: Some(UserId::from(if turn_number % 2 == 1 { "ben" } else { "ana" })),
            turn_number,
            progress_percent: (item_count * 10).min(100) as u8,
            item_count,
        }
    }

    /// Source returning a programmable snapshot, counting fetches.
    struct ScriptedSource {
        current: Mutex<TopicSnapshot>,
        fetches: AtomicUsize,
        delay_ms: u64,
        fail: std::sync::atomic::AtomicBool,
    }

    impl ScriptedSource {
        fn new(initial: TopicSnapshot) -> Self {
            Self {
                current: Mutex::new(initial),
                fetches: AtomicUsize::new(0),
                delay_ms: 0,
                fail: std::sync::atomic::AtomicBool::new(false),
            }
        }

        fn with_delay(initial: TopicSnapshot, delay_ms: u64) -> Self {
            Self {
                delay_ms,
                ..Self::new(initial)
            }
        }

        fn set(&self, snapshot: TopicSnapshot) {
            *self.current.lock().unwrap() = snapshot;
        }

        fn fetch_count(&self) -> usize {
            self.fetches.load(Ordering::SeqCst)
        }
    }

    #[async_trait::async_trait]
    impl SnapshotSource for ScriptedSource {
        async fn fetch(&self, _topic: &Topic) -> Result<TopicSnapshot, SyncError> {
            self.fetches.fetch_add(1, Ordering::SeqCst);
            if self.delay_ms > 0 {
                tokio::time::sleep(Duration::from_millis(self.delay_ms)).await;
            }
            if self.fail.load(Ordering::SeqCst) {
                return Err(SyncError::Transient("scripted outage".into()));
            }
            Ok(self.current.lock().unwrap().clone())
        }
    }

    fn topic() -> Topic {
        Topic::Match(MatchId::from("m1"))
    }

    fn coordinator(source: Arc<ScriptedSource>) -> Arc<PollCoordinator> {
        Arc::new(PollCoordinator::new(source, PollConfig::default()))
    }

    #[tokio::test]
    async fn three_subscribers_share_one_fetch() {
        let source = Arc::new(ScriptedSource::new(snapshot(1, 0)));
        let coordinator = coordinator(source.clone());

        let mut subs = Vec::new();
        for _ in 0..3 {
            subs.push(coordinator.subscribe(topic()));
        }
        coordinator.poll_now(&topic()).await.unwrap();

        assert_eq!(source.fetch_count(), 1);
        for sub in &mut subs {
            let event = sub.events.try_recv().unwrap();
            assert_eq!(event.changes, vec![ChangeKind::Initial]);
            assert_eq!(event.snapshot.turn_number, 1);
        }
    }

    #[tokio::test]
    async fn unchanged_state_produces_no_event() {
        let source = Arc::new(ScriptedSource::new(snapshot(1, 0)));
        let coordinator = coordinator(source);
        let mut sub = coordinator.subscribe(topic());

        coordinator.poll_now(&topic()).await.unwrap();
        sub.events.try_recv().unwrap();

        coordinator.poll_now(&topic()).await.unwrap();
        assert!(sub.events.try_recv().is_err());
    }

    #[tokio::test]
    async fn turn_flip_is_reported_as_material_change() {
        let source = Arc::new(ScriptedSource::new(snapshot(1, 0)));
        let coordinator = coordinator(source.clone());
        let mut sub = coordinator.subscribe(topic());
        coordinator.poll_now(&topic()).await.unwrap();
        sub.events.try_recv().unwrap();

        source.set(snapshot(2, 1));
        coordinator.poll_now(&topic()).await.unwrap();
        let event = sub.events.try_recv().unwrap();
        assert!(event.changes.contains(&ChangeKind::TurnHolder));
        assert!(event.changes.contains(&ChangeKind::Counts));
    }

    #[tokio::test]
    async fn cached_state_serves_reads_between_polls() {
        let source = Arc::new(ScriptedSource::new(snapshot(3, 2)));
        let coordinator = coordinator(source.clone());
        assert!(coordinator.cached_state(&topic()).is_none());

        coordinator.poll_now(&topic()).await.unwrap();
        let cached = coordinator.cached_state(&topic()).unwrap();
        assert_eq!(cached.turn_number, 3);
        assert_eq!(source.fetch_count(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn concurrent_poll_now_collapses_into_one_fetch() {
        let source = Arc::new(ScriptedSource::with_delay(snapshot(1, 0), 200));
        let coordinator = coordinator(source.clone());

        let first = {
            let coordinator = coordinator.clone();
            tokio::spawn(async move { coordinator.poll_now(&topic()).await })
        };
        let second = {
            let coordinator = coordinator.clone();
            tokio::spawn(async move { coordinator.poll_now(&topic()).await })
        };
        let a = first.await.unwrap().unwrap();
        let b = second.await.unwrap().unwrap();

        assert_eq!(source.fetch_count(), 1);
        assert_eq!(a, b);
    }

    #[tokio::test(start_paused = true)]
    async fn loop_ignores_topics_without_subscribers() {
        let source = Arc::new(ScriptedSource::new(snapshot(1, 0)));
        let coordinator = coordinator(source.clone());
        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let handle = tokio::spawn(coordinator.clone().run(shutdown_rx));

        tokio::time::sleep(Duration::from_millis(15_000)).await;
        assert_eq!(source.fetch_count(), 0);

        let sub = coordinator.subscribe(topic());
        tokio::time::sleep(Duration::from_millis(15_000)).await;
        assert!(source.fetch_count() > 0);

        coordinator.unsubscribe(sub);
        let after = source.fetch_count();
        tokio::time::sleep(Duration::from_millis(15_000)).await;
        assert_eq!(source.fetch_count(), after);

        shutdown_tx.send(true).unwrap();
        handle.await.unwrap();
    }

    #[tokio::test(start_paused = true)]
    async fn failed_poll_keeps_the_loop_and_cache_alive() {
        let source = Arc::new(ScriptedSource::new(snapshot(1, 0)));
        let coordinator = coordinator(source.clone());
        let mut sub = coordinator.subscribe(topic());
        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let handle = tokio::spawn(coordinator.clone().run(shutdown_rx));

        tokio::time::sleep(Duration::from_millis(5_000)).await;
        sub.events.try_recv().unwrap();
        let cached = coordinator.cached_state(&topic()).unwrap();

        source.fail.store(true, Ordering::SeqCst);
        tokio::time::sleep(Duration::from_millis(10_000)).await;
        // stale-but-present cache keeps rendering
        assert_eq!(coordinator.cached_state(&topic()), Some(cached));

        source.fail.store(false, Ordering::SeqCst);
        source.set(snapshot(2, 1));
        tokio::time::sleep(Duration::from_millis(10_000)).await;
        assert_eq!(coordinator.cached_state(&topic()).unwrap().turn_number, 2);

        shutdown_tx.send(true).unwrap();
        handle.await.unwrap();
    }

    #[tokio::test]
    async fn unsubscribed_consumer_stops_receiving() {
        let source = Arc::new(ScriptedSource::new(snapshot(1, 0)));
        let coordinator = coordinator(source.clone());
        let keeper = coordinator.subscribe(topic());
        let leaver = coordinator.subscribe(topic());
        coordinator.unsubscribe(leaver);

        coordinator.poll_now(&topic()).await.unwrap();
        assert_eq!(coordinator.subscriber_count(&topic()), 1);

        let mut keeper = keeper;
        assert!(keeper.events.try_recv().is_ok());
    }
}
