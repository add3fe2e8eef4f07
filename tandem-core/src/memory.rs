//! In-memory backends for tests and the QA tester.
//!
//! These implement every persistence seam over plain mutex-guarded maps.
//! They are not production storage; the real app wires durable adapters in
//! at the composition root.
use async_trait::async_trait;
use chrono::{DateTime, Duration, TimeZone, Utc};
use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::{Mutex, MutexGuard, PoisonError};

use crate::branches::{BranchLabel, BranchProgress};
use crate::error::SyncError;
use crate::model::{ActivityType, CoupleId, GameKind, Match, MatchId, PuzzleId, UserId};
use crate::puzzle::{LinkedPuzzle, PuzzleDefinition, WordSearchPuzzle};
use crate::rewards::RewardKey;
use crate::{
    AppliedKeyRepo, Clock, CoupleDirectory, CreditSink, MatchRepository, ProgressionRepo,
    PuzzleCatalog,
};

fn guard<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Match store, progression store, applied-key set, and couple directory in
/// one struct, so a single `Arc` can back all four seams.
#[derive(Default)]
pub struct MemoryBackend {
    matches: Mutex<Vec<Match>>,
    progression: Mutex<HashMap<(CoupleId, ActivityType), BranchProgress>>,
    applied: Mutex<HashSet<RewardKey>>,
    couples: Mutex<HashMap<CoupleId, (UserId, UserId)>>,
}

impl MemoryBackend {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register_couple(&self, couple: CoupleId, player1: UserId, player2: UserId) {
        guard(&self.couples).insert(couple, (player1, player2));
    }
}

#[async_trait]
impl MatchRepository for MemoryBackend {
    async fn fetch(&self, id: &MatchId) -> Result<Option<Match>, SyncError> {
        Ok(guard(&self.matches)
            .iter()
            .find(|m| m.match_id == *id)
            .cloned())
    }

    async fn persist(&self, record: &Match) -> Result<(), SyncError> {
        let mut matches = guard(&self.matches);
        if let Some(existing) = matches.iter_mut().find(|m| m.match_id == record.match_id) {
            *existing = record.clone();
        } else {
            matches.push(record.clone());
        }
        Ok(())
    }

    async fn active_for(
        &self,
        couple: &CoupleId,
        kind: GameKind,
    ) -> Result<Option<Match>, SyncError> {
        Ok(guard(&self.matches)
            .iter()
            .find(|m| {
                m.couple_id == *couple
                    && m.game_kind == kind
                    && m.status == crate::model::MatchStatus::Active
            })
            .cloned())
    }

    async fn latest_for(
        &self,
        couple: &CoupleId,
        kind: GameKind,
    ) -> Result<Option<Match>, SyncError> {
        Ok(guard(&self.matches)
            .iter()
            .rev()
            .find(|m| m.couple_id == *couple && m.game_kind == kind)
            .cloned())
    }

    async fn count_for(&self, couple: &CoupleId, kind: GameKind) -> Result<u64, SyncError> {
        Ok(guard(&self.matches)
            .iter()
            .filter(|m| m.couple_id == *couple && m.game_kind == kind)
            .count() as u64)
    }
}

#[async_trait]
impl ProgressionRepo for MemoryBackend {
    async fn load(
        &self,
        couple: &CoupleId,
        activity: ActivityType,
    ) -> Result<Option<BranchProgress>, SyncError> {
        Ok(guard(&self.progression)
            .get(&(couple.clone(), activity))
            .copied())
    }

    async fn store(
        &self,
        couple: &CoupleId,
        activity: ActivityType,
        progress: &BranchProgress,
    ) -> Result<(), SyncError> {
        guard(&self.progression).insert((couple.clone(), activity), *progress);
        Ok(())
    }
}

#[async_trait]
impl AppliedKeyRepo for MemoryBackend {
    async fn contains(&self, key: &RewardKey) -> Result<bool, SyncError> {
        Ok(guard(&self.applied).contains(key))
    }

    async fn insert(&self, key: &RewardKey) -> Result<(), SyncError> {
        guard(&self.applied).insert(key.clone());
        Ok(())
    }

    async fn list_for(&self, couple: &CoupleId) -> Result<Vec<RewardKey>, SyncError> {
        Ok(guard(&self.applied)
            .iter()
            .filter(|key| key.couple == *couple)
            .cloned()
            .collect())
    }

    async fn clear_for(&self, couple: &CoupleId) -> Result<(), SyncError> {
        guard(&self.applied).retain(|key| key.couple != *couple);
        Ok(())
    }
}

#[async_trait]
impl CoupleDirectory for MemoryBackend {
    async fn members(&self, couple: &CoupleId) -> Result<(UserId, UserId), SyncError> {
        guard(&self.couples)
            .get(couple)
            .cloned()
            .ok_or_else(|| SyncError::Storage(format!("unknown couple {couple}")))
    }
}

/// Catalog entry for the in-memory catalog.
struct CatalogEntry {
    activity: ActivityType,
    branch: BranchLabel,
    definition: PuzzleDefinition,
}

/// Puzzle catalog over a flat entry list; first match per (activity, branch)
/// wins.
#[derive(Default)]
pub struct MemoryCatalog {
    entries: Mutex<Vec<CatalogEntry>>,
}

impl MemoryCatalog {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&self, activity: ActivityType, branch: BranchLabel, definition: PuzzleDefinition) {
        guard(&self.entries).push(CatalogEntry {
            activity,
            branch,
            definition,
        });
    }
}

#[async_trait]
impl PuzzleCatalog for MemoryCatalog {
    async fn next_puzzle(
        &self,
        activity: ActivityType,
        branch: &BranchLabel,
    ) -> Result<PuzzleDefinition, SyncError> {
        guard(&self.entries)
            .iter()
            .find(|entry| entry.activity == activity && entry.branch == *branch)
            .map(|entry| entry.definition.clone())
            .ok_or_else(|| SyncError::InvalidPuzzleReference(format!("{activity}/{branch}")))
    }

    async fn puzzle(&self, id: &PuzzleId) -> Result<PuzzleDefinition, SyncError> {
        guard(&self.entries)
            .iter()
            .find(|entry| entry.definition.puzzle_id() == id)
            .map(|entry| entry.definition.clone())
            .ok_or_else(|| SyncError::InvalidPuzzleReference(id.to_string()))
    }
}

/// One recorded crediting call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CreditCall {
    pub couple: CoupleId,
    pub amount: i64,
    pub reason: String,
}

/// Credit sink recording every call; can be told to fail the next N calls
/// to exercise the retry path.
#[derive(Default)]
pub struct RecordingCreditSink {
    calls: Mutex<Vec<CreditCall>>,
    fail_remaining: AtomicU32,
}

impl RecordingCreditSink {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Fail the next `count` credit attempts with `SyncError::Credit`.
    pub fn fail_next(&self, count: u32) {
        self.fail_remaining.store(count, Ordering::SeqCst);
    }

    #[must_use]
    pub fn calls(&self) -> Vec<CreditCall> {
        guard(&self.calls).clone()
    }
}

#[async_trait]
impl CreditSink for RecordingCreditSink {
    async fn credit(&self, couple: &CoupleId, amount: i64, reason: &str) -> Result<(), SyncError> {
        let remaining = self.fail_remaining.load(Ordering::SeqCst);
        if remaining > 0 {
            self.fail_remaining.store(remaining - 1, Ordering::SeqCst);
            return Err(SyncError::Credit("scripted credit failure".into()));
        }
        guard(&self.calls).push(CreditCall {
            couple: couple.clone(),
            amount,
            reason: reason.to_string(),
        });
        Ok(())
    }
}

/// Deterministic clock advanced by hand.
pub struct ManualClock {
    now: Mutex<DateTime<Utc>>,
}

impl ManualClock {
    #[must_use]
    pub fn starting_at(now: DateTime<Utc>) -> Self {
        Self {
            now: Mutex::new(now),
        }
    }

    pub fn advance(&self, by: Duration) {
        let mut now = guard(&self.now);
        *now = *now + by;
    }
}

impl Default for ManualClock {
    fn default() -> Self {
        let start = Utc
            .with_ymd_and_hms(2025, 6, 1, 9, 0, 0)
            .single()
            .unwrap_or(DateTime::<Utc>::MIN_UTC);
        Self::starting_at(start)
    }
}

impl Clock for ManualClock {
    fn now(&self) -> DateTime<Utc> {
        *guard(&self.now)
    }
}

/// Three-cell Linked puzzle spelling SUN, with two alternating racks.
#[must_use]
pub fn linked_puzzle_fixture(id: &str) -> LinkedPuzzle {
    LinkedPuzzle {
        puzzle_id: PuzzleId::from(id),
        solution: [("0", 'S'), ("1", 'U'), ("2", 'N')]
            .into_iter()
            .map(|(cell, letter)| (cell.to_string(), letter))
            .collect(),
        racks: vec![vec!['S', 'U', 'X'], vec!['N', 'U', 'Q']],
    }
}

/// Four-word word-search puzzle fixture.
#[must_use]
pub fn word_search_puzzle_fixture(id: &str) -> WordSearchPuzzle {
    WordSearchPuzzle {
        puzzle_id: PuzzleId::from(id),
        rows: 8,
        cols: 8,
        words: vec!["FERN".into(), "MOSS".into(), "PINE".into(), "OAK".into()],
    }
}
