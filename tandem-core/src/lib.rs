//! Tandem Sync Core
//!
//! Synchronization and progression substrate for Tandem's paired mini-games:
//! turn-based match state, per-couple branch progression, an idempotent
//! reward ledger, and a shared polling coordinator. No rendering, transport,
//! or puzzle generation lives here; platform collaborators are reached
//! through the trait seams below.

pub mod admin;
pub mod branches;
pub mod config;
pub mod error;
pub mod memory;
pub mod model;
pub mod moves;
pub mod poller;
pub mod puzzle;
pub mod rewards;
pub mod service;

// Re-export commonly used types
pub use admin::AdminAccess;
pub use branches::{
    BranchAdvance, BranchLabel, BranchPlan, BranchPlans, BranchProgress, BranchProgressionStore,
    WrapPolicy,
};
pub use config::{ConfigError, CoreConfig, ScoringRules, WordSearchRules};
pub use error::{MoveError, SyncError};
pub use model::{
    ActivityType, CoupleId, FoundWord, GameKind, LockOutcome, Match, MatchId, MatchStatus,
    PuzzleId, UserId, WordOutcome,
};
pub use moves::{CellPlacement, MovePayload, PlacementSet, ProposedMove};
pub use poller::{
    ChangeEvent, ChangeKind, MatchSnapshotSource, PollConfig, PollCoordinator, SnapshotSource,
    Subscription, Topic, TopicSnapshot,
};
pub use puzzle::{LinkedPuzzle, PuzzleDefinition, WordSearchPuzzle};
pub use rewards::{ApplyOutcome, AwardKind, RewardKey, RewardLedger};
pub use service::{MatchService, MoveOutcome};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::sync::Arc;

/// Time source seam so tests stay deterministic.
pub trait Clock: Send + Sync {
    fn now(&self) -> DateTime<Utc>;
}

/// Wall clock used in production wiring.
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> DateTime<Utc> {
        Utc::now()
    }
}

/// Remote match store: durable records of every match, current and past.
///
/// Implementations wrap the real transport and must bound every call with a
/// timeout, mapping expiry to `SyncError::Transient`.
#[async_trait]
pub trait MatchRepository: Send + Sync {
    /// Fetch one match by id.
    ///
    /// # Errors
    ///
    /// Returns an error when the backend is unreachable.
    async fn fetch(&self, id: &model::MatchId) -> Result<Option<model::Match>, SyncError>;

    /// Persist (insert or replace) one match record.
    ///
    /// # Errors
    ///
    /// Returns an error when the backend rejects the write.
    async fn persist(&self, record: &model::Match) -> Result<(), SyncError>;

    /// The single active match for a couple and game kind, if any.
    ///
    /// # Errors
    ///
    /// Returns an error when the backend is unreachable.
    async fn active_for(
        &self,
        couple: &model::CoupleId,
        kind: model::GameKind,
    ) -> Result<Option<model::Match>, SyncError>;

    /// Most recently created match for a couple and game kind, regardless of
    /// status. Drives starter alternation.
    ///
    /// # Errors
    ///
    /// Returns an error when the backend is unreachable.
    async fn latest_for(
        &self,
        couple: &model::CoupleId,
        kind: model::GameKind,
    ) -> Result<Option<model::Match>, SyncError>;

    /// Number of matches ever created for a couple and game kind.
    ///
    /// # Errors
    ///
    /// Returns an error when the backend is unreachable.
    async fn count_for(
        &self,
        couple: &model::CoupleId,
        kind: model::GameKind,
    ) -> Result<u64, SyncError>;
}

/// Remote puzzle catalog: pre-built static content, read-only here.
#[async_trait]
pub trait PuzzleCatalog: Send + Sync {
    /// Next puzzle for an activity at a given branch.
    ///
    /// # Errors
    ///
    /// Returns `SyncError::InvalidPuzzleReference` when no content exists
    /// for the pair; this indicates a content configuration defect.
    async fn next_puzzle(
        &self,
        activity: model::ActivityType,
        branch: &branches::BranchLabel,
    ) -> Result<puzzle::PuzzleDefinition, SyncError>;

    /// Look up a puzzle by id.
    ///
    /// # Errors
    ///
    /// Returns `SyncError::InvalidPuzzleReference` when the id is unknown.
    async fn puzzle(&self, id: &model::PuzzleId) -> Result<puzzle::PuzzleDefinition, SyncError>;
}

/// Durable branch progression storage, surviving process restarts.
#[async_trait]
pub trait ProgressionRepo: Send + Sync {
    /// Load progression for a couple and activity, `None` before first use.
    ///
    /// # Errors
    ///
    /// Returns an error when the backend is unreachable.
    async fn load(
        &self,
        couple: &model::CoupleId,
        activity: model::ActivityType,
    ) -> Result<Option<branches::BranchProgress>, SyncError>;

    /// Store progression for a couple and activity.
    ///
    /// # Errors
    ///
    /// Returns an error when the backend rejects the write.
    async fn store(
        &self,
        couple: &model::CoupleId,
        activity: model::ActivityType,
        progress: &branches::BranchProgress,
    ) -> Result<(), SyncError>;
}

/// Durable applied-reward-key storage; append-only outside admin resets.
/// Durability is what keeps idempotency across app relaunches.
#[async_trait]
pub trait AppliedKeyRepo: Send + Sync {
    /// Whether a key is present.
    ///
    /// # Errors
    ///
    /// Returns an error when the backend is unreachable.
    async fn contains(&self, key: &rewards::RewardKey) -> Result<bool, SyncError>;

    /// Record a key as applied.
    ///
    /// # Errors
    ///
    /// Returns an error when the backend rejects the write.
    async fn insert(&self, key: &rewards::RewardKey) -> Result<(), SyncError>;

    /// All applied keys for a couple.
    ///
    /// # Errors
    ///
    /// Returns an error when the backend is unreachable.
    async fn list_for(
        &self,
        couple: &model::CoupleId,
    ) -> Result<Vec<rewards::RewardKey>, SyncError>;

    /// Remove every key for a couple. Reached only through the admin
    /// surface.
    ///
    /// # Errors
    ///
    /// Returns an error when the backend rejects the write.
    async fn clear_for(&self, couple: &model::CoupleId) -> Result<(), SyncError>;
}

/// Remote points-crediting service. Invoked only through the reward
/// ledger's `try_apply`.
#[async_trait]
pub trait CreditSink: Send + Sync {
    /// Credit `amount` points to a couple.
    ///
    /// # Errors
    ///
    /// Returns `SyncError::Credit` when the downstream service fails; the
    /// caller's ledger key stays unapplied so the credit is retryable.
    async fn credit(
        &self,
        couple: &model::CoupleId,
        amount: i64,
        reason: &str,
    ) -> Result<(), SyncError>;
}

/// Resolves a couple id to its two members.
#[async_trait]
pub trait CoupleDirectory: Send + Sync {
    /// The two participants of a couple, in pairing order.
    ///
    /// # Errors
    ///
    /// Returns an error when the couple is unknown or the backend fails.
    async fn members(
        &self,
        couple: &model::CoupleId,
    ) -> Result<(model::UserId, model::UserId), SyncError>;
}

/// Everything the composition root wires into the core. One instance of
/// each collaborator, passed explicitly; no ambient globals.
#[derive(Clone)]
pub struct CoreBackends {
    pub matches: Arc<dyn MatchRepository>,
    pub catalog: Arc<dyn PuzzleCatalog>,
    pub directory: Arc<dyn CoupleDirectory>,
    pub progression: Arc<dyn ProgressionRepo>,
    pub applied_keys: Arc<dyn AppliedKeyRepo>,
    pub credit: Arc<dyn CreditSink>,
    pub clock: Arc<dyn Clock>,
}
