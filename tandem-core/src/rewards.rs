//! Idempotent reward ledger.
//!
//! Rewards are credited exactly once per key, even when a direct completion
//! call and a reconciliation sweep race for the same event. The permanent
//! applied marker is written only after the crediting call succeeds; a
//! per-key in-flight lock keeps concurrent attempts from double-executing
//! during the retry window.
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;
use std::future::Future;
use std::str::FromStr;
use std::sync::{Arc, Mutex, PoisonError};

use crate::admin::AdminAccess;
use crate::error::SyncError;
use crate::model::{ActivityType, CoupleId};
use crate::AppliedKeyRepo;

/// What a reward key pays out for.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AwardKind {
    MatchCompletion,
    BranchAdvance,
    QuizCompletion,
}

impl AwardKind {
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::MatchCompletion => "match_completion",
            Self::BranchAdvance => "branch_advance",
            Self::QuizCompletion => "quiz_completion",
        }
    }
}

impl fmt::Display for AwardKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for AwardKind {
    type Err = ();

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "match_completion" => Ok(Self::MatchCompletion),
            "branch_advance" => Ok(Self::BranchAdvance),
            "quiz_completion" => Ok(Self::QuizCompletion),
            _ => Err(()),
        }
    }
}

/// Structured idempotency key: `{couple}:{activity}:{event}:{kind}`.
/// `event` is a match id for game completions or a date key for quizzes.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct RewardKey {
    pub couple: CoupleId,
    pub activity: ActivityType,
    pub event: String,
    pub kind: AwardKind,
}

impl RewardKey {
    #[must_use]
    pub fn new(
        couple: CoupleId,
        activity: ActivityType,
        event: impl Into<String>,
        kind: AwardKind,
    ) -> Self {
        Self {
            couple,
            activity,
            event: event.into(),
            kind,
        }
    }
}

impl fmt::Display for RewardKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}:{}:{}:{}",
            self.couple, self.activity, self.event, self.kind
        )
    }
}

impl FromStr for RewardKey {
    type Err = ();

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let mut parts = s.splitn(4, ':');
        let couple = parts.next().filter(|p| !p.is_empty()).ok_or(())?;
        let activity = parts.next().ok_or(())?.parse()?;
        let event = parts.next().filter(|p| !p.is_empty()).ok_or(())?;
        let kind = parts.next().ok_or(())?.parse()?;
        Ok(Self {
            couple: CoupleId::from(couple),
            activity,
            event: event.to_string(),
            kind,
        })
    }
}

/// Result of `try_apply` for one caller.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ApplyOutcome {
    /// This caller executed the credit.
    Applied,
    /// The key was already credited, here or by a racing caller.
    AlreadyApplied,
}

/// The central idempotency guard over a persistence seam.
pub struct RewardLedger {
    repo: Arc<dyn AppliedKeyRepo>,
    in_flight: Mutex<HashMap<String, Arc<tokio::sync::Mutex<()>>>>,
}

impl RewardLedger {
    #[must_use]
    pub fn new(repo: Arc<dyn AppliedKeyRepo>) -> Self {
        Self {
            repo,
            in_flight: Mutex::new(HashMap::new()),
        }
    }

    fn key_lock(&self, key: &RewardKey) -> Arc<tokio::sync::Mutex<()>> {
        let mut map = self
            .in_flight
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        map.entry(key.to_string()).or_default().clone()
    }

    fn release_key_lock(&self, key: &RewardKey, lock: &Arc<tokio::sync::Mutex<()>>) {
        let mut map = self
            .in_flight
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        // Only the map and our clone hold it: no other caller is waiting.
        if Arc::strong_count(lock) == 2 {
            map.remove(&key.to_string());
        }
    }

    /// Whether `key` has already been credited.
    ///
    /// # Errors
    ///
    /// Returns `SyncError` when the ledger backend fails.
    pub async fn has_been_applied(&self, key: &RewardKey) -> Result<bool, SyncError> {
        self.repo.contains(key).await
    }

    /// Applied keys for one couple, for diagnostics.
    ///
    /// # Errors
    ///
    /// Returns `SyncError` when the ledger backend fails.
    pub async fn list_applied(&self, couple: &CoupleId) -> Result<Vec<RewardKey>, SyncError> {
        self.repo.list_for(couple).await
    }

    /// Execute `credit_fn` at most once ever for `key`.
    ///
    /// The key is marked applied only after `credit_fn` succeeds, so a
    /// failed credit leaves the operation retryable. Callers racing on the
    /// same key serialize on a per-key lock and re-check the applied set, so
    /// exactly one of them executes the credit.
    ///
    /// # Errors
    ///
    /// Returns `SyncError` when the backend fails or `credit_fn` itself
    /// fails; in the latter case the key stays unapplied.
    pub async fn try_apply<F, Fut>(
        &self,
        key: &RewardKey,
        credit_fn: F,
    ) -> Result<ApplyOutcome, SyncError>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<(), SyncError>>,
    {
        if self.repo.contains(key).await? {
            return Ok(ApplyOutcome::AlreadyApplied);
        }

        let lock = self.key_lock(key);
        let outcome = {
            let _guard = lock.lock().await;
            // A racing caller may have credited while we waited.
            if self.repo.contains(key).await? {
                Ok(ApplyOutcome::AlreadyApplied)
            } else {
                match credit_fn().await {
                    Ok(()) => {
                        self.repo.insert(key).await?;
                        log::debug!("reward key {key} applied");
                        Ok(ApplyOutcome::Applied)
                    }
                    Err(err) => Err(err),
                }
            }
        };
        self.release_key_lock(key, &lock);
        outcome
    }

    /// Privileged: forget every applied key for a couple.
    ///
    /// # Errors
    ///
    /// Returns `SyncError` when the ledger backend fails.
    pub async fn clear_applied(
        &self,
        _admin: &AdminAccess,
        couple: &CoupleId,
    ) -> Result<(), SyncError> {
        self.repo.clear_for(couple).await
    }
}
