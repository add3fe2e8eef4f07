//! Error taxonomy shared across the sync core.
use thiserror::Error;

use crate::model::{MatchId, UserId};

/// Failures raised by backends and side-effect collaborators.
///
/// `Transient` covers timeouts and unreachable services; callers treat it as
/// retryable. `InvalidPuzzleReference` indicates a content configuration
/// defect and is surfaced directly, never recovered from silently.
#[derive(Debug, Error)]
pub enum SyncError {
    #[error("backend unreachable: {0}")]
    Transient(String),
    #[error("puzzle reference {0} not found in catalog")]
    InvalidPuzzleReference(String),
    #[error("reward credit failed: {0}")]
    Credit(String),
    #[error("storage failure: {0}")]
    Storage(String),
    #[error("unknown match {0}")]
    UnknownMatch(MatchId),
}

impl SyncError {
    /// Whether a retry without new input could plausibly succeed.
    #[must_use]
    pub const fn is_retryable(&self) -> bool {
        matches!(self, Self::Transient(_) | Self::Credit(_))
    }
}

/// Rejections returned by `submit_move`.
///
/// These are surfaced to the caller for immediate UI feedback and are never
/// retried automatically: retrying without new input cannot succeed. A move
/// in which nothing proposed was correct is *not* an error; the turn still
/// advances and the outcome reports `no_valid_changes`.
#[derive(Debug, Error)]
pub enum MoveError {
    #[error("it is not {0}'s turn")]
    NotYourTurn(UserId),
    #[error("move targeted turn {submitted}, match is at turn {current}")]
    StaleTurn { submitted: u32, current: u32 },
    #[error("match {0} is already completed")]
    MatchAlreadyCompleted(MatchId),
    #[error(transparent)]
    Sync(#[from] SyncError),
}
