//! The match service: validates moves, hands turns over, and triggers
//! completion side effects exactly once.
use std::collections::HashMap;
use std::sync::{Arc, Mutex, PoisonError};

use crate::branches::BranchProgressionStore;
use crate::config::{CoreConfig, ScoringRules, WordSearchRules};
use crate::error::{MoveError, SyncError};
use crate::model::{
    CoupleId, GameKind, LockOutcome, Match, MatchId, MatchStatus, UserId, WordOutcome,
};
use crate::moves::{MovePayload, ProposedMove};
use crate::puzzle::PuzzleDefinition;
use crate::rewards::{AwardKind, RewardKey, RewardLedger};
use crate::{Clock, CoreBackends, CoupleDirectory, CreditSink, MatchRepository, PuzzleCatalog};

/// Result of an accepted move submission.
///
/// `no_valid_changes` marks a submission where nothing proposed was correct;
/// the turn still advances. A turn is about giving the partner a chance, not
/// about guaranteed progress.
#[derive(Debug, Clone)]
pub struct MoveOutcome {
    pub match_state: Match,
    /// Cells or words committed by this submission.
    pub committed: Vec<String>,
    /// Cells or words rejected as incorrect, duplicate, or over the per-turn
    /// cap; surfaced back to the client, never persisted.
    pub rejected: Vec<String>,
    pub no_valid_changes: bool,
}

/// Turn/lock/progress/reward bookkeeping around pre-built puzzles, one
/// instance per process, handed to consumers by the composition root.
pub struct MatchService {
    matches: Arc<dyn MatchRepository>,
    catalog: Arc<dyn PuzzleCatalog>,
    directory: Arc<dyn CoupleDirectory>,
    credit: Arc<dyn CreditSink>,
    clock: Arc<dyn Clock>,
    branches: BranchProgressionStore,
    rewards: RewardLedger,
    rules: WordSearchRules,
    scoring: ScoringRules,
    // Serializes concurrent submissions per match; the turn_number check
    // alone only catches stale clients, not same-instant races.
    match_locks: Mutex<HashMap<MatchId, Arc<tokio::sync::Mutex<()>>>>,
}

impl MatchService {
    #[must_use]
    pub fn new(backends: CoreBackends, config: &CoreConfig) -> Self {
        Self {
            branches: BranchProgressionStore::new(
                backends.progression,
                config.branches.clone(),
            ),
            rewards: RewardLedger::new(backends.applied_keys),
            matches: backends.matches,
            catalog: backends.catalog,
            directory: backends.directory,
            credit: backends.credit,
            clock: backends.clock,
            rules: config.word_search,
            scoring: config.scoring,
            match_locks: Mutex::new(HashMap::new()),
        }
    }

    /// Branch progression store, shared with debug tooling and quizzes.
    #[must_use]
    pub const fn branches(&self) -> &BranchProgressionStore {
        &self.branches
    }

    /// Reward ledger, shared with reconciliation sweeps and debug tooling.
    #[must_use]
    pub const fn rewards(&self) -> &RewardLedger {
        &self.rewards
    }

    fn match_lock(&self, id: &MatchId) -> Arc<tokio::sync::Mutex<()>> {
        let mut map = self
            .match_locks
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        map.entry(id.clone()).or_default().clone()
    }

    fn release_match_lock(&self, id: &MatchId, lock: &Arc<tokio::sync::Mutex<()>>) {
        let mut map = self
            .match_locks
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        if Arc::strong_count(lock) == 2 {
            map.remove(id);
        }
    }

    /// Current authoritative state of one match.
    ///
    /// # Errors
    ///
    /// Returns `SyncError::UnknownMatch` for an id the store has no record
    /// of, or a backend failure.
    pub async fn get_state(&self, match_id: &MatchId) -> Result<Match, SyncError> {
        self.matches
            .fetch(match_id)
            .await?
            .ok_or_else(|| SyncError::UnknownMatch(match_id.clone()))
    }

    /// Return the couple's active match for `kind`, creating one when the
    /// previous match is completed or none exists.
    ///
    /// The starting player alternates across successive matches: the partner
    /// of the previous starter goes first, and the very first match starts
    /// with the invited partner. This is decided here, before the match is
    /// ever shown, so the "partner goes first" notice is stable.
    ///
    /// # Errors
    ///
    /// Returns `SyncError::InvalidPuzzleReference` when the catalog has no
    /// content for the couple's current branch, or a backend failure.
    pub async fn create_or_get_active_match(
        &self,
        couple: &CoupleId,
        kind: GameKind,
    ) -> Result<Match, SyncError> {
        if let Some(existing) = self.matches.active_for(couple, kind).await? {
            return Ok(existing);
        }

        let (player1, player2) = self.directory.members(couple).await?;
        let activity = kind.activity();
        let branch = self.branches.current_branch(couple, activity).await?;
        let puzzle = self.catalog.next_puzzle(activity, &branch).await?;
        if puzzle.game_kind() != kind {
            return Err(SyncError::InvalidPuzzleReference(format!(
                "{} serves {}, wanted {kind}",
                puzzle.puzzle_id(),
                puzzle.game_kind()
            )));
        }

        let starter = match self.matches.latest_for(couple, kind).await? {
            Some(previous) => previous.other_player(&previous.started_by),
            None => player2.clone(),
        };
        let sequence = self.matches.count_for(couple, kind).await?;
        let match_id = MatchId::new(format!("{couple}-{kind}-m{}", sequence + 1));

        let mut record = Match::new(
            match_id,
            puzzle.puzzle_id().clone(),
            kind,
            couple.clone(),
            player1,
            player2,
            starter,
            self.clock.now(),
        );
        match &puzzle {
            PuzzleDefinition::Linked(p) => {
                record.total_answer_cells = p.total_answer_cells();
                record.current_rack = p.rack_for_turn(1);
            }
            PuzzleDefinition::WordSearch(p) => {
                record.total_words = p.total_words();
            }
        }
        self.matches.persist(&record).await?;
        log::debug!(
            "created match {} on branch {branch}, {} starts",
            record.match_id,
            record.started_by
        );
        Ok(record)
    }

    /// Validate and apply one move submission atomically.
    ///
    /// Correct placements become committed state; incorrect ones are
    /// surfaced back as rejected, never persisted. When progress reaches
    /// 100% the match completes and its side effects (branch advance, reward
    /// credit) run exactly once, guarded by the reward ledger; otherwise the
    /// turn flips to the partner.
    ///
    /// # Errors
    ///
    /// `NotYourTurn`, `StaleTurn`, and `MatchAlreadyCompleted` reject the
    /// submission without mutating anything; backend failures surface as
    /// `MoveError::Sync`.
    pub async fn submit_move(
        &self,
        match_id: &MatchId,
        user: &UserId,
        proposed: &ProposedMove,
    ) -> Result<MoveOutcome, MoveError> {
        let lock = self.match_lock(match_id);
        let outcome = {
            let _guard = lock.lock().await;
            self.submit_move_locked(match_id, user, proposed).await
        };
        self.release_match_lock(match_id, &lock);
        outcome
    }

    async fn submit_move_locked(
        &self,
        match_id: &MatchId,
        user: &UserId,
        proposed: &ProposedMove,
    ) -> Result<MoveOutcome, MoveError> {
        let mut record = self.get_state(match_id).await.map_err(MoveError::Sync)?;

        if record.status == MatchStatus::Completed {
            return Err(MoveError::MatchAlreadyCompleted(match_id.clone()));
        }
        if !record.is_my_turn(user) {
            return Err(MoveError::NotYourTurn(user.clone()));
        }
        if proposed.turn_number != record.turn_number {
            return Err(MoveError::StaleTurn {
                submitted: proposed.turn_number,
                current: record.turn_number,
            });
        }

        let puzzle = self
            .catalog
            .puzzle(&record.puzzle_id)
            .await
            .map_err(MoveError::Sync)?;
        let (committed, rejected) =
            Self::reconcile(&mut record, user, proposed, &puzzle, &self.rules)?;

        let no_valid_changes = committed.is_empty();
        record.add_score(user, self.scoring.points_per_commit * committed.len() as u32);

        if record.progress_percent() >= 100 {
            record.mark_completed(self.clock.now());
            self.matches
                .persist(&record)
                .await
                .map_err(MoveError::Sync)?;
            // Completion effects are idempotent and retryable; a failure
            // here leaves the match completed and the sweep picks it up.
            if let Err(err) = self.apply_completion_effects(&record).await {
                log::warn!(
                    "completion side effects for {} pending retry: {err}",
                    record.match_id
                );
            }
        } else {
            let next = record.other_player(user);
            record.hand_turn_to(next);
            if let PuzzleDefinition::Linked(p) = &puzzle {
                record.current_rack = p.rack_for_turn(record.turn_number);
            }
            self.matches
                .persist(&record)
                .await
                .map_err(MoveError::Sync)?;
        }

        Ok(MoveOutcome {
            match_state: record,
            committed,
            rejected,
            no_valid_changes,
        })
    }

    /// Check each proposed item against the solution, committing the valid
    /// subset. Pure except for mutating `record`.
    fn reconcile(
        record: &mut Match,
        user: &UserId,
        proposed: &ProposedMove,
        puzzle: &PuzzleDefinition,
        rules: &WordSearchRules,
    ) -> Result<(Vec<String>, Vec<String>), MoveError> {
        let mut committed = Vec::new();
        let mut rejected = Vec::new();
        match (&proposed.payload, puzzle) {
            (MovePayload::Placements(placements), PuzzleDefinition::Linked(p)) => {
                for placement in placements {
                    let letter = placement.letter.to_ascii_uppercase();
                    let correct = p.solution_letter(&placement.cell) == Some(letter);
                    if correct
                        && record.apply_lock(&placement.cell, letter) == LockOutcome::Locked
                    {
                        committed.push(placement.cell.clone());
                    } else {
                        rejected.push(placement.cell.clone());
                    }
                }
            }
            (MovePayload::Words(words), PuzzleDefinition::WordSearch(p)) => {
                for word in words {
                    let under_cap = record.words_found_this_turn < rules.max_words_per_turn;
                    if under_cap
                        && p.contains_word(word)
                        && record.apply_found_word(word, user) == WordOutcome::Recorded
                    {
                        committed.push(word.trim().to_ascii_uppercase());
                    } else {
                        rejected.push(word.clone());
                    }
                }
            }
            _ => {
                return Err(MoveError::Sync(SyncError::InvalidPuzzleReference(format!(
                    "{} does not serve {}",
                    record.puzzle_id, record.game_kind
                ))));
            }
        }
        Ok((committed, rejected))
    }

    /// Re-run completion side effects for an already-completed match. Safe
    /// to call any number of times; the reward ledger makes each effect
    /// single-shot. Used by reconciliation sweeps after a credit failure.
    ///
    /// # Errors
    ///
    /// Returns `SyncError` when a backend or the crediting call fails; the
    /// operation stays retryable.
    pub async fn reconcile_completion(&self, match_id: &MatchId) -> Result<(), SyncError> {
        let record = self.get_state(match_id).await?;
        if record.status != MatchStatus::Completed {
            return Ok(());
        }
        self.apply_completion_effects(&record).await
    }

    async fn apply_completion_effects(&self, record: &Match) -> Result<(), SyncError> {
        let activity = record.game_kind.activity();

        let advance_key = RewardKey::new(
            record.couple_id.clone(),
            activity,
            record.match_id.as_str(),
            AwardKind::BranchAdvance,
        );
        self.rewards
            .try_apply(&advance_key, || async {
                self.branches
                    .complete_activity(&record.couple_id, activity)
                    .await
                    .map(|_| ())
            })
            .await?;

        let credit_key = RewardKey::new(
            record.couple_id.clone(),
            activity,
            record.match_id.as_str(),
            AwardKind::MatchCompletion,
        );
        self.rewards
            .try_apply(&credit_key, || async {
                self.credit
                    .credit(
                        &record.couple_id,
                        self.scoring.completion_award,
                        &format!("{} match completed", record.game_kind),
                    )
                    .await
            })
            .await?;
        Ok(())
    }

    /// Record one daily-quiz completion for `date_key` (e.g. "2025-06-01"),
    /// advancing the quiz branch and crediting points each exactly once per
    /// day. Returns the branch the couple is on afterwards.
    ///
    /// # Errors
    ///
    /// Returns `SyncError` when a backend or the crediting call fails; the
    /// day's key stays unapplied so the completion is retryable.
    pub async fn complete_daily_quiz(
        &self,
        couple: &CoupleId,
        date_key: &str,
    ) -> Result<crate::branches::BranchLabel, SyncError> {
        let activity = crate::model::ActivityType::DailyQuiz;

        let advance_key = RewardKey::new(
            couple.clone(),
            activity,
            date_key,
            AwardKind::BranchAdvance,
        );
        self.rewards
            .try_apply(&advance_key, || async {
                self.branches
                    .complete_activity(couple, activity)
                    .await
                    .map(|_| ())
            })
            .await?;

        let credit_key = RewardKey::new(
            couple.clone(),
            activity,
            date_key,
            AwardKind::QuizCompletion,
        );
        self.rewards
            .try_apply(&credit_key, || async {
                self.credit
                    .credit(couple, self.scoring.completion_award, "daily quiz completed")
                    .await
            })
            .await?;

        self.branches.current_branch(couple, activity).await
    }
}
