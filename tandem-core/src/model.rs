//! Canonical match state shared by both mini-games.
//!
//! Pure data plus deterministic transitions; no network or storage access.
//! Committed progress (locked cells, found words) is immutable once applied.
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

/// Number of distinct highlight colors cycled across found words.
pub const WORD_COLOR_COUNT: u8 = 6;

macro_rules! id_newtype {
    ($(#[$doc:meta])* $name:ident) => {
        $(#[$doc])*
        #[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
        #[serde(transparent)]
        pub struct $name(pub String);

        impl $name {
            #[must_use]
            pub fn new(value: impl Into<String>) -> Self {
                Self(value.into())
            }

            #[must_use]
            pub fn as_str(&self) -> &str {
                &self.0
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str(&self.0)
            }
        }

        impl From<&str> for $name {
            fn from(value: &str) -> Self {
                Self(value.to_string())
            }
        }
    };
}

id_newtype!(
    /// Opaque unique id of one match instance.
    MatchId
);
id_newtype!(
    /// Reference to static puzzle content in the catalog.
    PuzzleId
);
id_newtype!(
    /// One participant of a couple.
    UserId
);
id_newtype!(
    /// A paired couple; the unit branch progression and rewards are keyed by.
    CoupleId
);

/// The two turn-based mini-games sharing this substrate.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum GameKind {
    Linked,
    WordSearch,
}

impl GameKind {
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Linked => "linked",
            Self::WordSearch => "word_search",
        }
    }

    /// The activity type this game contributes completions to.
    #[must_use]
    pub const fn activity(self) -> ActivityType {
        match self {
            Self::Linked => ActivityType::Linked,
            Self::WordSearch => ActivityType::WordSearch,
        }
    }
}

impl fmt::Display for GameKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Activities whose content advances through ordered branches per couple.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ActivityType {
    Linked,
    WordSearch,
    DailyQuiz,
}

impl ActivityType {
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Linked => "linked",
            Self::WordSearch => "word_search",
            Self::DailyQuiz => "daily_quiz",
        }
    }
}

impl fmt::Display for ActivityType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ActivityType {
    type Err = ();

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "linked" => Ok(Self::Linked),
            "word_search" => Ok(Self::WordSearch),
            "daily_quiz" => Ok(Self::DailyQuiz),
            _ => Err(()),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum MatchStatus {
    #[default]
    Active,
    Completed,
}

/// A word committed in a Word Search match. Immutable once recorded.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FoundWord {
    pub word: String,
    pub found_by: UserId,
    pub turn_number: u32,
    pub color_index: u8,
}

/// Outcome of attempting to commit a letter to a cell.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LockOutcome {
    Locked,
    /// The cell already holds a committed letter; nothing was overwritten.
    Conflict,
}

/// Outcome of attempting to record a found word.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WordOutcome {
    Recorded,
    Duplicate,
}

/// One in-progress or completed turn-based puzzle match between two paired
/// users. Exactly one match per couple per game kind may be `Active`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Match {
    pub match_id: MatchId,
    pub puzzle_id: PuzzleId,
    pub game_kind: GameKind,
    pub couple_id: CoupleId,
    pub status: MatchStatus,
    /// The user allowed to submit the next move; `None` only in terminal
    /// states.
    pub current_turn: Option<UserId>,
    /// Strictly increasing; doubles as the optimistic-concurrency guard for
    /// duplicate move submissions.
    pub turn_number: u32,
    /// The participant who held the first turn; drives starter alternation
    /// across successive matches.
    pub started_by: UserId,
    pub player1: UserId,
    pub player2: UserId,
    /// Linked: committed letters keyed by cell index. Presence means locked.
    #[serde(default)]
    pub board_state: BTreeMap<String, char>,
    /// Linked: the tray offered to the player whose turn it is.
    #[serde(default)]
    pub current_rack: Vec<char>,
    #[serde(default)]
    pub locked_cell_count: u32,
    #[serde(default)]
    pub total_answer_cells: u32,
    /// Word Search: committed words in discovery order.
    #[serde(default)]
    pub found_words: Vec<FoundWord>,
    /// Reset to 0 at each handoff; capped per turn by the service rules.
    #[serde(default)]
    pub words_found_this_turn: u32,
    #[serde(default)]
    pub total_words_found: u32,
    #[serde(default)]
    pub total_words: u32,
    #[serde(default)]
    pub player1_score: u32,
    #[serde(default)]
    pub player2_score: u32,
    pub created_at: DateTime<Utc>,
    pub completed_at: Option<DateTime<Utc>>,
}

impl Match {
    /// Construct a fresh active match with the starter holding turn 1.
    #[must_use]
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        match_id: MatchId,
        puzzle_id: PuzzleId,
        game_kind: GameKind,
        couple_id: CoupleId,
        player1: UserId,
        player2: UserId,
        starter: UserId,
        created_at: DateTime<Utc>,
    ) -> Self {
        Self {
            match_id,
            puzzle_id,
            game_kind,
            couple_id,
            status: MatchStatus::Active,
            current_turn: Some(starter.clone()),
            turn_number: 1,
            started_by: starter,
            player1,
            player2,
            board_state: BTreeMap::new(),
            current_rack: Vec::new(),
            locked_cell_count: 0,
            total_answer_cells: 0,
            found_words: Vec::new(),
            words_found_this_turn: 0,
            total_words_found: 0,
            total_words: 0,
            player1_score: 0,
            player2_score: 0,
            created_at,
            completed_at: None,
        }
    }

    #[must_use]
    pub fn is_locked(&self, cell: &str) -> bool {
        self.board_state.contains_key(cell)
    }

    #[must_use]
    pub fn is_my_turn(&self, user: &UserId) -> bool {
        self.status == MatchStatus::Active && self.current_turn.as_ref() == Some(user)
    }

    /// The participant opposite `user`. Falls back to `player1` when `user`
    /// is not a participant; the service validates membership upstream.
    #[must_use]
    pub fn other_player(&self, user: &UserId) -> UserId {
        if *user == self.player1 {
            self.player2.clone()
        } else {
            self.player1.clone()
        }
    }

    /// Commit a letter to a cell. Never overwrites: a cell already present
    /// in `board_state` yields `Conflict` and stays untouched.
    pub fn apply_lock(&mut self, cell: &str, letter: char) -> LockOutcome {
        if self.is_locked(cell) {
            return LockOutcome::Conflict;
        }
        self.board_state.insert(cell.to_string(), letter);
        self.locked_cell_count += 1;
        LockOutcome::Locked
    }

    /// Record a found word. Duplicates of an already-committed word are
    /// rejected without mutating anything.
    pub fn apply_found_word(&mut self, word: &str, user: &UserId) -> WordOutcome {
        let normalized = word.trim().to_ascii_uppercase();
        if self
            .found_words
            .iter()
            .any(|found| found.word == normalized)
        {
            return WordOutcome::Duplicate;
        }
        let color_index = (self.found_words.len() % WORD_COLOR_COUNT as usize) as u8;
        self.found_words.push(FoundWord {
            word: normalized,
            found_by: user.clone(),
            turn_number: self.turn_number,
            color_index,
        });
        self.total_words_found += 1;
        self.words_found_this_turn += 1;
        WordOutcome::Recorded
    }

    /// Progress in whole percent, floored. Monotonically non-decreasing
    /// because committed progress is never removed.
    #[must_use]
    pub fn progress_percent(&self) -> u8 {
        let (done, total) = match self.game_kind {
            GameKind::Linked => (self.locked_cell_count, self.total_answer_cells),
            GameKind::WordSearch => (self.total_words_found, self.total_words),
        };
        if total == 0 {
            return 0;
        }
        ((u64::from(done) * 100) / u64::from(total)).min(100) as u8
    }

    /// Hand the turn to `next`, incrementing `turn_number` and resetting the
    /// per-turn word counter.
    pub fn hand_turn_to(&mut self, next: UserId) {
        self.current_turn = Some(next);
        self.turn_number += 1;
        self.words_found_this_turn = 0;
    }

    /// Transition to `Completed` and stamp the completion time.
    pub fn mark_completed(&mut self, at: DateTime<Utc>) {
        self.status = MatchStatus::Completed;
        self.completed_at = Some(at);
    }

    /// Add in-match points to one participant's score.
    pub fn add_score(&mut self, user: &UserId, points: u32) {
        if *user == self.player1 {
            self.player1_score += points;
        } else if *user == self.player2 {
            self.player2_score += points;
        }
    }
}
