//! Core configuration assembled at the composition root.
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::branches::BranchPlans;
use crate::poller::PollConfig;

/// Errors raised when configuration invariants are violated.
#[derive(Debug, Error, PartialEq)]
pub enum ConfigError {
    #[error("{field} must be at least {min} (got {value})")]
    MinViolation {
        field: &'static str,
        min: u64,
        value: u64,
    },
    #[error("{field} must be between {min} and {max} (got {value})")]
    RangeViolation {
        field: &'static str,
        min: u64,
        max: u64,
        value: u64,
    },
    #[error("branch plan for {activity} has an empty branch sequence")]
    EmptyBranchSequence { activity: &'static str },
}

/// Word Search turn rules.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct WordSearchRules {
    /// Words one player may commit within a single turn.
    #[serde(default = "WordSearchRules::default_max_words_per_turn")]
    pub max_words_per_turn: u32,
}

impl WordSearchRules {
    const fn default_max_words_per_turn() -> u32 {
        3
    }

    /// Validate rule bounds.
    ///
    /// # Errors
    ///
    /// Returns `ConfigError` when the per-turn cap is zero or implausibly
    /// large.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if !(1..=26).contains(&self.max_words_per_turn) {
            return Err(ConfigError::RangeViolation {
                field: "word_search.max_words_per_turn",
                min: 1,
                max: 26,
                value: u64::from(self.max_words_per_turn),
            });
        }
        Ok(())
    }
}

impl Default for WordSearchRules {
    fn default() -> Self {
        Self {
            max_words_per_turn: Self::default_max_words_per_turn(),
        }
    }
}

/// In-match and ledger-credited point amounts.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ScoringRules {
    /// In-match points per committed cell or word.
    #[serde(default = "ScoringRules::default_points_per_commit")]
    pub points_per_commit: u32,
    /// Ledger points credited once per completed match.
    #[serde(default = "ScoringRules::default_completion_award")]
    pub completion_award: i64,
}

impl ScoringRules {
    const fn default_points_per_commit() -> u32 {
        1
    }

    const fn default_completion_award() -> i64 {
        50
    }

    /// Validate scoring bounds.
    ///
    /// # Errors
    ///
    /// Returns `ConfigError` when the completion award is non-positive.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.completion_award < 1 {
            return Err(ConfigError::MinViolation {
                field: "scoring.completion_award",
                min: 1,
                value: self.completion_award.max(0) as u64,
            });
        }
        Ok(())
    }
}

impl Default for ScoringRules {
    fn default() -> Self {
        Self {
            points_per_commit: Self::default_points_per_commit(),
            completion_award: Self::default_completion_award(),
        }
    }
}

/// Top-level core configuration, JSON-deserializable with per-field
/// defaults.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
pub struct CoreConfig {
    #[serde(default)]
    pub poll: PollConfig,
    #[serde(default)]
    pub word_search: WordSearchRules,
    #[serde(default)]
    pub scoring: ScoringRules,
    #[serde(default)]
    pub branches: BranchPlans,
}

impl CoreConfig {
    /// Parse configuration from JSON.
    ///
    /// # Errors
    ///
    /// Returns a `serde_json` error when the payload is malformed.
    pub fn from_json(json: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(json)
    }

    /// Validate every section before use.
    ///
    /// # Errors
    ///
    /// Returns the first `ConfigError` found in any section.
    pub fn validate(&self) -> Result<(), ConfigError> {
        self.poll.validate()?;
        self.word_search.validate()?;
        self.scoring.validate()?;
        self.branches.validate()?;
        Ok(())
    }
}
