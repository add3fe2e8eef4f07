//! Static puzzle content consumed from the catalog.
//!
//! The core never generates layouts; it only checks proposed moves against
//! pre-built definitions.
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

use crate::model::{GameKind, PuzzleId};

/// A collaborative crossword-style puzzle. `solution` maps cell index keys
/// to the expected letter; `racks` are the server-determined trays offered
/// per turn, cycled when a match outlasts the list.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LinkedPuzzle {
    pub puzzle_id: PuzzleId,
    pub solution: BTreeMap<String, char>,
    #[serde(default)]
    pub racks: Vec<Vec<char>>,
}

impl LinkedPuzzle {
    #[must_use]
    pub fn solution_letter(&self, cell: &str) -> Option<char> {
        self.solution.get(cell).copied()
    }

    #[must_use]
    pub fn total_answer_cells(&self) -> u32 {
        self.solution.len() as u32
    }

    /// Tray for a given 1-based turn number.
    #[must_use]
    pub fn rack_for_turn(&self, turn_number: u32) -> Vec<char> {
        if self.racks.is_empty() {
            return Vec::new();
        }
        let idx = ((turn_number as usize).saturating_sub(1)) % self.racks.len();
        self.racks[idx].clone()
    }
}

/// A word-search grid. Only the word list matters to the core; placement
/// coordinates stay inside the rendering layer.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WordSearchPuzzle {
    pub puzzle_id: PuzzleId,
    pub rows: u8,
    pub cols: u8,
    pub words: Vec<String>,
}

impl WordSearchPuzzle {
    #[must_use]
    pub fn contains_word(&self, word: &str) -> bool {
        let needle = word.trim().to_ascii_uppercase();
        self.words
            .iter()
            .any(|candidate| candidate.trim().to_ascii_uppercase() == needle)
    }

    #[must_use]
    pub fn total_words(&self) -> u32 {
        self.words.len() as u32
    }
}

/// One catalog entry, tagged by game kind.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum PuzzleDefinition {
    Linked(LinkedPuzzle),
    WordSearch(WordSearchPuzzle),
}

impl PuzzleDefinition {
    /// Parse a single definition from catalog JSON.
    ///
    /// # Errors
    ///
    /// Returns a `serde_json` error when the payload does not match either
    /// puzzle shape.
    pub fn from_json(json: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(json)
    }

    #[must_use]
    pub fn puzzle_id(&self) -> &PuzzleId {
        match self {
            Self::Linked(p) => &p.puzzle_id,
            Self::WordSearch(p) => &p.puzzle_id,
        }
    }

    #[must_use]
    pub const fn game_kind(&self) -> GameKind {
        match self {
            Self::Linked(_) => GameKind::Linked,
            Self::WordSearch(_) => GameKind::WordSearch,
        }
    }
}
