//! Client-local move proposals.
//!
//! A proposal has no server identity and is never persisted as committed
//! state; it exists only between "it became my turn" and "I submitted". The
//! service reconciles it atomically against the puzzle solution.
use serde::{Deserialize, Serialize};
use smallvec::SmallVec;

/// Inline capacity covering typical per-turn placement counts.
pub type PlacementSet = SmallVec<[CellPlacement; 8]>;

/// One tentative letter-to-cell assignment in a Linked draft.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CellPlacement {
    pub cell: String,
    pub letter: char,
}

impl CellPlacement {
    #[must_use]
    pub fn new(cell: impl Into<String>, letter: char) -> Self {
        Self {
            cell: cell.into(),
            letter,
        }
    }
}

/// Game-specific payload of a proposal.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MovePayload {
    /// Linked: drafted letter placements.
    Placements(PlacementSet),
    /// Word Search: words the player claims to have found this turn.
    Words(Vec<String>),
}

/// A complete move submission. `turn_number` echoes the turn the client
/// believes is current and acts as the optimistic-concurrency guard.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProposedMove {
    pub turn_number: u32,
    pub payload: MovePayload,
}

impl ProposedMove {
    /// Build a Linked proposal from drafted placements.
    #[must_use]
    pub fn linked(turn_number: u32, placements: impl IntoIterator<Item = CellPlacement>) -> Self {
        Self {
            turn_number,
            payload: MovePayload::Placements(placements.into_iter().collect()),
        }
    }

    /// Build a Word Search proposal from claimed words.
    #[must_use]
    pub fn word_search(
        turn_number: u32,
        words: impl IntoIterator<Item = impl Into<String>>,
    ) -> Self {
        Self {
            turn_number,
            payload: MovePayload::Words(words.into_iter().map(Into::into).collect()),
        }
    }

    /// Number of proposed items, regardless of payload kind.
    #[must_use]
    pub fn proposed_count(&self) -> usize {
        match &self.payload {
            MovePayload::Placements(placements) => placements.len(),
            MovePayload::Words(words) => words.len(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn constructors_collect_payloads() {
        let linked = ProposedMove::linked(3, [CellPlacement::new("4", 'T')]);
        assert_eq!(linked.turn_number, 3);
        assert_eq!(linked.proposed_count(), 1);

        let ws = ProposedMove::word_search(5, ["fern", "moss"]);
        assert_eq!(ws.proposed_count(), 2);
        match ws.payload {
            MovePayload::Words(words) => assert_eq!(words, vec!["fern", "moss"]),
            MovePayload::Placements(_) => panic!("wrong payload"),
        }
    }
}
