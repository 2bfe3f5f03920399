use std::collections::{HashMap, HashSet};

use uuid::Uuid;

/// Distinct voters are required to annul an answer: a single vote
/// suffices in a 2-player room, otherwise two. The threshold is fixed,
/// not proportional to room size.
pub fn required_votes(player_count: usize) -> usize {
    if player_count <= 2 {
        1
    } else {
        2
    }
}

/// Per-answer invalidation tallies for the current round. Owned by the
/// room session and cleared whenever a new round starts or the room is
/// reset, so stale votes never leak across rounds.
#[derive(Debug, Clone, Default)]
pub struct VoteTally {
    votes: HashMap<Uuid, HashSet<Uuid>>,
}

impl VoteTally {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record a vote and return the answer's distinct-voter count.
    /// Repeat votes from the same voter are no-ops.
    pub fn cast(&mut self, answer_id: Uuid, voter_id: Uuid) -> usize {
        let voters = self.votes.entry(answer_id).or_default();
        voters.insert(voter_id);
        voters.len()
    }

    pub fn count(&self, answer_id: Uuid) -> usize {
        self.votes.get(&answer_id).map(|v| v.len()).unwrap_or(0)
    }

    pub fn clear(&mut self) {
        self.votes.clear();
    }
}
