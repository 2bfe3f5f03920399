use std::collections::{BTreeSet, HashMap, HashSet};

use rand::Rng;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::config::RoomConfig;
use crate::letters;
use crate::player::Player;
use crate::protocol::{AnswerResult, LeaderboardEntry, PlayerRoundResult};
use crate::scoring;
use crate::votes::{self, VoteTally};

// -- Room / Round State Machines --

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub enum RoomStatus {
    Waiting,
    Playing,
    Voting,
    Finished,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub enum RoundStatus {
    Active,
    Voting,
    Closed,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Answer {
    pub id: Uuid,
    pub round_id: Uuid,
    pub player_id: Uuid,
    pub category: String,
    pub content: String,
    pub is_valid: bool,
    pub score: u16,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Round {
    pub id: Uuid,
    pub number: u32,
    pub letter: char,
    pub status: RoundStatus,
    pub stopper_id: Option<Uuid>,
    pub answers: Vec<Answer>,
    /// Player record ids that have already submitted this round.
    pub submitted: HashSet<Uuid>,
}

impl Round {
    fn new(number: u32, letter: char) -> Self {
        Self {
            id: Uuid::new_v4(),
            number,
            letter,
            status: RoundStatus::Active,
            stopper_id: None,
            answers: Vec::new(),
            submitted: HashSet::new(),
        }
    }
}

/// Outcome of a start attempt: either a fresh round, or the game is
/// over (round limit reached or letters exhausted).
#[derive(Debug, Clone)]
pub enum StartOutcome {
    Started {
        round_id: Uuid,
        round_number: u32,
        letter: char,
    },
    GameOver,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum VoteOutcome {
    Voted { votes: usize, needed: usize },
    Annulled { votes: usize },
}

/// The per-room game state machine. All mutation goes through the
/// methods below; the owning room session serializes access so that
/// every operation observes a consistent state.
#[derive(Debug)]
pub struct GameState {
    pub status: RoomStatus,
    pub config: RoomConfig,
    pub used_letters: BTreeSet<char>,
    pub rounds: Vec<Round>,
    pub votes: VoteTally,
}

impl GameState {
    pub fn new(config: RoomConfig) -> Self {
        Self {
            status: RoomStatus::Waiting,
            config,
            used_letters: BTreeSet::new(),
            rounds: Vec::new(),
            votes: VoteTally::new(),
        }
    }

    pub fn current_round(&self) -> Option<&Round> {
        self.rounds.last()
    }

    pub fn round(&self, round_id: Uuid) -> Result<&Round, GameError> {
        self.rounds
            .iter()
            .find(|r| r.id == round_id)
            .ok_or(GameError::RoundNotFound)
    }

    fn round_mut(&mut self, round_id: Uuid) -> Result<&mut Round, GameError> {
        self.rounds
            .iter_mut()
            .find(|r| r.id == round_id)
            .ok_or(GameError::RoundNotFound)
    }

    /// Begin the next round, or finish the game when the round limit is
    /// reached or no playable letters remain. Also closes a round left
    /// in the voting phase and drops its vote tallies.
    pub fn start_round(
        &mut self,
        player_count: usize,
        rng: &mut impl Rng,
    ) -> Result<StartOutcome, GameError> {
        if player_count < 2 {
            return Err(GameError::InsufficientPlayers);
        }
        if let Some(round) = self.rounds.last() {
            if round.status == RoundStatus::Active {
                return Err(GameError::RoundInProgress);
            }
        }

        // Close out the voting phase of the previous round.
        if let Some(round) = self.rounds.last_mut() {
            round.status = RoundStatus::Closed;
        }
        self.votes.clear();

        if self.rounds.len() as u32 >= self.config.max_rounds {
            self.status = RoomStatus::Finished;
            return Ok(StartOutcome::GameOver);
        }

        let letter = match letters::draw_letter(&self.used_letters, rng) {
            Some(l) => l,
            None => {
                self.status = RoomStatus::Finished;
                return Ok(StartOutcome::GameOver);
            }
        };
        self.used_letters.insert(letter);

        let round = Round::new(self.rounds.len() as u32 + 1, letter);
        let outcome = StartOutcome::Started {
            round_id: round.id,
            round_number: round.number,
            letter,
        };
        self.rounds.push(round);
        self.status = RoomStatus::Playing;
        Ok(outcome)
    }

    /// Record a player's answer sheet. Returns `false` when the player
    /// already submitted this round (the duplicate is ignored).
    /// Submissions are accepted while the round is active or voting, so
    /// a player who missed the stop event can still hand in late.
    pub fn submit_answers(
        &mut self,
        player_id: Uuid,
        round_id: Uuid,
        answers: &HashMap<String, String>,
    ) -> Result<bool, GameError> {
        for category in answers.keys() {
            if !self.config.has_category(category) {
                return Err(GameError::InvalidCategory(category.clone()));
            }
        }

        let categories = self.config.categories.clone();
        let round = self.round_mut(round_id)?;
        if round.status == RoundStatus::Closed {
            return Err(GameError::RoundClosed);
        }
        if !round.submitted.insert(player_id) {
            return Ok(false);
        }

        // Every configured category gets an entry; fields the player
        // left blank are recorded as empty and score zero.
        for category in categories {
            let content = answers.get(&category).cloned().unwrap_or_default();
            round.answers.push(Answer {
                id: Uuid::new_v4(),
                round_id,
                player_id,
                category,
                content,
                is_valid: true,
                score: 0,
            });
        }
        Ok(true)
    }

    /// Undo a submission whose durable write failed, so the player can
    /// retry and the room never broadcasts state it could not persist.
    pub fn retract_submission(&mut self, player_id: Uuid, round_id: Uuid) {
        if let Ok(round) = self.round_mut(round_id) {
            round.submitted.remove(&player_id);
            round
                .answers
                .retain(|a| !(a.player_id == player_id && a.round_id == round_id));
        }
    }

    /// Move an active round into the voting phase, recording who
    /// stopped it. Called by the grace timer when it fires.
    pub fn end_round(&mut self, round_id: Uuid, stopper_id: Uuid) -> Result<(), GameError> {
        let round = self.round_mut(round_id)?;
        if round.status != RoundStatus::Active {
            return Err(GameError::RoundClosed);
        }
        round.status = RoundStatus::Voting;
        round.stopper_id = Some(stopper_id);
        self.status = RoomStatus::Voting;
        Ok(())
    }

    /// Cast an invalidation vote. The author cannot vote on their own
    /// answer, repeat votes do not accumulate, and the answer is
    /// annulled exactly once when the quorum is reached; votes on an
    /// already-annulled answer just report the final state.
    pub fn cast_vote(
        &mut self,
        round_id: Uuid,
        answer_id: Uuid,
        voter_id: Uuid,
        players: &[Player],
    ) -> Result<VoteOutcome, GameError> {
        let round = self.round(round_id)?;
        let answer = round
            .answers
            .iter()
            .find(|a| a.id == answer_id)
            .ok_or(GameError::AnswerNotFound)?;

        if !players.iter().any(|p| p.user_id == voter_id) {
            return Err(GameError::NotInRoom);
        }
        let author = players
            .iter()
            .find(|p| p.id == answer.player_id)
            .ok_or(GameError::AnswerNotFound)?;
        if author.user_id == voter_id {
            return Err(GameError::SelfVote);
        }
        if !answer.is_valid {
            return Ok(VoteOutcome::Annulled {
                votes: self.votes.count(answer_id),
            });
        }

        let votes = self.votes.cast(answer_id, voter_id);
        let needed = votes::required_votes(players.len());
        if votes < needed {
            return Ok(VoteOutcome::Voted { votes, needed });
        }

        let round = self.round_mut(round_id)?;
        if let Some(answer) = round.answers.iter_mut().find(|a| a.id == answer_id) {
            answer.is_valid = false;
        }
        scoring::score_round(&mut round.answers);
        Ok(VoteOutcome::Annulled { votes })
    }

    /// Score the round and aggregate per-player results, sorted by
    /// descending round total. Safe to call repeatedly.
    pub fn round_results(
        &mut self,
        round_id: Uuid,
        players: &[Player],
    ) -> Result<Vec<PlayerRoundResult>, GameError> {
        let round = self.round_mut(round_id)?;
        scoring::score_round(&mut round.answers);

        let mut results: HashMap<Uuid, PlayerRoundResult> = HashMap::new();
        for answer in &round.answers {
            let player = match players.iter().find(|p| p.id == answer.player_id) {
                Some(p) => p,
                None => continue,
            };
            let entry = results
                .entry(player.user_id)
                .or_insert_with(|| PlayerRoundResult {
                    user_id: player.user_id,
                    name: player.name.clone(),
                    total_score: 0,
                    answers: HashMap::new(),
                });
            entry.total_score += answer.score as u32;
            entry.answers.insert(
                answer.category.clone(),
                AnswerResult {
                    id: answer.id,
                    word: answer.content.clone(),
                    score: answer.score,
                    is_valid: answer.is_valid,
                },
            );
        }

        let mut results: Vec<PlayerRoundResult> = results.into_values().collect();
        results.sort_by(|a, b| b.total_score.cmp(&a.total_score));
        Ok(results)
    }

    /// Final standings: every player with their score summed over all
    /// rounds, sorted descending.
    pub fn leaderboard(&self, players: &[Player]) -> Vec<LeaderboardEntry> {
        let mut totals: HashMap<Uuid, u32> = HashMap::new();
        for round in &self.rounds {
            for answer in &round.answers {
                *totals.entry(answer.player_id).or_insert(0) += answer.score as u32;
            }
        }

        let mut board: Vec<LeaderboardEntry> = players
            .iter()
            .map(|p| LeaderboardEntry {
                user_id: p.user_id,
                name: p.name.clone(),
                total_score: totals.get(&p.id).copied().unwrap_or(0),
            })
            .collect();
        board.sort_by(|a, b| b.total_score.cmp(&a.total_score));
        board
    }

    /// Wipe all rounds, answers, votes, and drawn letters and return
    /// the room to the waiting state.
    pub fn reset(&mut self) {
        self.rounds.clear();
        self.used_letters.clear();
        self.votes.clear();
        self.status = RoomStatus::Waiting;
    }
}

// -- Errors --

#[derive(Debug, Clone, thiserror::Error)]
pub enum GameError {
    #[error("room not found")]
    RoomNotFound,
    #[error("round not found")]
    RoundNotFound,
    #[error("answer not found")]
    AnswerNotFound,
    #[error("game already started")]
    GameInProgress,
    #[error("a round is still in progress")]
    RoundInProgress,
    #[error("round already closed")]
    RoundClosed,
    #[error("player is not in this room")]
    NotInRoom,
    #[error("need at least 2 players")]
    InsufficientPlayers,
    #[error("cannot vote on your own answer")]
    SelfVote,
    #[error("unknown category: {0}")]
    InvalidCategory(String),
    #[error("invalid room config: {0}")]
    InvalidConfig(String),
}
