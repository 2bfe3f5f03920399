use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use uuid::Uuid;

use basta_common::config::RoomConfig;
use basta_common::game::{GameError, GameState, Round, RoomStatus, RoundStatus};
use basta_common::player::{Player, PlayerInfo};
use basta_common::protocol::{RoomSnapshot, ServerMessage};

use crate::server::SharedState;
use crate::storage::{AnswerRecord, PlayerRecord, RoomRecord, RoundRecord};

/// Grace window between a stop trigger and round closure. Late
/// submissions are still accepted while it runs.
pub const GRACE_WINDOW: Duration = Duration::from_secs(5);
pub const GRACE_SECONDS: u64 = GRACE_WINDOW.as_secs();

/// One room instance. All mutating access goes through the mutex, so
/// actions against a room are serialized while unrelated rooms proceed
/// in parallel.
pub struct RoomHandle {
    pub code: String,
    pub state: Mutex<RoomSession>,
}

impl RoomHandle {
    pub fn new(session: RoomSession) -> Self {
        Self {
            code: session.code.clone(),
            state: Mutex::new(session),
        }
    }
}

/// A pending stop: the grace timer task plus what it needs to commit.
struct PendingStop {
    generation: u64,
    round_id: Uuid,
    stopper_id: Uuid,
    stopper_name: String,
    task: Option<JoinHandle<()>>,
}

pub struct RoomSession {
    pub room_id: Uuid,
    pub code: String,
    pub players: Vec<Player>,
    pub game: GameState,
    /// Bumped on every cancel; a timer only fires if its generation
    /// still matches, so a reset deterministically supersedes a
    /// not-yet-fired timer.
    stop_generation: u64,
    pending_stop: Option<PendingStop>,
}

impl RoomSession {
    pub fn new(code: String, config: RoomConfig, host_user_id: Uuid, host_name: String) -> Self {
        Self {
            room_id: Uuid::new_v4(),
            code,
            players: vec![Player::new(host_user_id, host_name, true)],
            game: GameState::new(config),
            stop_generation: 0,
            pending_stop: None,
        }
    }

    pub fn player_by_user(&self, user_id: Uuid) -> Option<&Player> {
        self.players.iter().find(|p| p.user_id == user_id)
    }

    /// Add a new player while waiting, or reconnect a known user in
    /// any status. Returns the player info and whether the record is
    /// new. New players are rejected once the game has started.
    pub fn join(&mut self, user_id: Uuid, username: &str) -> Result<(PlayerInfo, bool), GameError> {
        if let Some(player) = self.players.iter_mut().find(|p| p.user_id == user_id) {
            player.connected = true;
            return Ok((PlayerInfo::from(&*player), false));
        }
        if self.game.status != RoomStatus::Waiting {
            return Err(GameError::GameInProgress);
        }
        let player = Player::new(user_id, username.to_string(), false);
        let info = PlayerInfo::from(&player);
        self.players.push(player);
        Ok((info, true))
    }

    /// Keep the player record for reconnection; only the live
    /// connection flag changes.
    pub fn mark_disconnected(&mut self, user_id: Uuid) {
        if let Some(player) = self.players.iter_mut().find(|p| p.user_id == user_id) {
            player.connected = false;
        }
    }

    pub fn member_ids(&self) -> Vec<Uuid> {
        self.players.iter().map(|p| p.user_id).collect()
    }

    pub fn player_infos(&self) -> Vec<PlayerInfo> {
        self.players.iter().map(PlayerInfo::from).collect()
    }

    pub fn snapshot(&self) -> RoomSnapshot {
        RoomSnapshot {
            code: self.code.clone(),
            status: self.game.status,
            max_rounds: self.game.config.max_rounds,
            categories: self.game.config.categories.clone(),
            players: self.player_infos(),
        }
    }

    /// Arm the grace timer slot. Returns the generation the timer must
    /// present to fire, or `None` when a timer is already pending or
    /// the round has already left its active phase (both benign).
    fn begin_stop(
        &mut self,
        round_id: Uuid,
        stopper_id: Uuid,
        stopper_name: String,
    ) -> Result<Option<u64>, GameError> {
        if self.pending_stop.is_some() {
            return Ok(None);
        }
        let round = self.game.round(round_id)?;
        if round.status != RoundStatus::Active {
            return Ok(None);
        }
        self.pending_stop = Some(PendingStop {
            generation: self.stop_generation,
            round_id,
            stopper_id,
            stopper_name,
            task: None,
        });
        Ok(Some(self.stop_generation))
    }

    fn set_stop_task(&mut self, task: JoinHandle<()>) {
        if let Some(pending) = &mut self.pending_stop {
            pending.task = Some(task);
        }
    }

    /// Claim the pending stop for firing. Succeeds at most once per
    /// armed timer; past this point the closure is committed and a
    /// late reset cannot undo it.
    fn take_fired_stop(&mut self, generation: u64) -> Option<PendingStop> {
        match &self.pending_stop {
            Some(pending) if pending.generation == generation => self.pending_stop.take(),
            _ => None,
        }
    }

    /// Cancel any pending timer; the slot is freed so a future round
    /// can arm its own.
    pub fn cancel_stop(&mut self) {
        self.stop_generation += 1;
        if let Some(pending) = self.pending_stop.take() {
            if let Some(task) = pending.task {
                task.abort();
            }
        }
    }

    pub fn has_pending_stop(&self) -> bool {
        self.pending_stop.is_some()
    }

    // -- Durable record builders --

    pub fn room_record(&self) -> RoomRecord {
        RoomRecord {
            id: self.room_id,
            code: self.code.clone(),
            status: self.game.status,
            max_rounds: self.game.config.max_rounds,
            categories: self.game.config.categories.clone(),
            used_letters: self.game.used_letters.iter().copied().collect(),
            updated_at: Utc::now(),
        }
    }

    pub fn player_record(&self, player: &Player) -> PlayerRecord {
        PlayerRecord {
            id: player.id,
            room_id: self.room_id,
            user_id: player.user_id,
            name: player.name.clone(),
            is_host: player.is_host,
            updated_at: Utc::now(),
        }
    }

    pub fn round_record(&self, round: &Round) -> RoundRecord {
        RoundRecord {
            id: round.id,
            room_id: self.room_id,
            number: round.number,
            letter: round.letter,
            status: round.status,
            stopper_id: round.stopper_id,
            updated_at: Utc::now(),
        }
    }

    pub fn answer_records(round: &Round) -> Vec<AnswerRecord> {
        round
            .answers
            .iter()
            .map(|a| AnswerRecord {
                id: a.id,
                round_id: a.round_id,
                player_id: a.player_id,
                category: a.category.clone(),
                content: a.content.clone(),
                is_valid: a.is_valid,
                score: a.score,
                updated_at: Utc::now(),
            })
            .collect()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StopTrigger {
    Started,
    AlreadyPending,
}

/// Handle a stop trigger for a room. The first trigger arms exactly
/// one grace timer and broadcasts the warning immediately; any further
/// trigger while it is pending is a no-op.
pub async fn trigger_stop(
    state: &SharedState,
    room: &Arc<RoomHandle>,
    round_id: Uuid,
    stopper_id: Uuid,
    stopper_name: String,
) -> Result<StopTrigger, GameError> {
    let mut session = room.state.lock().await;
    let generation = match session.begin_stop(round_id, stopper_id, stopper_name.clone())? {
        Some(generation) => generation,
        None => return Ok(StopTrigger::AlreadyPending),
    };
    let task = tokio::spawn(run_stop_timer(state.clone(), room.clone(), generation));
    session.set_stop_task(task);
    let members = session.member_ids();
    drop(session);

    state
        .registry
        .broadcast(
            &members,
            &ServerMessage::StopWarning {
                stopper_name,
                seconds: GRACE_SECONDS,
            },
        )
        .await;
    Ok(StopTrigger::Started)
}

/// Grace timer body. Runs detached from the triggering connection, so
/// it survives that player's disconnect; it re-acquires the room's
/// serialization before touching state so it cannot race a reset or a
/// vote.
async fn run_stop_timer(state: SharedState, room: Arc<RoomHandle>, generation: u64) {
    tokio::time::sleep(GRACE_WINDOW).await;

    let mut session = room.state.lock().await;
    let pending = match session.take_fired_stop(generation) {
        Some(pending) => pending,
        None => return, // canceled by reset
    };

    if let Err(e) = session.game.end_round(pending.round_id, pending.stopper_id) {
        tracing::warn!("Stop timer for room {} had nothing to close: {}", room.code, e);
        return;
    }

    match session.game.round(pending.round_id) {
        Ok(round) => {
            let record = session.round_record(round);
            if let Err(e) = state.storage.save_round(record) {
                tracing::error!("Failed to persist round close for room {}: {}", room.code, e);
            }
        }
        Err(e) => {
            tracing::error!("Round vanished while closing room {}: {}", room.code, e);
        }
    }

    let members = session.member_ids();
    let msg = ServerMessage::RoundEnded {
        stopper_name: pending.stopper_name,
        round_id: pending.round_id,
    };
    drop(session);

    state.registry.broadcast(&members, &msg).await;
}
