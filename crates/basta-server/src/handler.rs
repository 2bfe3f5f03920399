use rand::SeedableRng;
use uuid::Uuid;

use basta_common::config::RoomConfig;
use basta_common::game::{GameError, StartOutcome, VoteOutcome};
use basta_common::player::PlayerInfo;
use basta_common::protocol::{Awards, ClientMessage, ErrorCode, ServerMessage, VoteStatus};

use crate::room::{self, RoomSession};
use crate::server::SharedState;

pub async fn handle_message(
    user_id: Uuid,
    connection_id: Uuid,
    username: &str,
    msg: ClientMessage,
    state: &SharedState,
) -> anyhow::Result<()> {
    match msg {
        ClientMessage::CreateRoom { config } => {
            let config = match RoomConfig::from_request(&config) {
                Ok(c) => c,
                Err(e) => {
                    send_error(user_id, &e, state).await;
                    return Ok(());
                }
            };

            let mut rng = rand::rngs::StdRng::from_entropy();
            let room = state
                .registry
                .register_room(config, user_id, username.to_string(), &mut rng)
                .await;

            let (snapshot, host, room_record, player_record) = {
                let session = room.state.lock().await;
                (
                    session.snapshot(),
                    PlayerInfo::from(&session.players[0]),
                    session.room_record(),
                    session.player_record(&session.players[0]),
                )
            };

            if let Err(e) = state
                .storage
                .save_room(room_record)
                .and_then(|_| state.storage.save_player(player_record))
            {
                tracing::error!("Failed to persist new room {}: {}", room.code, e);
                state.registry.remove_room(&room.code).await;
                send_internal_error(user_id, state).await;
                return Ok(());
            }

            state
                .registry
                .set_connection_room(user_id, Some(room.code.clone()))
                .await;
            send_to_user(
                user_id,
                ServerMessage::RoomCreated {
                    room: snapshot,
                    player: host,
                },
                state,
            )
            .await;
        }

        ClientMessage::JoinRoom { room_code } => {
            let room = match state.registry.find_room(&room_code).await {
                Some(r) => r,
                None => {
                    send_error(user_id, &GameError::RoomNotFound, state).await;
                    return Ok(());
                }
            };

            let mut session = room.state.lock().await;
            let (info, is_new) = match session.join(user_id, username) {
                Ok(r) => r,
                Err(e) => {
                    drop(session);
                    send_error(user_id, &e, state).await;
                    return Ok(());
                }
            };

            if is_new {
                let record = session.players.last().map(|p| session.player_record(p));
                if let Some(record) = record {
                    if let Err(e) = state.storage.save_player(record) {
                        tracing::error!("Failed to persist player in room {}: {}", room.code, e);
                        session.players.pop();
                        drop(session);
                        send_internal_error(user_id, state).await;
                        return Ok(());
                    }
                }
            }

            let snapshot = session.snapshot();
            let players = session.player_infos();
            let members = session.member_ids();
            drop(session);

            state
                .registry
                .set_connection_room(user_id, Some(room_code))
                .await;
            send_to_user(
                user_id,
                ServerMessage::RoomJoined {
                    room: snapshot,
                    player: info,
                },
                state,
            )
            .await;
            state
                .registry
                .broadcast(&members, &ServerMessage::UpdatePlayers { players })
                .await;
        }

        ClientMessage::StartGame { room_code } => {
            let room = match state.registry.find_room(&room_code).await {
                Some(r) => r,
                None => {
                    send_error(user_id, &GameError::RoomNotFound, state).await;
                    return Ok(());
                }
            };

            let mut session = room.state.lock().await;
            let prev_status = session.game.status;
            // start_round closes the previous round and drops its vote
            // tallies; keep both so a failed persist can restore them.
            let prev_round = session.game.rounds.last().map(|r| (r.id, r.status));
            let prev_votes = session.game.votes.clone();
            let player_count = session.players.len();
            let mut rng = rand::rngs::StdRng::from_entropy();

            match session.game.start_round(player_count, &mut rng) {
                Err(e) => {
                    drop(session);
                    send_error(user_id, &e, state).await;
                }

                Ok(StartOutcome::GameOver) => {
                    let leaderboard = session.game.leaderboard(&session.players);
                    if let Err(e) = state.storage.save_room(session.room_record()) {
                        tracing::error!("Failed to persist game over for {}: {}", room.code, e);
                    }
                    let members = session.member_ids();
                    drop(session);

                    state
                        .registry
                        .broadcast(
                            &members,
                            &ServerMessage::GameOver {
                                leaderboard,
                                awards: Awards::default(),
                            },
                        )
                        .await;
                    send_to_user(
                        user_id,
                        ServerMessage::ActionOk {
                            message: Some("Game over".into()),
                        },
                        state,
                    )
                    .await;
                }

                Ok(StartOutcome::Started {
                    round_id,
                    round_number,
                    letter,
                }) => {
                    let round_record = session
                        .game
                        .round(round_id)
                        .map(|r| session.round_record(r));
                    let persisted = round_record
                        .map_err(|e| e.to_string())
                        .and_then(|record| {
                            state
                                .storage
                                .save_room(session.room_record())
                                .and_then(|_| state.storage.save_round(record))
                                .map_err(|e| e.to_string())
                        });
                    if let Err(e) = persisted {
                        tracing::error!("Failed to persist round start for {}: {}", room.code, e);
                        if let Some(round) = session.game.rounds.pop() {
                            session.game.used_letters.remove(&round.letter);
                        }
                        if let Some((prev_id, status)) = prev_round {
                            if let Some(prev) =
                                session.game.rounds.iter_mut().find(|r| r.id == prev_id)
                            {
                                prev.status = status;
                            }
                        }
                        session.game.votes = prev_votes;
                        session.game.status = prev_status;
                        drop(session);
                        send_internal_error(user_id, state).await;
                        return Ok(());
                    }

                    let categories = session.game.config.categories.clone();
                    let members = session.member_ids();
                    drop(session);

                    state
                        .registry
                        .broadcast(
                            &members,
                            &ServerMessage::GameStarted {
                                letter,
                                round_number,
                                round_id,
                                categories,
                            },
                        )
                        .await;
                    send_to_user(user_id, ServerMessage::ActionOk { message: None }, state).await;
                }
            }
        }

        ClientMessage::TriggerStop {
            room_code,
            round_id,
        } => {
            let room = match state.registry.find_room(&room_code).await {
                Some(r) => r,
                None => {
                    send_error(user_id, &GameError::RoomNotFound, state).await;
                    return Ok(());
                }
            };

            {
                let session = room.state.lock().await;
                if session.player_by_user(user_id).is_none() {
                    drop(session);
                    send_error(user_id, &GameError::NotInRoom, state).await;
                    return Ok(());
                }
            }

            // Duplicate triggers are benign: the caller still gets OK,
            // but no second timer is armed.
            match room::trigger_stop(state, &room, round_id, user_id, username.to_string()).await {
                Ok(_) => {
                    send_to_user(user_id, ServerMessage::ActionOk { message: None }, state).await;
                }
                Err(e) => send_error(user_id, &e, state).await,
            }
        }

        ClientMessage::SubmitAnswers {
            room_code,
            round_id,
            answers,
        } => {
            let room = match state.registry.find_room(&room_code).await {
                Some(r) => r,
                None => {
                    send_error(user_id, &GameError::RoomNotFound, state).await;
                    return Ok(());
                }
            };

            let mut session = room.state.lock().await;
            let player_id = match session.player_by_user(user_id) {
                Some(p) => p.id,
                None => {
                    drop(session);
                    send_error(user_id, &GameError::NotInRoom, state).await;
                    return Ok(());
                }
            };

            match session.game.submit_answers(player_id, round_id, &answers) {
                Err(e) => {
                    drop(session);
                    send_error(user_id, &e, state).await;
                }
                Ok(false) => {
                    // Already submitted this round; ignore idempotently.
                    drop(session);
                    send_to_user(user_id, ServerMessage::ActionOk { message: None }, state).await;
                }
                Ok(true) => {
                    let records = session
                        .game
                        .round(round_id)
                        .map(RoomSession::answer_records)
                        .unwrap_or_default();
                    if let Err(e) = state.storage.save_answers(records) {
                        tracing::error!("Failed to persist answers for {}: {}", room.code, e);
                        session.game.retract_submission(player_id, round_id);
                        drop(session);
                        send_internal_error(user_id, state).await;
                        return Ok(());
                    }
                    drop(session);
                    send_to_user(user_id, ServerMessage::ActionOk { message: None }, state).await;
                }
            }
        }

        ClientMessage::VoteAnswerInvalid {
            room_code,
            round_id,
            answer_id,
        } => {
            let room = match state.registry.find_room(&room_code).await {
                Some(r) => r,
                None => {
                    send_error(user_id, &GameError::RoomNotFound, state).await;
                    return Ok(());
                }
            };

            let mut session = room.state.lock().await;
            let players = session.players.clone();
            match session.game.cast_vote(round_id, answer_id, user_id, &players) {
                Err(e) => {
                    drop(session);
                    send_error(user_id, &e, state).await;
                }

                Ok(VoteOutcome::Voted { votes, needed }) => {
                    let members = session.member_ids();
                    drop(session);
                    state
                        .registry
                        .broadcast(
                            &members,
                            &ServerMessage::VoteUpdate {
                                answer_id,
                                votes,
                                needed,
                            },
                        )
                        .await;
                    send_to_user(
                        user_id,
                        ServerMessage::VoteAck {
                            status: VoteStatus::Voted,
                            votes,
                        },
                        state,
                    )
                    .await;
                }

                Ok(VoteOutcome::Annulled { votes }) => {
                    let results = match session.game.round_results(round_id, &players) {
                        Ok(r) => r,
                        Err(e) => {
                            drop(session);
                            send_error(user_id, &e, state).await;
                            return Ok(());
                        }
                    };
                    let records = session
                        .game
                        .round(round_id)
                        .map(RoomSession::answer_records)
                        .unwrap_or_default();
                    if let Err(e) = state.storage.save_answers(records) {
                        tracing::error!("Failed to persist annulment for {}: {}", room.code, e);
                        drop(session);
                        send_internal_error(user_id, state).await;
                        return Ok(());
                    }
                    let members = session.member_ids();
                    drop(session);

                    state
                        .registry
                        .broadcast(&members, &ServerMessage::ShowResults { results })
                        .await;
                    send_to_user(
                        user_id,
                        ServerMessage::VoteAck {
                            status: VoteStatus::Annulled,
                            votes,
                        },
                        state,
                    )
                    .await;
                }
            }
        }

        ClientMessage::GetRoundResults {
            room_code,
            round_id,
        } => {
            let room = match state.registry.find_room(&room_code).await {
                Some(r) => r,
                None => {
                    send_error(user_id, &GameError::RoomNotFound, state).await;
                    return Ok(());
                }
            };

            let mut session = room.state.lock().await;
            let players = session.players.clone();
            let results = match session.game.round_results(round_id, &players) {
                Ok(r) => r,
                Err(e) => {
                    drop(session);
                    send_error(user_id, &e, state).await;
                    return Ok(());
                }
            };
            let records = session
                .game
                .round(round_id)
                .map(RoomSession::answer_records)
                .unwrap_or_default();
            if let Err(e) = state.storage.save_answers(records) {
                tracing::error!("Failed to persist scores for {}: {}", room.code, e);
                drop(session);
                send_internal_error(user_id, state).await;
                return Ok(());
            }
            let members = session.member_ids();
            drop(session);

            state
                .registry
                .broadcast(&members, &ServerMessage::ShowResults { results })
                .await;
            send_to_user(user_id, ServerMessage::ActionOk { message: None }, state).await;
        }

        ClientMessage::ResetRoom { room_code } => {
            let room = match state.registry.find_room(&room_code).await {
                Some(r) => r,
                None => {
                    send_error(user_id, &GameError::RoomNotFound, state).await;
                    return Ok(());
                }
            };

            let mut session = room.state.lock().await;
            session.cancel_stop();
            session.game.reset();

            let persisted = state
                .storage
                .clear_room(session.room_id)
                .and_then(|_| state.storage.save_room(session.room_record()));
            if let Err(e) = persisted {
                tracing::error!("Failed to persist reset for {}: {}", room.code, e);
                drop(session);
                send_internal_error(user_id, state).await;
                return Ok(());
            }
            let members = session.member_ids();
            drop(session);

            state
                .registry
                .broadcast(&members, &ServerMessage::RoomReset)
                .await;
            send_to_user(user_id, ServerMessage::ActionOk { message: None }, state).await;
        }

        ClientMessage::Ping => {
            send_to_user(user_id, ServerMessage::Pong, state).await;
        }

        ClientMessage::Disconnect => {
            handle_disconnect(user_id, connection_id, state).await;
        }

        ClientMessage::Hello { .. } => {
            // Handshake is handled by the connection setup; a repeat
            // Hello mid-session is ignored.
        }
    }

    Ok(())
}

/// Drop the live connection but keep the player record so the user can
/// reconnect; the room undergoes no transition. When the closing socket
/// has already been superseded by a reconnect, nothing happens.
pub async fn handle_disconnect(user_id: Uuid, connection_id: Uuid, state: &SharedState) {
    let room_code = match state.registry.remove_connection(user_id, connection_id).await {
        Some(code) => code,
        None => return,
    };
    if let Some(room) = state.registry.find_room(&room_code).await {
        let mut session = room.state.lock().await;
        session.mark_disconnected(user_id);
        let members = session.member_ids();
        let players = session.player_infos();
        drop(session);
        state
            .registry
            .broadcast(&members, &ServerMessage::UpdatePlayers { players })
            .await;
    }
}

async fn send_to_user(user_id: Uuid, msg: ServerMessage, state: &SharedState) {
    state.registry.send_to(user_id, msg).await;
}

async fn send_error(user_id: Uuid, e: &GameError, state: &SharedState) {
    send_to_user(
        user_id,
        ServerMessage::Error {
            code: error_code(e),
            message: e.to_string(),
        },
        state,
    )
    .await;
}

async fn send_internal_error(user_id: Uuid, state: &SharedState) {
    send_to_user(
        user_id,
        ServerMessage::Error {
            code: ErrorCode::InternalError,
            message: "internal error".into(),
        },
        state,
    )
    .await;
}

fn error_code(e: &GameError) -> ErrorCode {
    match e {
        GameError::RoomNotFound | GameError::RoundNotFound | GameError::AnswerNotFound => {
            ErrorCode::NotFound
        }
        GameError::GameInProgress
        | GameError::RoundInProgress
        | GameError::RoundClosed
        | GameError::NotInRoom => ErrorCode::InvalidState,
        GameError::InsufficientPlayers => ErrorCode::InsufficientPlayers,
        GameError::SelfVote => ErrorCode::SelfVote,
        GameError::InvalidCategory(_) | GameError::InvalidConfig(_) => ErrorCode::ValidationError,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;
    use std::sync::Arc;

    use rand::SeedableRng;
    use tokio::sync::mpsc;

    use basta_common::game::{RoomStatus, RoundStatus};

    use crate::registry::{ConnectionHandle, SessionRegistry};
    use crate::room::RoomHandle;
    use crate::server::ServerState;
    use crate::storage::{
        AnswerRecord, MemoryStorage, PlayerRecord, RoomRecord, RoundRecord, Storage, StorageError,
    };

    async fn state_with(storage: Arc<dyn Storage>) -> SharedState {
        Arc::new(ServerState {
            registry: SessionRegistry::new(),
            storage,
            max_connections: 100,
        })
    }

    async fn make_room(state: &SharedState, host: Uuid, guest: Uuid) -> Arc<RoomHandle> {
        let mut rng = rand::rngs::StdRng::seed_from_u64(42);
        let room = state
            .registry
            .register_room(RoomConfig::classic(), host, "Ana".into(), &mut rng)
            .await;
        room.state.lock().await.join(guest, "Beto").unwrap();
        room
    }

    async fn connect(
        state: &SharedState,
        user_id: Uuid,
        name: &str,
        room_code: Option<String>,
    ) -> (Uuid, mpsc::Receiver<ServerMessage>) {
        let connection_id = Uuid::new_v4();
        let (tx, rx) = mpsc::channel(32);
        state
            .registry
            .register_connection(ConnectionHandle {
                connection_id,
                user_id,
                username: name.into(),
                tx,
                room_code,
            })
            .await;
        (connection_id, rx)
    }

    async fn start_round(room: &Arc<RoomHandle>) -> Uuid {
        let mut session = room.state.lock().await;
        let mut rng = rand::rngs::StdRng::seed_from_u64(7);
        let player_count = session.players.len();
        match session.game.start_round(player_count, &mut rng).unwrap() {
            StartOutcome::Started { round_id, .. } => round_id,
            StartOutcome::GameOver => panic!("expected a round"),
        }
    }

    fn drain(rx: &mut mpsc::Receiver<ServerMessage>) -> Vec<ServerMessage> {
        let mut out = Vec::new();
        while let Ok(msg) = rx.try_recv() {
            out.push(msg);
        }
        out
    }

    /// Storage whose round table is down. Everything else works, so a
    /// round-start persist fails after the room save succeeded.
    struct FlakyRoundStorage {
        inner: MemoryStorage,
    }

    impl Storage for FlakyRoundStorage {
        fn save_room(&self, record: RoomRecord) -> Result<(), StorageError> {
            self.inner.save_room(record)
        }
        fn save_player(&self, record: PlayerRecord) -> Result<(), StorageError> {
            self.inner.save_player(record)
        }
        fn save_round(&self, _record: RoundRecord) -> Result<(), StorageError> {
            Err(StorageError::Backend("round table unavailable".into()))
        }
        fn save_answers(&self, records: Vec<AnswerRecord>) -> Result<(), StorageError> {
            self.inner.save_answers(records)
        }
        fn load_room(&self, code: &str) -> Result<Option<RoomRecord>, StorageError> {
            self.inner.load_room(code)
        }
        fn clear_room(&self, room_id: Uuid) -> Result<(), StorageError> {
            self.inner.clear_room(room_id)
        }
        fn delete_room(&self, room_id: Uuid) -> Result<(), StorageError> {
            self.inner.delete_room(room_id)
        }
    }

    #[tokio::test]
    async fn test_stale_disconnect_keeps_reconnected_user_registered() {
        let state = state_with(Arc::new(MemoryStorage::new())).await;
        let host = Uuid::new_v4();
        let guest = Uuid::new_v4();
        let room = make_room(&state, host, guest).await;

        let (old_conn, _old_rx) = connect(&state, guest, "Beto", Some(room.code.clone())).await;
        let (_new_conn, mut new_rx) = connect(&state, guest, "Beto", Some(room.code.clone())).await;

        // The superseded socket finally times out after the reconnect.
        handle_disconnect(guest, old_conn, &state).await;

        state.registry.send_to(guest, ServerMessage::Pong).await;
        assert!(matches!(new_rx.try_recv(), Ok(ServerMessage::Pong)));
        let session = room.state.lock().await;
        assert!(session.player_by_user(guest).unwrap().connected);
    }

    #[tokio::test]
    async fn test_failed_round_persist_keeps_voting_round_and_votes() {
        let state = state_with(Arc::new(FlakyRoundStorage {
            inner: MemoryStorage::new(),
        }))
        .await;
        let host = Uuid::new_v4();
        let guest = Uuid::new_v4();
        let room = make_room(&state, host, guest).await;
        room.state
            .lock()
            .await
            .join(Uuid::new_v4(), "Carla")
            .unwrap();
        let (host_conn, mut host_rx) = connect(&state, host, "Ana", Some(room.code.clone())).await;

        let round_id = start_round(&room).await;
        let answer_id = {
            let mut session = room.state.lock().await;
            let host_player = session.players[0].id;
            session
                .game
                .submit_answers(
                    host_player,
                    round_id,
                    &HashMap::from([("NOMBRE".to_string(), "Xxx".to_string())]),
                )
                .unwrap();
            let answer_id = session.game.round(round_id).unwrap().answers[0].id;
            session.game.end_round(round_id, guest).unwrap();
            let players = session.players.clone();
            let outcome = session
                .game
                .cast_vote(round_id, answer_id, guest, &players)
                .unwrap();
            assert_eq!(outcome, VoteOutcome::Voted { votes: 1, needed: 2 });
            answer_id
        };

        handle_message(
            host,
            host_conn,
            "Ana",
            ClientMessage::StartGame {
                room_code: room.code.clone(),
            },
            &state,
        )
        .await
        .unwrap();

        // The failed persist must leave the previous round in its
        // voting phase with the cast vote intact.
        let session = room.state.lock().await;
        assert_eq!(session.game.status, RoomStatus::Voting);
        assert_eq!(session.game.rounds.len(), 1);
        assert_eq!(
            session.game.round(round_id).unwrap().status,
            RoundStatus::Voting
        );
        assert_eq!(session.game.votes.count(answer_id), 1);
        drop(session);

        assert!(drain(&mut host_rx).iter().any(|m| matches!(
            m,
            ServerMessage::Error {
                code: ErrorCode::InternalError,
                ..
            }
        )));
    }

    #[tokio::test]
    async fn test_submit_from_non_member_is_invalid_state() {
        let state = state_with(Arc::new(MemoryStorage::new())).await;
        let host = Uuid::new_v4();
        let guest = Uuid::new_v4();
        let room = make_room(&state, host, guest).await;
        let round_id = start_round(&room).await;

        let outsider = Uuid::new_v4();
        let (conn, mut rx) = connect(&state, outsider, "Mallory", None).await;
        handle_message(
            outsider,
            conn,
            "Mallory",
            ClientMessage::SubmitAnswers {
                room_code: room.code.clone(),
                round_id,
                answers: HashMap::from([("NOMBRE".to_string(), "Mal".to_string())]),
            },
            &state,
        )
        .await
        .unwrap();

        assert!(drain(&mut rx).iter().any(|m| matches!(
            m,
            ServerMessage::Error {
                code: ErrorCode::InvalidState,
                ..
            }
        )));
        let session = room.state.lock().await;
        assert!(session.game.round(round_id).unwrap().answers.is_empty());
    }

    #[tokio::test]
    async fn test_stop_from_non_member_is_rejected() {
        let state = state_with(Arc::new(MemoryStorage::new())).await;
        let host = Uuid::new_v4();
        let guest = Uuid::new_v4();
        let room = make_room(&state, host, guest).await;
        let round_id = start_round(&room).await;
        let (_host_conn, mut host_rx) = connect(&state, host, "Ana", Some(room.code.clone())).await;

        let outsider = Uuid::new_v4();
        let (conn, mut rx) = connect(&state, outsider, "Mallory", None).await;
        handle_message(
            outsider,
            conn,
            "Mallory",
            ClientMessage::TriggerStop {
                room_code: room.code.clone(),
                round_id,
            },
            &state,
        )
        .await
        .unwrap();

        assert!(drain(&mut rx).iter().any(|m| matches!(
            m,
            ServerMessage::Error {
                code: ErrorCode::InvalidState,
                ..
            }
        )));
        assert!(!drain(&mut host_rx)
            .iter()
            .any(|m| matches!(m, ServerMessage::StopWarning { .. })));
        let session = room.state.lock().await;
        assert!(!session.has_pending_stop());
    }
}
