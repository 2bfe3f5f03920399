use std::collections::HashMap;

use bytes::Bytes;
use futures::{SinkExt, StreamExt};
use serde::{Deserialize, Serialize};
use tokio::net::TcpStream;
use tokio_util::codec::{Framed, LengthDelimitedCodec};
use uuid::Uuid;

use crate::config::RoomConfigRequest;
use crate::game::RoomStatus;
use crate::player::PlayerInfo;

// -- Framing --

pub type Transport = Framed<TcpStream, LengthDelimitedCodec>;

pub fn framed_transport(stream: TcpStream) -> Transport {
    LengthDelimitedCodec::builder()
        .max_frame_length(64 * 1024)
        .new_framed(stream)
}

// -- Client -> Server Messages --

#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum ClientMessage {
    // Handshake. Identity comes from an external login flow; the
    // session binds it once per connection.
    Hello {
        user_id: Uuid,
        username: String,
        version: String,
    },

    // Room lifecycle
    CreateRoom {
        config: RoomConfigRequest,
    },
    JoinRoom {
        room_code: String,
    },
    StartGame {
        room_code: String,
    },
    ResetRoom {
        room_code: String,
    },

    // Gameplay
    TriggerStop {
        room_code: String,
        round_id: Uuid,
    },
    SubmitAnswers {
        room_code: String,
        round_id: Uuid,
        answers: HashMap<String, String>,
    },
    VoteAnswerInvalid {
        room_code: String,
        round_id: Uuid,
        answer_id: Uuid,
    },
    GetRoundResults {
        room_code: String,
        round_id: Uuid,
    },

    // Connection
    Ping,
    Disconnect,
}

// -- Server -> Client Messages --

#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum ServerMessage {
    // Handshake
    Welcome {
        server_version: String,
    },
    HandshakeError {
        reason: String,
    },

    // Acknowledgements (sent to the acting connection only)
    RoomCreated {
        room: RoomSnapshot,
        player: PlayerInfo,
    },
    RoomJoined {
        room: RoomSnapshot,
        player: PlayerInfo,
    },
    ActionOk {
        message: Option<String>,
    },
    VoteAck {
        status: VoteStatus,
        votes: usize,
    },

    // Room broadcasts
    UpdatePlayers {
        players: Vec<PlayerInfo>,
    },
    GameStarted {
        letter: char,
        round_number: u32,
        round_id: Uuid,
        categories: Vec<String>,
    },
    StopWarning {
        stopper_name: String,
        seconds: u64,
    },
    RoundEnded {
        stopper_name: String,
        round_id: Uuid,
    },
    ShowResults {
        results: Vec<PlayerRoundResult>,
    },
    VoteUpdate {
        answer_id: Uuid,
        votes: usize,
        needed: usize,
    },
    GameOver {
        leaderboard: Vec<LeaderboardEntry>,
        awards: Awards,
    },
    RoomReset,

    // Errors
    Error {
        code: ErrorCode,
        message: String,
    },

    // Connection
    Pong,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub enum VoteStatus {
    Voted,
    Annulled,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub enum ErrorCode {
    NotFound,
    InvalidState,
    InsufficientPlayers,
    SelfVote,
    ValidationError,
    InternalError,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RoomSnapshot {
    pub code: String,
    pub status: RoomStatus,
    pub max_rounds: u32,
    pub categories: Vec<String>,
    pub players: Vec<PlayerInfo>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AnswerResult {
    pub id: Uuid,
    pub word: String,
    pub score: u16,
    pub is_valid: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PlayerRoundResult {
    pub user_id: Uuid,
    pub name: String,
    pub total_score: u32,
    pub answers: HashMap<String, AnswerResult>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LeaderboardEntry {
    pub user_id: Uuid,
    pub name: String,
    pub total_score: u32,
}

/// End-of-game awards (flash, brain). The results view displays them
/// but no rule populates them; they stay empty until one is defined.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Awards {
    pub flash: Option<LeaderboardEntry>,
    pub brain: Option<LeaderboardEntry>,
}

// -- Serialization helpers --

pub fn serialize_message<T: Serialize>(msg: &T) -> Result<Bytes, serde_json::Error> {
    let json = serde_json::to_vec(msg)?;
    Ok(Bytes::from(json))
}

pub fn deserialize_message<T: for<'de> Deserialize<'de>>(
    data: &[u8],
) -> Result<T, serde_json::Error> {
    serde_json::from_slice(data)
}

// -- Transport helpers --

pub async fn send_message<T: Serialize>(
    transport: &mut Transport,
    msg: &T,
) -> anyhow::Result<()> {
    let bytes = serialize_message(msg).map_err(|e| anyhow::anyhow!("serialize error: {}", e))?;
    transport
        .send(bytes)
        .await
        .map_err(|e| anyhow::anyhow!("send error: {}", e))
}

pub async fn recv_message<T: for<'de> Deserialize<'de>>(
    transport: &mut Transport,
) -> anyhow::Result<Option<T>> {
    match transport.next().await {
        Some(Ok(frame)) => {
            let msg = deserialize_message(&frame)
                .map_err(|e| anyhow::anyhow!("deserialize error: {}", e))?;
            Ok(Some(msg))
        }
        Some(Err(e)) => Err(anyhow::anyhow!("recv error: {}", e)),
        None => Ok(None),
    }
}
