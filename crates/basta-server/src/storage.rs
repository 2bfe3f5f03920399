use std::collections::HashMap;
use std::sync::Mutex;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use basta_common::game::{RoomStatus, RoundStatus};

/// Durable record of a room between process restarts. The backing
/// technology is an implementation detail behind [`Storage`]; protocol
/// correctness never depends on it.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RoomRecord {
    pub id: Uuid,
    pub code: String,
    pub status: RoomStatus,
    pub max_rounds: u32,
    pub categories: Vec<String>,
    pub used_letters: Vec<char>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PlayerRecord {
    pub id: Uuid,
    pub room_id: Uuid,
    pub user_id: Uuid,
    pub name: String,
    pub is_host: bool,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RoundRecord {
    pub id: Uuid,
    pub room_id: Uuid,
    pub number: u32,
    pub letter: char,
    pub status: RoundStatus,
    pub stopper_id: Option<Uuid>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AnswerRecord {
    pub id: Uuid,
    pub round_id: Uuid,
    pub player_id: Uuid,
    pub category: String,
    pub content: String,
    pub is_valid: bool,
    pub score: u16,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, thiserror::Error)]
pub enum StorageError {
    #[error("storage backend failure: {0}")]
    Backend(String),
}

/// CRUD-style durable store for room/player/round/answer records.
/// Saves are upserts keyed by record id. A failed save aborts the
/// action that issued it; nothing is broadcast for a failed mutation.
pub trait Storage: Send + Sync {
    fn save_room(&self, record: RoomRecord) -> Result<(), StorageError>;
    fn save_player(&self, record: PlayerRecord) -> Result<(), StorageError>;
    fn save_round(&self, record: RoundRecord) -> Result<(), StorageError>;
    fn save_answers(&self, records: Vec<AnswerRecord>) -> Result<(), StorageError>;
    fn load_room(&self, code: &str) -> Result<Option<RoomRecord>, StorageError>;
    /// Delete every round and answer of a room, keeping room and
    /// players. Used by room reset.
    fn clear_room(&self, room_id: Uuid) -> Result<(), StorageError>;
    fn delete_room(&self, room_id: Uuid) -> Result<(), StorageError>;
}

/// In-process store. The default backend; also what the tests run on.
#[derive(Default)]
pub struct MemoryStorage {
    inner: Mutex<MemoryInner>,
}

#[derive(Default)]
struct MemoryInner {
    rooms: HashMap<Uuid, RoomRecord>,
    players: HashMap<Uuid, PlayerRecord>,
    rounds: HashMap<Uuid, RoundRecord>,
    answers: HashMap<Uuid, AnswerRecord>,
}

impl MemoryStorage {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> Result<std::sync::MutexGuard<'_, MemoryInner>, StorageError> {
        self.inner
            .lock()
            .map_err(|_| StorageError::Backend("storage mutex poisoned".into()))
    }
}

impl Storage for MemoryStorage {
    fn save_room(&self, record: RoomRecord) -> Result<(), StorageError> {
        self.lock()?.rooms.insert(record.id, record);
        Ok(())
    }

    fn save_player(&self, record: PlayerRecord) -> Result<(), StorageError> {
        self.lock()?.players.insert(record.id, record);
        Ok(())
    }

    fn save_round(&self, record: RoundRecord) -> Result<(), StorageError> {
        self.lock()?.rounds.insert(record.id, record);
        Ok(())
    }

    fn save_answers(&self, records: Vec<AnswerRecord>) -> Result<(), StorageError> {
        let mut inner = self.lock()?;
        for record in records {
            inner.answers.insert(record.id, record);
        }
        Ok(())
    }

    fn load_room(&self, code: &str) -> Result<Option<RoomRecord>, StorageError> {
        Ok(self.lock()?.rooms.values().find(|r| r.code == code).cloned())
    }

    fn clear_room(&self, room_id: Uuid) -> Result<(), StorageError> {
        let mut inner = self.lock()?;
        let round_ids: Vec<Uuid> = inner
            .rounds
            .values()
            .filter(|r| r.room_id == room_id)
            .map(|r| r.id)
            .collect();
        inner.rounds.retain(|_, r| r.room_id != room_id);
        inner.answers.retain(|_, a| !round_ids.contains(&a.round_id));
        Ok(())
    }

    fn delete_room(&self, room_id: Uuid) -> Result<(), StorageError> {
        let mut inner = self.lock()?;
        let round_ids: Vec<Uuid> = inner
            .rounds
            .values()
            .filter(|r| r.room_id == room_id)
            .map(|r| r.id)
            .collect();
        inner.rooms.remove(&room_id);
        inner.players.retain(|_, p| p.room_id != room_id);
        inner.rounds.retain(|_, r| r.room_id != room_id);
        inner.answers.retain(|_, a| !round_ids.contains(&a.round_id));
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn room_record(code: &str) -> RoomRecord {
        RoomRecord {
            id: Uuid::new_v4(),
            code: code.into(),
            status: RoomStatus::Waiting,
            max_rounds: 5,
            categories: vec!["NOMBRE".into()],
            used_letters: Vec::new(),
            updated_at: Utc::now(),
        }
    }

    #[test]
    fn test_save_and_load_room() {
        let storage = MemoryStorage::new();
        let record = room_record("ABCD");
        storage.save_room(record.clone()).unwrap();
        let loaded = storage.load_room("ABCD").unwrap().unwrap();
        assert_eq!(loaded.id, record.id);
        assert!(storage.load_room("ZZZZ").unwrap().is_none());
    }

    #[test]
    fn test_save_room_is_upsert() {
        let storage = MemoryStorage::new();
        let mut record = room_record("ABCD");
        storage.save_room(record.clone()).unwrap();
        record.status = RoomStatus::Playing;
        storage.save_room(record.clone()).unwrap();
        let loaded = storage.load_room("ABCD").unwrap().unwrap();
        assert_eq!(loaded.status, RoomStatus::Playing);
    }

    #[test]
    fn test_clear_room_keeps_room_and_players() {
        let storage = MemoryStorage::new();
        let room = room_record("ABCD");
        let round = RoundRecord {
            id: Uuid::new_v4(),
            room_id: room.id,
            number: 1,
            letter: 'A',
            status: RoundStatus::Closed,
            stopper_id: None,
            updated_at: Utc::now(),
        };
        let answer = AnswerRecord {
            id: Uuid::new_v4(),
            round_id: round.id,
            player_id: Uuid::new_v4(),
            category: "NOMBRE".into(),
            content: "Ana".into(),
            is_valid: true,
            score: 100,
            updated_at: Utc::now(),
        };
        storage.save_room(room.clone()).unwrap();
        storage.save_round(round).unwrap();
        storage.save_answers(vec![answer]).unwrap();

        storage.clear_room(room.id).unwrap();
        assert!(storage.load_room("ABCD").unwrap().is_some());
        assert!(storage.lock().unwrap().rounds.is_empty());
        assert!(storage.lock().unwrap().answers.is_empty());
    }
}
