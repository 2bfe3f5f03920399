use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// A player record within a room. Survives disconnects so the same
/// user can reconnect into an in-progress game.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Player {
    pub id: Uuid,
    pub user_id: Uuid,
    pub name: String,
    pub is_host: bool,
    pub connected: bool,
}

impl Player {
    pub fn new(user_id: Uuid, name: String, is_host: bool) -> Self {
        Self {
            id: Uuid::new_v4(),
            user_id,
            name,
            is_host,
            connected: true,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PlayerInfo {
    pub user_id: Uuid,
    pub name: String,
    pub is_host: bool,
    pub connected: bool,
}

impl From<&Player> for PlayerInfo {
    fn from(p: &Player) -> Self {
        Self {
            user_id: p.user_id,
            name: p.name.clone(),
            is_host: p.is_host,
            connected: p.connected,
        }
    }
}
