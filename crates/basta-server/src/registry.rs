use std::collections::HashMap;
use std::sync::Arc;

use rand::Rng;
use tokio::sync::mpsc;
use tokio::sync::RwLock;
use uuid::Uuid;

use basta_common::config::RoomConfig;
use basta_common::protocol::ServerMessage;

use crate::room::{RoomHandle, RoomSession};

pub const ROOM_CODE_LEN: usize = 4;

pub struct ConnectionHandle {
    /// Identifies this socket, not the user. A reconnect registers a
    /// fresh handle under the same user id with a new connection id.
    pub connection_id: Uuid,
    pub user_id: Uuid,
    pub username: String,
    pub tx: mpsc::Sender<ServerMessage>,
    pub room_code: Option<String>,
}

/// Maps room codes to room instances and user ids to live connections.
/// This is the only state shared across rooms; per-room game state is
/// reached through the `Arc<RoomHandle>` so the maps are locked only
/// for lookups and membership changes, never across a room action.
pub struct SessionRegistry {
    rooms: RwLock<HashMap<String, Arc<RoomHandle>>>,
    connections: RwLock<HashMap<Uuid, ConnectionHandle>>,
}

impl SessionRegistry {
    pub fn new() -> Self {
        Self {
            rooms: RwLock::new(HashMap::new()),
            connections: RwLock::new(HashMap::new()),
        }
    }

    /// Create a room under a fresh code. The code space is finite
    /// (26^4), so collisions are retried until a free code is found.
    pub async fn register_room(
        &self,
        config: RoomConfig,
        host_user_id: Uuid,
        host_name: String,
        rng: &mut impl Rng,
    ) -> Arc<RoomHandle> {
        let mut rooms = self.rooms.write().await;
        let code = loop {
            let candidate = generate_room_code(rng);
            if !rooms.contains_key(&candidate) {
                break candidate;
            }
        };
        let handle = Arc::new(RoomHandle::new(RoomSession::new(
            code.clone(),
            config,
            host_user_id,
            host_name,
        )));
        rooms.insert(code, handle.clone());
        handle
    }

    pub async fn find_room(&self, code: &str) -> Option<Arc<RoomHandle>> {
        self.rooms.read().await.get(code).cloned()
    }

    pub async fn remove_room(&self, code: &str) {
        self.rooms.write().await.remove(code);
    }

    pub async fn register_connection(&self, handle: ConnectionHandle) {
        self.connections.write().await.insert(handle.user_id, handle);
    }

    pub async fn set_connection_room(&self, user_id: Uuid, room_code: Option<String>) {
        if let Some(conn) = self.connections.write().await.get_mut(&user_id) {
            conn.room_code = room_code;
        }
    }

    /// Drop a live connection, returning the room code it was attached
    /// to. The player record inside the room is left alone so the user
    /// can reconnect. A close from a superseded socket is a no-op: the
    /// registered handle is only removed when its connection id matches
    /// the one that closed.
    pub async fn remove_connection(&self, user_id: Uuid, connection_id: Uuid) -> Option<String> {
        let mut conns = self.connections.write().await;
        match conns.get(&user_id) {
            Some(c) if c.connection_id == connection_id => {
                conns.remove(&user_id).and_then(|c| c.room_code)
            }
            _ => None,
        }
    }

    pub async fn connection_count(&self) -> usize {
        self.connections.read().await.len()
    }

    pub async fn send_to(&self, user_id: Uuid, msg: ServerMessage) {
        let conns = self.connections.read().await;
        if let Some(conn) = conns.get(&user_id) {
            let _ = conn.tx.send(msg).await;
        }
    }

    /// Fan a message out to every listed member with a live connection.
    pub async fn broadcast(&self, member_ids: &[Uuid], msg: &ServerMessage) {
        let conns = self.connections.read().await;
        for &id in member_ids {
            if let Some(conn) = conns.get(&id) {
                let _ = conn.tx.send(msg.clone()).await;
            }
        }
    }
}

impl Default for SessionRegistry {
    fn default() -> Self {
        Self::new()
    }
}

pub fn generate_room_code(rng: &mut impl Rng) -> String {
    (0..ROOM_CODE_LEN)
        .map(|_| (b'A' + rng.gen_range(0..26)) as char)
        .collect()
}
