use std::{collections::HashMap, sync::Arc};

use tokio::sync::{Mutex, RwLock};

use crate::{
    config::EmptyRoomPolicy,
    error::{RoomError, RoomResult},
    rooms::{msg::RoomSummary, room::Room},
};

/// One room behind its own lock. Every mutation of a room, and the broadcast
/// that announces it, happens while this lock is held.
pub type RoomHandle = Arc<Mutex<Room>>;

pub struct RoomStore {
    rooms: RwLock<HashMap<String, RoomHandle>>,
    policy: EmptyRoomPolicy,
}

impl RoomStore {
    pub fn new(policy: EmptyRoomPolicy) -> Self {
        Self {
            rooms: RwLock::new(HashMap::new()),
            policy,
        }
    }

    pub fn policy(&self) -> EmptyRoomPolicy {
        self.policy
    }

    pub async fn get(&self, name: &str) -> RoomResult<RoomHandle> {
        self.rooms
            .read()
            .await
            .get(name)
            .cloned()
            .ok_or_else(|| RoomError::RoomNotFound(name.to_owned()))
    }

    /// Adds a new room, failing if the name is already in use.
    pub async fn insert(&self, room: Room) -> RoomResult<RoomHandle> {
        let mut rooms = self.rooms.write().await;
        if rooms.contains_key(room.name()) {
            return Err(RoomError::NameTaken(room.name().to_owned()));
        }
        let name = room.name().to_owned();
        let handle = Arc::new(Mutex::new(room));
        rooms.insert(name.clone(), handle.clone());
        tracing::info!(room = %name, "Room created");
        Ok(handle)
    }

    /// Removes `name` if it still has no members. Returns whether it was removed.
    pub async fn remove_if_empty(&self, name: &str) -> bool {
        let mut rooms = self.rooms.write().await;
        let Some(handle) = rooms.get(name).cloned() else {
            return false;
        };
        let mut room = handle.lock().await;
        if !room.is_empty() {
            return false;
        }
        room.close();
        rooms.remove(name);
        tracing::info!(room = %name, "Room destroyed");
        true
    }

    /// Rooms that currently have members, sorted by name.
    pub async fn summaries(&self) -> Vec<RoomSummary> {
        let handles: Vec<RoomHandle> = self.rooms.read().await.values().cloned().collect();
        let mut summaries = Vec::with_capacity(handles.len());
        for handle in handles {
            let room = handle.lock().await;
            if !room.is_empty() && !room.is_closed() {
                summaries.push(room.summary());
            }
        }
        summaries.sort_by(|a, b| a.name.cmp(&b.name));
        summaries
    }
}
