//! Connected clients and the identities they announced.
//!
//! A connection is attached as soon as the socket opens and bound to a
//! username by `login`. Users outlive their connection only while they are
//! inside the reconnection window.

use std::collections::HashMap;

use tokio::sync::{mpsc, RwLock};
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use crate::{
    config::IdentityPolicy,
    error::{RoomError, RoomResult},
    rooms::msg::ServerEvent,
};

pub type ConnectionId = Uuid;

/// Outbound side of one client connection.
#[derive(Debug, Clone)]
pub struct ConnectionHandle {
    pub id: ConnectionId,
    outbox: mpsc::Sender<ServerEvent>,
    closer: CancellationToken,
}

impl ConnectionHandle {
    pub fn new(outbox: mpsc::Sender<ServerEvent>, closer: CancellationToken) -> Self {
        Self {
            id: Uuid::now_v7(),
            outbox,
            closer,
        }
    }

    /// Queues `event` without waiting. A slow client loses the event rather
    /// than stalling the room that produced it.
    pub fn send(&self, event: ServerEvent) -> bool {
        match self.outbox.try_send(event) {
            Ok(()) => true,
            Err(e) => {
                tracing::warn!(connection_id = %self.id, error = %e, "Failed to queue event");
                false
            }
        }
    }

    /// Asks the connection's socket loop to shut down.
    pub fn close(&self) {
        self.closer.cancel();
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct User {
    pub name: String,
    pub room: Option<String>,
}

/// How a successful `register` related to what the registry already knew.
#[derive(Debug)]
pub enum Registration {
    New,
    /// Same name on the same connection.
    Unchanged,
    /// The name was known but disconnected.
    Resumed,
    /// The name was live on another connection, which lost it.
    Replaced { evicted: ConnectionHandle },
}

/// Returned when a connection that carried an identity goes away.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Detached {
    pub username: String,
    pub generation: u64,
}

#[derive(Debug)]
struct UserEntry {
    connection: Option<ConnectionId>,
    room: Option<String>,
    generation: u64,
}

#[derive(Debug)]
struct Attached {
    handle: ConnectionHandle,
    username: Option<String>,
}

#[derive(Debug, Default)]
struct Inner {
    connections: HashMap<ConnectionId, Attached>,
    users: HashMap<String, UserEntry>,
    next_generation: u64,
}

impl Inner {
    fn generation(&mut self) -> u64 {
        self.next_generation += 1;
        self.next_generation
    }
}

pub struct SessionRegistry {
    inner: RwLock<Inner>,
    policy: IdentityPolicy,
}

impl SessionRegistry {
    pub fn new(policy: IdentityPolicy) -> Self {
        Self {
            inner: RwLock::new(Inner::default()),
            policy,
        }
    }

    pub async fn attach(&self, handle: ConnectionHandle) {
        let mut inner = self.inner.write().await;
        tracing::debug!(connection_id = %handle.id, "Connection attached");
        inner.connections.insert(handle.id, Attached { handle, username: None });
    }

    /// Binds `username` to the connection. The connection must not carry a
    /// different identity already.
    pub async fn register(&self, connection: ConnectionId, username: &str) -> RoomResult<(User, Registration)> {
        let username = username.trim();
        if username.is_empty() {
            return Err(RoomError::InvalidUsername);
        }

        let mut inner = self.inner.write().await;
        let bound = inner
            .connections
            .get(&connection)
            .ok_or(RoomError::NotLoggedIn)?
            .username
            .clone();
        if let Some(bound) = bound.filter(|b| b != username) {
            return Err(RoomError::InvalidInput(format!("connection is logged in as {bound}")));
        }

        let previous = inner.users.get(username).map(|u| u.connection);
        let registration = match previous {
            None => {
                let generation = inner.generation();
                inner.users.insert(
                    username.to_owned(),
                    UserEntry { connection: Some(connection), room: None, generation },
                );
                Registration::New
            }
            Some(Some(current)) if current == connection => Registration::Unchanged,
            Some(Some(_)) if self.policy == IdentityPolicy::Reject => {
                return Err(RoomError::DuplicateIdentity(username.to_owned()));
            }
            Some(previous) => {
                let mut evicted = None;
                if let Some(id) = previous {
                    if let Some(attached) = inner.connections.get_mut(&id) {
                        attached.username = None;
                        evicted = Some(attached.handle.clone());
                    }
                }
                let generation = inner.generation();
                if let Some(entry) = inner.users.get_mut(username) {
                    entry.connection = Some(connection);
                    entry.generation = generation;
                }
                match evicted {
                    Some(evicted) => Registration::Replaced { evicted },
                    None => Registration::Resumed,
                }
            }
        };

        if let Some(attached) = inner.connections.get_mut(&connection) {
            attached.username = Some(username.to_owned());
        }
        let room = inner.users.get(username).and_then(|u| u.room.clone());

        tracing::info!(connection_id = %connection, username, registration = ?registration, "Identity registered");
        Ok((User { name: username.to_owned(), room }, registration))
    }

    /// Whether `register` would refuse `username` as a duplicate.
    pub async fn is_taken(&self, username: &str) -> bool {
        let inner = self.inner.read().await;
        self.policy == IdentityPolicy::Reject
            && inner.users.get(username).is_some_and(|u| u.connection.is_some())
    }

    pub async fn resolve(&self, connection: ConnectionId) -> Option<User> {
        let inner = self.inner.read().await;
        let name = inner.connections.get(&connection)?.username.clone()?;
        let room = inner.users.get(&name).and_then(|u| u.room.clone());
        Some(User { name, room })
    }

    pub async fn room_of(&self, username: &str) -> Option<String> {
        let inner = self.inner.read().await;
        inner.users.get(username).and_then(|u| u.room.clone())
    }

    pub async fn set_room(&self, username: &str, room: Option<String>) {
        let mut inner = self.inner.write().await;
        if let Some(entry) = inner.users.get_mut(username) {
            entry.room = room;
        }
    }

    /// Drops the connection. Reports the identity it carried, which is now
    /// disconnected but still known.
    pub async fn detach(&self, connection: ConnectionId) -> Option<Detached> {
        let mut inner = self.inner.write().await;
        let username = inner.connections.remove(&connection)?.username?;
        let generation = inner.generation();
        let entry = inner.users.get_mut(&username)?;
        if entry.connection != Some(connection) {
            return None;
        }
        entry.connection = None;
        entry.generation = generation;
        tracing::debug!(connection_id = %connection, username = %username, "Connection detached");
        Some(Detached { username, generation })
    }

    /// True while `detached` has not been followed by a fresh login.
    pub async fn still_detached(&self, detached: &Detached) -> bool {
        let inner = self.inner.read().await;
        inner
            .users
            .get(&detached.username)
            .is_some_and(|u| u.connection.is_none() && u.generation == detached.generation)
    }

    /// Forgets the identity, but only while `detached` still describes it.
    pub async fn remove_if_detached(&self, detached: &Detached) -> bool {
        let mut inner = self.inner.write().await;
        let current = inner
            .users
            .get(&detached.username)
            .is_some_and(|u| u.connection.is_none() && u.generation == detached.generation);
        if current {
            inner.users.remove(&detached.username);
        }
        current
    }

    /// Forgets the identity entirely, unbinding it from any live connection.
    pub async fn remove_user(&self, username: &str) {
        let mut inner = self.inner.write().await;
        if let Some(entry) = inner.users.remove(username) {
            if let Some(id) = entry.connection {
                if let Some(attached) = inner.connections.get_mut(&id) {
                    attached.username = None;
                }
            }
            tracing::info!(username, "Identity removed");
        }
    }

    pub async fn handle(&self, connection: ConnectionId) -> Option<ConnectionHandle> {
        let inner = self.inner.read().await;
        inner.connections.get(&connection).map(|a| a.handle.clone())
    }

    /// Live connections of the given users, skipping anyone disconnected.
    pub async fn handles_of(&self, usernames: &[String]) -> Vec<ConnectionHandle> {
        let inner = self.inner.read().await;
        usernames
            .iter()
            .filter_map(|name| inner.users.get(name)?.connection)
            .filter_map(|id| inner.connections.get(&id))
            .map(|a| a.handle.clone())
            .collect()
    }

    pub async fn all_handles(&self) -> Vec<ConnectionHandle> {
        let inner = self.inner.read().await;
        inner.connections.values().map(|a| a.handle.clone()).collect()
    }

    /// Usernames with a live connection, sorted.
    pub async fn active_users(&self) -> Vec<String> {
        let inner = self.inner.read().await;
        let mut users: Vec<String> = inner
            .users
            .iter()
            .filter(|(_, u)| u.connection.is_some())
            .map(|(name, _)| name.clone())
            .collect();
        users.sort();
        users
    }
}
