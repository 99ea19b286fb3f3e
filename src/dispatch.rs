//! Fan-out of server events to connections.

use std::sync::Arc;

use crate::{
    rooms::{msg::ServerEvent, room::Room},
    session::{ConnectionId, SessionRegistry},
};

#[derive(Clone)]
pub struct Dispatcher {
    registry: Arc<SessionRegistry>,
}

impl Dispatcher {
    pub fn new(registry: Arc<SessionRegistry>) -> Self {
        Self { registry }
    }

    /// Sends to every member of `room` that currently has a connection.
    ///
    /// Callers hold the room's lock, so members see room events in mutation order.
    pub async fn to_room(&self, room: &Room, event: ServerEvent) -> usize {
        let handles = self.registry.handles_of(room.members()).await;
        let delivered = handles.iter().filter(|h| h.send(event.clone())).count();
        tracing::trace!(room = room.name(), event = ?event, delivered, "Room broadcast");
        delivered
    }

    /// Sends to every attached connection, logged in or not.
    pub async fn to_all(&self, event: ServerEvent) -> usize {
        let handles = self.registry.all_handles().await;
        handles.iter().filter(|h| h.send(event.clone())).count()
    }

    pub async fn to_connection(&self, connection: ConnectionId, event: ServerEvent) -> bool {
        match self.registry.handle(connection).await {
            Some(handle) => handle.send(event),
            None => false,
        }
    }
}
