pub mod msg;
pub mod room;
pub mod store;
mod ws;

use std::{sync::Arc, time::Duration};

use axum::{debug_handler, extract::State, routing::get, Json, Router};
use tokio::sync::Mutex;

use crate::{
    catalog::{Script, ScriptCatalog},
    config::{Config, EmptyRoomPolicy},
    dispatch::Dispatcher,
    error::{RoomError, RoomResult},
    session::{ConnectionHandle, ConnectionId, Detached, Registration, SessionRegistry, User},
    AppState,
};

use msg::{Command, RoomSummary, ServerEvent};
use room::Room;
use store::RoomStore;

pub fn router() -> Router<AppState> {
    Router::new()
        .route("/ws", get(ws::room_ws))
        .route("/rooms", get(list_rooms))
}

#[debug_handler(state = AppState)]
async fn list_rooms(State(service): State<Arc<RoomService>>) -> Json<Vec<RoomSummary>> {
    Json(service.room_listing().await)
}

/// Runs room commands on behalf of connections and announces their effects.
pub struct RoomService {
    registry: Arc<SessionRegistry>,
    store: RoomStore,
    catalog: Arc<dyn ScriptCatalog>,
    dispatch: Dispatcher,
    catalog_timeout: Duration,
    reconnect_grace: Duration,
    connection_buffer: usize,
    // serialize snapshot-and-send of the global listings so the last one sent is the newest
    listing: Mutex<()>,
    presence: Mutex<()>,
}

impl RoomService {
    pub fn new(config: &Config, catalog: Arc<dyn ScriptCatalog>) -> Self {
        let registry = Arc::new(SessionRegistry::new(config.identity_policy));
        Self {
            dispatch: Dispatcher::new(registry.clone()),
            registry,
            store: RoomStore::new(config.empty_room_policy),
            catalog,
            catalog_timeout: config.catalog_timeout,
            reconnect_grace: config.reconnect_grace,
            connection_buffer: config.connection_buffer,
            listing: Mutex::new(()),
            presence: Mutex::new(()),
        }
    }

    pub fn connection_buffer(&self) -> usize {
        self.connection_buffer
    }

    pub async fn room_listing(&self) -> Vec<RoomSummary> {
        self.store.summaries().await
    }

    pub async fn connect(&self, handle: ConnectionHandle) {
        self.registry.attach(handle).await;
    }

    /// Called once the socket is gone. Without a reconnection window the
    /// user departs right away; otherwise it keeps its room until the window
    /// passes without a new `login`.
    pub async fn disconnect(self: &Arc<Self>, connection: ConnectionId) {
        let Some(detached) = self.registry.detach(connection).await else {
            return;
        };
        self.push_presence().await;

        if self.reconnect_grace.is_zero() {
            self.expire(&detached).await;
            return;
        }

        let service = Arc::clone(self);
        tokio::spawn(async move {
            tokio::time::sleep(service.reconnect_grace).await;
            service.expire(&detached).await;
        });
    }

    /// Departs a user whose connection went away, unless it logged in again
    /// since. Every step rechecks that under the lock it mutates.
    async fn expire(&self, detached: &Detached) {
        if !self.registry.still_detached(detached).await {
            return;
        }
        if let Some(room) = self.registry.room_of(&detached.username).await {
            if let Err(e) = self.leave_member(&detached.username, &room, Some(detached)).await {
                tracing::debug!(room = %room, username = %detached.username, error = %e, "Room already left");
            }
        }
        if self.registry.remove_if_detached(detached).await {
            tracing::info!(username = %detached.username, "Disconnected user departed");
            self.push_presence().await;
        }
    }

    pub async fn execute(&self, connection: ConnectionId, command: Command) -> RoomResult<()> {
        use Command::*;
        match command {
            Login { username } => self.login(connection, &username).await,
            Logout => self.logout(connection).await,
            ListRooms => {
                let rooms = self.store.summaries().await;
                self.dispatch.to_connection(connection, ServerEvent::Rooms(rooms)).await;
                Ok(())
            }
            CreateRoom { room_name } => self.create_room(connection, &room_name).await,
            JoinRoom { room, username } => self.join_room(connection, &room, username.as_deref()).await,
            LeaveRoom { room } => self.leave_room(connection, &room).await,
            SelectScript { room, script_id } => self.select_script(connection, &room, &script_id).await,
            AssignCharacter { room, character, username } => {
                self.assign_character(connection, &room, &character, username.as_deref())
                    .await
            }
            StartScene { room } => self.start_scene(connection, &room).await,
        }
    }

    pub async fn login(&self, connection: ConnectionId, username: &str) -> RoomResult<()> {
        if let Some(current) = self.registry.resolve(connection).await {
            let wanted = username.trim();
            if !wanted.is_empty() && wanted != current.name {
                if self.registry.is_taken(wanted).await {
                    return Err(RoomError::DuplicateIdentity(wanted.to_owned()));
                }
                tracing::info!(connection_id = %connection, from = %current.name, to = wanted, "Switching identity");
                self.depart(&current.name).await;
            }
        }

        let (user, registration) = self.registry.register(connection, username).await?;

        let resumed = match registration {
            Registration::Replaced { evicted } => {
                evicted.send(ServerEvent::Evicted {
                    message: format!("{} logged in from another connection", user.name),
                });
                evicted.close();
                true
            }
            Registration::Resumed => true,
            Registration::New | Registration::Unchanged => false,
        };

        if resumed {
            if let Some(name) = &user.room {
                self.replay(connection, name).await;
            }
        }

        self.push_presence().await;
        let rooms = self.store.summaries().await;
        self.dispatch.to_connection(connection, ServerEvent::Rooms(rooms)).await;
        Ok(())
    }

    pub async fn logout(&self, connection: ConnectionId) -> RoomResult<()> {
        let user = self.require_user(connection).await?;
        self.depart(&user.name).await;
        Ok(())
    }

    pub async fn create_room(&self, connection: ConnectionId, room_name: &str) -> RoomResult<()> {
        let user = self.require_user(connection).await?;
        let name = room_name.trim();
        if name.is_empty() {
            return Err(RoomError::InvalidName);
        }

        let handle = self.store.insert(Room::new(name, user.name.as_str())).await?;
        if let Some(previous) = &user.room {
            self.leave_quietly(&user.name, previous).await;
        }
        let scripts = self.scripts_snapshot().await;

        {
            let room = handle.lock().await;
            self.registry.set_room(&user.name, Some(name.to_owned())).await;
            self.dispatch.to_room(&room, room.state_event()).await;
            if let (Some(conn), Some(scripts)) = (self.registry.handle(connection).await, scripts) {
                conn.send(ServerEvent::ScriptListFull(scripts));
            }
        }

        self.push_rooms().await;
        Ok(())
    }

    pub async fn join_room(
        &self,
        connection: ConnectionId,
        room_name: &str,
        username: Option<&str>,
    ) -> RoomResult<()> {
        let name = room_name.trim();
        if name.is_empty() {
            return Err(RoomError::InvalidName);
        }
        let handle = self.store.get(name).await?;

        let user = match (self.registry.resolve(connection).await, username) {
            (Some(user), claimed) => {
                check_claim(&user, claimed)?;
                user
            }
            (None, Some(claimed)) => {
                self.login(connection, claimed).await?;
                self.require_user(connection).await?
            }
            (None, None) => return Err(RoomError::NotLoggedIn),
        };

        if let Some(previous) = user.room.as_deref().filter(|r| *r != name) {
            self.leave_quietly(&user.name, previous).await;
        }
        let scripts = self.scripts_snapshot().await;

        let listing_changed = {
            let mut room = handle.lock().await;
            if room.is_closed() {
                return Err(RoomError::RoomNotFound(name.to_owned()));
            }
            let was_empty = room.is_empty();
            let admin_before = room.admin().map(str::to_owned);

            let added = room.add_member(&user.name);
            self.registry.set_room(&user.name, Some(name.to_owned())).await;

            let conn = self.registry.handle(connection).await;
            if added {
                self.dispatch.to_room(&room, room.state_event()).await;
            } else if let Some(conn) = &conn {
                conn.send(room.state_event());
            }
            if let Some(conn) = &conn {
                send_snapshot(conn, &room, scripts);
            }

            tracing::info!(room = %name, username = %user.name, added, admin = ?room.admin(), "Joined room");
            was_empty || admin_before.as_deref() != room.admin()
        };

        if listing_changed {
            self.push_rooms().await;
        }
        Ok(())
    }

    pub async fn leave_room(&self, connection: ConnectionId, room_name: &str) -> RoomResult<()> {
        let user = self.require_user(connection).await?;
        self.leave_member(&user.name, room_name.trim(), None).await
    }

    pub async fn select_script(
        &self,
        connection: ConnectionId,
        room_name: &str,
        script_id: &str,
    ) -> RoomResult<()> {
        let user = self.require_user(connection).await?;
        let script_id = script_id.trim();
        if script_id.is_empty() {
            return Err(RoomError::InvalidInput("scriptId must not be empty".to_owned()));
        }
        let handle = self.store.get(room_name.trim()).await?;

        let selections = {
            let room = handle.lock().await;
            require_member(&room, &user.name)?;
            room.check_select(&user.name)?;
            room.selections()
        };

        // the room is unlocked while the catalog answers
        let script = self.lookup_script(script_id).await?;

        let mut room = handle.lock().await;
        require_member(&room, &user.name)?;
        if room.selections() != selections {
            return Err(RoomError::StaleSelection);
        }
        room.select_script(&user.name, script)?;
        if let Some(event) = room.script_event() {
            self.dispatch.to_room(&room, event).await;
        }
        tracing::info!(
            room = room.name(),
            username = %user.name,
            script = script_id,
            phase = ?room.phase(),
            "Script selected"
        );
        Ok(())
    }

    pub async fn assign_character(
        &self,
        connection: ConnectionId,
        room_name: &str,
        character: &str,
        username: Option<&str>,
    ) -> RoomResult<()> {
        let user = self.require_user(connection).await?;
        check_claim(&user, username)?;
        let handle = self.store.get(room_name.trim()).await?;

        let mut room = handle.lock().await;
        require_member(&room, &user.name)?;
        if room.assign(&user.name, character.trim())? {
            self.dispatch.to_room(&room, room.assignments_event()).await;
            tracing::info!(
                room = room.name(),
                username = %user.name,
                character = character.trim(),
                phase = ?room.phase(),
                "Character assigned"
            );
        }
        Ok(())
    }

    pub async fn start_scene(&self, connection: ConnectionId, room_name: &str) -> RoomResult<()> {
        let user = self.require_user(connection).await?;
        let handle = self.store.get(room_name.trim()).await?;

        let mut room = handle.lock().await;
        require_member(&room, &user.name)?;
        room.start_scene(&user.name)?;
        self.dispatch.to_room(&room, ServerEvent::SceneStarted).await;
        tracing::info!(room = room.name(), username = %user.name, phase = ?room.phase(), "Scene started");
        Ok(())
    }

    async fn require_user(&self, connection: ConnectionId) -> RoomResult<User> {
        self.registry.resolve(connection).await.ok_or(RoomError::NotLoggedIn)
    }

    async fn lookup_script(&self, script_id: &str) -> RoomResult<Script> {
        match tokio::time::timeout(self.catalog_timeout, self.catalog.get(script_id)).await {
            Err(_) => Err(RoomError::CatalogUnavailable("timed out".to_owned())),
            Ok(found) => found?.ok_or_else(|| RoomError::ScriptNotFound(script_id.to_owned())),
        }
    }

    /// Catalog listing for a joiner. A catalog outage must not block joining.
    async fn scripts_snapshot(&self) -> Option<Vec<Script>> {
        match tokio::time::timeout(self.catalog_timeout, self.catalog.list()).await {
            Ok(Ok(scripts)) => Some(scripts),
            Ok(Err(e)) => {
                tracing::warn!(error = %e, "Skipping script list");
                None
            }
            Err(_) => {
                tracing::warn!("Skipping script list, catalog timed out");
                None
            }
        }
    }

    /// Brings a re-announced connection up to date with the room it never left.
    async fn replay(&self, connection: ConnectionId, room_name: &str) {
        let Ok(handle) = self.store.get(room_name).await else {
            return;
        };
        let scripts = self.scripts_snapshot().await;
        let room = handle.lock().await;
        if let Some(conn) = self.registry.handle(connection).await {
            conn.send(room.state_event());
            send_snapshot(&conn, &room, scripts);
        }
    }

    /// With `detached` set, the member is only removed while that
    /// disconnection still stands.
    async fn leave_member(
        &self,
        username: &str,
        room_name: &str,
        detached: Option<&Detached>,
    ) -> RoomResult<()> {
        let handle = self.store.get(room_name).await?;

        let (empty, listing_changed) = {
            let mut room = handle.lock().await;
            require_member(&room, username)?;
            if let Some(detached) = detached {
                if !self.registry.still_detached(detached).await {
                    return Ok(());
                }
            }
            let departure = room.remove_member(username);
            self.registry.set_room(username, None).await;

            if !room.is_empty() {
                self.dispatch.to_room(&room, room.state_event()).await;
                if departure.released.is_some() {
                    self.dispatch.to_room(&room, room.assignments_event()).await;
                }
            }
            tracing::info!(
                room = room_name,
                username,
                admin = ?room.admin(),
                released = ?departure.released,
                "Left room"
            );
            (room.is_empty(), departure.admin_changed || room.is_empty())
        };

        if empty && self.store.policy() == EmptyRoomPolicy::Destroy {
            self.store.remove_if_empty(room_name).await;
        }
        if listing_changed {
            self.push_rooms().await;
        }
        Ok(())
    }

    async fn leave_quietly(&self, username: &str, room_name: &str) {
        if let Err(e) = self.leave_member(username, room_name, None).await {
            tracing::debug!(room = room_name, username, error = %e, "Previous room already gone");
        }
    }

    /// Removes the user from its room and forgets it.
    async fn depart(&self, username: &str) {
        if let Some(room) = self.registry.room_of(username).await {
            self.leave_quietly(username, &room).await;
        }
        self.registry.remove_user(username).await;
        self.push_presence().await;
    }

    async fn push_rooms(&self) {
        let _guard = self.listing.lock().await;
        let rooms = self.store.summaries().await;
        self.dispatch.to_all(ServerEvent::Rooms(rooms)).await;
    }

    async fn push_presence(&self) {
        let _guard = self.presence.lock().await;
        let users = self.registry.active_users().await;
        self.dispatch.to_all(ServerEvent::ActiveUsers(users)).await;
    }
}

fn require_member(room: &Room, username: &str) -> RoomResult<()> {
    if room.is_closed() {
        return Err(RoomError::RoomNotFound(room.name().to_owned()));
    }
    if !room.is_member(username) {
        return Err(RoomError::NotMember(room.name().to_owned()));
    }
    Ok(())
}

/// Payloads may name the acting user; it has to be the connection's own login.
fn check_claim(user: &User, claimed: Option<&str>) -> RoomResult<()> {
    match claimed.map(str::trim) {
        Some(claimed) if claimed != user.name => Err(RoomError::InvalidInput(format!(
            "username {claimed:?} does not match the login on this connection"
        ))),
        _ => Ok(()),
    }
}

fn send_snapshot(conn: &ConnectionHandle, room: &Room, scripts: Option<Vec<Script>>) {
    if let Some(scripts) = scripts {
        conn.send(ServerEvent::ScriptListFull(scripts));
    }
    if let Some(event) = room.script_event() {
        conn.send(event);
        conn.send(room.assignments_event());
        if room.scene_started() {
            conn.send(ServerEvent::SceneStarted);
        }
    }
}
