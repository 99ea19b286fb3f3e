use std::collections::BTreeMap;

use crate::{
    catalog::Script,
    error::{RoomError, RoomResult},
    rooms::msg::{RoomSummary, ServerEvent},
};

/// Where a room is in its script run. Derived from the room's fields, never stored.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RoomPhase {
    Lobby,
    ScriptSelected,
    Ready,
    SceneStarted,
}

/// What changed when a member left.
#[derive(Debug, Default, PartialEq, Eq)]
pub struct Departure {
    pub admin_changed: bool,
    pub released: Option<String>,
}

#[derive(Debug)]
pub struct Room {
    name: String,
    admin: Option<String>,
    // join order; index 0 is the longest-tenured member
    members: Vec<String>,
    script: Option<Script>,
    assignments: BTreeMap<String, String>,
    scene_started: bool,
    selections: u64,
    closed: bool,
}

impl Room {
    pub fn new(name: impl Into<String>, creator: impl Into<String>) -> Self {
        let creator = creator.into();
        Self {
            name: name.into(),
            admin: Some(creator.clone()),
            members: vec![creator],
            script: None,
            assignments: BTreeMap::new(),
            scene_started: false,
            selections: 0,
            closed: false,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn admin(&self) -> Option<&str> {
        self.admin.as_deref()
    }

    pub fn members(&self) -> &[String] {
        &self.members
    }

    pub fn script(&self) -> Option<&Script> {
        self.script.as_ref()
    }

    pub fn assignments(&self) -> &BTreeMap<String, String> {
        &self.assignments
    }

    pub fn scene_started(&self) -> bool {
        self.scene_started
    }

    /// Bumped on every script selection.
    pub fn selections(&self) -> u64 {
        self.selections
    }

    pub fn is_member(&self, user: &str) -> bool {
        self.members.iter().any(|m| m == user)
    }

    pub fn is_admin(&self, user: &str) -> bool {
        self.admin.as_deref() == Some(user)
    }

    pub fn is_empty(&self) -> bool {
        self.members.is_empty()
    }

    /// A closed room has been dropped from the store; late holders of its
    /// handle must treat it as gone.
    pub fn is_closed(&self) -> bool {
        self.closed
    }

    pub(crate) fn close(&mut self) {
        self.closed = true;
    }

    pub fn phase(&self) -> RoomPhase {
        match (&self.script, self.scene_started) {
            (None, _) => RoomPhase::Lobby,
            (Some(_), true) => RoomPhase::SceneStarted,
            (Some(_), false) if self.is_complete() => RoomPhase::Ready,
            (Some(_), false) => RoomPhase::ScriptSelected,
        }
    }

    /// Returns false when `user` was already a member. A room without an admin
    /// hands the role to whoever joins.
    pub fn add_member(&mut self, user: &str) -> bool {
        if self.is_member(user) {
            return false;
        }
        self.members.push(user.to_owned());
        if self.admin.is_none() {
            self.admin = Some(user.to_owned());
        }
        true
    }

    pub fn remove_member(&mut self, user: &str) -> Departure {
        let mut departure = Departure::default();
        let Some(pos) = self.members.iter().position(|m| m == user) else {
            return departure;
        };
        self.members.remove(pos);

        if let Some(character) = self.character_of(user).map(str::to_owned) {
            self.assignments.remove(&character);
            departure.released = Some(character);
        }

        if self.is_admin(user) {
            self.admin = self.members.first().cloned();
            departure.admin_changed = true;
        }
        departure
    }

    pub fn character_of(&self, user: &str) -> Option<&str> {
        self.assignments
            .iter()
            .find(|(_, holder)| holder.as_str() == user)
            .map(|(character, _)| character.as_str())
    }

    fn require_admin(&self, user: &str) -> RoomResult<()> {
        if self.is_admin(user) {
            Ok(())
        } else {
            Err(RoomError::NotAdmin)
        }
    }

    /// Checks that `user` may select a script without changing anything.
    pub fn check_select(&self, user: &str) -> RoomResult<()> {
        self.require_admin(user)
    }

    pub fn select_script(&mut self, user: &str, script: Script) -> RoomResult<()> {
        self.require_admin(user)?;
        self.script = Some(script);
        self.assignments.clear();
        self.scene_started = false;
        self.selections += 1;
        Ok(())
    }

    /// Returns whether the map changed. Re-claiming one's own character is a no-op.
    pub fn assign(&mut self, user: &str, character: &str) -> RoomResult<bool> {
        let script = self.script.as_ref().ok_or(RoomError::NoScriptSelected)?;
        if !script.has_character(character) {
            return Err(RoomError::UnknownCharacter(character.to_owned()));
        }

        match self.assignments.get(character) {
            Some(holder) if holder == user => return Ok(false),
            Some(holder) => {
                return Err(RoomError::CharacterTaken {
                    character: character.to_owned(),
                    holder: holder.clone(),
                });
            }
            None => {}
        }

        if let Some(current) = self.character_of(user) {
            return Err(RoomError::AlreadyCast(current.to_owned()));
        }

        self.assignments.insert(character.to_owned(), user.to_owned());
        Ok(true)
    }

    pub fn is_complete(&self) -> bool {
        self.script
            .as_ref()
            .is_some_and(|s| s.characters.iter().all(|c| self.assignments.contains_key(c)))
    }

    pub fn start_scene(&mut self, user: &str) -> RoomResult<()> {
        self.require_admin(user)?;
        if self.script.is_none() {
            return Err(RoomError::NoScriptSelected);
        }
        if !self.is_complete() {
            return Err(RoomError::NotReady);
        }
        self.scene_started = true;
        Ok(())
    }

    pub fn summary(&self) -> RoomSummary {
        RoomSummary {
            name: self.name.clone(),
            admin: self.admin.clone(),
        }
    }

    pub fn state_event(&self) -> ServerEvent {
        ServerEvent::RoomState {
            users: self.members.clone(),
            admin: self.admin.clone(),
        }
    }

    pub fn assignments_event(&self) -> ServerEvent {
        ServerEvent::CharacterAssignments(self.assignments.clone())
    }

    pub fn script_event(&self) -> Option<ServerEvent> {
        self.script.as_ref().map(|script| ServerEvent::ScriptSelected {
            script_data: script.clone(),
            admin: self.admin.clone(),
        })
    }
}
