//! Wire records for the room protocol.
//!
//! Clients send `{"event", "data", "id"?}` frames; the server answers with
//! `{"event", "data"}` frames. A frame that carries an `id` always gets exactly
//! one `ack` back on the same connection.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::{
    catalog::Script,
    error::{ErrorKind, RoomError, RoomResult},
};

#[derive(Debug, Deserialize)]
struct RawFrame {
    event: String,
    #[serde(default)]
    data: Option<Value>,
    #[serde(default)]
    id: Option<u64>,
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(
    tag = "event",
    content = "data",
    rename_all = "camelCase",
    rename_all_fields = "camelCase"
)]
pub enum Command {
    Login {
        username: String,
    },
    Logout,
    ListRooms,
    CreateRoom {
        room_name: String,
    },
    JoinRoom {
        room: String,
        #[serde(default)]
        username: Option<String>,
    },
    LeaveRoom {
        room: String,
    },
    SelectScript {
        room: String,
        script_id: String,
    },
    AssignCharacter {
        room: String,
        character: String,
        #[serde(default)]
        username: Option<String>,
    },
    StartScene {
        room: String,
    },
}

impl Command {
    pub fn name(&self) -> &'static str {
        use Command::*;
        match self {
            Login { .. } => "login",
            Logout => "logout",
            ListRooms => "listRooms",
            CreateRoom { .. } => "createRoom",
            JoinRoom { .. } => "joinRoom",
            LeaveRoom { .. } => "leaveRoom",
            SelectScript { .. } => "selectScript",
            AssignCharacter { .. } => "assignCharacter",
            StartScene { .. } => "startScene",
        }
    }
}

/// A decoded client frame. `command` is an error when the frame was well
/// formed enough to carry an `id` but its payload was not.
#[derive(Debug)]
pub struct Frame {
    pub id: Option<u64>,
    pub command: RoomResult<Command>,
}

pub fn parse_frame(text: &str) -> RoomResult<Frame> {
    let raw: RawFrame = serde_json::from_str(text)
        .map_err(|e| RoomError::InvalidInput(format!("malformed frame: {e}")))?;

    let mut tagged = Map::new();
    tagged.insert("event".to_owned(), Value::String(raw.event.clone()));
    if let Some(data) = raw.data.filter(|d| !d.is_null()) {
        tagged.insert("data".to_owned(), data);
    }

    let command = serde_json::from_value(Value::Object(tagged))
        .map_err(|e| RoomError::InvalidInput(format!("bad {} payload: {e}", raw.event)));

    Ok(Frame { id: raw.id, command })
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RoomSummary {
    pub name: String,
    pub admin: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Ack {
    pub id: u64,
    pub success: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub code: Option<ErrorKind>,
}

impl Ack {
    pub fn ok(id: u64) -> Self {
        Self { id, success: true, message: None, code: None }
    }

    pub fn failed(id: u64, err: &RoomError) -> Self {
        Self {
            id,
            success: false,
            message: Some(err.to_string()),
            code: Some(err.kind()),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(
    tag = "event",
    content = "data",
    rename_all = "camelCase",
    rename_all_fields = "camelCase"
)]
pub enum ServerEvent {
    Rooms(Vec<RoomSummary>),
    ActiveUsers(Vec<String>),
    RoomState {
        users: Vec<String>,
        admin: Option<String>,
    },
    ScriptListFull(Vec<Script>),
    ScriptSelected {
        script_data: Script,
        admin: Option<String>,
    },
    CharacterAssignments(BTreeMap<String, String>),
    SceneStarted,
    Ack(Ack),
    Error {
        message: String,
        code: ErrorKind,
    },
    Evicted {
        message: String,
    },
}

impl ServerEvent {
    pub fn error(err: &RoomError) -> Self {
        ServerEvent::Error {
            message: err.to_string(),
            code: err.kind(),
        }
    }
}
