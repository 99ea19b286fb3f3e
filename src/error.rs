use serde::{Deserialize, Serialize};

/// Coarse classification reported to clients as the `code` of a failed command.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ErrorKind {
    InvalidInput,
    NotFound,
    Conflict,
    Forbidden,
    Transient,
}

/// Everything a room command can be rejected with.
///
/// A command that returns one of these has not mutated any state.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum RoomError {
    #[error("{0}")]
    InvalidInput(String),
    #[error("room name must not be empty")]
    InvalidName,
    #[error("username must not be empty")]
    InvalidUsername,
    #[error("not logged in")]
    NotLoggedIn,
    #[error("room {0:?} already exists")]
    NameTaken(String),
    #[error("room {0:?} not found")]
    RoomNotFound(String),
    #[error("script {0:?} not found")]
    ScriptNotFound(String),
    #[error("character {0:?} is not part of the selected script")]
    UnknownCharacter(String),
    #[error("no script selected")]
    NoScriptSelected,
    #[error("character {character:?} is already taken by {holder}")]
    CharacterTaken { character: String, holder: String },
    #[error("you already play {0:?}")]
    AlreadyCast(String),
    #[error("{0} is already logged in on another connection")]
    DuplicateIdentity(String),
    #[error("room changed while the script was loading, try again")]
    StaleSelection,
    #[error("only the room admin can do that")]
    NotAdmin,
    #[error("not a member of room {0:?}")]
    NotMember(String),
    #[error("not every character has been assigned")]
    NotReady,
    #[error("script catalog unavailable: {0}")]
    CatalogUnavailable(String),
}

impl RoomError {
    pub fn kind(&self) -> ErrorKind {
        use RoomError::*;
        match self {
            InvalidInput(_) | InvalidName | InvalidUsername | NotLoggedIn | NoScriptSelected
            | NotReady => ErrorKind::InvalidInput,
            RoomNotFound(_) | ScriptNotFound(_) | UnknownCharacter(_) => ErrorKind::NotFound,
            NameTaken(_) | CharacterTaken { .. } | AlreadyCast(_) | DuplicateIdentity(_)
            | StaleSelection => ErrorKind::Conflict,
            NotAdmin | NotMember(_) => ErrorKind::Forbidden,
            CatalogUnavailable(_) => ErrorKind::Transient,
        }
    }
}

pub type RoomResult<T> = Result<T, RoomError>;
