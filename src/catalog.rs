//! Read-only access to the external script store.
//!
//! The coordination core only ever looks scripts up; it never writes them.

mod file;
mod http;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::error::RoomResult;

pub use file::load_file_catalog;
pub use http::HttpCatalog;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Script {
    pub id: String,
    pub title: String,
    #[serde(default)]
    pub characters: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub image_uri: Option<String>,
}

impl Script {
    pub fn has_character(&self, character: &str) -> bool {
        self.characters.iter().any(|c| c == character)
    }
}

#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait ScriptCatalog: Send + Sync {
    /// Every script currently offered, in catalog order.
    async fn list(&self) -> RoomResult<Vec<Script>>;

    /// `Ok(None)` means the catalog answered and the script does not exist.
    async fn get(&self, id: &str) -> RoomResult<Option<Script>>;
}

/// Catalog held entirely in memory. Backs the file catalog and tests.
#[derive(Debug, Clone, Default)]
pub struct MemoryCatalog {
    scripts: Vec<Script>,
}

impl MemoryCatalog {
    pub fn new(scripts: Vec<Script>) -> Self {
        Self { scripts }
    }
}

#[async_trait]
impl ScriptCatalog for MemoryCatalog {
    async fn list(&self) -> RoomResult<Vec<Script>> {
        Ok(self.scripts.clone())
    }

    async fn get(&self, id: &str) -> RoomResult<Option<Script>> {
        Ok(self.scripts.iter().find(|s| s.id == id).cloned())
    }
}
