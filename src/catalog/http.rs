use std::time::Duration;

use async_trait::async_trait;
use reqwest::{StatusCode, Url};

use super::{Script, ScriptCatalog};
use crate::error::{RoomError, RoomResult};

/// Catalog served by the content host over HTTP.
#[derive(Clone)]
pub struct HttpCatalog {
    base_url: Url,
    client: reqwest::Client,
}

impl HttpCatalog {
    pub fn new(base_url: &str, timeout: Duration) -> anyhow::Result<Self> {
        let base_url = Url::parse(base_url)?;
        anyhow::ensure!(!base_url.cannot_be_a_base(), "catalog url {base_url} cannot take a path");
        let client = reqwest::ClientBuilder::new().timeout(timeout).build()?;
        Ok(Self { base_url, client })
    }

    /// `{base}/scripts[/{id}]` with `id` as one percent-encoded segment.
    fn scripts_url(&self, id: Option<&str>) -> Url {
        let mut url = self.base_url.clone();
        if let Ok(mut segments) = url.path_segments_mut() {
            segments.pop_if_empty().push("scripts");
            if let Some(id) = id {
                segments.push(id);
            }
        }
        url
    }
}

fn unavailable(err: reqwest::Error) -> RoomError {
    tracing::warn!(error = %err, "Script catalog request failed");
    RoomError::CatalogUnavailable(err.to_string())
}

#[async_trait]
impl ScriptCatalog for HttpCatalog {
    async fn list(&self) -> RoomResult<Vec<Script>> {
        self.client
            .get(self.scripts_url(None))
            .send()
            .await
            .and_then(|res| res.error_for_status())
            .map_err(unavailable)?
            .json()
            .await
            .map_err(unavailable)
    }

    async fn get(&self, id: &str) -> RoomResult<Option<Script>> {
        // dot segments are dropped when building the url, so they can never name a script
        if id.is_empty() || id == "." || id == ".." {
            return Ok(None);
        }

        let res = self
            .client
            .get(self.scripts_url(Some(id)))
            .send()
            .await
            .map_err(unavailable)?;

        if res.status() == StatusCode::NOT_FOUND {
            return Ok(None);
        }

        let script: Script = res
            .error_for_status()
            .map_err(unavailable)?
            .json()
            .await
            .map_err(unavailable)?;

        if script.id != id {
            tracing::warn!(requested = id, answered = %script.id, "Script catalog answered with another script");
            return Ok(None);
        }
        Ok(Some(script))
    }
}
