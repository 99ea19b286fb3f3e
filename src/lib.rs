pub mod appresult;
pub mod auth;
pub mod catalog;
pub mod config;
pub mod dispatch;
pub mod error;
pub mod rooms;
pub mod session;

use std::sync::Arc;

use axum::{debug_handler, extract::{FromRef, State}, routing::get, Json, Router};
use tower_http::{cors::CorsLayer, trace::TraceLayer};

pub use appresult::{AppError, AppResult};

use auth::AuthClient;
use catalog::{HttpCatalog, MemoryCatalog, Script, ScriptCatalog};
use config::{CatalogSource, Config};
use rooms::RoomService;

#[derive(Clone, FromRef)]
pub struct AppState {
    pub service: Arc<RoomService>,
    pub auth: AuthClient,
    pub catalog: Arc<dyn ScriptCatalog>,
}

impl AppState {
    pub fn from_config(config: &Config) -> anyhow::Result<Self> {
        let catalog: Arc<dyn ScriptCatalog> = match &config.catalog {
            CatalogSource::Empty => {
                tracing::warn!("No script catalog configured; script selection will find nothing");
                Arc::new(MemoryCatalog::default())
            }
            CatalogSource::File(path) => Arc::new(catalog::load_file_catalog(path)?),
            CatalogSource::Http(url) => Arc::new(HttpCatalog::new(url, config.catalog_timeout)?),
        };

        Self::with_catalog(config, catalog)
    }

    pub fn with_catalog(config: &Config, catalog: Arc<dyn ScriptCatalog>) -> anyhow::Result<Self> {
        Ok(Self {
            service: Arc::new(RoomService::new(config, catalog.clone())),
            auth: AuthClient::new(&config.auth_url)?,
            catalog,
        })
    }
}

pub fn app(state: AppState) -> Router {
    Router::new()
        .route("/scripts", get(list_scripts))
        .route("/health", get(|| async { "ok" }))
        .merge(rooms::router())
        .merge(auth::router())
        .with_state(state)
        .layer(CorsLayer::very_permissive())
        .layer(TraceLayer::new_for_http())
}

#[debug_handler(state = AppState)]
async fn list_scripts(State(catalog): State<Arc<dyn ScriptCatalog>>) -> AppResult<Json<Vec<Script>>> {
    Ok(Json(catalog.list().await?))
}
