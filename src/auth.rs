//! Username/password accounts live in an external service. This module only
//! relays `login` and `signup` to it and normalizes whatever comes back.

mod client;
mod routes;

use axum::{routing::post, Router};

use crate::AppState;

pub use client::{AuthClient, AuthOutcome, Credentials};

pub fn router() -> Router<AppState> {
    Router::new()
        .route("/login", post(routes::login))
        .route("/signup", post(routes::signup))
}
