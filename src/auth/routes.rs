use axum::{body::Bytes, debug_handler, extract::State, Json};

use super::{AuthClient, AuthOutcome, Credentials};

/// Clients always get an outcome back, even for a body that is not JSON.
fn credentials(body: &[u8]) -> Result<Credentials, AuthOutcome> {
    serde_json::from_slice(body).map_err(|e| {
        tracing::debug!(error = %e, "Unreadable credentials");
        AuthOutcome::failed("Missing credentials")
    })
}

#[debug_handler(state = crate::AppState)]
pub(crate) async fn login(State(auth): State<AuthClient>, body: Bytes) -> Json<AuthOutcome> {
    match credentials(&body) {
        Ok(credentials) => Json(auth.login(&credentials).await),
        Err(outcome) => Json(outcome),
    }
}

#[debug_handler(state = crate::AppState)]
pub(crate) async fn signup(State(auth): State<AuthClient>, body: Bytes) -> Json<AuthOutcome> {
    match credentials(&body) {
        Ok(credentials) => Json(auth.signup(&credentials).await),
        Err(outcome) => Json(outcome),
    }
}
