use std::time::Duration;

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Credentials {
    #[serde(default)]
    pub username: String,
    #[serde(default)]
    pub password: String,
}

/// `{success, message?}` as the auth service and the clients both speak it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AuthOutcome {
    pub success: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
}

impl AuthOutcome {
    pub fn failed(message: impl Into<String>) -> Self {
        Self {
            success: false,
            message: Some(message.into()),
        }
    }
}

#[derive(Clone)]
pub struct AuthClient {
    base_url: String,
    http: reqwest::Client,
}

impl AuthClient {
    pub fn new(base_url: &str) -> anyhow::Result<Self> {
        let http = reqwest::ClientBuilder::new()
            .timeout(Duration::from_secs(10))
            .build()?;
        Ok(Self {
            base_url: base_url.trim_end_matches('/').to_owned(),
            http,
        })
    }

    pub async fn login(&self, credentials: &Credentials) -> AuthOutcome {
        self.call("login", credentials).await
    }

    pub async fn signup(&self, credentials: &Credentials) -> AuthOutcome {
        self.call("signup", credentials).await
    }

    /// Never fails: transport and decoding problems become `success: false`.
    async fn call(&self, path: &str, credentials: &Credentials) -> AuthOutcome {
        if credentials.username.trim().is_empty() || credentials.password.is_empty() {
            return AuthOutcome::failed("Missing credentials");
        }

        let url = format!("{}/{}", self.base_url, path);
        let res = match self.http.post(&url).json(credentials).send().await {
            Ok(res) => res,
            Err(e) => {
                tracing::warn!(url, error = %e, "Auth service unreachable");
                return AuthOutcome::failed(format!("Network error: {e}"));
            }
        };

        let status = res.status();
        let text = match res.text().await {
            Ok(text) => text,
            Err(e) => return AuthOutcome::failed(format!("Network error: {e}")),
        };

        match serde_json::from_str::<AuthOutcome>(&text) {
            Ok(outcome) => {
                tracing::debug!(url, %status, success = outcome.success, "Auth service answered");
                outcome
            }
            Err(e) => {
                tracing::warn!(url, %status, error = %e, "Auth service sent a non-JSON answer");
                AuthOutcome::failed("Invalid server response")
            }
        }
    }
}
