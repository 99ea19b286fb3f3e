use std::{net::SocketAddr, path::PathBuf, str::FromStr, time::Duration};

use anyhow::anyhow;

/// What happens to a room once its last member leaves.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum EmptyRoomPolicy {
    /// Keep the room (and its script state) but hide it from listings.
    #[default]
    Retain,
    Destroy,
}

impl FromStr for EmptyRoomPolicy {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> anyhow::Result<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "retain" => Ok(Self::Retain),
            "destroy" => Ok(Self::Destroy),
            other => Err(anyhow!("unknown empty room policy {other:?}, expected retain or destroy")),
        }
    }
}

/// What happens when a username logs in while another connection holds it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum IdentityPolicy {
    #[default]
    NewestWins,
    Reject,
}

impl FromStr for IdentityPolicy {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> anyhow::Result<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "newest-wins" | "newest_wins" => Ok(Self::NewestWins),
            "reject" => Ok(Self::Reject),
            other => Err(anyhow!("unknown identity policy {other:?}, expected newest-wins or reject")),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub enum CatalogSource {
    /// No external store configured; the catalog is empty.
    #[default]
    Empty,
    File(PathBuf),
    Http(String),
}

#[derive(Debug, Clone)]
pub struct Config {
    pub bind_addr: SocketAddr,
    pub auth_url: String,
    pub catalog: CatalogSource,
    pub catalog_timeout: Duration,
    pub empty_room_policy: EmptyRoomPolicy,
    pub identity_policy: IdentityPolicy,
    pub reconnect_grace: Duration,
    pub connection_buffer: usize,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            bind_addr: SocketAddr::from(([0, 0, 0, 0], 3000)),
            auth_url: "https://www.cyloware.com".to_owned(),
            catalog: CatalogSource::Empty,
            catalog_timeout: Duration::from_millis(5000),
            empty_room_policy: EmptyRoomPolicy::Retain,
            identity_policy: IdentityPolicy::NewestWins,
            reconnect_grace: Duration::ZERO,
            connection_buffer: 256,
        }
    }
}

impl Config {
    /// Reads `.env` (if present) and then the process environment.
    pub fn from_env() -> anyhow::Result<Self> {
        dotenv::dotenv().ok();
        Self::from_lookup(|key| dotenv::var(key).ok())
    }

    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> anyhow::Result<Self> {
        let defaults = Self::default();
        let get = |key: &str| lookup(key).map(|v| v.trim().to_owned()).filter(|v| !v.is_empty());

        fn parse<T>(key: &str, value: Option<String>, default: T) -> anyhow::Result<T>
        where
            T: FromStr,
            T::Err: Into<anyhow::Error>,
        {
            match value {
                Some(v) => v
                    .parse::<T>()
                    .map_err(|e| Into::<anyhow::Error>::into(e).context(format!("invalid {key}={v:?}"))),
                None => Ok(default),
            }
        }

        let catalog = match (get("CATALOG_PATH"), get("CATALOG_URL")) {
            (Some(_), Some(_)) => anyhow::bail!("set only one of CATALOG_PATH and CATALOG_URL"),
            (Some(path), None) => CatalogSource::File(path.into()),
            (None, Some(url)) => CatalogSource::Http(url),
            (None, None) => CatalogSource::Empty,
        };

        let connection_buffer = parse("CONNECTION_BUFFER", get("CONNECTION_BUFFER"), defaults.connection_buffer)?;
        anyhow::ensure!(connection_buffer > 0, "CONNECTION_BUFFER must be positive");

        Ok(Self {
            bind_addr: parse("BIND_ADDR", get("BIND_ADDR"), defaults.bind_addr)?,
            auth_url: get("AUTH_URL").unwrap_or(defaults.auth_url),
            catalog,
            catalog_timeout: Duration::from_millis(parse(
                "CATALOG_TIMEOUT_MS",
                get("CATALOG_TIMEOUT_MS"),
                5000u64,
            )?),
            empty_room_policy: parse("EMPTY_ROOM_POLICY", get("EMPTY_ROOM_POLICY"), defaults.empty_room_policy)?,
            identity_policy: parse("IDENTITY_POLICY", get("IDENTITY_POLICY"), defaults.identity_policy)?,
            reconnect_grace: Duration::from_secs(parse(
                "RECONNECT_GRACE_SECS",
                get("RECONNECT_GRACE_SECS"),
                0u64,
            )?),
            connection_buffer,
        })
    }
}
