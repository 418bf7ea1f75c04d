//! Process configuration read from the environment.

use std::net::SocketAddr;
use std::path::{Path, PathBuf};

use thiserror::Error;

use crate::types::WatchDeclaration;
use crate::worker::PollConfig;

pub const STATE_DIR_ENV: &str = "STATUS_WATCH_STATE_DIR";
pub const DECLARATIONS_ENV: &str = "STATUS_WATCH_DECLARATIONS";
pub const LISTEN_ADDR_ENV: &str = "STATUS_WATCH_LISTEN_ADDR";
pub const GITHUB_TOKEN_ENV: &str = "GITHUB_TOKEN";

const DEFAULT_STATE_DIR: &str = "state";
const DEFAULT_LISTEN_ADDR: &str = "0.0.0.0:3000";

#[derive(Debug, Error)]
pub enum AppConfigError {
    #[error("invalid listen address {value:?}: {source}")]
    InvalidListenAddr {
        value: String,
        source: std::net::AddrParseError,
    },

    #[error("could not read declarations {}: {source}", .path.display())]
    Io {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("malformed declarations {}: {source}", .path.display())]
    Json {
        path: PathBuf,
        source: serde_json::Error,
    },
}

#[derive(Debug, Clone)]
pub struct AppConfig {
    /// Root of the file store.
    pub state_dir: PathBuf,
    /// JSON array of watch declarations started at boot, if any.
    pub declarations: Option<PathBuf>,
    pub listen_addr: SocketAddr,
    /// Falls back to unauthenticated GitHub access when unset.
    pub github_token: Option<String>,
    pub poll: PollConfig,
}

impl AppConfig {
    pub fn from_env() -> Result<Self, AppConfigError> {
        let mut config = Self::from_lookup(|key| std::env::var(key).ok())?;
        config.poll = PollConfig::from_env();
        Ok(config)
    }

    /// Builds the config from an arbitrary key lookup. Empty values count
    /// as unset.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, AppConfigError> {
        let get = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());

        let listen_raw = get(LISTEN_ADDR_ENV).unwrap_or_else(|| DEFAULT_LISTEN_ADDR.to_string());
        let listen_addr = listen_raw
            .parse::<SocketAddr>()
            .map_err(|source| AppConfigError::InvalidListenAddr {
                value: listen_raw.clone(),
                source,
            })?;

        Ok(AppConfig {
            state_dir: get(STATE_DIR_ENV)
                .map(PathBuf::from)
                .unwrap_or_else(|| PathBuf::from(DEFAULT_STATE_DIR)),
            declarations: get(DECLARATIONS_ENV).map(PathBuf::from),
            listen_addr,
            github_token: get(GITHUB_TOKEN_ENV),
            poll: PollConfig::default(),
        })
    }
}

/// Reads a declarations file. A missing file is an error; an empty array
/// is fine.
pub fn load_declarations(path: &Path) -> Result<Vec<WatchDeclaration>, AppConfigError> {
    let contents = std::fs::read_to_string(path).map_err(|source| AppConfigError::Io {
        path: path.to_path_buf(),
        source,
    })?;
    serde_json::from_str(&contents).map_err(|source| AppConfigError::Json {
        path: path.to_path_buf(),
        source,
    })
}
