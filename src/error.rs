use reqwest::StatusCode;
use serde_json::Error as JsonError;
use std::time::Duration;

#[derive(thiserror::Error, Debug)]
pub enum ScraperError {
    #[error("HTTP error ({0}): {1}")]
    Http(StatusCode, String),

    #[error("request failed: {0}")]
    Request(#[from] reqwest::Error),

    #[error("JSON parse error: {0}")]
    Json(#[from] JsonError),

    #[error("failed to login: {0}")]
    LoginFailed(String),

    #[error("failed to reauthenticate: {0}")]
    Reauthentication(String),

    #[error("reauthentication already in progress")]
    ReauthenticateAlreadyInProgress,

    #[error("sensor already running")]
    SensorAlreadyRunning,

    #[error("sensor {0} is not running")]
    SensorNotRunning(String),

    #[error("sensor not found: {0}")]
    SensorNotFound(String),

    #[error("{0} requires the {1} sensor")]
    MissingSensor(&'static str, &'static str),

    #[error("operation cancelled")]
    Cancelled,

    #[error("operation timed out after {0:?}")]
    Timeout(Duration),

    #[error("client pool closed")]
    PoolClosed,

    #[error("all {0} host sub-queries failed")]
    AllHostQueriesFailed(usize),

    #[error("timeout waiting for sensors to start: {0:?}")]
    StartupTimeout(Vec<String>),

    #[error("invalid URL {0}")]
    InvalidUrl(String),

    #[error("invalid config: {0}")]
    InvalidConfig(String),

    #[error("failed to read config file: {0}")]
    ConfigIo(#[from] std::io::Error),

    #[error("failed to parse config file: {0}")]
    ConfigParse(#[from] toml::de::Error),
}

impl ScraperError {
    /// Conflicts are expected while sensors and the pool are busy; callers
    /// skip or back off instead of treating them as failures.
    pub fn is_conflict(&self) -> bool {
        matches!(
            self,
            ScraperError::SensorAlreadyRunning | ScraperError::ReauthenticateAlreadyInProgress
        )
    }
}
