//! Application error types.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum AppError {
    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Configuration load error: {0}")]
    ConfigLoad(#[from] ::config::ConfigError),

    #[error("Core error: {0}")]
    Core(#[from] quorum_core::CoreError),

    #[error("Feed error: {0}")]
    Feed(#[from] quorum_feed::FeedError),

    #[error("Router error: {0}")]
    Router(#[from] quorum_router::RouterError),

    #[error("Server error: {0}")]
    Server(#[from] quorum_server::ServerError),

    #[error("Telemetry error: {0}")]
    Telemetry(#[from] quorum_telemetry::TelemetryError),

    #[error("Persistence error: {0}")]
    Persistence(#[from] quorum_persistence::PersistenceError),

    #[error("TOML error: {0}")]
    Toml(#[from] toml::de::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

pub type AppResult<T> = Result<T, AppError>;
