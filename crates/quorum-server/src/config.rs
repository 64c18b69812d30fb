//! API server configuration.

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    /// Address to bind.
    #[serde(default = "default_bind")]
    pub bind: String,
    /// Port to listen on.
    #[serde(default = "default_port")]
    pub port: u16,
    /// Maximum concurrent streaming connections.
    #[serde(default = "default_max_connections")]
    pub max_connections: usize,
}

fn default_bind() -> String {
    "0.0.0.0".to_string()
}

fn default_port() -> u16 {
    8080
}

fn default_max_connections() -> usize {
    100
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind: default_bind(),
            port: default_port(),
            max_connections: default_max_connections(),
        }
    }
}

/// Publisher configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PublisherConfig {
    /// Publish cycle period.
    #[serde(default = "default_update_interval_ms")]
    pub update_interval_ms: u64,
    /// Frames a subscriber may have queued before it is dropped.
    #[serde(default = "default_subscriber_backlog")]
    pub subscriber_backlog: usize,
}

fn default_update_interval_ms() -> u64 {
    100
}

fn default_subscriber_backlog() -> usize {
    32
}

impl Default for PublisherConfig {
    fn default() -> Self {
        Self {
            update_interval_ms: default_update_interval_ms(),
            subscriber_backlog: default_subscriber_backlog(),
        }
    }
}
