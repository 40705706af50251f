use serde::{Deserialize, Serialize};
use std::time::Duration;
use tracing::{info, error};

/// Application configuration
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct Config {
    /// Server host address
    #[serde(default = "default_host")]
    pub host: String,

    /// Server port
    #[serde(default = "default_port")]
    pub port: u16,

    /// Environment (dev, staging, prod)
    #[serde(default = "default_environment")]
    pub environment: String,

    /// CORS allowed origins, comma separated
    pub cors_origins: Option<String>,

    /// Redis URL used to publish the headcount
    pub redis_url: Option<String>,

    /// Base URL of the code execution service
    #[serde(default = "default_runner_url")]
    pub runner_url: String,

    /// End-to-end bound on an execution request
    #[serde(default = "default_execution_timeout_ms")]
    pub execution_timeout_ms: u64,

    /// Timeout handed to the execution service for the run itself
    #[serde(default = "default_execution_inner_timeout_ms")]
    pub execution_inner_timeout_ms: u64,

    /// How often the headcount is sampled
    #[serde(default = "default_headcount_interval_secs")]
    pub headcount_interval_secs: u64,

    /// Redis channel (and key) the headcount is published to
    #[serde(default = "default_headcount_channel")]
    pub headcount_channel: String,

    /// Leading path segment added by the reverse proxy
    #[serde(default = "default_route_prefix")]
    pub route_prefix: String,

    /// Room used when the path carries no room id
    #[serde(default = "default_room")]
    pub default_room: String,

    /// Content inserted into a room's text the first time it is joined empty
    pub seed_content: Option<String>,

    /// Per-room broadcast channel capacity
    #[serde(default = "default_broadcast_capacity")]
    pub broadcast_capacity: usize,

    /// Executions one connection may have in flight; further requests get a Queue Full result
    #[serde(default = "default_max_runs_per_connection")]
    pub max_runs_per_connection: usize,
}

impl Config {
    /// Load configuration from environment variables or app.env file
    pub fn load() -> Result<Self, ConfigError> {
        // Try to load from app.env file first
        if std::path::Path::new("app.env").exists() {
            dotenvy::from_filename("app.env").ok();
        } else {
            // Fallback to .env file
            dotenvy::dotenv().ok();
        }

        // Load from environment variables using envy
        match envy::from_env::<Config>() {
            Ok(config) => {
                info!("✅ Configuration loaded successfully");
                Ok(config)
            }
            Err(e) => {
                error!("❌ Failed to load configuration: {}", e);
                Err(ConfigError::EnvError(e))
            }
        }
    }

    /// Get the full server address
    pub fn server_address(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }

    /// Check if running in production mode
    pub fn is_production(&self) -> bool {
        self.environment.to_lowercase() == "prod" || self.environment.to_lowercase() == "production"
    }

    pub fn execution_timeout(&self) -> Duration {
        Duration::from_millis(self.execution_timeout_ms)
    }

    pub fn headcount_interval(&self) -> Duration {
        Duration::from_secs(self.headcount_interval_secs.max(1))
    }

    /// Turn the request path of a WebSocket upgrade into a room id.
    ///
    /// The query string and the reverse-proxy prefix are dropped; an empty
    /// result maps to the default room.
    pub fn room_id_from_path(&self, path: &str) -> String {
        let path = path.split('?').next().unwrap_or_default();
        let mut room = path.trim_start_matches('/');

        if !self.route_prefix.is_empty() {
            if room == self.route_prefix {
                room = "";
            } else if let Some(rest) = room
                .strip_prefix(self.route_prefix.as_str())
                .and_then(|rest| rest.strip_prefix('/'))
            {
                room = rest;
            }
        }

        let room = room.trim_matches('/');
        if room.is_empty() {
            self.default_room.clone()
        } else {
            room.to_string()
        }
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
            environment: default_environment(),
            cors_origins: None,
            redis_url: None,
            runner_url: default_runner_url(),
            execution_timeout_ms: default_execution_timeout_ms(),
            execution_inner_timeout_ms: default_execution_inner_timeout_ms(),
            headcount_interval_secs: default_headcount_interval_secs(),
            headcount_channel: default_headcount_channel(),
            route_prefix: default_route_prefix(),
            default_room: default_room(),
            seed_content: None,
            broadcast_capacity: default_broadcast_capacity(),
            max_runs_per_connection: default_max_runs_per_connection(),
        }
    }
}

#[derive(Debug)]
pub enum ConfigError {
    EnvError(envy::Error),
}

impl std::fmt::Display for ConfigError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ConfigError::EnvError(e) => write!(f, "Environment variable error: {}", e),
        }
    }
}

impl std::error::Error for ConfigError {}

// Default value functions
fn default_host() -> String {
    "0.0.0.0".to_string()
}

fn default_port() -> u16 {
    6789
}

fn default_environment() -> String {
    "development".to_string()
}

fn default_runner_url() -> String {
    "http://localhost:8090".to_string()
}

fn default_execution_timeout_ms() -> u64 {
    12_000
}

fn default_execution_inner_timeout_ms() -> u64 {
    5_000
}

fn default_headcount_interval_secs() -> u64 {
    10
}

fn default_headcount_channel() -> String {
    "room:state:headcount".to_string()
}

fn default_route_prefix() -> String {
    "yjs".to_string()
}

fn default_room() -> String {
    "default-room".to_string()
}

fn default_broadcast_capacity() -> usize {
    256
}

fn default_max_runs_per_connection() -> usize {
    2
}
