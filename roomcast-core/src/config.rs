use config::{Config as ConfigBuilder, ConfigError, Environment, File};
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;

/// Application configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub server: ServerConfig,
    pub redis: RedisConfig,
    pub cluster: ClusterConfig,
    pub stream: StreamConfig,
    pub logging: LoggingConfig,
    /// Static room directory used when no external membership service is wired in
    pub rooms: Vec<RoomSeed>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    pub host: String,
    pub http_port: u16,
    /// Header carrying the caller's user id, set by the authenticating proxy
    pub identity_header: String,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".to_string(),
            http_port: 8080,
            identity_header: "x-user-id".to_string(),
        }
    }
}

/// Redis relay settings. An empty `url` runs the backplane in single-node mode.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RedisConfig {
    pub url: String,
    pub topic_prefix: String,
    pub connect_timeout_seconds: u64,
}

impl Default for RedisConfig {
    fn default() -> Self {
        Self {
            url: String::new(),
            topic_prefix: "roomcast:room:".to_string(),
            connect_timeout_seconds: 5,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ClusterConfig {
    /// Fixed node id; generated at startup when absent
    pub node_id: Option<String>,
    /// Capacity of the outbound relay publish queue
    pub publish_channel_capacity: usize,
}

impl Default for ClusterConfig {
    fn default() -> Self {
        Self {
            node_id: None,
            publish_channel_capacity: 10_000,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct StreamConfig {
    pub heartbeat_interval_seconds: u64,
}

impl Default for StreamConfig {
    fn default() -> Self {
        Self {
            heartbeat_interval_seconds: 15,
        }
    }
}

impl StreamConfig {
    #[must_use]
    pub const fn heartbeat_interval(&self) -> Duration {
        Duration::from_secs(self.heartbeat_interval_seconds)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    pub level: String,
    pub format: String, // "json" or "pretty"
    pub file_path: Option<String>,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            format: "pretty".to_string(),
            file_path: None,
        }
    }
}

/// A room and its members, seeded into the in-memory room directory
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RoomSeed {
    pub id: String,
    #[serde(default)]
    pub members: Vec<String>,
}

impl Config {
    /// Load configuration from multiple sources with priority:
    /// 1. Environment variables (highest priority)
    /// 2. Config file (if provided)
    /// 3. Defaults (lowest priority)
    pub fn load(config_file: Option<&str>) -> Result<Self, ConfigError> {
        let mut builder = ConfigBuilder::builder();

        if let Some(path) = config_file {
            if Path::new(path).exists() {
                builder = builder.add_source(File::with_name(path));
            }
        }

        // ROOMCAST_REDIS__URL, ROOMCAST_STREAM__HEARTBEAT_INTERVAL_SECONDS, ...
        builder = builder.add_source(
            Environment::with_prefix("ROOMCAST")
                .prefix_separator("_")
                .separator("__")
                .try_parsing(true),
        );

        let config = builder.build()?;
        config.try_deserialize()
    }

    /// Load from environment variables only (for Docker/K8s)
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::load(None)
    }

    /// Load from file path
    pub fn from_file(path: &str) -> Result<Self, ConfigError> {
        Self::load(Some(path))
    }

    /// Check the loaded values, returning every problem found
    pub fn validate(&self) -> Result<(), Vec<String>> {
        let mut errors = Vec::new();

        if self.server.http_port == 0 {
            errors.push("server.http_port must be non-zero".to_string());
        }
        if self.server.identity_header.trim().is_empty() {
            errors.push("server.identity_header must not be empty".to_string());
        } else if is_invalid_header_name(&self.server.identity_header) {
            errors.push(format!(
                "server.identity_header '{}' is not a valid header name",
                self.server.identity_header
            ));
        }
        if !self.redis.url.is_empty() && !self.redis.url.starts_with("redis") {
            errors.push(format!(
                "redis.url must use the redis:// or rediss:// scheme, got '{}'",
                self.redis.url
            ));
        }
        if self.redis.topic_prefix.is_empty() {
            errors.push("redis.topic_prefix must not be empty".to_string());
        }
        if self.redis.connect_timeout_seconds == 0 {
            errors.push("redis.connect_timeout_seconds must be at least 1".to_string());
        }
        if self.cluster.publish_channel_capacity == 0 {
            errors.push("cluster.publish_channel_capacity must be at least 1".to_string());
        }
        if !(1..=60).contains(&self.stream.heartbeat_interval_seconds) {
            errors.push(format!(
                "stream.heartbeat_interval_seconds must be between 1 and 60, got {}",
                self.stream.heartbeat_interval_seconds
            ));
        }
        if !matches!(self.logging.format.as_str(), "json" | "pretty") {
            errors.push(format!(
                "logging.format must be 'json' or 'pretty', got '{}'",
                self.logging.format
            ));
        }

        if errors.is_empty() {
            Ok(())
        } else {
            Err(errors)
        }
    }

    /// Whether cross-node delivery through Redis is configured
    #[must_use]
    pub fn relay_enabled(&self) -> bool {
        !self.redis.url.is_empty()
    }

    /// Get HTTP address
    #[must_use]
    pub fn http_address(&self) -> String {
        format!("{}:{}", self.server.host, self.server.http_port)
    }
}

/// Header names are lowercase visible ASCII without separators
fn is_invalid_header_name(name: &str) -> bool {
    !name.bytes().all(|b| {
        b.is_ascii_lowercase() || b.is_ascii_digit() || matches!(b, b'-' | b'_' | b'.')
    })
}
