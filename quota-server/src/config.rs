use std::io;
use std::path::Path;
use std::path::PathBuf;
use std::time::Duration;

use quota_limit::FixedWindowConfig;
use quota_limit::LimitError;
use quota_limit::TokenBucketConfig;
use redis::ConnectionAddr;
use redis::ConnectionInfo;
use redis::RedisConnectionInfo;
use serde::Deserialize;

/// Errors raised while loading the server configuration.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("configuration file {} not found", .0.display())]
    NotFound(PathBuf),

    #[error("failed to read configuration file {}", path.display())]
    Read {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("failed to parse configuration file {}", path.display())]
    Parse {
        path: PathBuf,
        #[source]
        source: serde_yaml::Error,
    },

    #[error("invalid rate limiter configuration")]
    Invalid(#[from] LimitError),
}

/// Top level of the YAML configuration file.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub struct Settings {
    #[serde(default)]
    pub server: ServerSettings,
    #[serde(default)]
    pub store: Backend,
    #[serde(default)]
    pub redis: RedisSettings,
    pub rate_limiter: RateLimiterSettings,
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default)]
pub struct ServerSettings {
    pub host: String,
    pub port: u16,
}

impl Default for ServerSettings {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".to_string(),
            port: 8080,
        }
    }
}

/// Where limiter state is kept.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Backend {
    #[default]
    Memory,
    Redis,
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default, rename_all = "kebab-case")]
pub struct RedisSettings {
    pub host: String,
    pub port: u16,
    pub password: Option<String>,
    pub fixed_window_db: i64,
    pub token_bucket_db: i64,
    /// Deadline for every round trip; unbounded when absent.
    pub timeout_ms: Option<u64>,
}

impl Default for RedisSettings {
    fn default() -> Self {
        Self {
            host: "127.0.0.1".to_string(),
            port: 6379,
            password: None,
            fixed_window_db: 0,
            token_bucket_db: 1,
            timeout_ms: None,
        }
    }
}

impl RedisSettings {
    pub fn connection_info(&self, db: i64) -> ConnectionInfo {
        ConnectionInfo {
            addr: ConnectionAddr::Tcp(self.host.clone(), self.port),
            redis: RedisConnectionInfo {
                db,
                password: self.password.clone().filter(|p| !p.is_empty()),
                ..Default::default()
            },
        }
    }

    pub fn timeout(&self) -> Option<Duration> {
        self.timeout_ms.map(Duration::from_millis)
    }
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub struct RateLimiterSettings {
    pub fixed_window: FixedWindowConfig,
    pub token_bucket: TokenBucketConfig,
}

impl Settings {
    /// Reads, parses and validates the YAML file at `path`.
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let raw = std::fs::read_to_string(path).map_err(|source| match source.kind() {
            io::ErrorKind::NotFound => ConfigError::NotFound(path.to_path_buf()),
            _ => ConfigError::Read {
                path: path.to_path_buf(),
                source,
            },
        })?;
        let settings: Settings = serde_yaml::from_str(&raw).map_err(|source| ConfigError::Parse {
            path: path.to_path_buf(),
            source,
        })?;
        settings.validate()?;
        Ok(settings)
    }

    pub fn validate(&self) -> Result<(), LimitError> {
        self.rate_limiter.fixed_window.validate()?;
        self.rate_limiter.token_bucket.validate()
    }
}
