//! Service configuration.
//!
//! Loaded from a JSON file; every field has a default except the
//! secrets, which must come from the file or the environment:
//!
//! | Variable | Overrides |
//! |---|---|
//! | `QUICKCONSULT_SECRET_KEY` | `credentials.secret_key` |
//! | `QUICKCONSULT_REFRESH_SECRET_KEY` | `credentials.refresh_secret_key` |
//! | `QUICKCONSULT_FEDERATION_SECRET` | `federation.broker_secret` |
//! | `QUICKCONSULT_DATABASE_PATH` | `database.path` |
//! | `QUICKCONSULT_LOG_LEVEL` | `logging.level` |

use std::fs;
use std::io;
use std::path::{Path, PathBuf};

use chrono::Duration;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::auth::{CookieConfig, CredentialConfig, FederationConfig};
use crate::consultation::message_log::DEFAULT_MAX_MESSAGE_BYTES;
use crate::http_server::HttpServerConfig;
use crate::observability::LoggingConfig;
use crate::realtime::connection::DEFAULT_OUTBOUND_BUFFER;

pub type ConfigResult<T> = Result<T, ConfigError>;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Failed to read config {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("Invalid config JSON: {0}")]
    Parse(#[from] serde_json::Error),

    #[error("Invalid configuration: {0}")]
    Invalid(String),
}

/// Token signing settings
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CredentialsSection {
    #[serde(default)]
    pub secret_key: String,

    #[serde(default)]
    pub refresh_secret_key: String,

    #[serde(default = "default_issuer")]
    pub issuer: String,

    #[serde(default = "default_access_token_minutes")]
    pub access_token_minutes: i64,

    #[serde(default = "default_refresh_token_days")]
    pub refresh_token_days: i64,
}

fn default_issuer() -> String {
    "quickconsult".to_string()
}

fn default_access_token_minutes() -> i64 {
    30
}

fn default_refresh_token_days() -> i64 {
    1
}

impl Default for CredentialsSection {
    fn default() -> Self {
        Self {
            secret_key: String::new(),
            refresh_secret_key: String::new(),
            issuer: default_issuer(),
            access_token_minutes: default_access_token_minutes(),
            refresh_token_days: default_refresh_token_days(),
        }
    }
}

impl CredentialsSection {
    pub fn to_credential_config(&self) -> CredentialConfig {
        CredentialConfig {
            secret_key: self.secret_key.clone(),
            refresh_secret_key: self.refresh_secret_key.clone(),
            access_token_ttl: Duration::minutes(self.access_token_minutes),
            refresh_token_ttl: Duration::days(self.refresh_token_days),
            issuer: self.issuer.clone(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DatabaseConfig {
    /// SQLite database file
    #[serde(default = "default_database_path")]
    pub path: PathBuf,

    #[serde(default = "default_pool_size")]
    pub pool_size: u32,
}

fn default_database_path() -> PathBuf {
    PathBuf::from("./quickconsult.db")
}

fn default_pool_size() -> u32 {
    8
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            path: default_database_path(),
            pool_size: default_pool_size(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RealtimeConfig {
    /// Frames queued per connection before it is dropped as too slow
    #[serde(default = "default_outbound_buffer")]
    pub outbound_buffer: usize,

    #[serde(default = "default_max_message_bytes")]
    pub max_message_bytes: usize,
}

fn default_outbound_buffer() -> usize {
    DEFAULT_OUTBOUND_BUFFER
}

fn default_max_message_bytes() -> usize {
    DEFAULT_MAX_MESSAGE_BYTES
}

impl Default for RealtimeConfig {
    fn default() -> Self {
        Self {
            outbound_buffer: default_outbound_buffer(),
            max_message_bytes: default_max_message_bytes(),
        }
    }
}

/// Full service configuration
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct AppConfig {
    #[serde(default)]
    pub server: HttpServerConfig,

    #[serde(default)]
    pub credentials: CredentialsSection,

    #[serde(default)]
    pub cookies: CookieConfig,

    #[serde(default)]
    pub federation: FederationConfig,

    #[serde(default)]
    pub database: DatabaseConfig,

    #[serde(default)]
    pub realtime: RealtimeConfig,

    #[serde(default)]
    pub logging: LoggingConfig,
}

const REDACTED: &str = "********";

impl AppConfig {
    /// Load from file (defaults if it does not exist), apply environment
    /// overrides, then validate.
    pub fn load(path: &Path) -> ConfigResult<Self> {
        let mut config = match fs::read_to_string(path) {
            Ok(content) => Self::from_json(&content)?,
            Err(e) if e.kind() == io::ErrorKind::NotFound => Self::default(),
            Err(source) => {
                return Err(ConfigError::Read {
                    path: path.to_path_buf(),
                    source,
                })
            }
        };

        config.apply_env(|key| std::env::var(key).ok());
        config.validate()?;
        Ok(config)
    }

    pub fn from_json(content: &str) -> ConfigResult<Self> {
        Ok(serde_json::from_str(content)?)
    }

    /// Apply overrides from a variable lookup
    pub fn apply_env(&mut self, lookup: impl Fn(&str) -> Option<String>) {
        if let Some(v) = lookup("QUICKCONSULT_SECRET_KEY") {
            self.credentials.secret_key = v;
        }
        if let Some(v) = lookup("QUICKCONSULT_REFRESH_SECRET_KEY") {
            self.credentials.refresh_secret_key = v;
        }
        if let Some(v) = lookup("QUICKCONSULT_FEDERATION_SECRET") {
            self.federation.broker_secret = v;
        }
        if let Some(v) = lookup("QUICKCONSULT_DATABASE_PATH") {
            self.database.path = PathBuf::from(v);
        }
        if let Some(v) = lookup("QUICKCONSULT_LOG_LEVEL") {
            self.logging.level = v;
        }
    }

    pub fn validate(&self) -> ConfigResult<()> {
        self.server.validate().map_err(ConfigError::Invalid)?;

        let credentials = &self.credentials;

        if credentials.secret_key.is_empty() {
            return Err(ConfigError::Invalid("credentials.secret_key must be set".into()));
        }
        if credentials.refresh_secret_key.is_empty() {
            return Err(ConfigError::Invalid(
                "credentials.refresh_secret_key must be set".into(),
            ));
        }
        if credentials.secret_key == credentials.refresh_secret_key {
            return Err(ConfigError::Invalid(
                "access and refresh tokens must use different secrets".into(),
            ));
        }
        if self.federation.broker_secret.is_empty() {
            return Err(ConfigError::Invalid("federation.broker_secret must be set".into()));
        }

        if credentials.access_token_minutes <= 0 || credentials.refresh_token_days <= 0 {
            return Err(ConfigError::Invalid("token lifetimes must be positive".into()));
        }
        let ttl = credentials.to_credential_config();
        if ttl.access_token_ttl >= ttl.refresh_token_ttl {
            return Err(ConfigError::Invalid(
                "access token lifetime must be shorter than refresh token lifetime".into(),
            ));
        }

        if self.realtime.outbound_buffer == 0 {
            return Err(ConfigError::Invalid("realtime.outbound_buffer must be > 0".into()));
        }
        if self.realtime.max_message_bytes == 0 {
            return Err(ConfigError::Invalid("realtime.max_message_bytes must be > 0".into()));
        }
        if self.database.pool_size == 0 {
            return Err(ConfigError::Invalid("database.pool_size must be > 0".into()));
        }

        Ok(())
    }

    /// Copy safe to print: set secrets are masked
    pub fn redacted(&self) -> Self {
        let mask = |s: &str| {
            if s.is_empty() {
                String::new()
            } else {
                REDACTED.to_string()
            }
        };

        let mut copy = self.clone();
        copy.credentials.secret_key = mask(&self.credentials.secret_key);
        copy.credentials.refresh_secret_key = mask(&self.credentials.refresh_secret_key);
        copy.federation.broker_secret = mask(&self.federation.broker_secret);
        copy
    }
}
