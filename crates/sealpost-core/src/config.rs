//! Envelope configuration.
//!
//! Loaded in layers: built-in defaults, then a TOML file (explicit path or
//! `SEALPOST_CONFIG`), then `SEALPOST_*` environment variables, then
//! [`EnvelopeConfig::validate`].
//!
//! # Example TOML
//!
//! ```toml
//! local_identity = "svc:6f1c3e0a-1b2c-4d5e-8f90-a1b2c3d4e5f6"
//! counterparty = "org:0d9e8f7a-6b5c-4d3e-2f1a-0b9c8d7e6f5a"
//! key_path = "sealpost-key.json"
//! base_url = "https://api.example.com"
//! token_header = "X-Sealpost-Token"
//! keys_path = "/public/v3/keys"
//! token_ttl_secs = 30
//! clock_skew_secs = 0
//! request_timeout_secs = 30
//!
//! [logging]
//! level = "info"
//! ```

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use sealpost_crypto::{ClaimPolicy, EntityIdentifier};

use crate::transport::DEFAULT_TOKEN_HEADER;

pub const CONFIG_PATH_ENV: &str = "SEALPOST_CONFIG";
const ENV_PREFIX: &str = "SEALPOST_";

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config file: {0}")]
    Io(#[from] std::io::Error),

    #[error("failed to parse config file: {0}")]
    Toml(#[from] toml::de::Error),

    #[error("invalid configuration: {0}")]
    Invalid(String),
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// `EnvFilter` directive, e.g. "info" or "sealpost_core=debug"
    pub level: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct EnvelopeConfig {
    /// Identity tokens are issued as and must be addressed to
    pub local_identity: Option<EntityIdentifier>,
    /// Default destination and expected issuer of responses
    pub counterparty: Option<EntityIdentifier>,
    /// JSON key file holding the local key pair
    pub key_path: PathBuf,
    pub base_url: String,
    pub token_header: String,
    pub keys_path: String,
    pub token_ttl_secs: u64,
    pub clock_skew_secs: u64,
    pub request_timeout_secs: u64,
    pub logging: LoggingConfig,
}

impl Default for EnvelopeConfig {
    fn default() -> Self {
        Self {
            local_identity: None,
            counterparty: None,
            key_path: PathBuf::from("sealpost-key.json"),
            base_url: "http://127.0.0.1:8080".to_string(),
            token_header: DEFAULT_TOKEN_HEADER.to_string(),
            keys_path: "/public/v3/keys".to_string(),
            token_ttl_secs: 30,
            clock_skew_secs: 0,
            request_timeout_secs: 30,
            logging: LoggingConfig::default(),
        }
    }
}

impl EnvelopeConfig {
    /// Load from `path`, or from `SEALPOST_CONFIG` when no path is given,
    /// then apply environment overrides and validate.
    pub fn load(path: Option<&Path>) -> Result<Self, ConfigError> {
        let file = path
            .map(Path::to_path_buf)
            .or_else(|| std::env::var_os(CONFIG_PATH_ENV).map(PathBuf::from));

        let mut config = match file {
            Some(p) => Self::from_toml_file(&p)?,
            None => Self::default(),
        };
        config.apply_overrides(|name| std::env::var(name).ok())?;
        config.validate()?;
        Ok(config)
    }

    pub fn from_toml_file(path: &Path) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path)?;
        Self::from_toml_str(&content)
    }

    pub fn from_toml_str(content: &str) -> Result<Self, ConfigError> {
        Ok(toml::from_str(content)?)
    }

    /// Apply `SEALPOST_<FIELD>` overrides read through `lookup`.
    pub fn apply_overrides(
        &mut self,
        lookup: impl Fn(&str) -> Option<String>,
    ) -> Result<(), ConfigError> {
        let var = |field: &str| lookup(&format!("{ENV_PREFIX}{field}"));

        if let Some(v) = var("LOCAL_IDENTITY") {
            self.local_identity = Some(parse_entity("LOCAL_IDENTITY", &v)?);
        }
        if let Some(v) = var("COUNTERPARTY") {
            self.counterparty = Some(parse_entity("COUNTERPARTY", &v)?);
        }
        if let Some(v) = var("KEY_PATH") {
            self.key_path = PathBuf::from(v);
        }
        if let Some(v) = var("BASE_URL") {
            self.base_url = v;
        }
        if let Some(v) = var("TOKEN_HEADER") {
            self.token_header = v;
        }
        if let Some(v) = var("KEYS_PATH") {
            self.keys_path = v;
        }
        if let Some(v) = var("TOKEN_TTL_SECS") {
            self.token_ttl_secs = parse_u64("TOKEN_TTL_SECS", &v)?;
        }
        if let Some(v) = var("CLOCK_SKEW_SECS") {
            self.clock_skew_secs = parse_u64("CLOCK_SKEW_SECS", &v)?;
        }
        if let Some(v) = var("REQUEST_TIMEOUT_SECS") {
            self.request_timeout_secs = parse_u64("REQUEST_TIMEOUT_SECS", &v)?;
        }
        if let Some(v) = var("LOG_LEVEL") {
            self.logging.level = v;
        }
        Ok(())
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.token_ttl_secs == 0 {
            return Err(ConfigError::Invalid("token_ttl_secs must be > 0".to_string()));
        }
        if self.request_timeout_secs == 0 {
            return Err(ConfigError::Invalid(
                "request_timeout_secs must be > 0".to_string(),
            ));
        }
        if self.token_header.trim().is_empty() {
            return Err(ConfigError::Invalid("token_header must not be empty".to_string()));
        }
        if !self.keys_path.starts_with('/') {
            return Err(ConfigError::Invalid(format!(
                "keys_path must be absolute, got {:?}",
                self.keys_path
            )));
        }
        if !(self.base_url.starts_with("http://") || self.base_url.starts_with("https://")) {
            return Err(ConfigError::Invalid(format!(
                "base_url must be an http(s) URL, got {:?}",
                self.base_url
            )));
        }
        Ok(())
    }

    /// The local identity, which every envelope operation needs.
    pub fn require_local_identity(&self) -> Result<EntityIdentifier, ConfigError> {
        self.local_identity
            .ok_or_else(|| ConfigError::Invalid("local_identity is not set".to_string()))
    }

    pub fn claim_policy(&self) -> ClaimPolicy {
        ClaimPolicy {
            clock_skew_secs: self.clock_skew_secs,
        }
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }
}

fn parse_entity(field: &str, value: &str) -> Result<EntityIdentifier, ConfigError> {
    value
        .parse()
        .map_err(|e| ConfigError::Invalid(format!("{ENV_PREFIX}{field}: {e}")))
}

fn parse_u64(field: &str, value: &str) -> Result<u64, ConfigError> {
    value
        .parse()
        .map_err(|e| ConfigError::Invalid(format!("{ENV_PREFIX}{field}: {e}")))
}
