//! Environment-driven configuration
//!
//! Every setting has a default and can be overridden by a `RICETTA_*`
//! variable; the CLI may override individual fields after loading.

use crate::gateway::GatewayConfig;
use crate::stream::DEFAULT_CLAIM_IDLE;
use crate::graph::Language;
use crate::pipeline::EventRoutes;
use crate::retry::RetryPolicy;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::time::Duration;
use thiserror::Error;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum ConfigError {
    #[error("Invalid value for {key}: {value:?}")]
    Invalid { key: String, value: String },
}

pub type ConfigResult<T> = Result<T, ConfigError>;

#[derive(Debug, Clone, PartialEq)]
pub struct Config {
    pub graph_db: PathBuf,
    pub index_db: PathBuf,
    /// `sqlite:<path>`, `sqlite::memory:` or `redis://...`
    pub broker: String,
    pub group: String,
    /// Stable across restarts; pending entries of other consumers are still
    /// claimed once idle for `claim_idle`.
    pub consumer: String,
    pub routes: EventRoutes,
    pub batch_size: usize,
    pub block: Duration,
    pub max_deliveries: u32,
    pub claim_idle: Duration,
    pub retry: RetryPolicy,
    pub language: Language,
    pub log_level: String,
    pub log_json: bool,
}

/// Default data directory (~/.local/share/ricetta)
pub fn default_data_dir() -> PathBuf {
    let data_dir = dirs::data_dir()
        .unwrap_or_else(|| dirs::home_dir().unwrap_or_default().join(".local/share"));
    data_dir.join("ricetta")
}

impl Config {
    /// Defaults rooted at `data_dir`.
    pub fn with_data_dir(data_dir: &Path) -> Self {
        Self {
            graph_db: data_dir.join("graph.db"),
            index_db: data_dir.join("fulltext.db"),
            broker: format!("sqlite:{}", data_dir.join("streams.db").display()),
            group: "indexer".to_string(),
            consumer: "indexer".to_string(),
            routes: EventRoutes::default(),
            batch_size: 10,
            block: Duration::from_millis(500),
            max_deliveries: 5,
            claim_idle: DEFAULT_CLAIM_IDLE,
            retry: RetryPolicy::default(),
            language: Language::default(),
            log_level: "info".to_string(),
            log_json: false,
        }
    }

    pub fn from_env() -> ConfigResult<Self> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Load from an arbitrary variable source.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> ConfigResult<Self> {
        let data_dir = lookup("RICETTA_DATA_DIR")
            .map(PathBuf::from)
            .unwrap_or_else(default_data_dir);
        let mut config = Self::with_data_dir(&data_dir);
        let var = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());

        if let Some(v) = var("RICETTA_GRAPH_DB") {
            config.graph_db = PathBuf::from(v);
        }
        if let Some(v) = var("RICETTA_INDEX_DB") {
            config.index_db = PathBuf::from(v);
        }
        if let Some(v) = var("RICETTA_BROKER_URL") {
            config.broker = v;
        }
        if let Some(v) = var("RICETTA_GROUP") {
            config.group = v;
        }
        if let Some(v) = var("RICETTA_CONSUMER") {
            config.consumer = v;
        }
        if let Some(v) = var("RICETTA_SAVED_STREAM") {
            config.routes.saved = v;
        }
        if let Some(v) = var("RICETTA_DELETED_STREAM") {
            config.routes.deleted = v;
        }
        if let Some(v) = var("RICETTA_BATCH_SIZE") {
            config.batch_size = parse("RICETTA_BATCH_SIZE", &v)?;
            if config.batch_size == 0 {
                return Err(invalid("RICETTA_BATCH_SIZE", &v));
            }
        }
        if let Some(v) = var("RICETTA_BLOCK_MS") {
            config.block = Duration::from_millis(parse("RICETTA_BLOCK_MS", &v)?);
        }
        if let Some(v) = var("RICETTA_MAX_DELIVERIES") {
            config.max_deliveries = parse("RICETTA_MAX_DELIVERIES", &v)?;
        }
        if let Some(v) = var("RICETTA_CLAIM_IDLE_MS") {
            config.claim_idle = Duration::from_millis(parse("RICETTA_CLAIM_IDLE_MS", &v)?);
        }
        if let Some(v) = var("RICETTA_RETRY_ATTEMPTS") {
            config.retry.max_retries = parse("RICETTA_RETRY_ATTEMPTS", &v)?;
        }
        if let Some(v) = var("RICETTA_RETRY_INITIAL_MS") {
            config.retry.initial_delay = Duration::from_millis(parse("RICETTA_RETRY_INITIAL_MS", &v)?);
        }
        if let Some(v) = var("RICETTA_RETRY_MAX_MS") {
            config.retry.max_delay = Duration::from_millis(parse("RICETTA_RETRY_MAX_MS", &v)?);
        }
        if let Some(v) = var("RICETTA_LANGUAGE") {
            config.language = Language::parse(&v).ok_or_else(|| invalid("RICETTA_LANGUAGE", &v))?;
        }
        if let Some(v) = var("RICETTA_LOG_LEVEL") {
            config.log_level = v;
        }
        if let Some(v) = var("RICETTA_LOG_JSON") {
            config.log_json = parse_bool("RICETTA_LOG_JSON", &v)?;
        }

        if config.routes.saved == config.routes.deleted {
            return Err(invalid("RICETTA_DELETED_STREAM", &config.routes.deleted));
        }
        Ok(config)
    }

    /// Gateway settings derived from this configuration.
    pub fn gateway(&self) -> GatewayConfig {
        let mut gateway = GatewayConfig::new(&self.group, &self.consumer, self.routes.streams());
        gateway.batch_size = self.batch_size;
        gateway.block = self.block;
        gateway.max_deliveries = self.max_deliveries;
        gateway.claim_idle = self.claim_idle;
        gateway.retry = self.retry;
        gateway
    }
}

impl Default for Config {
    fn default() -> Self {
        Self::with_data_dir(&default_data_dir())
    }
}

fn invalid(key: &str, value: &str) -> ConfigError {
    ConfigError::Invalid {
        key: key.to_string(),
        value: value.to_string(),
    }
}

fn parse<T: FromStr>(key: &str, value: &str) -> ConfigResult<T> {
    value.trim().parse().map_err(|_| invalid(key, value))
}

fn parse_bool(key: &str, value: &str) -> ConfigResult<bool> {
    match value.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Ok(true),
        "0" | "false" | "no" | "off" => Ok(false),
        _ => Err(invalid(key, value)),
    }
}
