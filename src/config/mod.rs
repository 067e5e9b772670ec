//! Configuration layer: typed settings with layered precedence (file → env).

use std::num::{NonZeroU32, NonZeroUsize};
use std::path::Path;

use config::{Config, Environment, File};
use serde::Deserialize;
use thiserror::Error;
use tracing::level_filters::LevelFilter;

use crate::hash::HashKind;
use crate::policy::{CacheMode, CacheOptions, DEFAULT_EXPIRE_SECONDS, DEFAULT_KEY_PREFIX};

const LOCAL_CONFIG_BASENAME: &str = "scorta";
const DEFAULT_MEMORY_CAPACITY: usize = 1024;
const DEFAULT_DB_MAX_CONNECTIONS: u32 = 8;

/// Fully-resolved settings after precedence resolution and validation.
#[derive(Debug, Clone)]
pub struct Settings {
    pub cache: CacheSettings,
    pub memory: MemorySettings,
    pub database: DatabaseSettings,
    pub logging: LoggingSettings,
}

/// Instance defaults for the caching policy.
#[derive(Debug, Clone)]
pub struct CacheSettings {
    pub expire_seconds: u64,
    pub key_prefix: String,
    pub hash: HashKind,
    pub mode: CacheMode,
    pub write_skip_unchanged: bool,
}

impl CacheSettings {
    /// The instance [`CacheOptions`] template these settings describe.
    pub fn cache_options(&self) -> CacheOptions {
        CacheOptions {
            expire_seconds: self.expire_seconds,
            key_prefix: self.key_prefix.clone(),
            hash: self.hash,
            mode: self.mode,
            literal_key: None,
        }
    }
}

#[derive(Debug, Clone)]
pub struct MemorySettings {
    pub capacity: NonZeroUsize,
}

#[derive(Debug, Clone)]
pub struct DatabaseSettings {
    pub url: Option<String>,
    pub max_connections: NonZeroU32,
}

#[derive(Debug, Clone)]
pub struct LoggingSettings {
    pub level: LevelFilter,
    pub format: LogFormat,
}

#[derive(Debug, Clone, Copy, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    Json,
    Compact,
}

#[derive(Debug, Error)]
pub enum LoadError {
    #[error("failed to build configuration: {0}")]
    Build(#[from] config::ConfigError),
    #[error("invalid configuration for `{key}`: {reason}")]
    Invalid { key: &'static str, reason: String },
}

impl LoadError {
    fn invalid(key: &'static str, reason: impl Into<String>) -> Self {
        Self::Invalid {
            key,
            reason: reason.into(),
        }
    }
}

/// Load settings from `scorta.toml` (if present) and `SCORTA__*` environment
/// variables.
pub fn load() -> Result<Settings, LoadError> {
    load_from(None)
}

/// Load settings with an explicit, required configuration file.
pub fn load_from(path: Option<&Path>) -> Result<Settings, LoadError> {
    let mut builder =
        Config::builder().add_source(File::with_name(LOCAL_CONFIG_BASENAME).required(false));

    if let Some(path) = path {
        builder = builder.add_source(File::from(path).required(true));
    }

    builder = builder.add_source(Environment::with_prefix("SCORTA").separator("__"));

    let raw: RawSettings = builder.build()?.try_deserialize()?;
    Settings::from_raw(raw)
}

#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
struct RawSettings {
    cache: RawCacheSettings,
    memory: RawMemorySettings,
    database: RawDatabaseSettings,
    logging: RawLoggingSettings,
}

#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
struct RawCacheSettings {
    expire_seconds: Option<u64>,
    key_prefix: Option<String>,
    hash: Option<HashKind>,
    mode: Option<CacheMode>,
    write_skip_unchanged: Option<bool>,
}

#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
struct RawMemorySettings {
    capacity: Option<usize>,
}

#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
struct RawDatabaseSettings {
    url: Option<String>,
    max_connections: Option<u32>,
}

#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
struct RawLoggingSettings {
    level: Option<String>,
    format: Option<LogFormat>,
}

impl Settings {
    fn from_raw(raw: RawSettings) -> Result<Self, LoadError> {
        let expire_seconds = raw.cache.expire_seconds.unwrap_or(DEFAULT_EXPIRE_SECONDS);
        if expire_seconds == 0 {
            return Err(LoadError::invalid(
                "cache.expire_seconds",
                "must be a positive number of seconds",
            ));
        }

        let max_connections = raw
            .database
            .max_connections
            .unwrap_or(DEFAULT_DB_MAX_CONNECTIONS);
        let max_connections = NonZeroU32::new(max_connections).ok_or_else(|| {
            LoadError::invalid("database.max_connections", "must be greater than zero")
        })?;

        let level = match raw.logging.level {
            Some(raw_level) => raw_level.parse::<LevelFilter>().map_err(|_| {
                LoadError::invalid(
                    "logging.level",
                    format!("unrecognized level `{raw_level}`"),
                )
            })?,
            None => LevelFilter::INFO,
        };

        Ok(Self {
            cache: CacheSettings {
                expire_seconds,
                key_prefix: raw
                    .cache
                    .key_prefix
                    .unwrap_or_else(|| DEFAULT_KEY_PREFIX.to_string()),
                hash: raw.cache.hash.unwrap_or(HashKind::Fast32),
                mode: raw.cache.mode.unwrap_or(CacheMode::Cache),
                write_skip_unchanged: raw.cache.write_skip_unchanged.unwrap_or(false),
            },
            memory: MemorySettings {
                capacity: NonZeroUsize::new(
                    raw.memory.capacity.unwrap_or(DEFAULT_MEMORY_CAPACITY),
                )
                .unwrap_or(NonZeroUsize::MIN),
            },
            database: DatabaseSettings {
                url: raw.database.url,
                max_connections,
            },
            logging: LoggingSettings {
                level,
                format: raw.logging.format.unwrap_or(LogFormat::Compact),
            },
        })
    }
}
