use std::time::Duration;

use chrono_tz::Tz;
use serde::{Deserialize, Serialize};

use crate::db::{PoolSettings, DEFAULT_MAX_POOL_SIZE};
use crate::error::ConfigError;
use crate::logging::{LogFormat, LogLevel};

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub database: DatabaseConfig,
    #[serde(default)]
    pub imap: ImapConfig,
    #[serde(default)]
    pub ingestion: IngestionConfig,
    #[serde(default)]
    pub logging: LoggingConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DatabaseConfig {
    #[serde(default = "default_database_path")]
    pub path: String,
    #[serde(default = "default_max_pool_size")]
    pub max_pool_size: u32,
    #[serde(default = "default_connection_timeout_secs")]
    pub connection_timeout_secs: u64,
}

fn default_database_path() -> String {
    crate::db::default_database_path()
        .map(|p| p.to_string_lossy().into_owned())
        .unwrap_or_else(|| "data/scale_ingest.db".to_string())
}

fn default_max_pool_size() -> u32 {
    DEFAULT_MAX_POOL_SIZE
}

fn default_connection_timeout_secs() -> u64 {
    10
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            path: default_database_path(),
            max_pool_size: default_max_pool_size(),
            connection_timeout_secs: default_connection_timeout_secs(),
        }
    }
}

impl DatabaseConfig {
    pub fn pool_settings(&self) -> PoolSettings {
        PoolSettings {
            max_size: self.max_pool_size,
            connection_timeout: Duration::from_secs(self.connection_timeout_secs),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ImapConfig {
    #[serde(default)]
    pub host: String,
    #[serde(default = "default_imap_port")]
    pub port: u16,
    #[serde(default = "default_true")]
    pub use_tls: bool,
    #[serde(default)]
    pub username: String,
    /// Direct password value. Prefer `password_file` or `password_env_var`.
    #[serde(default, skip_serializing)]
    pub password: Option<String>,
    #[serde(default)]
    pub password_file: Option<String>,
    #[serde(default = "default_password_env_var")]
    pub password_env_var: Option<String>,
    #[serde(default = "default_inbox")]
    pub inbox: String,
    #[serde(default = "default_processed_folder")]
    pub processed_folder: String,
    #[serde(default = "default_failed_folder")]
    pub failed_folder: String,
    #[serde(default = "default_duplicate_folder")]
    pub duplicate_folder: String,
    #[serde(default = "default_filename_include")]
    pub filename_include: Vec<String>,
    #[serde(default)]
    pub filename_exclude: Vec<String>,
    #[serde(default)]
    pub min_attachment_size: u64,
    #[serde(default = "default_max_attachment_size")]
    pub max_attachment_size: u64,
    /// Maximum messages fetched per cycle.
    #[serde(default = "default_batch_size")]
    pub batch_size: u32,
}

fn default_imap_port() -> u16 {
    993
}

fn default_true() -> bool {
    true
}

fn default_password_env_var() -> Option<String> {
    Some("IMAP_PASSWORD".to_string())
}

fn default_inbox() -> String {
    "INBOX".to_string()
}

fn default_processed_folder() -> String {
    "Processed".to_string()
}

fn default_failed_folder() -> String {
    "Failed".to_string()
}

fn default_duplicate_folder() -> String {
    "Duplicates".to_string()
}

fn default_filename_include() -> Vec<String> {
    vec!["*.csv".to_string()]
}

fn default_max_attachment_size() -> u64 {
    10 * 1024 * 1024
}

fn default_batch_size() -> u32 {
    50
}

impl Default for ImapConfig {
    fn default() -> Self {
        Self {
            host: String::new(),
            port: default_imap_port(),
            use_tls: true,
            username: String::new(),
            password: None,
            password_file: None,
            password_env_var: default_password_env_var(),
            inbox: default_inbox(),
            processed_folder: default_processed_folder(),
            failed_folder: default_failed_folder(),
            duplicate_folder: default_duplicate_folder(),
            filename_include: default_filename_include(),
            filename_exclude: Vec::new(),
            min_attachment_size: 0,
            max_attachment_size: default_max_attachment_size(),
            batch_size: default_batch_size(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IngestionConfig {
    #[serde(default = "default_source_system")]
    pub source_system: String,
    #[serde(default = "default_poll_interval_secs")]
    pub poll_interval_secs: u64,
    #[serde(default = "default_chunk_size")]
    pub chunk_size: usize,
    #[serde(default = "default_source_timezone")]
    pub source_timezone: String,
    #[serde(default = "default_purge_after_days")]
    pub purge_after_days: u32,
}

fn default_source_system() -> String {
    "imap".to_string()
}

fn default_poll_interval_secs() -> u64 {
    60
}

fn default_chunk_size() -> usize {
    crate::db::transaction_repo::DEFAULT_CHUNK_SIZE
}

fn default_source_timezone() -> String {
    crate::validator::DEFAULT_SOURCE_TIMEZONE.name().to_string()
}

fn default_purge_after_days() -> u32 {
    30
}

impl Default for IngestionConfig {
    fn default() -> Self {
        Self {
            source_system: default_source_system(),
            poll_interval_secs: default_poll_interval_secs(),
            chunk_size: default_chunk_size(),
            source_timezone: default_source_timezone(),
            purge_after_days: default_purge_after_days(),
        }
    }
}

impl IngestionConfig {
    pub fn poll_interval(&self) -> Duration {
        Duration::from_secs(self.poll_interval_secs)
    }

    pub fn timezone(&self) -> Result<Tz, ConfigError> {
        self.source_timezone
            .parse::<Tz>()
            .map_err(|_| ConfigError::Validation {
                message: format!("Unknown source timezone '{}'", self.source_timezone),
            })
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct LoggingConfig {
    #[serde(default)]
    pub level: LogLevel,
    #[serde(default)]
    pub format: LogFormat,
}
