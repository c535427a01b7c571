use std::collections::HashSet;
use std::path::Path;
use std::str::FromStr;

use crate::config::schema::Config;
use crate::error::ConfigError;
use crate::secrets::has_secret_source;

pub fn load_config<P: AsRef<Path>>(path: P) -> Result<Config, ConfigError> {
    let path = path.as_ref();
    let content = std::fs::read_to_string(path).map_err(|e| ConfigError::ReadFile {
        path: path.to_path_buf(),
        source: e,
    })?;

    load_config_from_str(&content)
}

pub fn load_config_from_str(content: &str) -> Result<Config, ConfigError> {
    let config: Config = serde_json::from_str(content)?;
    validate_config(&config)?;
    Ok(config)
}

/// Loads the config used by the binary: the file (if given) or defaults,
/// then process environment overrides, then validation.
pub fn load_runtime_config(path: Option<&Path>) -> Result<Config, ConfigError> {
    let mut config = match path {
        Some(path) => {
            let content = std::fs::read_to_string(path).map_err(|e| ConfigError::ReadFile {
                path: path.to_path_buf(),
                source: e,
            })?;
            serde_json::from_str(&content)?
        }
        None => Config::default(),
    };

    apply_env_overrides(&mut config, |name| std::env::var(name).ok())?;
    validate_config(&config)?;
    Ok(config)
}

/// Overrides config values from environment variables, looked up through
/// `lookup` so tests can supply their own environment.
pub fn apply_env_overrides<F>(config: &mut Config, lookup: F) -> Result<(), ConfigError>
where
    F: Fn(&str) -> Option<String>,
{
    let get = |name: &str| lookup(name).filter(|v| !v.trim().is_empty());

    if let Some(v) = get("IMAP_SERVER") {
        config.imap.host = v;
    }
    if let Some(v) = get("IMAP_PORT") {
        config.imap.port = parse_env("IMAP_PORT", &v)?;
    }
    if let Some(v) = get("IMAP_USE_SSL") {
        config.imap.use_tls = parse_bool_env("IMAP_USE_SSL", &v)?;
    }
    if let Some(v) = get("IMAP_USERNAME") {
        config.imap.username = v;
    }
    if let Some(v) = get("IMAP_INBOX") {
        config.imap.inbox = v;
    }
    if let Some(v) = get("IMAP_PROCESSED_FOLDER") {
        config.imap.processed_folder = v;
    }
    if let Some(v) = get("IMAP_FAILED_FOLDER") {
        config.imap.failed_folder = v;
    }
    if let Some(v) = get("IMAP_DUPLICATE_FOLDER") {
        config.imap.duplicate_folder = v;
    }
    if let Some(v) = get("INGESTION_INTERVAL_SECONDS") {
        config.ingestion.poll_interval_secs = parse_env("INGESTION_INTERVAL_SECONDS", &v)?;
    }
    if let Some(v) = get("SOURCE_TIMEZONE") {
        config.ingestion.source_timezone = v;
    }
    if let Some(v) = get("DATABASE_PATH") {
        config.database.path = v;
    }
    if let Some(v) = get("DATABASE_MAX_POOL_SIZE") {
        config.database.max_pool_size = parse_env("DATABASE_MAX_POOL_SIZE", &v)?;
    }
    if let Some(v) = get("LOG_LEVEL") {
        config.logging.level = parse_env("LOG_LEVEL", &v)?;
    }
    if let Some(v) = get("LOG_FORMAT") {
        config.logging.format = parse_env("LOG_FORMAT", &v)?;
    }

    Ok(())
}

fn parse_env<T: FromStr>(name: &'static str, value: &str) -> Result<T, ConfigError> {
    value.trim().parse().map_err(|_| ConfigError::InvalidEnv {
        name,
        value: value.to_string(),
    })
}

fn parse_bool_env(name: &'static str, value: &str) -> Result<bool, ConfigError> {
    match value.trim().to_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Ok(true),
        "0" | "false" | "no" | "off" => Ok(false),
        _ => Err(ConfigError::InvalidEnv {
            name,
            value: value.to_string(),
        }),
    }
}

pub fn validate_config(config: &Config) -> Result<(), ConfigError> {
    let invalid = |message: String| Err(ConfigError::Validation { message });

    let imap = &config.imap;
    if imap.host.trim().is_empty() {
        return invalid("imap.host is required".to_string());
    }
    if imap.username.trim().is_empty() {
        return invalid("imap.username is required".to_string());
    }
    if imap.port == 0 {
        return invalid("imap.port must be non-zero".to_string());
    }
    if !has_secret_source(
        imap.password.as_deref(),
        imap.password_file.as_deref(),
        imap.password_env_var.as_deref(),
    ) {
        return invalid(
            "imap needs one of password, password_file, or password_env_var".to_string(),
        );
    }

    let folders = [
        ("imap.inbox", &imap.inbox),
        ("imap.processed_folder", &imap.processed_folder),
        ("imap.failed_folder", &imap.failed_folder),
        ("imap.duplicate_folder", &imap.duplicate_folder),
    ];
    let mut seen = HashSet::new();
    for (field, name) in folders {
        if name.trim().is_empty() {
            return invalid(format!("{} must not be empty", field));
        }
        if !seen.insert(name.as_str()) {
            return invalid(format!("{} '{}' is used for more than one purpose", field, name));
        }
    }

    for pattern in imap.filename_include.iter().chain(&imap.filename_exclude) {
        if let Err(e) = glob::Pattern::new(pattern) {
            return invalid(format!("Invalid filename pattern '{}': {}", pattern, e));
        }
    }
    if imap.min_attachment_size > imap.max_attachment_size {
        return invalid("imap.min_attachment_size exceeds max_attachment_size".to_string());
    }

    let ingestion = &config.ingestion;
    if ingestion.poll_interval_secs == 0 {
        return invalid("ingestion.poll_interval_secs must be positive".to_string());
    }
    if ingestion.chunk_size == 0 {
        return invalid("ingestion.chunk_size must be positive".to_string());
    }
    ingestion.timezone()?;

    if config.database.path.trim().is_empty() {
        return invalid("database.path must not be empty".to_string());
    }
    if config.database.max_pool_size == 0 {
        return invalid("database.max_pool_size must be positive".to_string());
    }

    Ok(())
}
