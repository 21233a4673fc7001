use serde::Deserialize;

use crate::error::Error;
use crate::platform::Platform;

/// Service settings. Built from defaults, then `config/adlaunch.toml` when it
/// exists, then `ADLAUNCH__*` environment variables
/// (e.g. `ADLAUNCH__DATABASE__BACKEND=memory`).
#[derive(Debug, Clone, Default, Deserialize)]
pub struct Settings {
    #[serde(default)]
    pub server: ServerSettings,
    #[serde(default)]
    pub database: DatabaseSettings,
    #[serde(default)]
    pub provisioning: ProvisioningSettings,
    #[serde(default)]
    pub platforms: PlatformSettings,
    #[serde(default)]
    pub logging: LoggingSettings,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ServerSettings {
    #[serde(default = "default_host")]
    pub host: String,
    #[serde(default = "default_port")]
    pub port: u16,
}

#[derive(Copy, Clone, Debug, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DatabaseBackend {
    Mongo,
    Memory,
}

#[derive(Debug, Clone, Deserialize)]
pub struct DatabaseSettings {
    #[serde(default = "default_backend")]
    pub backend: DatabaseBackend,
    #[serde(default = "default_database_uri")]
    pub uri: String,
    #[serde(default = "default_database_name")]
    pub name: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ProvisioningSettings {
    #[serde(default = "default_max_retries")]
    pub max_retries: i32,
    #[serde(default = "default_error_message_limit")]
    pub error_message_limit: usize,
    #[serde(default = "default_step_lease_seconds")]
    pub step_lease_seconds: i64,
}

#[derive(Debug, Clone, Deserialize)]
pub struct PlatformSettings {
    #[serde(default = "default_enabled_platforms")]
    pub enabled: Vec<Platform>,
    #[serde(default = "default_token_ttl_seconds")]
    pub token_ttl_seconds: i64,
    #[serde(default = "default_token_refresh_margin_seconds")]
    pub token_refresh_margin_seconds: i64,
}

#[derive(Copy, Clone, Debug, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    Compact,
    Json,
}

#[derive(Debug, Clone, Deserialize)]
pub struct LoggingSettings {
    #[serde(default = "default_log_level")]
    pub level: String,
    #[serde(default = "default_log_format")]
    pub format: LogFormat,
}

fn default_host() -> String {
    "127.0.0.1".to_string()
}
fn default_port() -> u16 {
    8080
}
fn default_backend() -> DatabaseBackend {
    DatabaseBackend::Mongo
}
fn default_database_uri() -> String {
    "mongodb://localhost:27017".to_string()
}
fn default_database_name() -> String {
    "adlaunch".to_string()
}
fn default_max_retries() -> i32 {
    2
}
fn default_error_message_limit() -> usize {
    500
}
fn default_step_lease_seconds() -> i64 {
    300
}
fn default_enabled_platforms() -> Vec<Platform> {
    vec![Platform::Meta, Platform::GoogleAds]
}
fn default_token_ttl_seconds() -> i64 {
    3600
}
fn default_token_refresh_margin_seconds() -> i64 {
    300
}
fn default_log_level() -> String {
    "info".to_string()
}
fn default_log_format() -> LogFormat {
    LogFormat::Compact
}

impl Default for ServerSettings {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
        }
    }
}

impl Default for DatabaseSettings {
    fn default() -> Self {
        Self {
            backend: default_backend(),
            uri: default_database_uri(),
            name: default_database_name(),
        }
    }
}

impl Default for ProvisioningSettings {
    fn default() -> Self {
        Self {
            max_retries: default_max_retries(),
            error_message_limit: default_error_message_limit(),
            step_lease_seconds: default_step_lease_seconds(),
        }
    }
}

impl Default for PlatformSettings {
    fn default() -> Self {
        Self {
            enabled: default_enabled_platforms(),
            token_ttl_seconds: default_token_ttl_seconds(),
            token_refresh_margin_seconds: default_token_refresh_margin_seconds(),
        }
    }
}

impl Default for LoggingSettings {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            format: default_log_format(),
        }
    }
}

impl Settings {
    pub fn load() -> Result<Settings, Error> {
        let settings = config::Config::builder()
            .add_source(config::File::with_name("config/adlaunch").required(false))
            .add_source(
                config::Environment::with_prefix("ADLAUNCH")
                    .separator("__")
                    .try_parsing(true)
                    .list_separator(",")
                    .with_list_parse_key("platforms.enabled"),
            )
            .build()?
            .try_deserialize()?;

        Ok(settings)
    }
}
