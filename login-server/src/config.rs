use std::path::Path;

use serde::Deserialize;

use crate::error::ServerError;

fn default_host() -> String {
    "0.0.0.0".to_string()
}

fn default_port() -> u16 {
    7171
}

fn default_version_min() -> u16 {
    0x0200
}

fn default_version_str() -> String {
    "1.0".to_string()
}

fn default_motd_number() -> u32 {
    1
}

fn default_motd_message() -> String {
    "Welcome.".to_string()
}

fn default_redis_host() -> String {
    "127.0.0.1".to_string()
}

fn default_redis_port() -> u16 {
    6379
}

fn default_redis_channel() -> String {
    "login".to_string()
}

fn default_key_path() -> String {
    "key.pem".to_string()
}

fn default_modules_path() -> String {
    "modules".to_string()
}

fn default_log_level() -> String {
    "info".to_string()
}

/// Root configuration table. Field names mirror the keys referenced by
/// the original Lua config table; MySQL fields are carried even though
/// this crate treats the account database as an external collaborator,
/// so a real `AccountStore` implementation can be configured from the
/// same file.
#[derive(Debug, Clone, Deserialize)]
pub struct ServerConfig {
    #[serde(default = "default_host")]
    pub host: String,
    #[serde(default = "default_port")]
    pub port: u16,

    #[serde(default)]
    pub mysql_host: String,
    #[serde(default)]
    pub mysql_user: String,
    #[serde(default)]
    pub mysql_pass: String,
    #[serde(default)]
    pub mysql_database: String,
    #[serde(default)]
    pub mysql_port: u16,
    #[serde(default)]
    pub mysql_sock: String,

    #[serde(default)]
    pub encryption_salt: String,
    #[serde(default = "default_version_min")]
    pub version_min: u16,
    #[serde(default = "default_version_str")]
    pub version_str: String,

    #[serde(default = "default_motd_number")]
    pub motd_number: u32,
    #[serde(default = "default_motd_message")]
    pub motd_message: String,

    #[serde(default = "default_redis_host")]
    pub redis_host: String,
    #[serde(default = "default_redis_port")]
    pub redis_port: u16,
    #[serde(default = "default_redis_channel")]
    pub redis_channel: String,

    #[serde(default = "default_key_path")]
    pub key_path: String,
    #[serde(default = "default_modules_path")]
    pub modules_path: String,

    #[serde(default = "default_log_level")]
    pub log_level: String,
}

impl ServerConfig {
    pub fn load(path: &Path) -> Result<Self, ServerError> {
        serdeconv::from_toml_file(path).map_err(|e| ServerError::Config(e.to_string()))
    }
}
