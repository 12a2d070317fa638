//! Process configuration for Pharos

use config::Config;
use serde::Deserialize;
use std::fmt::{Display, Formatter, Result as FmtResult};
use thiserror::Error;

pub const CONFIG_KEY_NODE_ENV: &str = "node_env";
pub const CONFIG_KEY_DB_HOST: &str = "db_host";
pub const CONFIG_KEY_DB_EMAIL: &str = "db_email";
pub const CONFIG_KEY_DB_PASSWORD: &str = "db_password";
pub const CONFIG_KEY_MAINNET_CHAIN_INDEX_BASE_URL: &str = "mainnet_chain_index_base_url";
pub const CONFIG_KEY_PREVIEW_CHAIN_INDEX_BASE_URL: &str = "preview_chain_index_base_url";
pub const CONFIG_KEY_DISCORD_WEBHOOK_URL: &str = "discord_webhook_url";
pub const CONFIG_KEY_PRIMARY_ARWEAVE_ENDPOINT: &str = "primary_arweave_endpoint";
pub const CONFIG_KEY_SECONDARY_ARWEAVE_ENDPOINT: &str = "secondary_arweave_endpoint";

#[derive(Debug, Error)]
pub enum ConfigurationError {
    #[error("missing required environment value: {0}")]
    Missing(&'static str),

    #[error("NODE_ENV value not understood: {0}")]
    InvalidMode(String),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EnvironmentMode {
    Development,
    Production,
    Test,
}

impl EnvironmentMode {
    pub fn is_development(&self) -> bool {
        matches!(self, EnvironmentMode::Development)
    }

    pub fn is_production(&self) -> bool {
        matches!(self, EnvironmentMode::Production)
    }

    pub fn is_test(&self) -> bool {
        matches!(self, EnvironmentMode::Test)
    }
}

impl Display for EnvironmentMode {
    fn fmt(&self, f: &mut Formatter<'_>) -> FmtResult {
        match self {
            EnvironmentMode::Development => write!(f, "development"),
            EnvironmentMode::Production => write!(f, "production"),
            EnvironmentMode::Test => write!(f, "test"),
        }
    }
}

/// The required process environment. Any missing value is fatal at startup.
#[derive(Debug, Clone)]
pub struct EnvironmentConfig {
    pub mode: EnvironmentMode,
    pub db_host: String,
    pub db_email: String,
    pub db_password: String,
    pub mainnet_chain_index_base_url: String,
    pub preview_chain_index_base_url: String,
    pub discord_webhook_url: String,
    pub primary_arweave_endpoint: String,
    pub secondary_arweave_endpoint: String,
}

impl EnvironmentConfig {
    pub fn from_config(config: &Config) -> Result<Self, ConfigurationError> {
        let mode_raw = required(config, CONFIG_KEY_NODE_ENV)?;
        let mode = match mode_raw.as_str() {
            "development" => EnvironmentMode::Development,
            "production" => EnvironmentMode::Production,
            "test" => EnvironmentMode::Test,
            other => return Err(ConfigurationError::InvalidMode(other.to_string())),
        };

        Ok(Self {
            mode,
            db_host: required(config, CONFIG_KEY_DB_HOST)?,
            db_email: required(config, CONFIG_KEY_DB_EMAIL)?,
            db_password: required(config, CONFIG_KEY_DB_PASSWORD)?,
            mainnet_chain_index_base_url: required(
                config,
                CONFIG_KEY_MAINNET_CHAIN_INDEX_BASE_URL,
            )?,
            preview_chain_index_base_url: required(
                config,
                CONFIG_KEY_PREVIEW_CHAIN_INDEX_BASE_URL,
            )?,
            discord_webhook_url: required(config, CONFIG_KEY_DISCORD_WEBHOOK_URL)?,
            primary_arweave_endpoint: required(config, CONFIG_KEY_PRIMARY_ARWEAVE_ENDPOINT)?,
            secondary_arweave_endpoint: required(config, CONFIG_KEY_SECONDARY_ARWEAVE_ENDPOINT)?,
        })
    }

    /// Chain-index base URL for a network, by display name
    pub fn chain_index_base_url(&self, network_name: &str) -> Option<&str> {
        match network_name {
            "Mainnet" => Some(&self.mainnet_chain_index_base_url),
            "Preview" => Some(&self.preview_chain_index_base_url),
            _ => None,
        }
    }
}

fn required(config: &Config, key: &'static str) -> Result<String, ConfigurationError> {
    match config.get_string(key) {
        Ok(value) if !value.is_empty() => Ok(value),
        _ => Err(ConfigurationError::Missing(key)),
    }
}
