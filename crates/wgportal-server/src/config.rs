// Copyright (C) 2025 Joseph Sacchini
//
// This program is free software: you can redistribute it and/or modify it under
// the terms of the GNU Affero General Public License as published by the Free
// Software Foundation, version 3.
//
// This program is distributed in the hope that it will be useful, but WITHOUT
// ANY WARRANTY; without even the implied warranty of MERCHANTABILITY or FITNESS
// FOR A PARTICULAR PURPOSE. See the GNU Affero General Public License for more
// details.
//
// You should have received a copy of the GNU Affero General Public License
// along with this program. If not, see <https://www.gnu.org/licenses/>.


use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{debug, info};

pub const DEFAULT_CONFIG_PATH: &str = "/etc/wgportal/portal.toml";

pub const ENV_DATABASE_URL: &str = "WGPORTAL_DATABASE_URL";
pub const ENV_ADMIN_TOKEN: &str = "WGPORTAL_ADMIN_TOKEN";

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub bind_addr: String,
    /// Bearer token required by every API route.
    pub admin_token: String,
    /// PostgreSQL URL. Without one, state only lives in memory.
    pub database_url: Option<String>,
    pub background_interval_secs: u64,
    pub temporary_peer_ttl_secs: u64,
    pub default_listen_port: u16,
    pub default_driver_type: String,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            bind_addr: "127.0.0.1:8888".into(),
            admin_token: String::new(),
            database_url: None,
            background_interval_secs: 60,
            temporary_peer_ttl_secs: 900,
            default_listen_port: 51820,
            default_driver_type: "linux".into(),
        }
    }
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config: {0}")]
    Read(#[from] std::io::Error),

    #[error("failed to parse config: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("missing admin token (set admin_token or {ENV_ADMIN_TOKEN})")]
    MissingAdminToken,

    #[error("background interval must be at least one second")]
    InvalidInterval,
}

pub async fn load(path: &Path) -> Result<Config, ConfigError> {
    debug!(path = %path.display(), "loading config");

    match tokio::fs::read_to_string(path).await {
        Ok(contents) => {
            let config: Config = toml::from_str(&contents)?;
            info!(
                path = %path.display(),
                bind_addr = %config.bind_addr,
                database = config.database_url.is_some(),
                "loaded config"
            );
            Ok(config)
        }
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
            info!(path = %path.display(), "config file not found, using defaults");
            Ok(Config::default())
        }
        Err(e) => Err(ConfigError::Read(e)),
    }
}

impl Config {
    /// Apply overrides from the process environment.
    pub fn apply_env(&mut self) {
        self.apply_overrides(|var| std::env::var(var).ok());
    }

    pub fn apply_overrides(&mut self, lookup: impl Fn(&str) -> Option<String>) {
        if let Some(url) = lookup(ENV_DATABASE_URL).filter(|v| !v.trim().is_empty()) {
            debug!("database url taken from environment");
            self.database_url = Some(url);
        }
        if let Some(token) = lookup(ENV_ADMIN_TOKEN).filter(|v| !v.trim().is_empty()) {
            debug!("admin token taken from environment");
            self.admin_token = token;
        }
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.admin_token.trim().is_empty() {
            return Err(ConfigError::MissingAdminToken);
        }
        if self.background_interval_secs == 0 {
            return Err(ConfigError::InvalidInterval);
        }
        Ok(())
    }

    pub fn background_interval(&self) -> Duration {
        Duration::from_secs(self.background_interval_secs)
    }

    pub fn temporary_peer_ttl(&self) -> chrono::Duration {
        chrono::Duration::seconds(i64::try_from(self.temporary_peer_ttl_secs).unwrap_or(i64::MAX))
    }
}
