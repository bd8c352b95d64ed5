//! Configuration types and loading
//!
//! Config path precedence: `--config` > `CONFIG_PATH` env > `admin-session.toml`.
//! The login password is loaded from the ADMIN_PASSWORD env var or
//! `password_file`, never from the TOML itself.

use common::Secret;
use serde::Deserialize;
use std::path::{Path, PathBuf};

/// Root configuration
#[derive(Debug, Deserialize)]
pub struct Config {
    pub api: ApiConfig,
    #[serde(default)]
    pub storage: StorageConfig,
    #[serde(default)]
    pub login: LoginConfig,
}

/// Remote admin API
#[derive(Debug, Deserialize)]
pub struct ApiConfig {
    /// Base URL every endpoint path is appended to, e.g. `https://host/api`
    pub base_url: String,
    #[serde(default = "default_timeout")]
    pub timeout_secs: u64,
}

/// Where the session material is persisted between invocations
#[derive(Debug, Deserialize)]
pub struct StorageConfig {
    #[serde(default = "default_credentials_path")]
    pub credentials_path: PathBuf,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            credentials_path: default_credentials_path(),
        }
    }
}

/// Identity used by the `login` command
#[derive(Debug, Default, Deserialize)]
pub struct LoginConfig {
    #[serde(default)]
    pub email: Option<String>,
    #[serde(skip)]
    pub password: Option<Secret<String>>,
    #[serde(default)]
    pub password_file: Option<PathBuf>,
}

fn default_timeout() -> u64 {
    30
}

fn default_credentials_path() -> PathBuf {
    PathBuf::from("admin-session.credentials.json")
}

impl Config {
    /// Load configuration from a TOML file, then resolve the password.
    ///
    /// Password resolution order:
    /// 1. ADMIN_PASSWORD env var
    /// 2. password_file path from config
    pub fn load(path: &Path) -> common::Result<Self> {
        let contents = std::fs::read_to_string(path)?;
        let mut config: Config = toml::from_str(&contents)?;

        if !config.api.base_url.starts_with("http://") && !config.api.base_url.starts_with("https://")
        {
            return Err(common::Error::Config(format!(
                "base_url must start with http:// or https://, got: {}",
                config.api.base_url
            )));
        }

        if config.api.timeout_secs == 0 {
            return Err(common::Error::Config(
                "timeout_secs must be greater than 0".into(),
            ));
        }

        if let Ok(password) = std::env::var("ADMIN_PASSWORD") {
            config.login.password = Some(Secret::new(password));
        } else if let Some(ref password_file) = config.login.password_file {
            let password = std::fs::read_to_string(password_file).map_err(|e| {
                common::Error::Config(format!(
                    "failed to read password_file {}: {e}",
                    password_file.display()
                ))
            })?;
            let password = password.trim().to_owned();
            if !password.is_empty() {
                config.login.password = Some(Secret::new(password));
            }
        }

        Ok(config)
    }

    /// Resolve config file path from CLI arg or CONFIG_PATH env var.
    pub fn resolve_path(cli_path: Option<&str>) -> PathBuf {
        if let Some(p) = cli_path {
            return PathBuf::from(p);
        }
        if let Ok(p) = std::env::var("CONFIG_PATH") {
            return PathBuf::from(p);
        }
        PathBuf::from("admin-session.toml")
    }
}
