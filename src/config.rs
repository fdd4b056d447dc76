// src/config.rs
//! Runtime settings.
//!
//! Settings come from built-in defaults overridden by `VASPDIR_*` environment
//! variables (a `.env` file is loaded first by `main`). Nested keys use a
//! double underscore, e.g. `VASPDIR_CA__CERT_PATH` or
//! `VASPDIR_AUTHORITY__USERNAME`.

use crate::authority::endpoints::DEFAULT_BASE_URL;
use crate::error::{Error, Result};
use config::{Config, Environment};
use serde::Deserialize;
use std::net::SocketAddr;
use std::path::PathBuf;
use std::time::Duration;

pub const ENV_PREFIX: &str = "VASPDIR";

#[derive(Debug, Clone, Deserialize)]
pub struct Settings {
    pub bind_addr: String,

    /// Store connection string, see [`crate::storage::open`].
    pub database: String,

    pub request_timeout_secs: u64,
    pub ca: CaSettings,
    pub authority: AuthoritySettings,
}

#[derive(Debug, Clone, Deserialize)]
pub struct CaSettings {
    pub cert_path: PathBuf,
    pub key_path: PathBuf,

    /// Generate a root certificate authority when the files are missing.
    pub init: bool,
}

/// Credentials for the external authority. Blank values fall back to the
/// `AUTHORITY_USERNAME` / `AUTHORITY_PASSWORD` variables, then to the cache.
#[derive(Debug, Clone, Deserialize)]
pub struct AuthoritySettings {
    pub base_url: String,
    pub username: String,
    pub password: String,
}

impl Settings {
    /// Loads settings from the process environment.
    pub fn load() -> Result<Self> {
        Self::from_source(environment())
    }

    fn from_source(source: Environment) -> Result<Self> {
        let settings: Settings = Config::builder()
            .set_default("bind_addr", "127.0.0.1:4433")?
            .set_default("database", "")?
            .set_default("request_timeout_secs", 10_i64)?
            .set_default("ca.cert_path", "fixtures/certs/ca.crt")?
            .set_default("ca.key_path", "fixtures/certs/ca.key")?
            .set_default("ca.init", false)?
            .set_default("authority.base_url", DEFAULT_BASE_URL)?
            .set_default("authority.username", "")?
            .set_default("authority.password", "")?
            .add_source(source)
            .build()?
            .try_deserialize()?;

        if settings.database.trim().is_empty() {
            return Err(Error::Configuration(format!(
                "{}_DATABASE must be set",
                ENV_PREFIX
            )));
        }
        Ok(settings)
    }

    pub fn bind_addr(&self) -> Result<SocketAddr> {
        self.bind_addr.parse().map_err(|e| {
            Error::Configuration(format!("invalid bind address {:?}: {}", self.bind_addr, e))
        })
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }
}

fn environment() -> Environment {
    Environment::with_prefix(ENV_PREFIX)
        .prefix_separator("_")
        .separator("__")
        .try_parsing(true)
}
