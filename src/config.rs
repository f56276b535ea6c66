//! Configuration, built from environment variables.

use crate::error::ConfigError;

/// Which storage backend to open, decided once at startup.
///
/// A local libSQL file takes precedence when both are configured, matching
/// the embedded-first deployment story.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StoreConfig {
    /// Embedded libSQL database at the given file path.
    LibSql { path: String },
    /// Remote Postgres, standard connection URL.
    Postgres { url: String },
}

/// Service configuration.
#[derive(Debug, Clone)]
pub struct Config {
    /// Storage backend selection.
    pub store: StoreConfig,
    /// Default domain for aliases created without an explicit domain.
    pub default_domain: String,
    /// HTTP listen port.
    pub port: u16,
}

impl Config {
    /// Build config from environment variables.
    ///
    /// - `MAILBIN_DB_PATH` — libSQL file path (preferred when set)
    /// - `DATABASE_URL` — Postgres connection URL
    /// - `MAILBIN_DOMAIN` — default alias domain (required)
    /// - `MAILBIN_PORT` — HTTP port, default 8080
    pub fn from_env() -> Result<Self, ConfigError> {
        let store = if let Ok(path) = std::env::var("MAILBIN_DB_PATH") {
            StoreConfig::LibSql { path }
        } else if let Ok(url) = std::env::var("DATABASE_URL") {
            StoreConfig::Postgres { url }
        } else {
            return Err(ConfigError::NoDatabase);
        };

        let default_domain = std::env::var("MAILBIN_DOMAIN")
            .map_err(|_| ConfigError::MissingEnvVar("MAILBIN_DOMAIN".into()))?
            .trim()
            .to_lowercase();
        if default_domain.is_empty() {
            return Err(ConfigError::InvalidValue {
                key: "MAILBIN_DOMAIN".into(),
                message: "must not be empty".into(),
            });
        }

        let port: u16 = match std::env::var("MAILBIN_PORT") {
            Ok(s) => s.parse().map_err(|_| ConfigError::InvalidValue {
                key: "MAILBIN_PORT".into(),
                message: format!("not a valid port: {s}"),
            })?,
            Err(_) => 8080,
        };

        Ok(Self {
            store,
            default_domain,
            port,
        })
    }
}
