use std::collections::HashMap;
use std::time::Duration;

use thiserror::Error;

use crate::identity::iap::DEFAULT_KEYS_URL;

#[derive(Error, Debug, PartialEq)]
pub enum ConfigError {
    #[error("{name} has an invalid value: {value:?}")]
    Invalid { name: &'static str, value: String },
    #[error("AUTH_MODE must be \"iap\" or \"trusted-header\", got {0:?}")]
    UnknownAuthMode(String),
    #[error("IAP_AUDIENCE must be set when AUTH_MODE=iap")]
    MissingAudience,
    #[error("failed to build IAP key client: {0}")]
    HttpClient(String),
}

/// How request identity is established.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AuthMode {
    /// Only IAP-signed assertions are accepted.
    Iap,
    /// The `x-user-email` header is trusted when no assertion is sent.
    /// Never enable this behind a public endpoint.
    TrustedHeader,
}

#[derive(Debug, Clone)]
pub struct DatabaseConfig {
    /// Full connection URL; takes precedence over the individual parts.
    pub url: Option<String>,
    pub host: String,
    pub port: u16,
    pub user: String,
    pub password: String,
    pub name: String,
    pub max_connections: u32,
}

#[derive(Debug, Clone)]
pub struct AuthConfig {
    pub mode: AuthMode,
    pub iap_audience: Option<String>,
    pub iap_keys_url: String,
    pub iap_keys_ttl: Duration,
}

#[derive(Debug, Clone)]
pub struct Config {
    pub port: u16,
    pub database: DatabaseConfig,
    pub auth: AuthConfig,
}

impl Config {
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_vars(std::env::vars())
    }

    pub fn from_vars<I>(vars: I) -> Result<Self, ConfigError>
    where
        I: IntoIterator<Item = (String, String)>,
    {
        let vars: HashMap<String, String> = vars
            .into_iter()
            .filter(|(_, value)| !value.trim().is_empty())
            .collect();
        let text = |name: &str, default: &str| {
            vars.get(name).cloned().unwrap_or_else(|| default.to_string())
        };

        let database = DatabaseConfig {
            url: vars.get("DATABASE_URL").cloned(),
            host: text("DB_HOST", "localhost"),
            port: parse(&vars, "DB_PORT", 5432)?,
            user: text("DB_USER", "user"),
            password: text("DB_PASSWORD", "password"),
            name: text("DB_NAME", "todo_db"),
            max_connections: parse(&vars, "DB_MAX_CONNECTIONS", 10)?,
        };

        let mode = match vars.get("AUTH_MODE").map(|m| m.trim().to_ascii_lowercase()) {
            None => AuthMode::Iap,
            Some(m) if m == "iap" => AuthMode::Iap,
            Some(m) if m == "trusted-header" => AuthMode::TrustedHeader,
            Some(m) => return Err(ConfigError::UnknownAuthMode(m)),
        };
        let iap_audience = vars.get("IAP_AUDIENCE").cloned();
        if mode == AuthMode::Iap && iap_audience.is_none() {
            return Err(ConfigError::MissingAudience);
        }

        Ok(Config {
            port: parse(&vars, "PORT", 3000)?,
            database,
            auth: AuthConfig {
                mode,
                iap_audience,
                iap_keys_url: text("IAP_KEYS_URL", DEFAULT_KEYS_URL),
                iap_keys_ttl: Duration::from_secs(parse(&vars, "IAP_KEYS_TTL_SECS", 3600)?),
            },
        })
    }
}

fn parse<T: std::str::FromStr>(
    vars: &HashMap<String, String>,
    name: &'static str,
    default: T,
) -> Result<T, ConfigError> {
    match vars.get(name) {
        None => Ok(default),
        Some(value) => value.trim().parse().map_err(|_| ConfigError::Invalid {
            name,
            value: value.clone(),
        }),
    }
}
