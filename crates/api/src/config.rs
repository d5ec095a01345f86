//! API server configuration

use brewlog_shared::DEFAULT_SHARE_EXPIRY_DAYS;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Missing required environment variable: {0}")]
    Missing(&'static str),
    #[error("Invalid value for {key}: {value}")]
    Invalid { key: &'static str, value: String },
}

#[derive(Debug, Clone)]
pub struct Config {
    pub database_url: String,
    pub max_db_connections: u32,
    pub bind_address: String,
    pub jwt_secret: String,
    pub jwt_expiry_hours: i64,
    /// CORS origins; empty means same-origin only
    pub allowed_origins: Vec<String>,
    pub share_expiry_days: i64,
    /// Base URL used when building share links
    pub public_base_url: String,
}

impl Config {
    pub fn from_env() -> Result<Self, ConfigError> {
        let jwt_secret = required("JWT_SECRET")?;
        if jwt_secret.len() < 32 {
            return Err(ConfigError::Invalid {
                key: "JWT_SECRET",
                value: "must be at least 32 characters".to_string(),
            });
        }

        Ok(Self {
            database_url: required("DATABASE_URL")?,
            max_db_connections: parsed("DATABASE_MAX_CONNECTIONS", 10)?,
            bind_address: optional("BIND_ADDRESS").unwrap_or_else(|| "0.0.0.0:8080".to_string()),
            jwt_secret,
            jwt_expiry_hours: parsed("JWT_EXPIRY_HOURS", 24)?,
            allowed_origins: optional("ALLOWED_ORIGINS")
                .map(|raw| {
                    raw.split(',')
                        .map(|o| o.trim().to_string())
                        .filter(|o| !o.is_empty())
                        .collect()
                })
                .unwrap_or_default(),
            share_expiry_days: parsed("SHARE_EXPIRY_DAYS", DEFAULT_SHARE_EXPIRY_DAYS)?,
            public_base_url: optional("PUBLIC_BASE_URL")
                .unwrap_or_else(|| "http://localhost:3000".to_string())
                .trim_end_matches('/')
                .to_string(),
        })
    }

    /// Local defaults around a given JWT secret, without touching the environment
    pub fn with_jwt_secret(jwt_secret: impl Into<String>) -> Self {
        Self {
            database_url: String::new(),
            max_db_connections: 10,
            bind_address: "127.0.0.1:8080".to_string(),
            jwt_secret: jwt_secret.into(),
            jwt_expiry_hours: 24,
            allowed_origins: Vec::new(),
            share_expiry_days: DEFAULT_SHARE_EXPIRY_DAYS,
            public_base_url: "http://localhost:3000".to_string(),
        }
    }
}

fn optional(key: &str) -> Option<String> {
    std::env::var(key).ok().filter(|v| !v.trim().is_empty())
}

fn required(key: &'static str) -> Result<String, ConfigError> {
    optional(key).ok_or(ConfigError::Missing(key))
}

fn parsed<T: std::str::FromStr>(key: &'static str, default: T) -> Result<T, ConfigError> {
    match optional(key) {
        Some(value) => value
            .trim()
            .parse()
            .map_err(|_| ConfigError::Invalid { key, value }),
        None => Ok(default),
    }
}
