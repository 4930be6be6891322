use std::str::FromStr;
use std::time::Duration;

use thiserror::Error;

#[derive(Error, Debug, PartialEq)]
pub enum ConfigError {
    #[error("Missing required variable {0}")]
    Missing(&'static str),

    #[error("Invalid value for {key}: {value:?}")]
    Invalid { key: &'static str, value: String },
}

#[derive(Debug, Clone)]
pub struct Config {
    // mandatory fields
    pub database_url: String,
    pub jwt_secret: String,
    // optional fields
    pub max_connections: u32,
    pub port: u16,
    pub log_dir: String,
    pub log_file: String,
    pub jwt_issuer: String,
    pub access_token_ttl: Duration,
    pub refresh_token_ttl: Duration,
    /// Upper bound on one transfer's atomic scope, lock waits included.
    pub transfer_timeout: Duration,
    pub body_limit: usize,
}

impl Config {
    /// Load from the process environment, after applying a `.env` file if present.
    pub fn from_env() -> Result<Self, ConfigError> {
        dotenv::dotenv().ok();
        Self::from_lookup(|key| dotenv::var(key).ok())
    }

    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&'static str) -> Option<String>,
    {
        let database_url = lookup("DATABASE_URL").ok_or(ConfigError::Missing("DATABASE_URL"))?;

        Ok(Self {
            database_url,
            jwt_secret: lookup("JWT_SECRET").unwrap_or_else(|| "your-jwt-secret".to_string()),
            max_connections: parse_or(&lookup, "MAX_CONNECTION_POOLING", 5)?,
            port: parse_or(&lookup, "PORT", 3000)?,
            log_dir: lookup("LOG_DIR").unwrap_or_else(|| ".".to_string()),
            log_file: lookup("LOG_FILE").unwrap_or_else(|| "app.log".to_string()),
            jwt_issuer: lookup("JWT_ISSUER").unwrap_or_else(|| "ledger-service".to_string()),
            access_token_ttl: Duration::from_secs(parse_or(
                &lookup,
                "JWT_ACCESS_TOKEN_EXPIRY_SECS",
                15 * 60,
            )?),
            refresh_token_ttl: Duration::from_secs(parse_or(
                &lookup,
                "JWT_REFRESH_TOKEN_EXPIRY_SECS",
                7 * 24 * 60 * 60,
            )?),
            transfer_timeout: Duration::from_millis(parse_or(&lookup, "TRANSFER_TIMEOUT_MS", 5_000)?),
            body_limit: parse_or(&lookup, "BODY_LIMIT_BYTES", 1024 * 1024)?,
        })
    }
}

fn parse_or<F, T>(lookup: &F, key: &'static str, default: T) -> Result<T, ConfigError>
where
    F: Fn(&'static str) -> Option<String>,
    T: FromStr,
{
    match lookup(key) {
        Some(value) => value
            .trim()
            .parse()
            .map_err(|_| ConfigError::Invalid { key, value }),
        None => Ok(default),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn config_from(pairs: &[(&'static str, &str)]) -> Result<Config, ConfigError> {
        let vars: HashMap<&'static str, String> =
            pairs.iter().map(|(k, v)| (*k, v.to_string())).collect();
        Config::from_lookup(|key| vars.get(key).cloned())
    }

    #[test]
    fn defaults_apply() {
        let config = config_from(&[("DATABASE_URL", "postgres://localhost/ledger")]).unwrap();
        assert_eq!(config.port, 3000);
        assert_eq!(config.max_connections, 5);
        assert_eq!(config.transfer_timeout, Duration::from_secs(5));
        assert_eq!(config.access_token_ttl, Duration::from_secs(900));
        assert_eq!(config.log_file, "app.log");
    }

    #[test]
    fn database_url_is_required() {
        assert_eq!(config_from(&[]).unwrap_err(), ConfigError::Missing("DATABASE_URL"));
    }

    #[test]
    fn overrides_and_bad_numbers() {
        let config = config_from(&[
            ("DATABASE_URL", "postgres://db/ledger"),
            ("PORT", "8080"),
            ("TRANSFER_TIMEOUT_MS", "250"),
        ])
        .unwrap();
        assert_eq!(config.port, 8080);
        assert_eq!(config.transfer_timeout, Duration::from_millis(250));

        let err = config_from(&[("DATABASE_URL", "postgres://db/ledger"), ("PORT", "eighty")])
            .unwrap_err();
        assert_eq!(
            err,
            ConfigError::Invalid {
                key: "PORT",
                value: "eighty".to_string()
            }
        );
    }
}
