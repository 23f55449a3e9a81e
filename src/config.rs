use std::env;
use std::time::Duration;

use thiserror::Error;

use crate::instant::MissingProductPolicy;
use crate::store::MergeScope;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("{0} must be set")]
    Missing(&'static str),

    #[error("invalid value for {name}: {reason}")]
    Invalid { name: &'static str, reason: String },
}

#[derive(Debug, Clone)]
pub struct Config {
    pub database_url: String,
    pub database_name: String,
    pub jwt_secret: String,
    pub bind_addr: String,
    /// Budget for all store calls made by one request.
    pub operation_timeout: Duration,
    /// Attempts for idempotent reads (catalog lookup, cart snapshot).
    pub read_attempts: u32,
    pub merge_scope: MergeScope,
    pub missing_product: MissingProductPolicy,
}

impl Config {
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| env::var(key).ok())
    }

    fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
        let required = |name: &'static str| lookup(name).ok_or(ConfigError::Missing(name));
        let timeout_secs: u64 = parse_or(&lookup, "OPERATION_TIMEOUT_SECS", 100)?;

        Ok(Config {
            database_url: required("DATABASE_URL")?,
            database_name: lookup("DATABASE_NAME").unwrap_or_else(|| "Ecommerce".into()),
            jwt_secret: required("JWT_SECRET")?,
            bind_addr: lookup("BIND_ADDR").unwrap_or_else(|| "127.0.0.1:8080".into()),
            operation_timeout: Duration::from_secs(timeout_secs),
            read_attempts: parse_or(&lookup, "READ_ATTEMPTS", 2)?,
            merge_scope: parse_or(&lookup, "ORDER_HISTORY_MERGE", MergeScope::default())?,
            missing_product: parse_or(
                &lookup,
                "INSTANT_BUY_MISSING_PRODUCT",
                MissingProductPolicy::default(),
            )?,
        })
    }
}

fn parse_or<T>(
    lookup: &impl Fn(&str) -> Option<String>,
    name: &'static str,
    default: T,
) -> Result<T, ConfigError>
where
    T: std::str::FromStr,
    T::Err: std::fmt::Display,
{
    match lookup(name) {
        None => Ok(default),
        Some(raw) => raw.trim().parse().map_err(|err: T::Err| ConfigError::Invalid {
            name,
            reason: err.to_string(),
        }),
    }
}
