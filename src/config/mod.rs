//! Typed configuration from environment variables.
//!
//! Loads once at startup, fails fast if required vars are missing or
//! malformed. Sensitive values wrapped in secrecy::SecretString to prevent
//! log leaks.

pub mod secrets;

use crate::engine::SchedulerConfig;
use crate::error::{Error, Result};
use crate::model::{FailurePolicy, MAX_CHAIN_LEN};
use secrecy::SecretString;
use std::time::Duration;

#[derive(Debug)]
pub struct Config {
    pub database_url: SecretString,
    pub otel_endpoint: Option<String>,
    pub log_level: String,
    pub chain_key: String,
    pub max_items: usize,
    pub failure_policy: FailurePolicy,
    pub callback_timeout: Option<Duration>,
}

impl Config {
    /// Load configuration from environment variables.
    ///
    /// In local dev, call `dotenvy::dotenv().ok()` before this.
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|name| std::env::var(name).ok())
    }

    /// Load configuration through `lookup`, which maps a variable name to
    /// its value.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self> {
        let database_url = lookup("DATABASE_URL").ok_or_else(|| {
            Error::Config("required environment variable DATABASE_URL is not set".to_string())
        })?;

        let max_items = match lookup("CHAIN_MAX_ITEMS") {
            Some(raw) => {
                let n: usize = parse_var("CHAIN_MAX_ITEMS", &raw)?;
                if n > MAX_CHAIN_LEN {
                    return Err(Error::Config(format!(
                        "CHAIN_MAX_ITEMS={n} exceeds the limit of {MAX_CHAIN_LEN}"
                    )));
                }
                n
            }
            None => MAX_CHAIN_LEN,
        };

        let failure_policy = match lookup("CHAIN_FAILURE_POLICY") {
            Some(raw) => raw.parse()?,
            None => FailurePolicy::default(),
        };

        let callback_timeout = lookup("CHAIN_CALLBACK_TIMEOUT_SECS")
            .map(|raw| parse_var::<u64>("CHAIN_CALLBACK_TIMEOUT_SECS", &raw))
            .transpose()?
            .map(Duration::from_secs);

        Ok(Self {
            database_url: SecretString::from(database_url),
            otel_endpoint: lookup("OTEL_ENDPOINT"),
            log_level: lookup("LOG_LEVEL").unwrap_or_else(|| "info".to_string()),
            chain_key: lookup("CHAIN_KEY").unwrap_or_else(|| "default".to_string()),
            max_items,
            failure_policy,
            callback_timeout,
        })
    }

    /// Scheduler settings derived from this config.
    pub fn scheduler_config(&self) -> SchedulerConfig {
        SchedulerConfig {
            chain_key: self.chain_key.clone(),
            max_items: self.max_items,
            failure_policy: self.failure_policy,
            callback_timeout: self.callback_timeout,
        }
    }
}

fn parse_var<T: std::str::FromStr>(name: &str, raw: &str) -> Result<T>
where
    T::Err: std::fmt::Display,
{
    raw.trim()
        .parse()
        .map_err(|e| Error::Config(format!("{name}={raw:?} is invalid: {e}")))
}
