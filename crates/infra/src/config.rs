//! Runtime options, read from environment variables with defaults.

use std::time::Duration;

use thiserror::Error;

use crate::retry::RetryPolicy;

pub const ENV_SAFE_WINDOW_MS: &str = "SEKIBAN_SAFE_WINDOW_MS";
pub const ENV_MULTI_PERSIST_INTERVAL_MS: &str = "SEKIBAN_MULTI_PERSIST_INTERVAL_MS";
pub const ENV_AGGREGATE_PERSIST_INTERVAL_MS: &str = "SEKIBAN_AGGREGATE_PERSIST_INTERVAL_MS";
pub const ENV_RETRY_MAX_ATTEMPTS: &str = "SEKIBAN_RETRY_MAX_ATTEMPTS";
pub const ENV_RETRY_BACKOFF_MS: &str = "SEKIBAN_RETRY_BACKOFF_MS";
pub const ENV_CATCH_UP_BATCH_SIZE: &str = "SEKIBAN_CATCH_UP_BATCH_SIZE";

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ConfigError {
    #[error("{name} must be a positive integer, got '{value}'")]
    InvalidNumber { name: &'static str, value: String },
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SekibanOptions {
    /// Events younger than this are unsafe (may still be overtaken by late writes).
    pub safe_window: Duration,
    pub multi_projection_persist_interval: Duration,
    pub aggregate_persist_interval: Duration,
    pub retry: RetryPolicy,
    pub catch_up_batch_size: usize,
}

impl Default for SekibanOptions {
    fn default() -> Self {
        Self {
            safe_window: Duration::from_secs(7),
            multi_projection_persist_interval: Duration::from_secs(300),
            aggregate_persist_interval: Duration::from_secs(10),
            retry: RetryPolicy::default(),
            catch_up_batch_size: 1000,
        }
    }
}

impl SekibanOptions {
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|name| std::env::var(name).ok())
    }

    /// Build options from an arbitrary variable source; unset variables keep their default.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let mut options = Self::default();
        let read = |name: &'static str| -> Result<Option<u64>, ConfigError> {
            match lookup(name) {
                None => Ok(None),
                Some(raw) => match raw.trim().parse::<u64>() {
                    Ok(n) if n > 0 => Ok(Some(n)),
                    _ => Err(ConfigError::InvalidNumber { name, value: raw }),
                },
            }
        };

        if let Some(ms) = read(ENV_SAFE_WINDOW_MS)? {
            options.safe_window = Duration::from_millis(ms);
        }
        if let Some(ms) = read(ENV_MULTI_PERSIST_INTERVAL_MS)? {
            options.multi_projection_persist_interval = Duration::from_millis(ms);
        }
        if let Some(ms) = read(ENV_AGGREGATE_PERSIST_INTERVAL_MS)? {
            options.aggregate_persist_interval = Duration::from_millis(ms);
        }
        if let Some(n) = read(ENV_RETRY_MAX_ATTEMPTS)? {
            options.retry.max_attempts = u32::try_from(n).map_err(|_| ConfigError::InvalidNumber {
                name: ENV_RETRY_MAX_ATTEMPTS,
                value: n.to_string(),
            })?;
        }
        if let Some(ms) = read(ENV_RETRY_BACKOFF_MS)? {
            options.retry.base_backoff = Duration::from_millis(ms);
        }
        if let Some(n) = read(ENV_CATCH_UP_BATCH_SIZE)? {
            options.catch_up_batch_size = usize::try_from(n).map_err(|_| ConfigError::InvalidNumber {
                name: ENV_CATCH_UP_BATCH_SIZE,
                value: n.to_string(),
            })?;
        }

        Ok(options)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn lookup(vars: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let vars: HashMap<String, String> = vars
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |name| vars.get(name).cloned()
    }

    #[test]
    fn unset_variables_keep_defaults() {
        let options = SekibanOptions::from_lookup(lookup(&[])).unwrap();
        assert_eq!(options, SekibanOptions::default());
        assert_eq!(options.safe_window, Duration::from_secs(7));
        assert_eq!(options.retry.max_attempts, 3);
    }

    #[test]
    fn overrides_are_applied() {
        let options = SekibanOptions::from_lookup(lookup(&[
            (ENV_SAFE_WINDOW_MS, "2500"),
            (ENV_RETRY_MAX_ATTEMPTS, "5"),
            (ENV_CATCH_UP_BATCH_SIZE, " 10 "),
        ]))
        .unwrap();

        assert_eq!(options.safe_window, Duration::from_millis(2500));
        assert_eq!(options.retry.max_attempts, 5);
        assert_eq!(options.catch_up_batch_size, 10);
        assert_eq!(options.aggregate_persist_interval, Duration::from_secs(10));
    }

    #[test]
    fn zero_and_garbage_are_rejected() {
        let err = SekibanOptions::from_lookup(lookup(&[(ENV_SAFE_WINDOW_MS, "0")])).unwrap_err();
        assert_eq!(
            err,
            ConfigError::InvalidNumber {
                name: ENV_SAFE_WINDOW_MS,
                value: "0".to_string()
            }
        );

        assert!(SekibanOptions::from_lookup(lookup(&[(ENV_RETRY_BACKOFF_MS, "fast")])).is_err());
    }
}
