use std::env;
use std::num::NonZeroUsize;
use std::thread;

use strata_result::{Error, Result};
use strata_table::StorageConfig;

/// Overrides the worker thread count.
pub const THREADS_ENV: &str = "STRATA_THREADS";
/// `1`/`true` hands out one vector per parallel scan morsel.
pub const FORCE_PARALLELISM_ENV: &str = "STRATA_FORCE_PARALLELISM";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EngineConfig {
    /// Scheduler worker threads. Zero is allowed: queries then run on the
    /// calling thread only.
    pub threads: usize,
    pub storage: StorageConfig,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            threads: thread::available_parallelism().map_or(1, NonZeroUsize::get),
            storage: StorageConfig::default(),
        }
    }
}

impl EngineConfig {
    /// Defaults with `STRATA_THREADS` and `STRATA_FORCE_PARALLELISM` applied.
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|key| env::var(key).ok())
    }

    fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self> {
        let mut config = Self::default();
        if let Some(raw) = lookup(THREADS_ENV) {
            config.threads = raw.trim().parse().map_err(|_| {
                Error::InvalidArgumentError(format!("{THREADS_ENV} must be a thread count, got {raw:?}"))
            })?;
        }
        if let Some(raw) = lookup(FORCE_PARALLELISM_ENV) {
            config.storage.force_parallelism = match raw.trim().to_ascii_lowercase().as_str() {
                "1" | "true" | "yes" | "on" => true,
                "0" | "false" | "no" | "off" | "" => false,
                _ => {
                    return Err(Error::InvalidArgumentError(format!(
                        "{FORCE_PARALLELISM_ENV} must be a boolean, got {raw:?}"
                    )));
                }
            };
        }
        Ok(config)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn lookup<'a>(pairs: &'a [(&'a str, &'a str)]) -> impl Fn(&str) -> Option<String> + 'a {
        move |key| {
            pairs
                .iter()
                .find(|(k, _)| *k == key)
                .map(|(_, v)| v.to_string())
        }
    }

    #[test]
    fn overrides_apply() {
        let config =
            EngineConfig::from_lookup(lookup(&[(THREADS_ENV, " 3 "), (FORCE_PARALLELISM_ENV, "ON")]))
                .unwrap();
        assert_eq!(config.threads, 3);
        assert!(config.storage.force_parallelism);
        assert_eq!(config.storage.segment_vectors, StorageConfig::default().segment_vectors);
    }

    #[test]
    fn missing_variables_keep_defaults() {
        let config = EngineConfig::from_lookup(lookup(&[])).unwrap();
        assert_eq!(config, EngineConfig::default());
        assert!(config.threads >= 1);
    }

    #[test]
    fn malformed_values_are_rejected() {
        assert!(EngineConfig::from_lookup(lookup(&[(THREADS_ENV, "many")])).is_err());
        assert!(EngineConfig::from_lookup(lookup(&[(FORCE_PARALLELISM_ENV, "maybe")])).is_err());
    }
}
