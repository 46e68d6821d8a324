//! Runtime configuration.
//!
//! Unlike a process-start-only config file, queuectl's configuration lives in
//! the `config` table of `queue.db` and is read live by [`crate::store::Store`]
//! on every job completion/failure decision, so `queuectl config set` takes
//! effect for jobs already enqueued without restarting any worker.

use std::collections::HashMap;

use crate::error::{Error, Result};

/// Maximum number of retries after the first attempt before a job is
/// dead-lettered.
pub const KEY_MAX_RETRIES: &str = "max-retries";

/// Base of the exponential backoff delay, in seconds: `backoff-base^attempts`.
pub const KEY_BACKOFF_BASE: &str = "backoff-base";

/// Per-job execution timeout, in seconds.
pub const KEY_JOB_TIMEOUT: &str = "job-timeout";

fn default_max_retries() -> i64 {
    3
}

fn default_backoff_base() -> i64 {
    2
}

fn default_job_timeout() -> i64 {
    300
}

/// The full set of recognized configuration keys and their defaults.
///
/// `RuntimeConfig` is a read-through view over the `config` table: callers
/// construct it from whatever rows are present, falling back to the defaults
/// below for anything unset.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RuntimeConfig {
    pub max_retries: i64,
    pub backoff_base: i64,
    pub job_timeout: i64,
}

impl Default for RuntimeConfig {
    fn default() -> Self {
        Self {
            max_retries: default_max_retries(),
            backoff_base: default_backoff_base(),
            job_timeout: default_job_timeout(),
        }
    }
}

impl RuntimeConfig {
    /// Build a `RuntimeConfig` from raw `(key, value)` rows read out of the
    /// `config` table, falling back to defaults for missing keys.
    pub fn from_rows(rows: HashMap<String, String>) -> Result<Self> {
        let mut cfg = Self::default();
        for (key, value) in rows {
            cfg.apply(&key, &value)?;
        }
        Ok(cfg)
    }

    /// Apply a single `key = value` pair, validating it against the known
    /// key set. Returns an error for unrecognized keys or unparsable values,
    /// matching the defensive-at-every-boundary rule: a malformed row
    /// written directly to `queue.db` should fail loudly rather than silently
    /// falling back to a default.
    pub fn apply(&mut self, key: &str, value: &str) -> Result<()> {
        match key {
            KEY_MAX_RETRIES => self.max_retries = parse_non_negative(key, value)?,
            KEY_BACKOFF_BASE => self.backoff_base = parse_positive(key, value)?,
            KEY_JOB_TIMEOUT => self.job_timeout = parse_positive(key, value)?,
            other => {
                return Err(Error::config(format!("unknown configuration key: {other}")));
            }
        }
        Ok(())
    }

    /// Validate that `key` is recognized and `value` parses, without
    /// mutating `self`. Used by `queuectl config set` to reject bad input
    /// before it is ever written to the store.
    pub fn validate(key: &str, value: &str) -> Result<()> {
        let mut scratch = Self::default();
        scratch.apply(key, value)
    }

    pub fn as_pairs(&self) -> [(&'static str, String); 3] {
        [
            (KEY_MAX_RETRIES, self.max_retries.to_string()),
            (KEY_BACKOFF_BASE, self.backoff_base.to_string()),
            (KEY_JOB_TIMEOUT, self.job_timeout.to_string()),
        ]
    }
}

fn parse_non_negative(key: &str, value: &str) -> Result<i64> {
    let parsed: i64 = value
        .parse()
        .map_err(|_| Error::validation(format!("{key} must be an integer, got {value:?}")))?;
    if parsed < 0 {
        return Err(Error::validation(format!("{key} must be >= 0")));
    }
    Ok(parsed)
}

fn parse_positive(key: &str, value: &str) -> Result<i64> {
    let parsed: i64 = value
        .parse()
        .map_err(|_| Error::validation(format!("{key} must be an integer, got {value:?}")))?;
    if parsed <= 0 {
        return Err(Error::validation(format!("{key} must be > 0")));
    }
    Ok(parsed)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_spec() {
        let cfg = RuntimeConfig::default();
        assert_eq!(cfg.max_retries, 3);
        assert_eq!(cfg.backoff_base, 2);
        assert_eq!(cfg.job_timeout, 300);
    }

    #[test]
    fn rejects_unknown_key() {
        assert!(RuntimeConfig::validate("nonexistent", "1").is_err());
    }

    #[test]
    fn rejects_non_positive_backoff_base() {
        assert!(RuntimeConfig::validate(KEY_BACKOFF_BASE, "0").is_err());
        assert!(RuntimeConfig::validate(KEY_BACKOFF_BASE, "-1").is_err());
    }

    #[test]
    fn accepts_zero_max_retries() {
        assert!(RuntimeConfig::validate(KEY_MAX_RETRIES, "0").is_ok());
    }

    #[test]
    fn from_rows_overrides_defaults() {
        let mut rows = HashMap::new();
        rows.insert(KEY_MAX_RETRIES.to_string(), "5".to_string());
        let cfg = RuntimeConfig::from_rows(rows).unwrap();
        assert_eq!(cfg.max_retries, 5);
        assert_eq!(cfg.backoff_base, 2);
    }
}
