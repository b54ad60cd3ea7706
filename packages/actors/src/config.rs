//! Engine configuration.

use std::time::Duration;

/// Configuration errors.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("invalid configuration: {0}")]
    Invalid(String),
}

/// Runtime settings for the supervisor and its workers.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EngineConfig {
    /// Sleep between cycles of a per-application worker.
    pub poll_interval: Duration,
    /// Start a worker over all active applications at boot.
    pub global_worker: bool,
    /// Sleep between cycles of the global worker.
    pub global_poll_interval: Duration,
    /// Claims older than this are released at boot.
    ///
    /// Boot releases matching claims across the whole store, not only those
    /// of this process. With several processes on one durable store the
    /// lease must exceed the longest handler run, or a restarting process
    /// frees a claim a live worker still holds and the job runs twice.
    pub claim_lease: Duration,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            poll_interval: Duration::from_secs(60),
            global_worker: true,
            global_poll_interval: Duration::from_secs(60),
            claim_lease: Duration::from_secs(3600),
        }
    }
}

impl EngineConfig {
    /// Read overrides from the environment:
    ///
    /// - `INTEGRATION_POLL_INTERVAL_MS`
    /// - `INTEGRATION_GLOBAL_WORKER`
    /// - `INTEGRATION_GLOBAL_POLL_INTERVAL_MS`
    /// - `INTEGRATION_CLAIM_LEASE_SECS`
    pub fn from_env() -> Result<Self, ConfigError> {
        let mut cfg = Self::default();

        if let Some(ms) = parse_u64_env("INTEGRATION_POLL_INTERVAL_MS")? {
            cfg.poll_interval = Duration::from_millis(ms);
        }
        if let Some(enabled) = parse_bool_env("INTEGRATION_GLOBAL_WORKER")? {
            cfg.global_worker = enabled;
        }
        if let Some(ms) = parse_u64_env("INTEGRATION_GLOBAL_POLL_INTERVAL_MS")? {
            cfg.global_poll_interval = Duration::from_millis(ms);
        }
        if let Some(secs) = parse_u64_env("INTEGRATION_CLAIM_LEASE_SECS")? {
            cfg.claim_lease = Duration::from_secs(secs);
        }

        if cfg.poll_interval.is_zero() || cfg.global_poll_interval.is_zero() {
            return Err(ConfigError::Invalid(
                "poll intervals must be greater than zero".into(),
            ));
        }

        Ok(cfg)
    }

    pub fn with_poll_interval(mut self, interval: Duration) -> Self {
        self.poll_interval = interval;
        self
    }

    pub fn with_global_worker(mut self, enabled: bool) -> Self {
        self.global_worker = enabled;
        self
    }

    pub fn with_global_poll_interval(mut self, interval: Duration) -> Self {
        self.global_poll_interval = interval;
        self
    }

    pub fn with_claim_lease(mut self, lease: Duration) -> Self {
        self.claim_lease = lease;
        self
    }
}

fn read_env(var_name: &str) -> Result<Option<String>, ConfigError> {
    match std::env::var(var_name) {
        Ok(v) => Ok(non_empty(v)),
        Err(std::env::VarError::NotPresent) => Ok(None),
        Err(e) => Err(ConfigError::Invalid(format!(
            "failed reading {var_name}: {e}"
        ))),
    }
}

fn non_empty(s: String) -> Option<String> {
    let trimmed = s.trim();
    if trimmed.is_empty() {
        None
    } else {
        Some(trimmed.to_string())
    }
}

fn parse_u64_env(var_name: &str) -> Result<Option<u64>, ConfigError> {
    let Some(v) = read_env(var_name)? else {
        return Ok(None);
    };

    v.parse::<u64>()
        .map(Some)
        .map_err(|_| ConfigError::Invalid(format!("{var_name} must be a whole number, got '{v}'")))
}

fn parse_bool_env(var_name: &str) -> Result<Option<bool>, ConfigError> {
    let Some(v) = read_env(var_name)? else {
        return Ok(None);
    };

    match v.to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "y" => Ok(Some(true)),
        "0" | "false" | "no" | "n" => Ok(Some(false)),
        _ => Err(ConfigError::Invalid(format!(
            "{var_name} must be a boolean, got '{v}'"
        ))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let cfg = EngineConfig::default();
        assert_eq!(cfg.poll_interval, Duration::from_secs(60));
        assert!(cfg.global_worker);
        assert_eq!(cfg.claim_lease, Duration::from_secs(3600));
    }

    #[test]
    fn test_non_empty() {
        assert_eq!(non_empty("  ".into()), None);
        assert_eq!(non_empty(" 250 ".into()).as_deref(), Some("250"));
    }

    #[test]
    fn test_builders() {
        let cfg = EngineConfig::default()
            .with_poll_interval(Duration::from_millis(50))
            .with_global_worker(false);
        assert_eq!(cfg.poll_interval, Duration::from_millis(50));
        assert!(!cfg.global_worker);
    }
}
