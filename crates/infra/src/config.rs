//! Engine configuration loading and representation.

use std::time::Duration;

/// Tuning knobs for the adjustment retry loop and transfer coordination.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EngineConfig {
    /// Compare-and-set attempts per movement before `ConcurrencyConflict`.
    pub max_attempts: u32,
    /// Deadline applied when the caller does not pass one.
    pub default_timeout: Duration,
    /// First retry backoff; doubles per attempt.
    pub backoff_base: Duration,
    /// Upper bound for a single backoff sleep.
    pub backoff_max: Duration,
    /// Attempts to reverse a transfer's outbound leg. Runs without a deadline.
    pub compensation_attempts: u32,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            max_attempts: 5,
            default_timeout: Duration::from_secs(5),
            backoff_base: Duration::from_millis(2),
            backoff_max: Duration::from_millis(50),
            compensation_attempts: 20,
        }
    }
}

impl EngineConfig {
    /// Defaults overridden by `STOCKLEDGER_*` environment variables.
    ///
    /// Unparseable or zero values are ignored with a warning.
    pub fn from_env() -> Self {
        Self::from_lookup(|name| std::env::var(name).ok())
    }

    fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        let mut config = Self::default();
        let read = |name: &str| -> Option<u64> {
            let raw = lookup(name)?;
            match raw.trim().parse::<u64>() {
                Ok(v) if v > 0 => Some(v),
                _ => {
                    tracing::warn!(var = name, value = %raw, "ignoring invalid engine setting");
                    None
                }
            }
        };

        if let Some(v) = read("STOCKLEDGER_MAX_ATTEMPTS") {
            config.max_attempts = u32::try_from(v).unwrap_or(u32::MAX);
        }
        if let Some(v) = read("STOCKLEDGER_TIMEOUT_MS") {
            config.default_timeout = Duration::from_millis(v);
        }
        if let Some(v) = read("STOCKLEDGER_BACKOFF_BASE_MS") {
            config.backoff_base = Duration::from_millis(v);
        }
        if let Some(v) = read("STOCKLEDGER_BACKOFF_MAX_MS") {
            config.backoff_max = Duration::from_millis(v);
        }
        if let Some(v) = read("STOCKLEDGER_COMPENSATION_ATTEMPTS") {
            config.compensation_attempts = u32::try_from(v).unwrap_or(u32::MAX);
        }
        config
    }

    /// Sleep before retry number `attempt` (1-based), exponential and capped.
    pub fn backoff(&self, attempt: u32) -> Duration {
        let factor = 1u32.checked_shl(attempt.saturating_sub(1)).unwrap_or(u32::MAX);
        self.backoff_base
            .checked_mul(factor)
            .unwrap_or(self.backoff_max)
            .min(self.backoff_max)
    }
}
