//! Engine configuration.

use std::path::PathBuf;
use std::time::Duration;

/// Default number of assertions evaluated concurrently per test.
pub const DEFAULT_MAX_CONCURRENCY: usize = 3;

/// Default webhook request timeout.
pub const DEFAULT_WEBHOOK_TIMEOUT: Duration = Duration::from_secs(5);

/// Configuration for the assertion engine.
#[derive(Debug, Clone)]
pub struct EngineConfig {
    /// Directory `file://` assertion values resolve against.
    pub base_path: PathBuf,

    /// Maximum assertions in flight per test case.
    pub max_concurrency: usize,

    /// Timeout for a single webhook request.
    pub webhook_timeout: Duration,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            base_path: PathBuf::from("."),
            max_concurrency: DEFAULT_MAX_CONCURRENCY,
            webhook_timeout: DEFAULT_WEBHOOK_TIMEOUT,
        }
    }
}

impl EngineConfig {
    /// Default config with env overrides applied.
    ///
    /// - `ATTEST_MAX_CONCURRENCY`: positive integer.
    /// - `ATTEST_WEBHOOK_TIMEOUT`: humantime duration, e.g. `10s`.
    ///
    /// Unparseable values are ignored with a warning.
    pub fn from_env() -> Self {
        let mut config = Self::default();
        if let Ok(raw) = std::env::var("ATTEST_MAX_CONCURRENCY") {
            match raw.parse::<usize>() {
                Ok(n) if n > 0 => config.max_concurrency = n,
                _ => {
                    tracing::warn!(value = %raw, "ignoring invalid ATTEST_MAX_CONCURRENCY");
                }
            }
        }
        if let Ok(raw) = std::env::var("ATTEST_WEBHOOK_TIMEOUT") {
            match humantime::parse_duration(&raw) {
                Ok(timeout) => config.webhook_timeout = timeout,
                Err(_) => {
                    tracing::warn!(value = %raw, "ignoring invalid ATTEST_WEBHOOK_TIMEOUT");
                }
            }
        }
        config
    }

    pub fn with_base_path(mut self, base_path: impl Into<PathBuf>) -> Self {
        self.base_path = base_path.into();
        self
    }

    pub fn with_max_concurrency(mut self, max_concurrency: usize) -> Self {
        self.max_concurrency = max_concurrency.max(1);
        self
    }
}
