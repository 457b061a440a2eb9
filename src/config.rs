// src/config.rs

use std::time::Duration;

use serde::Serialize;

/// Tunable limits shared by every run the pipeline processes.
///
/// Values come from the environment at startup; unset or unparsable
/// variables fall back to the defaults below.
#[derive(Debug, Clone, Serialize)]
pub struct PipelineConfig {
    /// Minimum spacing between consecutive outbound requests of a run.
    pub min_delay_ms: u64,
    /// Hard ceiling on outbound requests a single run may issue.
    pub max_requests_per_run: u32,
    /// Process-wide ceiling on concurrently executing runs.
    pub max_concurrent: u32,
    /// Wall-clock budget for a whole probe execution.
    pub timeout_ms: u64,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            min_delay_ms: 1000,
            max_requests_per_run: 50,
            max_concurrent: 2,
            timeout_ms: 30_000,
        }
    }
}

impl PipelineConfig {
    /// Builds a config from `PALISADE_*` environment variables, keeping
    /// the default for any variable that is missing or fails to parse.
    pub fn from_env() -> Self {
        let defaults = Self::default();
        Self {
            min_delay_ms: read_env("PALISADE_MIN_DELAY_MS", defaults.min_delay_ms),
            max_requests_per_run: read_env(
                "PALISADE_MAX_REQUESTS_PER_RUN",
                defaults.max_requests_per_run,
            ),
            max_concurrent: read_env("PALISADE_MAX_CONCURRENT", defaults.max_concurrent),
            timeout_ms: read_env("PALISADE_TIMEOUT_MS", defaults.timeout_ms),
        }
    }

    pub fn min_delay(&self) -> Duration {
        Duration::from_millis(self.min_delay_ms)
    }

    pub fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms)
    }
}

fn read_env<T: std::str::FromStr>(name: &str, default: T) -> T {
    match std::env::var(name) {
        Ok(raw) => raw.trim().parse().unwrap_or(default),
        Err(_) => default,
    }
}
