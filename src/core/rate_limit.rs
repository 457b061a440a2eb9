// src/core/rate_limit.rs

use std::collections::HashMap;
use std::sync::atomic::{AtomicU32, Ordering};
use std::time::Duration;

use tokio::sync::Mutex;
use tokio::time::Instant;
use tracing::{debug, info, warn};

use crate::config::PipelineConfig;
use crate::error::ProbeError;

/// Pacing state of a single run.
#[derive(Debug, Default)]
struct RunRateState {
    /// The instant the most recent request was scheduled to fire.
    last_scheduled: Option<Instant>,
    request_count: u32,
}

/// Enforces the three outbound limits every run is subject to: minimum
/// spacing between requests, a per-run request budget, and a process-wide
/// ceiling on concurrently executing runs.
///
/// Spacing is strictly serial. Each admitted request is scheduled at least
/// one `min_delay` after the previous one of the same run, so concurrent
/// callers on one run cannot collapse the gap.
pub struct RateLimiter {
    config: PipelineConfig,
    runs: Mutex<HashMap<String, RunRateState>>,
    active_executions: AtomicU32,
}

impl RateLimiter {
    pub fn new(config: PipelineConfig) -> Self {
        info!(
            min_delay_ms = config.min_delay_ms,
            max_requests_per_run = config.max_requests_per_run,
            max_concurrent = config.max_concurrent,
            "Initialized rate limiter."
        );
        Self {
            config,
            runs: Mutex::new(HashMap::new()),
            active_executions: AtomicU32::new(0),
        }
    }

    /// Admits one outbound request for `run_id`, sleeping out the pacing
    /// delay first, and returns the request's ordinal within the run.
    /// Fails once the run's request budget is spent.
    pub async fn wait_for_request_slot(&self, run_id: &str) -> Result<u32, ProbeError> {
        let (fire_at, count) = {
            let mut runs = self.runs.lock().await;
            let state = runs.entry(run_id.to_string()).or_default();

            if state.request_count >= self.config.max_requests_per_run {
                warn!(run_id, "Request budget exhausted.");
                return Err(ProbeError::RequestBudgetExceeded {
                    run_id: run_id.to_string(),
                    max: self.config.max_requests_per_run,
                });
            }

            let now = Instant::now();
            let fire_at = match state.last_scheduled {
                Some(last) => (last + self.config.min_delay()).max(now),
                None => now,
            };
            state.last_scheduled = Some(fire_at);
            state.request_count += 1;
            (fire_at, state.request_count)
        };

        // Sleep outside the lock so other runs keep moving.
        tokio::time::sleep_until(fire_at).await;
        debug!(run_id, count, "Request slot granted.");
        Ok(count)
    }

    /// Blocks until a process-wide execution slot is free, polling once a
    /// second. Every acquired slot must be released exactly once.
    pub async fn wait_for_execution_slot(&self) {
        loop {
            let current = self.active_executions.load(Ordering::Acquire);
            if current < self.config.max_concurrent
                && self
                    .active_executions
                    .compare_exchange(current, current + 1, Ordering::AcqRel, Ordering::Acquire)
                    .is_ok()
            {
                debug!(active = current + 1, "Execution slot acquired.");
                return;
            }
            tokio::time::sleep(Duration::from_secs(1)).await;
        }
    }

    pub fn release_execution_slot(&self) {
        let _ = self
            .active_executions
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |n| n.checked_sub(1));
    }

    /// Races a probe future against the configured time budget.
    pub async fn with_timeout<T>(
        &self,
        fut: impl std::future::Future<Output = Result<T, ProbeError>>,
    ) -> Result<T, ProbeError> {
        match tokio::time::timeout(self.config.timeout(), fut).await {
            Ok(result) => result,
            Err(_) => Err(ProbeError::Timeout {
                elapsed: self.config.timeout(),
            }),
        }
    }

    /// Forgets pacing state of a run. Called when a run is admitted so a
    /// recycled run id starts from a full budget.
    pub async fn reset_run_state(&self, run_id: &str) {
        self.runs.lock().await.remove(run_id);
    }

    /// Requests issued so far by a run.
    pub async fn request_count(&self, run_id: &str) -> u32 {
        self.runs
            .lock()
            .await
            .get(run_id)
            .map(|state| state.request_count)
            .unwrap_or(0)
    }

    pub fn active_executions(&self) -> u32 {
        self.active_executions.load(Ordering::Acquire)
    }
}
