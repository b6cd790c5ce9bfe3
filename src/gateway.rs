//! Process-wide throttle in front of the upstream model.
//!
//! Every upstream call goes through [`UpstreamGateway::call`], which
//! enforces three things in order:
//! - a counting gate limiting calls in flight, with a bounded wait,
//! - a minimum spacing between consecutive call starts across all callers,
//! - a bounded exponential-backoff retry on rate-limit errors.

use std::sync::Arc;
use std::time::Duration;
use prometheus::Gauge;
use tokio::sync::{Mutex, Semaphore};
use tokio::time::{Instant, sleep, timeout};
use tracing::{debug, error, warn};

use crate::error::AppError;
use crate::gemini::{ContentPart, GenerateContentResponse, GenerationConfig, ImageModel};
use crate::metrics::{
    GATE_TIMEOUTS, GaugeGuard, UPSTREAM_ATTEMPTS, UPSTREAM_IN_FLIGHT, UPSTREAM_RETRIES,
};

#[derive(Debug, Clone)]
pub struct ThrottleConfig {
    pub max_concurrent: usize,
    pub min_interval: Duration,
    pub acquire_timeout: Duration,
    pub max_retries: u32,
    pub backoff_base: Duration,
    pub force_single_candidate_on_retry: bool,
}

impl Default for ThrottleConfig {
    fn default() -> Self {
        Self {
            max_concurrent: 2,
            min_interval: Duration::from_millis(300),
            acquire_timeout: Duration::from_secs(30),
            max_retries: 2,
            backoff_base: Duration::from_millis(250),
            force_single_candidate_on_retry: true,
        }
    }
}

impl ThrottleConfig {
    /// Backoff before retry number `attempt + 1`.
    pub fn backoff(&self, attempt: u32) -> Duration {
        self.backoff_base.saturating_mul(2u32.saturating_pow(attempt))
    }

    /// Hint handed to clients on 429: the whole backoff schedule in whole
    /// seconds, never below one.
    pub fn retry_after(&self) -> Duration {
        let total: Duration = (0..self.max_retries).map(|attempt| self.backoff(attempt)).sum();
        let secs = total.as_millis().div_ceil(1000) as u64;
        Duration::from_secs(secs.max(1))
    }
}

pub struct UpstreamGateway {
    model: Arc<dyn ImageModel>,
    gate: Semaphore,
    // start time of the most recent upstream call
    last_call: Mutex<Option<Instant>>,
    in_flight: Gauge,
    config: ThrottleConfig,
}

impl UpstreamGateway {
    pub fn new(model: Arc<dyn ImageModel>, config: ThrottleConfig) -> Self {
        Self {
            model,
            gate: Semaphore::new(config.max_concurrent.max(1)),
            last_call: Mutex::new(None),
            in_flight: UPSTREAM_IN_FLIGHT.clone(),
            config,
        }
    }

    pub async fn call(
        &self,
        model: &str,
        contents: &[ContentPart],
        config: GenerationConfig,
    ) -> Result<GenerateContentResponse, AppError> {
        let retry_after = self.config.retry_after();

        // The permit is dropped on every return path below
        let _permit = match timeout(self.config.acquire_timeout, self.gate.acquire()).await {
            Ok(Ok(permit)) => permit,
            Ok(Err(_closed)) => return Err(AppError::Internal("upstream gate closed".to_string())),
            Err(_elapsed) => {
                GATE_TIMEOUTS.inc();
                warn!(
                    "throttle gate timeout model={} candidate_count={}",
                    model, config.candidate_count
                );
                return Err(AppError::ThrottleTimeout { retry_after });
            }
        };

        let mut config = config;
        let mut attempt = 0u32;
        loop {
            self.pace().await;

            UPSTREAM_ATTEMPTS.inc();
            let result = {
                let _in_flight = GaugeGuard::enter(&self.in_flight);
                self.model.generate_content(model, contents, &config).await
            };

            let err = match result {
                Ok(response) => return Ok(response),
                Err(err) => err,
            };

            if !err.is_rate_limited() {
                error!(
                    "upstream call failed model={} candidate_count={} attempt={}: {}",
                    model, config.candidate_count, attempt, err
                );
                return Err(AppError::Upstream(err.to_string()));
            }

            warn!(
                "upstream rate limited model={} candidate_count={} attempt={}: {}",
                model, config.candidate_count, attempt, err
            );
            if attempt >= self.config.max_retries {
                error!(
                    "upstream retries exhausted model={} attempts={}",
                    model,
                    attempt + 1
                );
                return Err(AppError::UpstreamRateLimited {
                    retry_after,
                    message: err.to_string(),
                });
            }

            UPSTREAM_RETRIES.inc();
            sleep(self.config.backoff(attempt)).await;
            if self.config.force_single_candidate_on_retry && config.candidate_count > 1 {
                config.candidate_count = 1;
            }
            attempt += 1;
        }
    }

    // Holds the pacing lock across the sleep so that no other caller can
    // start in between.
    async fn pace(&self) {
        let mut last_call = self.last_call.lock().await;
        if let Some(previous) = *last_call {
            let wait = self.config.min_interval.saturating_sub(previous.elapsed());
            if !wait.is_zero() {
                debug!("pacing upstream call for {:?}", wait);
                sleep(wait).await;
            }
        }
        *last_call = Some(Instant::now());
    }
}
