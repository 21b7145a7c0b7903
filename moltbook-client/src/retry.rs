//! Retry with backoff for idempotent Moltbook reads.
//!
//! Writes (post, comment, upvote) never come through here: a write that timed
//! out may still have landed, and the platform cooldown would reject a repeat.

use agent_core::{CoreError, ErrorExt, PlatformError};
use std::sync::{Mutex, MutexGuard};
use std::time::Duration;
use tokio::time::{sleep, Instant};
use tracing::{debug, info, warn};

#[derive(Debug, Clone)]
pub struct RetryConfig {
    /// Attempts per read, the first one included.
    pub max_attempts: u32,
    pub base_delay: Duration,
    /// Cap on a single backoff step. A platform asking for a longer wait
    /// ends the retries instead.
    pub max_delay: Duration,
    pub backoff_multiplier: f64,
    /// Up to this fraction of each step is added at random.
    pub jitter: f64,
    /// Consecutive failed reads that open the breaker.
    pub breaker_threshold: u32,
    /// How long an open breaker refuses reads before letting a probe through.
    pub breaker_cooldown: Duration,
}

impl Default for RetryConfig {
    // Feed reads sit inside a bounded pipeline stage, so the total wait stays short.
    fn default() -> Self {
        Self {
            max_attempts: 3,
            base_delay: Duration::from_secs(1),
            max_delay: Duration::from_secs(10),
            backoff_multiplier: 2.0,
            jitter: 0.2,
            breaker_threshold: 3,
            breaker_cooldown: Duration::from_secs(120),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BreakerState {
    Closed,
    Open,
    /// Cooldown elapsed; the next read decides whether to close again.
    Probing,
}

#[derive(Debug)]
struct Breaker {
    state: BreakerState,
    consecutive_failures: u32,
    opened_at: Option<Instant>,
}

impl Breaker {
    fn new() -> Self {
        Self {
            state: BreakerState::Closed,
            consecutive_failures: 0,
            opened_at: None,
        }
    }

    fn admit(&mut self, cooldown: Duration) -> bool {
        match self.state {
            BreakerState::Closed | BreakerState::Probing => true,
            BreakerState::Open => {
                let cooled = self
                    .opened_at
                    .map_or(true, |opened| opened.elapsed() >= cooldown);
                if cooled {
                    debug!("Feed read breaker probing after cooldown");
                    self.state = BreakerState::Probing;
                }
                cooled
            }
        }
    }

    fn succeeded(&mut self) {
        if self.state != BreakerState::Closed {
            info!("Feed reads recovered, closing breaker");
        }
        self.state = BreakerState::Closed;
        self.consecutive_failures = 0;
        self.opened_at = None;
    }

    fn failed(&mut self, threshold: u32) {
        self.consecutive_failures += 1;
        let trip = match self.state {
            BreakerState::Probing => true,
            BreakerState::Closed => self.consecutive_failures >= threshold,
            BreakerState::Open => false,
        };
        if trip {
            warn!(
                "Opening feed read breaker after {} consecutive failures",
                self.consecutive_failures
            );
            self.state = BreakerState::Open;
            self.opened_at = Some(Instant::now());
        }
    }
}

/// Backoff before retry number `attempt + 1`: exponential, capped at
/// `max_delay`, plus jitter.
pub fn backoff_delay(attempt: u32, config: &RetryConfig) -> Duration {
    let exponent = i32::try_from(attempt).unwrap_or(i32::MAX);
    let max = config.max_delay.as_secs_f64();
    let step = (config.base_delay.as_secs_f64() * config.backoff_multiplier.powi(exponent)).min(max);
    let jitter = step * config.jitter * fastrand::f64();
    Duration::from_secs_f64((step + jitter).min(max))
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RetryMetrics {
    pub total_retries: u64,
    pub successful_retries: u64,
    pub failed_operations: u64,
    pub breaker_rejections: u64,
}

#[derive(Debug)]
pub struct RetryExecutor {
    config: RetryConfig,
    breaker: Mutex<Breaker>,
    metrics: Mutex<RetryMetrics>,
}

impl RetryExecutor {
    pub fn new(config: RetryConfig) -> Self {
        Self {
            config,
            breaker: Mutex::new(Breaker::new()),
            metrics: Mutex::new(RetryMetrics::default()),
        }
    }

    /// Run `call`, retrying transient failures. The last error comes back
    /// unchanged so callers can still match on it.
    pub async fn execute<F, Fut, T>(&self, operation: &str, call: F) -> Result<T, CoreError>
    where
        F: Fn() -> Fut,
        Fut: std::future::Future<Output = Result<T, CoreError>>,
    {
        if !self.breaker().admit(self.config.breaker_cooldown) {
            self.metrics().breaker_rejections += 1;
            warn!("Skipping {}: breaker open after repeated failures", operation);
            return Err(PlatformError::Rejected {
                status: 503,
                message: "feed reads paused after repeated failures".to_string(),
            }
            .into());
        }

        let mut attempt = 0;
        loop {
            let error = match call().await {
                Ok(value) => {
                    self.breaker().succeeded();
                    if attempt > 0 {
                        let mut metrics = self.metrics();
                        metrics.total_retries += u64::from(attempt);
                        metrics.successful_retries += 1;
                        info!("{} succeeded after {} retries", operation, attempt);
                    }
                    return Ok(value);
                }
                Err(error) => error,
            };

            match self.next_delay(attempt, &error) {
                Some(delay) => {
                    info!("Retrying {} in {:?}: {}", operation, delay, error);
                    sleep(delay).await;
                    attempt += 1;
                }
                None => {
                    self.breaker().failed(self.config.breaker_threshold);
                    self.metrics().failed_operations += 1;
                    warn!(
                        code = error.error_code(),
                        "{} failed after {} attempt(s): {}",
                        operation,
                        attempt + 1,
                        error
                    );
                    return Err(error);
                }
            }
        }
    }

    fn next_delay(&self, attempt: u32, error: &CoreError) -> Option<Duration> {
        if attempt + 1 >= self.config.max_attempts || !error.is_retryable() {
            return None;
        }
        match error.retry_after() {
            Some(requested) if requested > self.config.max_delay => None,
            Some(requested) => Some(requested),
            None => Some(backoff_delay(attempt, &self.config)),
        }
    }

    pub fn get_metrics(&self) -> RetryMetrics {
        self.metrics().clone()
    }

    pub fn breaker_state(&self) -> BreakerState {
        self.breaker().state
    }

    fn breaker(&self) -> MutexGuard<'_, Breaker> {
        self.breaker
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn metrics(&self) -> MutexGuard<'_, RetryMetrics> {
        self.metrics
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}
