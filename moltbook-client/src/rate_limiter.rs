//! Client-side request pacing. This only smooths our own traffic; the
//! platform's per-action cooldowns are enforced by the pipeline guards.

use serde::Serialize;
use std::time::Duration;
use tokio::sync::Mutex;
use tokio::time::{sleep, Instant};
use tracing::debug;

const DEFAULT_BURST: u32 = 10;

#[derive(Debug, Clone, Copy)]
pub struct RateLimitConfig {
    pub requests_per_minute: u32,
    /// Requests that may go out back to back after an idle period.
    pub burst: u32,
}

impl RateLimitConfig {
    pub fn per_minute(requests_per_minute: u32) -> Self {
        let requests_per_minute = requests_per_minute.max(1);
        Self {
            requests_per_minute,
            burst: DEFAULT_BURST.min(requests_per_minute),
        }
    }

    fn tokens_per_second(&self) -> f64 {
        f64::from(self.requests_per_minute.max(1)) / 60.0
    }
}

#[derive(Debug)]
struct Bucket {
    tokens: f64,
    refilled_at: Instant,
}

#[derive(Debug)]
pub struct RateLimiter {
    config: RateLimitConfig,
    bucket: Mutex<Bucket>,
}

impl RateLimiter {
    pub fn new(config: RateLimitConfig) -> Self {
        Self {
            config,
            bucket: Mutex::new(Bucket {
                tokens: f64::from(config.burst.max(1)),
                refilled_at: Instant::now(),
            }),
        }
    }

    /// Take a token now, or report how long until one is available.
    pub async fn try_acquire(&self) -> Result<(), Duration> {
        let mut bucket = self.bucket.lock().await;
        self.refill(&mut bucket);

        if bucket.tokens >= 1.0 {
            bucket.tokens -= 1.0;
            Ok(())
        } else {
            let missing = 1.0 - bucket.tokens;
            Err(Duration::from_secs_f64(missing / self.config.tokens_per_second()))
        }
    }

    /// Wait until a request may be sent.
    pub async fn acquire(&self) {
        while let Err(wait) = self.try_acquire().await {
            debug!("Pacing Moltbook requests, waiting {:?}", wait);
            sleep(wait).await;
        }
    }

    pub async fn status(&self) -> RateLimitStatus {
        let mut bucket = self.bucket.lock().await;
        self.refill(&mut bucket);
        RateLimitStatus {
            available_tokens: bucket.tokens.floor() as u32,
            burst: self.config.burst.max(1),
            requests_per_minute: self.config.requests_per_minute,
        }
    }

    fn refill(&self, bucket: &mut Bucket) {
        let now = Instant::now();
        let earned = now.duration_since(bucket.refilled_at).as_secs_f64() * self.config.tokens_per_second();
        bucket.tokens = (bucket.tokens + earned).min(f64::from(self.config.burst.max(1)));
        bucket.refilled_at = now;
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RateLimitStatus {
    pub available_tokens: u32,
    pub burst: u32,
    pub requests_per_minute: u32,
}

impl RateLimitStatus {
    pub fn utilization_percentage(&self) -> f64 {
        let used = self.burst.saturating_sub(self.available_tokens);
        f64::from(used) / f64::from(self.burst.max(1)) * 100.0
    }
}
