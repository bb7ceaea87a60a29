//! Client-side QPS limiting for API calls
//!
//! A token bucket: `burst` tokens up front, refilled at `qps` per second.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::Semaphore;
use tokio::task::JoinHandle;

/// Shortest refill period; faster rates refill one token per period
const MIN_REFILL_PERIOD: Duration = Duration::from_micros(1);

/// Token-bucket limiter shared by every API call of a store
pub struct RateLimiter {
    tokens: Option<Arc<Semaphore>>,
    refill: Option<JoinHandle<()>>,
}

impl RateLimiter {
    /// Allow `qps` calls per second with bursts of `burst`
    ///
    /// A non-positive or non-finite `qps` disables limiting. Must be called
    /// inside a tokio runtime.
    pub fn new(qps: f32, burst: u32) -> Self {
        if !qps.is_finite() || qps <= 0.0 || burst == 0 {
            return Self::unlimited();
        }

        let burst = burst as usize;
        let tokens = Arc::new(Semaphore::new(burst));
        let period = refill_period(qps);
        let bucket = Arc::clone(&tokens);
        let refill = tokio::spawn(async move {
            let mut tick = tokio::time::interval(period);
            tick.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
            loop {
                tick.tick().await;
                if bucket.available_permits() < burst {
                    bucket.add_permits(1);
                }
            }
        });

        Self {
            tokens: Some(tokens),
            refill: Some(refill),
        }
    }

    /// A limiter that never waits
    pub fn unlimited() -> Self {
        Self {
            tokens: None,
            refill: None,
        }
    }

    /// Wait for a token
    pub async fn acquire(&self) {
        if let Some(tokens) = &self.tokens {
            if let Ok(permit) = tokens.acquire().await {
                permit.forget();
            }
        }
    }

    /// Tokens currently available; `None` when unlimited
    pub fn available(&self) -> Option<usize> {
        self.tokens.as_ref().map(|t| t.available_permits())
    }
}

fn refill_period(qps: f32) -> Duration {
    Duration::try_from_secs_f64(1.0 / f64::from(qps))
        .unwrap_or(MIN_REFILL_PERIOD)
        .max(MIN_REFILL_PERIOD)
}

impl Drop for RateLimiter {
    fn drop(&mut self) {
        if let Some(refill) = self.refill.take() {
            refill.abort();
        }
    }
}
