//! Token-bucket admission gate shared by every call of one client.
//!
//! The bucket starts full with `burst_size` tokens and refills continuously at
//! `requests_per_second`. Each physical attempt takes one token; callers that
//! find the bucket empty sleep until the next token is due and try again.
//! Admission order between concurrent waiters is not guaranteed.

use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use log::{debug, warn};
use tokio::time::Instant;

use crate::config::RateLimitConfig;
use crate::context::{CallContext, CancelReason};

/// Shortest sleep between retries of an empty bucket.
const MIN_WAIT: Duration = Duration::from_millis(1);

/// Longest single sleep; waiters re-check the bucket after it.
const MAX_WAIT: Duration = Duration::from_secs(60);

/// Absorbs floating point drift when a waiter wakes exactly on schedule.
const TOKEN_EPSILON: f64 = 1e-9;

#[derive(Debug)]
struct BucketState {
    tokens: f64,
    last_refill: Instant,
}

#[derive(Debug)]
struct Bucket {
    rate: f64,
    capacity: f64,
    state: Mutex<BucketState>,
}

impl Bucket {
    fn lock(&self) -> MutexGuard<'_, BucketState> {
        match self.state.lock() {
            Ok(guard) => guard,
            Err(poisoned) => {
                warn!("Rate limiter lock poisoned, continuing with inner state");
                poisoned.into_inner()
            }
        }
    }

    fn refill(&self, state: &mut BucketState) {
        let now = Instant::now();
        let elapsed = now.saturating_duration_since(state.last_refill);
        if elapsed.is_zero() {
            return;
        }
        state.tokens = (state.tokens + elapsed.as_secs_f64() * self.rate).min(self.capacity);
        state.last_refill = now;
    }

    /// Takes a token, or returns how long until one is due.
    fn try_take(&self) -> Result<(), Duration> {
        let mut state = self.lock();
        self.refill(&mut state);

        if state.tokens + TOKEN_EPSILON >= 1.0 {
            state.tokens = (state.tokens - 1.0).max(0.0);
            return Ok(());
        }

        let missing = 1.0 - state.tokens;
        let wait = Duration::try_from_secs_f64(missing / self.rate).unwrap_or(MAX_WAIT);
        Err(wait.clamp(MIN_WAIT, MAX_WAIT))
    }

    fn available(&self) -> f64 {
        let mut state = self.lock();
        self.refill(&mut state);
        state.tokens
    }
}

/// Rate limiter handle. Clones share the same bucket.
#[derive(Debug, Clone, Default)]
pub struct RateLimiter {
    bucket: Option<Arc<Bucket>>,
}

impl RateLimiter {
    /// A bucket holding `burst_size` tokens, refilled at `requests_per_second`.
    pub fn new(config: &RateLimitConfig) -> Self {
        let capacity = f64::from(config.burst_size.max(1));
        Self {
            bucket: Some(Arc::new(Bucket {
                rate: config.requests_per_second,
                capacity,
                state: Mutex::new(BucketState {
                    tokens: capacity,
                    last_refill: Instant::now(),
                }),
            })),
        }
    }

    /// A limiter that admits everything immediately.
    pub fn unlimited() -> Self {
        Self { bucket: None }
    }

    pub fn from_config(config: Option<&RateLimitConfig>) -> Self {
        config.map(Self::new).unwrap_or_else(Self::unlimited)
    }

    pub fn is_limited(&self) -> bool {
        self.bucket.is_some()
    }

    /// Waits for a token. Returns the cancellation reason, having taken
    /// nothing, if `ctx` finishes first.
    pub async fn acquire(&self, ctx: &CallContext) -> Result<(), CancelReason> {
        let Some(bucket) = &self.bucket else {
            return Ok(());
        };

        loop {
            if let Some(reason) = ctx.check() {
                return Err(reason);
            }

            let wait = match bucket.try_take() {
                Ok(()) => return Ok(()),
                Err(wait) => wait,
            };

            debug!("Rate limiter empty, waiting {:?} for a token", wait);
            tokio::select! {
                biased;
                reason = ctx.done() => return Err(reason),
                _ = tokio::time::sleep(wait) => {}
            }
        }
    }

    /// Takes a token if one is available right now.
    pub fn try_acquire(&self) -> bool {
        match &self.bucket {
            Some(bucket) => bucket.try_take().is_ok(),
            None => true,
        }
    }

    /// Tokens currently banked, or `None` when unlimited.
    pub fn available_tokens(&self) -> Option<f64> {
        self.bucket.as_ref().map(|b| b.available())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn limiter(rate: f64, burst: u32) -> RateLimiter {
        RateLimiter::new(&RateLimitConfig {
            requests_per_second: rate,
            burst_size: burst,
        })
    }

    #[tokio::test]
    async fn test_unlimited_always_admits() {
        let limiter = RateLimiter::unlimited();
        let ctx = CallContext::new();
        for _ in 0..1000 {
            limiter.acquire(&ctx).await.unwrap();
        }
        assert!(limiter.try_acquire());
        assert!(!limiter.is_limited());
        assert_eq!(limiter.available_tokens(), None);
    }

    #[tokio::test(start_paused = true)]
    async fn test_burst_then_delay() {
        let limiter = limiter(10.0, 20);
        let ctx = CallContext::new();
        let start = Instant::now();

        for _ in 0..20 {
            limiter.acquire(&ctx).await.unwrap();
        }
        assert_eq!(start.elapsed(), Duration::ZERO);

        limiter.acquire(&ctx).await.unwrap();
        assert!(start.elapsed() >= Duration::from_millis(100));
    }

    #[tokio::test(start_paused = true)]
    async fn test_concurrent_acquire_admits_burst_then_refills() {
        let limiter = limiter(10.0, 20);
        let start = Instant::now();

        let handles: Vec<_> = (0..25)
            .map(|_| {
                let limiter = limiter.clone();
                tokio::spawn(async move {
                    limiter.acquire(&CallContext::new()).await.unwrap();
                    start.elapsed()
                })
            })
            .collect();

        let mut elapsed = Vec::new();
        for handle in handles {
            elapsed.push(handle.await.unwrap());
        }

        let immediate = elapsed.iter().filter(|d| d.is_zero()).count();
        let delayed: Vec<_> = elapsed.iter().filter(|d| !d.is_zero()).collect();
        assert_eq!(immediate, 20);
        assert_eq!(delayed.len(), 5);
        assert!(delayed.iter().all(|d| **d >= Duration::from_millis(100)));
        // Five refills at 10/s need at least half a second in total.
        assert!(delayed.iter().any(|d| **d >= Duration::from_millis(500)));
    }

    #[tokio::test(start_paused = true)]
    async fn test_refill_is_capped_at_burst() {
        let limiter = limiter(100.0, 5);
        tokio::time::sleep(Duration::from_secs(60)).await;
        let available = limiter.available_tokens().unwrap();
        assert!((available - 5.0).abs() < 1e-6);
    }

    #[tokio::test(start_paused = true)]
    async fn test_try_acquire_does_not_wait() {
        let limiter = limiter(1.0, 2);
        assert!(limiter.try_acquire());
        assert!(limiter.try_acquire());
        assert!(!limiter.try_acquire());

        tokio::time::sleep(Duration::from_secs(1)).await;
        assert!(limiter.try_acquire());
    }

    #[tokio::test(start_paused = true)]
    async fn test_cancelled_wait_takes_no_token() {
        let limiter = limiter(1.0, 1);
        let ctx = CallContext::new();
        limiter.acquire(&ctx).await.unwrap();

        let waiting = CallContext::new();
        let canceller = waiting.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(100)).await;
            canceller.cancel();
        });

        let result = limiter.acquire(&waiting).await;
        assert_eq!(result, Err(CancelReason::Cancelled));

        // The token that refilled while waiting is still there for the next caller.
        tokio::time::sleep(Duration::from_secs(1)).await;
        assert!(limiter.available_tokens().unwrap() >= 1.0 - TOKEN_EPSILON);
    }

    #[tokio::test(start_paused = true)]
    async fn test_deadline_during_wait() {
        let limiter = limiter(0.5, 1);
        limiter.acquire(&CallContext::new()).await.unwrap();

        let ctx = CallContext::new().with_timeout(Duration::from_millis(300));
        let result = limiter.acquire(&ctx).await;
        assert_eq!(result, Err(CancelReason::DeadlineExceeded));
    }

    #[tokio::test]
    async fn test_already_cancelled_context_is_rejected() {
        let limiter = limiter(10.0, 10);
        let ctx = CallContext::new();
        ctx.cancel();
        assert_eq!(limiter.acquire(&ctx).await, Err(CancelReason::Cancelled));
        assert!(limiter.available_tokens().unwrap() > 9.9);
    }

    #[tokio::test(start_paused = true)]
    async fn test_tiny_rate_waits_instead_of_panicking() {
        let limiter = limiter(1e-20, 1);
        assert!(limiter.try_acquire());
        assert!(!limiter.try_acquire());

        let ctx = CallContext::new().with_timeout(Duration::from_secs(150));
        let start = Instant::now();
        let result = limiter.acquire(&ctx).await;

        assert_eq!(result, Err(CancelReason::DeadlineExceeded));
        assert!(start.elapsed() >= Duration::from_secs(150));
    }

    #[tokio::test(start_paused = true)]
    async fn test_sustained_rate_over_window() {
        let limiter = limiter(5.0, 1);
        let ctx = CallContext::new();
        let start = Instant::now();
        for _ in 0..11 {
            limiter.acquire(&ctx).await.unwrap();
        }
        // One banked token, then ten more at 5/s.
        assert!(start.elapsed() >= Duration::from_millis(1990));
    }
}
