//! Token bucket rate limiter for outbound requests
//!
//! The bucket holds `R` tokens and is refilled to `R` once per fixed
//! one-second tick. Idle periods never accumulate more than `R` tokens.
//! A limiter built without a rate never blocks.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Mutex, PoisonError};
use std::time::Duration;

use tokio::time::Instant;
use tracing::trace;

const TICK: Duration = Duration::from_secs(1);

#[derive(Debug)]
struct Bucket {
    capacity: u32,
    state: Mutex<BucketState>,
}

#[derive(Debug)]
struct BucketState {
    tokens: u32,
    next_tick: Instant,
}

impl BucketState {
    /// Refill when one or more tick boundaries have passed
    fn refill(&mut self, capacity: u32, now: Instant) {
        if now < self.next_tick {
            return;
        }
        let behind = now.duration_since(self.next_tick);
        let missed = behind.as_nanos() / TICK.as_nanos();
        let ticks = u32::try_from(missed + 1).unwrap_or(u32::MAX);
        self.next_tick += TICK.saturating_mul(ticks);
        self.tokens = capacity;
    }
}

/// Limiter statistics
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RateLimiterStats {
    /// Tokens handed out
    pub acquired: u64,
    /// Acquisitions that had to wait for a tick
    pub throttled: u64,
}

/// Token bucket shared by all writers of one destination
#[derive(Debug)]
pub struct RateLimiter {
    bucket: Option<Bucket>,
    acquired: AtomicU64,
    throttled: AtomicU64,
}

impl RateLimiter {
    /// A limiter that never blocks
    pub fn unlimited() -> Self {
        Self {
            bucket: None,
            acquired: AtomicU64::new(0),
            throttled: AtomicU64::new(0),
        }
    }

    /// A limiter allowing `requests_per_second` acquisitions per tick.
    ///
    /// Zero is treated as "not configured".
    pub fn per_second(requests_per_second: u32) -> Self {
        if requests_per_second == 0 {
            return Self::unlimited();
        }
        Self {
            bucket: Some(Bucket {
                capacity: requests_per_second,
                state: Mutex::new(BucketState {
                    tokens: requests_per_second,
                    next_tick: Instant::now() + TICK,
                }),
            }),
            acquired: AtomicU64::new(0),
            throttled: AtomicU64::new(0),
        }
    }

    /// Build from an optional configured rate
    pub fn from_config(requests_per_second: Option<u32>) -> Self {
        requests_per_second.map_or_else(Self::unlimited, Self::per_second)
    }

    /// Configured rate, `None` when unlimited
    pub fn capacity(&self) -> Option<u32> {
        self.bucket.as_ref().map(|b| b.capacity)
    }

    /// Wait until a token is available and take it
    pub async fn acquire(&self) {
        let Some(bucket) = &self.bucket else {
            self.acquired.fetch_add(1, Ordering::Relaxed);
            return;
        };

        let mut waited = false;
        loop {
            let wake_at = {
                let mut state = bucket.state.lock().unwrap_or_else(PoisonError::into_inner);
                state.refill(bucket.capacity, Instant::now());
                if state.tokens > 0 {
                    state.tokens -= 1;
                    break;
                }
                state.next_tick
            };
            if !waited {
                waited = true;
                self.throttled.fetch_add(1, Ordering::Relaxed);
                trace!(capacity = bucket.capacity, "rate limit reached, waiting for next tick");
            }
            tokio::time::sleep_until(wake_at).await;
        }
        self.acquired.fetch_add(1, Ordering::Relaxed);
    }

    /// Take a token if one is available right now
    pub fn try_acquire(&self) -> bool {
        let Some(bucket) = &self.bucket else {
            self.acquired.fetch_add(1, Ordering::Relaxed);
            return true;
        };
        let mut state = bucket.state.lock().unwrap_or_else(PoisonError::into_inner);
        state.refill(bucket.capacity, Instant::now());
        if state.tokens == 0 {
            return false;
        }
        state.tokens -= 1;
        self.acquired.fetch_add(1, Ordering::Relaxed);
        true
    }

    /// Counters since creation
    pub fn stats(&self) -> RateLimiterStats {
        RateLimiterStats {
            acquired: self.acquired.load(Ordering::Relaxed),
            throttled: self.throttled.load(Ordering::Relaxed),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    #[tokio::test(start_paused = true)]
    async fn test_unlimited_never_blocks() {
        let limiter = RateLimiter::unlimited();
        let start = Instant::now();
        for _ in 0..10_000 {
            limiter.acquire().await;
        }
        assert_eq!(start.elapsed(), Duration::ZERO);
        assert_eq!(limiter.stats().acquired, 10_000);
        assert!(limiter.capacity().is_none());
    }

    #[tokio::test(start_paused = true)]
    async fn test_excess_waits_for_next_tick() {
        let limiter = RateLimiter::per_second(5);
        let start = Instant::now();
        for _ in 0..5 {
            limiter.acquire().await;
        }
        assert_eq!(start.elapsed(), Duration::ZERO);

        limiter.acquire().await;
        limiter.acquire().await;
        assert_eq!(start.elapsed(), Duration::from_secs(1));
        assert_eq!(limiter.stats().throttled, 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_sustained_throughput_bounded() {
        let limiter = RateLimiter::per_second(5);
        let start = Instant::now();
        for _ in 0..20 {
            limiter.acquire().await;
        }
        // 5 at t=0, then 5 per tick at t=1, 2, 3
        assert_eq!(start.elapsed(), Duration::from_secs(3));
    }

    #[tokio::test(start_paused = true)]
    async fn test_idle_does_not_accumulate() {
        let limiter = RateLimiter::per_second(3);
        tokio::time::sleep(Duration::from_secs(10)).await;

        let mut granted = 0;
        while limiter.try_acquire() {
            granted += 1;
        }
        assert_eq!(granted, 3);
    }

    #[tokio::test(start_paused = true)]
    async fn test_concurrent_acquirers_share_bucket() {
        let limiter = Arc::new(RateLimiter::per_second(4));
        let start = Instant::now();
        let mut handles = Vec::new();
        for _ in 0..8 {
            let l = limiter.clone();
            handles.push(tokio::spawn(async move { l.acquire().await }));
        }
        for h in handles {
            h.await.unwrap();
        }
        assert_eq!(start.elapsed(), Duration::from_secs(1));
        assert_eq!(limiter.stats().acquired, 8);
    }

    #[test]
    fn test_zero_rate_is_unlimited() {
        assert!(RateLimiter::per_second(0).capacity().is_none());
        assert_eq!(RateLimiter::from_config(Some(7)).capacity(), Some(7));
        assert!(RateLimiter::from_config(None).capacity().is_none());
    }
}
