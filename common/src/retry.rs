//! Retry policy shared by every call site that talks to an external system.
//!
//! Callers hold a policy value instead of re-coding backoff arithmetic. The
//! outbox flusher uses `delay_for` directly with an unbounded attempt counter;
//! bounded callers go through `run`.

use std::future::Future;
use std::time::Duration;

use anyhow::Result;
use rand::Rng;

#[derive(Debug, Clone, Copy)]
pub struct RetryPolicy {
    /// Attempts before giving up. Ignored by callers that retry forever.
    pub max_attempts: u32,
    pub initial_delay: Duration,
    pub factor: u32,
    pub max_delay: Duration,
    /// Fraction of the delay added or removed at random, 0.0..=1.0.
    pub jitter: f64,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 5,
            initial_delay: Duration::from_millis(500),
            factor: 2,
            max_delay: Duration::from_secs(30),
            jitter: 0.1,
        }
    }
}

impl RetryPolicy {
    /// Delay before the given retry, 0-indexed. Exponential with the policy
    /// factor, capped at `max_delay`, then jittered.
    pub fn delay_for(&self, attempt: u32) -> Duration {
        let base = self
            .initial_delay
            .saturating_mul(self.factor.saturating_pow(attempt.min(31)))
            .min(self.max_delay);
        if self.jitter <= 0.0 {
            return base;
        }
        let spread = base.as_secs_f64() * self.jitter;
        let offset = rand::rng().random_range(-spread..=spread);
        Duration::from_secs_f64((base.as_secs_f64() + offset).max(0.0))
    }

    /// Run `op` until it succeeds or `max_attempts` is exhausted, sleeping
    /// the policy delay between attempts. Returns the last error on failure.
    pub async fn run<T, F, Fut>(&self, mut op: F) -> Result<T>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T>>,
    {
        let mut attempt = 0;
        loop {
            match op().await {
                Ok(v) => return Ok(v),
                Err(e) => {
                    attempt += 1;
                    if attempt >= self.max_attempts {
                        return Err(e);
                    }
                    tracing::debug!(attempt, error = ?e, "operation failed, retrying");
                    tokio::time::sleep(self.delay_for(attempt - 1)).await;
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};

    fn policy_no_jitter() -> RetryPolicy {
        RetryPolicy {
            max_attempts: 4,
            initial_delay: Duration::from_millis(100),
            factor: 2,
            max_delay: Duration::from_secs(30),
            jitter: 0.0,
        }
    }

    #[test]
    fn delay_doubles_per_attempt() {
        let p = policy_no_jitter();
        assert_eq!(p.delay_for(0), Duration::from_millis(100));
        assert_eq!(p.delay_for(1), Duration::from_millis(200));
        assert_eq!(p.delay_for(2), Duration::from_millis(400));
        assert_eq!(p.delay_for(3), Duration::from_millis(800));
    }

    #[test]
    fn delay_caps_at_max() {
        let p = RetryPolicy {
            max_delay: Duration::from_millis(300),
            ..policy_no_jitter()
        };
        assert_eq!(p.delay_for(5), Duration::from_millis(300));
        // Large attempt counts must not overflow
        assert_eq!(p.delay_for(1000), Duration::from_millis(300));
    }

    #[test]
    fn jitter_stays_within_bounds() {
        let p = RetryPolicy {
            jitter: 0.1,
            ..policy_no_jitter()
        };
        for _ in 0..100 {
            let d = p.delay_for(2).as_secs_f64();
            assert!((0.36..=0.44).contains(&d), "jittered delay out of range: {d}");
        }
    }

    #[tokio::test(start_paused = true)]
    async fn run_retries_until_success() {
        let p = policy_no_jitter();
        let calls = AtomicU32::new(0);
        let out = p
            .run(|| async {
                if calls.fetch_add(1, Ordering::SeqCst) < 2 {
                    anyhow::bail!("transient")
                }
                Ok(42)
            })
            .await
            .expect("should eventually succeed");
        assert_eq!(out, 42);
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn run_gives_up_after_max_attempts() {
        let p = policy_no_jitter();
        let calls = AtomicU32::new(0);
        let out: Result<()> = p
            .run(|| async {
                calls.fetch_add(1, Ordering::SeqCst);
                anyhow::bail!("always down")
            })
            .await;
        assert!(out.is_err());
        assert_eq!(calls.load(Ordering::SeqCst), 4);
    }
}
