//! Rate limiter for preventing brute force attacks
//!
//! One token bucket per (endpoint class, client IP). Buckets refill
//! continuously; idle buckets are dropped by [`RateLimiter::sweep`], which the
//! service schedules every minute.

use anyhow::Result;
use std::collections::HashMap;
use std::net::IpAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex;
use tokio::time::Instant;
use tokio_cron_scheduler::{Job, JobScheduler};
use tracing::{debug, info};

/// Endpoint classes sharing a bucket policy
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum RateClass {
    Otp,
    Login,
    Refresh,
    Credential,
}

/// Refill `tokens` every `window`, holding at most `burst`
#[derive(Debug, Clone, Copy)]
pub struct BucketPolicy {
    pub tokens: u32,
    pub window: Duration,
    pub burst: u32,
}

impl BucketPolicy {
    fn secs_per_token(&self) -> f64 {
        self.window.as_secs_f64() / self.tokens as f64
    }
}

impl RateClass {
    pub fn policy(self) -> BucketPolicy {
        match self {
            RateClass::Otp => BucketPolicy {
                tokens: 5,
                window: Duration::from_secs(15 * 60),
                burst: 5,
            },
            RateClass::Login => BucketPolicy {
                tokens: 5,
                window: Duration::from_secs(5 * 60),
                burst: 5,
            },
            RateClass::Refresh => BucketPolicy {
                tokens: 10,
                window: Duration::from_secs(5 * 60),
                burst: 10,
            },
            RateClass::Credential => BucketPolicy {
                tokens: 3,
                window: Duration::from_secs(15 * 60),
                burst: 3,
            },
        }
    }
}

/// Outcome of a rate limit check
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Decision {
    Allowed,
    /// Seconds until the next token is available
    Limited { retry_after: u64 },
}

#[derive(Debug)]
struct Bucket {
    tokens: f64,
    updated: Instant,
}

/// Rate limiter
#[derive(Debug, Clone, Default)]
pub struct RateLimiter {
    buckets: Arc<Mutex<HashMap<(RateClass, IpAddr), Bucket>>>,
}

impl RateLimiter {
    /// Create a new rate limiter
    pub fn new() -> Self {
        Self::default()
    }

    /// Take one token from the caller's bucket
    pub async fn check(&self, class: RateClass, ip: IpAddr) -> Decision {
        let policy = class.policy();
        let secs_per_token = policy.secs_per_token();
        let capacity = policy.burst as f64;
        let now = Instant::now();

        let mut buckets = self.buckets.lock().await;
        let bucket = buckets.entry((class, ip)).or_insert(Bucket {
            tokens: capacity,
            updated: now,
        });

        let elapsed = now.duration_since(bucket.updated).as_secs_f64();
        bucket.tokens = (bucket.tokens + elapsed / secs_per_token).min(capacity);
        bucket.updated = now;

        if bucket.tokens >= 1.0 {
            bucket.tokens -= 1.0;
            Decision::Allowed
        } else {
            let retry_after = ((1.0 - bucket.tokens) * secs_per_token).ceil().max(1.0) as u64;
            debug!(?class, %ip, retry_after, "Rate limit exceeded");
            Decision::Limited { retry_after }
        }
    }

    /// Drop buckets idle for a full window; they would be full again anyway.
    /// Returns the number removed.
    pub async fn sweep(&self) -> usize {
        let now = Instant::now();
        let mut buckets = self.buckets.lock().await;
        let before = buckets.len();
        buckets.retain(|(class, _), bucket| {
            now.duration_since(bucket.updated) < class.policy().window
        });
        before - buckets.len()
    }

    #[cfg(test)]
    pub async fn len(&self) -> usize {
        self.buckets.lock().await.len()
    }

    /// Schedule [`RateLimiter::sweep`] every minute
    pub async fn start_sweeper(&self) -> Result<JobScheduler> {
        let limiter = self.clone();
        let scheduler = JobScheduler::new().await?;

        let job = Job::new_async("0 * * * * *", move |_, _| {
            let limiter = limiter.clone();
            Box::pin(async move {
                let removed = limiter.sweep().await;
                if removed > 0 {
                    debug!("Swept {} idle rate limit buckets", removed);
                }
            })
        })?;

        scheduler.add(job).await?;
        scheduler.start().await?;

        info!("Started rate limiter sweeper");
        Ok(scheduler)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::net::Ipv4Addr;

    const CLIENT: IpAddr = IpAddr::V4(Ipv4Addr::new(203, 0, 113, 7));
    const OTHER: IpAddr = IpAddr::V4(Ipv4Addr::new(203, 0, 113, 8));

    #[tokio::test(start_paused = true)]
    async fn burst_then_limited() {
        let limiter = RateLimiter::new();

        for _ in 0..3 {
            assert_eq!(
                limiter.check(RateClass::Credential, CLIENT).await,
                Decision::Allowed
            );
        }

        // 3 tokens per 15 minutes: one token every 300 seconds
        assert_eq!(
            limiter.check(RateClass::Credential, CLIENT).await,
            Decision::Limited { retry_after: 300 }
        );
    }

    #[tokio::test(start_paused = true)]
    async fn buckets_are_per_class_and_ip() {
        let limiter = RateLimiter::new();
        for _ in 0..5 {
            limiter.check(RateClass::Login, CLIENT).await;
        }
        assert!(matches!(
            limiter.check(RateClass::Login, CLIENT).await,
            Decision::Limited { .. }
        ));

        assert_eq!(
            limiter.check(RateClass::Login, OTHER).await,
            Decision::Allowed
        );
        assert_eq!(
            limiter.check(RateClass::Refresh, CLIENT).await,
            Decision::Allowed
        );
    }

    #[tokio::test(start_paused = true)]
    async fn tokens_refill_over_time() {
        let limiter = RateLimiter::new();
        for _ in 0..5 {
            limiter.check(RateClass::Login, CLIENT).await;
        }

        // 5 per 5 minutes: one token per minute
        tokio::time::advance(Duration::from_secs(30)).await;
        assert_eq!(
            limiter.check(RateClass::Login, CLIENT).await,
            Decision::Limited { retry_after: 30 }
        );

        tokio::time::advance(Duration::from_secs(30)).await;
        assert_eq!(
            limiter.check(RateClass::Login, CLIENT).await,
            Decision::Allowed
        );
    }

    #[tokio::test(start_paused = true)]
    async fn sweep_reclaims_idle_buckets() {
        let limiter = RateLimiter::new();
        limiter.check(RateClass::Login, CLIENT).await;
        limiter.check(RateClass::Otp, CLIENT).await;

        tokio::time::advance(Duration::from_secs(5 * 60)).await;
        assert_eq!(limiter.sweep().await, 1);
        assert_eq!(limiter.len().await, 1);

        tokio::time::advance(Duration::from_secs(10 * 60)).await;
        assert_eq!(limiter.sweep().await, 1);
        assert_eq!(limiter.len().await, 0);
    }
}
