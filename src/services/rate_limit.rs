//! Per-host minimum spacing between requests.

use std::collections::HashMap;
use std::time::Duration;

use tokio::sync::Mutex;
use tokio::time::Instant;

/// Grants at most one acquisition per `min_interval` for each host key.
///
/// Shared by every worker fetching from the same site. Callers reserve the
/// next free slot under the lock, then sleep outside it, so waiting workers
/// are granted in roughly the order they arrived.
#[derive(Debug)]
pub struct RateLimiter {
    min_interval: Duration,
    next_slot: Mutex<HashMap<String, Instant>>,
}

impl RateLimiter {
    pub fn new(min_interval: Duration) -> Self {
        Self {
            min_interval,
            next_slot: Mutex::new(HashMap::new()),
        }
    }

    pub fn min_interval(&self) -> Duration {
        self.min_interval
    }

    /// Wait until a request to `host` may be sent.
    pub async fn acquire(&self, host: &str) {
        if self.min_interval.is_zero() {
            return;
        }

        let slot = {
            let mut slots = self.next_slot.lock().await;
            let now = Instant::now();
            let slot = match slots.get(host) {
                Some(&next) if next > now => next,
                _ => now,
            };
            slots.insert(host.to_string(), slot + self.min_interval);
            slot
        };

        tokio::time::sleep_until(slot).await;
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use futures::future::join_all;

    use super::*;

    #[tokio::test(start_paused = true)]
    async fn spaces_acquisitions_per_host() {
        let limiter = Arc::new(RateLimiter::new(Duration::from_millis(500)));
        let start = Instant::now();

        let mut grants = join_all((0..4).map(|_| {
            let limiter = Arc::clone(&limiter);
            async move {
                limiter.acquire("example.com").await;
                Instant::now() - start
            }
        }))
        .await;

        grants.sort();
        assert_eq!(grants[0], Duration::ZERO);
        for pair in grants.windows(2) {
            assert!(pair[1] - pair[0] >= Duration::from_millis(500));
        }
    }

    #[tokio::test(start_paused = true)]
    async fn hosts_are_independent() {
        let limiter = RateLimiter::new(Duration::from_secs(1));
        let start = Instant::now();

        limiter.acquire("a.com").await;
        limiter.acquire("b.com").await;
        assert_eq!(Instant::now(), start);

        limiter.acquire("a.com").await;
        assert_eq!(Instant::now() - start, Duration::from_secs(1));
    }

    #[tokio::test(start_paused = true)]
    async fn idle_host_is_granted_immediately() {
        let limiter = RateLimiter::new(Duration::from_millis(200));
        limiter.acquire("a.com").await;
        tokio::time::sleep(Duration::from_secs(1)).await;

        let before = Instant::now();
        limiter.acquire("a.com").await;
        assert_eq!(Instant::now(), before);
    }
}
