// src/services/fetcher.rs

//! Rate-limited, retried page fetching.

use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use async_trait::async_trait;
use serde::Serialize;
use tokio_util::sync::CancellationToken;

use crate::error::{FetchError, Result};
use crate::models::Config;
use crate::services::rate_limit::RateLimiter;
use crate::services::retry::RetryPolicy;
use crate::utils::host_key;
use crate::utils::http::create_async_client;

/// A single raw GET. Implementations classify their own failures.
#[async_trait]
pub trait Transport: Send + Sync {
    async fn get(&self, url: &str) -> std::result::Result<String, FetchError>;
}

/// [`Transport`] backed by a shared `reqwest` client.
pub struct HttpTransport {
    client: reqwest::Client,
}

impl HttpTransport {
    pub fn new(client: reqwest::Client) -> Self {
        Self { client }
    }
}

#[async_trait]
impl Transport for HttpTransport {
    async fn get(&self, url: &str) -> std::result::Result<String, FetchError> {
        let response = self
            .client
            .get(url)
            .send()
            .await
            .map_err(|e| FetchError::from_transport(url, &e))?;

        let status = response.status();
        if !status.is_success() {
            return Err(FetchError::from_status(url, status.as_u16()));
        }

        response
            .text()
            .await
            .map_err(|e| FetchError::from_transport(url, &e))
    }
}

/// Body of a successfully fetched page.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RawPage {
    pub url: String,
    pub body: String,
}

/// Request counters, readable while a crawl is running.
#[derive(Debug, Default)]
struct Counters {
    requests: AtomicU64,
    retries: AtomicU64,
    failures: AtomicU64,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct FetchStats {
    pub requests: u64,
    pub retries: u64,
    pub failures: u64,
}

/// Performs one logical "get page": rate limit, then retry with backoff.
pub struct Fetcher {
    transport: Arc<dyn Transport>,
    limiter: Arc<RateLimiter>,
    policy: RetryPolicy,
    cancel: CancellationToken,
    counters: Counters,
}

impl Fetcher {
    pub fn new(
        transport: Arc<dyn Transport>,
        limiter: Arc<RateLimiter>,
        policy: RetryPolicy,
    ) -> Self {
        Self {
            transport,
            limiter,
            policy,
            cancel: CancellationToken::new(),
            counters: Counters::default(),
        }
    }

    /// Build an HTTP fetcher from configuration.
    pub fn from_config(config: &Config) -> Result<Self> {
        let client = create_async_client(&config.crawler)?;
        Ok(Self::new(
            Arc::new(HttpTransport::new(client)),
            Arc::new(RateLimiter::new(config.crawler.request_delay())),
            RetryPolicy::from_config(&config.retry),
        ))
    }

    /// Abort in-flight and future fetches when `token` is cancelled.
    pub fn with_cancellation(mut self, token: CancellationToken) -> Self {
        self.cancel = token;
        self
    }

    pub fn stats(&self) -> FetchStats {
        FetchStats {
            requests: self.counters.requests.load(Ordering::Relaxed),
            retries: self.counters.retries.load(Ordering::Relaxed),
            failures: self.counters.failures.load(Ordering::Relaxed),
        }
    }

    pub async fn fetch(&self, url: &str) -> std::result::Result<RawPage, FetchError> {
        if self.cancel.is_cancelled() {
            return Err(FetchError::cancelled(url));
        }

        let host = host_key(url);
        let attempts = self.policy.execute(|attempt| {
            let host = &host;
            async move {
                if attempt > 0 {
                    self.counters.retries.fetch_add(1, Ordering::Relaxed);
                }
                self.limiter.acquire(host).await;
                self.counters.requests.fetch_add(1, Ordering::Relaxed);
                self.transport.get(url).await
            }
        });

        let result = tokio::select! {
            biased;
            _ = self.cancel.cancelled() => Err(FetchError::cancelled(url)),
            result = attempts => result.map_err(|f| f.error.with_attempts(f.attempts)),
        };

        match result {
            Ok(body) => {
                log::debug!("Fetched {} ({} bytes)", url, body.len());
                Ok(RawPage {
                    url: url.to_string(),
                    body,
                })
            }
            Err(error) => {
                if !error.is_cancelled() {
                    self.counters.failures.fetch_add(1, Ordering::Relaxed);
                }
                Err(error)
            }
        }
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use std::collections::{HashMap, VecDeque};
    use std::sync::Mutex;
    use std::time::Duration;

    use tokio::time::Instant;

    use super::*;
    use crate::error::FetchErrorKind;

    /// Transport answering from per-URL scripts; the last entry repeats.
    #[derive(Default)]
    pub(crate) struct ScriptedTransport {
        scripts: Mutex<HashMap<String, VecDeque<std::result::Result<String, FetchError>>>>,
        pub(crate) calls: Mutex<Vec<(String, Instant)>>,
    }

    impl ScriptedTransport {
        pub(crate) fn respond(
            &self,
            url: &str,
            responses: Vec<std::result::Result<String, FetchError>>,
        ) {
            self.scripts
                .lock()
                .unwrap()
                .insert(url.to_string(), responses.into());
        }
    }

    #[async_trait]
    impl Transport for ScriptedTransport {
        async fn get(&self, url: &str) -> std::result::Result<String, FetchError> {
            self.calls
                .lock()
                .unwrap()
                .push((url.to_string(), Instant::now()));
            let mut scripts = self.scripts.lock().unwrap();
            let Some(queue) = scripts.get_mut(url) else {
                return Err(FetchError::from_status(url, 404));
            };
            if queue.len() > 1 {
                queue.pop_front().unwrap()
            } else {
                queue.front().cloned().unwrap()
            }
        }
    }

    fn fetcher(transport: Arc<ScriptedTransport>, interval: Duration) -> Fetcher {
        Fetcher::new(
            transport,
            Arc::new(RateLimiter::new(interval)),
            RetryPolicy::new(3, Duration::from_secs(1)),
        )
    }

    #[tokio::test(start_paused = true)]
    async fn backoff_before_second_and_third_attempt() {
        let transport = Arc::new(ScriptedTransport::default());
        let url = "https://example.com/item";
        transport.respond(
            url,
            vec![
                Err(FetchError::from_status(url, 503)),
                Err(FetchError::transient(url, "connection reset")),
                Ok("<html>ok</html>".into()),
            ],
        );

        let fetcher = fetcher(Arc::clone(&transport), Duration::ZERO);
        let page = fetcher.fetch(url).await.unwrap();
        assert_eq!(page.body, "<html>ok</html>");

        let calls = transport.calls.lock().unwrap();
        assert_eq!(calls.len(), 3);
        assert_eq!(calls[1].1 - calls[0].1, Duration::from_secs(1));
        assert_eq!(calls[2].1 - calls[1].1, Duration::from_secs(2));

        let stats = fetcher.stats();
        assert_eq!(stats.requests, 3);
        assert_eq!(stats.retries, 2);
        assert_eq!(stats.failures, 0);
    }

    #[tokio::test(start_paused = true)]
    async fn terminal_status_is_not_retried() {
        let transport = Arc::new(ScriptedTransport::default());
        let fetcher = fetcher(Arc::clone(&transport), Duration::ZERO);

        let err = fetcher.fetch("https://example.com/gone").await.unwrap_err();
        assert_eq!(err.kind, FetchErrorKind::Terminal);
        assert_eq!(err.status, Some(404));
        assert_eq!(err.attempts, 1);
        assert_eq!(transport.calls.lock().unwrap().len(), 1);
        assert_eq!(fetcher.stats().failures, 1);
    }

    #[tokio::test(start_paused = true)]
    async fn exhausted_retries_carry_attempt_count() {
        let transport = Arc::new(ScriptedTransport::default());
        let url = "https://example.com/down";
        transport.respond(url, vec![Err(FetchError::from_status(url, 500))]);

        let fetcher = fetcher(Arc::clone(&transport), Duration::ZERO);
        let err = fetcher.fetch(url).await.unwrap_err();
        assert_eq!(err.kind, FetchErrorKind::Transient);
        assert_eq!(err.attempts, 4);
    }

    #[tokio::test(start_paused = true)]
    async fn each_attempt_is_rate_limited() {
        let transport = Arc::new(ScriptedTransport::default());
        let a = "https://example.com/a";
        let b = "https://example.com/b";
        transport.respond(a, vec![Ok("a".into())]);
        transport.respond(b, vec![Ok("b".into())]);

        let fetcher = fetcher(Arc::clone(&transport), Duration::from_millis(500));
        let (ra, rb) = tokio::join!(fetcher.fetch(a), fetcher.fetch(b));
        assert!(ra.is_ok() && rb.is_ok());

        let calls = transport.calls.lock().unwrap();
        let gap = if calls[1].1 > calls[0].1 {
            calls[1].1 - calls[0].1
        } else {
            calls[0].1 - calls[1].1
        };
        assert!(gap >= Duration::from_millis(500));
    }

    #[tokio::test(start_paused = true)]
    async fn cancellation_aborts_backoff() {
        let transport = Arc::new(ScriptedTransport::default());
        let url = "https://example.com/slow";
        transport.respond(url, vec![Err(FetchError::from_status(url, 503))]);

        let token = CancellationToken::new();
        let fetcher =
            fetcher(Arc::clone(&transport), Duration::ZERO).with_cancellation(token.clone());

        let cancel = async {
            tokio::time::sleep(Duration::from_millis(1500)).await;
            token.cancel();
        };
        let (result, _) = tokio::join!(fetcher.fetch(url), cancel);

        let err = result.unwrap_err();
        assert!(err.is_cancelled());
        assert_eq!(fetcher.stats().failures, 0);
        assert!(fetcher.fetch(url).await.unwrap_err().is_cancelled());
    }
}
