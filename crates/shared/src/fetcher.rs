use anyhow::{Context, Result};
use async_trait::async_trait;
use reqwest::Client;
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::sync::Arc;
use std::time::Duration;

use crate::cache::{CacheStore, Codec};
use crate::config::Settings;

#[derive(Debug, thiserror::Error)]
pub enum FetchError {
    #[error("request timed out after {0:?}")]
    Timeout(Duration),

    #[error("transport error: {0}")]
    Transport(String),

    #[error("HTTP {status} from {url}")]
    Status { status: u16, url: String },

    #[error("could not parse page: {0}")]
    Parse(String),
}

impl From<reqwest::Error> for FetchError {
    fn from(err: reqwest::Error) -> Self {
        FetchError::Transport(err.to_string())
    }
}

/// Anything that can turn a URL into page text
#[async_trait]
pub trait PageSource: Send + Sync {
    async fn fetch_page(&self, url: &str, timeout: Duration) -> Result<String, FetchError>;
}

pub struct HttpPageSource {
    client: Client,
}

impl HttpPageSource {
    pub fn new() -> Result<Self> {
        let client = Client::builder()
            .user_agent("Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36")
            .build()
            .context("Failed to create HTTP client")?;

        Ok(Self { client })
    }
}

#[async_trait]
impl PageSource for HttpPageSource {
    async fn fetch_page(&self, url: &str, timeout: Duration) -> Result<String, FetchError> {
        let response = self
            .client
            .get(url)
            .timeout(timeout)
            .send()
            .await
            .map_err(|e| classify(e, timeout))?;

        let status = response.status();
        if !status.is_success() {
            return Err(FetchError::Status {
                status: status.as_u16(),
                url: url.to_string(),
            });
        }

        response.text().await.map_err(|e| classify(e, timeout))
    }
}

fn classify(err: reqwest::Error, timeout: Duration) -> FetchError {
    if err.is_timeout() {
        FetchError::Timeout(timeout)
    } else {
        FetchError::from(err)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    pub max_retries: u32,
    pub timeout: Duration,
    /// Base delay between attempts, doubled each time. Zero retries immediately.
    pub backoff: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_retries: 3,
            timeout: Duration::from_secs(10),
            backoff: Duration::ZERO,
        }
    }
}

impl RetryPolicy {
    pub fn from_settings(settings: &Settings) -> Self {
        Self {
            max_retries: settings.max_retries(),
            timeout: settings.timeout(),
            backoff: settings.retry_backoff(),
        }
    }

    fn attempts(&self) -> u32 {
        self.max_retries.max(1)
    }

    fn delay_after(&self, attempt: u32) -> Duration {
        self.backoff
            .saturating_mul(2_u32.saturating_pow(attempt.saturating_sub(1)))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DataOrigin {
    Cache,
    Live,
    Fallback,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Fetched<T> {
    pub data: T,
    pub origin: DataOrigin,
}

impl<T> Fetched<T> {
    pub fn is_degraded(&self) -> bool {
        self.origin == DataOrigin::Fallback
    }

    pub fn from_cache(&self) -> bool {
        self.origin == DataOrigin::Cache
    }
}

/// Cache-first fetch with a bounded number of attempts and a fallback value
pub struct RetryingFetcher {
    source: Arc<dyn PageSource>,
    policy: RetryPolicy,
}

impl RetryingFetcher {
    pub fn new(source: Arc<dyn PageSource>, policy: RetryPolicy) -> Self {
        Self { source, policy }
    }

    pub fn policy(&self) -> &RetryPolicy {
        &self.policy
    }

    pub async fn fetch<T, C, P, F>(
        &self,
        cache: &CacheStore<C>,
        url: &str,
        cache_key: &str,
        parse: P,
        fallback: F,
    ) -> Fetched<T>
    where
        T: Serialize + DeserializeOwned,
        C: Codec,
        P: Fn(&str) -> Result<T, FetchError>,
        F: FnOnce() -> T,
    {
        if let Some(data) = cache.get::<T>(cache_key) {
            tracing::info!(cache_key, "using cached data");
            return Fetched {
                data,
                origin: DataOrigin::Cache,
            };
        }

        let attempts = self.policy.attempts();

        for attempt in 1..=attempts {
            match self.attempt(url).await {
                Ok(body) => match parse(&body) {
                    Ok(data) => {
                        if let Err(e) = cache.set(cache_key, &data) {
                            tracing::error!(cache_key, "failed to store cache entry: {:#}", e);
                        }
                        tracing::info!(cache_key, attempt, "fetched live data");
                        return Fetched {
                            data,
                            origin: DataOrigin::Live,
                        };
                    }
                    Err(e) => {
                        tracing::error!(cache_key, url, "{}", e);
                        break;
                    }
                },
                Err(e) => {
                    tracing::warn!(cache_key, "attempt {}/{} failed: {}", attempt, attempts, e);
                    if attempt < attempts {
                        let delay = self.policy.delay_after(attempt);
                        if !delay.is_zero() {
                            tokio::time::sleep(delay).await;
                        }
                    }
                }
            }
        }

        tracing::error!(cache_key, url, "giving up, using fallback data");
        Fetched {
            data: fallback(),
            origin: DataOrigin::Fallback,
        }
    }

    async fn attempt(&self, url: &str) -> Result<String, FetchError> {
        let timeout = self.policy.timeout;
        match tokio::time::timeout(timeout, self.source.fetch_page(url, timeout)).await {
            Ok(result) => result,
            Err(_) => Err(FetchError::Timeout(timeout)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct CountingSource {
        calls: AtomicUsize,
        fail_first: usize,
        body: &'static str,
    }

    impl CountingSource {
        fn new(fail_first: usize, body: &'static str) -> Arc<Self> {
            Arc::new(Self {
                calls: AtomicUsize::new(0),
                fail_first,
                body,
            })
        }

        fn calls(&self) -> usize {
            self.calls.load(Ordering::SeqCst)
        }
    }

    #[async_trait]
    impl PageSource for CountingSource {
        async fn fetch_page(&self, _url: &str, _timeout: Duration) -> Result<String, FetchError> {
            let n = self.calls.fetch_add(1, Ordering::SeqCst);
            if n < self.fail_first {
                Err(FetchError::Transport("connection reset".into()))
            } else {
                Ok(self.body.to_string())
            }
        }
    }

    struct HangingSource;

    #[async_trait]
    impl PageSource for HangingSource {
        async fn fetch_page(&self, _url: &str, _timeout: Duration) -> Result<String, FetchError> {
            tokio::time::sleep(Duration::from_secs(3600)).await;
            Ok(String::new())
        }
    }

    fn parse_words(body: &str) -> Result<Vec<String>, FetchError> {
        let words: Vec<String> = body.split_whitespace().map(String::from).collect();
        if words.is_empty() {
            return Err(FetchError::Parse("empty body".into()));
        }
        Ok(words)
    }

    fn fallback_words() -> Vec<String> {
        vec!["fallback".to_string()]
    }

    fn policy(max_retries: u32) -> RetryPolicy {
        RetryPolicy {
            max_retries,
            timeout: Duration::from_millis(200),
            backoff: Duration::ZERO,
        }
    }

    fn cache() -> (TempDir, CacheStore) {
        let dir = TempDir::new().unwrap();
        let cache = CacheStore::new(dir.path(), Duration::from_secs(1800));
        (dir, cache)
    }

    #[tokio::test]
    async fn test_cache_hit_skips_network() {
        let (_dir, cache) = cache();
        cache.set("k", &vec!["cached".to_string()]).unwrap();
        let source = CountingSource::new(0, "live");
        let fetcher = RetryingFetcher::new(source.clone(), policy(3));

        let result = fetcher
            .fetch(&cache, "http://x", "k", parse_words, fallback_words)
            .await;

        assert_eq!(source.calls(), 0);
        assert_eq!(result.origin, DataOrigin::Cache);
        assert_eq!(result.data, vec!["cached".to_string()]);
    }

    #[tokio::test]
    async fn test_success_is_cached() {
        let (_dir, cache) = cache();
        let source = CountingSource::new(0, "alpha beta");
        let fetcher = RetryingFetcher::new(source.clone(), policy(3));

        let result = fetcher
            .fetch(&cache, "http://x", "k", parse_words, fallback_words)
            .await;

        assert_eq!(result.origin, DataOrigin::Live);
        assert_eq!(source.calls(), 1);
        assert_eq!(
            cache.get::<Vec<String>>("k"),
            Some(vec!["alpha".to_string(), "beta".to_string()])
        );
    }

    #[tokio::test]
    async fn test_recovers_after_transient_failures() {
        let (_dir, cache) = cache();
        let source = CountingSource::new(2, "ok");
        let fetcher = RetryingFetcher::new(source.clone(), policy(3));

        let result = fetcher
            .fetch(&cache, "http://x", "k", parse_words, fallback_words)
            .await;

        assert_eq!(source.calls(), 3);
        assert_eq!(result.origin, DataOrigin::Live);
    }

    #[tokio::test]
    async fn test_exhausts_retries_then_falls_back() {
        let (_dir, cache) = cache();
        let source = CountingSource::new(usize::MAX, "");
        let fetcher = RetryingFetcher::new(source.clone(), policy(3));

        let result = fetcher
            .fetch(&cache, "http://x", "k", parse_words, fallback_words)
            .await;

        assert_eq!(source.calls(), 3);
        assert!(result.is_degraded());
        assert_eq!(result.data, fallback_words());
        assert!(!cache.is_valid("k"));
    }

    #[tokio::test]
    async fn test_parse_failure_does_not_retry() {
        let (_dir, cache) = cache();
        let source = CountingSource::new(0, "   ");
        let fetcher = RetryingFetcher::new(source.clone(), policy(3));

        let result = fetcher
            .fetch(&cache, "http://x", "k", parse_words, fallback_words)
            .await;

        assert_eq!(source.calls(), 1);
        assert!(result.is_degraded());
        assert!(!cache.is_valid("k"));
    }

    #[tokio::test]
    async fn test_zero_retries_still_attempts_once() {
        let (_dir, cache) = cache();
        let source = CountingSource::new(usize::MAX, "");
        let fetcher = RetryingFetcher::new(source.clone(), policy(0));

        let result = fetcher
            .fetch(&cache, "http://x", "k", parse_words, fallback_words)
            .await;

        assert_eq!(source.calls(), 1);
        assert!(result.is_degraded());
    }

    #[tokio::test]
    async fn test_attempt_is_bounded_by_timeout() {
        let (_dir, cache) = cache();
        let fetcher = RetryingFetcher::new(Arc::new(HangingSource), policy(2));

        let result = fetcher
            .fetch(&cache, "http://x", "k", parse_words, fallback_words)
            .await;

        assert!(result.is_degraded());
    }

    #[test]
    fn test_backoff_doubles() {
        let policy = RetryPolicy {
            backoff: Duration::from_millis(100),
            ..RetryPolicy::default()
        };
        assert_eq!(policy.delay_after(1), Duration::from_millis(100));
        assert_eq!(policy.delay_after(2), Duration::from_millis(200));
        assert_eq!(policy.delay_after(3), Duration::from_millis(400));
    }

    #[test]
    fn test_backoff_saturates_instead_of_overflowing() {
        let policy = RetryPolicy {
            backoff: Duration::from_secs(u64::MAX / 2),
            ..RetryPolicy::default()
        };
        assert_eq!(policy.delay_after(40), Duration::MAX);
    }

    #[tokio::test]
    async fn test_http_source_returns_page_text() {
        let mut server = mockito::Server::new_async().await;
        let mock = server
            .mock("GET", "/sise/")
            .with_status(200)
            .with_body("<span id=\"KOSPI_now\">2,600.00</span>")
            .create_async()
            .await;

        let source = HttpPageSource::new().unwrap();
        let body = source
            .fetch_page(&format!("{}/sise/", server.url()), Duration::from_secs(5))
            .await
            .unwrap();

        assert!(body.contains("KOSPI_now"));
        mock.assert_async().await;
    }

    #[tokio::test]
    async fn test_http_source_maps_error_status() {
        let mut server = mockito::Server::new_async().await;
        let _mock = server
            .mock("GET", "/sise/sise_rise.naver")
            .with_status(503)
            .create_async()
            .await;

        let url = format!("{}/sise/sise_rise.naver", server.url());
        let err = HttpPageSource::new()
            .unwrap()
            .fetch_page(&url, Duration::from_secs(5))
            .await
            .unwrap_err();

        match err {
            FetchError::Status { status, url: failed } => {
                assert_eq!(status, 503);
                assert_eq!(failed, url);
            }
            other => panic!("expected status error, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_http_source_reports_timeout() {
        // Accepts connections but never answers
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let silent = tokio::spawn(async move {
            let mut held = Vec::new();
            while let Ok((socket, _)) = listener.accept().await {
                held.push(socket);
            }
        });

        let timeout = Duration::from_millis(200);
        let err = HttpPageSource::new()
            .unwrap()
            .fetch_page(&format!("http://{addr}/sise/"), timeout)
            .await
            .unwrap_err();

        assert!(matches!(err, FetchError::Timeout(t) if t == timeout));
        silent.abort();
    }

    #[tokio::test]
    async fn test_retrying_fetcher_over_http_falls_back() {
        let mut server = mockito::Server::new_async().await;
        let mock = server
            .mock("GET", "/news/mainnews.naver")
            .with_status(500)
            .expect(3)
            .create_async()
            .await;

        let (_dir, cache) = cache();
        let fetcher = RetryingFetcher::new(Arc::new(HttpPageSource::new().unwrap()), policy(3));
        let url = format!("{}/news/mainnews.naver", server.url());

        let result = fetcher
            .fetch(&cache, &url, "k", parse_words, fallback_words)
            .await;

        assert!(result.is_degraded());
        mock.assert_async().await;
    }
}
