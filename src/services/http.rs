use governor::clock::DefaultClock;
use governor::state::{InMemoryState, NotKeyed};
use governor::{Quota, RateLimiter};
use reqwest::{header::CONTENT_TYPE, Client, Method};
use serde::de::DeserializeOwned;
use std::num::NonZeroU32;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;

/// Errors that can occur when calling an external HTTP service
#[derive(Debug, Error)]
pub enum ExternalServiceError {
    #[error("Rate limited by upstream: {url}")]
    RateLimited { url: String },

    #[error("Client error {status} from {url}: {body}")]
    ClientError { status: u16, url: String, body: String },

    #[error("Server error {status} from {url}")]
    ServerError { status: u16, url: String },

    #[error("Request timed out: {0}")]
    Timeout(String),

    #[error("HTTP request failed: {0}")]
    Network(#[from] reqwest::Error),

    #[error("Invalid response format: {0}")]
    Decode(String),
}

impl ExternalServiceError {
    /// 429, 5xx, timeouts and transport failures are worth another attempt
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            ExternalServiceError::RateLimited { .. }
                | ExternalServiceError::ServerError { .. }
                | ExternalServiceError::Timeout(_)
                | ExternalServiceError::Network(_)
        )
    }

    fn from_reqwest(err: reqwest::Error, url: &str) -> Self {
        if err.is_timeout() {
            ExternalServiceError::Timeout(url.to_string())
        } else {
            ExternalServiceError::Network(err)
        }
    }
}

/// Unkeyed limiter shared by every outbound request
pub type RequestLimiter = RateLimiter<NotKeyed, InMemoryState, DefaultClock>;

/// `requests_per_minute` calls per minute, bursting up to the same number
///
/// Cells refill continuously, one every `60 / requests_per_minute` seconds.
pub fn per_minute_quota(requests_per_minute: u32) -> Quota {
    Quota::per_minute(NonZeroU32::new(requests_per_minute).unwrap_or(NonZeroU32::MIN))
}

/// A fresh limiter for one upstream quota; it starts with a full burst
pub fn per_minute_limiter(requests_per_minute: u32) -> RequestLimiter {
    RateLimiter::direct(per_minute_quota(requests_per_minute))
}

/// Retry budget and backoff curve
#[derive(Debug, Clone)]
pub struct RetryPolicy {
    /// Extra attempts after the first one
    pub retries: u32,
    pub backoff_base: Duration,
    pub backoff_cap: Duration,
}

impl RetryPolicy {
    /// Delay before retry number `attempt` (0-based): `base * 2^attempt`, capped
    pub fn delay(&self, attempt: u32) -> Duration {
        let factor = 2u32.saturating_pow(attempt);
        self.backoff_base
            .checked_mul(factor)
            .unwrap_or(self.backoff_cap)
            .min(self.backoff_cap)
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            retries: 3,
            backoff_base: Duration::from_millis(1000),
            backoff_cap: Duration::from_millis(8000),
        }
    }
}

/// Per-request options
#[derive(Debug, Clone, Default)]
pub struct RequestOptions {
    pub query: Vec<(String, String)>,
    pub headers: Vec<(String, String)>,
    pub bearer: Option<String>,
    pub timeout: Option<Duration>,
}

impl RequestOptions {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn query(mut self, key: &str, value: impl ToString) -> Self {
        self.query.push((key.to_string(), value.to_string()));
        self
    }

    /// Add a query parameter only when a value is present
    pub fn query_opt<T: ToString>(self, key: &str, value: Option<T>) -> Self {
        match value {
            Some(value) => self.query(key, value),
            None => self,
        }
    }

    pub fn header(mut self, key: &str, value: impl ToString) -> Self {
        self.headers.push((key.to_string(), value.to_string()));
        self
    }

    pub fn bearer(mut self, token: impl ToString) -> Self {
        self.bearer = Some(token.to_string());
        self
    }

    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }
}

/// Request payload
#[derive(Debug, Clone)]
pub enum RequestBody {
    Json(serde_json::Value),
    Text(String),
}

/// Shared HTTP client with rate limiting and bounded retries
///
/// Cloned into every provider and enrichment source; clones share the limiter.
#[derive(Debug, Clone)]
pub struct RetryClient {
    http: Client,
    limiter: Arc<RequestLimiter>,
    policy: RetryPolicy,
    default_timeout: Duration,
}

impl RetryClient {
    pub fn new(
        limiter: Arc<RequestLimiter>,
        policy: RetryPolicy,
        default_timeout: Duration,
    ) -> Result<Self, ExternalServiceError> {
        let http = Client::builder()
            .user_agent(concat!("estate-match/", env!("CARGO_PKG_VERSION")))
            .build()?;

        Ok(Self {
            http,
            limiter,
            policy,
            default_timeout,
        })
    }

    pub async fn get(&self, url: &str, opts: &RequestOptions) -> Result<String, ExternalServiceError> {
        self.execute(Method::GET, url, None, opts).await
    }

    pub async fn post(
        &self,
        url: &str,
        body: &RequestBody,
        opts: &RequestOptions,
    ) -> Result<String, ExternalServiceError> {
        self.execute(Method::POST, url, Some(body), opts).await
    }

    pub async fn get_json<T: DeserializeOwned>(
        &self,
        url: &str,
        opts: &RequestOptions,
    ) -> Result<T, ExternalServiceError> {
        let body = self.get(url, opts).await?;
        decode(url, &body)
    }

    pub async fn post_json<T: DeserializeOwned>(
        &self,
        url: &str,
        body: &RequestBody,
        opts: &RequestOptions,
    ) -> Result<T, ExternalServiceError> {
        let body = self.post(url, body, opts).await?;
        decode(url, &body)
    }

    async fn execute(
        &self,
        method: Method,
        url: &str,
        body: Option<&RequestBody>,
        opts: &RequestOptions,
    ) -> Result<String, ExternalServiceError> {
        let mut attempt = 0;

        loop {
            self.limiter.until_ready().await;
            tracing::debug!("{} {} (attempt {})", method, url, attempt + 1);

            match self.send_once(method.clone(), url, body, opts).await {
                Ok(text) => return Ok(text),
                Err(e) if e.is_retryable() && attempt < self.policy.retries => {
                    let delay = self.policy.delay(attempt);
                    tracing::warn!("{} {} failed ({}), retrying in {:?}", method, url, e, delay);
                    tokio::time::sleep(delay).await;
                    attempt += 1;
                }
                Err(e) => {
                    tracing::warn!("{} {} gave up after {} attempt(s): {}", method, url, attempt + 1, e);
                    return Err(e);
                }
            }
        }
    }

    async fn send_once(
        &self,
        method: Method,
        url: &str,
        body: Option<&RequestBody>,
        opts: &RequestOptions,
    ) -> Result<String, ExternalServiceError> {
        let mut request = self
            .http
            .request(method, url)
            .timeout(opts.timeout.unwrap_or(self.default_timeout));

        if !opts.query.is_empty() {
            request = request.query(&opts.query);
        }
        for (key, value) in &opts.headers {
            request = request.header(key.as_str(), value.as_str());
        }
        if let Some(token) = &opts.bearer {
            request = request.bearer_auth(token);
        }
        request = match body {
            Some(RequestBody::Json(value)) => request.json(value),
            Some(RequestBody::Text(text)) => request
                .header(CONTENT_TYPE, "text/plain")
                .body(text.clone()),
            None => request,
        };

        let response = request
            .send()
            .await
            .map_err(|e| ExternalServiceError::from_reqwest(e, url))?;

        let status = response.status();
        if status.is_success() {
            return response
                .text()
                .await
                .map_err(|e| ExternalServiceError::from_reqwest(e, url));
        }

        if status.as_u16() == 429 {
            return Err(ExternalServiceError::RateLimited { url: url.to_string() });
        }

        if status.is_server_error() {
            return Err(ExternalServiceError::ServerError {
                status: status.as_u16(),
                url: url.to_string(),
            });
        }

        let body = response
            .text()
            .await
            .unwrap_or_else(|_| "Unable to read body".to_string());
        Err(ExternalServiceError::ClientError {
            status: status.as_u16(),
            url: url.to_string(),
            body,
        })
    }
}

fn decode<T: DeserializeOwned>(url: &str, body: &str) -> Result<T, ExternalServiceError> {
    serde_json::from_str(body)
        .map_err(|e| ExternalServiceError::Decode(format!("{}: {}", url, e)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use governor::clock::{Clock, FakeRelativeClock};
    use mockito::Matcher;

    fn fast_client(retries: u32) -> RetryClient {
        let policy = RetryPolicy {
            retries,
            backoff_base: Duration::from_millis(1),
            backoff_cap: Duration::from_millis(4),
        };
        RetryClient::new(
            Arc::new(per_minute_limiter(6000)),
            policy,
            Duration::from_secs(5),
        )
        .unwrap()
    }

    #[test]
    fn test_backoff_curve() {
        let policy = RetryPolicy::default();
        assert_eq!(policy.delay(0), Duration::from_secs(1));
        assert_eq!(policy.delay(1), Duration::from_secs(2));
        assert_eq!(policy.delay(2), Duration::from_secs(4));
        assert_eq!(policy.delay(3), Duration::from_secs(8));
        assert_eq!(policy.delay(10), Duration::from_secs(8));
        assert_eq!(policy.delay(40), Duration::from_secs(8));
    }

    #[test]
    fn test_retryable_classification() {
        assert!(ExternalServiceError::RateLimited { url: "u".into() }.is_retryable());
        assert!(ExternalServiceError::ServerError { status: 503, url: "u".into() }.is_retryable());
        assert!(ExternalServiceError::Timeout("u".into()).is_retryable());
        assert!(!ExternalServiceError::ClientError {
            status: 404,
            url: "u".into(),
            body: String::new()
        }
        .is_retryable());
        assert!(!ExternalServiceError::Decode("bad".into()).is_retryable());
    }

    type FakeLimiter = RateLimiter<
        NotKeyed,
        InMemoryState,
        FakeRelativeClock,
        governor::middleware::NoOpMiddleware<governor::nanos::Nanos>,
    >;

    fn fake_limiter(requests_per_minute: u32) -> (FakeLimiter, FakeRelativeClock) {
        let clock = FakeRelativeClock::default();
        let limiter = RateLimiter::direct_with_clock(per_minute_quota(requests_per_minute), clock.clone());
        (limiter, clock)
    }

    /// Admit `calls` requests back to back, advancing the fake clock whenever
    /// the limiter says to wait. Returns the total time waited.
    fn admit(limiter: &FakeLimiter, clock: &FakeRelativeClock, calls: usize) -> Duration {
        let mut waited = Duration::ZERO;
        for _ in 0..calls {
            while let Err(not_until) = limiter.check() {
                let wait = not_until.wait_time_from(clock.now());
                clock.advance(wait);
                waited += wait;
            }
        }
        waited
    }

    #[test]
    fn test_limiter_one_per_minute() {
        let (limiter, clock) = fake_limiter(1);

        let waited = admit(&limiter, &clock, 3);

        assert!(waited >= Duration::from_secs(120), "waited {:?}", waited);
        assert!(waited < Duration::from_secs(125), "waited {:?}", waited);
    }

    #[test]
    fn test_limiter_bursts_up_to_quota() {
        let (limiter, clock) = fake_limiter(5);

        assert_eq!(admit(&limiter, &clock, 5), Duration::ZERO);

        // Sixth waits for one refill interval (12s at 5/min)
        let waited = admit(&limiter, &clock, 1);
        assert!(waited >= Duration::from_secs(11) && waited <= Duration::from_secs(12), "waited {:?}", waited);
    }

    #[test]
    fn test_independent_limiters_do_not_share_cells() {
        let (a, clock_a) = fake_limiter(1);
        let (b, clock_b) = fake_limiter(1);

        assert_eq!(admit(&a, &clock_a, 1), Duration::ZERO);
        assert_eq!(admit(&b, &clock_b, 1), Duration::ZERO);
        assert!(a.check().is_err());
    }

    #[test]
    fn test_zero_quota_is_clamped_to_one() {
        let (limiter, clock) = fake_limiter(0);
        assert_eq!(admit(&limiter, &clock, 1), Duration::ZERO);
        assert!(limiter.check().is_err());
    }

    #[tokio::test]
    async fn test_get_returns_body_with_options() {
        let mut server = mockito::Server::new_async().await;
        let mock = server
            .mock("GET", "/search")
            .match_query(Matcher::UrlEncoded("city".into(), "Moscow".into()))
            .match_header("authorization", "Bearer secret")
            .match_header("x-partner", "42")
            .with_status(200)
            .with_body(r#"{"ok":true}"#)
            .create_async()
            .await;

        let client = fast_client(0);
        let opts = RequestOptions::new()
            .query("city", "Moscow")
            .bearer("secret")
            .header("x-partner", 42);

        let value: serde_json::Value = client
            .get_json(&format!("{}/search", server.url()), &opts)
            .await
            .unwrap();

        assert_eq!(value["ok"], true);
        mock.assert_async().await;
    }

    #[tokio::test]
    async fn test_server_error_retried_until_budget_exhausted() {
        let mut server = mockito::Server::new_async().await;
        let mock = server
            .mock("GET", "/flaky")
            .with_status(503)
            .expect(3)
            .create_async()
            .await;

        let client = fast_client(2);
        let result = client
            .get(&format!("{}/flaky", server.url()), &RequestOptions::new())
            .await;

        assert!(matches!(result, Err(ExternalServiceError::ServerError { status: 503, .. })));
        mock.assert_async().await;
    }

    #[tokio::test]
    async fn test_rate_limited_retried_then_reported() {
        let mut server = mockito::Server::new_async().await;
        let mock = server
            .mock("GET", "/busy")
            .with_status(429)
            .expect(2)
            .create_async()
            .await;

        let client = fast_client(1);
        let result = client
            .get(&format!("{}/busy", server.url()), &RequestOptions::new())
            .await;

        assert!(matches!(result, Err(ExternalServiceError::RateLimited { .. })));
        mock.assert_async().await;
    }

    #[tokio::test]
    async fn test_rate_limited_then_success() {
        let mut server = mockito::Server::new_async().await;
        let busy = server
            .mock("GET", "/quota")
            .with_status(429)
            .expect(1)
            .create_async()
            .await;
        let ok = server
            .mock("GET", "/quota")
            .with_status(200)
            .with_body("done")
            .expect(1)
            .create_async()
            .await;

        let client = fast_client(3);
        let body = client
            .get(&format!("{}/quota", server.url()), &RequestOptions::new())
            .await
            .unwrap();

        assert_eq!(body, "done");
        busy.assert_async().await;
        ok.assert_async().await;
    }

    #[tokio::test]
    async fn test_client_error_not_retried() {
        let mut server = mockito::Server::new_async().await;
        let mock = server
            .mock("GET", "/missing")
            .with_status(404)
            .with_body("no such item")
            .expect(1)
            .create_async()
            .await;

        let client = fast_client(3);
        let result = client
            .get(&format!("{}/missing", server.url()), &RequestOptions::new())
            .await;

        match result {
            Err(ExternalServiceError::ClientError { status, body, .. }) => {
                assert_eq!(status, 404);
                assert_eq!(body, "no such item");
            }
            other => panic!("expected client error, got {:?}", other),
        }
        mock.assert_async().await;
    }

    #[tokio::test]
    async fn test_post_text_body() {
        let mut server = mockito::Server::new_async().await;
        let mock = server
            .mock("POST", "/interpreter")
            .match_header("content-type", "text/plain")
            .match_body("[out:json];")
            .with_status(200)
            .with_body("{}")
            .create_async()
            .await;

        let client = fast_client(0);
        let body = RequestBody::Text("[out:json];".to_string());
        client
            .post(&format!("{}/interpreter", server.url()), &body, &RequestOptions::new())
            .await
            .unwrap();

        mock.assert_async().await;
    }

    #[tokio::test]
    async fn test_malformed_json_is_decode_error() {
        let mut server = mockito::Server::new_async().await;
        let _mock = server
            .mock("GET", "/garbage")
            .with_status(200)
            .with_body("<html>")
            .create_async()
            .await;

        let client = fast_client(0);
        let result: Result<serde_json::Value, _> = client
            .get_json(&format!("{}/garbage", server.url()), &RequestOptions::new())
            .await;

        assert!(matches!(result, Err(ExternalServiceError::Decode(_))));
    }
}
