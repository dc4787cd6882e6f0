//! Rate-limited JSON client shared by the venue adapters.

use governor::clock::DefaultClock;
use governor::state::{InMemoryState, NotKeyed};
use governor::{Quota, RateLimiter};
use nonzero_ext::nonzero;
use reqwest::{Client, StatusCode};
use serde::de::DeserializeOwned;
use std::num::NonZeroU32;
use std::sync::Arc;
use tracing::debug;

use spread_arb_core::{FeedError, VenueConfig};

use crate::error::VenueError;

type DirectLimiter = RateLimiter<NotKeyed, InMemoryState, DefaultClock>;

/// HTTP client for one venue's public REST API.
#[derive(Clone)]
pub struct HttpClient {
    venue: String,
    http: Client,
    base_url: String,
    rate_limiter: Arc<DirectLimiter>,
}

impl HttpClient {
    /// Builds a client with the venue's timeout and request rate.
    ///
    /// # Errors
    ///
    /// Returns [`VenueError::Client`] if the TLS backend cannot be set up.
    pub fn new(venue: impl Into<String>, config: &VenueConfig) -> Result<Self, VenueError> {
        let http = Client::builder()
            .timeout(config.request_timeout())
            .build()?;
        let per_second = NonZeroU32::new(config.requests_per_second).unwrap_or(nonzero!(10u32));

        Ok(Self {
            venue: venue.into(),
            http,
            base_url: config.base_url.trim_end_matches('/').to_string(),
            rate_limiter: Arc::new(RateLimiter::direct(Quota::per_second(per_second))),
        })
    }

    /// Sets a custom base URL (for testing).
    #[must_use]
    pub fn with_base_url(mut self, url: impl Into<String>) -> Self {
        self.base_url = url.into().trim_end_matches('/').to_string();
        self
    }

    pub fn venue(&self) -> &str {
        &self.venue
    }

    #[must_use]
    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    /// Waits for the rate limiter and GETs `path` as JSON.
    ///
    /// # Errors
    ///
    /// - [`FeedError::Timeout`] when the request exceeds the configured timeout
    /// - [`FeedError::RateLimited`] on HTTP 429 or 418
    /// - [`FeedError::Network`] for other transport failures and non-2xx codes
    /// - [`FeedError::Malformed`] when the body does not match `T`
    pub async fn get_json<T: DeserializeOwned>(
        &self,
        path: &str,
        query: &[(&str, &str)],
    ) -> Result<T, FeedError> {
        self.rate_limiter.until_ready().await;

        let url = format!("{}{}", self.base_url, path);
        debug!(venue = %self.venue, url = %url, "GET");

        let response = self
            .http
            .get(&url)
            .query(query)
            .header("Accept", "application/json")
            .send()
            .await
            .map_err(|e| self.transport_error(&e))?;

        let status = response.status();
        if status == StatusCode::TOO_MANY_REQUESTS || status == StatusCode::IM_A_TEAPOT {
            return Err(FeedError::RateLimited {
                venue: self.venue.clone(),
            });
        }
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            let snippet: String = body.chars().take(200).collect();
            return Err(FeedError::network(
                &self.venue,
                format!("HTTP {status}: {snippet}"),
            ));
        }

        let body = response
            .bytes()
            .await
            .map_err(|e| self.transport_error(&e))?;
        serde_json::from_slice(&body).map_err(|e| FeedError::malformed(&self.venue, e.to_string()))
    }

    fn transport_error(&self, error: &reqwest::Error) -> FeedError {
        if error.is_timeout() {
            FeedError::Timeout {
                venue: self.venue.clone(),
            }
        } else {
            FeedError::network(&self.venue, error.to_string())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde::Deserialize;
    use wiremock::matchers::{method, path, query_param};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    #[derive(Debug, Deserialize)]
    struct Ping {
        ok: bool,
    }

    fn client(base_url: &str) -> HttpClient {
        HttpClient::new("test", &VenueConfig::binance())
            .unwrap()
            .with_base_url(base_url)
    }

    #[test]
    fn test_trailing_slash_is_trimmed() {
        let client = client("http://localhost:8080/");
        assert_eq!(client.base_url(), "http://localhost:8080");
        assert_eq!(client.venue(), "test");
    }

    #[tokio::test]
    async fn test_get_json_success() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/ping"))
            .and(query_param("symbol", "BTCUSDT"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({"ok": true})))
            .mount(&server)
            .await;

        let ping: Ping = client(&server.uri())
            .get_json("/ping", &[("symbol", "BTCUSDT")])
            .await
            .unwrap();
        assert!(ping.ok);
    }

    #[tokio::test]
    async fn test_429_maps_to_rate_limited() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(429))
            .mount(&server)
            .await;

        let err = client(&server.uri())
            .get_json::<Ping>("/ping", &[])
            .await
            .unwrap_err();
        assert!(matches!(err, FeedError::RateLimited { .. }));
        assert!(err.is_transient());
    }

    #[tokio::test]
    async fn test_server_error_maps_to_network() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(503).set_body_string("maintenance"))
            .mount(&server)
            .await;

        let err = client(&server.uri())
            .get_json::<Ping>("/ping", &[])
            .await
            .unwrap_err();
        match err {
            FeedError::Network { message, .. } => assert!(message.contains("maintenance")),
            other => panic!("unexpected error: {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_bad_body_maps_to_malformed() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(200).set_body_string("not json"))
            .mount(&server)
            .await;

        let err = client(&server.uri())
            .get_json::<Ping>("/ping", &[])
            .await
            .unwrap_err();
        assert!(matches!(err, FeedError::Malformed { .. }));
    }
}
