//! # Weather Provider Client
//!
//! Talks to the downstream forecast backend over HTTP and folds every possible
//! outcome into a [`WeatherResult`]. Nothing in here returns `Err` or panics on
//! network trouble: the session layer pattern-matches on success or failure
//! and turns failures into a message for the user.
//!
//! ## Request Shape:
//! `GET <base_url>/<percent-encoded location>`, JSON body expected on 2xx.
//!
//! ## Failure Mapping:
//! - 4xx / 5xx → `backend error <status>` with the response body, if any, as details
//! - connect errors and timeouts → `service unreachable`
//! - 2xx with a body that is not JSON → `invalid response format`
//! - anything else → a description of the fault

use crate::config::WeatherConfig;
use async_trait::async_trait;
use percent_encoding::{utf8_percent_encode, AsciiSet, NON_ALPHANUMERIC};
use reqwest::Client;
use serde_json::Value;
use std::sync::atomic::{AtomicU64, Ordering};
use tracing::{debug, info, warn};

/// Characters left untouched in a path segment (RFC 3986 "unreserved").
/// Everything else, including `/`, `?`, `#` and spaces, is escaped.
const PATH_SEGMENT: &AsciiSet = &NON_ALPHANUMERIC
    .remove(b'-')
    .remove(b'.')
    .remove(b'_')
    .remove(b'~');

/// Outcome of one weather lookup.
#[derive(Debug, Clone, PartialEq)]
pub enum WeatherResult {
    /// The provider answered with a JSON document, passed through untouched.
    Success { payload: Value },
    /// The lookup failed; `details` carries the provider's own explanation if any.
    Failure {
        reason: String,
        details: Option<String>,
    },
}

impl WeatherResult {
    pub fn failure(reason: impl Into<String>) -> Self {
        WeatherResult::Failure {
            reason: reason.into(),
            details: None,
        }
    }

    pub fn is_success(&self) -> bool {
        matches!(self, WeatherResult::Success { .. })
    }
}

/// Anything that can look up the weather for a place.
///
/// The session layer only depends on this trait, which lets tests swap in a
/// canned provider instead of a live HTTP backend.
#[async_trait]
pub trait WeatherProvider: Send + Sync {
    async fn fetch(&self, location: &str) -> WeatherResult;
}

/// Running totals of lookups, reported on the metrics endpoint.
#[derive(Debug, Default)]
struct LookupCounters {
    successes: AtomicU64,
    failures: AtomicU64,
}

/// Point-in-time copy of the lookup counters.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct LookupStats {
    pub successes: u64,
    pub failures: u64,
}

/// HTTP-backed [`WeatherProvider`].
///
/// Holds a single pooled `reqwest::Client`; clone the surrounding `Arc` rather
/// than building a new client per request.
#[derive(Debug)]
pub struct WeatherClient {
    http: Client,
    base_url: String,
    counters: LookupCounters,
}

impl WeatherClient {
    /// Build the client with the configured per-request timeout.
    pub fn new(config: &WeatherConfig) -> anyhow::Result<Self> {
        let http = Client::builder()
            .timeout(config.timeout())
            .build()
            .map_err(|e| anyhow::anyhow!("Failed to build weather HTTP client: {}", e))?;

        Ok(Self {
            http,
            base_url: config.base_url.trim().trim_end_matches('/').to_string(),
            counters: LookupCounters::default(),
        })
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    /// Full request URL for `location`.
    pub fn lookup_url(&self, location: &str) -> String {
        format!(
            "{}/{}",
            self.base_url,
            utf8_percent_encode(location, PATH_SEGMENT)
        )
    }

    pub fn stats(&self) -> LookupStats {
        LookupStats {
            successes: self.counters.successes.load(Ordering::Relaxed),
            failures: self.counters.failures.load(Ordering::Relaxed),
        }
    }

    async fn request(&self, location: &str) -> WeatherResult {
        let url = self.lookup_url(location);
        debug!(url = %url, "Requesting weather from backend");

        let response = match self.http.get(&url).send().await {
            Ok(response) => response,
            Err(err) => return transport_failure(location, &err),
        };

        let status = response.status();
        if status.is_client_error() || status.is_server_error() {
            // An unreadable or blank body leaves the status code as the only explanation
            let details = response
                .text()
                .await
                .ok()
                .filter(|body| !body.trim().is_empty());
            warn!(
                city = %location,
                status = status.as_u16(),
                body = ?details,
                "Weather backend returned an error status"
            );
            return WeatherResult::Failure {
                reason: format!("backend error {}", status.as_u16()),
                details,
            };
        }

        let body = match response.text().await {
            Ok(body) => body,
            Err(err) => return transport_failure(location, &err),
        };

        match serde_json::from_str::<Value>(&body) {
            Ok(payload) => {
                info!(city = %location, status = status.as_u16(), "Weather backend answered");
                WeatherResult::Success { payload }
            }
            Err(err) => {
                warn!(city = %location, error = %err, "Weather backend sent a body that is not JSON");
                WeatherResult::failure("invalid response format")
            }
        }
    }
}

#[async_trait]
impl WeatherProvider for WeatherClient {
    async fn fetch(&self, location: &str) -> WeatherResult {
        if location.trim().is_empty() {
            warn!("Weather lookup requested without a location");
            self.counters.failures.fetch_add(1, Ordering::Relaxed);
            return WeatherResult::failure("no location provided");
        }

        let result = self.request(location).await;

        let counter = if result.is_success() {
            &self.counters.successes
        } else {
            &self.counters.failures
        };
        counter.fetch_add(1, Ordering::Relaxed);

        result
    }
}

fn transport_failure(location: &str, err: &reqwest::Error) -> WeatherResult {
    if err.is_connect() || err.is_timeout() || err.is_request() {
        warn!(city = %location, error = %err, "Weather backend unreachable");
        WeatherResult::failure("service unreachable")
    } else {
        warn!(city = %location, error = %err, "Unexpected error calling weather backend");
        WeatherResult::failure(format!("unexpected error: {}", err))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use std::time::Duration;
    use wiremock::matchers::{method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn client_for(base_url: &str, timeout_secs: u64) -> WeatherClient {
        WeatherClient::new(&WeatherConfig {
            base_url: base_url.to_string(),
            timeout_secs,
        })
        .unwrap()
    }

    #[test]
    fn lookup_url_escapes_spaces_and_specials() {
        let client = client_for("http://backend:8080/api/weather/", 10);
        assert_eq!(
            client.lookup_url("frankfurt am main"),
            "http://backend:8080/api/weather/frankfurt%20am%20main"
        );
        assert_eq!(
            client.lookup_url("a/b?c#d"),
            "http://backend:8080/api/weather/a%2Fb%3Fc%23d"
        );
        assert_eq!(
            client.lookup_url("münchen"),
            "http://backend:8080/api/weather/m%C3%BCnchen"
        );
        assert_eq!(client.lookup_url("bad-oeynhausen"), "http://backend:8080/api/weather/bad-oeynhausen");
    }

    #[tokio::test]
    async fn success_passes_payload_through() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/api/weather/berlin"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({"temp": 20})))
            .expect(1)
            .mount(&server)
            .await;

        let client = client_for(&format!("{}/api/weather", server.uri()), 10);
        let result = client.fetch("berlin").await;

        assert_eq!(result, WeatherResult::Success { payload: json!({"temp": 20}) });
        assert_eq!(client.stats(), LookupStats { successes: 1, failures: 0 });
    }

    #[tokio::test]
    async fn encoded_segment_reaches_backend() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/api/weather/frankfurt%20am%20main"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!([])))
            .expect(1)
            .mount(&server)
            .await;

        let client = client_for(&format!("{}/api/weather", server.uri()), 10);
        assert!(client.fetch("frankfurt am main").await.is_success());
    }

    #[tokio::test]
    async fn error_status_carries_body_as_details() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(404).set_body_string("City not found"))
            .mount(&server)
            .await;

        let client = client_for(&server.uri(), 10);
        let result = client.fetch("atlantis").await;

        assert_eq!(
            result,
            WeatherResult::Failure {
                reason: "backend error 404".to_string(),
                details: Some("City not found".to_string()),
            }
        );
        assert_eq!(client.stats().failures, 1);
    }

    #[tokio::test]
    async fn server_error_is_a_failure() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(503).set_body_string("down"))
            .mount(&server)
            .await;

        let client = client_for(&server.uri(), 10);
        match client.fetch("berlin").await {
            WeatherResult::Failure { reason, .. } => assert_eq!(reason, "backend error 503"),
            other => panic!("expected failure, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn error_status_without_body_has_no_details() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(502))
            .mount(&server)
            .await;

        let client = client_for(&server.uri(), 10);
        assert_eq!(client.fetch("berlin").await, WeatherResult::failure("backend error 502"));
    }

    #[tokio::test]
    async fn non_json_body_is_invalid_format() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(200).set_body_string("<html>oops</html>"))
            .mount(&server)
            .await;

        let client = client_for(&server.uri(), 10);
        assert_eq!(
            client.fetch("berlin").await,
            WeatherResult::failure("invalid response format")
        );
    }

    #[tokio::test]
    async fn timeout_maps_to_unreachable() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(
                ResponseTemplate::new(200)
                    .set_body_json(json!({}))
                    .set_delay(Duration::from_secs(3)),
            )
            .mount(&server)
            .await;

        let client = client_for(&server.uri(), 1);
        assert_eq!(client.fetch("berlin").await, WeatherResult::failure("service unreachable"));
    }

    #[tokio::test]
    async fn refused_connection_maps_to_unreachable() {
        // Port 9 (discard) is closed on test machines
        let client = client_for("http://127.0.0.1:9/api/weather", 2);
        assert_eq!(client.fetch("berlin").await, WeatherResult::failure("service unreachable"));
    }

    #[tokio::test]
    async fn empty_location_fails_without_request() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({})))
            .expect(0)
            .mount(&server)
            .await;

        let client = client_for(&server.uri(), 10);
        assert!(!client.fetch("  ").await.is_success());
    }
}
