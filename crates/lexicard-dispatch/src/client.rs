//! HTTP transport for fetching pages and files.
//!
//! The dispatcher talks to the network only through the [`Transport`] trait,
//! so tests can swap in scripted transports while production uses
//! [`HttpTransport`], a thin wrapper around a pooled `reqwest::Client`.

use std::{collections::HashMap, time::Duration};

use async_trait::async_trait;
use bytes::Bytes;
use lexicard_core::UnitId;
use reqwest::{header::HeaderMap, Response, Url};
use serde::{Deserialize, Serialize};
use tracing::{info_span, Instrument};

use crate::error::{DispatchError, Result};

/// Browser-like user agent; some dictionary mirrors refuse unknown agents.
pub const DEFAULT_USER_AGENT: &str = "Mozilla/5.0 (Windows NT 10.0; Win64; x64)";

/// Configuration for the HTTP transport.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ClientConfig {
    /// Timeout for establishing a connection. There is no overall request
    /// timeout.
    pub connect_timeout: Duration,
    /// User agent string for requests.
    pub user_agent: String,
    /// Maximum number of redirects to follow.
    pub max_redirects: u32,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            connect_timeout: Duration::from_secs(10),
            user_agent: DEFAULT_USER_AGENT.to_string(),
            max_redirects: 10,
        }
    }
}

/// One outgoing GET request.
#[derive(Debug, Clone)]
pub struct FetchRequest {
    /// Unit the request belongs to.
    pub unit_id: UnitId,
    /// Target URL.
    pub url: Url,
    /// Extra request headers.
    pub headers: HeaderMap,
    /// 1-based attempt number.
    pub attempt_number: u32,
}

/// Response to a fetch attempt. Any status, including errors, arrives here;
/// only transport failures produce an `Err`.
#[derive(Debug, Clone)]
pub struct FetchResponse {
    /// HTTP status code.
    pub status_code: u16,
    /// Response headers with lowercase names.
    pub headers: HashMap<String, String>,
    /// Full response body.
    pub body: Bytes,
    /// Total duration of the request.
    pub duration: Duration,
}

impl FetchResponse {
    /// Builds a response without headers, handy for transports that do not
    /// speak HTTP.
    pub fn new(status_code: u16, body: impl Into<Bytes>) -> Self {
        Self { status_code, headers: HashMap::new(), body: body.into(), duration: Duration::ZERO }
    }

    /// Seconds from the Retry-After header, if the remote sent one.
    pub fn retry_after_seconds(&self) -> Option<u64> {
        extract_retry_after_seconds(&self.headers)
    }
}

/// Issues requests on behalf of the dispatcher.
///
/// Implementations must be safe to call from many tasks at once.
#[async_trait]
pub trait Transport: Send + Sync + std::fmt::Debug {
    /// Executes one request.
    ///
    /// # Errors
    ///
    /// Returns `NetworkError` or `Timeout` when no response was received.
    async fn execute(&self, request: FetchRequest) -> Result<FetchResponse>;
}

/// Production transport backed by a shared `reqwest::Client`.
#[derive(Debug, Clone)]
pub struct HttpTransport {
    client: reqwest::Client,
    config: ClientConfig,
}

impl HttpTransport {
    /// Creates a transport with the given configuration.
    ///
    /// # Errors
    ///
    /// Returns `DispatchError::ConfigurationError` if the HTTP client cannot
    /// be built.
    pub fn new(config: ClientConfig) -> Result<Self> {
        let client = reqwest::Client::builder()
            .connect_timeout(config.connect_timeout)
            .user_agent(&config.user_agent)
            .redirect(reqwest::redirect::Policy::limited(config.max_redirects as usize))
            .build()
            .map_err(|e| {
                DispatchError::configuration(format!("failed to build HTTP client: {e}"))
            })?;

        Ok(Self { client, config })
    }

    /// Creates a transport with default configuration.
    pub fn with_defaults() -> Result<Self> {
        Self::new(ClientConfig::default())
    }

    async fn read_response(response: Response, duration: Duration) -> Result<FetchResponse> {
        let status_code = response.status().as_u16();
        let headers = extract_headers(response.headers());

        let body = response
            .bytes()
            .await
            .map_err(|e| DispatchError::network(format!("failed to read response body: {e}")))?;

        Ok(FetchResponse { status_code, headers, body, duration })
    }
}

#[async_trait]
impl Transport for HttpTransport {
    async fn execute(&self, request: FetchRequest) -> Result<FetchResponse> {
        let start_time = std::time::Instant::now();

        let span = info_span!(
            "fetch",
            unit_id = %request.unit_id,
            url = %request.url,
            attempt = request.attempt_number
        );

        async move {
            tracing::debug!("sending request");

            let response =
                match self.client.get(request.url.clone()).headers(request.headers).send().await {
                    Ok(response) => response,
                    Err(e) => {
                        let duration = start_time.elapsed();
                        tracing::warn!(duration_ms = duration.as_millis(), error = %e, "request failed");

                        if e.is_timeout() {
                            return Err(DispatchError::timeout(
                                self.config.connect_timeout.as_secs(),
                            ));
                        }
                        if e.is_connect() {
                            return Err(DispatchError::network(format!("connection failed: {e}")));
                        }
                        return Err(DispatchError::network(e.to_string()));
                    },
                };

            let fetched = Self::read_response(response, start_time.elapsed()).await?;

            tracing::debug!(
                status = fetched.status_code,
                duration_ms = fetched.duration.as_millis(),
                bytes = fetched.body.len(),
                "received response"
            );

            Ok(fetched)
        }
        .instrument(span)
        .await
    }
}

/// Copies headers into a map keyed by lowercase name. Non-UTF-8 values are
/// dropped.
fn extract_headers(header_map: &HeaderMap) -> HashMap<String, String> {
    header_map
        .iter()
        .filter_map(|(key, value)| {
            value.to_str().ok().map(|value| (key.as_str().to_string(), value.to_string()))
        })
        .collect()
}

/// Extracts the Retry-After delay from response headers.
///
/// Supports both the seconds format and the HTTP-date format. Returns `None`
/// when the header is missing or cannot be understood. The dispatcher only
/// logs this value; backoff is driven by the throttle controller.
pub fn extract_retry_after_seconds<S: std::hash::BuildHasher>(
    headers: &HashMap<String, String, S>,
) -> Option<u64> {
    let retry_after = headers.get("retry-after")?.trim();

    if let Ok(seconds) = retry_after.parse::<u64>() {
        return Some(seconds);
    }

    let date_time = chrono::DateTime::parse_from_rfc2822(retry_after).ok()?;
    let remaining = date_time.with_timezone(&chrono::Utc).signed_duration_since(chrono::Utc::now());
    remaining.to_std().ok().map(|duration| duration.as_secs())
}

#[cfg(test)]
mod tests {
    use wiremock::{matchers, Mock, MockServer, ResponseTemplate};

    use super::*;

    fn request_for(url: &str) -> FetchRequest {
        FetchRequest {
            unit_id: UnitId::new(),
            url: Url::parse(url).unwrap(),
            headers: HeaderMap::new(),
            attempt_number: 1,
        }
    }

    #[tokio::test]
    async fn successful_fetch_returns_body() {
        let mock_server = MockServer::start().await;

        Mock::given(matchers::method("GET"))
            .and(matchers::path("/definition/english/run_1"))
            .respond_with(ResponseTemplate::new(200).set_body_string("<html>run</html>"))
            .mount(&mock_server)
            .await;

        let transport = HttpTransport::with_defaults().unwrap();
        let response = transport
            .execute(request_for(&format!("{}/definition/english/run_1", mock_server.uri())))
            .await
            .unwrap();

        assert_eq!(response.status_code, 200);
        assert_eq!(&response.body[..], b"<html>run</html>");
    }

    #[tokio::test]
    async fn error_statuses_are_responses_not_errors() {
        let mock_server = MockServer::start().await;

        Mock::given(matchers::path("/missing"))
            .respond_with(ResponseTemplate::new(404).set_body_string("Not Found"))
            .mount(&mock_server)
            .await;
        Mock::given(matchers::path("/broken"))
            .respond_with(ResponseTemplate::new(503))
            .mount(&mock_server)
            .await;

        let transport = HttpTransport::with_defaults().unwrap();

        let missing =
            transport.execute(request_for(&format!("{}/missing", mock_server.uri()))).await.unwrap();
        assert_eq!(missing.status_code, 404);

        let broken =
            transport.execute(request_for(&format!("{}/broken", mock_server.uri()))).await.unwrap();
        assert_eq!(broken.status_code, 503);
    }

    #[tokio::test]
    async fn browser_user_agent_is_sent() {
        let mock_server = MockServer::start().await;

        Mock::given(matchers::method("GET"))
            .and(matchers::header("user-agent", DEFAULT_USER_AGENT))
            .respond_with(ResponseTemplate::new(200))
            .expect(1)
            .mount(&mock_server)
            .await;

        let transport = HttpTransport::with_defaults().unwrap();
        let response = transport.execute(request_for(&mock_server.uri())).await.unwrap();
        assert_eq!(response.status_code, 200);
    }

    #[tokio::test]
    async fn redirects_are_followed() {
        let mock_server = MockServer::start().await;

        Mock::given(matchers::path("/old"))
            .respond_with(
                ResponseTemplate::new(301)
                    .append_header("Location", format!("{}/new", mock_server.uri()).as_str()),
            )
            .mount(&mock_server)
            .await;
        Mock::given(matchers::path("/new"))
            .respond_with(ResponseTemplate::new(200).set_body_string("moved"))
            .mount(&mock_server)
            .await;

        let transport = HttpTransport::with_defaults().unwrap();
        let response =
            transport.execute(request_for(&format!("{}/old", mock_server.uri()))).await.unwrap();

        assert_eq!(response.status_code, 200);
        assert_eq!(&response.body[..], b"moved");
    }

    #[tokio::test]
    async fn unit_headers_are_forwarded() {
        let mock_server = MockServer::start().await;

        Mock::given(matchers::header("accept-language", "en-GB"))
            .respond_with(ResponseTemplate::new(200))
            .expect(1)
            .mount(&mock_server)
            .await;

        let mut request = request_for(&mock_server.uri());
        request.headers.insert("accept-language", "en-GB".parse().unwrap());

        let transport = HttpTransport::with_defaults().unwrap();
        assert_eq!(transport.execute(request).await.unwrap().status_code, 200);
    }

    #[tokio::test]
    async fn refused_connection_is_network_error() {
        let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
        let address = listener.local_addr().unwrap();
        drop(listener);

        let transport = HttpTransport::with_defaults().unwrap();
        let error =
            transport.execute(request_for(&format!("http://{address}/run_1"))).await.unwrap_err();

        assert!(error.is_transport_failure());
        assert!(error.is_retryable());
    }

    #[tokio::test]
    async fn retry_after_header_is_exposed() {
        let mock_server = MockServer::start().await;

        Mock::given(matchers::any())
            .respond_with(ResponseTemplate::new(429).append_header("Retry-After", "120"))
            .mount(&mock_server)
            .await;

        let transport = HttpTransport::with_defaults().unwrap();
        let response = transport.execute(request_for(&mock_server.uri())).await.unwrap();

        assert_eq!(response.status_code, 429);
        assert_eq!(response.retry_after_seconds(), Some(120));
    }

    #[test]
    fn retry_after_parsing() {
        let mut headers = HashMap::new();
        assert_eq!(extract_retry_after_seconds(&headers), None);

        headers.insert("retry-after".to_string(), "30".to_string());
        assert_eq!(extract_retry_after_seconds(&headers), Some(30));

        headers.insert("retry-after".to_string(), "soon".to_string());
        assert_eq!(extract_retry_after_seconds(&headers), None);

        headers.insert("retry-after".to_string(), "Wed, 21 Oct 2015 07:28:00 GMT".to_string());
        assert_eq!(extract_retry_after_seconds(&headers), None);
    }
}
