//! HTTP mocking utilities for dictionary and audio fetch tests.

use wiremock::{
    matchers::{method, path},
    Mock, MockServer as WiremockServer, ResponseTemplate,
};

/// Mock HTTP server serving pages and audio files.
pub struct MockServer {
    server: WiremockServer,
}

impl MockServer {
    /// Starts a new mock server on a random port.
    pub async fn start() -> Self {
        Self { server: WiremockServer::start().await }
    }

    /// Returns the base URL of the mock server.
    pub fn url(&self) -> String {
        self.server.uri()
    }

    /// Absolute URL for `path` on this server.
    pub fn url_for(&self, path: &str) -> String {
        format!("{}/{}", self.server.uri(), path.trim_start_matches('/'))
    }

    /// Serves `body` with status 200 on every GET of `path`.
    pub async fn mock_page(&self, path_str: &str, body: impl Into<Vec<u8>>) {
        self.mock_status_with_body(path_str, 200, body).await;
    }

    /// Answers every GET of `path` with `status` and an empty body.
    pub async fn mock_status(&self, path_str: &str, status: u16) {
        self.mock_status_with_body(path_str, status, Vec::new()).await;
    }

    async fn mock_status_with_body(&self, path_str: &str, status: u16, body: impl Into<Vec<u8>>) {
        Mock::given(method("GET"))
            .and(path(normalise(path_str)))
            .respond_with(ResponseTemplate::new(status).set_body_bytes(body))
            .mount(&self.server)
            .await;
    }

    /// Starts a sequence of one-shot responses for `path`.
    pub fn mock_sequence(&self, path_str: &str) -> MockSequenceBuilder<'_> {
        MockSequenceBuilder {
            server: &self.server,
            path: normalise(path_str),
            responses: Vec::new(),
        }
    }

    /// Number of requests the server received for `path`.
    pub async fn request_count(&self, path_str: &str) -> usize {
        let wanted = normalise(path_str);
        self.server
            .received_requests()
            .await
            .unwrap_or_default()
            .iter()
            .filter(|request| request.url.path() == wanted)
            .count()
    }

    /// Number of requests the server received in total.
    pub async fn total_requests(&self) -> usize {
        self.server.received_requests().await.map(|requests| requests.len()).unwrap_or(0)
    }
}

/// Builder for a sequence of responses, each served exactly once in order.
pub struct MockSequenceBuilder<'a> {
    server: &'a WiremockServer,
    path: String,
    responses: Vec<(u16, Vec<u8>)>,
}

impl MockSequenceBuilder<'_> {
    /// Adds a response with the given status code and body.
    #[must_use]
    pub fn respond_with(mut self, status: u16, body: impl Into<Vec<u8>>) -> Self {
        self.responses.push((status, body.into()));
        self
    }

    /// Mounts the sequence.
    pub async fn build(self) {
        for (status, body) in self.responses {
            Mock::given(method("GET"))
                .and(path(self.path.as_str()))
                .respond_with(ResponseTemplate::new(status).set_body_bytes(body))
                .up_to_n_times(1)
                .mount(self.server)
                .await;
        }
    }
}

fn normalise(path_str: &str) -> String {
    format!("/{}", path_str.trim_start_matches('/'))
}
