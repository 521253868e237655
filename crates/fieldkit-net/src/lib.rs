//! # FieldKit Net
//!
//! The HTTP boundary of the FieldKit offline layer.
//!
//! ## Design Goals
//!
//! 1. **One seam**: everything that talks to the network goes through the
//!    [`Network`] trait, so the worker can be exercised with scripted fakes
//! 2. **Cloneable responses**: bodies are fully buffered so a response can be
//!    written to a cache bucket and returned to the page
//! 3. **fetch() semantics**: a transport failure is an `Err`, an HTTP error
//!    status is still a `Response`

use std::future::Future;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;
use http::{HeaderMap, HeaderName, HeaderValue, Method, StatusCode};
use mime::Mime;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{debug, info, trace};
use url::Url;

pub mod pattern;

pub use pattern::{PatternType, UrlPattern};

/// Errors that can occur in networking.
#[derive(Error, Debug)]
pub enum NetError {
    #[error("Request failed: {0}")]
    RequestFailed(String),

    #[error("Invalid URL: {0}")]
    InvalidUrl(String),

    #[error("Timeout after {0:?}")]
    Timeout(Duration),

    #[error("Network unreachable: {0}")]
    Offline(String),

    #[error("HTTP error: {0}")]
    HttpError(#[from] reqwest::Error),
}

/// Unique identifier for a request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct RequestId(u64);

impl RequestId {
    pub fn new() -> Self {
        static COUNTER: AtomicU64 = AtomicU64::new(1);
        Self(COUNTER.fetch_add(1, Ordering::Relaxed))
    }

    pub fn raw(&self) -> u64 {
        self.0
    }
}

impl Default for RequestId {
    fn default() -> Self {
        Self::new()
    }
}

/// What kind of resource a request is for, as reported by the page.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RequestDestination {
    /// `fetch()`/XHR, no declared destination.
    #[default]
    Empty,
    Document,
    Image,
    Style,
    Script,
    Font,
    Manifest,
    Other,
}

impl RequestDestination {
    /// Images, stylesheets, scripts and fonts.
    pub fn is_static_asset(&self) -> bool {
        matches!(
            self,
            RequestDestination::Image
                | RequestDestination::Style
                | RequestDestination::Script
                | RequestDestination::Font
        )
    }

    /// Guess a destination from the file extension of a URL path.
    pub fn infer_from_path(path: &str) -> Self {
        let Some(guess) = mime_guess::from_path(path).first() else {
            return RequestDestination::Empty;
        };

        match (guess.type_().as_str(), guess.subtype().as_str()) {
            ("image", _) => RequestDestination::Image,
            ("font", _) => RequestDestination::Font,
            ("text", "css") => RequestDestination::Style,
            (_, "javascript") | (_, "x-javascript") => RequestDestination::Script,
            ("application", "font-woff") | ("application", "x-font-ttf") => {
                RequestDestination::Font
            }
            ("application", "manifest+json") => RequestDestination::Manifest,
            _ => RequestDestination::Empty,
        }
    }
}

/// Request mode.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum RequestMode {
    /// Top-level page navigation.
    Navigate,
    /// Subresource fetch.
    #[default]
    Cors,
}

/// Credentials mode for requests.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum CredentialsMode {
    /// Never send cookies.
    Omit,
    /// Send cookies only for same-origin requests.
    #[default]
    SameOrigin,
    /// Always send cookies.
    Include,
}

/// HTTP request.
#[derive(Debug, Clone)]
pub struct Request {
    pub id: RequestId,
    pub url: Url,
    pub method: Method,
    pub headers: HeaderMap,
    pub body: Option<Bytes>,
    pub destination: RequestDestination,
    pub mode: RequestMode,
    pub credentials: CredentialsMode,
    pub timeout: Option<Duration>,
    pub referrer: Option<Url>,
}

impl Request {
    /// Create a GET request.
    pub fn get(url: Url) -> Self {
        Self {
            id: RequestId::new(),
            url,
            method: Method::GET,
            headers: HeaderMap::new(),
            body: None,
            destination: RequestDestination::Empty,
            mode: RequestMode::Cors,
            credentials: CredentialsMode::SameOrigin,
            timeout: None,
            referrer: None,
        }
    }

    /// Create a POST request.
    pub fn post(url: Url, body: Bytes) -> Self {
        Self {
            method: Method::POST,
            body: Some(body),
            ..Self::get(url)
        }
    }

    /// Create a top-level navigation request.
    pub fn navigate(url: Url) -> Self {
        Self {
            destination: RequestDestination::Document,
            mode: RequestMode::Navigate,
            credentials: CredentialsMode::Include,
            ..Self::get(url)
        }
    }

    /// Parse `url` and create a GET request.
    pub fn parse(url: &str) -> Result<Self, NetError> {
        let url = Url::parse(url).map_err(|e| NetError::InvalidUrl(e.to_string()))?;
        Ok(Self::get(url))
    }

    /// Set the destination.
    pub fn destination(mut self, destination: RequestDestination) -> Self {
        self.destination = destination;
        self
    }

    /// Add a header.
    pub fn header(mut self, name: HeaderName, value: HeaderValue) -> Self {
        self.headers.insert(name, value);
        self
    }

    /// Set timeout.
    pub fn timeout(mut self, duration: Duration) -> Self {
        self.timeout = Some(duration);
        self
    }

    /// Set referrer.
    pub fn referrer(mut self, referrer: Url) -> Self {
        self.referrer = Some(referrer);
        self
    }

    /// Whether this is a top-level navigation.
    pub fn is_navigation(&self) -> bool {
        self.mode == RequestMode::Navigate
    }

    /// The declared destination, or one inferred from the path extension.
    pub fn effective_destination(&self) -> RequestDestination {
        match self.destination {
            RequestDestination::Empty => RequestDestination::infer_from_path(self.url.path()),
            declared => declared,
        }
    }

    /// Same scheme, host and port as `other`.
    pub fn is_same_origin(&self, other: &Url) -> bool {
        self.url.origin() == other.origin()
    }
}

/// How a response was obtained, mirroring `Response.type`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ResponseType {
    /// Same-origin network response.
    #[default]
    Basic,
    /// Cross-origin response readable under CORS.
    Cors,
    /// Synthesized by the worker.
    Default,
    /// Cross-origin no-cors response; status and body are hidden.
    Opaque,
    /// A failed fetch.
    Error,
}

/// HTTP response with a fully buffered body.
#[derive(Debug, Clone)]
pub struct Response {
    pub url: Option<Url>,
    pub status: u16,
    pub status_text: String,
    pub headers: HeaderMap,
    pub body: Bytes,
    pub response_type: ResponseType,
    /// Served from a cache bucket rather than the network.
    pub from_cache: bool,
}

impl Response {
    /// Create a synthesized response.
    pub fn new(status: u16, body: impl Into<Bytes>) -> Self {
        Self {
            url: None,
            status,
            status_text: StatusCode::from_u16(status)
                .ok()
                .and_then(|s| s.canonical_reason())
                .unwrap_or("")
                .to_string(),
            headers: HeaderMap::new(),
            body: body.into(),
            response_type: ResponseType::Default,
            from_cache: false,
        }
    }

    /// The `Response.error()` equivalent: what the page sees for a failed fetch.
    pub fn network_error() -> Self {
        Self {
            status_text: String::new(),
            response_type: ResponseType::Error,
            ..Self::new(0, Bytes::new())
        }
    }

    /// A synthesized `text/plain` response.
    pub fn plain_text(status: u16, text: &str) -> Self {
        Self::new(status, Bytes::copy_from_slice(text.as_bytes())).with_header(
            http::header::CONTENT_TYPE,
            HeaderValue::from_static("text/plain; charset=utf-8"),
        )
    }

    /// A synthesized `application/json` response.
    pub fn json_body(status: u16, value: &serde_json::Value) -> Self {
        Self::new(status, Bytes::from(value.to_string())).with_header(
            http::header::CONTENT_TYPE,
            HeaderValue::from_static("application/json"),
        )
    }

    /// Add a header.
    pub fn with_header(mut self, name: HeaderName, value: HeaderValue) -> Self {
        self.headers.insert(name, value);
        self
    }

    /// Set the final URL.
    pub fn with_url(mut self, url: Url) -> Self {
        self.url = Some(url);
        self
    }

    /// Set the response type.
    pub fn with_type(mut self, response_type: ResponseType) -> Self {
        self.response_type = response_type;
        self
    }

    /// Check if request was successful (2xx).
    pub fn ok(&self) -> bool {
        self.response_type != ResponseType::Error && (200..300).contains(&self.status)
    }

    /// Whether this represents a failed fetch.
    pub fn is_error(&self) -> bool {
        self.response_type == ResponseType::Error
    }

    /// Parsed `Content-Type`.
    pub fn content_type(&self) -> Option<Mime> {
        self.headers
            .get(http::header::CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .and_then(|s| s.parse::<Mime>().ok())
    }

    /// Get the body as bytes.
    pub fn bytes(&self) -> Bytes {
        self.body.clone()
    }

    /// Get the body as text.
    pub fn text(&self) -> Result<String, NetError> {
        String::from_utf8(self.body.to_vec()).map_err(|e| NetError::RequestFailed(e.to_string()))
    }

    /// Get the body as JSON.
    pub fn json<T: serde::de::DeserializeOwned>(&self) -> Result<T, NetError> {
        serde_json::from_slice(&self.body).map_err(|e| NetError::RequestFailed(e.to_string()))
    }
}

/// Anything that can perform a fetch.
///
/// The worker never talks to `reqwest` directly; it is handed a `Network`.
pub trait Network: Send + Sync {
    /// Perform exactly one network attempt.
    fn fetch(&self, request: Request) -> impl Future<Output = Result<Response, NetError>> + Send;
}

impl<N: Network> Network for Arc<N> {
    fn fetch(&self, request: Request) -> impl Future<Output = Result<Response, NetError>> + Send {
        (**self).fetch(request)
    }
}

/// Resource loader configuration.
#[derive(Debug, Clone)]
pub struct LoaderConfig {
    /// User agent string.
    pub user_agent: String,
    /// Accept-Language header.
    pub accept_language: String,
    /// Default timeout, the only bound on a network attempt.
    pub default_timeout: Duration,
    /// Maximum redirects.
    pub max_redirects: usize,
}

impl Default for LoaderConfig {
    fn default() -> Self {
        Self {
            user_agent: "FieldKit/1.0".to_string(),
            accept_language: "en-US,en;q=0.9".to_string(),
            default_timeout: Duration::from_secs(30),
            max_redirects: 10,
        }
    }
}

/// `reqwest`-backed [`Network`].
pub struct ResourceLoader {
    client: Client,
    config: LoaderConfig,
}

impl ResourceLoader {
    /// Create a new resource loader.
    pub fn new(config: LoaderConfig) -> Result<Self, NetError> {
        let client = Client::builder()
            .user_agent(&config.user_agent)
            .timeout(config.default_timeout)
            .redirect(reqwest::redirect::Policy::limited(config.max_redirects))
            .build()
            .map_err(|e| NetError::RequestFailed(e.to_string()))?;

        info!("ResourceLoader initialized");

        Ok(Self { client, config })
    }

    /// Fetch a URL.
    pub async fn fetch(&self, request: Request) -> Result<Response, NetError> {
        debug!(url = %request.url, method = %request.method, "Fetching resource");

        let mut req_builder = self
            .client
            .request(request.method.clone(), request.url.clone());

        for (name, value) in request.headers.iter() {
            req_builder = req_builder.header(name, value);
        }

        req_builder = req_builder.header("Accept-Language", &self.config.accept_language);

        if let Some(ref referrer) = request.referrer {
            req_builder = req_builder.header("Referer", referrer.as_str());
        }

        if let Some(body) = request.body {
            req_builder = req_builder.body(body);
        }

        if let Some(timeout) = request.timeout {
            req_builder = req_builder.timeout(timeout);
        }

        let response = req_builder.send().await.map_err(|e| {
            if e.is_timeout() {
                NetError::Timeout(request.timeout.unwrap_or(self.config.default_timeout))
            } else if e.is_connect() {
                NetError::Offline(e.to_string())
            } else {
                NetError::HttpError(e)
            }
        })?;

        let status = response.status();
        let headers = response.headers().clone();
        let url = response.url().clone();
        let response_type = if url.origin() == request.url.origin() {
            ResponseType::Basic
        } else {
            ResponseType::Cors
        };

        let body = response.bytes().await?;

        trace!(
            url = %url,
            status = %status,
            body_len = body.len(),
            "Response received"
        );

        Ok(Response {
            url: Some(url),
            status: status.as_u16(),
            status_text: status.canonical_reason().unwrap_or("").to_string(),
            headers,
            body,
            response_type,
            from_cache: false,
        })
    }
}

impl Network for ResourceLoader {
    fn fetch(&self, request: Request) -> impl Future<Output = Result<Response, NetError>> + Send {
        ResourceLoader::fetch(self, request)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use wiremock::matchers::{method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    #[test]
    fn test_request_builder() {
        let url = Url::parse("https://example.com").unwrap();
        let request = Request::get(url.clone())
            .header(
                HeaderName::from_static("accept"),
                HeaderValue::from_static("application/json"),
            )
            .timeout(Duration::from_secs(10));

        assert_eq!(request.url, url);
        assert_eq!(request.method, Method::GET);
        assert!(request.headers.contains_key("accept"));
        assert_eq!(request.timeout, Some(Duration::from_secs(10)));
        assert!(!request.is_navigation());
    }

    #[test]
    fn test_request_id_uniqueness() {
        let id1 = RequestId::new();
        let id2 = RequestId::new();
        assert_ne!(id1, id2);
    }

    #[test]
    fn test_navigation_request() {
        let request = Request::navigate(Url::parse("https://app.example.com/dashboard").unwrap());
        assert!(request.is_navigation());
        assert_eq!(request.destination, RequestDestination::Document);
    }

    #[test]
    fn test_destination_inference() {
        assert_eq!(
            RequestDestination::infer_from_path("/icons/icon-192x192.png"),
            RequestDestination::Image
        );
        assert_eq!(
            RequestDestination::infer_from_path("/_next/static/app.css"),
            RequestDestination::Style
        );
        assert_eq!(
            RequestDestination::infer_from_path("/_next/static/chunks/main.js"),
            RequestDestination::Script
        );
        assert_eq!(
            RequestDestination::infer_from_path("/fonts/inter.woff2"),
            RequestDestination::Font
        );
        assert_eq!(
            RequestDestination::infer_from_path("/ticket/123"),
            RequestDestination::Empty
        );
    }

    #[test]
    fn test_declared_destination_wins() {
        let request = Request::parse("https://example.com/logo.png")
            .unwrap()
            .destination(RequestDestination::Document);
        assert_eq!(request.effective_destination(), RequestDestination::Document);
    }

    #[test]
    fn test_network_error_is_not_ok() {
        let response = Response::network_error();
        assert!(!response.ok());
        assert!(response.is_error());
        assert_eq!(response.status, 0);
    }

    #[test]
    fn test_synthesized_json_body() {
        let response = Response::json_body(503, &serde_json::json!({ "error": "offline" }));
        assert_eq!(response.status, 503);
        assert_eq!(response.status_text, "Service Unavailable");
        assert_eq!(response.content_type(), Some(mime::APPLICATION_JSON));
        let value: serde_json::Value = response.json().unwrap();
        assert_eq!(value["error"], "offline");
    }

    #[test]
    fn test_loader_config_default() {
        let config = LoaderConfig::default();
        assert_eq!(config.user_agent, "FieldKit/1.0");
        assert_eq!(config.max_redirects, 10);
    }

    #[tokio::test]
    async fn test_loader_fetches_body() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/dashboard"))
            .respond_with(ResponseTemplate::new(200).set_body_string("<h1>Dashboard</h1>"))
            .mount(&server)
            .await;

        let loader = ResourceLoader::new(LoaderConfig::default()).unwrap();
        let url = Url::parse(&format!("{}/dashboard", server.uri())).unwrap();
        let response = Network::fetch(&loader, Request::get(url)).await.unwrap();

        assert!(response.ok());
        assert_eq!(response.response_type, ResponseType::Basic);
        assert_eq!(response.text().unwrap(), "<h1>Dashboard</h1>");
    }

    #[tokio::test]
    async fn test_loader_http_error_is_a_response() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/api/tickets"))
            .respond_with(ResponseTemplate::new(500))
            .mount(&server)
            .await;

        let loader = ResourceLoader::new(LoaderConfig::default()).unwrap();
        let url = Url::parse(&format!("{}/api/tickets", server.uri())).unwrap();
        let response = loader.fetch(Request::get(url)).await.unwrap();

        assert_eq!(response.status, 500);
        assert!(!response.ok());
    }

    #[tokio::test]
    async fn test_loader_unreachable_host_is_err() {
        let server = MockServer::start().await;
        let uri = server.uri();
        drop(server);

        let loader = ResourceLoader::new(LoaderConfig::default()).unwrap();
        let url = Url::parse(&format!("{}/dashboard", uri)).unwrap();
        assert!(loader.fetch(Request::get(url)).await.is_err());
    }
}
