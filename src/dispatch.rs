//! Request dispatch: the trait seam plus the reqwest implementation
//!
//! [`Dispatcher`] is the engine's only transport boundary. Session runners and
//! the auth flow build [`SimRequest`]s and get back [`Outcome`]s; nothing on
//! the dispatch path is ever fatal to a session. Tests swap the trait for
//! mocks; production uses [`HttpDispatcher`].

use crate::config::EngineConfig;
use crate::error::{DispatchError, ValidationError};
use async_trait::async_trait;
use std::net::SocketAddr;
use std::time::{Duration, Instant};

/// Default deadline for one simulated request
pub const REQUEST_TIMEOUT: Duration = Duration::from_secs(15);

/// One fully built simulated request
#[derive(Debug, Clone)]
pub struct SimRequest {
    /// HTTP method, uppercase
    pub method: String,
    /// Absolute URL
    pub url: String,
    /// Headers in application order; later entries win on collision
    pub headers: Vec<(String, String)>,
    /// Optional request body
    pub body: Option<RequestBody>,
    /// Per-request deadline
    pub timeout: Duration,
    /// Capture the response body text into the outcome (auth flow only)
    pub capture_body: bool,
}

impl SimRequest {
    /// A bodyless request with the default timeout
    pub fn new(method: impl Into<String>, url: impl Into<String>) -> Self {
        Self {
            method: method.into(),
            url: url.into(),
            headers: Vec::new(),
            body: None,
            timeout: REQUEST_TIMEOUT,
            capture_body: false,
        }
    }

    /// Append a header
    pub fn header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.push((name.into(), value.into()));
        self
    }
}

/// Body encoding for a simulated request
#[derive(Debug, Clone)]
pub enum RequestBody {
    /// Sent as-is
    Raw(String),
    /// Sent urlencoded with the matching Content-Type
    Form(Vec<(String, String)>),
    /// Sent as JSON with the matching Content-Type
    Json(serde_json::Value),
}

/// The classified result of one dispatch, success or failure
#[derive(Debug, Clone)]
pub struct Outcome {
    /// HTTP status, absent when the request never got a response
    pub status: Option<u16>,
    /// Approximate request body bytes put on the wire
    pub bytes_sent: u64,
    /// Response body bytes read
    pub bytes_received: u64,
    /// Wall time from send to fully read response (or error)
    pub elapsed: Duration,
    /// Transport/protocol failure, if any
    pub error: Option<DispatchError>,
    /// Response body text, present only when the request asked for capture
    pub body: Option<String>,
    /// First Set-Cookie header of the response, if any
    pub set_cookie: Option<String>,
}

impl Outcome {
    /// Whether the request failed to produce a response at all
    pub fn is_failure(&self) -> bool {
        self.error.is_some()
    }

    pub(crate) fn failed(error: DispatchError, bytes_sent: u64, elapsed: Duration) -> Self {
        Self {
            status: None,
            bytes_sent,
            bytes_received: 0,
            elapsed,
            error: Some(error),
            body: None,
            set_cookie: None,
        }
    }
}

/// Executes one HTTP request and classifies the result
///
/// Implementations must never panic on transport failures; every failure is
/// an [`Outcome`] with `error` set.
#[async_trait]
pub trait Dispatcher: Send + Sync {
    /// Send the request and classify what came back
    async fn dispatch(&self, request: SimRequest) -> Outcome;
}

/// Scheme/host/port of the configured target, for assembling request URLs
#[derive(Debug, Clone)]
pub struct Target {
    scheme: String,
    host: String,
    port: Option<u16>,
}

impl Target {
    /// Extract the target from a validated config
    pub fn from_config(config: &EngineConfig) -> Result<Self, ValidationError> {
        let url = config.parse_target()?;
        Ok(Self {
            scheme: url.scheme().to_string(),
            // parse_target guarantees a host
            host: url.host_str().unwrap_or_default().to_string(),
            port: url.port(),
        })
    }

    /// The original hostname (what the Host header carries)
    pub fn host(&self) -> &str {
        &self.host
    }

    /// Port the connection goes to, explicit or scheme default
    pub fn effective_port(&self) -> u16 {
        self.port
            .unwrap_or(if self.scheme == "https" { 443 } else { 80 })
    }

    /// Absolute URL for a resolved path
    pub fn url_for(&self, path: &str) -> String {
        let sep = if path.starts_with('/') { "" } else { "/" };
        match self.port {
            Some(port) => format!("{}://{}:{}{}{}", self.scheme, self.host, port, sep, path),
            None => format!("{}://{}{}{}", self.scheme, self.host, sep, path),
        }
    }
}

/// Production dispatcher over a shared reqwest client
///
/// The DNS override is applied at the connector: the client connects to the
/// override IP while the URL (and therefore the Host header and SNI) keeps
/// the original hostname.
pub struct HttpDispatcher {
    client: reqwest::Client,
    debug: bool,
}

impl HttpDispatcher {
    /// Build a dispatcher for the given run configuration
    pub fn new(config: &EngineConfig) -> Result<Self, ValidationError> {
        let target = Target::from_config(config)?;

        let mut builder = reqwest::Client::builder()
            // Simulation targets are routinely fronted by self-signed certs.
            .danger_accept_invalid_certs(true);

        if let Some(ip) = config.dns_override {
            builder = builder.resolve(target.host(), SocketAddr::new(ip, target.effective_port()));
        }

        let client = builder.build().map_err(|e| ValidationError::TargetUrl {
            url: config.target_url.clone(),
            reason: format!("http client: {e}"),
        })?;

        Ok(Self {
            client,
            debug: config.debug,
        })
    }
}

#[async_trait]
impl Dispatcher for HttpDispatcher {
    async fn dispatch(&self, request: SimRequest) -> Outcome {
        let start = Instant::now();

        let method = match reqwest::Method::from_bytes(request.method.as_bytes()) {
            Ok(method) => method,
            Err(e) => {
                return Outcome::failed(
                    DispatchError::InvalidRequest(e.to_string()),
                    0,
                    start.elapsed(),
                )
            }
        };

        let mut builder = self
            .client
            .request(method, &request.url)
            .timeout(request.timeout);
        for (name, value) in &request.headers {
            builder = builder.header(name, value);
        }

        let mut bytes_sent = 0u64;
        match &request.body {
            Some(RequestBody::Raw(text)) => {
                bytes_sent = text.len() as u64;
                builder = builder.body(text.clone());
            }
            Some(RequestBody::Form(pairs)) => {
                bytes_sent = pairs.iter().map(|(k, v)| (k.len() + v.len() + 2) as u64).sum();
                builder = builder.form(pairs);
            }
            Some(RequestBody::Json(value)) => {
                bytes_sent = value.to_string().len() as u64;
                builder = builder.json(value);
            }
            None => {}
        }

        if self.debug {
            tracing::debug!(method = %request.method, url = %request.url, "dispatching");
        }

        let response = match builder.send().await {
            Ok(response) => response,
            Err(e) => {
                let error = DispatchError::from_reqwest(&e);
                tracing::warn!(url = %request.url, error = %error, "request failed");
                return Outcome::failed(error, bytes_sent, start.elapsed());
            }
        };

        let status = response.status();
        let set_cookie = response
            .headers()
            .get(reqwest::header::SET_COOKIE)
            .and_then(|v| v.to_str().ok())
            .map(String::from);

        // Drain the body fully so the connection is reusable and the
        // byte count reflects the complete response.
        let body_bytes = match response.bytes().await {
            Ok(bytes) => bytes,
            Err(e) => {
                let error = DispatchError::from_reqwest(&e);
                tracing::warn!(url = %request.url, error = %error, "failed reading response body");
                return Outcome {
                    status: Some(status.as_u16()),
                    bytes_sent,
                    bytes_received: 0,
                    elapsed: start.elapsed(),
                    error: Some(error),
                    body: None,
                    set_cookie,
                };
            }
        };

        if status.is_server_error() {
            tracing::error!(status = status.as_u16(), url = %request.url, "server error");
        } else if status.is_client_error() {
            tracing::warn!(status = status.as_u16(), url = %request.url, "client error");
        } else if self.debug {
            tracing::debug!(status = status.as_u16(), url = %request.url, "response");
        }

        let bytes_received = body_bytes.len() as u64;
        let body = request
            .capture_body
            .then(|| String::from_utf8_lossy(&body_bytes).into_owned());

        Outcome {
            status: Some(status.as_u16()),
            bytes_sent,
            bytes_received,
            elapsed: start.elapsed(),
            error: None,
            body,
            set_cookie,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config(url: &str) -> EngineConfig {
        EngineConfig {
            target_url: url.into(),
            dns_override: None,
            xff_header_name: "X-Forwarded-For".into(),
            rate_limit: 1,
            simulated_users: 1,
            min_session_secs: 1,
            max_session_secs: 1,
            debug: false,
        }
    }

    #[test]
    fn test_target_url_assembly() {
        let target = Target::from_config(&config("https://example.com")).unwrap();
        assert_eq!(target.url_for("/users/1"), "https://example.com/users/1");
        assert_eq!(target.url_for("users/1"), "https://example.com/users/1");
        assert_eq!(target.effective_port(), 443);
    }

    #[test]
    fn test_target_explicit_port_kept() {
        let target = Target::from_config(&config("http://10.1.2.3:8080")).unwrap();
        assert_eq!(target.url_for("/"), "http://10.1.2.3:8080/");
        assert_eq!(target.effective_port(), 8080);
    }

    #[test]
    fn test_http_default_port() {
        let target = Target::from_config(&config("http://example.com")).unwrap();
        assert_eq!(target.effective_port(), 80);
    }

    #[test]
    fn test_dispatcher_builds_with_dns_override() {
        let mut cfg = config("https://example.com");
        cfg.dns_override = Some("192.0.2.7".parse().unwrap());
        assert!(HttpDispatcher::new(&cfg).is_ok());
    }

    #[test]
    fn test_failed_outcome_shape() {
        let outcome = Outcome::failed(DispatchError::Timeout, 42, Duration::from_millis(5));
        assert!(outcome.is_failure());
        assert_eq!(outcome.status, None);
        assert_eq!(outcome.bytes_sent, 42);
        assert_eq!(outcome.bytes_received, 0);
    }

    #[tokio::test]
    async fn test_connection_refused_is_an_outcome_not_a_panic() {
        // Port 1 on localhost is essentially never listening.
        let dispatcher = HttpDispatcher::new(&config("http://127.0.0.1:1")).unwrap();
        let mut request = SimRequest::new("GET", "http://127.0.0.1:1/");
        request.timeout = Duration::from_secs(2);
        let outcome = dispatcher.dispatch(request).await;
        assert!(outcome.is_failure());
        assert!(outcome.status.is_none());
    }
}
