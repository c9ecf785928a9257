//! The blocking transport abstraction the engine performs requests through.
//!
//! The engine asks nothing more of a transport than a single blocking call:
//! perform a request, hand back status, headers and a body reader, or fail
//! with a tagged [`ErrorKind`]. The default backend wraps
//! [`reqwest::blocking`]; tests substitute deterministic stubs.

use std::error::Error as _;
use std::fmt;
use std::io::Read;
use std::time::Duration;

use http::header::HeaderMap;
use http::{Method, StatusCode};
use url::Url;

use crate::types::Result;
use crate::ErrorKind;

/// Everything a transport needs to know to perform one request.
#[derive(Debug, Clone)]
pub struct RequestParts {
    /// Target URL
    pub url: Url,
    /// HTTP method to use
    pub method: Method,
    /// Additional headers for this request
    pub headers: HeaderMap,
    /// Per-request timeout overriding the transport default
    pub timeout: Option<Duration>,
    /// Whether the transport should follow standard redirections itself.
    /// The resolve policy sets this to `false` to observe each hop.
    pub follow_redirects: bool,
}

impl RequestParts {
    /// Build parts for a plain request to `url`.
    #[must_use]
    pub fn new(url: Url, method: Method) -> Self {
        Self {
            url,
            method,
            headers: HeaderMap::new(),
            timeout: None,
            follow_redirects: true,
        }
    }
}

/// A response as seen by the engine: status, headers and a body reader the
/// policy may read fully, partially or not at all.
pub struct TransportResponse {
    /// Status code of the (final) response
    pub status: StatusCode,
    /// Response headers
    pub headers: HeaderMap,
    /// Streaming body reader
    pub body: Box<dyn Read + Send>,
}

impl fmt::Debug for TransportResponse {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TransportResponse")
            .field("status", &self.status)
            .finish_non_exhaustive()
    }
}

/// A blocking HTTP transport.
///
/// Implementations must be shareable across worker threads; connection
/// pooling and per-call synchronization are theirs to handle.
pub trait Transport: Send + Sync {
    /// Perform one request, blocking until response headers are available.
    ///
    /// # Errors
    ///
    /// Returns a tagged [`ErrorKind`] for DNS, connection, TLS, timeout and
    /// protocol failures. Non-2xx status codes are not errors.
    fn perform(&self, parts: RequestParts) -> Result<TransportResponse>;
}

/// Configuration for the default `reqwest` backend.
#[derive(Debug, Clone)]
pub(crate) struct TransportConfig {
    pub(crate) default_headers: HeaderMap,
    pub(crate) timeout: Option<Duration>,
    pub(crate) insecure: bool,
    pub(crate) max_redirects: usize,
}

/// The default transport, backed by `reqwest::blocking`.
///
/// Two clients are kept: one following redirections up to the configured
/// maximum (used by the fetch policy) and one never following any (used by
/// the resolve policy to observe every hop).
pub(crate) struct ReqwestTransport {
    following: reqwest::blocking::Client,
    direct: reqwest::blocking::Client,
    max_redirects: usize,
}

impl ReqwestTransport {
    pub(crate) fn new(config: &TransportConfig) -> Result<Self> {
        let following = Self::build_client(
            config,
            reqwest::redirect::Policy::limited(config.max_redirects),
        )?;
        let direct = Self::build_client(config, reqwest::redirect::Policy::none())?;

        Ok(Self {
            following,
            direct,
            max_redirects: config.max_redirects,
        })
    }

    fn build_client(
        config: &TransportConfig,
        redirect: reqwest::redirect::Policy,
    ) -> Result<reqwest::blocking::Client> {
        let builder = reqwest::blocking::ClientBuilder::new()
            .gzip(true)
            .default_headers(config.default_headers.clone())
            .danger_accept_invalid_certs(config.insecure)
            .redirect(redirect);

        (match config.timeout {
            Some(timeout) => builder.timeout(timeout),
            None => builder,
        })
        .build()
        .map_err(|error| ErrorKind::BuildTransport(error.to_string()))
    }

    fn classify(&self, error: &reqwest::Error) -> ErrorKind {
        if error.is_timeout() {
            return ErrorKind::Timeout;
        }
        if error.is_redirect() {
            return ErrorKind::TooManyRedirects(self.max_redirects);
        }
        if error.is_decode() {
            return ErrorKind::Decode(error.to_string());
        }
        if error.is_body() {
            return ErrorKind::Read(error.to_string());
        }

        classify_error_chain(error)
    }
}

impl Transport for ReqwestTransport {
    fn perform(&self, parts: RequestParts) -> Result<TransportResponse> {
        let client = if parts.follow_redirects {
            &self.following
        } else {
            &self.direct
        };

        let mut request = client
            .request(parts.method, parts.url.as_str())
            .headers(parts.headers);

        if let Some(timeout) = parts.timeout {
            request = request.timeout(timeout);
        }

        match request.send() {
            Ok(response) => Ok(TransportResponse {
                status: response.status(),
                headers: response.headers().clone(),
                body: Box::new(response),
            }),
            Err(error) => Err(self.classify(&error)),
        }
    }
}

impl fmt::Debug for ReqwestTransport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ReqwestTransport")
            .field("max_redirects", &self.max_redirects)
            .finish_non_exhaustive()
    }
}

/// Walk the source chain of a request error to pick the right tag.
///
/// Transport libraries bury the interesting failure (DNS, TLS handshake,
/// refused connection) several sources deep, so the chain is traversed and
/// each link is matched against known I/O kinds and message patterns.
fn classify_error_chain(error: &reqwest::Error) -> ErrorKind {
    let mut source = error.source();

    while let Some(inner) = source {
        if let Some(io_error) = inner.downcast_ref::<std::io::Error>() {
            return classify_io_error(io_error);
        }

        if let Some(kind) = classify_message(&inner.to_string()) {
            return kind;
        }

        source = inner.source();
    }

    if error.is_connect() {
        ErrorKind::Connect(error.to_string())
    } else {
        ErrorKind::Read(error.to_string())
    }
}

/// Map an I/O error to a tagged kind, falling back to message patterns.
pub(crate) fn classify_io_error(io_error: &std::io::Error) -> ErrorKind {
    match io_error.kind() {
        std::io::ErrorKind::ConnectionRefused
        | std::io::ErrorKind::ConnectionReset
        | std::io::ErrorKind::ConnectionAborted
        | std::io::ErrorKind::NotConnected => ErrorKind::Connect(io_error.to_string()),
        std::io::ErrorKind::TimedOut => ErrorKind::Timeout,
        std::io::ErrorKind::UnexpectedEof | std::io::ErrorKind::BrokenPipe => {
            ErrorKind::Read(io_error.to_string())
        }
        std::io::ErrorKind::InvalidData => ErrorKind::Decode(io_error.to_string()),
        _ => classify_message(&io_error.to_string())
            .unwrap_or_else(|| ErrorKind::Connect(io_error.to_string())),
    }
}

/// Pattern rules over error messages, for failures that only surface as
/// opaque strings from the TLS and resolver layers.
fn classify_message(message: &str) -> Option<ErrorKind> {
    let lowered = message.to_ascii_lowercase();

    if lowered.contains("certificate")
        || lowered.contains("handshake")
        || lowered.contains("tls")
        || lowered.contains("ssl")
    {
        return Some(ErrorKind::Tls(message.to_string()));
    }

    if lowered.contains("dns")
        || lowered.contains("failed to lookup address")
        || lowered.contains("name resolution")
        || lowered.contains("nodename nor servname")
        || lowered.contains("no such host")
    {
        return Some(ErrorKind::Dns(message.to_string()));
    }

    if lowered.contains("timed out") || lowered.contains("timeout") {
        return Some(ErrorKind::Timeout);
    }

    if lowered.contains("connection refused") || lowered.contains("connection reset") {
        return Some(ErrorKind::Connect(message.to_string()));
    }

    None
}
