use std::any::Any;
use std::hash::Hash;

use serde::{Serialize, Serializer};
use thiserror::Error;
use url::Url;

/// Kinds of per-item errors surfaced in results
///
/// Note: The error messages can change over time, so don't match on the
/// output. Use [`ErrorKind::tag`] for a stable machine-readable name.
#[derive(Error, Debug)]
#[non_exhaustive]
pub enum ErrorKind {
    /// The item carries no URL at all
    #[error("item has no URL")]
    MissingUrl,

    /// The extracted string cannot be parsed into a valid URL
    #[error("cannot parse string `{1}` as URL: {0}")]
    InvalidUrl(#[source] url::ParseError, String),

    /// Hostname could not be resolved
    #[error("DNS resolution failed: {0}")]
    Dns(String),

    /// The connection could not be established
    #[error("connection failed: {0}")]
    Connect(String),

    /// TLS negotiation or certificate validation failed
    #[error("TLS error: {0}")]
    Tls(String),

    /// The request did not complete within the configured timeout
    #[error("request timed out")]
    Timeout,

    /// Reading the response body failed mid-stream
    #[error("error reading response body: {0}")]
    Read(String),

    /// The response body could not be decoded
    #[error("error decoding response body: {0}")]
    Decode(String),

    /// The redirection chain exceeded the configured maximum
    #[error("too many redirections (limit: {0})")]
    TooManyRedirects(usize),

    /// The redirection chain revisited an already seen URL
    #[error("redirection cycle detected at {0}")]
    RedirectCycle(Url),

    /// A redirection target could not be resolved against the current URL
    #[error("invalid redirection target `{0}`")]
    BadRedirectTarget(String),

    /// A caller-supplied callable (key extractor, throttle, request args,
    /// callback) panicked while handling this item
    #[error("caller-supplied code panicked: {0}")]
    PolicyPanic(String),

    /// The transport client required for making requests cannot be created
    #[error("error creating transport client: {0}")]
    BuildTransport(String),
}

impl ErrorKind {
    /// Stable snake_case name of this error kind, suitable for reports
    /// and machine consumption.
    #[must_use]
    pub const fn tag(&self) -> &'static str {
        match self {
            ErrorKind::MissingUrl => "missing_url",
            ErrorKind::InvalidUrl(..) => "invalid_url",
            ErrorKind::Dns(_) => "dns",
            ErrorKind::Connect(_) => "connect",
            ErrorKind::Tls(_) => "tls",
            ErrorKind::Timeout => "timeout",
            ErrorKind::Read(_) => "read",
            ErrorKind::Decode(_) => "decode",
            ErrorKind::TooManyRedirects(_) => "too_many_redirects",
            ErrorKind::RedirectCycle(_) => "redirect_cycle",
            ErrorKind::BadRedirectTarget(_) => "bad_redirect_target",
            ErrorKind::PolicyPanic(_) => "policy_panic",
            ErrorKind::BuildTransport(_) => "build_transport",
        }
    }

    /// Whether this error originated in the network transport rather than
    /// in input preparation or caller-supplied code.
    #[must_use]
    pub const fn is_transport(&self) -> bool {
        matches!(
            self,
            ErrorKind::Dns(_)
                | ErrorKind::Connect(_)
                | ErrorKind::Tls(_)
                | ErrorKind::Timeout
                | ErrorKind::Read(_)
                | ErrorKind::Decode(_)
        )
    }
}

#[allow(clippy::match_same_arms)]
impl PartialEq for ErrorKind {
    fn eq(&self, other: &Self) -> bool {
        match (self, other) {
            (Self::MissingUrl, Self::MissingUrl) | (Self::Timeout, Self::Timeout) => true,
            (Self::InvalidUrl(e1, s1), Self::InvalidUrl(e2, s2)) => e1 == e2 && s1 == s2,
            (Self::Dns(m1), Self::Dns(m2)) => m1 == m2,
            (Self::Connect(m1), Self::Connect(m2)) => m1 == m2,
            (Self::Tls(m1), Self::Tls(m2)) => m1 == m2,
            (Self::Read(m1), Self::Read(m2)) => m1 == m2,
            (Self::Decode(m1), Self::Decode(m2)) => m1 == m2,
            (Self::TooManyRedirects(n1), Self::TooManyRedirects(n2)) => n1 == n2,
            (Self::RedirectCycle(u1), Self::RedirectCycle(u2)) => u1 == u2,
            (Self::BadRedirectTarget(t1), Self::BadRedirectTarget(t2)) => t1 == t2,
            (Self::PolicyPanic(m1), Self::PolicyPanic(m2)) => m1 == m2,
            (Self::BuildTransport(m1), Self::BuildTransport(m2)) => m1 == m2,
            _ => false,
        }
    }
}

impl Eq for ErrorKind {}

impl Hash for ErrorKind {
    fn hash<H>(&self, state: &mut H)
    where
        H: std::hash::Hasher,
    {
        self.tag().hash(state);
        self.to_string().hash(state);
    }
}

impl Serialize for ErrorKind {
    fn serialize<S>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.collect_str(self)
    }
}

/// Extract a human-readable message from a caught panic payload.
pub(crate) fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(message) = payload.downcast_ref::<&str>() {
        (*message).to_string()
    } else if let Some(message) = payload.downcast_ref::<String>() {
        message.clone()
    } else {
        "panic payload of unknown type".to_string()
    }
}
