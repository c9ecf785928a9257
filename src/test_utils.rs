//! Deterministic transport stubs for exercising the engine without any
//! network. The stub records every call with a monotonic offset so tests
//! can assert on dispatch timelines, per-domain concurrency and ordering.

use std::collections::{HashMap, VecDeque};
use std::io::Cursor;
use std::sync::Mutex;
use std::thread;
use std::time::{Duration, Instant};

use http::header::{HeaderMap, HeaderName, HeaderValue};
use http::{Method, StatusCode};

use crate::transport::{RequestParts, Transport, TransportResponse};
use crate::types::Result;
use crate::ErrorKind;

/// A scripted response.
#[derive(Debug, Clone)]
pub(crate) struct StubResponse {
    status: u16,
    headers: Vec<(String, String)>,
    body: Vec<u8>,
}

impl StubResponse {
    pub(crate) fn status(status: u16) -> Self {
        Self {
            status,
            headers: Vec::new(),
            body: Vec::new(),
        }
    }

    pub(crate) fn redirect(status: u16, location: &str) -> Self {
        Self::status(status).header("location", location)
    }

    pub(crate) fn header(mut self, name: &str, value: &str) -> Self {
        self.headers.push((name.to_string(), value.to_string()));
        self
    }

    pub(crate) fn body(mut self, body: Vec<u8>) -> Self {
        self.body = body;
        self
    }

    fn into_transport_response(self) -> TransportResponse {
        let mut headers = HeaderMap::new();
        for (name, value) in &self.headers {
            headers.insert(
                HeaderName::from_bytes(name.as_bytes()).expect("valid stub header name"),
                HeaderValue::from_str(value).expect("valid stub header value"),
            );
        }

        TransportResponse {
            status: StatusCode::from_u16(self.status).expect("valid stub status"),
            headers,
            body: Box::new(Cursor::new(self.body)),
        }
    }
}

/// What the stub does when a routed URL is requested.
#[derive(Clone)]
pub(crate) enum StubReply {
    Respond(StubResponse),
    Fail(fn() -> ErrorKind),
}

/// One recorded transport call.
#[derive(Debug, Clone)]
pub(crate) struct StubCall {
    pub(crate) url: String,
    pub(crate) method: Method,
    /// Time since the stub was created when the call arrived
    pub(crate) offset: Duration,
}

/// A scripted, fully deterministic [`Transport`].
///
/// Unrouted URLs answer `200 OK` with an empty body. A URL routed to
/// several replies serves them in order and then sticks to the last one,
/// so chains that revisit a URL keep getting answers.
pub(crate) struct StubTransport {
    routes: Mutex<HashMap<String, VecDeque<StubReply>>>,
    latency: Duration,
    started: Instant,
    calls: Mutex<Vec<StubCall>>,
    in_flight: Mutex<HashMap<String, usize>>,
    max_in_flight: Mutex<HashMap<String, usize>>,
}

impl StubTransport {
    pub(crate) fn new() -> Self {
        Self {
            routes: Mutex::new(HashMap::new()),
            latency: Duration::ZERO,
            started: Instant::now(),
            calls: Mutex::new(Vec::new()),
            in_flight: Mutex::new(HashMap::new()),
            max_in_flight: Mutex::new(HashMap::new()),
        }
    }

    /// Make every call take this long, so in-flight windows are wide
    /// enough to observe concurrency.
    pub(crate) fn latency(mut self, latency: Duration) -> Self {
        self.latency = latency;
        self
    }

    pub(crate) fn route(self, url: &str, reply: StubReply) -> Self {
        self.route_many(url, vec![reply])
    }

    pub(crate) fn route_many(self, url: &str, replies: Vec<StubReply>) -> Self {
        self.routes
            .lock()
            .unwrap()
            .entry(url.to_string())
            .or_default()
            .extend(replies);
        self
    }

    /// Every call recorded so far, in arrival order.
    pub(crate) fn calls(&self) -> Vec<StubCall> {
        self.calls.lock().unwrap().clone()
    }

    /// The highest number of overlapping calls observed for a host.
    pub(crate) fn max_concurrent(&self, host: &str) -> usize {
        self.max_in_flight
            .lock()
            .unwrap()
            .get(host)
            .copied()
            .unwrap_or(0)
    }
}

impl Transport for StubTransport {
    fn perform(&self, parts: RequestParts) -> Result<TransportResponse> {
        let url = parts.url.to_string();
        let host = parts.url.host_str().unwrap_or("").to_string();

        self.calls.lock().unwrap().push(StubCall {
            url: url.clone(),
            method: parts.method,
            offset: self.started.elapsed(),
        });

        {
            let mut in_flight = self.in_flight.lock().unwrap();
            let current = in_flight.entry(host.clone()).or_insert(0);
            *current += 1;
            let mut max = self.max_in_flight.lock().unwrap();
            let peak = max.entry(host.clone()).or_insert(0);
            *peak = (*peak).max(*current);
        }

        if !self.latency.is_zero() {
            thread::sleep(self.latency);
        }

        {
            let mut in_flight = self.in_flight.lock().unwrap();
            if let Some(current) = in_flight.get_mut(&host) {
                *current -= 1;
            }
        }

        let reply = {
            let mut routes = self.routes.lock().unwrap();
            match routes.get_mut(&url) {
                Some(replies) if replies.len() > 1 => replies.pop_front(),
                Some(replies) => replies.front().cloned(),
                None => None,
            }
        };

        match reply {
            Some(StubReply::Fail(make_error)) => Err(make_error()),
            Some(StubReply::Respond(response)) => Ok(response.into_transport_response()),
            None => Ok(StubResponse::status(200).into_transport_response()),
        }
    }
}
