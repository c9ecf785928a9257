use std::io::Read;
use std::sync::{Arc, LazyLock};

use http::header::{HeaderMap, CONTENT_TYPE, LOCATION};
use http::{Method, StatusCode};
use regex::Regex;
use url::Url;

use super::{Policy, RequestArgs, RequestArgsFn};
use crate::transport::{RequestParts, Transport};
use crate::types::{Payload, RedirectKind, RedirectStack, RedirectStep};
use crate::{ErrorKind, ResolveResult};

/// How many leading body bytes are inspected when scanning for a meta
/// refresh tag. Real pages declare it in the head, well within this.
const META_REFRESH_PEEK_BYTES: u64 = 4096;

static META_REFRESH_TAG: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r#"(?i)<meta\s[^>]*http-equiv\s*=\s*["']?refresh["']?[^>]*>"#)
        .expect("meta refresh tag pattern must compile")
});

static CONTENT_ATTR: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r#"(?i)content\s*=\s*(?:"([^"]*)"|'([^']*)'|([^\s>]+))"#)
        .expect("content attribute pattern must compile")
});

/// The resolve policy: follow a bounded chain of redirections and record
/// every hop, ending with a terminal `hit` entry.
///
/// Requests are issued with `HEAD` and retried with `GET` when a server
/// rejects the method; the fallback only covers that hop, and every new
/// hop starts over with `HEAD`. When meta refresh tags are followed the
/// default method is `GET` from the start, since a body is needed anyway.
pub(crate) struct ResolvePolicy<T> {
    transport: Arc<dyn Transport>,
    request_args: Option<RequestArgsFn<T>>,
    max_redirects: usize,
    follow_refresh_header: bool,
    follow_meta_refresh: bool,
}

pub(crate) struct ResolveOutcome {
    stack: RedirectStack,
    error: Option<ErrorKind>,
}

impl ResolveOutcome {
    const fn resolved(stack: RedirectStack) -> Self {
        Self { stack, error: None }
    }

    const fn failed(stack: RedirectStack, error: ErrorKind) -> Self {
        Self {
            stack,
            error: Some(error),
        }
    }
}

impl<T> ResolvePolicy<T> {
    pub(crate) fn new(
        transport: Arc<dyn Transport>,
        request_args: Option<RequestArgsFn<T>>,
        max_redirects: usize,
        follow_refresh_header: bool,
        follow_meta_refresh: bool,
    ) -> Self {
        Self {
            transport,
            request_args,
            max_redirects,
            follow_refresh_header,
            follow_meta_refresh,
        }
    }

    fn follow_chain(&self, start: &Url, args: &RequestArgs) -> ResolveOutcome {
        let mut stack = RedirectStack::new();
        let mut seen: Vec<Url> = Vec::new();
        let mut current = start.clone();
        let mut redirects = 0usize;

        let default_method = if self.follow_meta_refresh {
            Method::GET
        } else {
            Method::HEAD
        };
        let preferred_method = args.method.clone().unwrap_or(default_method);
        let mut method = preferred_method.clone();

        loop {
            let mut parts = RequestParts::new(current.clone(), method.clone());
            parts.headers = args.headers.clone();
            parts.timeout = args.timeout;
            parts.follow_redirects = false;

            let mut response = match self.transport.perform(parts) {
                Ok(response) => response,
                Err(error) => return ResolveOutcome::failed(stack, error),
            };

            if method == Method::HEAD
                && (response.status == StatusCode::METHOD_NOT_ALLOWED
                    || response.status == StatusCode::NOT_IMPLEMENTED)
            {
                // Retry this hop with GET; not a redirection step. The
                // fallback does not stick: the next hop tries HEAD again.
                method = Method::GET;
                continue;
            }

            let Some((target, kind)) = self.next_target(&mut response) else {
                stack.push(RedirectStep {
                    from: current.clone(),
                    to: current.clone(),
                    status: response.status,
                    kind: RedirectKind::Hit,
                });
                return ResolveOutcome::resolved(stack);
            };

            let next = match current.join(&target) {
                Ok(next) => next,
                Err(_) => {
                    return ResolveOutcome::failed(stack, ErrorKind::BadRedirectTarget(target))
                }
            };

            stack.push(RedirectStep {
                from: current.clone(),
                to: next.clone(),
                status: response.status,
                kind,
            });

            if seen.contains(&next) {
                return ResolveOutcome::failed(stack, ErrorKind::RedirectCycle(next));
            }

            redirects += 1;
            if redirects > self.max_redirects {
                return ResolveOutcome::failed(
                    stack,
                    ErrorKind::TooManyRedirects(self.max_redirects),
                );
            }

            seen.push(next.clone());
            current = next;
            method = preferred_method.clone();
        }
    }

    /// Decide where the response points next, if anywhere, in order of
    /// precedence: standard `Location` redirections, then the `Refresh`
    /// header, then a bounded body scan for a meta refresh tag.
    fn next_target(
        &self,
        response: &mut crate::transport::TransportResponse,
    ) -> Option<(String, RedirectKind)> {
        if response.status.is_redirection() {
            if let Some(location) = header_str(&response.headers, LOCATION.as_str()) {
                return Some((location, RedirectKind::Location));
            }
        }

        if self.follow_refresh_header {
            if let Some(target) =
                header_str(&response.headers, "refresh").and_then(|value| parse_refresh(&value))
            {
                return Some((target, RedirectKind::RefreshHeader));
            }
        }

        if self.follow_meta_refresh && response.status.is_success() && is_html(&response.headers)
        {
            let mut prefix = Vec::new();
            let mut bounded = (&mut response.body).take(META_REFRESH_PEEK_BYTES);
            // A torn body peek means no usable tag; it is not an error.
            if bounded.read_to_end(&mut prefix).is_ok() {
                let text = String::from_utf8_lossy(&prefix);
                if let Some(target) = find_meta_refresh(&text) {
                    return Some((target, RedirectKind::MetaRefresh));
                }
            }
        }

        None
    }
}

impl<T: Send> Policy<T> for ResolvePolicy<T> {
    type Outcome = ResolveOutcome;
    type Result = ResolveResult<T>;

    fn execute(&self, payload: &Payload<T>) -> ResolveOutcome {
        let Some(url) = payload.url() else {
            return ResolveOutcome::failed(RedirectStack::new(), ErrorKind::MissingUrl);
        };

        let args = self
            .request_args
            .as_ref()
            .map(|compute| compute(payload))
            .unwrap_or_default();

        self.follow_chain(url, &args)
    }

    fn panic_outcome(&self, message: String) -> ResolveOutcome {
        ResolveOutcome::failed(RedirectStack::new(), ErrorKind::PolicyPanic(message))
    }

    fn assemble(&self, payload: Payload<T>, outcome: Option<ResolveOutcome>) -> ResolveResult<T> {
        let (item, url, preset_error) = payload.into_parts();

        match outcome {
            Some(outcome) => ResolveResult {
                item,
                url,
                error: outcome.error,
                stack: if outcome.stack.is_empty() {
                    None
                } else {
                    Some(outcome.stack)
                },
            },
            None => ResolveResult {
                item,
                url,
                error: Some(preset_error.unwrap_or(ErrorKind::MissingUrl)),
                stack: None,
            },
        }
    }
}

/// Read a header as a string, tolerating absent or non-ASCII values.
fn header_str(headers: &HeaderMap, name: &str) -> Option<String> {
    headers
        .get(name)
        .and_then(|value| value.to_str().ok())
        .map(str::to_string)
}

/// Whether the response claims an HTML body.
fn is_html(headers: &HeaderMap) -> bool {
    header_str(headers, CONTENT_TYPE.as_str())
        .is_some_and(|value| value.to_ascii_lowercase().contains("html"))
}

/// Parse the target out of a refresh directive of the form `N; url=...`,
/// as found in `Refresh` headers and meta refresh `content` attributes.
fn parse_refresh(value: &str) -> Option<String> {
    let lowered = value.to_ascii_lowercase();
    let position = lowered.find("url=")?;

    let target = value[position + 4..]
        .trim()
        .trim_matches(|c| c == '"' || c == '\'')
        .trim();

    if target.is_empty() {
        None
    } else {
        Some(target.to_string())
    }
}

/// Scan an HTML prefix for a `<meta http-equiv="refresh">` tag and pull
/// the target out of its `content` attribute.
fn find_meta_refresh(html: &str) -> Option<String> {
    let tag = META_REFRESH_TAG.find(html)?;
    let captures = CONTENT_ATTR.captures(tag.as_str())?;

    let content = captures
        .get(1)
        .or_else(|| captures.get(2))
        .or_else(|| captures.get(3))?
        .as_str();

    parse_refresh(content)
}
