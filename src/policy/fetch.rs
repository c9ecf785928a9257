use std::io::Read;
use std::panic::{self, AssertUnwindSafe};
use std::sync::Arc;

use http::Method;

use super::{FetchCallback, Policy, RequestArgsFn};
use crate::transport::{RequestParts, Transport};
use crate::types::{panic_message, Payload, Response, ResponseMeta};
use crate::{ErrorKind, FetchResult};

/// The fetch policy: perform one request per payload, read the body and
/// enrich the result with response metadata.
///
/// Redirections are followed by the transport itself, so a fetched
/// response is always the final hop of a chain.
pub(crate) struct FetchPolicy<T> {
    transport: Arc<dyn Transport>,
    request_args: Option<RequestArgsFn<T>>,
    callback: Option<FetchCallback<T>>,
    guess_extension: bool,
    guess_encoding: bool,
}

pub(crate) struct FetchOutcome {
    response: Option<Response>,
    meta: Option<ResponseMeta>,
    error: Option<ErrorKind>,
}

impl FetchOutcome {
    const fn failed(error: ErrorKind) -> Self {
        Self {
            response: None,
            meta: None,
            error: Some(error),
        }
    }
}

impl<T> FetchPolicy<T> {
    pub(crate) fn new(
        transport: Arc<dyn Transport>,
        request_args: Option<RequestArgsFn<T>>,
        callback: Option<FetchCallback<T>>,
        guess_extension: bool,
        guess_encoding: bool,
    ) -> Self {
        Self {
            transport,
            request_args,
            callback,
            guess_extension,
            guess_encoding,
        }
    }
}

impl<T: Send> Policy<T> for FetchPolicy<T> {
    type Outcome = FetchOutcome;
    type Result = FetchResult<T>;

    fn execute(&self, payload: &Payload<T>) -> FetchOutcome {
        let Some(url) = payload.url() else {
            return FetchOutcome::failed(ErrorKind::MissingUrl);
        };

        let args = self
            .request_args
            .as_ref()
            .map(|compute| compute(payload))
            .unwrap_or_default();

        let mut parts = RequestParts::new(url.clone(), args.method.unwrap_or(Method::GET));
        parts.headers = args.headers;
        parts.timeout = args.timeout;

        let mut response = match self.transport.perform(parts) {
            Ok(response) => response,
            Err(error) => return FetchOutcome::failed(error),
        };

        let mut body = Vec::new();
        if let Err(error) = response.body.read_to_end(&mut body) {
            return FetchOutcome::failed(crate::transport::classify_io_error(&error));
        }

        let response = Response::new(response.status, response.headers, body);
        let meta = ResponseMeta::guess(url, &response, self.guess_extension, self.guess_encoding);

        FetchOutcome {
            response: Some(response),
            meta: Some(meta),
            error: None,
        }
    }

    fn panic_outcome(&self, message: String) -> FetchOutcome {
        FetchOutcome::failed(ErrorKind::PolicyPanic(message))
    }

    fn assemble(&self, payload: Payload<T>, outcome: Option<FetchOutcome>) -> FetchResult<T> {
        let (item, url, preset_error) = payload.into_parts();

        let mut result = match outcome {
            Some(outcome) => FetchResult {
                item,
                url,
                error: outcome.error,
                response: outcome.response,
                meta: outcome.meta,
            },
            None => FetchResult {
                item,
                url,
                error: Some(preset_error.unwrap_or(ErrorKind::MissingUrl)),
                response: None,
                meta: None,
            },
        };

        if result.error.is_none() {
            if let Some(callback) = &self.callback {
                if let Err(caught) =
                    panic::catch_unwind(AssertUnwindSafe(|| callback(&result)))
                {
                    result.error =
                        Some(ErrorKind::PolicyPanic(panic_message(caught.as_ref())));
                }
            }
        }

        result
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Mutex;

    use super::super::{RequestArgs, RequestArgsFn};
    use super::*;
    use crate::test_utils::{StubReply, StubResponse, StubTransport};

    fn payload(url: &str) -> Payload<String> {
        let key: crate::KeyFn<String> = Arc::new(|item: &String| Some(item.clone()));
        Payload::from_item(url.to_string(), Some(&key))
    }

    fn policy(transport: Arc<StubTransport>) -> FetchPolicy<String> {
        FetchPolicy::new(transport, None, None, true, true)
    }

    #[test]
    fn test_fetch_reads_body_and_guesses_meta() {
        let transport = Arc::new(StubTransport::new().route(
            "https://a.example/page.html",
            StubReply::Respond(
                StubResponse::status(200)
                    .header("content-type", "text/html; charset=utf-8")
                    .body(b"<html>hello</html>".to_vec()),
            ),
        ));
        let policy = policy(Arc::clone(&transport));

        let payload = payload("https://a.example/page.html");
        let outcome = policy.execute(&payload);
        let result = policy.assemble(payload, Some(outcome));

        assert!(result.is_success());
        let response = result.response.unwrap();
        assert_eq!(response.status().as_u16(), 200);
        assert_eq!(response.text(), "<html>hello</html>");

        let meta = result.meta.unwrap();
        assert_eq!(meta.mime.unwrap().essence_str(), "text/html");
        assert_eq!(meta.ext.as_deref(), Some("html"));
        assert_eq!(meta.encoding.as_deref(), Some("utf-8"));
    }

    #[test]
    fn test_fetch_missing_url() {
        let transport = Arc::new(StubTransport::new());
        let policy = policy(Arc::clone(&transport));

        let payload = Payload::from_item("no url here".to_string(), None);
        assert!(!payload.wants_network());
        let result = policy.assemble(payload, None);

        assert!(matches!(result.error, Some(ErrorKind::MissingUrl)));
        assert!(result.response.is_none());
        assert!(transport.calls().is_empty());
    }

    #[test]
    fn test_fetch_transport_error_is_tagged() {
        let transport = Arc::new(StubTransport::new().route(
            "https://down.example/",
            StubReply::Fail(|| ErrorKind::Connect("connection refused".into())),
        ));
        let policy = policy(transport);

        let payload = payload("https://down.example/");
        let outcome = policy.execute(&payload);
        let result = policy.assemble(payload, Some(outcome));

        assert!(matches!(result.error, Some(ErrorKind::Connect(_))));
    }

    #[test]
    fn test_fetch_request_args_override_method() {
        let transport = Arc::new(StubTransport::new());
        let args: RequestArgsFn<String> = Arc::new(|_| RequestArgs {
            method: Some(Method::HEAD),
            ..RequestArgs::default()
        });
        let policy = FetchPolicy::new(
            Arc::clone(&transport) as Arc<dyn Transport>,
            Some(args),
            None,
            true,
            true,
        );

        let payload = payload("https://a.example/");
        let _ = policy.execute(&payload);

        assert_eq!(transport.calls()[0].method, Method::HEAD);
    }

    #[test]
    fn test_fetch_callback_runs_on_success() {
        let seen: Arc<Mutex<Vec<String>>> = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&seen);
        let callback: FetchCallback<String> = Arc::new(move |result| {
            sink.lock().unwrap().push(result.url.clone().unwrap());
        });

        let transport = Arc::new(StubTransport::new());
        let policy = FetchPolicy::new(
            Arc::clone(&transport) as Arc<dyn Transport>,
            None,
            Some(callback),
            true,
            true,
        );

        let payload = payload("https://a.example/");
        let outcome = policy.execute(&payload);
        let result = policy.assemble(payload, Some(outcome));

        assert!(result.is_success());
        assert_eq!(seen.lock().unwrap().as_slice(), ["https://a.example/"]);
    }

    #[test]
    fn test_fetch_callback_panic_taints_result() {
        let callback: FetchCallback<String> = Arc::new(|_| panic!("callback exploded"));

        let transport = Arc::new(StubTransport::new());
        let policy = FetchPolicy::new(
            Arc::clone(&transport) as Arc<dyn Transport>,
            None,
            Some(callback),
            true,
            true,
        );

        let payload = payload("https://a.example/");
        let outcome = policy.execute(&payload);
        let result = policy.assemble(payload, Some(outcome));

        assert!(
            matches!(result.error, Some(ErrorKind::PolicyPanic(ref m)) if m == "callback exploded")
        );
        // The response itself was still fetched and stays available.
        assert!(result.response.is_some());
    }
}
