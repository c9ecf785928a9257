//! The pluggable per-job behavior invoked by workers.
//!
//! A policy decides what network operation a payload triggers and how the
//! outcome is classified. The two built-in policies are [`fetch`] and
//! [`resolve`]; both run over the [`Transport`](crate::transport::Transport)
//! seam and never see the scheduler.

mod fetch;
mod resolve;

use std::sync::Arc;
use std::time::Duration;

pub(crate) use fetch::FetchPolicy;
pub(crate) use resolve::ResolvePolicy;

use http::header::HeaderMap;
use http::Method;

use crate::types::Payload;
use crate::FetchResult;

/// Per-request arguments computed from a payload by a caller-supplied
/// [`RequestArgsFn`], overriding the run defaults for that item.
#[derive(Debug, Clone, Default)]
pub struct RequestArgs {
    /// HTTP method override; each policy picks its own default
    pub method: Option<Method>,
    /// Extra headers for this request
    pub headers: HeaderMap,
    /// Per-request timeout overriding the client default
    pub timeout: Option<Duration>,
}

/// Signature of the per-item request argument callable.
///
/// Evaluated on the worker thread right before the request is performed.
/// It must be thread-safe; a panic is caught and reported as that item's
/// result.
pub type RequestArgsFn<T> = Arc<dyn Fn(&Payload<T>) -> RequestArgs + Send + Sync>;

/// Signature of the fetch success callback, invoked on the worker thread
/// with each successful result before it is published.
pub type FetchCallback<T> = Arc<dyn Fn(&FetchResult<T>) + Send + Sync>;

/// The behavior a worker runs for each dispatched payload.
///
/// `execute` performs the network side and is wrapped in a panic guard by
/// the worker; it borrows the payload so the caller's item survives a
/// panic and still yields a result. `assemble` consumes the payload and
/// produces the final result; it receives `None` when no network call was
/// attempted (missing URL or an error recorded during input preparation).
pub(crate) trait Policy<T>: Send + Sync {
    type Outcome: Send;
    type Result: Send;

    fn execute(&self, payload: &Payload<T>) -> Self::Outcome;

    fn panic_outcome(&self, message: String) -> Self::Outcome;

    fn assemble(&self, payload: Payload<T>, outcome: Option<Self::Outcome>) -> Self::Result;
}
