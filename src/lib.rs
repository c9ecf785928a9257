//! `trawl` is a multi-threaded URL batch networking engine. It takes a lazy
//! stream of items carrying URLs, groups them by destination domain and
//! dispatches them over a fixed pool of worker threads while making sure
//! that no domain is hit more often than a configured throttle interval
//! allows and that no domain sees more than a configured number of
//! concurrent requests.
//!
//! Two request policies are built in: **fetch** performs the request and
//! classifies response metadata, **resolve** follows a bounded chain of
//! redirections and reports every hop taken.
//!
//! "Hello world" example:
//!
//! ```no_run
//! use trawl::Result;
//!
//! fn main() -> Result<()> {
//!     let urls = vec!["https://example.com", "https://example.org/about"];
//!     for result in trawl::fetch(urls)? {
//!         println!("{result}");
//!     }
//!     Ok(())
//! }
//! ```
//!
//! For more specific use-cases you can build a client yourself, using the
//! [`ClientBuilder`] which grants full flexibility over threading, TLS and
//! timeouts, and per-run [`FetchOptions`]/[`ResolveOptions`] which control
//! scheduling and policy behavior:
//!
//! ```no_run
//! use std::sync::Arc;
//! use std::time::Duration;
//! use trawl::{ClientBuilder, FetchOptions, Result, Throttle};
//!
//! struct Record {
//!     id: u64,
//!     url: String,
//! }
//!
//! fn main() -> Result<()> {
//!     let client = ClientBuilder::builder()
//!         .threads(10usize)
//!         .timeout(Some(Duration::from_secs(30)))
//!         .build()
//!         .client()?;
//!
//!     let options = FetchOptions::builder()
//!         .key(Arc::new(|record: &Record| Some(record.url.clone())))
//!         .throttle(Throttle::Constant(Duration::from_millis(500)))
//!         .domain_parallelism(2usize)
//!         .build();
//!
//!     let records = vec![Record {
//!         id: 1,
//!         url: "https://example.com".to_string(),
//!     }];
//!     for result in client.fetch_with(records, options) {
//!         println!("#{} {result}", result.item.id);
//!     }
//!     Ok(())
//! }
//! ```
#![warn(clippy::all, clippy::pedantic)]
#![warn(
    absolute_paths_not_starting_with_crate,
    rustdoc::invalid_html_tags,
    missing_copy_implementations,
    missing_debug_implementations,
    semicolon_in_expressions_from_macros,
    unreachable_pub,
    unused_crate_dependencies,
    unused_extern_crates,
    variant_size_differences,
    clippy::missing_const_for_fn
)]
#![deny(anonymous_parameters, macro_use_extern_crate)]
#![deny(missing_docs)]
#![allow(clippy::module_name_repetitions)]

mod client;
mod domain;
mod policy;
mod pool;
mod scheduler;
mod types;

/// The blocking transport abstraction and its default `reqwest` backend
pub mod transport;

#[cfg(test)]
pub mod test_utils;

#[doc(inline)]
pub use crate::{
    // Constants get exposed so that callers can reuse the same defaults
    client::{
        fetch, resolve, Client, ClientBuilder, FetchOptions, ResolveOptions, DEFAULT_BUFFER_SIZE,
        DEFAULT_DOMAIN_PARALLELISM, DEFAULT_FETCH_MAX_REDIRECTS, DEFAULT_RESOLVE_MAX_REDIRECTS,
        DEFAULT_THREADS, DEFAULT_THROTTLE, DEFAULT_USER_AGENT,
    },
    policy::{FetchCallback, RequestArgs, RequestArgsFn},
    pool::ResultStream,
    scheduler::KeyFn,
    types::{
        ErrorKind, FetchResult, Payload, RedirectKind, RedirectStack, RedirectStep, ResolveResult,
        Response, ResponseMeta, Result, Throttle, ThrottleFn,
    },
};
