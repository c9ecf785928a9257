//! Entry points of the engine.
//!
//! This module defines [`Client`] and [`ClientBuilder`], plus the per-run
//! option structs [`FetchOptions`] and [`ResolveOptions`]. The client owns
//! the transport (connection pool, TLS, timeouts) and the worker count;
//! the options carry everything that may vary between runs: key
//! extraction, throttling, per-domain parallelism, buffering and policy
//! behavior.
//!
//! For convenience, free [`fetch`] and [`resolve`] functions are provided
//! for ad-hoc runs over plain URL sequences.
use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use http::header::{self, HeaderMap, HeaderValue};
use typed_builder::TypedBuilder;

use crate::policy::{FetchCallback, FetchPolicy, RequestArgsFn, ResolvePolicy};
use crate::pool::{self, ResultStream};
use crate::scheduler::{KeyFn, Scheduler, SchedulerConfig};
use crate::transport::{ReqwestTransport, Transport, TransportConfig};
use crate::types::{FetchResult, ResolveResult, Result, Throttle};
use crate::ErrorKind;

/// Default number of worker threads, 25.
pub const DEFAULT_THREADS: usize = 25;
/// Default pause between a completion and the next dispatch on the same
/// domain, 200 milliseconds.
pub const DEFAULT_THROTTLE: Duration = Duration::from_millis(200);
/// Default number of concurrent requests allowed per domain, 1.
pub const DEFAULT_DOMAIN_PARALLELISM: usize = 1;
/// Default number of items buffered ahead of dispatch, 25.
pub const DEFAULT_BUFFER_SIZE: usize = 25;
/// Default number of redirections followed when fetching, 5.
pub const DEFAULT_FETCH_MAX_REDIRECTS: usize = 5;
/// Default number of redirections followed when resolving, 5.
pub const DEFAULT_RESOLVE_MAX_REDIRECTS: usize = 5;
/// Default user agent, `trawl-<PKG_VERSION>`.
pub const DEFAULT_USER_AGENT: &str = concat!("trawl/", env!("CARGO_PKG_VERSION"));

/// Builder for [`Client`].
///
/// See crate-level documentation for usage example.
#[derive(TypedBuilder, Debug, Clone)]
#[builder(field_defaults(default))]
#[builder(builder_method(doc = "
Create a builder for building `ClientBuilder`.

On the builder call, call methods with same name as its fields to set their values.

Finally, call `.build()` to create the instance of `ClientBuilder`.
"))]
pub struct ClientBuilder {
    /// Number of worker threads performing requests in parallel.
    #[builder(default = DEFAULT_THREADS)]
    threads: usize,
    /// When `true`, accept invalid TLS certificates.
    ///
    /// ## Warning
    ///
    /// You should think very carefully before using this option. If
    /// invalid certificates are trusted, any certificate for any site
    /// will be trusted for use, expired certificates included.
    insecure: bool,
    /// Response timeout per request.
    timeout: Option<Duration>,
    /// User agent sent with every request.
    ///
    /// *NOTE*: Some firewalls reject the default of niche tools; overriding
    /// this may be necessary for such sites.
    #[builder(default_code = "String::from(DEFAULT_USER_AGENT)")]
    user_agent: String,
    /// Default headers sent with every request.
    custom_headers: HeaderMap,
    /// Maximum number of redirections followed by fetch requests.
    ///
    /// Resolve runs bound their chain through
    /// [`ResolveOptions::builder`](ResolveOptions) instead, since they
    /// observe each hop themselves.
    #[builder(default = DEFAULT_FETCH_MAX_REDIRECTS)]
    max_redirects: usize,
}

impl Default for ClientBuilder {
    #[must_use]
    #[inline]
    fn default() -> Self {
        Self::builder().build()
    }
}

impl ClientBuilder {
    /// Instantiates a [`Client`].
    ///
    /// # Errors
    ///
    /// Returns an `Err` if:
    /// - The user agent is not a valid header value.
    /// - The transport client cannot be created.
    pub fn client(self) -> Result<Client> {
        let Self {
            threads,
            insecure,
            timeout,
            user_agent,
            custom_headers: mut headers,
            max_redirects,
        } = self;

        headers.insert(
            header::USER_AGENT,
            HeaderValue::from_str(&user_agent).map_err(|error| {
                ErrorKind::BuildTransport(format!("invalid user agent: {error}"))
            })?,
        );

        let transport = ReqwestTransport::new(&TransportConfig {
            default_headers: headers,
            timeout,
            insecure,
            max_redirects,
        })?;

        Ok(Client {
            transport: Arc::new(transport),
            threads: threads.max(1),
        })
    }
}

/// Per-run options for [`Client::fetch_with`].
#[derive(TypedBuilder)]
pub struct FetchOptions<T> {
    /// Extracts the URL out of each item. Without one, only
    /// [`Client::fetch`] can be used, which treats each item as its own
    /// URL.
    #[builder(default, setter(strip_option))]
    key: Option<KeyFn<T>>,
    /// Pause between a completion and the next dispatch per domain.
    #[builder(default)]
    throttle: Throttle<T>,
    /// Maximum concurrent requests per domain.
    #[builder(default = DEFAULT_DOMAIN_PARALLELISM)]
    domain_parallelism: usize,
    /// Number of items buffered ahead of dispatch. The buffer lets idle
    /// workers discover new domains when the input is clustered.
    #[builder(default = DEFAULT_BUFFER_SIZE)]
    buffer_size: usize,
    /// Derive a canonical file extension for each response.
    #[builder(default = true)]
    guess_extension: bool,
    /// Derive the text encoding of each response.
    #[builder(default = true)]
    guess_encoding: bool,
    /// Computes per-item request arguments on the worker thread.
    #[builder(default, setter(strip_option))]
    request_args: Option<RequestArgsFn<T>>,
    /// Invoked on the worker thread with each successful result before it
    /// is published, e.g. to write bodies to disk while the engine runs.
    #[builder(default, setter(strip_option))]
    callback: Option<FetchCallback<T>>,
}

impl<T> Default for FetchOptions<T> {
    fn default() -> Self {
        Self::builder().build()
    }
}

impl<T> fmt::Debug for FetchOptions<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FetchOptions")
            .field("throttle", &self.throttle)
            .field("domain_parallelism", &self.domain_parallelism)
            .field("buffer_size", &self.buffer_size)
            .field("guess_extension", &self.guess_extension)
            .field("guess_encoding", &self.guess_encoding)
            .finish_non_exhaustive()
    }
}

/// Per-run options for [`Client::resolve_with`].
#[derive(TypedBuilder)]
pub struct ResolveOptions<T> {
    /// Extracts the URL out of each item. Without one, only
    /// [`Client::resolve`] can be used, which treats each item as its own
    /// URL.
    #[builder(default, setter(strip_option))]
    key: Option<KeyFn<T>>,
    /// Pause between a completion and the next dispatch per domain.
    #[builder(default)]
    throttle: Throttle<T>,
    /// Maximum concurrent requests per domain.
    #[builder(default = DEFAULT_DOMAIN_PARALLELISM)]
    domain_parallelism: usize,
    /// Number of items buffered ahead of dispatch.
    #[builder(default = DEFAULT_BUFFER_SIZE)]
    buffer_size: usize,
    /// Maximum number of redirection steps per chain.
    #[builder(default = DEFAULT_RESOLVE_MAX_REDIRECTS)]
    max_redirects: usize,
    /// Treat `Refresh` response headers as redirections.
    #[builder(default = true)]
    follow_refresh_header: bool,
    /// Scan response bodies for meta refresh tags and treat them as
    /// redirections. Implies requesting with `GET` instead of `HEAD`.
    #[builder(default = false)]
    follow_meta_refresh: bool,
    /// Computes per-item request arguments on the worker thread.
    #[builder(default, setter(strip_option))]
    request_args: Option<RequestArgsFn<T>>,
}

impl<T> Default for ResolveOptions<T> {
    fn default() -> Self {
        Self::builder().build()
    }
}

impl<T> fmt::Debug for ResolveOptions<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ResolveOptions")
            .field("throttle", &self.throttle)
            .field("domain_parallelism", &self.domain_parallelism)
            .field("buffer_size", &self.buffer_size)
            .field("max_redirects", &self.max_redirects)
            .field("follow_refresh_header", &self.follow_refresh_header)
            .field("follow_meta_refresh", &self.follow_meta_refresh)
            .finish_non_exhaustive()
    }
}

/// Runs batches of fetch and resolve jobs over a fixed worker pool.
///
/// See [`ClientBuilder`] which contains sane defaults for all
/// configuration options.
#[derive(Clone)]
pub struct Client {
    transport: Arc<dyn Transport>,
    threads: usize,
}

impl Client {
    /// Build a client over a custom [`Transport`] implementation.
    ///
    /// This is the seam for deterministic engines: tests and simulations
    /// substitute a scripted transport while keeping the full scheduling
    /// behavior.
    #[must_use]
    pub fn with_transport(transport: Arc<dyn Transport>, threads: usize) -> Self {
        Self {
            transport,
            threads: threads.max(1),
        }
    }

    /// Fetch a sequence of URLs with default options.
    ///
    /// Each item is treated as its own URL. Results arrive in completion
    /// order, one per input item.
    pub fn fetch<I>(&self, input: I) -> ResultStream<FetchResult<I::Item>>
    where
        I: IntoIterator,
        I::IntoIter: Send + 'static,
        I::Item: AsRef<str> + Send + 'static,
    {
        self.fetch_with(
            input,
            FetchOptions::builder().key(identity_key::<I::Item>()).build(),
        )
    }

    /// Fetch a sequence of arbitrary items.
    ///
    /// The options' key extractor derives each item's URL; items without
    /// one produce a `missing_url` result without any network attempt.
    /// The input may be infinite: it is only read as buffer space admits.
    pub fn fetch_with<I, T>(&self, input: I, options: FetchOptions<T>) -> ResultStream<FetchResult<T>>
    where
        I: IntoIterator<Item = T>,
        I::IntoIter: Send + 'static,
        T: Send + 'static,
    {
        let scheduler = Arc::new(Scheduler::new(
            Box::new(input.into_iter()),
            options.key,
            SchedulerConfig {
                domain_parallelism: options.domain_parallelism,
                buffer_size: options.buffer_size,
            },
        ));

        let policy = Arc::new(FetchPolicy::new(
            Arc::clone(&self.transport),
            options.request_args,
            options.callback,
            options.guess_extension,
            options.guess_encoding,
        ));

        pool::spawn(scheduler, policy, options.throttle, self.threads)
    }

    /// Resolve the redirection chains of a sequence of URLs with default
    /// options.
    pub fn resolve<I>(&self, input: I) -> ResultStream<ResolveResult<I::Item>>
    where
        I: IntoIterator,
        I::IntoIter: Send + 'static,
        I::Item: AsRef<str> + Send + 'static,
    {
        self.resolve_with(
            input,
            ResolveOptions::builder().key(identity_key::<I::Item>()).build(),
        )
    }

    /// Resolve the redirection chains of a sequence of arbitrary items.
    pub fn resolve_with<I, T>(
        &self,
        input: I,
        options: ResolveOptions<T>,
    ) -> ResultStream<ResolveResult<T>>
    where
        I: IntoIterator<Item = T>,
        I::IntoIter: Send + 'static,
        T: Send + 'static,
    {
        let scheduler = Arc::new(Scheduler::new(
            Box::new(input.into_iter()),
            options.key,
            SchedulerConfig {
                domain_parallelism: options.domain_parallelism,
                buffer_size: options.buffer_size,
            },
        ));

        let policy = Arc::new(ResolvePolicy::new(
            Arc::clone(&self.transport),
            options.request_args,
            options.max_redirects,
            options.follow_refresh_header,
            options.follow_meta_refresh,
        ));

        pool::spawn(scheduler, policy, options.throttle, self.threads)
    }
}

impl fmt::Debug for Client {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Client")
            .field("threads", &self.threads)
            .finish_non_exhaustive()
    }
}

/// The key used when items are their own URLs.
fn identity_key<T: AsRef<str>>() -> KeyFn<T> {
    Arc::new(|item: &T| {
        let value = item.as_ref();
        if value.trim().is_empty() {
            None
        } else {
            Some(value.to_string())
        }
    })
}

/// A convenience function to fetch a sequence of URLs with a default
/// client and default options.
///
/// # Errors
///
/// Returns an `Err` if the transport client cannot be built (see
/// [`ClientBuilder::client`] for failure cases).
pub fn fetch<I>(input: I) -> Result<ResultStream<FetchResult<I::Item>>>
where
    I: IntoIterator,
    I::IntoIter: Send + 'static,
    I::Item: AsRef<str> + Send + 'static,
{
    Ok(ClientBuilder::default().client()?.fetch(input))
}

/// A convenience function to resolve a sequence of URLs with a default
/// client and default options.
///
/// # Errors
///
/// Returns an `Err` if the transport client cannot be built (see
/// [`ClientBuilder::client`] for failure cases).
pub fn resolve<I>(input: I) -> Result<ResultStream<ResolveResult<I::Item>>>
where
    I: IntoIterator,
    I::IntoIter: Send + 'static,
    I::Item: AsRef<str> + Send + 'static,
{
    Ok(ClientBuilder::default().client()?.resolve(input))
}
