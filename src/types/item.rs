use std::fmt;
use std::panic::{self, AssertUnwindSafe};

use url::Url;

use super::error::panic_message;
use crate::domain;
use crate::scheduler::KeyFn;
use crate::ErrorKind;

/// The unit of work flowing through the engine: the caller's original item
/// together with its extracted URL and the domain key used for scheduling.
///
/// Payloads are handed to caller-supplied callables (dynamic throttles and
/// request-argument functions), which may inspect the item and the cached
/// URL without re-extracting anything.
pub struct Payload<T> {
    item: T,
    url: Option<Url>,
    raw_url: Option<String>,
    domain: String,
    preset_error: Option<ErrorKind>,
}

impl<T> Payload<T> {
    /// Build a payload from an input item, evaluating the key extractor and
    /// deriving the domain key. A panicking extractor or an unparsable URL
    /// does not abort the run: the payload carries the error and flows
    /// through the unconstrained scheduling path to produce exactly one
    /// errored result.
    pub(crate) fn from_item(item: T, key: Option<&KeyFn<T>>) -> Self {
        let raw = match key {
            Some(extract) => {
                match panic::catch_unwind(AssertUnwindSafe(|| extract(&item))) {
                    Ok(extracted) => extracted,
                    Err(caught) => {
                        return Self {
                            item,
                            url: None,
                            raw_url: None,
                            domain: String::new(),
                            preset_error: Some(ErrorKind::PolicyPanic(panic_message(
                                caught.as_ref(),
                            ))),
                        }
                    }
                }
            }
            None => None,
        };

        let Some(cleaned) = raw.as_deref().and_then(domain::clean_url) else {
            return Self {
                item,
                url: None,
                raw_url: None,
                domain: String::new(),
                preset_error: None,
            };
        };

        match Url::parse(&cleaned) {
            Ok(url) => {
                let domain = domain::domain_key(&url);
                Self {
                    item,
                    url: Some(url),
                    raw_url: Some(cleaned),
                    domain,
                    preset_error: None,
                }
            }
            Err(source) => Self {
                item,
                url: None,
                raw_url: Some(cleaned.clone()),
                domain: String::new(),
                preset_error: Some(ErrorKind::InvalidUrl(source, cleaned)),
            },
        }
    }

    /// The caller's original item
    pub const fn item(&self) -> &T {
        &self.item
    }

    /// The parsed URL, when extraction and parsing succeeded
    pub const fn url(&self) -> Option<&Url> {
        self.url.as_ref()
    }

    /// The cleaned URL string as extracted, kept even when parsing failed
    pub fn raw_url(&self) -> Option<&str> {
        self.raw_url.as_deref()
    }

    /// The scheduling domain key; empty for items without a usable URL
    pub fn domain(&self) -> &str {
        &self.domain
    }

    /// Whether a network call should be attempted for this payload
    pub(crate) const fn wants_network(&self) -> bool {
        self.url.is_some() && self.preset_error.is_none()
    }

    /// Consume the payload into the pieces a result is assembled from:
    /// the item, the reportable URL string and any error recorded during
    /// input preparation.
    pub(crate) fn into_parts(self) -> (T, Option<String>, Option<ErrorKind>) {
        (self.item, self.raw_url, self.preset_error)
    }
}

impl<T> fmt::Debug for Payload<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Payload")
            .field("url", &self.raw_url)
            .field("domain", &self.domain)
            .field("preset_error", &self.preset_error)
            .finish_non_exhaustive()
    }
}
