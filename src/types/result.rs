use std::fmt;

use serde::ser::SerializeStruct;
use serde::{Serialize, Serializer};

use super::{ErrorKind, RedirectStack, Response, ResponseMeta};

/// The outcome of fetching one input item.
///
/// Exactly one result is produced per admitted item, whether the request
/// succeeded or not. Emission happens in completion order, so callers that
/// need to correlate results with inputs should rely on the `item` field.
#[derive(Debug)]
pub struct FetchResult<T> {
    /// The caller's original item
    pub item: T,
    /// The URL that was targeted, when one could be extracted
    pub url: Option<String>,
    /// The error that terminated this item, if any
    pub error: Option<ErrorKind>,
    /// The HTTP response, on success
    pub response: Option<Response>,
    /// Metadata derived from the response, on success
    pub meta: Option<ResponseMeta>,
}

impl<T> FetchResult<T> {
    /// Whether the item was fetched without error
    #[must_use]
    pub const fn is_success(&self) -> bool {
        self.error.is_none() && self.response.is_some()
    }
}

impl<T> fmt::Display for FetchResult<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let Some(url) = self.url.as_deref() else {
            return write!(f, "<null>");
        };

        write!(f, "{url}")?;

        if let Some(error) = &self.error {
            write!(f, " | {error}")
        } else if let Some(response) = &self.response {
            write!(f, " | {}", response.status())
        } else {
            Ok(())
        }
    }
}

impl<T: Serialize> Serialize for FetchResult<T> {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        let mut s = serializer.serialize_struct("FetchResult", 4)?;
        s.serialize_field("item", &self.item)?;
        s.serialize_field("url", &self.url)?;
        s.serialize_field("error", &self.error)?;
        s.serialize_field(
            "status",
            &self.response.as_ref().map(|r| r.status().as_u16()),
        )?;
        s.end()
    }
}

/// The outcome of resolving one input item's redirection chain.
#[derive(Debug)]
pub struct ResolveResult<T> {
    /// The caller's original item
    pub item: T,
    /// The URL that was targeted, when one could be extracted
    pub url: Option<String>,
    /// The error that terminated this item, if any; the partial stack is
    /// still present for redirection errors
    pub error: Option<ErrorKind>,
    /// The hops taken, ending with a `hit` entry when resolution succeeded
    pub stack: Option<RedirectStack>,
}

impl<T> ResolveResult<T> {
    /// Whether the chain resolved to a terminal hit without error
    #[must_use]
    pub const fn is_success(&self) -> bool {
        self.error.is_none() && self.stack.is_some()
    }
}

impl<T> fmt::Display for ResolveResult<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let Some(url) = self.url.as_deref() else {
            return write!(f, "<null>");
        };

        write!(f, "{url}")?;

        if let Some(error) = &self.error {
            write!(f, " | {error}")?;
        }

        if let Some(stack) = &self.stack {
            if let Some(step) = stack.last() {
                write!(
                    f,
                    " | {} redirections to {} ({})",
                    stack.len().saturating_sub(1),
                    step.to,
                    step.status
                )?;
            }
        }

        Ok(())
    }
}

impl<T: Serialize> Serialize for ResolveResult<T> {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        let mut s = serializer.serialize_struct("ResolveResult", 4)?;
        s.serialize_field("item", &self.item)?;
        s.serialize_field("url", &self.url)?;
        s.serialize_field("error", &self.error)?;
        s.serialize_field("stack", &self.stack)?;
        s.end()
    }
}
