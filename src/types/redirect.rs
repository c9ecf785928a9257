use std::fmt;
use std::slice;

use http::StatusCode;
use serde::ser::SerializeStruct;
use serde::{Serialize, Serializer};
use url::Url;

/// How a redirection hop was discovered.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum RedirectKind {
    /// A standard 3xx response carrying a `Location` header
    Location,
    /// A `Refresh` response header of the form `N; url=...`
    RefreshHeader,
    /// A `<meta http-equiv="refresh">` tag found in the body
    MetaRefresh,
    /// The terminal entry of a stack: the URL resolved to itself
    Hit,
}

impl RedirectKind {
    /// Stable kebab-case name of the kind
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            RedirectKind::Location => "location",
            RedirectKind::RefreshHeader => "refresh-header",
            RedirectKind::MetaRefresh => "meta-refresh",
            RedirectKind::Hit => "hit",
        }
    }
}

impl fmt::Display for RedirectKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl Serialize for RedirectKind {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.serialize_str(self.as_str())
    }
}

/// One hop taken while resolving a URL.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RedirectStep {
    /// The URL that was requested
    pub from: Url,
    /// The URL the response pointed to; equals `from` on the terminal hit
    pub to: Url,
    /// The status code of the response at `from`
    pub status: StatusCode,
    /// How the target was discovered
    pub kind: RedirectKind,
}

impl Serialize for RedirectStep {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        let mut s = serializer.serialize_struct("RedirectStep", 4)?;
        s.serialize_field("from", self.from.as_str())?;
        s.serialize_field("to", self.to.as_str())?;
        s.serialize_field("status", &self.status.as_u16())?;
        s.serialize_field("kind", &self.kind)?;
        s.end()
    }
}

/// The ordered list of hops taken while resolving a URL, ending with a
/// terminal `hit` entry when the chain resolved cleanly.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct RedirectStack(Vec<RedirectStep>);

impl RedirectStack {
    pub(crate) const fn new() -> Self {
        Self(Vec::new())
    }

    pub(crate) fn push(&mut self, step: RedirectStep) {
        self.0.push(step);
    }

    /// Number of entries, terminal hit included
    #[must_use]
    pub fn len(&self) -> usize {
        self.0.len()
    }

    /// Whether the stack holds no entry at all
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// The last hop recorded, which is the terminal entry on success
    #[must_use]
    pub fn last(&self) -> Option<&RedirectStep> {
        self.0.last()
    }

    /// The URL the chain finally landed on
    #[must_use]
    pub fn resolved(&self) -> Option<&Url> {
        self.last().map(|step| &step.to)
    }

    /// Iterate over the hops in order
    pub fn iter(&self) -> slice::Iter<'_, RedirectStep> {
        self.0.iter()
    }
}

impl<'a> IntoIterator for &'a RedirectStack {
    type Item = &'a RedirectStep;
    type IntoIter = slice::Iter<'a, RedirectStep>;

    fn into_iter(self) -> Self::IntoIter {
        self.0.iter()
    }
}

impl fmt::Display for RedirectStack {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut hops = self.0.iter().map(|step| step.from.as_str()).peekable();

        while let Some(hop) = hops.next() {
            f.write_str(hop)?;
            if hops.peek().is_some() {
                f.write_str(" --> ")?;
            }
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn step(from: &str, to: &str, status: u16, kind: RedirectKind) -> RedirectStep {
        RedirectStep {
            from: Url::parse(from).unwrap(),
            to: Url::parse(to).unwrap(),
            status: StatusCode::from_u16(status).unwrap(),
            kind,
        }
    }

    #[test]
    fn test_kind_names() {
        assert_eq!(RedirectKind::Location.to_string(), "location");
        assert_eq!(RedirectKind::RefreshHeader.to_string(), "refresh-header");
        assert_eq!(RedirectKind::MetaRefresh.to_string(), "meta-refresh");
        assert_eq!(RedirectKind::Hit.to_string(), "hit");
    }

    #[test]
    fn test_resolved_is_last_target() {
        let mut stack = RedirectStack::new();
        stack.push(step(
            "https://bit.ly/x",
            "https://final.example/",
            301,
            RedirectKind::Location,
        ));
        stack.push(step(
            "https://final.example/",
            "https://final.example/",
            200,
            RedirectKind::Hit,
        ));

        assert_eq!(stack.len(), 2);
        assert_eq!(
            stack.resolved().unwrap().as_str(),
            "https://final.example/"
        );
    }

    #[test]
    fn test_display_joins_hops() {
        let mut stack = RedirectStack::new();
        stack.push(step(
            "https://a.example/",
            "https://b.example/",
            301,
            RedirectKind::Location,
        ));
        stack.push(step(
            "https://b.example/",
            "https://b.example/",
            200,
            RedirectKind::Hit,
        ));

        assert_eq!(
            stack.to_string(),
            "https://a.example/ --> https://b.example/"
        );
    }
}
