use std::fmt;
use std::path::Path;
use std::sync::LazyLock;

use mime::Mime;
use regex::Regex;
use serde::ser::SerializeStruct;
use serde::{Serialize, Serializer};
use url::Url;

use super::Response;

/// How many leading body bytes are inspected when sniffing a charset
/// declaration out of an HTML document.
const ENCODING_SNIFF_BYTES: usize = 2048;

static META_CHARSET: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r#"(?i)<meta[^>]+charset\s*=\s*["']?([a-zA-Z0-9_-]+)"#)
        .expect("meta charset pattern must compile")
});

/// Metadata derived from a fetched response: its MIME type, a canonical
/// file extension and the text encoding, each best-effort.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResponseMeta {
    /// MIME type, from the `Content-Type` header or the URL path
    pub mime: Option<Mime>,
    /// Canonical file extension for the content, without the leading dot
    pub ext: Option<String>,
    /// Character encoding of the body, lowercased
    pub encoding: Option<String>,
}

impl ResponseMeta {
    /// Derive metadata for a response fetched from `url`.
    ///
    /// The MIME type prefers the `Content-Type` header and falls back to
    /// guessing from the URL path extension. The extension keeps the URL's
    /// own extension when it agrees with the MIME type and otherwise takes
    /// the type's canonical extension. The encoding comes from the charset
    /// parameter of `Content-Type` or, for textual types, from a bounded
    /// sniff of the body prefix (BOM, then `<meta charset>` declarations).
    #[must_use]
    pub(crate) fn guess(
        url: &Url,
        response: &Response,
        guess_extension: bool,
        guess_encoding: bool,
    ) -> Self {
        let mime = response
            .content_type()
            .or_else(|| mime_from_url(url));

        let ext = if guess_extension {
            mime.as_ref().and_then(|mime| canonical_extension(url, mime))
        } else {
            None
        };

        let encoding = charset_param(response.content_type().as_ref()).or_else(|| {
            if guess_encoding && is_textual(mime.as_ref()) {
                sniff_encoding(response.body())
            } else {
                None
            }
        });

        Self {
            mime,
            ext,
            encoding,
        }
    }
}

impl fmt::Display for ResponseMeta {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} ext={} encoding={}",
            self.mime.as_ref().map_or("?", Mime::essence_str),
            self.ext.as_deref().unwrap_or("?"),
            self.encoding.as_deref().unwrap_or("?")
        )
    }
}

impl Serialize for ResponseMeta {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        let mut s = serializer.serialize_struct("ResponseMeta", 3)?;
        s.serialize_field("mime", &self.mime.as_ref().map(Mime::essence_str))?;
        s.serialize_field("ext", &self.ext)?;
        s.serialize_field("encoding", &self.encoding)?;
        s.end()
    }
}

/// Guess the MIME type from the extension of the URL path.
fn mime_from_url(url: &Url) -> Option<Mime> {
    let guess = mime_guess::from_path(Path::new(url.path()));
    guess.first()
}

/// The extension of the URL path, when it has one.
fn url_extension(url: &Url) -> Option<String> {
    Path::new(url.path())
        .extension()
        .and_then(|ext| ext.to_str())
        .map(str::to_ascii_lowercase)
}

/// Pick an extension consistent with the MIME type: the URL's own when it
/// maps to the same type, else the canonical one for the type.
fn canonical_extension(url: &Url, mime: &Mime) -> Option<String> {
    if let Some(ext) = url_extension(url) {
        let mapped = mime_guess::from_ext(&ext).first();
        if mapped.as_ref().map(Mime::essence_str) == Some(mime.essence_str()) {
            return Some(ext);
        }
    }

    mime_guess::get_mime_extensions(mime)
        .and_then(|extensions| extensions.first())
        .map(|ext| (*ext).to_string())
}

/// The charset parameter of a `Content-Type`, lowercased.
fn charset_param(mime: Option<&Mime>) -> Option<String> {
    mime.and_then(|mime| mime.get_param(mime::CHARSET))
        .map(|charset| charset.as_str().to_ascii_lowercase())
}

/// Whether a body of this type is worth sniffing for a charset.
fn is_textual(mime: Option<&Mime>) -> bool {
    match mime {
        Some(mime) => {
            mime.type_() == mime::TEXT
                || mime.suffix() == Some(mime::XML)
                || matches!(
                    mime.essence_str(),
                    "application/json" | "application/xml" | "application/javascript"
                )
        }
        None => false,
    }
}

/// Sniff the encoding out of a body prefix: byte order marks first, then
/// `<meta charset>` style declarations.
fn sniff_encoding(body: &[u8]) -> Option<String> {
    if body.starts_with(&[0xef, 0xbb, 0xbf]) {
        return Some("utf-8".to_string());
    }
    if body.starts_with(&[0xfe, 0xff]) {
        return Some("utf-16be".to_string());
    }
    if body.starts_with(&[0xff, 0xfe]) {
        return Some("utf-16le".to_string());
    }

    let prefix = &body[..body.len().min(ENCODING_SNIFF_BYTES)];
    let text = String::from_utf8_lossy(prefix);

    META_CHARSET
        .captures(&text)
        .map(|captures| captures[1].to_ascii_lowercase())
}
