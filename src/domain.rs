//! URL cleanup and extraction of the domain key used for scheduling.
//!
//! The domain key, not the full URL, is what groups items into queues and
//! what the throttle and parallelism caps apply to. Extraction must stay
//! pure and cheap because it runs while the scheduler lock is held.

use url::{Host, Url};

/// Minimal cleanup applied to an extracted URL string before parsing:
/// surrounding whitespace is trimmed and a protocol is prepended when the
/// string has none. Returns `None` when nothing usable remains.
pub(crate) fn clean_url(raw: &str) -> Option<String> {
    let trimmed = raw.trim();

    if trimmed.is_empty() {
        return None;
    }

    if has_protocol(trimmed) {
        Some(trimmed.to_string())
    } else {
        Some(format!("http://{trimmed}"))
    }
}

/// Whether the string already starts with a `scheme://` prefix.
fn has_protocol(value: &str) -> bool {
    match value.split_once("://") {
        Some((scheme, _)) => {
            !scheme.is_empty()
                && scheme
                    .chars()
                    .all(|c| c.is_ascii_alphanumeric() || matches!(c, '+' | '-' | '.'))
        }
        None => false,
    }
}

/// Extract the canonical domain key of a URL.
///
/// The host is lowercased by the URL parser already; a leading `www.` label
/// is dropped when a dotted remainder is left, so `www.lemonde.fr` and
/// `lemonde.fr` share a queue. IP hosts pass through unchanged. A URL
/// without a host yields the empty string, the "no-domain" sentinel that
/// the scheduler dispatches through its unconstrained path.
pub(crate) fn domain_key(url: &Url) -> String {
    match url.host() {
        Some(Host::Domain(host)) => {
            let stripped = host.strip_prefix("www.").unwrap_or(host);

            if stripped.contains('.') {
                stripped.to_string()
            } else {
                host.to_string()
            }
        }
        Some(host) => host.to_string(),
        None => String::new(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn key(raw: &str) -> String {
        domain_key(&Url::parse(raw).unwrap())
    }

    #[test]
    fn test_clean_url_trims_and_defaults_protocol() {
        assert_eq!(
            clean_url("  lemonde.fr/page "),
            Some("http://lemonde.fr/page".to_string())
        );
        assert_eq!(
            clean_url("https://lemonde.fr"),
            Some("https://lemonde.fr".to_string())
        );
        assert_eq!(clean_url("   "), None);
        assert_eq!(clean_url(""), None);
    }

    #[test]
    fn test_clean_url_does_not_mistake_paths_for_protocols() {
        assert_eq!(
            clean_url("example.com/a://b"),
            Some("http://example.com/a://b".to_string())
        );
    }

    #[test]
    fn test_domain_key_strips_www() {
        assert_eq!(key("https://www.lemonde.fr/article"), "lemonde.fr");
        assert_eq!(key("https://lemonde.fr"), "lemonde.fr");
        assert_eq!(key("https://www.bbc.co.uk"), "bbc.co.uk");
    }

    #[test]
    fn test_domain_key_is_lowercase() {
        assert_eq!(key("https://WWW.LeMonde.FR"), "lemonde.fr");
    }

    #[test]
    fn test_domain_key_keeps_bare_and_ip_hosts() {
        assert_eq!(key("http://localhost:8080"), "localhost");
        assert_eq!(key("http://www"), "www");
        assert_eq!(key("http://127.0.0.1/x"), "127.0.0.1");
    }

    #[test]
    fn test_domain_key_without_host_is_sentinel() {
        assert_eq!(key("data:text/plain,hello"), "");
    }
}
