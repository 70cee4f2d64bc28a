//! Label derivation for tags, bridge domains and file keys

use crate::{Error, Result};

/// Prefix of every outbound tag derived from an endpoint hostname
pub const PROXY_TAG_PREFIX: &str = "proxy-";

/// Suffix of every reverse-bridge tag
pub const REVERSE_SUFFIX: &str = ".rev";

/// Prefix of forward inbound tags
pub const FORWARD_TAG_PREFIX: &str = "forward-";

/// Label used when a hostname sanitizes to nothing
const FALLBACK_LABEL: &str = "endpoint";

/// Normalize a free-form identifier into `[a-z0-9-]`.
///
/// Runs of any other characters collapse into a single `-`, and leading or
/// trailing dashes are trimmed. The result is stable under re-application.
pub fn sanitize(value: &str) -> String {
    let mut out = String::with_capacity(value.len());
    let mut last_dash = false;

    for ch in value.trim().chars().flat_map(char::to_lowercase) {
        if ch.is_ascii_lowercase() || ch.is_ascii_digit() {
            out.push(ch);
            last_dash = false;
        } else if !last_dash {
            out.push('-');
            last_dash = true;
        }
    }

    out.trim_matches('-').to_string()
}

/// Outbound tag for an endpoint hostname
pub fn proxy_tag(hostname: &str) -> String {
    let label = sanitize(hostname);
    if label.is_empty() {
        format!("{}{}", PROXY_TAG_PREFIX, FALLBACK_LABEL)
    } else {
        format!("{}{}", PROXY_TAG_PREFIX, label)
    }
}

/// Reverse-bridge tag for a user reaching back through a host.
///
/// The two labels are concatenated without a separator.
pub fn reverse_tag(user_id: &str, host: &str) -> Result<String> {
    let user = sanitize(user_id);
    let host_label = sanitize(host);
    if user.is_empty() || host_label.is_empty() {
        return Err(Error::InvalidIdentifier(format!(
            "{:?}/{:?}",
            user_id.trim(),
            host.trim()
        )));
    }
    Ok(format!("{}{}{}", user, host_label, REVERSE_SUFFIX))
}

/// Inbound tag for a forward listening on `port`
pub fn forward_tag(port: u16) -> String {
    format!("{}{}", FORWARD_TAG_PREFIX, port)
}

/// Whether an outbound tag looks like one we generated from a hostname
pub fn is_proxy_tag(tag: &str) -> bool {
    tag.trim().to_ascii_lowercase().starts_with(PROXY_TAG_PREFIX)
}

/// Whether an inbound/bridge tag looks like one we generated for a reverse channel
pub fn is_reverse_tag(tag: &str) -> bool {
    tag.trim().to_ascii_lowercase().ends_with(REVERSE_SUFFIX)
}

/// Case-folded, trimmed key for set membership checks
pub fn fold(value: &str) -> String {
    value.trim().to_ascii_lowercase()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_sanitize() {
        assert_eq!(sanitize("Edge.EXAMPLE.com"), "edge-example-com");
        assert_eq!(sanitize("  --Foo__Bar--  "), "foo-bar");
        assert_eq!(sanitize("a...b---c"), "a-b-c");
        assert_eq!(sanitize("10.0.0.1:8443"), "10-0-0-1-8443");
        assert_eq!(sanitize(""), "");
        assert_eq!(sanitize("!!!"), "");
        assert_eq!(sanitize("Ünïcode"), "n-code");
    }

    #[test]
    fn test_sanitize_idempotent_and_charset() {
        let samples = [
            "User.Name",
            "a--b",
            "-lead",
            "trail-",
            "MiXeD Case_and spaces",
            "ünïcödé.例子.test",
            "::1",
            "",
        ];
        for sample in samples {
            let once = sanitize(sample);
            assert_eq!(sanitize(&once), once, "not idempotent for {:?}", sample);
            assert!(once
                .chars()
                .all(|c| c.is_ascii_lowercase() || c.is_ascii_digit() || c == '-'));
            assert!(!once.starts_with('-') && !once.ends_with('-'));
            assert!(!once.contains("--"));
        }
    }

    #[test]
    fn test_proxy_tag() {
        assert_eq!(proxy_tag("server-a.example"), "proxy-server-a-example");
        assert_eq!(proxy_tag("???"), "proxy-endpoint");
        assert!(is_proxy_tag("Proxy-Server"));
        assert!(!is_proxy_tag("direct"));
    }

    #[test]
    fn test_reverse_tag() {
        let tag = reverse_tag("User.Name", "Edge.EXAMPLE.com").unwrap();
        assert_eq!(tag, "user-nameedge-example-com.rev");
        assert_eq!(tag, reverse_tag("User.Name", "Edge.EXAMPLE.com").unwrap());
        assert!(is_reverse_tag(&tag));

        assert!(matches!(
            reverse_tag("  !!!  ", "host"),
            Err(Error::InvalidIdentifier(_))
        ));
        assert!(matches!(
            reverse_tag("user", " ... "),
            Err(Error::InvalidIdentifier(_))
        ));
    }

    #[test]
    fn test_forward_tag() {
        assert_eq!(forward_tag(53331), "forward-53331");
    }
}
