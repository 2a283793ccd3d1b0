//! Session-cookie extraction for the connect phase.
//!
//! The browser session rides in a signed cookie on the HTTP upgrade
//! request. The wrapped value carries a two-character signature prefix and
//! a `.`-separated signature suffix; the part in between is the session ID
//! handed to the session store.

/// Validates the signed cookie value before it is unwrapped.
///
/// Verification needs the session store's secret, which the surrounding
/// application owns; deployments plug a real verifier in here. A failed
/// validation is answered as an authentication rejection.
// TODO: ship an HMAC validator once the session store exposes its signing key.
pub trait CookieValidator: Send + Sync {
    fn validate(&self, raw_value: &str) -> bool;
}

/// Default validator: accepts everything.
pub struct AcceptAllCookies;

impl CookieValidator for AcceptAllCookies {
    fn validate(&self, _raw_value: &str) -> bool {
        true
    }
}

/// Pull the named cookie out of a `Cookie` request header.
pub fn session_cookie(header: Option<&str>, name: &str) -> Option<String> {
    let header = header?;
    for pair in header.split(';') {
        let Some((key, value)) = pair.trim().split_once('=') else {
            continue;
        };
        if key == name {
            return Some(value.to_string());
        }
    }
    None
}

/// Unwrap a signed cookie value: trim the two-character signature prefix,
/// then truncate at the first `.`.
pub fn unwrap_session_id(raw_value: &str) -> String {
    let unsigned = raw_value.get(2..).unwrap_or("");
    match unsigned.find('.') {
        Some(dot) => unsigned[..dot].to_string(),
        None => unsigned.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cookie_extracted_from_header() {
        let header = "theme=dark; NOTEWIRE_SESSION=s:abc123.sig; lang=en";
        assert_eq!(
            session_cookie(Some(header), "NOTEWIRE_SESSION").as_deref(),
            Some("s:abc123.sig")
        );
    }

    #[test]
    fn test_missing_cookie_is_none() {
        assert_eq!(session_cookie(Some("theme=dark"), "NOTEWIRE_SESSION"), None);
        assert_eq!(session_cookie(None, "NOTEWIRE_SESSION"), None);
    }

    #[test]
    fn test_unwrap_strips_prefix_and_signature() {
        assert_eq!(unwrap_session_id("s:abc123.h4sh"), "abc123");
        assert_eq!(unwrap_session_id("s:abc123"), "abc123");
    }

    #[test]
    fn test_unwrap_of_short_value_is_empty() {
        assert_eq!(unwrap_session_id("s"), "");
        assert_eq!(unwrap_session_id(""), "");
    }
}
