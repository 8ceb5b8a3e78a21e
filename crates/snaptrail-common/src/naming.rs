//! Naming rules for sessions and capture artifacts: domain folders, derived
//! session ids, filename timestamps and element-text snippets.

use chrono::{DateTime, Utc};
use url::Url;

/// URL prefixes the recorder must never capture or message into.
pub const INTERNAL_SCHEMES: &[&str] = &["chrome://", "chrome-extension://", "about:", "devtools://"];

/// Fallback folder when a URL has no resolvable host.
pub const UNKNOWN_DOMAIN: &str = "unknown";

pub fn is_internal_url(url: &str) -> bool {
    INTERNAL_SCHEMES
        .iter()
        .any(|scheme| url.starts_with(scheme))
}

/// Hostname of the URL, used as the per-domain artifact folder.
pub fn domain_for(url: &str) -> String {
    Url::parse(url)
        .ok()
        .and_then(|parsed| parsed.host_str().map(str::to_string))
        .unwrap_or_else(|| UNKNOWN_DOMAIN.to_string())
}

/// Session ids are derived from the start timestamp so exports sort
/// chronologically on disk.
pub fn session_id_for(start: DateTime<Utc>) -> String {
    format!("session_{}", start.format("%Y-%m-%dT%H-%M-%S"))
}

/// Filename-safe rendering of a timestamp, millisecond precision. Matches
/// ISO-8601 with the characters download surfaces reject swapped for `-`.
pub fn timestamp_token(ts: DateTime<Utc>) -> String {
    ts.format("%Y-%m-%dT%H-%M-%S-%3fZ").to_string()
}

/// Element-text snippet appended to capture filenames: first 20 chars with
/// everything outside `[a-zA-Z0-9]` flattened to `_`. `None` when the text
/// is empty.
pub fn sanitize_snippet(text: &str) -> Option<String> {
    if text.is_empty() {
        return None;
    }
    let snippet: String = text
        .chars()
        .take(20)
        .map(|c| if c.is_ascii_alphanumeric() { c } else { '_' })
        .collect();
    Some(snippet)
}

/// Session capture artifact name: zero-padded sequence, timestamp, optional
/// element-text snippet.
pub fn capture_filename(sequence: u32, ts: DateTime<Utc>, element_text: Option<&str>) -> String {
    let mut name = format!("{:03}_screenshot_{}", sequence, timestamp_token(ts));
    if let Some(snippet) = element_text.and_then(sanitize_snippet) {
        name.push('_');
        name.push_str(&snippet);
    }
    name.push_str(".png");
    name
}

/// Artifact name for a capture taken outside any session.
pub fn standalone_filename(ts: DateTime<Utc>, reason: Option<&str>) -> String {
    let mut name = format!("snaptrail_{}", timestamp_token(ts));
    if let Some(reason) = reason.filter(|r| !r.is_empty()) {
        name.push('_');
        name.push_str(
            &reason
                .chars()
                .map(|c| if c.is_ascii_alphanumeric() { c } else { '_' })
                .collect::<String>(),
        );
    }
    name.push_str(".png");
    name
}

pub fn session_filename(session_id: &str) -> String {
    format!("{}_session.json", session_id)
}

/// Relative download path for an artifact: `<root>/<domain>/<file>`, with
/// test captures routed under `<root>/test/<domain>/<file>`. Captures taken
/// outside a session carry no domain folder.
pub fn artifact_path(root: &str, domain: Option<&str>, test_capture: bool, filename: &str) -> String {
    let mut path = String::from(root);
    if test_capture {
        path.push_str("/test");
    }
    if let Some(domain) = domain {
        path.push('/');
        path.push_str(domain);
    }
    path.push('/');
    path.push_str(filename);
    path
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn ts() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 3, 9, 14, 30, 5).unwrap()
    }

    #[test]
    fn internal_urls_are_recognized() {
        assert!(is_internal_url("chrome://extensions"));
        assert!(is_internal_url("chrome-extension://abc/popup.html"));
        assert!(is_internal_url("about:blank"));
        assert!(!is_internal_url("https://example.com/chrome://nope"));
    }

    #[test]
    fn domain_folder_comes_from_host() {
        assert_eq!(domain_for("https://sub.example.com/path?q=1"), "sub.example.com");
        assert_eq!(domain_for("not a url"), UNKNOWN_DOMAIN);
        assert_eq!(domain_for("file:///tmp/x.html"), UNKNOWN_DOMAIN);
    }

    #[test]
    fn session_id_is_sortable() {
        assert_eq!(session_id_for(ts()), "session_2024-03-09T14-30-05");
    }

    #[test]
    fn timestamp_token_has_no_reserved_chars() {
        let token = timestamp_token(ts());
        assert_eq!(token, "2024-03-09T14-30-05-000Z");
        assert!(!token.contains(':'));
        assert!(!token.contains('.'));
    }

    #[test]
    fn snippets_are_truncated_then_flattened() {
        assert_eq!(
            sanitize_snippet("Add to cart!").as_deref(),
            Some("Add_to_cart_")
        );
        // Truncation happens before flattening, so the cap is 20 chars.
        assert_eq!(
            sanitize_snippet("a very long button label indeed")
                .unwrap()
                .len(),
            20
        );
        assert_eq!(sanitize_snippet(""), None);
    }

    #[test]
    fn capture_filenames_embed_sequence_and_snippet() {
        assert_eq!(
            capture_filename(7, ts(), Some("Sign in")),
            "007_screenshot_2024-03-09T14-30-05-000Z_Sign_in.png"
        );
        assert_eq!(
            capture_filename(12, ts(), None),
            "012_screenshot_2024-03-09T14-30-05-000Z.png"
        );
    }

    #[test]
    fn standalone_filenames_carry_the_reason() {
        assert_eq!(
            standalone_filename(ts(), Some("Manual Capture")),
            "snaptrail_2024-03-09T14-30-05-000Z_Manual_Capture.png"
        );
        assert_eq!(
            standalone_filename(ts(), None),
            "snaptrail_2024-03-09T14-30-05-000Z.png"
        );
    }

    #[test]
    fn artifact_paths_route_test_captures() {
        assert_eq!(
            artifact_path("SnapTrail", Some("example.com"), false, "a.png"),
            "SnapTrail/example.com/a.png"
        );
        assert_eq!(
            artifact_path("SnapTrail", Some("example.com"), true, "a.png"),
            "SnapTrail/test/example.com/a.png"
        );
        assert_eq!(
            artifact_path("SnapTrail", None, false, "a.png"),
            "SnapTrail/a.png"
        );
    }
}
