//! Domain extraction for browser activity. The probe can't always supply a
//! url, so there is a fallback heuristic that digs a domain out of the window
//! title.

use std::sync::Arc;

/// Browser suffixes commonly appended to window titles.
const BROWSER_SUFFIXES: &[&str] = &[
    "Google Chrome",
    "Chromium",
    "Mozilla Firefox",
    "Firefox",
    "Safari",
    "Microsoft Edge",
    "Opera",
    "Brave",
    "Vivaldi",
    "Arc",
];

/// Sites that rarely show their domain in the title. Checked last, after the
/// url-shaped scan fails.
const KNOWN_SITES: &[(&str, &str)] = &[
    ("youtube", "youtube.com"),
    ("miro", "miro.com"),
    ("figma", "figma.com"),
    ("notion", "notion.so"),
    ("github", "github.com"),
    ("gitlab", "gitlab.com"),
    ("stack overflow", "stackoverflow.com"),
    ("stackoverflow", "stackoverflow.com"),
    ("gmail", "mail.google.com"),
    ("google docs", "docs.google.com"),
    ("google sheets", "docs.google.com"),
    ("facebook", "facebook.com"),
    ("instagram", "instagram.com"),
    ("twitter", "twitter.com"),
    ("reddit", "reddit.com"),
    ("netflix", "netflix.com"),
    ("twitch", "twitch.tv"),
    ("discord", "discord.com"),
    ("slack", "slack.com"),
    ("linkedin", "linkedin.com"),
];

/// Extracts a normalized domain from a url. Returns an empty string when the
/// value doesn't look like a url.
pub fn domain_from_url(url: &str) -> String {
    let rest = match url.split_once("://") {
        Some((_, rest)) => rest,
        None => url,
    };
    let authority = rest
        .split(['/', '?', '#'])
        .next()
        .unwrap_or_default();
    let host = authority.rsplit('@').next().unwrap_or_default();
    let host = host.split(':').next().unwrap_or_default();

    normalize_host(host)
}

/// Best-effort domain extraction from a window title produced by a browser.
/// Strips the trailing " - <browser>" suffix, looks for a url-shaped token,
/// then falls back to [KNOWN_SITES]. Returns an empty string when nothing is
/// recognized.
pub fn domain_from_title(title: &str, browser_name: &str) -> String {
    let mut cleaned = title.trim();
    for suffix in BROWSER_SUFFIXES
        .iter()
        .copied()
        .chain(std::iter::once(browser_name))
    {
        if suffix.is_empty() {
            continue;
        }
        let marker = format!(" - {suffix}");
        if cleaned.to_lowercase().ends_with(&marker.to_lowercase()) {
            cleaned = cleaned[..cleaned.len() - marker.len()].trim_end();
            break;
        }
    }

    for token in cleaned.split_whitespace() {
        let token = token.trim_matches(|c: char| "()[]<>\"',;".contains(c));
        if looks_like_host(token) {
            let domain = domain_from_url(token);
            if !domain.is_empty() {
                return domain;
            }
        }
    }

    let lowered = cleaned.to_lowercase();
    for (needle, domain) in KNOWN_SITES {
        if contains_word(&lowered, needle) {
            return (*domain).to_string();
        }
    }

    String::new()
}

/// Stable identity of an activity for blocking/category purposes. The domain
/// wins over the application name when present.
pub fn activity_signature(owner_name: &str, domain: &str) -> Arc<str> {
    if domain.is_empty() {
        owner_name.to_lowercase().into()
    } else {
        domain.into()
    }
}

fn normalize_host(host: &str) -> String {
    let host = host.to_lowercase();
    let host = host.strip_prefix("www.").unwrap_or(&host);
    if !looks_like_host(host) {
        return String::new();
    }
    host.to_string()
}

fn looks_like_host(value: &str) -> bool {
    let value = match value.split_once("://") {
        Some((_, rest)) => rest,
        None => value,
    };
    let Some((name, tld)) = value.rsplit_once('.') else {
        return false;
    };
    let tld = tld.split(['/', '?', '#', ':']).next().unwrap_or_default();
    !name.is_empty()
        && tld.len() >= 2
        && tld.chars().all(|c| c.is_ascii_alphabetic())
        && value
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || ".-_:/?#@".contains(c))
}

fn contains_word(haystack: &str, needle: &str) -> bool {
    let mut search_from = 0;
    while let Some(position) = haystack[search_from..].find(needle) {
        let start = search_from + position;
        let end = start + needle.len();
        let boundary_before = start == 0
            || !haystack[..start]
                .chars()
                .next_back()
                .unwrap()
                .is_alphanumeric();
        let boundary_after =
            end == haystack.len() || !haystack[end..].chars().next().unwrap().is_alphanumeric();
        if boundary_before && boundary_after {
            return true;
        }
        search_from = end;
    }
    false
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_domain_from_url_strips_scheme_port_and_www() {
        assert_eq!(
            domain_from_url("https://www.YouTube.com:443/watch?v=abc"),
            "youtube.com"
        );
        assert_eq!(
            domain_from_url("http://user@news.ycombinator.com/item"),
            "news.ycombinator.com"
        );
        assert_eq!(domain_from_url("not a url"), "");
    }

    #[test]
    fn test_domain_from_title_known_site() {
        assert_eq!(
            domain_from_title(
                "Sign up | Miro | The Visual Workspace for Innovation - Google Chrome",
                "Google Chrome"
            ),
            "miro.com"
        );
    }

    #[test]
    fn test_domain_from_title_url_shaped_token() {
        assert_eq!(
            domain_from_title("crates.io: Rust Package Registry - Firefox", "Firefox"),
            "crates.io"
        );
    }

    #[test]
    fn test_domain_from_title_ignores_partial_words() {
        // 'mirror' must not trip the 'miro' table entry.
        assert_eq!(domain_from_title("Mirror settings - Safari", "Safari"), "");
    }

    #[test]
    fn test_domain_from_title_unrecognized() {
        assert_eq!(domain_from_title("Document 1 - Word", "Google Chrome"), "");
    }

    #[test]
    fn test_activity_signature_prefers_domain() {
        assert_eq!(
            activity_signature("Google Chrome", "youtube.com").as_ref(),
            "youtube.com"
        );
        assert_eq!(activity_signature("Terminal", "").as_ref(), "terminal");
    }
}
