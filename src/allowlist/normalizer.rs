use url::Url;

use crate::error::InvalidDomain;

/// Canonicalise user-entered website input into a comparable host.
///
/// Accepts bare domains (`github.com`) as well as pasted URLs
/// (`https://www.youtube.com/watch?v=xyz`). Parsing is tried as-is, then with an
/// `https://` scheme prepended, and finally falls back to everything before the
/// first `/`. A leading `www.` is always removed.
pub fn normalize_domain(raw: &str) -> Result<String, InvalidDomain> {
    let trimmed = raw.trim();
    if trimmed.is_empty() {
        return Err(InvalidDomain(raw.to_string()));
    }

    let host = parse_host(trimmed)
        .or_else(|| parse_host(&format!("https://{trimmed}")))
        .unwrap_or_else(|| {
            trimmed
                .split('/')
                .next()
                .unwrap_or_default()
                .to_lowercase()
        });

    let host = strip_www(&host);
    if host.is_empty() {
        return Err(InvalidDomain(raw.to_string()));
    }
    Ok(host.to_string())
}

/// Host of a browser tab URL, normalised the same way as user rules.
///
/// Only web schemes yield a host. Internal pages (`chrome://newtab`,
/// `about:blank`, `favorites://`) return `None`.
pub fn host_from_url(raw: &str) -> Option<String> {
    let url = Url::parse(raw.trim()).ok()?;
    if !matches!(url.scheme(), "http" | "https") {
        return None;
    }
    let host = url.host_str()?.to_ascii_lowercase();
    let host = strip_www(&host);
    (!host.is_empty()).then(|| host.to_string())
}

fn parse_host(candidate: &str) -> Option<String> {
    let url = Url::parse(candidate).ok()?;
    url.host_str()
        .filter(|host| !host.is_empty())
        .map(|host| host.to_ascii_lowercase())
}

fn strip_www(host: &str) -> &str {
    match host.get(..4) {
        Some(prefix) if prefix.eq_ignore_ascii_case("www.") => &host[4..],
        _ => host,
    }
}
