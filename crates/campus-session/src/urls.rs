//! Site URL helpers.

use url::Url;

use crate::{Result, SessionError};

/// Canonical form of a site URL: http(s), no query, no trailing slash.
///
/// A URL without a scheme is assumed to be https.
pub fn normalize_site_url(raw: &str) -> Result<String> {
    let trimmed = raw.trim();
    if trimmed.is_empty() {
        return Err(SessionError::InvalidSiteUrl(raw.to_string()));
    }
    let with_scheme = if trimmed.contains("://") {
        trimmed.to_string()
    } else {
        format!("https://{trimmed}")
    };

    let mut url =
        Url::parse(&with_scheme).map_err(|e| SessionError::InvalidSiteUrl(format!("{raw}: {e}")))?;
    if !matches!(url.scheme(), "http" | "https") || url.host_str().is_none() {
        return Err(SessionError::InvalidSiteUrl(raw.to_string()));
    }
    url.set_query(None);
    url.set_fragment(None);

    Ok(url.as_str().trim_end_matches('/').to_string())
}

/// Whether `url` is an absolute http(s) URL.
pub fn is_http_url(url: &str) -> bool {
    Url::parse(url)
        .map(|u| matches!(u.scheme(), "http" | "https"))
        .unwrap_or(false)
}

/// Whether `url` is absolute with any scheme.
pub fn is_absolute_url(url: &str) -> bool {
    Url::parse(url).is_ok()
}

/// `url` without its scheme.
pub fn remove_protocol(url: &str) -> &str {
    match url.find("://") {
        Some(pos) => &url[pos + 3..],
        None => url,
    }
}

/// `url` without its scheme and a leading `www.`.
pub fn remove_protocol_and_www(url: &str) -> &str {
    let rest = remove_protocol(url);
    rest.strip_prefix("www.").unwrap_or(rest)
}

/// Whether `url` points inside the site at `site_url`. Scheme and a
/// leading `www.` are ignored.
pub fn site_contains_url(site_url: &str, url: &str) -> bool {
    let site = remove_protocol_and_www(site_url).to_lowercase();
    let url = remove_protocol_and_www(url).to_lowercase();
    !site.is_empty() && url.starts_with(&site)
}
