use crate::UrlError;
use url::Url;

/// Tracking query parameters dropped during normalization
const TRACKING_PARAMS: &[&str] = &[
    "utm_source",
    "utm_medium",
    "utm_campaign",
    "utm_term",
    "utm_content",
    "fbclid",
    "gclid",
    "mc_eid",
];

/// Normalizes a URL into the canonical form used as the page key
///
/// # Normalization Steps
///
/// 1. Parse the URL; reject if malformed
/// 2. Accept only `http` and `https` (onion services are mostly plain http,
///    so the scheme is kept as-is)
/// 3. Lowercase the host
/// 4. Normalize path:
///    - Remove dot segments (. and ..)
///    - Collapse repeated slashes
///    - Remove trailing slash (except for root /)
/// 5. Remove fragment
/// 6. Remove tracking query parameters and sort the rest by key, leaving
///    each parameter byte-for-byte as written; drop an empty `?`
///
/// # Examples
///
/// ```
/// use onion_ripple::url::normalize_url;
///
/// let url = normalize_url("http://ABC.onion/page/#top").unwrap();
/// assert_eq!(url.as_str(), "http://abc.onion/page");
/// ```
pub fn normalize_url(url_str: &str) -> Result<Url, UrlError> {
    let url = Url::parse(url_str).map_err(|e| UrlError::Parse(e.to_string()))?;
    normalize_parsed(url)
}

/// Same as [`normalize_url`] for an already parsed URL
pub fn normalize_parsed(mut url: Url) -> Result<Url, UrlError> {
    if url.scheme() != "http" && url.scheme() != "https" {
        return Err(UrlError::InvalidScheme(format!(
            "Only HTTP and HTTPS schemes are supported, got: {}",
            url.scheme()
        )));
    }

    match url.host_str() {
        Some(host) if !host.is_empty() => {
            let lowered = host.to_lowercase();
            if lowered != host {
                url.set_host(Some(&lowered))
                    .map_err(|e| UrlError::Malformed(format!("Failed to set host: {}", e)))?;
            }
        }
        _ => return Err(UrlError::MissingDomain),
    }

    let normalized_path = normalize_path(url.path());
    url.set_path(&normalized_path);

    url.set_fragment(None);

    if let Some(query) = url.query() {
        let params = filter_and_sort_query_params(query);
        if params.is_empty() {
            url.set_query(None);
        } else {
            url.set_query(Some(&params.join("&")));
        }
    }

    Ok(url)
}

/// Normalizes a URL path by removing dot segments and trailing slashes
fn normalize_path(path: &str) -> String {
    let mut segments: Vec<&str> = Vec::new();

    for segment in path.split('/') {
        match segment {
            "" | "." => continue,
            ".." => {
                segments.pop();
            }
            _ => segments.push(segment),
        }
    }

    if segments.is_empty() {
        "/".to_string()
    } else {
        format!("/{}", segments.join("/"))
    }
}

/// Keeps the raw `&`-separated segments so their encoding is untouched
fn filter_and_sort_query_params(query: &str) -> Vec<String> {
    let mut params: Vec<String> = query
        .split('&')
        .filter(|segment| !segment.is_empty())
        .filter(|segment| !is_tracking_param(param_key(segment)))
        .map(str::to_string)
        .collect();

    // stable: repeated keys keep their relative order
    params.sort_by(|a, b| param_key(a).cmp(param_key(b)));
    params
}

fn param_key(segment: &str) -> &str {
    segment.split_once('=').map_or(segment, |(key, _)| key)
}

fn is_tracking_param(key: &str) -> bool {
    TRACKING_PARAMS.contains(&key) || key.starts_with("utm_")
}
