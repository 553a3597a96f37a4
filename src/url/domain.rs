use url::Url;

/// Extracts the lowercase host of a URL
///
/// # Examples
///
/// ```
/// use url::Url;
/// use onion_ripple::url::extract_domain;
///
/// let url = Url::parse("http://ABC.onion/path").unwrap();
/// assert_eq!(extract_domain(&url), Some("abc.onion".to_string()));
/// ```
pub fn extract_domain(url: &Url) -> Option<String> {
    url.host_str()
        .filter(|h| !h.is_empty())
        .map(|h| h.to_lowercase())
}

/// Returns true if the URL's host is an onion service
pub fn is_onion_url(url: &Url) -> bool {
    url.host_str()
        .map(|h| h.to_ascii_lowercase().ends_with(".onion"))
        .unwrap_or(false)
}
