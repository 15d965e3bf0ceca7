//! Cache key derivation.
//!
//! Keys are derived in exactly one place so lookups and stores always agree.
//! API keys drop the per-session `ticket` and the cache-busting `vsn` query
//! parameters; asset keys are the bare pathname.

use crate::http::Request;

/// Query parameters that never take part in an API cache key.
pub const VOLATILE_PARAMS: &[&str] = &["ticket", "vsn"];

/// Key for the `api` partition: path plus query, minus [`VOLATILE_PARAMS`].
///
/// # Examples
///
/// ```
/// use swproxy::cache::key::api_key;
/// use swproxy::http::Request;
///
/// let a = Request::get("/get_individual?ticket=t1&uri=d:a&vsn=3");
/// let b = Request::get("/get_individual?uri=d:a&ticket=t2");
/// assert_eq!(api_key(&a), "/get_individual?uri=d:a");
/// assert_eq!(api_key(&a), api_key(&b));
/// ```
pub fn api_key(request: &Request) -> String {
    match request.query_string().and_then(strip_volatile) {
        Some(query) => format!("{}?{}", request.path(), query),
        None => request.path().to_owned(),
    }
}

/// Key for the `files` partition: the pathname alone.
pub fn asset_key(request: &Request) -> String {
    request.path().to_owned()
}

// Returns the query without volatile parameters, or `None` if nothing is left.
fn strip_volatile(query: &str) -> Option<String> {
    let kept: Vec<&str> = query
        .split('&')
        .filter(|pair| !pair.is_empty())
        .filter(|pair| {
            let name = pair.split_once('=').map_or(*pair, |(k, _)| k);
            !VOLATILE_PARAMS.contains(&name)
        })
        .collect();

    if kept.is_empty() {
        None
    } else {
        Some(kept.join("&"))
    }
}
