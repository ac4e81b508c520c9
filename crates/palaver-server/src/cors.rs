//! CORS layer built from the configured origin list.

use axum::http::HeaderValue;
use axum::http::request::Parts;
use regex::Regex;
use tower_http::cors::{AllowHeaders, AllowMethods, AllowOrigin, CorsLayer};
use tracing::warn;

/// Matches request origins against exact entries and `*` wildcard patterns.
#[derive(Clone, Debug)]
pub struct OriginMatcher {
    exact: Vec<String>,
    patterns: Vec<Regex>,
}

impl OriginMatcher {
    /// Compile `origins`. `*` matches any run of characters except `/`.
    pub fn new(origins: &[String]) -> Self {
        let mut exact = Vec::new();
        let mut patterns = Vec::new();
        for origin in origins {
            let origin = origin.trim().trim_end_matches('/');
            if origin.is_empty() {
                continue;
            }
            if origin.contains('*') {
                let escaped = regex::escape(origin).replace(r"\*", "[^/]*");
                match Regex::new(&format!("^{escaped}$")) {
                    Ok(re) => patterns.push(re),
                    Err(e) => warn!(origin, error = %e, "ignoring invalid CORS pattern"),
                }
            } else {
                exact.push(origin.to_string());
            }
        }
        Self { exact, patterns }
    }

    /// Whether `origin` is allowed.
    pub fn matches(&self, origin: &str) -> bool {
        self.exact.iter().any(|o| o == origin) || self.patterns.iter().any(|re| re.is_match(origin))
    }

    /// Whether nothing is allowed.
    pub fn is_empty(&self) -> bool {
        self.exact.is_empty() && self.patterns.is_empty()
    }
}

/// Credentialed CORS for the configured origins; methods and headers mirror the request.
pub fn cors_layer(origins: &[String]) -> CorsLayer {
    let matcher = OriginMatcher::new(origins);
    CorsLayer::new()
        .allow_origin(AllowOrigin::predicate(
            move |origin: &HeaderValue, _parts: &Parts| {
                origin.to_str().is_ok_and(|o| matcher.matches(o))
            },
        ))
        .allow_methods(AllowMethods::mirror_request())
        .allow_headers(AllowHeaders::mirror_request())
        .allow_credentials(true)
}
