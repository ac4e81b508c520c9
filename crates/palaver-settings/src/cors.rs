//! CORS origin list expansion.

/// Static Web Apps host suffix that gets both scheme variants.
const STATIC_APPS_SUFFIX: &str = ".azurestaticapps.net";

/// Parse a comma-separated origin list.
///
/// Each `http://` origin also admits its `https://` twin, and every Static
/// Web Apps origin is admitted over both schemes. Blank entries are dropped
/// and duplicates removed; first-seen order is kept.
pub fn parse_cors_origins(raw: &str) -> Vec<String> {
    let mut out: Vec<String> = Vec::new();
    let mut push = |origin: String| {
        if !out.contains(&origin) {
            out.push(origin);
        }
    };

    for origin in raw.split(',').map(str::trim).filter(|o| !o.is_empty()) {
        push(origin.to_string());
        if let Some(rest) = origin.strip_prefix("http://") {
            push(format!("https://{rest}"));
        }
        if let Some((_, host)) = origin.split_once("://") {
            if let Some(idx) = host.find(STATIC_APPS_SUFFIX) {
                let base = &host[..idx];
                push(format!("https://{base}{STATIC_APPS_SUFFIX}"));
                push(format!("http://{base}{STATIC_APPS_SUFFIX}"));
            }
        }
    }
    out
}
