//! Tracker URL to registrable-domain derivation.

use url::Url;

/// Second-level labels that combine with a two-letter country TLD to form a
/// public suffix (`example.co.uk` -> `example`, not `co`).
const COMPOUND_SECOND_LEVELS: &[&str] = &["ac", "co", "com", "edu", "gov", "net", "org"];

/// Derive the lowercased registrable domain from a tracker announce URL.
///
/// Approximates eTLD+1: keeps the last two host labels, or the last three
/// when the second-to-last label is a well-known compound second level under
/// a two-letter TLD. IP hosts are returned verbatim. Unparseable or empty
/// inputs collapse to the empty string, which buckets them separately in the
/// tracker index.
#[must_use]
pub fn tracker_domain(announce_url: &str) -> String {
    let trimmed = announce_url.trim();
    if trimmed.is_empty() {
        return String::new();
    }
    let Ok(parsed) = Url::parse(trimmed) else {
        return String::new();
    };
    let Some(host) = parsed.host_str() else {
        return String::new();
    };
    let host = host.trim_end_matches('.').to_ascii_lowercase();
    if host.parse::<std::net::IpAddr>().is_ok() {
        return host;
    }

    let labels: Vec<&str> = host.split('.').collect();
    match labels.len() {
        0 | 1 => host,
        2 => labels.join("."),
        _ => {
            let tld = labels[labels.len() - 1];
            let second = labels[labels.len() - 2];
            let keep = if tld.len() == 2 && COMPOUND_SECOND_LEVELS.contains(&second) {
                3
            } else {
                2
            };
            labels[labels.len() - keep..].join(".")
        }
    }
}
