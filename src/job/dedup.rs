//! Dedup key derivation: normalized source URL + canonical options.
//!
//! Two submissions with equal dedup keys while the first is still active
//! collapse onto one job. Normalization is deliberately conservative: it
//! strips noise that provably does not change the media (fragments, tracker
//! query params, query ordering) and nothing else. `youtu.be` vs
//! `youtube.com` are distinct keys; collapsing host aliases is the
//! extractor's business, not ours.

use sha2::{Digest, Sha256};
use url::Url;

use super::DownloadOptions;

/// Hex-encoded SHA-256 over the normalized URL and canonical options
pub type DedupKey = String;

/// Query parameters that never affect which media is fetched
const TRACKING_PARAMS: &[&str] = &["si", "feature", "ref", "fbclid", "gclid"];

pub fn dedup_key(url: &Url, options: &DownloadOptions) -> DedupKey {
    let mut hasher = Sha256::new();
    hasher.update(normalize_url(url).as_bytes());
    hasher.update(b"\n");
    hasher.update(options.format.as_deref().unwrap_or("").as_bytes());
    hasher.update(b"\n");
    let mode: &[u8] = if options.audio_only { b"audio" } else { b"full" };
    hasher.update(mode);
    for arg in &options.extra_args {
        hasher.update(b"\x1f");
        hasher.update(arg.as_bytes());
    }
    hex::encode(hasher.finalize())
}

/// Canonical string form of a source URL.
///
/// The `url` crate already lowercases scheme/host and drops default ports at
/// parse time; on top of that we drop the fragment and tracking parameters
/// and sort what remains of the query.
pub fn normalize_url(url: &Url) -> String {
    let mut normalized = url.clone();
    normalized.set_fragment(None);

    let mut pairs: Vec<(String, String)> = normalized
        .query_pairs()
        .filter(|(key, _)| !is_tracking_param(key))
        .map(|(k, v)| (k.into_owned(), v.into_owned()))
        .collect();
    pairs.sort();

    if pairs.is_empty() {
        normalized.set_query(None);
    } else {
        let query = pairs
            .iter()
            .map(|(k, v)| {
                if v.is_empty() {
                    k.clone()
                } else {
                    format!("{}={}", k, v)
                }
            })
            .collect::<Vec<_>>()
            .join("&");
        normalized.set_query(Some(&query));
    }

    normalized.to_string()
}

fn is_tracking_param(key: &str) -> bool {
    key.starts_with("utm_") || TRACKING_PARAMS.contains(&key)
}
