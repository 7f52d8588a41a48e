use sha2::{Digest, Sha256};
use url::Url;

use crate::{FailureKind, FetchError};

/// Parses a fetch target, defaulting to `https` when no scheme is given.
pub fn parse_target(target: &str) -> Result<Url, FetchError> {
    let trimmed = target.trim();
    if trimmed.is_empty() {
        return Err(FetchError::new(FailureKind::InvalidTarget, "empty target"));
    }
    let parsed = match Url::parse(trimmed) {
        Ok(url) => url,
        Err(url::ParseError::RelativeUrlWithoutBase) => Url::parse(&format!("https://{trimmed}"))
            .map_err(|err| FetchError::new(FailureKind::InvalidTarget, err.to_string()))?,
        Err(err) => return Err(FetchError::new(FailureKind::InvalidTarget, err.to_string())),
    };
    match parsed.scheme() {
        "http" | "https" if parsed.host_str().is_some() => Ok(parsed),
        scheme => Err(FetchError::new(
            FailureKind::InvalidTarget,
            format!("unsupported target {scheme}:"),
        )),
    }
}

/// Canonical cache key for a target.
///
/// Scheme and host are lowercased, a missing scheme becomes `https`, default
/// ports, fragments and a trailing `/` on non-root paths are dropped. Query
/// order is preserved. Targets that do not parse fall back to their trimmed,
/// lowercased text so they still map to a single entry.
pub fn normalize_key(target: &str) -> String {
    let Ok(mut url) = parse_target(target) else {
        return target.trim().to_ascii_lowercase();
    };
    url.set_fragment(None);
    if url.query() == Some("") {
        url.set_query(None);
    }
    let path = url.path().to_string();
    if path.len() > 1 && path.ends_with('/') {
        url.set_path(path.trim_end_matches('/'));
    }
    let mut key = url.to_string();
    if url.path() == "/" && url.query().is_none() && key.ends_with('/') {
        key.pop();
    }
    key
}

/// Hex SHA-256 of a normalized key; used to name disk entries.
pub fn key_digest(key: &str) -> String {
    let digest = Sha256::digest(key.as_bytes());
    let mut hex = String::with_capacity(64);
    for byte in digest.iter() {
        use std::fmt::Write;
        let _ = write!(&mut hex, "{byte:02x}");
    }
    hex
}
