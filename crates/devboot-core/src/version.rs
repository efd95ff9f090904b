//! Version-aware ordering for interpreter and module version strings.
//!
//! Numeric components compare as numbers, so `3.13.10` sorts above `3.13.2`.

use std::cmp::Ordering;

/// Numeric components of the last path segment, e.g. `python/python/3.13.10` → `[3, 13, 10]`.
pub fn version_key(name: &str) -> Vec<u64> {
    let segment = name.rsplit('/').next().unwrap_or(name);
    segment
        .split(|c: char| !c.is_ascii_digit())
        .filter(|part| !part.is_empty())
        .filter_map(|part| part.parse::<u64>().ok())
        .collect()
}

/// Compare two names by their version keys, then lexically as a tie-breaker.
pub fn compare_versions(a: &str, b: &str) -> Ordering {
    version_key(a)
        .cmp(&version_key(b))
        .then_with(|| a.cmp(b))
}

/// Highest candidate by version-aware ordering.
pub fn select_highest<S: AsRef<str>>(candidates: &[S]) -> Option<&S> {
    candidates
        .iter()
        .max_by(|a, b| compare_versions(a.as_ref(), b.as_ref()))
}

/// True when some dotted-number token in `reported` starts with the
/// components of `required` (`"Python 3.13.1"` matches `"3.13"`, `"3.130.0"` does not).
pub fn version_matches(reported: &str, required: &str) -> bool {
    let wanted: Vec<&str> = required.split('.').collect();
    reported
        .split(|c: char| !(c.is_ascii_digit() || c == '.'))
        .filter(|token| !token.is_empty())
        .any(|token| {
            let parts: Vec<&str> = token.split('.').collect();
            parts.len() >= wanted.len() && parts.iter().zip(&wanted).all(|(p, w)| p == w)
        })
}
