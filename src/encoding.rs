//! Content-encoding negotiation: `Accept-Encoding` / `Content-Encoding`
//! parsing, alias canonicalisation, and the subset check used at GET time.

use std::collections::HashSet;

pub const IDENTITY: &str = "identity";
pub const GZIP: &str = "gzip";

/// Canonicalises an encoding token: `x-gzip` -> `gzip`, lowercased.
fn canonicalise(token: &str) -> String {
    let lower = token.trim().to_ascii_lowercase();
    if lower == "x-gzip" {
        GZIP.to_string()
    } else {
        lower
    }
}

/// Parses an `Accept-Encoding` header into the set of acceptable encodings.
///
/// Strips `;q=...` parameters, canonicalises aliases, and always includes
/// `identity`. A missing or empty header yields `{identity}`.
///
/// A literal `*` anywhere in the header means "anything is acceptable";
/// callers should check for that with [`accepts_anything`].
pub fn parse_accept_encoding(header: Option<&str>) -> HashSet<String> {
    let mut set = HashSet::new();
    set.insert(IDENTITY.to_string());

    let Some(header) = header else { return set };

    for part in header.split(',') {
        let token = part.split(';').next().unwrap_or("").trim();
        if token.is_empty() {
            continue;
        }
        set.insert(canonicalise(token));
    }

    set
}

/// True iff the accepted set allows literally anything (`Accept-Encoding: *`).
pub fn accepts_anything(accepted: &HashSet<String>) -> bool {
    accepted.contains("*")
}

/// Parses a `Content-Encoding` header into an ordered list, preserving the
/// client's order (outermost transform last, per HTTP semantics), with
/// aliases canonicalised and any trailing `identity` stripped. A missing or
/// empty header yields an empty list.
pub fn parse_content_encoding(header: Option<&str>) -> Vec<String> {
    let Some(header) = header else { return Vec::new() };

    let mut list: Vec<String> = header
        .split(',')
        .map(|s| s.trim())
        .filter(|s| !s.is_empty())
        .map(canonicalise)
        .collect();

    if list.last().map(String::as_str) == Some(IDENTITY) {
        list.pop();
    }

    list
}

/// Serialises an ordered encoding list back into a `Content-Encoding` header
/// value, e.g. `["gzip"]` -> `"gzip"`.
pub fn format_content_encoding(encodings: &[String]) -> String {
    encodings.join(", ")
}

/// Returns true iff a response may serve the stored bytes as-is given the
/// client's accepted set and the list of encodings the stored bytes are
/// wrapped in: either the client accepts anything, or every stored encoding
/// is in the accepted set.
pub fn can_serve_as_is(accepted: &HashSet<String>, stored: &[String]) -> bool {
    if accepts_anything(accepted) {
        return true;
    }
    stored.iter().all(|enc| accepted.contains(enc))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn set(items: &[&str]) -> HashSet<String> {
        items.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn missing_accept_encoding_yields_identity_only() {
        assert_eq!(parse_accept_encoding(None), set(&["identity"]));
        assert_eq!(parse_accept_encoding(Some("")), set(&["identity"]));
    }

    #[test]
    fn strips_q_params_and_canonicalises_aliases() {
        let parsed = parse_accept_encoding(Some("gzip;q=0.8, x-gzip, deflate;q=0"));
        assert_eq!(parsed, set(&["identity", "gzip", "deflate"]));
    }

    #[test]
    fn content_encoding_strips_trailing_identity_and_keeps_order() {
        assert_eq!(parse_content_encoding(Some("gzip, identity")), vec!["gzip"]);
        assert_eq!(parse_content_encoding(Some("x-gzip")), vec!["gzip"]);
        assert_eq!(parse_content_encoding(None), Vec::<String>::new());
        assert_eq!(parse_content_encoding(Some("")), Vec::<String>::new());
    }

    #[test]
    fn can_serve_as_is_checks_subset_or_wildcard() {
        assert!(can_serve_as_is(&set(&["*"]), &["gzip".to_string()]));
        assert!(can_serve_as_is(
            &set(&["identity", "gzip"]),
            &["gzip".to_string()]
        ));
        assert!(!can_serve_as_is(&set(&["identity"]), &["gzip".to_string()]));
    }
}
