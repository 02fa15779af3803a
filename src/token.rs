//! Random alphanumeric token generation and validation.
//!
//! Used both for the short content keys (`key_length`, default 7) and for
//! the 32-character `auth_key` minted for modifiable content.

use once_cell::sync::Lazy;
use rand::distributions::{Alphanumeric, DistString};
use regex::Regex;

/// Length of a modification auth key, fixed by spec.md's invariants.
pub const AUTH_KEY_LENGTH: usize = 32;

static KEY_PATTERN: Lazy<Regex> = Lazy::new(|| Regex::new(r"^[a-zA-Z0-9]+$").unwrap());

/// Generates a random alphanumeric string of `length` characters using a
/// cryptographically strong RNG (`rand::thread_rng`, seeded from the OS).
pub fn generate(length: usize) -> String {
    Alphanumeric.sample_string(&mut rand::thread_rng(), length)
}

/// Generates a fresh 32-character modification auth key.
pub fn generate_auth_key() -> String {
    generate(AUTH_KEY_LENGTH)
}

/// Validates that `key` is non-empty and matches `^[a-zA-Z0-9]+$`.
pub fn is_valid(key: &str) -> bool {
    !key.is_empty() && KEY_PATTERN.is_match(key)
}

/// Generates a key, retrying up to `max_attempts` times if `taken` reports a
/// collision. The reference implementation does not retry; this is a bounded
/// opt-in extension point (spec.md §9: "implementations MAY add bounded
/// retry").
pub fn generate_unique(length: usize, max_attempts: usize, taken: impl Fn(&str) -> bool) -> String {
    let mut candidate = generate(length);
    let mut attempts = 0;
    while taken(&candidate) && attempts < max_attempts {
        candidate = generate(length);
        attempts += 1;
    }
    candidate
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;

    #[test]
    fn generates_keys_of_requested_length_and_shape() {
        for _ in 0..100 {
            let key = generate(7);
            assert_eq!(key.len(), 7);
            assert!(is_valid(&key));
        }
    }

    #[test]
    fn generated_keys_are_unlikely_to_collide() {
        let mut seen = HashSet::new();
        for _ in 0..1000 {
            seen.insert(generate(12));
        }
        assert_eq!(seen.len(), 1000);
    }

    #[test]
    fn rejects_non_alphanumeric() {
        assert!(!is_valid(""));
        assert!(!is_valid("has space"));
        assert!(!is_valid("has/slash"));
        assert!(!is_valid("has-dash"));
        assert!(is_valid("abcXYZ123"));
    }

    #[test]
    fn auth_key_is_32_chars() {
        assert_eq!(generate_auth_key().len(), AUTH_KEY_LENGTH);
    }

    #[test]
    fn generate_unique_avoids_taken_candidates() {
        let mut calls = 0;
        let key = generate_unique(5, 3, |_| {
            calls += 1;
            calls < 2
        });
        assert!(is_valid(&key));
        assert_eq!(calls, 2);
    }
}
