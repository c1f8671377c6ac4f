//! # Feature: Short Codes and Slugs
//!
//! Random, human-enterable message codes and URL-safe thread slugs. Generation is
//! pure; collision checking against the store happens in [`allocate`].
//!
//! - **Version**: 1.1.0
//! - **Since**: 0.1.0
//! - **Toggleable**: false
//!
//! ## Changelog
//! - 1.1.0: Thread slugs and bounded collision retry
//! - 1.0.0: Four digit message codes

use log::warn;
use rand::Rng;
use std::future::Future;

/// Digits in a message code
pub const CODE_LEN: usize = 4;

/// Characters in a thread slug
pub const SLUG_LEN: usize = 11;

/// Store lookups made before accepting an unchecked key
pub const MAX_ALLOCATION_ATTEMPTS: usize = 3;

/// Longest code or slug accepted from a request path
pub const MAX_KEY_LEN: usize = 64;

const SLUG_ALPHABET: &[u8] = b"ABCDEFGHIJKLMNOPQRSTUVWXYZabcdefghijklmnopqrstuvwxyz0123456789-_";

/// Generate a fixed-width numeric code such as `3742`
pub fn generate_code() -> String {
    let mut rng = rand::rng();
    (0..CODE_LEN)
        .map(|_| char::from(b'0' + rng.random_range(0..10u8)))
        .collect()
}

/// Generate a URL-safe slug
pub fn generate_slug() -> String {
    let mut rng = rand::rng();
    (0..SLUG_LEN)
        .map(|_| char::from(SLUG_ALPHABET[rng.random_range(0..SLUG_ALPHABET.len())]))
        .collect()
}

/// Whether a code or slug taken from a request is well formed
pub fn is_valid_key(key: &str) -> bool {
    !key.is_empty()
        && key.len() <= MAX_KEY_LEN
        && key.bytes().all(|b| SLUG_ALPHABET.contains(&b))
}

/// Pick a key that is not yet taken.
///
/// Each candidate from `generate` is checked with `taken`, up to
/// [`MAX_ALLOCATION_ATTEMPTS`] times. When every checked candidate collides, one
/// more candidate is returned unchecked and may overwrite an existing record.
pub async fn allocate<G, T, Fut, E>(mut generate: G, mut taken: T) -> Result<String, E>
where
    G: FnMut() -> String,
    T: FnMut(String) -> Fut,
    Fut: Future<Output = Result<bool, E>>,
{
    for _ in 0..MAX_ALLOCATION_ATTEMPTS {
        let candidate = generate();
        if !taken(candidate.clone()).await? {
            return Ok(candidate);
        }
    }

    let candidate = generate();
    warn!(
        "No free key after {} attempts, using unchecked key {}",
        MAX_ALLOCATION_ATTEMPTS, candidate
    );
    Ok(candidate)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;
    use std::convert::Infallible;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[test]
    fn test_code_is_four_digits() {
        for _ in 0..200 {
            let code = generate_code();
            assert_eq!(code.len(), CODE_LEN);
            assert!(code.chars().all(|c| c.is_ascii_digit()));
        }
    }

    #[test]
    fn test_slug_is_url_safe() {
        for _ in 0..200 {
            let slug = generate_slug();
            assert_eq!(slug.len(), SLUG_LEN);
            assert!(is_valid_key(&slug));
        }
    }

    #[test]
    fn test_slugs_vary() {
        let slugs: HashSet<String> = (0..50).map(|_| generate_slug()).collect();
        assert!(slugs.len() > 45);
    }

    #[test]
    fn test_is_valid_key() {
        assert!(is_valid_key("3742"));
        assert!(is_valid_key("aB3-_x"));
        assert!(!is_valid_key(""));
        assert!(!is_valid_key("../etc"));
        assert!(!is_valid_key("has space"));
        assert!(!is_valid_key(&"a".repeat(MAX_KEY_LEN + 1)));
    }

    #[tokio::test]
    async fn test_allocate_returns_first_free_key() {
        let mut next = vec!["c".to_string(), "b".to_string(), "a".to_string()];
        let key: Result<String, Infallible> = allocate(
            || next.pop().unwrap(),
            |candidate| async move { Ok(candidate == "a") },
        )
        .await;
        assert_eq!(key.unwrap(), "b");
    }

    #[tokio::test]
    async fn test_allocate_gives_up_after_bounded_attempts() {
        let checks = AtomicUsize::new(0);
        let mut counter = 0;
        let key: Result<String, Infallible> = allocate(
            || {
                counter += 1;
                format!("k{counter}")
            },
            |_| {
                checks.fetch_add(1, Ordering::SeqCst);
                async { Ok(true) }
            },
        )
        .await;
        assert_eq!(checks.load(Ordering::SeqCst), MAX_ALLOCATION_ATTEMPTS);
        assert_eq!(key.unwrap(), format!("k{}", MAX_ALLOCATION_ATTEMPTS + 1));
    }

    #[tokio::test]
    async fn test_allocate_propagates_lookup_errors() {
        let key: Result<String, &str> =
            allocate(generate_code, |_| async { Err("store down") }).await;
        assert_eq!(key.unwrap_err(), "store down");
    }
}
