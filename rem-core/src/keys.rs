//! Key normalisation and content hashing
//!
//! `normalise_key` is mirrored in SQL as `rem_normalise_key` (installer
//! script 2) so triggers and service code agree byte-for-byte. Keep the two
//! in lockstep when changing either.

use sha2::{Digest, Sha256};

/// Normalise an entity name into its KV key.
///
/// trim → strip non-alphanumeric except `-` and `_` and whitespace →
/// collapse whitespace/underscores to `-` → lowercase → collapse `--+` → `-`.
/// Deterministic and idempotent.
pub fn normalise_key(name: &str) -> String {
    let mut out = String::with_capacity(name.len());
    let mut last_dash = false;

    for c in name.trim().chars() {
        let mapped = if c.is_alphanumeric() {
            last_dash = false;
            out.extend(c.to_lowercase());
            continue;
        } else if c.is_whitespace() || c == '_' || c == '-' {
            Some('-')
        } else {
            // Stripped entirely.
            None
        };

        if let Some(d) = mapped {
            if !last_dash {
                out.push(d);
                last_dash = true;
            }
        }
    }

    // A trailing separator can survive when the name ends in stripped or
    // separator characters.
    while out.ends_with('-') {
        out.pop();
    }
    while out.starts_with('-') {
        out.remove(0);
    }

    out
}

/// SHA-256 of the input, hex-encoded.
///
/// Used for embedding `content_hash` (replay skip) and moment naming.
pub fn content_hash(input: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(input.as_bytes());
    hex::encode(hasher.finalize())
}

/// First `n` hex chars of the SHA-256 of the input.
pub fn short_hash(input: &str, n: usize) -> String {
    let full = content_hash(input);
    full[..n.min(full.len())].to_string()
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn normalises_typical_names() {
        assert_eq!(normalise_key("My Note"), "my-note");
        assert_eq!(normalise_key("  Spaced   Out  "), "spaced-out");
        assert_eq!(normalise_key("snake_case_name"), "snake-case-name");
        assert_eq!(normalise_key("Q3 Report (final)!"), "q3-report-final");
        assert_eq!(normalise_key("a--b---c"), "a-b-c");
    }

    #[test]
    fn strips_leading_and_trailing_separators() {
        assert_eq!(normalise_key("---edge---"), "edge");
        assert_eq!(normalise_key("!!!"), "");
    }

    #[test]
    fn hash_is_stable() {
        assert_eq!(
            content_hash("hello"),
            "2cf24dba5fb0a30e26e83b2ac5b9e29e1b161e5c1fa7425e73043362938b9824"
        );
        assert_eq!(short_hash("hello", 6), "2cf24d");
    }

    proptest! {
        #[test]
        fn normalise_is_idempotent(s in "[ -~]{0,64}") {
            let once = normalise_key(&s);
            prop_assert_eq!(normalise_key(&once), once);
        }

        #[test]
        fn normalised_keys_are_lowercase_dash_alnum(s in "[ -~]{0,64}") {
            let key = normalise_key(&s);
            prop_assert!(key.chars().all(|c| c == '-' || (!c.is_uppercase() && c.is_alphanumeric())));
            prop_assert!(!key.starts_with('-') && !key.ends_with('-'));
            prop_assert!(!key.contains("--"));
        }
    }
}
