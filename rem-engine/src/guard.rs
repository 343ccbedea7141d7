//! Read-only guard for raw SQL fallthrough
//!
//! Rejects statements containing write keywords outside string literals.
//! This is a belt on top of running queries under a read-only role; it is
//! not a SQL parser.

use once_cell::sync::Lazy;
use rem_core::QueryError;

static WRITE_KEYWORDS: Lazy<Vec<&'static str>> = Lazy::new(|| {
    vec![
        "DROP", "TRUNCATE", "ALTER", "DELETE", "INSERT", "UPDATE", "GRANT", "REVOKE",
    ]
});

/// Check a raw query; `Err(WriteRejected)` names the offending keyword.
pub fn ensure_read_only(sql: &str) -> Result<(), QueryError> {
    for word in words_outside_strings(sql) {
        let upper = word.to_ascii_uppercase();
        if let Some(keyword) = WRITE_KEYWORDS.iter().find(|k| **k == upper) {
            return Err(QueryError::WriteRejected {
                keyword: (*keyword).to_string(),
            });
        }
    }
    Ok(())
}

/// Yield identifier-like words, skipping the contents of single- and
/// double-quoted regions (with '' escaping inside single quotes).
fn words_outside_strings(sql: &str) -> Vec<String> {
    let mut words = Vec::new();
    let mut current = String::new();
    let mut chars = sql.chars().peekable();

    while let Some(c) = chars.next() {
        match c {
            '\'' => {
                flush(&mut current, &mut words);
                // Skip until the closing quote, honouring '' escapes.
                while let Some(inner) = chars.next() {
                    if inner == '\'' {
                        if chars.peek() == Some(&'\'') {
                            chars.next();
                        } else {
                            break;
                        }
                    }
                }
            }
            '"' => {
                flush(&mut current, &mut words);
                for inner in chars.by_ref() {
                    if inner == '"' {
                        break;
                    }
                }
            }
            c if c.is_alphanumeric() || c == '_' => current.push(c),
            _ => flush(&mut current, &mut words),
        }
    }
    flush(&mut current, &mut words);
    words
}

fn flush(current: &mut String, words: &mut Vec<String>) {
    if !current.is_empty() {
        words.push(std::mem::take(current));
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn selects_pass() {
        assert!(ensure_read_only("SELECT * FROM sessions WHERE user_id = $1").is_ok());
        assert!(ensure_read_only("WITH x AS (SELECT 1) SELECT * FROM x").is_ok());
    }

    #[test]
    fn write_statements_are_rejected() {
        for sql in [
            "DELETE FROM sessions",
            "insert into users values (1)",
            "UPDATE tasks SET status = 'x'",
            "DROP TABLE moments",
            "TRUNCATE kv_store",
            "ALTER TABLE users ADD COLUMN x int",
            "GRANT ALL ON sessions TO public",
            "REVOKE ALL ON sessions FROM public",
        ] {
            assert!(ensure_read_only(sql).is_err(), "should reject: {sql}");
        }
    }

    #[test]
    fn keywords_inside_string_literals_are_fine() {
        assert!(ensure_read_only("SELECT * FROM moments WHERE summary = 'please DELETE me'").is_ok());
        assert!(ensure_read_only("SELECT 'it''s an UPDATE note'").is_ok());
    }

    #[test]
    fn keywords_as_substrings_are_fine() {
        // "updated_at" contains no standalone UPDATE token.
        assert!(ensure_read_only("SELECT updated_at FROM sessions").is_ok());
    }
}
