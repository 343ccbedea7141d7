//! Token estimation
//!
//! The chars/4 approximation drives session accounting and context budgets.
//! The LLM-reported count on the assistant row stays authoritative for
//! billing; this estimate only decides what fits in a window and when a
//! moment threshold trips.

/// Estimate token count for text at ~4 characters per token.
pub fn estimate_tokens(text: &str) -> i64 {
    if text.is_empty() {
        return 0;
    }
    (text.chars().count() as i64 + 3) / 4
}

/// Truncate text to a character budget on a char boundary, appending an
/// ellipsis when anything was dropped.
pub fn truncate_chars(text: &str, max_chars: usize) -> String {
    if text.chars().count() <= max_chars {
        return text.to_string();
    }
    let mut out: String = text.chars().take(max_chars).collect();
    out.push('…');
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_text_is_zero_tokens() {
        assert_eq!(estimate_tokens(""), 0);
    }

    #[test]
    fn rounds_up_to_whole_tokens() {
        assert_eq!(estimate_tokens("a"), 1);
        assert_eq!(estimate_tokens("abcd"), 1);
        assert_eq!(estimate_tokens("abcde"), 2);
    }

    #[test]
    fn truncation_preserves_short_text() {
        assert_eq!(truncate_chars("short", 200), "short");
    }

    #[test]
    fn truncation_marks_dropped_text() {
        let out = truncate_chars("abcdefgh", 4);
        assert_eq!(out, "abcd…");
    }
}
