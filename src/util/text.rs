use std::borrow::Cow;

/// Ellipsis appended to truncated text
pub const ELLIPSIS: &str = "...";
const ELLIPSIS_LEN: usize = 3;

/// Truncates plain text to at most `max_chars` characters at a word boundary.
///
/// When truncation is needed the text is cut at the last whitespace at or
/// before `max_chars - 3` and `"..."` is appended, so the result (ellipsis
/// included) never exceeds `max_chars` characters. Characters, not bytes,
/// are counted, so multi-byte scripts are never split.
///
/// A text with no whitespace inside the window (a single oversized word) is
/// the only case that is cut mid-word; there is no boundary to cut at.
///
/// # Examples
///
/// ```
/// use feedmill::util::truncate_at_word;
///
/// assert_eq!(truncate_at_word("Short text", 200), "Short text");
/// assert_eq!(truncate_at_word("The quick brown fox jumps", 15), "The quick...");
/// ```
pub fn truncate_at_word(text: &str, max_chars: usize) -> Cow<'_, str> {
    if text.chars().count() <= max_chars {
        return Cow::Borrowed(text);
    }
    if max_chars <= ELLIPSIS_LEN {
        return Cow::Owned(text.chars().take(max_chars).collect());
    }

    let budget = max_chars - ELLIPSIS_LEN;

    // Byte offset just past the `budget`-th character
    let window_end = text
        .char_indices()
        .nth(budget)
        .map_or(text.len(), |(idx, _)| idx);

    // A boundary exists if the character right after the window is whitespace
    // (the window ends on a full word) or if there is whitespace inside it.
    let next_is_space = text[window_end..]
        .chars()
        .next()
        .is_some_and(char::is_whitespace);

    let cut = if next_is_space {
        window_end
    } else {
        match text[..window_end].rfind(char::is_whitespace) {
            Some(idx) => idx,
            None => window_end,
        }
    };

    let head = text[..cut].trim_end();
    Cow::Owned(format!("{head}{ELLIPSIS}"))
}

/// Returns the first `max_chars` characters of `s`, flattened onto one line.
///
/// Used for diagnostic excerpts of unexpected HTTP response bodies.
pub fn excerpt(s: &str, max_chars: usize) -> String {
    let flat: String = s
        .split_whitespace()
        .collect::<Vec<_>>()
        .join(" ");
    if flat.chars().count() <= max_chars {
        return flat;
    }
    let mut out: String = flat.chars().take(max_chars).collect();
    out.push_str(ELLIPSIS);
    out
}

/// Removes C0 control characters (except tab, newline, carriage return) and DEL.
///
/// Feed text is stored and later rendered elsewhere; stray control bytes from
/// broken encoders are dropped here. Returns `Cow::Borrowed` for clean input.
pub fn strip_control_chars(s: &str) -> Cow<'_, str> {
    let is_control = |c: char| c == '\u{7f}' || (c < '\u{20}' && !matches!(c, '\t' | '\n' | '\r'));

    if !s.chars().any(is_control) {
        return Cow::Borrowed(s);
    }
    Cow::Owned(s.chars().filter(|&c| !is_control(c)).collect())
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn test_short_text_is_borrowed() {
        let result = truncate_at_word("fits", 10);
        assert!(matches!(result, Cow::Borrowed(_)));
        assert_eq!(result, "fits");
    }

    #[test]
    fn test_cuts_at_last_whitespace() {
        // budget = 12 -> "The quick br" -> last space at 9
        assert_eq!(truncate_at_word("The quick brown fox", 15), "The quick...");
    }

    #[test]
    fn test_window_ending_on_word_boundary_keeps_word() {
        // budget = 9 -> "The quick" followed by a space
        assert_eq!(truncate_at_word("The quick brown", 12), "The quick...");
    }

    #[test]
    fn test_single_long_word_is_cut_hard() {
        assert_eq!(truncate_at_word("Supercalifragilistic", 10), "Superca...");
    }

    #[test]
    fn test_tiny_limits() {
        assert_eq!(truncate_at_word("Hello world", 0), "");
        assert_eq!(truncate_at_word("Hello world", 3), "Hel");
    }

    #[test]
    fn test_multibyte_text_counts_characters() {
        let text = "Привет мир как дела у тебя сегодня";
        let result = truncate_at_word(text, 15);
        assert_eq!(result, "Привет мир...");
        assert!(result.chars().count() <= 15);
    }

    #[test]
    fn test_excerpt_flattens_and_truncates() {
        assert_eq!(
            excerpt("<html>\n  <body>oops</body>\n</html>", 200),
            "<html> <body>oops</body> </html>"
        );
        assert_eq!(excerpt("abcdefghij", 4), "abcd...");
    }

    #[test]
    fn test_strip_control_chars() {
        assert!(matches!(strip_control_chars("clean\ttext\n"), Cow::Borrowed(_)));
        assert_eq!(strip_control_chars("he\u{0}ll\u{7}o\u{7f}"), "hello");
    }

    proptest! {
        #[test]
        fn prop_truncation_never_exceeds_limit(
            words in proptest::collection::vec("[a-zA-Zé]{1,12}", 1..80),
            limit in 4usize..300,
        ) {
            let text = words.join(" ");
            let result = truncate_at_word(&text, limit);
            prop_assert!(result.chars().count() <= limit);
        }

        #[test]
        fn prop_truncation_never_splits_words(
            words in proptest::collection::vec("[a-z]{1,12}", 2..80),
            limit in 20usize..300,
        ) {
            let text = words.join(" ");
            let result = truncate_at_word(&text, limit);
            if let Some(head) = result.strip_suffix(ELLIPSIS) {
                for word in head.split_whitespace() {
                    prop_assert!(words.iter().any(|w| w == word));
                }
            } else {
                prop_assert_eq!(result.as_ref(), text.as_str());
            }
        }
    }
}
