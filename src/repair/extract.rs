//! Payload extraction from model replies.
//!
//! Models wrap JSON in markdown fences, prepend explanations, or trail off
//! with commentary. Extraction strategies, tried in order:
//! 1. Bare payload (reply already starts with `{` or `[`)
//! 2. Fenced code block (```` ```json ```` or a plain fence)
//! 3. First balanced object or array found in the text
//!
//! If nothing matches the trimmed reply is returned unchanged; a later decode
//! failure reports the problem.

use std::sync::OnceLock;

use regex::Regex;

fn fence_regex() -> Option<&'static Regex> {
    static FENCE: OnceLock<Option<Regex>> = OnceLock::new();
    FENCE
        .get_or_init(|| Regex::new(r"```(?:[A-Za-z0-9_-]+)?[ \t]*\r?\n?([\s\S]*?)```").ok())
        .as_ref()
}

/// Index of the delimiter that closes the one at the start of `s`.
///
/// Understands nesting, double- and single-quoted strings, and escapes inside
/// strings. `s` must start with `{` or `[`.
pub fn find_matching_close(s: &str) -> Option<usize> {
    let mut depth = 0usize;
    let mut in_string: Option<char> = None;
    let mut escape_next = false;

    for (i, c) in s.char_indices() {
        if escape_next {
            escape_next = false;
            continue;
        }

        match in_string {
            Some(quote) => match c {
                '\\' => escape_next = true,
                c if c == quote => in_string = None,
                _ => {}
            },
            None => match c {
                '"' => in_string = Some('"'),
                '\'' if opens_single_quoted_string(s, i) => in_string = Some('\''),
                '{' | '[' => depth += 1,
                '}' | ']' => {
                    depth = depth.checked_sub(1)?;
                    if depth == 0 {
                        return Some(i);
                    }
                }
                _ => {}
            },
        }
    }

    None
}

/// A single quote outside a string opens one only when it is not an
/// apostrophe inside a word.
fn opens_single_quoted_string(s: &str, at: usize) -> bool {
    let before = s[..at].chars().next_back();
    !before.is_some_and(char::is_alphanumeric)
}

/// Balanced object or array starting at the first `{` or `[` in `content`.
pub fn first_balanced_payload(content: &str) -> Option<&str> {
    let start = content.find(['{', '['])?;
    let rest = &content[start..];
    let end = find_matching_close(rest)?;
    Some(&rest[..=end])
}

/// Body of the first fenced code block, trimmed.
pub fn fenced_block(content: &str) -> Option<&str> {
    let caps = fence_regex()?.captures(content)?;
    Some(caps.get(1)?.as_str().trim())
}

/// Strip wrapping around the payload.
pub fn strip_wrapping(raw: &str) -> &str {
    let trimmed = raw.trim();

    if trimmed.starts_with('{') || trimmed.starts_with('[') {
        return trimmed;
    }

    if let Some(block) = fenced_block(trimmed) {
        if block.starts_with('{') || block.starts_with('[') {
            return block;
        }
        if let Some(payload) = first_balanced_payload(block) {
            return payload;
        }
    }

    if let Some(payload) = first_balanced_payload(trimmed) {
        return payload;
    }

    trimmed
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_bare_payload_untouched() {
        assert_eq!(strip_wrapping("  {\"a\": 1}\n"), "{\"a\": 1}");
        assert_eq!(strip_wrapping("[1, 2]"), "[1, 2]");
    }

    #[test]
    fn test_json_fence() {
        let raw = "```json\n{\"feedback\": \"ok\"}\n```";
        assert_eq!(strip_wrapping(raw), "{\"feedback\": \"ok\"}");
    }

    #[test]
    fn test_plain_fence_with_prose() {
        let raw = "Here you go:\n```\n[{\"id\": \"x\"}]\n```\nHope this helps!";
        assert_eq!(strip_wrapping(raw), "[{\"id\": \"x\"}]");
    }

    #[test]
    fn test_embedded_object() {
        let raw = "Sure! The assessment is {\"total_score\": 7, \"note\": \"a } in text\"} done.";
        assert_eq!(
            strip_wrapping(raw),
            "{\"total_score\": 7, \"note\": \"a } in text\"}"
        );
    }

    #[test]
    fn test_single_quoted_strings_are_skipped() {
        let raw = "{'feedback': 'use } carefully', 'x': 1} trailing";
        assert_eq!(
            first_balanced_payload(raw),
            Some("{'feedback': 'use } carefully', 'x': 1}")
        );
    }

    #[test]
    fn test_apostrophe_does_not_open_string() {
        let raw = "{\"feedback\": \"ok\", \"n\": [1]} it's fine";
        assert_eq!(
            first_balanced_payload(raw),
            Some("{\"feedback\": \"ok\", \"n\": [1]}")
        );
        assert_eq!(find_matching_close("{don't}"), Some(6));
    }

    #[test]
    fn test_unbalanced_returns_trimmed_input() {
        assert_eq!(strip_wrapping("  no payload here "), "no payload here");
        assert_eq!(find_matching_close("{\"a\": [1, 2}"), None);
    }
}
