//! Single-quote dialect repair.
//!
//! Some models answer with Python-style literals: `{'feedback': 'Bien'}`.
//! Conversion turns delimiter quotes into double quotes. A single quote with
//! a letter or digit on both sides (`don't`, `l'été`) is kept as an
//! apostrophe. The heuristic is lossy: a quoted string that ends in a
//! possessive apostrophe (`'students' work'`) is split in the wrong place.

/// Quoting style of a structured-text candidate.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum QuoteDialect {
    Double,
    Single,
}

fn is_word_char(c: Option<char>) -> bool {
    c.is_some_and(char::is_alphanumeric)
}

/// Dialect decided by the first delimiter quote in the text.
pub fn detect_dialect(text: &str) -> QuoteDialect {
    let chars: Vec<char> = text.chars().collect();
    for (i, &c) in chars.iter().enumerate() {
        match c {
            '"' => return QuoteDialect::Double,
            '\'' => {
                let prev = i.checked_sub(1).map(|p| chars[p]);
                let next = chars.get(i + 1).copied();
                if !(is_word_char(prev) && is_word_char(next)) {
                    return QuoteDialect::Single;
                }
            }
            _ => {}
        }
    }
    QuoteDialect::Double
}

/// Convert a single-quoted candidate to double quotes.
///
/// Double quotes that appear inside converted strings are escaped so they
/// stay part of the value.
pub fn convert_single_quotes(text: &str) -> String {
    let chars: Vec<char> = text.chars().collect();
    let mut out = String::with_capacity(text.len());
    let mut in_string = false;
    let mut escape_next = false;

    for (i, &c) in chars.iter().enumerate() {
        if escape_next {
            escape_next = false;
            // `\'` is not a valid JSON escape; drop the backslash.
            if c == '\'' {
                out.pop();
            }
            out.push(c);
            continue;
        }

        match c {
            '\\' if in_string => {
                escape_next = true;
                out.push(c);
            }
            '\'' => {
                let prev = i.checked_sub(1).map(|p| chars[p]);
                let next = chars.get(i + 1).copied();
                if is_word_char(prev) && is_word_char(next) {
                    out.push('\'');
                } else {
                    in_string = !in_string;
                    out.push('"');
                }
            }
            '"' if in_string => out.push_str("\\\""),
            _ => out.push(c),
        }
    }

    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_detect_dialect() {
        assert_eq!(detect_dialect("{'a': 1}"), QuoteDialect::Single);
        assert_eq!(detect_dialect("{\"a\": \"it's\"}"), QuoteDialect::Double);
        assert_eq!(detect_dialect("[1, 2]"), QuoteDialect::Double);
    }

    #[test]
    fn test_convert_keeps_interior_apostrophes() {
        let converted = convert_single_quotes("{'feedback': 'Don't forget l'accent', 'score': 3}");
        assert_eq!(
            converted,
            "{\"feedback\": \"Don't forget l'accent\", \"score\": 3}"
        );
        let value: serde_json::Value = serde_json::from_str(&converted).expect("valid json");
        assert_eq!(value["feedback"], "Don't forget l'accent");
    }

    #[test]
    fn test_convert_escapes_embedded_double_quotes() {
        let converted = convert_single_quotes("{'issue': 'said \"hola\" twice'}");
        let value: serde_json::Value = serde_json::from_str(&converted).expect("valid json");
        assert_eq!(value["issue"], "said \"hola\" twice");
    }

    #[test]
    fn test_convert_escaped_single_quote() {
        let converted = convert_single_quotes(r"{'a': 'x \' y'}");
        let value: serde_json::Value = serde_json::from_str(&converted).expect("valid json");
        assert_eq!(value["a"], "x ' y");
    }
}
