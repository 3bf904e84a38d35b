//! Response repair: turn a raw model reply into a decodable candidate.
//!
//! Repairers never fail. Their output is a best-effort string; if it still
//! does not decode, the validator reports it and the controller retries.
//! The quote heuristic lives behind [`ResponseRepairer`] so it can be
//! swapped for [`StrictRepairer`] without touching validation.

pub mod extract;
pub mod quotes;

use self::quotes::QuoteDialect;

/// Produces a structured-text candidate from a raw reply.
pub trait ResponseRepairer: Send + Sync {
    /// Short name for logs.
    fn name(&self) -> &'static str;

    /// Best-effort repair; never fails.
    fn repair(&self, raw: &str) -> String;
}

/// Strips wrapping and converts single-quoted dialect to double quotes.
#[derive(Debug, Clone, Copy, Default)]
pub struct LenientRepairer;

impl ResponseRepairer for LenientRepairer {
    fn name(&self) -> &'static str {
        "lenient"
    }

    fn repair(&self, raw: &str) -> String {
        let candidate = extract::strip_wrapping(raw);

        // Valid JSON can legitimately contain single quotes inside strings.
        if serde_json::from_str::<serde_json::Value>(candidate).is_ok() {
            return candidate.to_string();
        }

        match quotes::detect_dialect(candidate) {
            QuoteDialect::Single => {
                tracing::debug!("Converting single-quoted reply to double quotes");
                quotes::convert_single_quotes(candidate)
            }
            QuoteDialect::Double => candidate.to_string(),
        }
    }
}

/// Only strips wrapping; quoting must already be valid.
#[derive(Debug, Clone, Copy, Default)]
pub struct StrictRepairer;

impl ResponseRepairer for StrictRepairer {
    fn name(&self) -> &'static str {
        "strict"
    }

    fn repair(&self, raw: &str) -> String {
        extract::strip_wrapping(raw).to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_lenient_fenced_single_quoted() {
        let raw = "```json\n{'feedback': 'Très bien', 'communication_score': 4}\n```";
        let repaired = LenientRepairer.repair(raw);
        let value: serde_json::Value = serde_json::from_str(&repaired).expect("decodable");
        assert_eq!(value["feedback"], "Très bien");
        assert_eq!(value["communication_score"], 4);
    }

    #[test]
    fn test_lenient_leaves_valid_json_alone() {
        let raw = r#"{"feedback": "It's 'fine'"}"#;
        assert_eq!(LenientRepairer.repair(raw), raw);
    }

    #[test]
    fn test_strict_does_not_touch_quotes() {
        let raw = "{'feedback': 'ok'}";
        let repaired = StrictRepairer.repair(raw);
        assert_eq!(repaired, raw);
        assert!(serde_json::from_str::<serde_json::Value>(&repaired).is_err());
    }

    #[test]
    fn test_garbage_passes_through() {
        assert_eq!(LenientRepairer.repair("I cannot help with that."), "I cannot help with that.");
    }

    #[test]
    fn test_repairers_are_object_safe() {
        let repairers: Vec<Box<dyn ResponseRepairer>> =
            vec![Box::new(LenientRepairer), Box::new(StrictRepairer)];
        let names: Vec<_> = repairers.iter().map(|r| r.name()).collect();
        assert_eq!(names, vec!["lenient", "strict"]);
    }
}
