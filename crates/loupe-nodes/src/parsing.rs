//! Helpers for parsing structured LLM output.

use std::sync::OnceLock;

use regex::Regex;

static FENCE: OnceLock<Regex> = OnceLock::new();

/// Strip leading/trailing markdown code-fence markers from an LLM response
/// so the payload can be handed to the JSON parser.
pub fn strip_code_fences(response: &str) -> String {
    let fence =
        FENCE.get_or_init(|| Regex::new(r"^\s*```(?:json)?\s*\n?|\n?\s*```\s*$").unwrap());
    fence.replace_all(response.trim(), "").into_owned()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_strips_json_fence() {
        let raw = "```json\n{\"a\": 1}\n```";
        assert_eq!(strip_code_fences(raw), "{\"a\": 1}");
    }

    #[test]
    fn test_strips_bare_fence() {
        let raw = "```\n[1, 2]\n```";
        assert_eq!(strip_code_fences(raw), "[1, 2]");
    }

    #[test]
    fn test_leaves_plain_json_alone() {
        assert_eq!(strip_code_fences("{\"a\": 1}"), "{\"a\": 1}");
    }
}
