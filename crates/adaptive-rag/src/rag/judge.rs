//! Shared parsing helpers for judge-style completions.

use crate::types::RetrievedChunk;

/// Strip markdown code fences and surrounding noise, returning the outermost
/// JSON object if one is present.
pub(crate) fn extract_json_object(raw: &str) -> &str {
    let cleaned = raw
        .trim()
        .trim_start_matches("```json")
        .trim_start_matches("```")
        .trim_end_matches("```")
        .trim();

    match (cleaned.find('{'), cleaned.rfind('}')) {
        (Some(start), Some(end)) if end > start => &cleaned[start..=end],
        _ => cleaned,
    }
}

/// Find the first standalone `positive` or `negative` token in a verdict.
/// Returns `Some(true)` for positive, `Some(false)` for negative.
pub(crate) fn parse_binary(raw: &str, positive: &str, negative: &str) -> Option<bool> {
    raw.split(|c: char| !c.is_ascii_alphanumeric())
        .filter(|token| !token.is_empty())
        .find_map(|token| {
            if token.eq_ignore_ascii_case(positive) {
                Some(true)
            } else if token.eq_ignore_ascii_case(negative) {
                Some(false)
            } else {
                None
            }
        })
}

pub(crate) fn format_chunks(chunks: &[RetrievedChunk]) -> String {
    chunks
        .iter()
        .enumerate()
        .map(|(i, chunk)| {
            format!(
                "[{}] {} ({})\n{}",
                i + 1,
                chunk.source,
                chunk.source_id,
                chunk.text.trim()
            )
        })
        .collect::<Vec<_>>()
        .join("\n\n")
}

/// Lowercase and collapse whitespace, for rewrite comparisons.
pub(crate) fn normalize(text: &str) -> String {
    text.split_whitespace()
        .collect::<Vec<_>>()
        .join(" ")
        .to_lowercase()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_extract_json_from_fenced_block() {
        let raw = "```json\n{\"risk_level\": \"low\"}\n```";
        assert_eq!(extract_json_object(raw), "{\"risk_level\": \"low\"}");

        let chatty = "Sure! Here is the result: {\"a\": 1} hope that helps";
        assert_eq!(extract_json_object(chatty), "{\"a\": 1}");
    }

    #[test]
    fn test_parse_binary_takes_first_token() {
        assert_eq!(parse_binary("GOOD", "GOOD", "BAD"), Some(true));
        assert_eq!(parse_binary("bad.", "GOOD", "BAD"), Some(false));
        assert_eq!(parse_binary("Verdict: NO, not really a YES", "YES", "NO"), Some(false));
        // Substrings do not count.
        assert_eq!(parse_binary("NOTHING to say", "YES", "NO"), None);
        assert_eq!(parse_binary("", "YES", "NO"), None);
    }

    #[test]
    fn test_normalize() {
        assert_eq!(normalize("  What   IS\tMRSA? "), "what is mrsa?");
    }

    #[test]
    fn test_format_chunks_numbers_sources() {
        let chunks = vec![RetrievedChunk {
            text: " body ".into(),
            source_id: "who#1".into(),
            source: "who-guidance.pdf".into(),
            similarity_score: 0.5,
        }];
        assert_eq!(format_chunks(&chunks), "[1] who-guidance.pdf (who#1)\nbody");
    }
}
