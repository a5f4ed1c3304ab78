use regex::Regex;
use std::fmt;
use std::sync::OnceLock;
use tracing::debug;

/// Errors raised when a model response cannot be coerced into structured data.
#[derive(Debug)]
pub enum ExtractError {
    /// No `{...}` span exists in the response at all.
    NoJsonFound,
    /// A span was found but does not parse, even after textual repair.
    UnrecoverableJson(String),
}

impl fmt::Display for ExtractError {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            ExtractError::NoJsonFound => {
                write!(f, "no JSON object found in the model response")
            }
            ExtractError::UnrecoverableJson(detail) => {
                write!(f, "JSON could not be repaired into a parseable form: {detail}")
            }
        }
    }
}

impl std::error::Error for ExtractError {}

/// Line prefixes that mark a non-code (comment) line.
const COMMENT_MARKERS: &[&str] = &["#", "//", "/*", "*", "<!--"];

/// Line prefixes that mark trailing explanatory prose after the code body.
const EXPLANATION_MARKERS: &[&str] = &["Explanation:", "Note:"];

fn fence_open_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"```[a-zA-Z]*\n").expect("valid regex"))
}

fn fence_close_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"```\n?$").expect("valid regex"))
}

/// Strips markdown code fences and surrounding explanatory prose from a model
/// response, returning a best-effort code body.
///
/// This is a heuristic, not a parser: it never fails, only degrades. Input
/// without fences or prose comes back unchanged (modulo whitespace trimming),
/// and the transform is idempotent.
pub fn clean_code(text: &str) -> String {
    let without_fences = fence_open_re().replace_all(text, "");
    let without_fences = fence_close_re().replace_all(&without_fences, "");

    let lines: Vec<&str> = without_fences.lines().collect();

    // First line that looks like actual code rather than leading prose or a
    // comment-only preamble.
    let start = lines
        .iter()
        .position(|line| {
            !line.trim().is_empty() && !COMMENT_MARKERS.iter().any(|m| line.starts_with(m))
        })
        .unwrap_or(0);

    // Last significant line, ignoring trailing explanation paragraphs.
    let end = lines
        .iter()
        .rposition(|line| {
            !line.trim().is_empty() && !EXPLANATION_MARKERS.iter().any(|m| line.starts_with(m))
        })
        .map(|i| i + 1)
        .unwrap_or(lines.len());

    if start >= end {
        return without_fences.trim().to_string();
    }

    lines[start..end].join("\n").trim().to_string()
}

fn json_span_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"(?s)\{.*\}").expect("valid regex"))
}

fn single_quoted_key_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"'([^']*)':").expect("valid regex"))
}

fn single_quoted_value_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r":\s*'([^']*)'").expect("valid regex"))
}

fn trailing_comma_object_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r",\s*\}").expect("valid regex"))
}

fn trailing_comma_array_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r",\s*\]").expect("valid regex"))
}

fn bare_value_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r#":\s*([^"][^,}\]]*)\s*([,}\]])"#).expect("valid regex"))
}

/// Converts single-quoted object keys to double-quoted ones.
fn repair_single_quoted_keys(text: &str) -> String {
    single_quoted_key_re()
        .replace_all(text, "\"$1\":")
        .into_owned()
}

/// Converts single-quoted scalar values to double-quoted ones.
fn repair_single_quoted_values(text: &str) -> String {
    single_quoted_value_re()
        .replace_all(text, ": \"$1\"")
        .into_owned()
}

/// Removes trailing commas before a closing brace.
fn repair_trailing_object_commas(text: &str) -> String {
    trailing_comma_object_re().replace_all(text, "}").into_owned()
}

/// Removes trailing commas before a closing bracket.
fn repair_trailing_array_commas(text: &str) -> String {
    trailing_comma_array_re().replace_all(text, "]").into_owned()
}

/// Quotes bare (unquoted) scalar values that run up to a following comma,
/// brace, or bracket. Runs last: it assumes quoting and comma repairs have
/// already been applied.
fn repair_bare_values(text: &str) -> String {
    bare_value_re()
        .replace_all(text, ": \"$1\"$2")
        .into_owned()
}

/// The ordered repair pipeline. Later rules assume earlier ones already ran;
/// the order must not change.
const REPAIRS: &[fn(&str) -> String] = &[
    repair_single_quoted_keys,
    repair_single_quoted_values,
    repair_trailing_object_commas,
    repair_trailing_array_commas,
    repair_bare_values,
];

fn parses(candidate: &str) -> Result<(), String> {
    serde_json::from_str::<serde_json::Value>(candidate)
        .map(|_| ())
        .map_err(|e| e.to_string())
}

/// Locates the first `{...}` span in `text` and returns it as parseable JSON,
/// applying the textual repair pipeline when the raw span does not parse.
pub fn extract_json(text: &str) -> Result<String, ExtractError> {
    let span = json_span_re()
        .find(text)
        .ok_or(ExtractError::NoJsonFound)?
        .as_str();

    if parses(span).is_ok() {
        return Ok(span.to_string());
    }

    debug!("extracted JSON span is invalid, applying textual repairs");

    let mut candidate = span.to_string();
    let mut last_error = String::new();
    for repair in REPAIRS {
        candidate = repair(&candidate);
        match parses(&candidate) {
            Ok(()) => return Ok(candidate),
            Err(e) => last_error = e,
        }
    }

    Err(ExtractError::UnrecoverableJson(last_error))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_clean_code_strips_fences() {
        let input = "```python\nprint('hello')\n```";
        assert_eq!(clean_code(input), "print('hello')");
    }

    #[test]
    fn test_clean_code_strips_surrounding_prose() {
        let input = "// The requested module follows\nx = 1\ny = 2\n\nNote: adjust as needed.";
        assert_eq!(clean_code(input), "x = 1\ny = 2");
    }

    #[test]
    fn test_clean_code_no_markers_returns_input() {
        let input = "fn main() {}\n";
        assert_eq!(clean_code(input), "fn main() {}");
    }

    #[test]
    fn test_clean_code_is_idempotent() {
        let inputs = [
            "```js\nconst a = 1;\n```",
            "Some intro\n\nvalue = 42\n\nExplanation: trailing",
            "# only a comment",
            "",
            "plain text with no code at all",
        ];
        for input in inputs {
            let once = clean_code(input);
            assert_eq!(clean_code(&once), once, "not idempotent for {input:?}");
        }
    }

    #[test]
    fn test_clean_code_comment_only_input_survives() {
        // No "real" code line exists; the heuristic degrades to the trimmed input.
        let input = "# comment one\n# comment two";
        assert_eq!(clean_code(input), "# comment one\n# comment two");
    }

    #[test]
    fn test_extract_json_passes_valid_object_through() {
        let input = "The structure is:\n{\"a\": 1, \"b\": [2, 3]}\nHope that helps.";
        assert_eq!(extract_json(input).unwrap(), "{\"a\": 1, \"b\": [2, 3]}");
    }

    #[test]
    fn test_extract_json_no_braces() {
        let err = extract_json("no json here").unwrap_err();
        assert!(matches!(err, ExtractError::NoJsonFound));
    }

    #[test]
    fn test_extract_json_repairs_single_quoted_keys() {
        let result = extract_json("{'a': 1}").unwrap();
        assert_eq!(result, "{\"a\": 1}");
    }

    #[test]
    fn test_extract_json_repairs_single_quoted_values() {
        let result = extract_json("{'name': 'demo'}").unwrap();
        let value: serde_json::Value = serde_json::from_str(&result).unwrap();
        assert_eq!(value["name"], "demo");
    }

    #[test]
    fn test_extract_json_removes_trailing_commas() {
        let result = extract_json("{\"items\": [1, 2,], \"n\": 3,}").unwrap();
        let value: serde_json::Value = serde_json::from_str(&result).unwrap();
        assert_eq!(value["items"], serde_json::json!([1, 2]));
        assert_eq!(value["n"], 3);
    }

    #[test]
    fn test_extract_json_quotes_bare_values() {
        let result = extract_json("{\"status\": ok}").unwrap();
        let value: serde_json::Value = serde_json::from_str(&result).unwrap();
        assert_eq!(value["status"], "ok");
    }

    #[test]
    fn test_extract_json_unrecoverable() {
        let err = extract_json("{\"a\": [1, {\"b\"}").unwrap_err();
        assert!(matches!(err, ExtractError::UnrecoverableJson(_)));
    }

    #[test]
    fn test_repair_rules_individually() {
        assert_eq!(repair_single_quoted_keys("{'k': 1}"), "{\"k\": 1}");
        assert_eq!(
            repair_single_quoted_values("{\"k\": 'v'}"),
            "{\"k\": \"v\"}"
        );
        assert_eq!(repair_trailing_object_commas("{\"k\": 1, }"), "{\"k\": 1}");
        assert_eq!(repair_trailing_array_commas("[1, 2, ]"), "[1, 2]");
        assert_eq!(repair_bare_values("{\"k\": yes}"), "{\"k\": \"yes\"}");
    }
}
