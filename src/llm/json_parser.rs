//! Extraction of structured JSON from free-form model output.
//!
//! Models wrap JSON in prose, code fences, or emit it slightly broken.
//! Extraction runs a fixed sequence of strategies and stops at the first
//! candidate that parses and satisfies the target schema. Repair of
//! malformed JSON is only attempted after every unmodified strategy failed.

use regex::Regex;
use serde::Serialize;
use serde::de::DeserializeOwned;
use serde_json::Value;
use std::sync::OnceLock;
use tracing::debug;

/// A response shape a caller expects back from a model
pub trait StructuredResponse: DeserializeOwned + Serialize + Send + Sync + 'static {
    /// Name used in cache keys and log lines
    fn schema_name() -> &'static str;

    /// Semantic checks beyond what deserialization enforces
    fn validate(&self) -> Result<(), String> {
        Ok(())
    }

    /// Build a value from text that contained no JSON at all
    fn from_raw_text(_text: &str) -> Option<Self> {
        None
    }
}

/// Plain text answer, the most permissive schema
#[derive(Debug, Clone, PartialEq, Eq, Serialize, serde::Deserialize)]
pub struct TextResponse {
    pub text: String,
}

impl StructuredResponse for TextResponse {
    fn schema_name() -> &'static str {
        "TextResponse"
    }

    fn validate(&self) -> Result<(), String> {
        if self.text.trim().is_empty() {
            return Err("text must not be empty".to_string());
        }
        Ok(())
    }

    fn from_raw_text(text: &str) -> Option<Self> {
        let text = text.trim();
        (!text.is_empty()).then(|| TextResponse {
            text: text.to_string(),
        })
    }
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum JsonParseError {
    #[error("no JSON object found in response")]
    NoJson,
    #[error("JSON found but does not match {schema}: {message}")]
    Validation { schema: String, message: String },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Strategy {
    FencedBlock,
    FirstBalancedObject,
    WholeText,
    Repaired,
}

const STRATEGIES: [Strategy; 4] = [
    Strategy::FencedBlock,
    Strategy::FirstBalancedObject,
    Strategy::WholeText,
    Strategy::Repaired,
];

fn fence_regex() -> &'static Regex {
    static FENCE: OnceLock<Regex> = OnceLock::new();
    FENCE.get_or_init(|| {
        Regex::new(r"```[ \t]*(?:json|JSON)?[ \t]*\r?\n?([\s\S]*?)```").expect("valid fence regex")
    })
}

fn trailing_comma_regex() -> &'static Regex {
    static TRAILING: OnceLock<Regex> = OnceLock::new();
    TRAILING.get_or_init(|| Regex::new(r",(\s*[}\]])").expect("valid trailing comma regex"))
}

fn unquoted_key_regex() -> &'static Regex {
    static KEY: OnceLock<Regex> = OnceLock::new();
    KEY.get_or_init(|| {
        Regex::new(r"([{,]\s*)([A-Za-z_][A-Za-z0-9_]*)(\s*:)").expect("valid unquoted key regex")
    })
}

pub struct JsonParser;

impl JsonParser {
    /// Parse `text` into `T` and run its semantic validation.
    pub fn parse_structured<T: StructuredResponse>(text: &str) -> Result<T, JsonParseError> {
        Self::parse_with(text, T::schema_name(), |value: &T| value.validate())
    }

    /// Parse `text` into any deserializable type without semantic checks.
    pub fn parse<T: DeserializeOwned>(text: &str) -> Result<T, JsonParseError> {
        Self::parse_with(text, std::any::type_name::<T>(), |_: &T| Ok(()))
    }

    /// Convenience form that never fails
    pub fn try_parse<T: StructuredResponse>(text: &str) -> Option<T> {
        Self::parse_structured(text).ok()
    }

    /// First JSON object any strategy can produce, without schema checks
    pub fn extract_json(text: &str) -> Option<Value> {
        STRATEGIES
            .iter()
            .filter_map(|strategy| candidate(*strategy, text))
            .find_map(|c| serde_json::from_str::<Value>(&c).ok().filter(Value::is_object))
    }

    fn parse_with<T, F>(text: &str, schema: &str, validate: F) -> Result<T, JsonParseError>
    where
        T: DeserializeOwned,
        F: Fn(&T) -> Result<(), String>,
    {
        let mut mismatch: Option<String> = None;

        for strategy in STRATEGIES {
            let Some(candidate) = candidate(strategy, text) else {
                continue;
            };
            let Ok(value) = serde_json::from_str::<Value>(&candidate) else {
                continue;
            };
            if !value.is_object() {
                continue;
            }

            match serde_json::from_value::<T>(value) {
                Ok(parsed) => match validate(&parsed) {
                    Ok(()) => {
                        debug!("Extracted {} via {:?}", schema, strategy);
                        return Ok(parsed);
                    }
                    Err(message) => mismatch = Some(message),
                },
                Err(e) => mismatch = Some(e.to_string()),
            }
        }

        match mismatch {
            Some(message) => Err(JsonParseError::Validation {
                schema: schema.to_string(),
                message,
            }),
            None => Err(JsonParseError::NoJson),
        }
    }
}

fn candidate(strategy: Strategy, text: &str) -> Option<String> {
    match strategy {
        Strategy::FencedBlock => fenced_block(text),
        Strategy::FirstBalancedObject => first_balanced_object(text).map(str::to_string),
        Strategy::WholeText => {
            let trimmed = text.trim();
            (trimmed.starts_with('{') && trimmed.ends_with('}') && is_balanced(trimmed))
                .then(|| trimmed.to_string())
        }
        Strategy::Repaired => repair(text),
    }
}

fn fenced_block(text: &str) -> Option<String> {
    fence_regex().captures_iter(text).find_map(|captures| {
        let body = captures.get(1)?.as_str().trim();
        let looks_like_json = body.starts_with('{')
            && is_balanced(body)
            && serde_json::from_str::<Value>(body).is_ok();
        looks_like_json.then(|| body.to_string())
    })
}

/// Brace counting only; braces inside string literals are not special.
fn first_balanced_object(text: &str) -> Option<&str> {
    let start = text.find('{')?;
    let end = matching_close(&text[start..])?;
    Some(&text[start..start + end + 1])
}

fn matching_close(text: &str) -> Option<usize> {
    let mut depth = 0usize;
    for (index, ch) in text.char_indices() {
        match ch {
            '{' => depth += 1,
            '}' => {
                depth = depth.checked_sub(1)?;
                if depth == 0 {
                    return Some(index);
                }
            }
            _ => {}
        }
    }
    None
}

fn is_balanced(text: &str) -> bool {
    let mut depth = 0i64;
    for ch in text.chars() {
        match ch {
            '{' => depth += 1,
            '}' => {
                depth -= 1;
                if depth < 0 {
                    return false;
                }
            }
            _ => {}
        }
    }
    depth == 0
}

fn repair(text: &str) -> Option<String> {
    let start = text.find('{')?;
    let tail = &text[start..];
    let span = match matching_close(tail) {
        Some(end) => &tail[..=end],
        None => match tail.rfind('}') {
            Some(end) => &tail[..=end],
            None => tail,
        },
    };

    let without_trailing = trailing_comma_regex().replace_all(span.trim(), "$1");
    let mut repaired = unquoted_key_regex()
        .replace_all(&without_trailing, "$1\"$2\"$3")
        .into_owned();

    let opens = repaired.matches('{').count();
    let closes = repaired.matches('}').count();
    if opens > closes {
        repaired.push_str(&"}".repeat(opens - closes));
    }

    Some(repaired)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde::Deserialize;

    #[derive(Debug, PartialEq, Serialize, Deserialize)]
    struct Verdict {
        answer: String,
        confidence: f64,
    }

    impl StructuredResponse for Verdict {
        fn schema_name() -> &'static str {
            "Verdict"
        }

        fn validate(&self) -> Result<(), String> {
            if !(0.0..=1.0).contains(&self.confidence) {
                return Err("confidence out of range".to_string());
            }
            Ok(())
        }
    }

    #[test]
    fn test_fenced_json_block() {
        let text = "Here you go:\n```json\n{\"answer\": \"yes\", \"confidence\": 0.9}\n```\nThanks";
        let verdict: Verdict = JsonParser::parse_structured(text).unwrap();
        assert_eq!(verdict.answer, "yes");
    }

    #[test]
    fn test_untagged_fence_skipped_when_not_json() {
        let text = "```\nprint('hi')\n```\nResult: {\"answer\": \"no\", \"confidence\": 0.1}";
        let verdict: Verdict = JsonParser::parse_structured(text).unwrap();
        assert_eq!(verdict.answer, "no");
    }

    #[test]
    fn test_object_embedded_in_prose() {
        let text = "The verdict is {\"answer\": \"maybe\", \"confidence\": 0.5} as requested.";
        let verdict: Verdict = JsonParser::parse_structured(text).unwrap();
        assert_eq!(verdict.confidence, 0.5);
    }

    #[test]
    fn test_repairs_trailing_comma_and_unquoted_keys() {
        let text = "{answer: \"yes\", confidence: 0.75,}";
        let verdict: Verdict = JsonParser::parse_structured(text).unwrap();
        assert_eq!(
            verdict,
            Verdict {
                answer: "yes".to_string(),
                confidence: 0.75
            }
        );
    }

    #[test]
    fn test_repairs_missing_closing_brace() {
        let text = "{\"answer\": \"yes\", \"confidence\": 0.2";
        let verdict: Verdict = JsonParser::parse_structured(text).unwrap();
        assert_eq!(verdict.answer, "yes");
    }

    #[test]
    fn test_no_json_is_distinct_from_schema_mismatch() {
        let none = JsonParser::parse_structured::<Verdict>("no structure here at all");
        assert_eq!(none.unwrap_err(), JsonParseError::NoJson);

        let mismatch = JsonParser::parse_structured::<Verdict>("{\"answer\": \"yes\"}");
        assert!(matches!(mismatch, Err(JsonParseError::Validation { .. })));

        let invalid = JsonParser::parse_structured::<Verdict>(
            "{\"answer\": \"yes\", \"confidence\": 4.0}",
        );
        match invalid {
            Err(JsonParseError::Validation { message, .. }) => {
                assert!(message.contains("confidence"))
            }
            other => panic!("unexpected result: {:?}", other),
        }
    }

    #[test]
    fn test_empty_input() {
        assert_eq!(
            JsonParser::parse::<Value>("").unwrap_err(),
            JsonParseError::NoJson
        );
        assert!(JsonParser::try_parse::<TextResponse>("   ").is_none());
    }

    #[test]
    fn test_valid_json_is_not_repaired() {
        // Text with a colon inside a value would be mangled by key quoting
        let text = "{\"text\": \"a, note: here\"}";
        let parsed: TextResponse = JsonParser::parse_structured(text).unwrap();
        assert_eq!(parsed.text, "a, note: here");
    }

    #[test]
    fn test_extract_json_value() {
        let value = JsonParser::extract_json("prefix {\"a\": {\"b\": 1}} suffix").unwrap();
        assert_eq!(value["a"]["b"], 1);
        assert!(JsonParser::extract_json("[1, 2, 3]").is_none());
    }

    #[test]
    fn test_text_response_from_raw_text() {
        assert_eq!(
            TextResponse::from_raw_text("  hello  "),
            Some(TextResponse {
                text: "hello".to_string()
            })
        );
        assert!(TextResponse::from_raw_text("").is_none());
    }
}
