//! Response Parser
//!
//! Extracts the structured answer from the model's free-text reply. Never
//! panics on arbitrary input; a reply with no usable JSON and no `SELECT`
//! substring yields `InsightError::Parse`.

use crate::error::{InsightError, Result};
use lazy_static::lazy_static;
use regex::Regex;
use serde_json::{Map, Value};

lazy_static! {
    static ref FENCE: Regex = Regex::new(r"(?i)```(?:json|sql)?[ \t]*\r?\n?").unwrap();
    static ref SELECT_WORD: Regex = Regex::new(r"(?i)\bselect\b").unwrap();
}

/// Fields pulled out of a reply. Chart type and insights are checked against
/// the closed enum and the length cap later, by the orchestrator.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ParsedResponse {
    pub sql_query: Option<String>,
    pub chart_type: Option<String>,
    pub response_message: Option<String>,
    /// `None` when the reply had no `insights` array at all.
    pub insights: Option<Vec<String>>,
    /// Set when the JSON was unusable and the SQL was recovered by pattern match.
    pub salvaged: bool,
}

#[derive(Debug, Clone, Copy, Default)]
pub struct ResponseParser;

impl ResponseParser {
    pub fn new() -> Self {
        Self
    }

    pub fn parse(&self, raw: &str) -> Result<ParsedResponse> {
        let cleaned = FENCE.replace_all(raw, "");
        let cleaned = cleaned.trim();

        if let Some(object) = parse_object(cleaned).or_else(|| embedded_object(cleaned)) {
            return Ok(from_object(&object));
        }

        match salvage_select(cleaned) {
            Some(sql) => Ok(ParsedResponse {
                sql_query: Some(sql),
                salvaged: true,
                ..ParsedResponse::default()
            }),
            None => Err(InsightError::Parse(format!(
                "no JSON object or SELECT statement in model reply ({} chars)",
                raw.len()
            ))),
        }
    }
}

fn parse_object(text: &str) -> Option<Map<String, Value>> {
    match serde_json::from_str::<Value>(text) {
        Ok(Value::Object(map)) => Some(map),
        _ => None,
    }
}

/// JSON object surrounded by prose: try the outermost braces.
fn embedded_object(text: &str) -> Option<Map<String, Value>> {
    let start = text.find('{')?;
    let end = text.rfind('}')?;
    if end <= start {
        return None;
    }
    parse_object(&text[start..=end])
}

fn from_object(object: &Map<String, Value>) -> ParsedResponse {
    let text = |key: &str| {
        object
            .get(key)
            .and_then(Value::as_str)
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .map(str::to_string)
    };

    let insights = object.get("insights").and_then(Value::as_array).map(|items| {
        items
            .iter()
            .filter_map(Value::as_str)
            .map(|s| s.trim().to_string())
            .filter(|s| !s.is_empty())
            .collect()
    });

    ParsedResponse {
        sql_query: text("sqlQuery"),
        chart_type: text("chartType"),
        response_message: text("responseMessage"),
        insights,
        salvaged: false,
    }
}

/// `SELECT ...` up to the first blank line. When the match sits inside a
/// quoted string (broken JSON), it ends at the closing quote instead.
fn salvage_select(text: &str) -> Option<String> {
    let found = SELECT_WORD.find(text)?;
    let rest = &text[found.start()..];

    let quoted = text[..found.start()].ends_with('"');
    let end = if quoted {
        closing_quote(rest).unwrap_or(rest.len())
    } else {
        rest.find("\n\n").unwrap_or(rest.len())
    };

    let slice = &rest[..end];
    // Inside a JSON string the escapes are still encoded.
    let decoded = if quoted {
        serde_json::from_str::<String>(&format!("\"{}\"", slice)).unwrap_or_else(|_| slice.to_string())
    } else {
        slice.to_string()
    };

    let sql = decoded.trim();
    if sql.is_empty() {
        None
    } else {
        Some(sql.to_string())
    }
}

fn closing_quote(text: &str) -> Option<usize> {
    let mut escaped = false;
    for (i, c) in text.char_indices() {
        match c {
            '\\' if !escaped => escaped = true,
            '"' if !escaped => return Some(i),
            _ => escaped = false,
        }
    }
    None
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parses_fenced_json() {
        let raw = "```json\n{\"sqlQuery\": \"SELECT 1\", \"chartType\": \"bar\", \"responseMessage\": \"Here you go\", \"insights\": [\"a\", \"b\"]}\n```";
        let parsed = ResponseParser::new().parse(raw).unwrap();
        assert_eq!(parsed.sql_query.as_deref(), Some("SELECT 1"));
        assert_eq!(parsed.chart_type.as_deref(), Some("bar"));
        assert_eq!(parsed.response_message.as_deref(), Some("Here you go"));
        assert_eq!(parsed.insights, Some(vec!["a".to_string(), "b".to_string()]));
        assert!(!parsed.salvaged);
    }

    #[test]
    fn test_missing_and_wrongly_typed_fields_default() {
        let raw = r#"{"sqlQuery": 42, "chartType": null, "insights": "not a list"}"#;
        let parsed = ResponseParser::new().parse(raw).unwrap();
        assert_eq!(parsed, ParsedResponse::default());
    }

    #[test]
    fn test_non_string_insights_are_dropped() {
        let raw = r#"{"sqlQuery": "SELECT 1", "insights": ["ok", 3, {"x": 1}, ""]}"#;
        let parsed = ResponseParser::new().parse(raw).unwrap();
        assert_eq!(parsed.insights, Some(vec!["ok".to_string()]));
    }

    #[test]
    fn test_json_wrapped_in_prose() {
        let raw = "Sure! Here's the result:\n{\"sqlQuery\": \"SELECT id FROM users\", \"chartType\": \"table\"}\nHope that helps.";
        let parsed = ResponseParser::new().parse(raw).unwrap();
        assert_eq!(parsed.sql_query.as_deref(), Some("SELECT id FROM users"));
        assert!(!parsed.salvaged);
    }

    #[test]
    fn test_salvages_select_from_prose() {
        let raw = "I think this works:\nSELECT name FROM products\nORDER BY name\n\nLet me know.";
        let parsed = ResponseParser::new().parse(raw).unwrap();
        assert_eq!(parsed.sql_query.as_deref(), Some("SELECT name FROM products\nORDER BY name"));
        assert!(parsed.salvaged);
    }

    #[test]
    fn test_salvages_select_from_truncated_json() {
        let raw = r#"{"sqlQuery": "SELECT id FROM orders WHERE status = \"paid\"", "chartType": "tab"#;
        let parsed = ResponseParser::new().parse(raw).unwrap();
        assert_eq!(parsed.sql_query.as_deref(), Some(r#"SELECT id FROM orders WHERE status = "paid""#));
        assert!(parsed.salvaged);
    }

    #[test]
    fn test_salvaged_json_string_escapes_are_decoded() {
        let raw = r#"{"sqlQuery": "SELECT name,\n  price FROM products WHERE path = 'a\\b'", "insights": ["#;
        let parsed = ResponseParser::new().parse(raw).unwrap();
        assert_eq!(parsed.sql_query.as_deref(), Some("SELECT name,\n  price FROM products WHERE path = 'a\\b'"));
    }

    #[test]
    fn test_never_panics_on_garbage() {
        let parser = ResponseParser::new();
        for raw in ["", "   ", "plain prose only", "{{{{", "}{", "[1, 2, {\"a\": [}", "\"just a string\"", "```", "\u{1F600} ünïcödé {"] {
            assert!(matches!(parser.parse(raw), Err(InsightError::Parse(_))), "input {:?}", raw);
        }
    }
}
