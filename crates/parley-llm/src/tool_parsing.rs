//! # Tool call argument parsing
//!
//! Models send tool arguments either as a JSON object or as a JSON-encoded
//! string (possibly empty while streaming). Parsing never fails the stream: a
//! bad payload is recorded on the [`ToolCallRecord`] and turned into an
//! error-text result by the executor.

use parley_core::ToolCallRecord;
use serde_json::{Map, Value};
use tracing::warn;

/// Parse raw argument text into an object.
///
/// Empty or missing text is an empty object. Anything that is not a JSON
/// object is an error.
pub fn parse_tool_arguments(raw: Option<&str>) -> Result<Map<String, Value>, String> {
    let Some(raw) = raw.map(str::trim).filter(|s| !s.is_empty()) else {
        return Ok(Map::new());
    };
    match serde_json::from_str::<Value>(raw) {
        Ok(Value::Object(map)) => Ok(map),
        Ok(other) => Err(format!("expected a JSON object, got {}", json_type(&other))),
        Err(e) => Err(e.to_string()),
    }
}

/// Accept arguments given as an object, a JSON string, or null.
pub fn arguments_from_value(value: &Value) -> Result<Map<String, Value>, String> {
    match value {
        Value::Object(map) => Ok(map.clone()),
        Value::String(s) => parse_tool_arguments(Some(s)),
        Value::Null => Ok(Map::new()),
        other => Err(format!("expected a JSON object, got {}", json_type(other))),
    }
}

/// Build a call record, keeping the parse error on the record.
pub fn tool_call_record(
    call_id: impl Into<String>,
    name: impl Into<String>,
    raw_arguments: Option<&str>,
    provider: &str,
) -> ToolCallRecord {
    let call_id = call_id.into();
    let name = name.into();
    match parse_tool_arguments(raw_arguments) {
        Ok(arguments) => ToolCallRecord {
            call_id,
            name,
            arguments,
            error: None,
        },
        Err(error) => {
            warn!(
                provider,
                tool_call_id = %call_id,
                tool_name = %name,
                error = %error,
                "failed to parse tool call arguments"
            );
            ToolCallRecord {
                call_id,
                name,
                arguments: Map::new(),
                error: Some(error),
            }
        }
    }
}

fn json_type(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "boolean",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn empty_and_missing_are_empty_objects() {
        assert!(parse_tool_arguments(None).unwrap().is_empty());
        assert!(parse_tool_arguments(Some("  \n ")).unwrap().is_empty());
    }

    #[test]
    fn object_parses() {
        let args = parse_tool_arguments(Some(r#"{"query":"rust","limit":3}"#)).unwrap();
        assert_eq!(args["query"], "rust");
        assert_eq!(args["limit"], 3);
    }

    #[test]
    fn non_object_is_an_error() {
        let err = parse_tool_arguments(Some("[1,2]")).unwrap_err();
        assert_eq!(err, "expected a JSON object, got array");
    }

    #[test]
    fn truncated_json_is_an_error() {
        assert!(parse_tool_arguments(Some(r#"{"query": "ru"#)).is_err());
    }

    #[test]
    fn value_forms() {
        assert_eq!(arguments_from_value(&json!({"a": 1})).unwrap()["a"], 1);
        assert_eq!(arguments_from_value(&json!("{\"a\": 2}")).unwrap()["a"], 2);
        assert!(arguments_from_value(&Value::Null).unwrap().is_empty());
        assert!(arguments_from_value(&json!(5)).is_err());
    }

    #[test]
    fn record_keeps_error() {
        let call = tool_call_record("c1", "web_search", Some("nope"), "test");
        assert_eq!(call.call_id, "c1");
        assert!(call.arguments.is_empty());
        assert!(call.error.is_some());

        let call = tool_call_record("c2", "web_search", Some(r#"{"query":"x"}"#), "test");
        assert!(call.error.is_none());
        assert_eq!(call.arguments["query"], "x");
    }
}
