//! Digest of step results for the synthesis prompt.

use serde_json::{Map, Value};

use super::text::truncate_chars;

const CONTENT_LIMIT: usize = 5000;
const FIELD_LIMIT: usize = 1000;
const SCALAR_LIMIT: usize = 3000;

/// Text used when there is nothing to summarise.
pub const NO_RESULTS: &str = "(sin resultados)";

/// The error carried by a handler result, if any.
///
/// A result is an error when it is an object whose `error` field is a
/// non-empty string or any other non-null, non-false value.
pub fn result_error(result: &Value) -> Option<String> {
    match result.get("error")? {
        Value::Null | Value::Bool(false) => None,
        Value::String(s) if s.is_empty() => None,
        Value::String(s) => Some(s.clone()),
        other => Some(other.to_string()),
    }
}

/// Render results as readable text, separated by `---` lines.
///
/// Objects with a `summary_text` use it verbatim. Other objects are
/// flattened field by field: `content` and `body` keep up to 5000
/// characters, `html` is dropped, anything else keeps 1000. Strings and
/// scalars keep 3000 characters.
pub fn summarize_results(results: &[Value]) -> String {
    let parts: Vec<String> = results
        .iter()
        .filter(|r| !r.is_null())
        .map(|r| match r {
            Value::Object(obj) => match obj.get("summary_text") {
                Some(Value::String(text)) => truncate_chars(text, CONTENT_LIMIT),
                _ => render_record(obj),
            },
            Value::String(s) => truncate_chars(s, SCALAR_LIMIT),
            other => truncate_chars(&other.to_string(), SCALAR_LIMIT),
        })
        .collect();

    if parts.is_empty() {
        NO_RESULTS.to_string()
    } else {
        parts.join("\n---\n")
    }
}

fn render_record(obj: &Map<String, Value>) -> String {
    let flat: Map<String, Value> = obj
        .iter()
        .filter(|(key, _)| !key.starts_with('_') && key.as_str() != "html")
        .map(|(key, value)| {
            let text = match value {
                Value::String(s) => s.clone(),
                other => other.to_string(),
            };
            let limit = match key.as_str() {
                "content" | "body" => CONTENT_LIMIT,
                _ => FIELD_LIMIT,
            };
            (key.clone(), Value::String(truncate_chars(&text, limit)))
        })
        .collect();
    serde_json::to_string_pretty(&flat).unwrap_or_default()
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_summary_text_preferred() {
        let results = vec![json!({"summary_text": "📰 3 artículos", "articles_count": 3})];
        assert_eq!(summarize_results(&results), "📰 3 artículos");
    }

    #[test]
    fn test_record_drops_html_and_caps_fields() {
        let long = "x".repeat(6000);
        let results = vec![json!({
            "url": "https://example.com",
            "html": "<html></html>",
            "content": long,
            "title": "y".repeat(1500),
        })];
        let text = summarize_results(&results);
        assert!(!text.contains("<html>"));
        assert!(text.contains(&"x".repeat(5000)));
        assert!(!text.contains(&"x".repeat(5001)));
        assert!(!text.contains(&"y".repeat(1001)));
        assert!(text.contains("\"url\": \"https://example.com\""));
    }

    #[test]
    fn test_mixed_results_joined() {
        let results = vec![json!("texto"), Value::Null, json!(42)];
        assert_eq!(summarize_results(&results), "texto\n---\n42");
    }

    #[test]
    fn test_empty_results() {
        assert_eq!(summarize_results(&[]), NO_RESULTS);
        assert_eq!(summarize_results(&[Value::Null]), NO_RESULTS);
    }

    #[test]
    fn test_result_error() {
        assert_eq!(result_error(&json!({"error": "timeout"})), Some("timeout".into()));
        assert_eq!(result_error(&json!({"error": ""})), None);
        assert_eq!(result_error(&json!({"error": null, "ok": 1})), None);
        assert_eq!(result_error(&json!({"error": {"code": 500}})), Some("{\"code\":500}".into()));
        assert_eq!(result_error(&json!("plain")), None);
    }
}
