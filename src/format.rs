use serde_json::Value;

pub const NO_RESULTS: &str = "No results available";

const TEXT_FIELDS: [&str; 6] = ["text", "content", "message", "response", "answer", "result"];

/// Collapse whatever the inference flow returned into one display string.
///
/// Never fails: anything without a recognisable text slot is pretty-printed.
pub fn format_analysis_result(result: &Value) -> String {
    let object = match result {
        Value::String(text) => return text.clone(),
        Value::Null => return NO_RESULTS.to_string(),
        Value::Object(object) => object,
        Value::Array(_) => return pretty(result),
        other => return other.to_string(),
    };

    match object.get("outputs") {
        Some(Value::Object(outputs)) if !outputs.is_empty() => {
            let mut keys: Vec<&String> = outputs.keys().collect();
            keys.sort();
            if let Some(Value::String(first)) = outputs.get(keys[0]) {
                return first.clone();
            }
            return keys
                .iter()
                .map(|key| stringify(&outputs[key.as_str()]))
                .collect::<Vec<_>>()
                .join("\n\n");
        }
        Some(Value::Array(outputs)) => {
            return outputs.iter().map(stringify).collect::<Vec<_>>().join("\n\n");
        }
        _ => {}
    }

    for field in ["output", "out-0"] {
        if let Some(value) = object.get(field).filter(|value| is_truthy(value)) {
            return stringify(value);
        }
    }

    for field in TEXT_FIELDS {
        if let Some(Value::String(text)) = object.get(field) {
            if !text.is_empty() {
                return text.clone();
            }
        }
    }

    pretty(result)
}

pub(crate) fn stringify(value: &Value) -> String {
    match value {
        Value::String(text) => text.clone(),
        other => pretty(other),
    }
}

fn pretty(value: &Value) -> String {
    serde_json::to_string_pretty(value).unwrap_or_else(|_| value.to_string())
}

pub(crate) fn is_truthy(value: &Value) -> bool {
    match value {
        Value::Null => false,
        Value::Bool(flag) => *flag,
        Value::Number(number) => number.as_f64().map(|n| n != 0.0).unwrap_or(true),
        Value::String(text) => !text.is_empty(),
        Value::Array(_) | Value::Object(_) => true,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn strings_pass_through_unchanged() {
        for text in ["", "plain", "Priority 1: Jane Doe\nScore: 3/5 (60%)"] {
            assert_eq!(format_analysis_result(&json!(text)), text);
        }
    }

    #[test]
    fn null_yields_sentinel() {
        assert_eq!(format_analysis_result(&Value::Null), NO_RESULTS);
    }

    #[test]
    fn outputs_map_picks_lexicographically_first_key() {
        let raw = json!({ "outputs": { "out-1": "b", "out-0": "a" } });
        assert_eq!(format_analysis_result(&raw), "a");
    }

    #[test]
    fn outputs_map_joins_when_first_value_is_not_text() {
        let raw = json!({ "outputs": { "out-0": { "score": 3 }, "out-1": "tail" } });
        assert_eq!(
            format_analysis_result(&raw),
            "{\n  \"score\": 3\n}\n\ntail"
        );
    }

    #[test]
    fn outputs_array_is_joined_with_blank_lines() {
        let raw = json!({ "outputs": ["first", ["x"]] });
        assert_eq!(format_analysis_result(&raw), "first\n\n[\n  \"x\"\n]");
    }

    #[test]
    fn singular_output_fields_are_checked_in_order() {
        assert_eq!(
            format_analysis_result(&json!({ "output": "from output", "out-0": "ignored" })),
            "from output"
        );
        assert_eq!(format_analysis_result(&json!({ "out-0": "inner" })), "inner");
        assert_eq!(
            format_analysis_result(&json!({ "output": "", "out-0": "inner" })),
            "inner"
        );
    }

    #[test]
    fn falls_back_to_common_text_fields() {
        assert_eq!(format_analysis_result(&json!({ "text": "hello" })), "hello");
        assert_eq!(
            format_analysis_result(&json!({ "text": 4, "answer": "forty-two" })),
            "forty-two"
        );
    }

    #[test]
    fn unknown_objects_are_pretty_printed() {
        let raw = json!({ "status": "done" });
        assert_eq!(format_analysis_result(&raw), "{\n  \"status\": \"done\"\n}");
        assert_eq!(format_analysis_result(&json!(42)), "42");
    }

    #[test]
    fn empty_outputs_map_falls_through() {
        let raw = json!({ "outputs": {}, "message": "fallback" });
        assert_eq!(format_analysis_result(&raw), "fallback");
    }
}
