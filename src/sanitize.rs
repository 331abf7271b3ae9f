use serde_json::Value;

/// Strip characters that could break out of markup and trim whitespace.
pub fn sanitize_input(input: &str) -> String {
    input
        .chars()
        .filter(|c| !matches!(c, '<' | '>' | '"' | '\'' | '&'))
        .collect::<String>()
        .trim()
        .to_string()
}

/// Apply [`sanitize_input`] to every string inside a JSON value. Object keys
/// are left alone.
pub fn sanitize_value(value: Value) -> Value {
    match value {
        Value::String(s) => Value::String(sanitize_input(&s)),
        Value::Array(items) => Value::Array(items.into_iter().map(sanitize_value).collect()),
        Value::Object(map) => Value::Object(
            map.into_iter()
                .map(|(key, value)| (key, sanitize_value(value)))
                .collect(),
        ),
        other => other,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn strips_markup_characters() {
        assert_eq!(
            sanitize_input("  <script>alert('x')</script> & more "),
            "scriptalert(x)/script  more"
        );
        assert_eq!(sanitize_input("plain"), "plain");
    }

    #[test]
    fn sanitizes_nested_strings_only() {
        let value = json!({
            "name": " <b>Jane</b> ",
            "age": 41,
            "tags": ["a&b", null],
            "notes": {"text": "\"quoted\""}
        });
        assert_eq!(
            sanitize_value(value),
            json!({
                "name": "bJane/b",
                "age": 41,
                "tags": ["ab", null],
                "notes": {"text": "quoted"}
            })
        );
    }
}
