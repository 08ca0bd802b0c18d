use serde::Serialize;

/// One decoded unit of agent output: a parsed JSON value or opaque text.
///
/// No schema is enforced beyond "valid JSON or not" — the agent's line
/// framing is not guaranteed to always be JSON, so malformed lines fall
/// back to text instead of erroring.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(untagged)]
pub enum Record {
    Json(serde_json::Value),
    Text(String),
}

impl Record {
    /// Classify one framed line. Never fails: anything that is not strict
    /// JSON becomes a text record holding the trimmed line.
    pub fn decode(line: &str) -> Record {
        let trimmed = line.trim();
        match serde_json::from_str::<serde_json::Value>(trimmed) {
            Ok(value) => Record::Json(value),
            Err(_) => Record::Text(trimmed.to_string()),
        }
    }

    pub fn as_json(&self) -> Option<&serde_json::Value> {
        match self {
            Record::Json(value) => Some(value),
            Record::Text(_) => None,
        }
    }

    pub fn as_text(&self) -> Option<&str> {
        match self {
            Record::Text(text) => Some(text),
            Record::Json(_) => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn valid_json_object_decodes_to_structure() {
        assert_eq!(
            Record::decode(r#"{"type":"message","n":2}"#),
            Record::Json(json!({"type": "message", "n": 2}))
        );
    }

    #[test]
    fn json_scalars_and_arrays_are_structured() {
        assert_eq!(Record::decode("42"), Record::Json(json!(42)));
        assert_eq!(Record::decode("null"), Record::Json(json!(null)));
        assert_eq!(Record::decode("[1,2]"), Record::Json(json!([1, 2])));
    }

    #[test]
    fn malformed_json_falls_back_to_text() {
        assert_eq!(
            Record::decode(r#"{"unterminated": "#),
            Record::Text(r#"{"unterminated":"#.to_string())
        );
        assert_eq!(
            Record::decode("plain progress output"),
            Record::Text("plain progress output".to_string())
        );
    }

    #[test]
    fn text_fallback_is_trimmed() {
        assert_eq!(
            Record::decode("  spaced out  "),
            Record::Text("spaced out".to_string())
        );
    }

    #[test]
    fn json_split_across_chunks_reassembles_through_framer() {
        let mut framer = crate::LineFramer::new();
        let mut records = Vec::new();
        for chunk in ["{\"a\":1}\n{\"b\":2", "}\n"] {
            for line in framer.feed(chunk) {
                records.push(Record::decode(&line));
            }
        }
        assert_eq!(
            records,
            vec![Record::Json(json!({"a": 1})), Record::Json(json!({"b": 2}))]
        );
    }
}
