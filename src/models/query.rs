//! Query payload classification and flattening.

use serde_json::Value;

use crate::error::StageError;

/// The three accepted shapes of a retrieval query payload.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum QueryInput {
    /// A single query string.
    Scalar(String),
    /// A flat, ordered batch of non-empty query strings.
    Sequence(Vec<String>),
    /// Identifier to query string entries, in map order.
    KeyedMap(Vec<(String, String)>),
}

impl QueryInput {
    /// Classify the value found at `field`.
    ///
    /// Nested lists are flattened and empty strings (and nulls) dropped.
    /// Anything that is not a string, a list of strings, or a map of strings
    /// is rejected with [`StageError::InvalidInputType`].
    pub fn classify(field: &str, value: &Value) -> Result<Self, StageError> {
        match value {
            Value::String(s) => Ok(QueryInput::Scalar(s.clone())),
            Value::Array(items) => flatten_queries(field, items).map(QueryInput::Sequence),
            Value::Object(map) => map
                .iter()
                .map(|(k, v)| match v {
                    Value::String(s) => Ok((k.clone(), s.clone())),
                    other => Err(invalid(field, other)),
                })
                .collect::<Result<Vec<_>, _>>()
                .map(QueryInput::KeyedMap),
            other => Err(invalid(field, other)),
        }
    }

    pub fn kind(&self) -> &'static str {
        match self {
            QueryInput::Scalar(_) => "scalar",
            QueryInput::Sequence(_) => "sequence",
            QueryInput::KeyedMap(_) => "keyed_map",
        }
    }

    /// Number of individual queries this input will issue.
    pub fn len(&self) -> usize {
        match self {
            QueryInput::Scalar(_) => 1,
            QueryInput::Sequence(items) => items.len(),
            QueryInput::KeyedMap(entries) => entries.len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Flatten arbitrarily nested lists of strings into one flat list.
fn flatten_queries(field: &str, items: &[Value]) -> Result<Vec<String>, StageError> {
    let mut flat = Vec::new();
    flatten_into(field, items, &mut flat)?;
    Ok(flat)
}

fn flatten_into(field: &str, items: &[Value], out: &mut Vec<String>) -> Result<(), StageError> {
    for item in items {
        match item {
            Value::String(s) if s.is_empty() => {}
            Value::String(s) => out.push(s.clone()),
            Value::Null => {}
            Value::Array(nested) => flatten_into(field, nested, out)?,
            other => return Err(invalid(field, other)),
        }
    }
    Ok(())
}

fn invalid(field: &str, value: &Value) -> StageError {
    let found = match value {
        Value::Null => "null",
        Value::Bool(_) => "bool",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "list",
        Value::Object(_) => "map",
    };
    StageError::InvalidInputType {
        field: field.to_string(),
        found: found.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_classify_scalar() {
        let input = QueryInput::classify("q", &json!("binary search")).unwrap();
        assert_eq!(input, QueryInput::Scalar("binary search".to_string()));
        assert_eq!(input.kind(), "scalar");
    }

    #[test]
    fn test_classify_nested_sequence() {
        let value = json!([["a", "", "b"], [["c"]], "", "d", []]);
        let input = QueryInput::classify("q", &value).unwrap();
        assert_eq!(
            input,
            QueryInput::Sequence(vec!["a".into(), "b".into(), "c".into(), "d".into()])
        );
    }

    #[test]
    fn test_flatten_is_idempotent() {
        let value = json!([["parse json", ["read file", ""]], "sort list", null]);
        let once = flatten_queries("q", value.as_array().unwrap()).unwrap();
        let again_input: Vec<Value> = once.iter().cloned().map(Value::String).collect();
        let twice = flatten_queries("q", &again_input).unwrap();
        assert_eq!(once, twice);
        assert!(once.iter().all(|s| !s.is_empty()));
    }

    #[test]
    fn test_classify_keyed_map_keeps_order() {
        let value = json!({"c": "third", "a": "first", "b": "second"});
        let input = QueryInput::classify("q", &value).unwrap();
        assert_eq!(
            input,
            QueryInput::KeyedMap(vec![
                ("c".into(), "third".into()),
                ("a".into(), "first".into()),
                ("b".into(), "second".into()),
            ])
        );
    }

    #[test]
    fn test_classify_rejects_integer() {
        let err = QueryInput::classify("queries", &json!(42)).unwrap_err();
        match err {
            StageError::InvalidInputType { field, found } => {
                assert_eq!(field, "queries");
                assert_eq!(found, "number");
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn test_classify_rejects_non_string_leaf() {
        assert!(QueryInput::classify("q", &json!(["a", [1]])).is_err());
        assert!(QueryInput::classify("q", &json!({"a": ["b"]})).is_err());
        assert!(QueryInput::classify("q", &json!(true)).is_err());
    }

    #[test]
    fn test_empty_sequence() {
        let input = QueryInput::classify("q", &json!([[""], []])).unwrap();
        assert!(input.is_empty());
    }
}
