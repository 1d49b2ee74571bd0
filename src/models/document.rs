use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// A retrieved artifact: the stored text plus whatever metadata the index kept
/// alongside it (source identifier, score, point id).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Document {
    pub page_content: String,
    #[serde(default)]
    pub metadata: Map<String, Value>,
}

impl Document {
    pub fn new(page_content: impl Into<String>) -> Self {
        Self {
            page_content: page_content.into(),
            metadata: Map::new(),
        }
    }

    #[must_use]
    pub fn with_metadata(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.metadata.insert(key.into(), value.into());
        self
    }

    /// Source identifier stored with the document, if any.
    pub fn source(&self) -> Option<&str> {
        self.metadata.get("source").and_then(Value::as_str)
    }

    /// Similarity score attached by the backend, if any.
    pub fn score(&self) -> Option<f64> {
        self.metadata.get("score").and_then(Value::as_f64)
    }
}

impl From<Document> for Value {
    fn from(doc: Document) -> Self {
        let mut object = Map::new();
        object.insert("page_content".to_string(), Value::String(doc.page_content));
        object.insert("metadata".to_string(), Value::Object(doc.metadata));
        Value::Object(object)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_document_metadata_accessors() {
        let doc = Document::new("fn main() {}")
            .with_metadata("source", "src/main.rs")
            .with_metadata("score", 0.75);
        assert_eq!(doc.source(), Some("src/main.rs"));
        assert_eq!(doc.score(), Some(0.75));
    }

    #[test]
    fn test_document_json_shape() {
        let doc = Document::new("x").with_metadata("source", "a.py");
        let json = serde_json::to_value(&doc).unwrap();
        assert_eq!(json["page_content"], "x");
        assert_eq!(json["metadata"]["source"], "a.py");

        let parsed: Document = serde_json::from_str(r#"{"page_content":"y"}"#).unwrap();
        assert!(parsed.metadata.is_empty());
    }
}
