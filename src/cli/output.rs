use console::style;
use serde_json::Value;
use std::fmt::Write as FmtWrite;

use crate::models::{OutputFormat, RetrievalMethod};

pub trait Formatter {
    fn format_retrieval(&self, results: &RetrievalOutput) -> String;
    fn format_status(&self, status: &StatusInfo) -> String;
    fn format_message(&self, message: &str) -> String;
}

/// Documents returned by one retriever stage run from the CLI.
#[derive(Debug, Clone)]
pub struct RetrievalOutput {
    pub stage: String,
    pub shape: String,
    /// Output value under the stage key, exactly as the pipeline produced it.
    pub value: Value,
    pub duration_ms: u64,
}

impl RetrievalOutput {
    /// All documents, ignoring the one-level grouping used for batch input.
    pub fn documents(&self) -> Vec<&Value> {
        let mut docs = Vec::new();
        if let Value::Array(items) = &self.value {
            for item in items {
                match item {
                    Value::Array(group) => docs.extend(group.iter()),
                    other => docs.push(other),
                }
            }
        }
        docs
    }
}

#[derive(Debug, Clone)]
pub struct StatusInfo {
    pub embedding_url: String,
    pub embedding_healthy: bool,
    pub embedding_model: Option<String>,
    pub stages: Vec<StageStatus>,
}

#[derive(Debug, Clone)]
pub struct StageStatus {
    pub key: String,
    pub method: RetrievalMethod,
    pub index_name: String,
    pub connected: bool,
    pub error: Option<String>,
}

fn doc_content(doc: &Value) -> &str {
    doc.get("page_content").and_then(Value::as_str).unwrap_or("")
}

fn doc_source(doc: &Value) -> Option<&str> {
    doc.get("metadata")
        .and_then(|m| m.get("source"))
        .and_then(Value::as_str)
}

fn doc_score(doc: &Value) -> Option<f64> {
    doc.get("metadata")
        .and_then(|m| m.get("score"))
        .and_then(Value::as_f64)
}

fn preview(content: &str, max_chars: usize) -> String {
    let mut text: String = content.chars().take(max_chars).collect();
    if content.chars().count() > max_chars {
        text.push_str("...");
    }
    text
}

pub struct TextFormatter;

impl Formatter for TextFormatter {
    fn format_retrieval(&self, results: &RetrievalOutput) -> String {
        let docs = results.documents();
        if docs.is_empty() {
            return format!("No documents retrieved for stage: {}\n", results.stage);
        }

        let mut output = String::new();
        writeln!(
            output,
            "{} {} ({} input)",
            style("Retrieved for").bold(),
            style(&results.stage).cyan(),
            results.shape
        )
        .unwrap();
        writeln!(
            output,
            "Found {} documents in {}ms\n",
            docs.len(),
            results.duration_ms
        )
        .unwrap();

        for (i, doc) in docs.iter().enumerate() {
            match doc_score(doc) {
                Some(score) => writeln!(output, "{}. [Score: {:.3}]", i + 1, score).unwrap(),
                None => writeln!(output, "{}.", i + 1).unwrap(),
            }
            if let Some(source) = doc_source(doc) {
                writeln!(output, "   Source: {}", source).unwrap();
            }
            writeln!(output, "   ---").unwrap();
            for line in preview(doc_content(doc), 200).lines() {
                writeln!(output, "   {}", line).unwrap();
            }
            writeln!(output).unwrap();
        }

        output
    }

    fn format_status(&self, status: &StatusInfo) -> String {
        let mut output = String::new();
        writeln!(output, "{}", style("Status").bold()).unwrap();
        writeln!(output, "------").unwrap();

        let embedding = if status.embedding_healthy {
            style("[OK]").green()
        } else {
            style("[DOWN]").red()
        };
        writeln!(output, "Embedding:     {} {}", embedding, status.embedding_url).unwrap();
        if let Some(ref model) = status.embedding_model {
            writeln!(output, "  Model:       {}", model).unwrap();
        }

        for stage in &status.stages {
            let state = if stage.connected {
                style("[OK]").green()
            } else {
                style("[DOWN]").red()
            };
            writeln!(
                output,
                "Stage {}:  {} {} index '{}'",
                stage.key, state, stage.method, stage.index_name
            )
            .unwrap();
            if let Some(ref error) = stage.error {
                writeln!(output, "  Error:       {}", error).unwrap();
            }
        }

        output
    }

    fn format_message(&self, message: &str) -> String {
        message.to_string()
    }
}

pub struct JsonFormatter {
    pretty: bool,
}

impl JsonFormatter {
    pub fn new(pretty: bool) -> Self {
        Self { pretty }
    }

    fn render(&self, value: &Value) -> String {
        let text = if self.pretty {
            serde_json::to_string_pretty(value)
        } else {
            serde_json::to_string(value)
        };
        text.unwrap_or_else(|_| "{}".to_string()) + "\n"
    }
}

impl Formatter for JsonFormatter {
    fn format_retrieval(&self, results: &RetrievalOutput) -> String {
        let mut object = serde_json::Map::new();
        object.insert(results.stage.clone(), results.value.clone());
        self.render(&Value::Object(object))
    }

    fn format_status(&self, status: &StatusInfo) -> String {
        let stages: Vec<Value> = status
            .stages
            .iter()
            .map(|s| {
                serde_json::json!({
                    "key": s.key,
                    "method": s.method,
                    "index_name": s.index_name,
                    "connected": s.connected,
                    "error": s.error,
                })
            })
            .collect();
        self.render(&serde_json::json!({
            "embedding": {
                "url": status.embedding_url,
                "healthy": status.embedding_healthy,
                "model": status.embedding_model,
            },
            "stages": stages,
        }))
    }

    fn format_message(&self, message: &str) -> String {
        self.render(&serde_json::json!({ "message": message }))
    }
}

pub struct MarkdownFormatter;

impl Formatter for MarkdownFormatter {
    fn format_retrieval(&self, results: &RetrievalOutput) -> String {
        let docs = results.documents();
        let mut output = String::new();
        writeln!(output, "## Retrieved: `{}`\n", results.stage).unwrap();
        writeln!(
            output,
            "*{} documents, {} input, {}ms*\n",
            docs.len(),
            results.shape,
            results.duration_ms
        )
        .unwrap();

        for (i, doc) in docs.iter().enumerate() {
            let source = doc_source(doc).unwrap_or("unknown source");
            match doc_score(doc) {
                Some(score) => writeln!(output, "### {}. {} ({:.3})\n", i + 1, source, score),
                None => writeln!(output, "### {}. {}\n", i + 1, source),
            }
            .unwrap();
            writeln!(output, "```\n{}\n```\n", doc_content(doc)).unwrap();
        }

        output
    }

    fn format_status(&self, status: &StatusInfo) -> String {
        let mut output = String::new();
        writeln!(output, "## Status\n").unwrap();
        writeln!(output, "| Component | Target | State |").unwrap();
        writeln!(output, "|-----------|--------|-------|").unwrap();
        writeln!(
            output,
            "| Embedding | {} | {} |",
            status.embedding_url,
            if status.embedding_healthy { "ok" } else { "down" }
        )
        .unwrap();
        for stage in &status.stages {
            writeln!(
                output,
                "| {} ({}) | {} | {} |",
                stage.key,
                stage.method,
                stage.index_name,
                if stage.connected { "ok" } else { "down" }
            )
            .unwrap();
        }
        output
    }

    fn format_message(&self, message: &str) -> String {
        format!("> {}\n", message)
    }
}

pub fn get_formatter(format: OutputFormat) -> Box<dyn Formatter> {
    match format {
        OutputFormat::Text => Box::new(TextFormatter),
        OutputFormat::Json => Box::new(JsonFormatter::new(true)),
        OutputFormat::Markdown => Box::new(MarkdownFormatter),
    }
}
