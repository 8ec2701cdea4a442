//! Agent tools: declarations, invokers, and the registry.
//!
//! Each tool declares a name, a one-line description, and a typed
//! parameter specification (a small JSON-schema subset: an object with
//! primitive-typed properties and a required list), plus an async invoker
//! bound to the document store, email sender, and model.
//!
//! # Built-in Tools
//!
//! | Tool | Purpose |
//! |------|---------|
//! | `searchDocuments` | semantic search with optional keyword refinement |
//! | `summarizeDocument` | locate one document by name and summarize it |
//! | `sendEmail` | send an email on the user's behalf |
//! | `getDocumentStats` | corpus size and collection name |
//!
//! Tool failures are ordinary `Err` returns; the orchestrator reflects
//! them into the conversation as error payloads so the model can decide
//! how to recover.

use anyhow::{bail, Result};
use async_trait::async_trait;
use serde_json::{json, Value};
use std::sync::Arc;

use crate::email::EmailSender;
use crate::model::{ModelClient, ToolDeclaration};
use crate::vector_store::{DocumentStore, SearchOptions};

// ============ Parameter schemas ============

/// Primitive parameter types supported by the schema subset.
#[derive(Debug, Clone, Copy)]
pub enum ParamKind {
    String,
    Integer,
}

/// One declared tool parameter.
#[derive(Debug, Clone)]
pub struct ParamSpec {
    pub name: &'static str,
    pub kind: ParamKind,
    pub description: &'static str,
    pub required: bool,
}

/// Render a parameter list as a JSON-schema object.
pub fn schema_object(params: &[ParamSpec]) -> Value {
    let mut properties = serde_json::Map::new();
    let mut required = Vec::new();

    for param in params {
        let kind = match param.kind {
            ParamKind::String => "string",
            ParamKind::Integer => "integer",
        };
        properties.insert(
            param.name.to_string(),
            json!({ "type": kind, "description": param.description }),
        );
        if param.required {
            required.push(param.name);
        }
    }

    json!({ "type": "object", "properties": properties, "required": required })
}

fn required_str<'a>(params: &'a Value, key: &str) -> Result<&'a str> {
    match params.get(key).and_then(|v| v.as_str()) {
        Some(s) if !s.trim().is_empty() => Ok(s),
        _ => bail!("parameter '{}' is required", key),
    }
}

// ============ Tool trait & context ============

/// Bridge handed to every tool invocation.
#[derive(Clone)]
pub struct ToolContext {
    pub store: DocumentStore,
    pub email: Arc<dyn EmailSender>,
    pub model: Arc<dyn ModelClient>,
    /// Deployment-configured distance gate for `searchDocuments`;
    /// `None` means no gate.
    pub distance_cutoff: Option<f32>,
}

/// A tool the model can discover and call.
#[async_trait]
pub trait Tool: Send + Sync {
    /// Wire name the model calls the tool by (e.g. `"searchDocuments"`).
    fn name(&self) -> &str;

    /// One-line description for model discovery.
    fn description(&self) -> &str;

    /// JSON-schema parameters object.
    fn parameters_schema(&self) -> Value;

    /// Execute with model-supplied parameters.
    async fn invoke(&self, params: Value, ctx: &ToolContext) -> Result<Value>;
}

// ============ searchDocuments ============

/// Semantic corpus search with optional lexical refinement.
pub struct SearchDocumentsTool;

const SEARCH_PARAMS: &[ParamSpec] = &[
    ParamSpec {
        name: "query",
        kind: ParamKind::String,
        description: "Semantic search query",
        required: true,
    },
    ParamSpec {
        name: "keyword",
        kind: ParamKind::String,
        description: "Exact keyword the document text must contain",
        required: false,
    },
    ParamSpec {
        name: "nResults",
        kind: ParamKind::Integer,
        description: "Maximum number of results (default 10)",
        required: false,
    },
];

#[async_trait]
impl Tool for SearchDocumentsTool {
    fn name(&self) -> &str {
        "searchDocuments"
    }

    fn description(&self) -> &str {
        "Search the document corpus by meaning, optionally requiring an exact keyword"
    }

    fn parameters_schema(&self) -> Value {
        schema_object(SEARCH_PARAMS)
    }

    async fn invoke(&self, params: Value, ctx: &ToolContext) -> Result<Value> {
        let query = required_str(&params, "query")?;
        let keyword = params
            .get("keyword")
            .and_then(|v| v.as_str())
            .filter(|s| !s.trim().is_empty())
            .map(|s| s.to_string());
        let n = params
            .get("nResults")
            .and_then(|v| v.as_u64())
            .unwrap_or(10) as usize;

        let opts = SearchOptions {
            keyword,
            max_distance: ctx.distance_cutoff,
            metadata_filter: None,
        };
        let hits = ctx.store.search(query, n, &opts).await?;

        let results: Vec<Value> = hits
            .iter()
            .map(|hit| {
                json!({
                    "googleLink": hit.drive_link,
                    "fileName": format!("{}{}", hit.metadata.name, hit.metadata.extension),
                    "folderPath": hit.metadata.folder_path,
                    "path": hit.path,
                    "distance": format!("{:.4}", hit.distance),
                })
            })
            .collect();

        Ok(json!({
            "success": true,
            "count": results.len(),
            "results": results,
        }))
    }
}

// ============ summarizeDocument ============

/// Locate one document by name and summarize its text with a separate
/// plain model call.
pub struct SummarizeDocumentTool;

const SUMMARIZE_PARAMS: &[ParamSpec] = &[
    ParamSpec {
        name: "documentName",
        kind: ParamKind::String,
        description: "Name of the document to summarize",
        required: true,
    },
    ParamSpec {
        name: "maxLength",
        kind: ParamKind::Integer,
        description: "Maximum summary length in words (default 200)",
        required: false,
    },
    ParamSpec {
        name: "query",
        kind: ParamKind::String,
        description: "What the summary should focus on",
        required: true,
    },
];

/// Common file extensions stripped before the fallback keyword lookup.
const STRIPPED_EXTENSIONS: &[&str] = &[
    ".pdf", ".docx", ".doc", ".xlsx", ".xls", ".pptx", ".txt", ".md", ".csv",
];

fn strip_known_extension(name: &str) -> &str {
    let lower = name.to_lowercase();
    for ext in STRIPPED_EXTENSIONS {
        if lower.ends_with(ext) {
            return &name[..name.len() - ext.len()];
        }
    }
    name
}

fn word_count(text: &str) -> usize {
    text.split_whitespace().count()
}

#[async_trait]
impl Tool for SummarizeDocumentTool {
    fn name(&self) -> &str {
        "summarizeDocument"
    }

    fn description(&self) -> &str {
        "Summarize a single document from the corpus, found by its name"
    }

    fn parameters_schema(&self) -> Value {
        schema_object(SUMMARIZE_PARAMS)
    }

    async fn invoke(&self, params: Value, ctx: &ToolContext) -> Result<Value> {
        let document_name = required_str(&params, "documentName")?;
        let query = required_str(&params, "query")?;
        let max_length = params
            .get("maxLength")
            .and_then(|v| v.as_u64())
            .unwrap_or(200);

        // Exact metadata match first; keyword lookup as fallback.
        let mut filter = serde_json::Map::new();
        filter.insert("name".to_string(), json!(document_name));
        let exact = ctx
            .store
            .search(
                document_name,
                1,
                &SearchOptions {
                    metadata_filter: Some(filter),
                    ..SearchOptions::default()
                },
            )
            .await?;

        let hit = match exact.into_iter().next() {
            Some(hit) => Some(hit),
            None => {
                let stripped = strip_known_extension(document_name).to_string();
                ctx.store
                    .search(
                        &stripped,
                        5,
                        &SearchOptions {
                            keyword: Some(stripped.clone()),
                            ..SearchOptions::default()
                        },
                    )
                    .await?
                    .into_iter()
                    .next()
            }
        };

        let Some(hit) = hit else {
            return Ok(json!({
                "success": false,
                "message": format!("Document '{}' not found in the database", document_name),
            }));
        };

        let prompt = format!(
            "Create a summary of the following document in at most {} words. \
             Focus on: {}.\n\nDocument:\n{}",
            max_length, query, hit.text
        );
        let summary = ctx.model.chat(&prompt).await?;

        Ok(json!({
            "success": true,
            "documentName": hit.metadata.name,
            "folderPath": hit.metadata.folder_path,
            "googleLink": hit.drive_link,
            "extension": hit.metadata.extension,
            "summary": summary,
            "originalLength": word_count(&hit.text),
            "summaryWordCount": word_count(&summary),
        }))
    }
}

// ============ sendEmail ============

/// Send an email through the configured sender.
pub struct SendEmailTool;

const EMAIL_PARAMS: &[ParamSpec] = &[
    ParamSpec {
        name: "to",
        kind: ParamKind::String,
        description: "Recipient email address",
        required: true,
    },
    ParamSpec {
        name: "subject",
        kind: ParamKind::String,
        description: "Email subject",
        required: true,
    },
    ParamSpec {
        name: "message",
        kind: ParamKind::String,
        description: "Email body",
        required: true,
    },
    ParamSpec {
        name: "recipientName",
        kind: ParamKind::String,
        description: "Recipient name for the greeting",
        required: false,
    },
];

#[async_trait]
impl Tool for SendEmailTool {
    fn name(&self) -> &str {
        "sendEmail"
    }

    fn description(&self) -> &str {
        "Send an email to the given address"
    }

    fn parameters_schema(&self) -> Value {
        schema_object(EMAIL_PARAMS)
    }

    async fn invoke(&self, params: Value, ctx: &ToolContext) -> Result<Value> {
        let to = required_str(&params, "to")?;
        let subject = required_str(&params, "subject")?;
        let message = required_str(&params, "message")?;
        let recipient_name = params.get("recipientName").and_then(|v| v.as_str());

        let body = match recipient_name {
            Some(name) if !name.trim().is_empty() => {
                format!("Dear {},<br><br>{}", name, message)
            }
            _ => message.to_string(),
        };

        ctx.email.send(to, subject, &body).await?;

        Ok(json!({
            "success": true,
            "message": "Email sent",
            "sentEmail": { "to": to, "subject": subject, "body": body },
        }))
    }
}

// ============ getDocumentStats ============

/// Report corpus size and collection name.
pub struct GetDocumentStatsTool;

#[async_trait]
impl Tool for GetDocumentStatsTool {
    fn name(&self) -> &str {
        "getDocumentStats"
    }

    fn description(&self) -> &str {
        "Report how many documents are indexed"
    }

    fn parameters_schema(&self) -> Value {
        schema_object(&[])
    }

    async fn invoke(&self, _params: Value, ctx: &ToolContext) -> Result<Value> {
        let stats = ctx.store.stats().await?;
        Ok(json!({
            "success": true,
            "count": stats.count,
            "name": stats.name,
        }))
    }
}

// ============ Registry ============

/// Registry of tools exposed to the model.
pub struct ToolRegistry {
    tools: Vec<Box<dyn Tool>>,
}

impl ToolRegistry {
    /// Create an empty registry.
    pub fn new() -> Self {
        Self { tools: Vec::new() }
    }

    /// Create a registry pre-loaded with all built-in tools.
    pub fn with_builtins() -> Self {
        let mut registry = Self::new();
        registry.register(Box::new(SearchDocumentsTool));
        registry.register(Box::new(SummarizeDocumentTool));
        registry.register(Box::new(SendEmailTool));
        registry.register(Box::new(GetDocumentStatsTool));
        registry
    }

    /// Register a tool.
    pub fn register(&mut self, tool: Box<dyn Tool>) {
        self.tools.push(tool);
    }

    /// Find a tool by name.
    pub fn find(&self, name: &str) -> Option<&dyn Tool> {
        self.tools
            .iter()
            .find(|t| t.name() == name)
            .map(|t| t.as_ref())
    }

    /// Declarations in the shape `ModelClient::chat_with_tools` expects.
    pub fn declarations(&self) -> Vec<ToolDeclaration> {
        self.tools
            .iter()
            .map(|t| ToolDeclaration {
                name: t.name().to_string(),
                description: t.description().to_string(),
                parameters: t.parameters_schema(),
            })
            .collect()
    }

    pub fn is_empty(&self) -> bool {
        self.tools.is_empty()
    }

    pub fn len(&self) -> usize {
        self.tools.len()
    }
}

impl Default for ToolRegistry {
    fn default() -> Self {
        Self::with_builtins()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn builtin_registry_has_four_tools() {
        let registry = ToolRegistry::with_builtins();
        assert_eq!(registry.len(), 4);
        assert!(registry.find("searchDocuments").is_some());
        assert!(registry.find("summarizeDocument").is_some());
        assert!(registry.find("sendEmail").is_some());
        assert!(registry.find("getDocumentStats").is_some());
        assert!(registry.find("unknownTool").is_none());
    }

    #[test]
    fn schema_object_lists_required() {
        let schema = schema_object(SEARCH_PARAMS);
        assert_eq!(schema["type"], "object");
        assert_eq!(schema["required"], json!(["query"]));
        assert_eq!(schema["properties"]["nResults"]["type"], "integer");
    }

    #[test]
    fn extension_stripping_is_case_insensitive() {
        assert_eq!(strip_known_extension("report.PDF"), "report");
        assert_eq!(strip_known_extension("report.docx"), "report");
        assert_eq!(strip_known_extension("OPENAI VS CLAUDE"), "OPENAI VS CLAUDE");
    }
}
